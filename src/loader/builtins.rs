//! Host built-in modules
//!
//! Built-ins are addressed as `host:<name>` and bound straight from the host
//! without any fetch. A fresh set is created for every evaluation context,
//! so stateful built-ins like `host:store` are never shared between plugins.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use pulldown_cmark::{Options, Parser, html};
use rhai::{Array, Dynamic, EvalAltResult, ImmutableString, Module};

/// Names of the modules every plugin can import
pub const BUILTIN_NAMES: [&str; 5] = ["json", "log", "markdown", "store", "uuid"];

/// Built-in modules of one evaluation context
#[derive(Clone)]
pub struct Builtins {
    modules: HashMap<&'static str, Arc<Module>>,
}

impl std::fmt::Debug for Builtins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.modules.keys().collect();
        names.sort();
        f.debug_struct("Builtins").field("modules", &names).finish()
    }
}

impl Builtins {
    /// Create the built-in set for a plugin loaded from `source`
    #[must_use]
    pub fn for_plugin(source: &str) -> Self {
        let modules = HashMap::from([
            ("json", Arc::new(json_module())),
            ("log", Arc::new(log_module(source))),
            ("markdown", Arc::new(markdown_module())),
            ("store", Arc::new(store_module())),
            ("uuid", Arc::new(uuid_module())),
        ]);
        Self { modules }
    }

    /// Whether `name` is a known built-in
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Shared handle to a built-in module
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Module>> {
        self.modules.get(name).cloned()
    }
}

/// Render markdown to HTML
#[must_use]
pub fn render_markdown(src: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let parser = Parser::new_ext(src, options);
    let mut out = String::with_capacity(src.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

fn markdown_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("render", |src: ImmutableString| Ok(render_markdown(&src)));
    module
}

fn uuid_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("v4", || Ok(uuid::Uuid::new_v4().to_string()));
    module
}

fn json_module() -> Module {
    let mut module = Module::new();
    module.set_native_fn("parse", |text: ImmutableString| {
        let value: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| Box::<EvalAltResult>::from(format!("invalid JSON: {e}")))?;
        rhai::serde::to_dynamic(value)
    });
    module.set_native_fn("stringify", |value: Dynamic| {
        serde_json::to_string(&value)
            .map_err(|e| Box::<EvalAltResult>::from(format!("cannot serialize: {e}")))
    });
    module
}

fn log_module(source: &str) -> Module {
    let mut module = Module::new();

    let plugin = source.to_string();
    module.set_native_fn("info", move |message: Dynamic| {
        tracing::info!(plugin = %plugin, "{message}");
        Ok(())
    });

    let plugin = source.to_string();
    module.set_native_fn("warn", move |message: Dynamic| {
        tracing::warn!(plugin = %plugin, "{message}");
        Ok(())
    });

    let plugin = source.to_string();
    module.set_native_fn("error", move |message: Dynamic| {
        tracing::error!(plugin = %plugin, "{message}");
        Ok(())
    });

    module
}

type Store = Arc<RwLock<BTreeMap<String, Dynamic>>>;

fn store_module() -> Module {
    let store: Store = Arc::default();
    let mut module = Module::new();

    let s = Arc::clone(&store);
    module.set_native_fn("get", move |key: ImmutableString| {
        let map = s.read().unwrap_or_else(PoisonError::into_inner);
        Ok(map.get(key.as_str()).cloned().unwrap_or(Dynamic::UNIT))
    });

    let s = Arc::clone(&store);
    module.set_native_fn("set", move |key: ImmutableString, value: Dynamic| {
        let mut map = s.write().unwrap_or_else(PoisonError::into_inner);
        map.insert(key.to_string(), value);
        Ok(())
    });

    let s = Arc::clone(&store);
    module.set_native_fn("remove", move |key: ImmutableString| {
        let mut map = s.write().unwrap_or_else(PoisonError::into_inner);
        Ok(map.remove(key.as_str()).unwrap_or(Dynamic::UNIT))
    });

    let s = Arc::clone(&store);
    module.set_native_fn("contains", move |key: ImmutableString| {
        let map = s.read().unwrap_or_else(PoisonError::into_inner);
        Ok(map.contains_key(key.as_str()))
    });

    let s = Arc::clone(&store);
    module.set_native_fn("keys", move || {
        let map = s.read().unwrap_or_else(PoisonError::into_inner);
        Ok(map.keys().map(|k| Dynamic::from(k.clone())).collect::<Array>())
    });

    module.set_native_fn("len", move || {
        let map = store.read().unwrap_or_else(PoisonError::into_inner);
        Ok(i64::try_from(map.len()).unwrap_or(i64::MAX))
    });

    module
}

#[cfg(test)]
mod tests {
    use rhai::{Engine, Scope};

    use super::*;

    fn engine_with(builtins: &Builtins) -> Engine {
        let mut engine = Engine::new();
        for name in BUILTIN_NAMES {
            if let Some(module) = builtins.get(name) {
                engine.register_static_module(name, module);
            }
        }
        engine
    }

    #[test]
    fn render_heading() {
        assert_eq!(render_markdown("# Hi"), "<h1>Hi</h1>\n");
    }

    #[test]
    fn every_name_is_present() {
        let builtins = Builtins::for_plugin("test");
        for name in BUILTIN_NAMES {
            assert!(builtins.contains(name), "missing built-in {name}");
        }
        assert!(!builtins.contains("fs"));
    }

    #[test]
    fn markdown_and_uuid_from_script() {
        let builtins = Builtins::for_plugin("test");
        let engine = engine_with(&builtins);

        let html: String = engine.eval(r#"markdown::render("*hey*")"#).unwrap();
        assert_eq!(html, "<p><em>hey</em></p>\n");

        let id: String = engine.eval("uuid::v4()").unwrap();
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn json_round_trip_from_script() {
        let builtins = Builtins::for_plugin("test");
        let engine = engine_with(&builtins);

        let n: i64 = engine.eval(r#"json::parse("{\"a\": 41}").a + 1"#).unwrap();
        assert_eq!(n, 42);
        assert!(engine.eval::<Dynamic>(r#"json::parse("{oops")"#).is_err());
    }

    #[test]
    fn store_is_per_context() {
        let first = Builtins::for_plugin("first");
        let second = Builtins::for_plugin("second");
        let engine_a = engine_with(&first);
        let engine_b = engine_with(&second);

        engine_a
            .run_with_scope(&mut Scope::new(), r#"store::set("k", 1);"#)
            .unwrap();

        assert!(engine_a.eval::<bool>(r#"store::contains("k")"#).unwrap());
        assert_eq!(engine_a.eval::<i64>("store::len()").unwrap(), 1);
        assert!(!engine_b.eval::<bool>(r#"store::contains("k")"#).unwrap());
    }
}
