//! Module resolution over a prebuilt graph

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use rhai::{AST, Engine, EvalAltResult, Module, ModuleResolver, Position, Scope};
use url::Url;

use super::builtins::Builtins;
use super::graph::BUILTIN_PREFIX;

/// Serves imports from an already fetched and linked module graph
///
/// Each module is evaluated at most once; later imports of the same location
/// share the evaluated module. Nothing is fetched at evaluation time.
pub struct GraphResolver {
    modules: HashMap<Url, AST>,
    builtins: Builtins,
    state: Mutex<ResolveState>,
}

#[derive(Default)]
struct ResolveState {
    evaluated: HashMap<Url, Arc<Module>>,
    in_progress: HashSet<Url>,
}

impl GraphResolver {
    /// Create a resolver over compiled modules and built-ins
    #[must_use]
    pub fn new(modules: HashMap<Url, AST>, builtins: Builtins) -> Self {
        Self {
            modules,
            builtins,
            state: Mutex::default(),
        }
    }

    /// Compiled module at a resolved location
    #[must_use]
    pub fn module(&self, location: &Url) -> Option<&AST> {
        self.modules.get(location)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ResolveState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ModuleResolver for GraphResolver {
    fn resolve(
        &self,
        engine: &Engine,
        _source: Option<&str>,
        path: &str,
        pos: Position,
    ) -> Result<Arc<Module>, Box<EvalAltResult>> {
        let not_found = || Box::new(EvalAltResult::ErrorModuleNotFound(path.to_string(), pos));

        if let Some(name) = path.strip_prefix(BUILTIN_PREFIX) {
            return self.builtins.get(name).ok_or_else(not_found);
        }

        let location = Url::parse(path).map_err(|_| not_found())?;
        let ast = self.modules.get(&location).ok_or_else(not_found)?;

        {
            let mut state = self.lock();
            if let Some(module) = state.evaluated.get(&location) {
                return Ok(Arc::clone(module));
            }
            if !state.in_progress.insert(location.clone()) {
                return Err(Box::new(EvalAltResult::ErrorInModule(
                    path.to_string(),
                    "import cycle".into(),
                    pos,
                )));
            }
        }

        // Nested imports re-enter `resolve`, so the lock is released here
        let result = Module::eval_ast_as_new(Scope::new(), ast, engine);

        let mut state = self.lock();
        state.in_progress.remove(&location);
        match result {
            Ok(module) => {
                let module = Arc::new(module);
                state.evaluated.insert(location, Arc::clone(&module));
                Ok(module)
            }
            Err(e) => Err(Box::new(EvalAltResult::ErrorInModule(
                path.to_string(),
                e,
                pos,
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(engine: &Engine, location: &str, source: &str) -> (Url, AST) {
        let mut ast = engine.compile(source).unwrap();
        ast.set_source(location);
        (Url::parse(location).unwrap(), ast)
    }

    #[test]
    fn evaluates_each_module_once() {
        let compiler = Engine::new();
        let modules = HashMap::from([
            compile(
                &compiler,
                "https://x/counter.rhai",
                r#"import "host:store" as store; store::set("n", store::get("n") ?? 0 + 1); export const ONE = 1;"#,
            ),
        ]);

        let builtins = Builtins::for_plugin("test");
        let mut engine = Engine::new();
        engine.set_module_resolver(GraphResolver::new(modules, builtins));

        let total: i64 = engine
            .eval(
                r#"
                import "https://x/counter.rhai" as a;
                import "https://x/counter.rhai" as b;
                import "host:store" as store;
                a::ONE + b::ONE + store::get("n")
                "#,
            )
            .unwrap();
        assert_eq!(total, 3);
    }

    #[test]
    fn reports_cycles() {
        let compiler = Engine::new();
        let modules = HashMap::from([
            compile(&compiler, "https://x/a.rhai", r#"import "https://x/b.rhai" as b;"#),
            compile(&compiler, "https://x/b.rhai", r#"import "https://x/a.rhai" as a;"#),
        ]);

        let mut engine = Engine::new();
        engine.set_module_resolver(GraphResolver::new(modules, Builtins::for_plugin("test")));

        let err = engine
            .run(r#"import "https://x/a.rhai" as a;"#)
            .unwrap_err();
        assert!(err.to_string().contains("import cycle"), "{err}");
    }

    #[test]
    fn unknown_module_is_not_found() {
        let mut engine = Engine::new();
        engine.set_module_resolver(GraphResolver::new(
            HashMap::new(),
            Builtins::for_plugin("test"),
        ));

        let err = engine.run(r#"import "https://x/nope.rhai" as n;"#).unwrap_err();
        assert!(matches!(*err, EvalAltResult::ErrorModuleNotFound(..)));
    }
}
