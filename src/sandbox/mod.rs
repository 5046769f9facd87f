//! Sandboxed script execution for plugins
//!
//! Every plugin gets its own [`rhai::Engine`]. Fetched code only ever runs
//! inside that interpreter and can reach the host solely through the
//! registered router/reply API and the `host:` built-ins.

pub mod api;

use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use rhai::{AST, CallFnOptions, Dynamic, Engine, Scope};

use crate::{Error, Result};

/// Operations between deadline checks
const DEADLINE_CHECK_INTERVAL: u64 = 1024;

thread_local! {
    static DEADLINE: Cell<Option<Instant>> = const { Cell::new(None) };
}

/// Run `f` with scripts on this thread terminated once `deadline` passes
pub fn with_deadline<T>(deadline: Instant, f: impl FnOnce() -> T) -> T {
    struct Reset(Option<Instant>);
    impl Drop for Reset {
        fn drop(&mut self) {
            DEADLINE.with(|d| d.set(self.0));
        }
    }

    let _reset = Reset(DEADLINE.with(|d| d.replace(Some(deadline))));
    f()
}

fn deadline_passed() -> bool {
    DEADLINE.with(Cell::get).is_some_and(|d| Instant::now() >= d)
}

/// Create the interpreter for a plugin loaded from `source`
///
/// `eval` is disabled and `print`/`debug` are forwarded to `tracing`.
/// Scripts run under [`with_deadline`] are terminated when it passes.
#[must_use]
pub fn new_engine(source: &str) -> Engine {
    let mut engine = Engine::new();
    engine.disable_symbol("eval");

    engine.on_progress(|ops| {
        (ops % DEADLINE_CHECK_INTERVAL == 0 && deadline_passed())
            .then(|| Dynamic::from("deadline exceeded"))
    });

    let plugin = source.to_string();
    engine.on_print(move |text| {
        tracing::info!(plugin = %plugin, "{text}");
    });

    let plugin = source.to_string();
    engine.on_debug(move |text, origin, pos| {
        tracing::debug!(
            plugin = %plugin,
            origin = origin.unwrap_or_default(),
            position = %pos,
            "{text}"
        );
    });

    api::register(&mut engine);
    engine
}

/// A loaded plugin ready to have its functions called
///
/// Cloning is cheap; clones share the engine and compiled entry module.
#[derive(Clone)]
pub struct PluginInstance {
    engine: Arc<Engine>,
    ast: Arc<AST>,
    location: Arc<str>,
}

impl fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInstance")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl PluginInstance {
    /// Wrap an engine and the compiled entry module
    #[must_use]
    pub fn new(engine: Arc<Engine>, ast: Arc<AST>, location: &str) -> Self {
        Self {
            engine,
            ast,
            location: location.into(),
        }
    }

    /// Location of the entry module
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Whether the entry module defines `name` taking `arity` parameters
    #[must_use]
    pub fn has_function(&self, name: &str, arity: usize) -> bool {
        self.ast
            .iter_functions()
            .any(|f| f.name == name && f.params.len() == arity)
    }

    /// Call a function of the entry module
    ///
    /// The entry's top level is evaluated first so its imports are in scope.
    /// This blocks; call it from a blocking context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Handler`] if the function fails or is not defined
    pub fn call(&self, name: &str, args: Vec<Dynamic>) -> Result<Dynamic> {
        let mut scope = Scope::new();
        let options = CallFnOptions::new().eval_ast(true).rewind_scope(true);

        self.engine
            .call_fn_with_options::<Dynamic>(options, &mut scope, &self.ast, name, args)
            .map_err(|e| Error::Handler(format!("{}: {name}: {e}", self.location)))
    }
}
