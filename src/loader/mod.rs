//! Remote module loading
//!
//! A load fetches the entry module, links its transitive import graph and
//! evaluates it inside a fresh sandboxed engine. Only the entry module's
//! exported bindings leave the evaluation context.

pub mod builtins;
pub mod fetch;
pub mod graph;
pub mod resolver;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rhai::{AST, Dynamic, Engine, EvalAltResult, FnAccess, Module, Scope};
use url::Url;

pub use builtins::{BUILTIN_NAMES, Builtins};
pub use fetch::{DefaultFetcher, SourceFetcher, StaticFetcher};
pub use graph::{ImportTarget, ModuleGraph, build_graph};
pub use resolver::GraphResolver;

use crate::routing::FunctionTable;
use crate::sandbox::{self, PluginInstance};
use crate::{Error, Result};

/// Name of the entry point a plugin exports to register its routes
pub const SETUP_FN: &str = "setup";

/// One exported binding of a plugin's entry module
#[derive(Debug, Clone)]
pub enum ExportBinding {
    /// Public function, with every declared arity
    Function {
        /// Parameter counts of the overloads
        arities: Vec<usize>,
    },
    /// Variable declared with `export`
    Value(Dynamic),
}

impl fmt::Display for ExportBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function { arities } => {
                let arities: Vec<String> = arities.iter().map(ToString::to_string).collect();
                write!(f, "fn/{}", arities.join(","))
            }
            Self::Value(value) => write!(f, "{}: {value}", value.type_name()),
        }
    }
}

/// Export bindings of a loaded plugin
#[derive(Debug, Clone, Default)]
pub struct ModuleExports {
    bindings: BTreeMap<String, ExportBinding>,
    instance: Option<PluginInstance>,
}

impl ModuleExports {
    /// Exports of a plugin that failed to load
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// All bindings by name
    #[must_use]
    pub const fn bindings(&self) -> &BTreeMap<String, ExportBinding> {
        &self.bindings
    }

    /// Binding by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ExportBinding> {
        self.bindings.get(name)
    }

    /// Whether nothing was exported
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Public functions and their arities
    #[must_use]
    pub fn functions(&self) -> FunctionTable {
        self.bindings
            .iter()
            .filter_map(|(name, binding)| match binding {
                ExportBinding::Function { arities } => Some((name.clone(), arities.clone())),
                ExportBinding::Value(_) => None,
            })
            .collect()
    }

    /// Whether a callable `setup(router)` is exported
    #[must_use]
    pub fn has_setup(&self) -> bool {
        matches!(
            self.bindings.get(SETUP_FN),
            Some(ExportBinding::Function { arities }) if arities.contains(&1)
        )
    }

    /// Instance to call exported functions on
    #[must_use]
    pub const fn instance(&self) -> Option<&PluginInstance> {
        self.instance.as_ref()
    }
}

/// Loads plugins from their entry location
#[derive(Clone)]
pub struct ModuleLoader {
    fetcher: Arc<dyn SourceFetcher>,
    timeout: Duration,
}

impl fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ModuleLoader {
    /// Create a loader fetching over HTTP(S) and from local files
    #[must_use]
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self::with_fetcher(Arc::new(DefaultFetcher::new(client)), timeout)
    }

    /// Create a loader with a custom source fetcher
    #[must_use]
    pub fn with_fetcher(fetcher: Arc<dyn SourceFetcher>, timeout: Duration) -> Self {
        Self { fetcher, timeout }
    }

    /// Upper bound for one load
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Load a plugin, degrading to empty exports on any failure
    ///
    /// The failure is logged with the offending module's location.
    pub async fn load(&self, location: &str) -> ModuleExports {
        match self.try_load(location).await {
            Ok(exports) => exports,
            Err(e) => {
                tracing::warn!(location, error = %e, "plugin load failed");
                ModuleExports::empty()
            }
        }
    }

    /// Load a plugin, surfacing the failure
    ///
    /// # Errors
    ///
    /// Returns [`Error::PluginLoad`] if any module in the graph fails to
    /// fetch, compile, link or evaluate, or the load times out
    pub async fn try_load(&self, location: &str) -> Result<ModuleExports> {
        let entry = Url::parse(location)
            .map_err(|e| Error::load(location, format!("invalid location: {e}")))?;

        tokio::time::timeout(self.timeout, self.load_graph(entry))
            .await
            .map_err(|_| Error::load(location, format!("timed out after {:?}", self.timeout)))?
    }

    async fn load_graph(&self, entry: Url) -> Result<ModuleExports> {
        let builtins = Builtins::for_plugin(entry.as_str());
        let mut engine = sandbox::new_engine(entry.as_str());

        let graph = build_graph(&entry, self.fetcher.as_ref(), &engine, &builtins).await?;
        tracing::debug!(location = %entry, modules = graph.len(), "module graph linked");

        let (entry, modules) = graph.into_modules();
        let ast = modules
            .get(&entry)
            .cloned()
            .ok_or_else(|| Error::load(&entry, "entry module missing from graph"))?;

        engine.set_module_resolver(GraphResolver::new(modules, builtins));
        let engine = Arc::new(engine);
        let ast = Arc::new(ast);

        let location = entry.to_string();
        let deadline = Instant::now() + self.timeout;
        tokio::task::spawn_blocking(move || {
            sandbox::with_deadline(deadline, || evaluate(engine, ast, &entry))
        })
        .await
        .map_err(|e| Error::load(&location, format!("evaluation aborted: {e}")))?
    }
}

fn evaluate(engine: Arc<Engine>, ast: Arc<AST>, entry: &Url) -> Result<ModuleExports> {
    let module = Module::eval_ast_as_new(Scope::new(), &ast, &engine).map_err(|e| {
        let location = failing_module(&e).unwrap_or(entry.as_str()).to_string();
        Error::load(location, format!("evaluation failed: {e}"))
    })?;

    let mut bindings = BTreeMap::new();
    for f in ast
        .iter_functions()
        .filter(|f| matches!(f.access, FnAccess::Public) && !f.name.starts_with("anon$"))
    {
        let binding = bindings
            .entry(f.name.to_string())
            .or_insert_with(|| ExportBinding::Function {
                arities: Vec::new(),
            });
        if let ExportBinding::Function { arities } = binding {
            arities.push(f.params.len());
        }
    }
    for (name, value) in module.iter_var() {
        bindings.insert(name.to_string(), ExportBinding::Value(value.clone()));
    }

    Ok(ModuleExports {
        bindings,
        instance: Some(PluginInstance::new(engine, ast, entry.as_str())),
    })
}

/// Innermost module location an evaluation error originated in
fn failing_module(err: &EvalAltResult) -> Option<&str> {
    match err {
        EvalAltResult::ErrorInModule(path, inner, _) => {
            failing_module(inner).or(Some(path.as_str()))
        }
        EvalAltResult::ErrorModuleNotFound(path, _) => Some(path.as_str()),
        _ => None,
    }
}
