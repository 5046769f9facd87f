//! Namespace-scoped routers built by plugin setup routines
//!
//! A plugin's `setup(router)` receives a [`RouteBuilder`] bound to
//! `prefix/namespace`. Once setup returns, the builder is frozen into a
//! [`NamespaceRouter`] that is never patched again; updates replace it
//! wholesale.

pub mod dispatch;
pub mod pattern;
pub mod reply;
pub mod request;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use rhai::Dynamic;

pub use dispatch::Dispatcher;
pub use pattern::{PathPattern, join_paths, normalize_path};
pub use reply::{PluginResponse, Reply};
pub use request::PluginRequest;

use crate::sandbox::PluginInstance;
use crate::{Error, Result};

/// Methods a route can be registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodFilter {
    /// `GET` (also answers `HEAD`)
    Get,
    /// `PUT`
    Put,
    /// `POST`
    Post,
    /// `DELETE`
    Delete,
    /// `PATCH`
    Patch,
    /// Any method
    All,
}

impl MethodFilter {
    /// Whether a request method is accepted
    #[must_use]
    pub fn accepts(self, method: &str) -> bool {
        match self {
            Self::Get => method.eq_ignore_ascii_case("GET") || method.eq_ignore_ascii_case("HEAD"),
            Self::Put => method.eq_ignore_ascii_case("PUT"),
            Self::Post => method.eq_ignore_ascii_case("POST"),
            Self::Delete => method.eq_ignore_ascii_case("DELETE"),
            Self::Patch => method.eq_ignore_ascii_case("PATCH"),
            Self::All => true,
        }
    }

    /// Name of the registration verb
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Put => "put",
            Self::Post => "post",
            Self::Delete => "delete",
            Self::Patch => "patch",
            Self::All => "all",
        }
    }
}

impl fmt::Display for MethodFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("*"),
            other => f.write_str(&other.verb().to_ascii_uppercase()),
        }
    }
}

/// Plugin function invoked for a route
#[derive(Debug, Clone)]
pub struct HandlerRef {
    /// Function name in the plugin's entry module
    pub name: String,
    /// Arguments bound ahead of `(request, reply)`
    pub curry: Vec<Dynamic>,
}

impl HandlerRef {
    /// Handler calling `name` with no bound arguments
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            curry: Vec::new(),
        }
    }

    /// Number of parameters the target function must declare
    #[must_use]
    pub fn arity(&self) -> usize {
        self.curry.len() + 2
    }
}

/// Options stored with a route
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteOptions {
    /// Only match requests whose `Host` header equals this value
    pub host: Option<String>,
    /// Options as given at registration
    pub raw: serde_json::Value,
}

impl RouteOptions {
    /// Read options from a registration map
    #[must_use]
    pub fn from_value(raw: serde_json::Value) -> Self {
        let host = raw
            .pointer("/constraints/host")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        Self { host, raw }
    }

    fn accepts_host(&self, host: Option<&str>) -> bool {
        self.host
            .as_deref()
            .is_none_or(|expected| host.is_some_and(|h| h.eq_ignore_ascii_case(expected)))
    }
}

/// One registered route
#[derive(Debug, Clone)]
pub struct Route {
    /// Accepted methods
    pub method: MethodFilter,
    /// Full pattern including prefix and namespace
    pub pattern: PathPattern,
    /// Handler to invoke
    pub handler: HandlerRef,
    /// Registration options
    pub options: RouteOptions,
    order: usize,
}

impl Route {
    fn precedence(&self, other: &Self) -> Ordering {
        self.pattern
            .precedence(&other.pattern)
            .then_with(|| {
                (self.method == MethodFilter::All).cmp(&(other.method == MethodFilter::All))
            })
            .then_with(|| self.order.cmp(&other.order))
    }
}

/// Result of a successful route lookup
#[derive(Debug, Clone)]
pub struct RouteMatch {
    /// Pattern that matched
    pub pattern: String,
    /// Handler to invoke
    pub handler: HandlerRef,
    /// Captured path parameters
    pub params: BTreeMap<String, String>,
}

/// Function names and arities a plugin's entry module exposes
pub type FunctionTable = BTreeMap<String, Vec<usize>>;

/// Creates routers scoped under the API prefix
#[derive(Debug, Clone)]
pub struct RouterFactory {
    prefix: String,
}

impl RouterFactory {
    /// Create a factory mounting namespaces under `prefix`
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// API prefix routes are mounted under
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Base path of a namespace
    #[must_use]
    pub fn base_path(&self, namespace: &str) -> String {
        join_paths(&[&self.prefix, namespace])
    }

    /// Create a builder for one namespace, validating handlers against
    /// the plugin's functions
    #[must_use]
    pub fn build_namespace_router(
        &self,
        namespace: &str,
        functions: Arc<FunctionTable>,
    ) -> RouteBuilder {
        RouteBuilder {
            namespace: namespace.into(),
            base: self.base_path(namespace).into(),
            functions,
            routes: Arc::default(),
        }
    }

    /// Router with no routes
    #[must_use]
    pub fn empty(&self, namespace: &str) -> NamespaceRouter {
        NamespaceRouter {
            namespace: namespace.to_string(),
            base: self.base_path(namespace),
            routes: Vec::new(),
            instance: None,
        }
    }
}

/// Route registration surface handed to a plugin's `setup`
#[derive(Clone)]
pub struct RouteBuilder {
    namespace: Arc<str>,
    base: Arc<str>,
    functions: Arc<FunctionTable>,
    routes: Arc<Mutex<Vec<Route>>>,
}

impl fmt::Debug for RouteBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteBuilder")
            .field("base", &self.base)
            .field("routes", &self.len())
            .finish_non_exhaustive()
    }
}

impl RouteBuilder {
    /// Register a route at `prefix/namespace/path`
    ///
    /// # Errors
    ///
    /// Returns error if the plugin defines no function matching the
    /// handler's name and arity
    pub fn register(
        &self,
        method: MethodFilter,
        path: &str,
        handler: HandlerRef,
        options: RouteOptions,
    ) -> Result<()> {
        let defined = self
            .functions
            .get(&handler.name)
            .is_some_and(|arities| arities.contains(&handler.arity()));
        if !defined {
            return Err(Error::Handler(format!(
                "{} {path}: no function {}/{} in plugin {}",
                method.verb(),
                handler.name,
                handler.arity(),
                self.namespace
            )));
        }

        let pattern = PathPattern::parse(&join_paths(&[&self.base, &normalize_path(path)]));
        tracing::debug!(
            namespace = %self.namespace,
            method = %method,
            path = pattern.as_str(),
            handler = %handler.name,
            "registered route"
        );

        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        let order = routes.len();
        routes.push(Route {
            method,
            pattern,
            handler,
            options,
            order,
        });
        Ok(())
    }

    /// Number of routes registered so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no routes were registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Freeze registered routes into a router bound to `instance`
    #[must_use]
    pub fn finish(self, instance: PluginInstance) -> NamespaceRouter {
        let mut routes =
            std::mem::take(&mut *self.routes.lock().unwrap_or_else(PoisonError::into_inner));
        routes.sort_by(Route::precedence);

        NamespaceRouter {
            namespace: self.namespace.to_string(),
            base: self.base.to_string(),
            routes,
            instance: Some(instance),
        }
    }
}

/// Immutable route table of one installed plugin
pub struct NamespaceRouter {
    namespace: String,
    base: String,
    routes: Vec<Route>,
    instance: Option<PluginInstance>,
}

impl fmt::Debug for NamespaceRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespaceRouter")
            .field("base", &self.base)
            .field("routes", &self.routes.len())
            .finish_non_exhaustive()
    }
}

impl NamespaceRouter {
    /// Namespace this router serves
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Base path, `prefix/namespace`
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Routes in match order
    #[must_use]
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Number of routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the router has no routes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Plugin instance handlers run in
    #[must_use]
    pub const fn instance(&self) -> Option<&PluginInstance> {
        self.instance.as_ref()
    }

    /// Find the most specific route for a request
    #[must_use]
    pub fn find(&self, method: &str, path: &str, host: Option<&str>) -> Option<RouteMatch> {
        self.routes.iter().find_map(|route| {
            if !route.method.accepts(method) || !route.options.accepts_host(host) {
                return None;
            }
            let params = route.pattern.matches(path)?;
            Some(RouteMatch {
                pattern: route.pattern.as_str().to_string(),
                handler: route.handler.clone(),
                params,
            })
        })
    }
}
