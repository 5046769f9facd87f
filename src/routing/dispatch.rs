//! Request dispatch to installed plugins

use std::sync::Arc;
use std::time::{Duration, Instant};

use rhai::Dynamic;

use super::{PluginRequest, PluginResponse, Reply, RouteMatch};
use crate::plugins::PluginRegistry;
use crate::sandbox::{self, PluginInstance};
use crate::{Error, Result};

/// Routes `<prefix>/:namespace/*` requests to the owning plugin
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<PluginRegistry>,
    prefix: String,
    handler_timeout: Duration,
}

impl Dispatcher {
    /// Create a dispatcher over a registry
    pub fn new(
        registry: Arc<PluginRegistry>,
        prefix: impl Into<String>,
        handler_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            prefix: prefix.into(),
            handler_timeout,
        }
    }

    /// Registry requests are dispatched against
    #[must_use]
    pub const fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Namespace segment of a request path, if it is under the prefix
    #[must_use]
    pub fn namespace_of<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(self.prefix.as_str())?;
        let rest = rest.strip_prefix('/')?;
        let namespace = rest.split('/').next()?;
        (!namespace.is_empty()).then_some(namespace)
    }

    /// Dispatch a request to the plugin owning its namespace
    ///
    /// # Errors
    ///
    /// Returns [`Error::RouteNotFound`] if no installed namespace or route
    /// matches, [`Error::BadRequest`] if the body cannot be decoded and
    /// [`Error::Handler`] if the plugin handler fails or times out
    pub async fn dispatch(&self, request: PluginRequest) -> Result<PluginResponse> {
        let not_found = || Error::not_found(&request.method, &request.path);

        let namespace = self.namespace_of(&request.path).ok_or_else(not_found)?;
        let plugin = self.registry.get(namespace).await.ok_or_else(not_found)?;

        let router = plugin.router();
        let matched = router
            .find(&request.method, &request.path, request.header("host"))
            .ok_or_else(not_found)?;
        let instance = router.instance().cloned().ok_or_else(not_found)?;

        let result = invoke(instance, &matched, &request, self.handler_timeout).await;
        if let Err(Error::Handler(message)) = &result {
            tracing::warn!(
                identity = %plugin.identity,
                route = %matched.pattern,
                error = %message,
                "plugin handler failed"
            );
        }
        result
    }
}

/// Run a matched handler on the blocking pool, bounded by `timeout`
///
/// The script itself is terminated at the same deadline, so a runaway
/// handler does not keep a blocking thread busy.
///
/// # Errors
///
/// Returns [`Error::BadRequest`] for an undecodable body and
/// [`Error::Handler`] if the script fails, panics or times out
pub async fn invoke(
    instance: PluginInstance,
    matched: &RouteMatch,
    request: &PluginRequest,
    timeout: Duration,
) -> Result<PluginResponse> {
    let view = request.to_view(&matched.params)?;
    let reply = Reply::new();

    let mut args = matched.handler.curry.clone();
    args.push(view);
    args.push(Dynamic::from(reply.clone()));

    let name = matched.handler.name.clone();
    let deadline = Instant::now() + timeout;
    let task = tokio::task::spawn_blocking(move || {
        sandbox::with_deadline(deadline, || instance.call(&name, args))
    });

    let returned = match tokio::time::timeout(timeout, task).await {
        Ok(Ok(result)) => result?,
        Ok(Err(e)) => return Err(Error::Handler(format!("handler aborted: {e}"))),
        Err(_) => {
            return Err(Error::Handler(format!(
                "handler {} timed out after {timeout:?}",
                matched.handler.name
            )));
        }
    };

    reply.finish(&request.method, &request.path, returned)
}
