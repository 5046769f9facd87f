//! HTTP surface of the pilet gateway
//!
//! The server owns only `GET /`. Everything else falls through to the
//! dispatcher, which forwards `<prefix>/<namespace>/...` to the plugin
//! installed under that namespace.

mod error;
mod forward;
pub mod root;

pub use error::{ErrorBody, error_response};

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::routing::Dispatcher;

/// Shared state for API handlers
#[derive(Debug)]
pub struct ApiState {
    pub dispatcher: Dispatcher,
    pub max_body_bytes: usize,
}

/// Build the gateway router
#[must_use]
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .merge(root::router())
        .fallback(forward::forward)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// HTTP server for the gateway
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    /// Create a server listening on `port`
    #[must_use]
    pub fn new(dispatcher: Dispatcher, max_body_bytes: usize, port: u16) -> Self {
        Self {
            state: Arc::new(ApiState {
                dispatcher,
                max_body_bytes,
            }),
            port,
        }
    }

    /// Router serving this server's state
    #[must_use]
    pub fn router(&self) -> Router {
        router(Arc::clone(&self.state))
    }

    /// Run the server until `cancel` fires
    ///
    /// # Errors
    ///
    /// Returns error if the server fails to bind or serve
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        tracing::info!("API server stopped");
        Ok(())
    }

    /// Run the server in a background task
    #[must_use]
    pub fn spawn(self, cancel: CancellationToken) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}
