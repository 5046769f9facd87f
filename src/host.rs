//! Gateway host: wires the registry, feed, watcher and HTTP server together

use std::sync::Arc;

use axum::Router;
use tokio_util::sync::CancellationToken;

use crate::api::{self, ApiServer, ApiState};
use crate::feed::{self, FeedClient, Watcher};
use crate::loader::ModuleLoader;
use crate::plugins::{PluginRegistry, ReconcileReport};
use crate::routing::{Dispatcher, RouterFactory};
use crate::{Config, Error, Result};

/// Running gateway
#[derive(Debug)]
pub struct Host {
    config: Config,
    registry: Arc<PluginRegistry>,
    feed: FeedClient,
    cancel: CancellationToken,
}

impl Host {
    /// Create a host with an empty registry
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pilet-gateway/", env!("CARGO_PKG_VERSION")))
            .timeout(config.feed_timeout.max(config.load_timeout))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        let loader = ModuleLoader::new(client.clone(), config.load_timeout);
        let factory = RouterFactory::new(config.api_prefix.clone());
        let registry = Arc::new(PluginRegistry::new(loader, factory));
        let feed =
            FeedClient::new(config.feed_url.clone(), client).with_timeout(config.feed_timeout);

        Ok(Self {
            config,
            registry,
            feed,
            cancel: CancellationToken::new(),
        })
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Installed plugins
    #[must_use]
    pub const fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Manifest feed client
    #[must_use]
    pub const fn feed(&self) -> &FeedClient {
        &self.feed
    }

    /// Token that stops the server and watcher when cancelled
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Dispatcher over this host's registry
    #[must_use]
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            Arc::clone(&self.registry),
            self.config.api_prefix.clone(),
            self.config.handler_timeout,
        )
    }

    /// HTTP router, for serving or in-process requests
    #[must_use]
    pub fn router(&self) -> Router {
        api::router(Arc::new(ApiState {
            dispatcher: self.dispatcher(),
            max_body_bytes: self.config.max_body_bytes,
        }))
    }

    /// Install everything currently on the feed
    ///
    /// # Errors
    ///
    /// Returns [`Error::FeedUnavailable`] if the feed cannot be read
    pub async fn load_plugins(&self) -> Result<ReconcileReport> {
        tracing::info!(feed = %self.config.feed_url, "loading plugins");
        feed::sync_once(&self.feed, &self.registry).await
    }

    /// Serve until Ctrl-C or cancellation
    ///
    /// An unreachable feed at startup is logged and the server starts with
    /// no plugins; the watcher installs them once the feed recovers.
    ///
    /// # Errors
    ///
    /// Returns error if the server fails to bind or serve
    pub async fn run(self) -> Result<()> {
        if let Err(e) = self.load_plugins().await {
            tracing::warn!(error = %e, "initial plugin load failed, starting empty");
        }

        let watcher = if self.config.watch {
            match self.config.channel_url() {
                Ok(channel_url) => Some(
                    Watcher::new(self.feed.clone(), channel_url, Arc::clone(&self.registry))
                        .spawn(self.cancel.clone()),
                ),
                Err(e) => {
                    tracing::warn!(error = %e, "change channel unavailable, not watching");
                    None
                }
            }
        } else {
            tracing::info!("watching disabled");
            None
        };

        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                cancel.cancel();
            }
        });

        let server = ApiServer::new(
            self.dispatcher(),
            self.config.max_body_bytes,
            self.config.port,
        );
        let result = server.run(self.cancel.clone()).await;

        // Stop the watcher even if the server failed
        self.cancel.cancel();
        if let Some(watcher) = watcher
            && let Err(e) = watcher.await
        {
            tracing::error!(error = %e, "watcher task failed");
        }

        result
    }
}
