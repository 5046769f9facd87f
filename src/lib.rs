//! Pilet Gateway - plugin host for scripted HTTP plugins
//!
//! Plugins are published on a manifest feed as `name@version` descriptors
//! pointing at a Rhai entry module. The gateway loads each plugin's module
//! graph into a sandbox, lets it register routes under its own namespace and
//! forwards matching requests to it. A change channel keeps the installed
//! set in sync with the feed while the server runs.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  fetch / watch  ┌──────────────────┐
//! │ Manifest feed│◄────────────────│  feed::Watcher   │
//! └──────────────┘                 └────────┬─────────┘
//!                                           │ reconcile
//! ┌──────────────┐   load graph   ┌─────────▼─────────┐
//! │ ModuleLoader │◄───────────────│  PluginRegistry   │
//! └──────────────┘                └─────────┬─────────┘
//!                                           │ namespace routers
//! ┌──────────────┐    dispatch    ┌─────────▼─────────┐
//! │  HTTP (axum) │───────────────►│    Dispatcher     │
//! └──────────────┘                └───────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod feed;
pub mod host;
pub mod loader;
pub mod plugins;
pub mod routing;
pub mod sandbox;

pub use config::Config;
pub use error::{Error, Result};
pub use feed::{FeedClient, Watcher};
pub use host::Host;
pub use loader::{ModuleExports, ModuleLoader};
pub use plugins::{Descriptor, PluginRegistry, ReconcileReport};
pub use routing::{Dispatcher, PluginRequest, PluginResponse, RouterFactory};
