//! Plugin registry
//!
//! Plugins are published on a manifest feed as `name@version` descriptors.
//! The registry installs each one under its namespace (the plugin name) and
//! converges the installed set onto the latest feed snapshot.

pub mod descriptor;
pub mod registry;

pub use descriptor::{ChangeKind, ChangeNotification, Descriptor, FeedSnapshot, PluginIdentity};
pub use registry::{InstalledPlugin, PluginRegistry, PluginSummary, PluginUpdate, ReconcileReport};
