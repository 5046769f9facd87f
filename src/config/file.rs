//! TOML configuration file loading
//!
//! Supports `~/.config/pilet/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct PiletConfigFile {
    /// Manifest feed configuration
    #[serde(default)]
    pub feed: FeedFileConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Plugin runtime limits
    #[serde(default)]
    pub plugins: PluginsFileConfig,
}

/// Manifest feed configuration
#[derive(Debug, Default, Deserialize)]
pub struct FeedFileConfig {
    /// Manifest feed URL
    pub url: Option<String>,

    /// Change channel URL (derived from the feed URL when unset)
    pub channel_url: Option<String>,

    /// Whether to subscribe to change notifications
    pub watch: Option<bool>,

    /// Upper bound for one feed read, in seconds
    pub timeout_secs: Option<u64>,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// API server port
    pub port: Option<u16>,

    /// Path prefix plugins are mounted under (e.g. "/api")
    pub api_prefix: Option<String>,

    /// Maximum accepted request body size in bytes
    pub max_body_bytes: Option<usize>,
}

/// Plugin runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct PluginsFileConfig {
    /// Upper bound for fetching and evaluating a module graph
    pub load_timeout_secs: Option<u64>,

    /// Upper bound for a single handler invocation
    pub handler_timeout_secs: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `PiletConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> PiletConfigFile {
    config_file_path().map_or_else(PiletConfigFile::default, |path| load_config_from(&path))
}

/// Load a TOML config file from an explicit path
///
/// Missing or malformed files fall back to defaults with a warning.
pub fn load_config_from(path: &Path) -> PiletConfigFile {
    if !path.exists() {
        return PiletConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                PiletConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            PiletConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/pilet/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("pilet").join("config.toml"))
}
