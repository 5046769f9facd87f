//! Configuration management for the pilet gateway

pub mod file;

use std::time::Duration;

use url::Url;

use crate::{Error, Result};

pub use file::PiletConfigFile;

/// Feed used when nothing else is configured
pub const DEFAULT_FEED_URL: &str = "https://feed.dev.piral.cloud/api/v1/pilet/fastify-demo";

/// Default path prefix plugins are mounted under
pub const DEFAULT_API_PREFIX: &str = "/api";

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 3000;

/// Default upper bound for loading one plugin's module graph
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Default upper bound for one full feed read
pub const DEFAULT_FEED_TIMEOUT: Duration = Duration::from_secs(30);

/// Default upper bound for one handler invocation
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum request body size (1 MiB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Pilet gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Manifest feed URL
    pub feed_url: Url,

    /// Explicit change channel URL; derived from `feed_url` when `None`
    pub channel_url: Option<Url>,

    /// Path prefix plugins are mounted under, normalized (`/api`, or empty)
    pub api_prefix: String,

    /// Port to listen on
    pub port: u16,

    /// Subscribe to change notifications
    pub watch: bool,

    /// Upper bound for one feed read
    pub feed_timeout: Duration,

    /// Upper bound for fetching, compiling and evaluating a module graph
    pub load_timeout: Duration,

    /// Upper bound for a single handler invocation
    pub handler_timeout: Duration,

    /// Maximum request body forwarded to a plugin
    pub max_body_bytes: usize,
}

impl Config {
    /// Create a configuration for a feed with all other settings at defaults
    #[must_use]
    pub fn new(feed_url: Url) -> Self {
        Self {
            feed_url,
            channel_url: None,
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            port: DEFAULT_PORT,
            watch: true,
            feed_timeout: DEFAULT_FEED_TIMEOUT,
            load_timeout: DEFAULT_LOAD_TIMEOUT,
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if a configured URL is invalid
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Assemble configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a configured URL is invalid or a timeout is zero
    pub fn from_sources(
        fc: PiletConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let feed_url = env("PILET_FEED_URL")
            .or(fc.feed.url)
            .unwrap_or_else(|| DEFAULT_FEED_URL.to_string());
        let feed_url = parse_url("feed", &feed_url)?;

        let channel_url = env("PILET_CHANNEL_URL")
            .or(fc.feed.channel_url)
            .map(|raw| parse_url("channel", &raw))
            .transpose()?;

        let api_prefix = env("PILET_API_PREFIX")
            .or(fc.server.api_prefix)
            .map_or_else(|| DEFAULT_API_PREFIX.to_string(), |p| normalize_prefix(&p));

        let port = env("PILET_PORT")
            .or_else(|| env("PORT"))
            .and_then(|p| p.parse().ok())
            .or(fc.server.port)
            .unwrap_or(DEFAULT_PORT);

        let watch = env("PILET_WATCH")
            .map(|v| parse_bool(&v))
            .or(fc.feed.watch)
            .unwrap_or(true);

        let feed_timeout = timeout_secs(
            "feed",
            env("PILET_FEED_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .or(fc.feed.timeout_secs),
            DEFAULT_FEED_TIMEOUT,
        )?;

        let load_timeout = timeout_secs(
            "load",
            env("PILET_LOAD_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .or(fc.plugins.load_timeout_secs),
            DEFAULT_LOAD_TIMEOUT,
        )?;

        let handler_timeout = timeout_secs(
            "handler",
            env("PILET_HANDLER_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .or(fc.plugins.handler_timeout_secs),
            DEFAULT_HANDLER_TIMEOUT,
        )?;

        let max_body_bytes = env("PILET_MAX_BODY_BYTES")
            .and_then(|v| v.parse().ok())
            .or(fc.server.max_body_bytes)
            .unwrap_or(DEFAULT_MAX_BODY_BYTES);

        Ok(Self {
            feed_url,
            channel_url,
            api_prefix,
            port,
            watch,
            feed_timeout,
            load_timeout,
            handler_timeout,
            max_body_bytes,
        })
    }

    /// Change channel URL, explicit or derived from the feed URL
    ///
    /// # Errors
    ///
    /// Returns error if the feed URL has no streaming counterpart
    pub fn channel_url(&self) -> Result<Url> {
        match &self.channel_url {
            Some(url) => Ok(url.clone()),
            None => crate::feed::channel_url_for(&self.feed_url),
        }
    }
}

/// Normalize a mount prefix to `/segment[/segment]` without a trailing slash
///
/// An empty or root prefix normalizes to the empty string.
#[must_use]
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

fn parse_url(what: &str, raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::Config(format!("invalid {what} url {raw:?}: {e}")))
}

/// A zero timeout would expire every operation immediately
fn timeout_secs(what: &str, secs: Option<u64>, default: Duration) -> Result<Duration> {
    match secs {
        None => Ok(default),
        Some(0) => Err(Error::Config(format!("{what} timeout must be at least one second"))),
        Some(secs) => Ok(Duration::from_secs(secs)),
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_sources() {
        let config = Config::from_sources(PiletConfigFile::default(), env_from(&[])).unwrap();

        assert_eq!(config.feed_url.as_str(), DEFAULT_FEED_URL);
        assert_eq!(config.api_prefix, "/api");
        assert_eq!(config.port, 3000);
        assert!(config.watch);
        assert_eq!(config.load_timeout, DEFAULT_LOAD_TIMEOUT);
        assert_eq!(config.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
    }

    #[test]
    fn env_overrides_file() {
        let fc: PiletConfigFile = toml::from_str(
            r#"
            [feed]
            url = "https://file.example.com/feed"
            watch = true

            [server]
            port = 8080
            api_prefix = "plugins/"
            "#,
        )
        .unwrap();

        let config = Config::from_sources(
            fc,
            env_from(&[
                ("PILET_FEED_URL", "https://env.example.com/feed"),
                ("PILET_WATCH", "false"),
                ("PILET_LOAD_TIMEOUT_SECS", "5"),
            ]),
        )
        .unwrap();

        assert_eq!(config.feed_url.as_str(), "https://env.example.com/feed");
        assert!(!config.watch);
        assert_eq!(config.port, 8080);
        assert_eq!(config.api_prefix, "/plugins");
        assert_eq!(config.load_timeout, Duration::from_secs(5));
    }

    #[test]
    fn invalid_feed_url_is_config_error() {
        let result = Config::from_sources(
            PiletConfigFile::default(),
            env_from(&[("PILET_FEED_URL", "not a url")]),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        for key in [
            "PILET_FEED_TIMEOUT_SECS",
            "PILET_LOAD_TIMEOUT_SECS",
            "PILET_HANDLER_TIMEOUT_SECS",
        ] {
            let result = Config::from_sources(PiletConfigFile::default(), env_from(&[(key, "0")]));
            assert!(matches!(result, Err(Error::Config(_))), "{key}");
        }

        let fc: PiletConfigFile = toml::from_str("[plugins]\nhandler_timeout_secs = 0").unwrap();
        let result = Config::from_sources(fc, env_from(&[]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn feed_timeout_from_file() {
        let fc: PiletConfigFile = toml::from_str("[feed]\ntimeout_secs = 7").unwrap();
        let config = Config::from_sources(fc, env_from(&[])).unwrap();
        assert_eq!(config.feed_timeout, Duration::from_secs(7));
    }

    #[test]
    fn channel_url_derived_from_feed() {
        let config = Config::new(Url::parse("https://feed.example.com/api/v1/pilet/x").unwrap());
        assert_eq!(
            config.channel_url().unwrap().as_str(),
            "wss://feed.example.com/api/v1/pilet/x"
        );
    }

    #[test]
    fn prefix_normalization() {
        assert_eq!(normalize_prefix("/api"), "/api");
        assert_eq!(normalize_prefix("api/"), "/api");
        assert_eq!(normalize_prefix("/v1/plugins/"), "/v1/plugins");
        assert_eq!(normalize_prefix("/"), "");
        assert_eq!(normalize_prefix(""), "");
    }
}
