//! Error types for the pilet gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the pilet gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Manifest feed or change channel could not be read
    #[error("feed unavailable: {0}")]
    FeedUnavailable(String),

    /// Fetch, compile, link or evaluate failed somewhere in a module graph
    #[error("plugin load failed at {location}: {message}")]
    PluginLoad {
        /// Location of the module that failed
        location: String,
        /// Failure reason
        message: String,
    },

    /// No namespace or no route matched the request
    #[error("route {method}:{path} not found")]
    RouteNotFound {
        /// Request method
        method: String,
        /// Request path
        path: String,
    },

    /// Uncaught failure inside a plugin handler
    #[error("handler error: {0}")]
    Handler(String),

    /// Request could not be turned into a plugin request view
    #[error("bad request: {0}")]
    BadRequest(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing error
    #[error("url error: {0}")]
    Url(#[from] url::ParseError),

    /// `WebSocket` error on the change channel
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl Error {
    /// Build a [`Error::PluginLoad`] for the given location
    pub fn load(location: impl ToString, message: impl ToString) -> Self {
        Self::PluginLoad {
            location: location.to_string(),
            message: message.to_string(),
        }
    }

    /// Build a [`Error::RouteNotFound`] for the given method and path
    pub fn not_found(method: impl ToString, path: impl ToString) -> Self {
        Self::RouteNotFound {
            method: method.to_string(),
            path: path.to_string(),
        }
    }
}
