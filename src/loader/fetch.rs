//! Module source fetching

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::{Error, Result};

/// Fetch module source text from a location
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Fetch the source text at `location`
    ///
    /// # Errors
    ///
    /// Returns error if the source cannot be retrieved
    async fn fetch(&self, location: &Url) -> Result<String>;
}

/// Fetches `http`, `https` and `file` locations
#[derive(Debug, Clone, Default)]
pub struct DefaultFetcher {
    client: reqwest::Client,
}

impl DefaultFetcher {
    /// Create a fetcher sharing the given HTTP client
    #[must_use]
    pub const fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceFetcher for DefaultFetcher {
    async fn fetch(&self, location: &Url) -> Result<String> {
        match location.scheme() {
            "http" | "https" => {
                let response = self.client.get(location.clone()).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(Error::load(location, format!("unexpected status {status}")));
                }
                Ok(response.text().await?)
            }
            "file" => {
                let path = location
                    .to_file_path()
                    .map_err(|()| Error::load(location, "not a local file path"))?;
                Ok(tokio::fs::read_to_string(&path).await?)
            }
            other => Err(Error::load(
                location,
                format!("unsupported scheme {other:?}"),
            )),
        }
    }
}

/// In-memory sources keyed by location, for embedding and tests
#[derive(Debug, Clone, Default)]
pub struct StaticFetcher {
    sources: Arc<HashMap<String, String>>,
}

impl StaticFetcher {
    /// Create a fetcher serving the given `(location, source)` pairs
    pub fn new<I, K, V>(sources: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            sources: Arc::new(
                sources
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl SourceFetcher for StaticFetcher {
    async fn fetch(&self, location: &Url) -> Result<String> {
        self.sources
            .get(location.as_str())
            .cloned()
            .ok_or_else(|| Error::load(location, "no such module"))
    }
}
