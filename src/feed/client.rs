//! One-shot manifest feed reads

use std::time::Duration;

use url::Url;

use crate::config::DEFAULT_FEED_TIMEOUT;
use crate::plugins::{Descriptor, FeedSnapshot};
use crate::{Error, Result};

/// Reads the manifest feed
#[derive(Debug, Clone)]
pub struct FeedClient {
    feed_url: Url,
    client: reqwest::Client,
    timeout: Duration,
}

impl FeedClient {
    /// Create a client for `feed_url`
    #[must_use]
    pub const fn new(feed_url: Url, client: reqwest::Client) -> Self {
        Self {
            feed_url,
            client,
            timeout: DEFAULT_FEED_TIMEOUT,
        }
    }

    /// Bound every feed read by `timeout`
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Feed address
    #[must_use]
    pub const fn feed_url(&self) -> &Url {
        &self.feed_url
    }

    /// Fetch every descriptor currently published
    ///
    /// Order is not significant. A `file` feed URL is read from disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FeedUnavailable`] if the feed cannot be read or
    /// parsed, or does not answer within the client's timeout
    pub async fn fetch_all(&self) -> Result<Vec<Descriptor>> {
        let snapshot = tokio::time::timeout(self.timeout, self.fetch_snapshot())
            .await
            .map_err(|_| {
                Error::FeedUnavailable(format!(
                    "{}: no response within {:?}",
                    self.feed_url, self.timeout
                ))
            })?
            .map_err(|e| Error::FeedUnavailable(format!("{}: {e}", self.feed_url)))?;

        tracing::debug!(feed = %self.feed_url, plugins = snapshot.items.len(), "fetched feed");
        Ok(snapshot.items)
    }

    async fn fetch_snapshot(&self) -> Result<FeedSnapshot> {
        if self.feed_url.scheme() == "file" {
            let path = self
                .feed_url
                .to_file_path()
                .map_err(|()| Error::Config("feed url is not a local path".to_string()))?;
            let body = tokio::fs::read_to_string(path).await?;
            return Ok(serde_json::from_str(&body)?);
        }

        let snapshot = self
            .client
            .get(self.feed_url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn read_file_feed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feed.json");
        std::fs::write(
            &path,
            r#"{"items":[{"name":"calc","version":"1.0.0","link":"https://x/calc.rhai"}]}"#,
        )
        .unwrap();

        let client = FeedClient::new(Url::from_file_path(&path).unwrap(), reqwest::Client::new());
        let items = client.fetch_all().await.unwrap();
        assert_eq!(items, vec![Descriptor::new("calc", "1.0.0", "https://x/calc.rhai")]);
    }

    #[tokio::test]
    async fn unreadable_feed_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");

        let client = FeedClient::new(Url::from_file_path(&path).unwrap(), reqwest::Client::new());
        assert!(matches!(client.fetch_all().await, Err(Error::FeedUnavailable(_))));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(client.fetch_all().await, Err(Error::FeedUnavailable(_))));
    }

    #[tokio::test]
    async fn stalled_feed_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"items":[]}"#)
                    .set_delay(Duration::from_secs(120)),
            )
            .mount(&server)
            .await;

        let feed_url = Url::parse(&format!("{}/feed", server.uri())).unwrap();
        let client = FeedClient::new(feed_url, reqwest::Client::new())
            .with_timeout(Duration::from_millis(200));

        let result = tokio::time::timeout(Duration::from_secs(5), client.fetch_all()).await;
        assert!(matches!(result, Ok(Err(Error::FeedUnavailable(_)))));
    }

    #[tokio::test]
    async fn http_feed_is_decoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"items":[{"name":"calc","version":"1.0.0","link":"https://x/calc.rhai"}]}"#,
            ))
            .mount(&server)
            .await;

        let feed_url = Url::parse(&format!("{}/feed", server.uri())).unwrap();
        let items = FeedClient::new(feed_url, reqwest::Client::new())
            .fetch_all()
            .await
            .unwrap();
        assert_eq!(items, vec![Descriptor::new("calc", "1.0.0", "https://x/calc.rhai")]);
    }
}
