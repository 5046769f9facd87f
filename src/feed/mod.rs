//! Manifest feed access
//!
//! The feed is read in full on demand; a push channel derived from the feed
//! address announces changes that trigger a fresh read and reconciliation.

pub mod client;
pub mod watch;

use url::Url;

pub use client::FeedClient;
pub use watch::{Watcher, sync_once};

use crate::{Error, Result};

/// Change channel address for a feed: `http` to `ws`, `https` to `wss`
///
/// # Errors
///
/// Returns error if the feed URL is not `http`/`https`
pub fn channel_url_for(feed_url: &Url) -> Result<Url> {
    let scheme = match feed_url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(Error::Config(format!(
                "cannot derive a change channel from {other:?} feed url"
            )));
        }
    };

    let mut channel = feed_url.clone();
    channel
        .set_scheme(scheme)
        .map_err(|()| Error::Config(format!("cannot derive a change channel from {feed_url}")))?;
    Ok(channel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_channel_url() {
        let https = Url::parse("https://feed.example.com/api/v1/pilet/demo?x=1").unwrap();
        assert_eq!(
            channel_url_for(&https).unwrap().as_str(),
            "wss://feed.example.com/api/v1/pilet/demo?x=1"
        );

        let http = Url::parse("http://localhost:9000/feed").unwrap();
        assert_eq!(channel_url_for(&http).unwrap().as_str(), "ws://localhost:9000/feed");
    }

    #[test]
    fn reject_other_schemes() {
        let file = Url::parse("file:///tmp/feed.json").unwrap();
        assert!(matches!(channel_url_for(&file), Err(Error::Config(_))));
    }
}
