//! Change channel subscription and reconciliation
//!
//! Two tasks cooperate: the channel task holds the `WebSocket` open and turns
//! change messages into triggers, and the reconciler task consumes triggers
//! one at a time. The trigger queue holds a single entry, so notifications
//! arriving while a reconcile is already pending collapse into it.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::FeedClient;
use crate::Result;
use crate::plugins::{ChangeKind, ChangeNotification, PluginRegistry, ReconcileReport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// First reconnect delay
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Reconnect delay cap
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Why a reconcile was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Change(ChangeKind),
    Reconnected,
}

/// Fetch the feed once and reconcile the registry onto it
///
/// # Errors
///
/// Returns [`crate::Error::FeedUnavailable`] if the feed cannot be read; the
/// registry is left untouched in that case
pub async fn sync_once(feed: &FeedClient, registry: &PluginRegistry) -> Result<ReconcileReport> {
    let descriptors = feed.fetch_all().await?;
    let report = registry.reconcile(&descriptors).await;

    if report.is_empty() {
        tracing::debug!("plugins already up to date");
    } else {
        tracing::info!(
            installed = report.installed.len(),
            updated = report.updated.len(),
            removed = report.removed.len(),
            "reconciled plugins"
        );
    }
    Ok(report)
}

/// Keeps the registry in sync with the feed's change channel
#[derive(Debug)]
pub struct Watcher {
    feed: FeedClient,
    channel_url: Url,
    registry: Arc<PluginRegistry>,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Watcher {
    /// Create a watcher for `channel_url`
    #[must_use]
    pub const fn new(feed: FeedClient, channel_url: Url, registry: Arc<PluginRegistry>) -> Self {
        Self {
            feed,
            channel_url,
            registry,
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
        }
    }

    /// Override the reconnect backoff bounds
    #[must_use]
    pub const fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Start the channel and reconciler tasks
    ///
    /// Both stop once `cancel` fires; the returned handle completes after.
    #[must_use]
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        let (tx, rx) = mpsc::channel(1);
        let reconciler = tokio::spawn(reconcile_loop(
            self.feed.clone(),
            Arc::clone(&self.registry),
            rx,
            cancel.clone(),
        ));

        tokio::spawn(async move {
            self.channel_loop(tx, cancel).await;
            if let Err(e) = reconciler.await {
                tracing::error!(error = %e, "reconciler task failed");
            }
        })
    }

    async fn channel_loop(self, tx: mpsc::Sender<Trigger>, cancel: CancellationToken) {
        let mut backoff = self.initial_backoff;
        let mut connected_before = false;

        loop {
            let attempt = tokio::select! {
                () = cancel.cancelled() => return,
                attempt = connect_async(self.channel_url.as_str()) => attempt,
            };

            match attempt {
                Ok((stream, _response)) => {
                    tracing::info!(channel = %self.channel_url, "change channel connected");
                    backoff = self.initial_backoff;
                    if connected_before {
                        // Catch up on anything published while disconnected
                        notify(&tx, Trigger::Reconnected);
                    }
                    connected_before = true;

                    if read_channel(stream, &tx, &cancel).await {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        channel = %self.channel_url,
                        error = %e,
                        retry_in = ?backoff,
                        "change channel connect failed"
                    );
                }
            }

            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(backoff) => {}
            }
            backoff = next_backoff(backoff, self.max_backoff);
        }
    }
}

/// Read messages until the channel drops; returns `true` when cancelled
async fn read_channel(
    mut stream: WsStream,
    tx: &mpsc::Sender<Trigger>,
    cancel: &CancellationToken,
) -> bool {
    loop {
        let message = tokio::select! {
            () = cancel.cancelled() => {
                let _ = stream.close(None).await;
                return true;
            }
            message = stream.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => match ChangeNotification::parse(&text) {
                Some(notification) => {
                    tracing::debug!(kind = ?notification.kind, "change notification");
                    notify(tx, Trigger::Change(notification.kind));
                }
                None => tracing::trace!("ignored channel message"),
            },
            Some(Ok(Message::Close(_))) | None => {
                tracing::warn!("change channel closed");
                return false;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(error = %e, "change channel read failed");
                return false;
            }
        }
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

fn notify(tx: &mpsc::Sender<Trigger>, trigger: Trigger) {
    match tx.try_send(trigger) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => tracing::trace!(?trigger, "reconcile already pending"),
        Err(TrySendError::Closed(_)) => tracing::debug!("reconciler stopped"),
    }
}

async fn reconcile_loop(
    feed: FeedClient,
    registry: Arc<PluginRegistry>,
    mut rx: mpsc::Receiver<Trigger>,
    cancel: CancellationToken,
) {
    loop {
        let trigger = tokio::select! {
            () = cancel.cancelled() => break,
            trigger = rx.recv() => match trigger {
                Some(trigger) => trigger,
                None => break,
            },
        };

        tracing::debug!(?trigger, "reconciling");
        if let Err(e) = sync_once(&feed, &registry).await {
            tracing::warn!(error = %e, "reconcile skipped");
        }
    }
}
