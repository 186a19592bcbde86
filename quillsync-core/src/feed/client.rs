//! Websocket client for the server-pushed change feed.
//!
//! One logical connection per open document. The connection is maintained
//! transparently: on any failure the client reconnects with exponential
//! backoff plus jitter and re-subscribes. Callers never see connection
//! errors — a dropped connection simply pauses event delivery until the feed
//! is re-established.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::FeedError;
use crate::models::DocumentId;

use super::protocol::{ChangeEvent, FeedMessage};

/// First reconnect delay after a dropped connection.
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(500);
/// Reconnect delay ceiling.
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
/// Buffered events per subscription before backpressure.
const EVENT_BUFFER: usize = 64;

/// Client for subscribing to document change feeds.
#[derive(Debug, Clone)]
pub struct ChangeFeedClient {
    server_url: String,
    api_key: String,
}

impl ChangeFeedClient {
    pub fn new(server_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Opens a feed subscription for one document.
    ///
    /// Events arrive in FIFO order per subscription; delivery is
    /// at-least-once across reconnects.
    pub fn subscribe(&self, document_id: DocumentId) -> FeedSubscription {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let url = self.build_feed_url();

        tokio::spawn(run_subscription(url, document_id, events_tx, shutdown_rx));

        FeedSubscription {
            document_id,
            events: events_rx,
            shutdown: shutdown_tx,
        }
    }

    /// Builds the websocket URL for the feed endpoint.
    fn build_feed_url(&self) -> String {
        let base_url = if self.server_url.starts_with("http://") {
            self.server_url.replace("http://", "ws://")
        } else if self.server_url.starts_with("https://") {
            self.server_url.replace("https://", "wss://")
        } else if !self.server_url.starts_with("ws://") && !self.server_url.starts_with("wss://") {
            format!("ws://{}", self.server_url)
        } else {
            self.server_url.clone()
        };

        format!(
            "{}/feed?key={}",
            base_url.trim_end_matches('/'),
            self.api_key
        )
    }
}

/// A live subscription to one document's change feed.
pub struct FeedSubscription {
    document_id: DocumentId,
    events: mpsc::Receiver<ChangeEvent>,
    shutdown: watch::Sender<bool>,
}

impl FeedSubscription {
    /// Wraps an existing event channel. The connection-owning side watches
    /// `shutdown` for teardown.
    pub fn new(
        document_id: DocumentId,
        events: mpsc::Receiver<ChangeEvent>,
        shutdown: watch::Sender<bool>,
    ) -> Self {
        Self {
            document_id,
            events,
            shutdown,
        }
    }

    /// A subscription fed directly from the returned sender, with no
    /// connection behind it. Used to drive sessions in-process.
    pub fn loopback(document_id: DocumentId) -> (mpsc::Sender<ChangeEvent>, Self) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);
        (
            events_tx,
            Self::new(document_id, events_rx, shutdown_tx),
        )
    }

    pub fn document_id(&self) -> DocumentId {
        self.document_id
    }

    /// Next event, or `None` once the subscription has ended.
    pub async fn next_event(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    /// Releases the connection. Idempotent; safe to call any number of
    /// times.
    pub fn unsubscribe(&mut self) {
        let _ = self.shutdown.send(true);
        self.events.close();
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Adds random jitter so reconnecting clients don't stampede the server.
fn jittered(base: Duration) -> Duration {
    use rand::Rng;
    let extra = rand::rng().random_range(0..=base.as_millis().max(1) as u64 / 2);
    base + Duration::from_millis(extra)
}

/// Connection loop: connect, stream events, reconnect on failure until shut
/// down or the subscriber goes away.
async fn run_subscription(
    url: String,
    document_id: DocumentId,
    events: mpsc::Sender<ChangeEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut delay = INITIAL_RECONNECT_DELAY;

    loop {
        if *shutdown.borrow() {
            return;
        }

        match connect_and_stream(&url, document_id, &events, &mut shutdown, &mut delay).await {
            Ok(()) => return,
            Err(e) => {
                tracing::debug!("feed connection for {} lost: {}", document_id, e);
            }
        }

        let wait = jittered(delay);
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
        delay = (delay * 2).min(MAX_RECONNECT_DELAY);
    }
}

/// One connection attempt. `Ok(())` means a clean shutdown; any `Err` asks
/// the caller to reconnect.
async fn connect_and_stream(
    url: &str,
    document_id: DocumentId,
    events: &mpsc::Sender<ChangeEvent>,
    shutdown: &mut watch::Receiver<bool>,
    delay: &mut Duration,
) -> Result<(), FeedError> {
    let (ws_stream, _) = connect_async(url)
        .await
        .map_err(|e| FeedError::Connection(e.to_string()))?;
    let (mut sender, mut receiver) = ws_stream.split();

    // Connection is up again; start the backoff ladder over.
    *delay = INITIAL_RECONNECT_DELAY;

    let subscribe = FeedMessage::Subscribe {
        document_id: document_id.to_string(),
    };
    sender
        .send(Message::Binary(subscribe.encode()?.into()))
        .await
        .map_err(|e| FeedError::WebSocket(e.to_string()))?;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let unsubscribe = FeedMessage::Unsubscribe {
                        document_id: document_id.to_string(),
                    };
                    if let Ok(encoded) = unsubscribe.encode() {
                        let _ = sender.send(Message::Binary(encoded.into())).await;
                    }
                    let _ = sender.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let message = FeedMessage::decode(&data)?;
                        match message {
                            FeedMessage::Event { .. } => {
                                let event = ChangeEvent::from_message(&message)?;
                                if event.document_id != document_id {
                                    continue;
                                }
                                if events.send(event).await.is_err() {
                                    // Subscriber went away.
                                    return Ok(());
                                }
                            }
                            FeedMessage::Error { message } => {
                                tracing::warn!("feed server error: {}", message);
                            }
                            _ => {}
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        sender
                            .send(Message::Pong(data))
                            .await
                            .map_err(|e| FeedError::WebSocket(e.to_string()))?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(FeedError::Connection("server closed connection".into()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(FeedError::WebSocket(e.to_string()));
                    }
                }
            }
        }
    }
}
