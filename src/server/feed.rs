//! Change-feed hub and websocket bridge.
//!
//! HTTP mutation handlers publish row events into per-document broadcast
//! channels; each websocket connection bridges the channels of the documents
//! it subscribed to onto the socket. Clients in the same document see each
//! other's saves in real time.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;

use quillsync_core::feed::ChangeEvent;
use quillsync_core::{Collaborator, Document, DocumentId, FeedMessage};

/// Buffered events per document channel before slow subscribers lag.
const CHANNEL_BUFFER: usize = 16;
/// Outgoing messages buffered per socket.
const SOCKET_BUFFER: usize = 64;

/// Tracks all live feed channels for broadcasting updates.
pub struct FeedHub {
    /// Broadcast channels keyed by document id.
    channels: RwLock<HashMap<DocumentId, broadcast::Sender<FeedMessage>>>,
}

impl FeedHub {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribes to events for one document.
    pub async fn subscribe(&self, document_id: DocumentId) -> broadcast::Receiver<FeedMessage> {
        let mut channels = self.channels.write().await;

        if let Some(sender) = channels.get(&document_id) {
            sender.subscribe()
        } else {
            let (sender, receiver) = broadcast::channel(CHANNEL_BUFFER);
            channels.insert(document_id, sender);
            receiver
        }
    }

    async fn publish(&self, document_id: DocumentId, message: FeedMessage) {
        let channels = self.channels.read().await;
        if let Some(sender) = channels.get(&document_id) {
            // Ignore send errors (no subscribers).
            let _ = sender.send(message);
        }
    }

    /// Announces a created or updated document row.
    pub async fn publish_document_updated(&self, doc: &Document) {
        match ChangeEvent::document_updated(doc) {
            Ok(message) => self.publish(doc.id, message).await,
            Err(e) => tracing::warn!("failed to encode document event for {}: {}", doc.id, e),
        }
    }

    /// Announces a deleted document.
    pub async fn publish_document_deleted(&self, document_id: DocumentId) {
        self.publish(document_id, ChangeEvent::document_deleted(document_id))
            .await;
    }

    /// Announces a collaborator upsert.
    pub async fn publish_collaborator(&self, row: &Collaborator) {
        match ChangeEvent::collaborator_upserted(row) {
            Ok(message) => self.publish(row.document_id, message).await,
            Err(e) => {
                tracing::warn!(
                    "failed to encode collaborator event for {}: {}",
                    row.document_id,
                    e
                )
            }
        }
    }
}

impl Default for FeedHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs one feed websocket until the client disconnects.
///
/// A connection can hold subscriptions for several documents; each is
/// bridged by its own forwarding task into one outgoing queue so events stay
/// FIFO per subscription.
pub async fn serve_feed_socket(mut socket: WebSocket, hub: Arc<FeedHub>) {
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<FeedMessage>(SOCKET_BUFFER);
    let mut forwards: HashMap<DocumentId, JoinHandle<()>> = HashMap::new();

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Binary(data))) => {
                        match FeedMessage::decode(&data) {
                            Ok(FeedMessage::Subscribe { document_id }) => {
                                let Ok(id) = document_id.parse::<DocumentId>() else {
                                    let error = FeedMessage::Error {
                                        message: format!("bad document id: {}", document_id),
                                    };
                                    send_message(&mut socket, &error).await;
                                    continue;
                                };
                                if forwards.contains_key(&id) {
                                    continue;
                                }
                                let receiver = hub.subscribe(id).await;
                                forwards.insert(id, spawn_forward(receiver, outgoing_tx.clone()));
                            }
                            Ok(FeedMessage::Unsubscribe { document_id }) => {
                                // Idempotent: unknown subscriptions are a no-op.
                                if let Ok(id) = document_id.parse::<DocumentId>() {
                                    if let Some(handle) = forwards.remove(&id) {
                                        handle.abort();
                                    }
                                }
                            }
                            Ok(_) => {}
                            Err(e) => {
                                let error = FeedMessage::Error {
                                    message: format!("bad message: {}", e),
                                };
                                send_message(&mut socket, &error).await;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = socket.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!("feed socket error: {}", e);
                        break;
                    }
                }
            }
            Some(message) = outgoing_rx.recv() => {
                match message.encode() {
                    Ok(encoded) => {
                        if socket.send(Message::Binary(encoded.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("failed to encode feed event: {}", e),
                }
            }
        }
    }

    for handle in forwards.into_values() {
        handle.abort();
    }
}

fn spawn_forward(
    mut receiver: broadcast::Receiver<FeedMessage>,
    outgoing: mpsc::Sender<FeedMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(message) => {
                    if outgoing.send(message).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("feed subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn send_message(socket: &mut WebSocket, message: &FeedMessage) {
    if let Ok(encoded) = message.encode() {
        let _ = socket.send(Message::Binary(encoded.into())).await;
    }
}
