//! Broadcast engine
//!
//! Serializes outbound state and pushes it onto per-connection outbound
//! queues. Enqueueing never waits: each connection has its own writer task
//! draining its queue to the socket, so one slow client cannot hold up
//! delivery to the rest.

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, warn};

use super::registry::{Connection, Registry};
use crate::server::ServerMessage;

/// Errors that can occur when handing a frame to a connection
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("connection closed")]
    Closed,

    #[error("outbound queue full")]
    Full,
}

/// Send-capable reference to one client's outbound queue
#[derive(Debug, Clone)]
pub struct ClientHandle {
    tx: mpsc::Sender<Message>,
}

impl ClientHandle {
    /// Wrap the sending half of a connection's outbound queue
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self { tx }
    }

    /// Create a handle together with the receiver its writer task drains
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Whether the receiving side has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Enqueue a raw WebSocket frame without waiting
    pub fn push(&self, frame: Message) -> Result<(), DeliveryError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Enqueue a serialized payload as a text frame
    pub fn send_text(&self, payload: impl Into<String>) -> Result<(), DeliveryError> {
        self.push(Message::Text(payload.into()))
    }
}

fn encode(message: &ServerMessage) -> Option<String> {
    match message.to_json() {
        Ok(json) => Some(json),
        Err(e) => {
            error!("Failed to serialize outbound message: {}", e);
            None
        }
    }
}

fn deliver(connection: &Connection, payload: &str) {
    if !connection.is_alive() {
        debug!("Skipping closed connection {}", connection.id);
        return;
    }

    match connection.handle.send_text(payload) {
        Ok(()) => {}
        Err(DeliveryError::Closed) => {
            debug!("Connection {} already closed, dropping frame", connection.id);
        }
        Err(DeliveryError::Full) => {
            warn!(
                "Connection {} outbound queue full, dropping frame",
                connection.id
            );
        }
    }
}

/// Send a message to one connection only
///
/// Delivery failures are logged and swallowed; the transport reports the
/// disconnect on its own.
pub fn send_to(connection: &Connection, message: &ServerMessage) {
    if let Some(payload) = encode(message) {
        deliver(connection, &payload);
    }
}

/// Send a message to every registered connection
pub fn broadcast(registry: &Registry, message: &ServerMessage) {
    let Some(payload) = encode(message) else {
        return;
    };

    for connection in registry.all() {
        deliver(connection, &payload);
    }
}

/// Build the roster from the registry
pub fn roster_message(registry: &Registry) -> ServerMessage {
    ServerMessage::user_list(registry.roster())
}

/// Push the current roster to every registered connection
pub fn broadcast_roster(registry: &Registry) {
    broadcast(registry, &roster_message(registry));
}

/// Fan a chat message out to every registered connection
pub fn broadcast_message(registry: &Registry, chat: &ServerMessage) {
    broadcast(registry, chat);
}
