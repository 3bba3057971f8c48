//! Protocol message definitions
//!
//! Defines the JSON messages exchanged between chat clients and the relay.
//! Every message is a single JSON object per WebSocket text frame, tagged by
//! its `type` field.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::relay::ConnectionId;

/// WebSocket subprotocol the browser client asks for
pub const JSON_SUBPROTOCOL: &str = "json";

/// Maximum display name length, in characters
pub const MAX_NAME_LENGTH: usize = 64;

/// Maximum chat text length, in characters
pub const MAX_TEXT_LENGTH: usize = 4096;

// ============================================================================
// Error Types
// ============================================================================

/// Protocol-related errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

// ============================================================================
// Client Messages
// ============================================================================

/// Messages sent from a chat client to the relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Request to set or change the sender's display name
    Username {
        /// Requested display name
        name: String,
        /// Id the client believes it holds (informational)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<ConnectionId>,
        /// Client-side timestamp (informational)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        date: Option<Value>,
    },

    /// Chat text for everyone in the room
    Message {
        /// Message body
        text: String,
        /// Id the client believes it holds (informational)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<ConnectionId>,
        /// Client-side timestamp, echoed on rebroadcast
        #[serde(default, skip_serializing_if = "Option::is_none")]
        date: Option<Value>,
    },
}

impl ClientMessage {
    /// Parse and validate a client message from a raw text frame
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        let message: Self = serde_json::from_str(json)?;
        message.validate()?;
        Ok(message)
    }

    /// Validate message contents
    pub fn validate(&self) -> ProtocolResult<()> {
        match self {
            ClientMessage::Username { name, .. } => {
                if name.trim().is_empty() {
                    return Err(ProtocolError::ValidationError(
                        "name cannot be empty".to_string(),
                    ));
                }
                if name.chars().count() > MAX_NAME_LENGTH {
                    return Err(ProtocolError::ValidationError(format!(
                        "name exceeds maximum length of {} characters",
                        MAX_NAME_LENGTH
                    )));
                }
                Ok(())
            }

            ClientMessage::Message { text, .. } => {
                if text.chars().count() > MAX_TEXT_LENGTH {
                    return Err(ProtocolError::ValidationError(format!(
                        "text exceeds maximum length of {} characters",
                        MAX_TEXT_LENGTH
                    )));
                }
                Ok(())
            }
        }
    }

    /// Create a Username message
    pub fn username(name: impl Into<String>) -> Self {
        ClientMessage::Username {
            name: name.into(),
            id: None,
            date: None,
        }
    }

    /// Create a chat Message
    pub fn message(text: impl Into<String>) -> Self {
        ClientMessage::Message {
            text: text.into(),
            id: None,
            date: None,
        }
    }

    /// Serialize the message to JSON
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// Server Messages
// ============================================================================

/// Messages sent from the relay to chat clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Identity assigned to a freshly accepted connection
    Id {
        /// The connection's id
        id: ConnectionId,
    },

    /// The requested name was taken; this is the name actually assigned
    RejectUsername {
        /// Id of the renamed connection
        id: ConnectionId,
        /// Deconflicted display name
        name: String,
    },

    /// Chat text, stamped with the sender's display name
    Message {
        /// Sender id
        id: ConnectionId,
        /// Sender display name
        name: String,
        /// Sanitized message body
        text: String,
        /// Client-supplied timestamp
        #[serde(default, skip_serializing_if = "Option::is_none")]
        date: Option<Value>,
    },

    /// Current roster in registration order
    UserList {
        /// Display names of every named connection
        users: Vec<String>,
    },
}

impl ServerMessage {
    /// Create an Id message
    pub fn id(id: ConnectionId) -> Self {
        ServerMessage::Id { id }
    }

    /// Create a RejectUsername message
    pub fn reject_username(id: ConnectionId, name: impl Into<String>) -> Self {
        ServerMessage::RejectUsername {
            id,
            name: name.into(),
        }
    }

    /// Create a UserList message
    pub fn user_list(users: Vec<String>) -> Self {
        ServerMessage::UserList { users }
    }

    /// Serialize the message to JSON
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a server message from JSON (primarily for testing)
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

// ============================================================================
// Tests
// ============================================================================
