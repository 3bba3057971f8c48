//! WebSocket server module
//!
//! Accepts chat clients over WebSocket and defines the JSON protocol they
//! speak with the relay.

#[allow(dead_code)]
mod protocol;
mod websocket;

pub use protocol::*;
pub use websocket::*;
