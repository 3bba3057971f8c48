//! Connection registry
//!
//! The authoritative set of live connections. Entries keep their
//! registration order, which is also the order rosters are published in.

use std::collections::HashMap;

use super::broadcast::ClientHandle;
use super::ConnectionId;

/// One live client session
#[derive(Debug, Clone)]
pub struct Connection {
    /// Process-unique id, fixed at registration
    pub id: ConnectionId,
    /// Outbound queue for this client only
    pub handle: ClientHandle,
    /// Display name, unset until the naming handshake completes
    pub display_name: Option<String>,
}

impl Connection {
    /// Whether the client's outbound side is still open
    pub fn is_alive(&self) -> bool {
        !self.handle.is_closed()
    }
}

/// Registry of live connections
#[derive(Debug, Default)]
pub struct Registry {
    connections: HashMap<ConnectionId, Connection>,
    order: Vec<ConnectionId>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connections are registered
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Add an unnamed connection under `id`
    ///
    /// Ids come from the identity assigner and are never reused, so an
    /// existing entry is never overwritten.
    pub fn register(&mut self, id: ConnectionId, handle: ClientHandle) -> &Connection {
        debug_assert!(!self.connections.contains_key(&id), "id {id} reused");
        self.order.push(id);
        self.connections.entry(id).or_insert(Connection {
            id,
            handle,
            display_name: None,
        })
    }

    /// Remove the entry for `id`; unknown ids are ignored
    pub fn deregister(&mut self, id: ConnectionId) -> Option<Connection> {
        let removed = self.connections.remove(&id)?;
        self.order.retain(|entry| *entry != id);
        Some(removed)
    }

    /// Look up a connection by id
    pub fn find(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Commit a display name; returns false when `id` is not registered
    pub fn set_name(&mut self, id: ConnectionId, name: String) -> bool {
        match self.connections.get_mut(&id) {
            Some(connection) => {
                connection.display_name = Some(name);
                true
            }
            None => false,
        }
    }

    /// Current entries in registration order
    pub fn all(&self) -> impl Iterator<Item = &Connection> + '_ {
        self.order
            .iter()
            .filter_map(move |id| self.connections.get(id))
    }

    /// Display names of named connections, in registration order
    pub fn roster(&self) -> Vec<String> {
        self.all()
            .filter_map(|connection| connection.display_name.clone())
            .collect()
    }

    /// True iff no registered connection currently holds `candidate`
    pub fn is_name_unique(&self, candidate: &str) -> bool {
        self.all()
            .all(|connection| connection.display_name.as_deref() != Some(candidate))
    }
}
