//! Connection registry and broadcast relay
//!
//! Tracks live connections, assigns identities, routes inbound frames and
//! fans state out to every participant.
//!
//! All relay state sits behind one lock. Outbound frames are enqueued on
//! per-connection queues while the lock is held; enqueueing never waits on
//! the network, and doing it under the lock keeps every client's view of
//! rosters in the same order the registry changed.

mod broadcast;
mod identity;
mod registry;
mod router;

pub use broadcast::ClientHandle;
pub use identity::IdentityAssigner;
pub use registry::Registry;
pub use router::Routed;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::server::ServerMessage;

/// Process-unique connection identifier
pub type ConnectionId = u64;

struct RelayState {
    registry: Registry,
    identity: IdentityAssigner,
}

/// The shared relay
pub struct Relay {
    state: Mutex<RelayState>,
}

impl Relay {
    /// Create a relay whose ids are seeded from the clock
    pub fn new() -> Self {
        Self::with_identity(IdentityAssigner::new())
    }

    /// Create a relay using a specific identity assigner
    pub fn with_identity(identity: IdentityAssigner) -> Self {
        Self {
            state: Mutex::new(RelayState {
                registry: Registry::new(),
                identity,
            }),
        }
    }

    /// Register a new session and send it its id
    pub async fn connect(&self, handle: ClientHandle) -> ConnectionId {
        let mut state = self.state.lock().await;
        let id = state.identity.next_id();
        let connection = state.registry.register(id, handle);
        broadcast::send_to(connection, &ServerMessage::id(id));

        info!(
            "Connection {} registered ({} active)",
            id,
            state.registry.len()
        );
        id
    }

    /// Route a raw inbound frame from `from`
    pub async fn inbound(&self, from: ConnectionId, raw: &str) -> Routed {
        let mut state = self.state.lock().await;
        let RelayState { registry, identity } = &mut *state;
        let routed = router::route(registry, identity, from, raw);

        if let Routed::Named { name, changed } = &routed {
            info!(
                "Connection {} is now {:?}{}",
                from,
                name,
                if *changed { " (deconflicted)" } else { "" }
            );
        }
        routed
    }

    /// Remove a session and republish the roster
    ///
    /// Returns false when `id` was already gone.
    pub async fn disconnect(&self, id: ConnectionId) -> bool {
        let mut state = self.state.lock().await;
        let Some(removed) = state.registry.deregister(id) else {
            debug!("Ignoring repeated disconnect for {}", id);
            return false;
        };

        broadcast::broadcast_roster(&state.registry);
        if state.registry.is_empty() {
            debug!("Last connection left, room is empty");
        }
        info!(
            "Connection {} ({}) deregistered ({} active)",
            id,
            removed.display_name.as_deref().unwrap_or("unnamed"),
            state.registry.len()
        );
        true
    }

    /// Number of registered connections
    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.registry.len()
    }

    /// Current roster in registration order
    #[cfg(test)]
    pub async fn roster(&self) -> Vec<String> {
        self.state.lock().await.registry.roster()
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}
