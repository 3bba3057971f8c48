//! Identity assigner
//!
//! Issues connection ids and deconflicts display names. Both counters are
//! process-scoped: they live as long as the relay and are only reset by a
//! restart.

use std::time::{SystemTime, UNIX_EPOCH};

use super::registry::Registry;
use super::ConnectionId;

/// Result of resolving a requested display name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedName {
    /// The name that will be committed
    pub name: String,
    /// Whether it differs from the requested name
    pub changed: bool,
}

/// Issues ids and unique display names
#[derive(Debug)]
pub struct IdentityAssigner {
    next_id: ConnectionId,
    next_suffix: u64,
}

impl IdentityAssigner {
    /// Seed ids from the current wall-clock time in milliseconds
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .and_then(|elapsed| ConnectionId::try_from(elapsed.as_millis()).ok())
            .unwrap_or_default();
        Self::starting_at(seed)
    }

    /// Start issuing ids at `first_id`
    pub fn starting_at(first_id: ConnectionId) -> Self {
        Self {
            next_id: first_id,
            next_suffix: 1,
        }
    }

    /// Issue the next connection id
    pub fn next_id(&mut self) -> ConnectionId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Find a display name no live connection currently holds
    ///
    /// A taken name gets the process-wide suffix counter appended, and the
    /// counter advances on every attempt until a free candidate turns up.
    /// The requester's own current name counts as taken.
    pub fn resolve_unique_name(&mut self, requested: &str, registry: &Registry) -> ResolvedName {
        let mut candidate = requested.to_string();
        let mut changed = false;

        while !registry.is_name_unique(&candidate) {
            candidate = format!("{}{}", requested, self.next_suffix);
            self.next_suffix += 1;
            changed = true;
        }

        ResolvedName {
            name: candidate,
            changed,
        }
    }
}

impl Default for IdentityAssigner {
    fn default() -> Self {
        Self::new()
    }
}
