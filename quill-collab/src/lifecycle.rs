//! Per-connection lifecycle.
//!
//! ```text
//! Connected(∅) ──join──► Connected({d1..dn}) ──join/leave──┐
//!      │                        │   ▲─────────────────────┘
//!      └────────transport close─┴──► Disconnected (terminal)
//! ```
//!
//! [`ConnectionLifecycle::disconnect`] yields the memberships exactly once,
//! which is what lets the hub run session cleanup exactly once per
//! connection no matter how the transport ended.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use crate::registry::{ConnectionId, DocumentId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Connected { memberships: BTreeSet<DocumentId> },
    Disconnected,
}

#[derive(Debug)]
pub struct ConnectionLifecycle {
    connection_id: ConnectionId,
    state: LinkState,
    connected_at: Instant,
}

impl ConnectionLifecycle {
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            state: LinkState::Connected {
                memberships: BTreeSet::new(),
            },
            connected_at: Instant::now(),
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn state(&self) -> &LinkState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, LinkState::Connected { .. })
    }

    /// Documents joined and not yet left. Empty once disconnected.
    pub fn memberships(&self) -> Vec<DocumentId> {
        match &self.state {
            LinkState::Connected { memberships } => memberships.iter().cloned().collect(),
            LinkState::Disconnected => Vec::new(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Record a join. Ignored after disconnect.
    pub fn joined(&mut self, document_id: DocumentId) -> bool {
        match &mut self.state {
            LinkState::Connected { memberships } => {
                memberships.insert(document_id);
                true
            }
            LinkState::Disconnected => false,
        }
    }

    /// Record a leave. Returns whether it was a member.
    pub fn left(&mut self, document_id: &DocumentId) -> bool {
        match &mut self.state {
            LinkState::Connected { memberships } => memberships.remove(document_id),
            LinkState::Disconnected => false,
        }
    }

    /// Transition to `Disconnected`.
    ///
    /// Returns the memberships held at that moment on the first call and
    /// `None` on every later call.
    pub fn disconnect(&mut self) -> Option<BTreeSet<DocumentId>> {
        match std::mem::replace(&mut self.state, LinkState::Disconnected) {
            LinkState::Connected { memberships } => Some(memberships),
            LinkState::Disconnected => None,
        }
    }
}
