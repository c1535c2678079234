//! Fan-out of server events to connected clients.
//!
//! Each connection owns a bounded outbound queue drained by its WebSocket
//! writer task. An event is encoded once per fan-out and the frame is shared
//! between recipients. Every push is independent: a full or closed queue
//! drops the frame for that recipient only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Utf8Bytes;

use crate::protocol::ServerEvent;
use crate::registry::ConnectionId;

/// An encoded text frame ready for the wire. Clones share one buffer.
pub type Frame = Utf8Bytes;

/// Sending half of a connection's outbound queue.
pub type Outbox = mpsc::Sender<Frame>;

/// Where relay components deliver events.
///
/// The hub implements this with [`ConnectionTable`]; tests substitute a
/// recorder so the relays can be exercised without a transport.
pub trait Outbound {
    /// Deliver to one connection. Returns `false` if it was not delivered.
    fn send(&mut self, to: ConnectionId, event: &ServerEvent) -> bool;

    /// Deliver to every recipient. Returns how many accepted the event.
    fn broadcast(&mut self, recipients: &[ConnectionId], event: &ServerEvent) -> usize {
        let mut delivered = 0;
        for to in recipients {
            if self.send(*to, event) {
                delivered += 1;
            }
        }
        delivered
    }
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_connections: u64,
}

/// Counters shared between the hub and whoever reports on it.
#[derive(Debug, Default)]
pub struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
    active_connections: AtomicU64,
}

impl AtomicBroadcastStats {
    pub fn snapshot(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
        }
    }
}

/// Outbound queues of every live connection.
pub struct ConnectionTable {
    outboxes: HashMap<ConnectionId, Outbox>,
    stats: Arc<AtomicBroadcastStats>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self {
            outboxes: HashMap::new(),
            stats: Arc::new(AtomicBroadcastStats::default()),
        }
    }

    pub fn register(&mut self, connection_id: ConnectionId, outbox: Outbox) {
        if self.outboxes.insert(connection_id, outbox).is_none() {
            self.stats.active_connections.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn unregister(&mut self, connection_id: &ConnectionId) -> bool {
        let removed = self.outboxes.remove(connection_id).is_some();
        if removed {
            self.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
        }
        removed
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.outboxes.contains_key(connection_id)
    }

    pub fn len(&self) -> usize {
        self.outboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outboxes.is_empty()
    }

    pub fn stats(&self) -> BroadcastStats {
        self.stats.snapshot()
    }

    /// Shared handle to the counters.
    pub fn stats_handle(&self) -> Arc<AtomicBroadcastStats> {
        self.stats.clone()
    }

    fn push(&self, to: ConnectionId, frame: &Frame) -> bool {
        let delivered = match self.outboxes.get(&to) {
            Some(outbox) => match outbox.try_send(frame.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::warn!("Outbound queue full for {to}, dropping frame");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    log::debug!("Outbound queue closed for {to}, dropping frame");
                    false
                }
            },
            None => false,
        };

        if delivered {
            self.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
        }
        delivered
    }

    fn encode(event: &ServerEvent) -> Option<Frame> {
        match event.encode() {
            Ok(text) => Some(Frame::from(text)),
            Err(e) => {
                log::error!("Failed to encode {}: {e}", event.name());
                None
            }
        }
    }
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Outbound for ConnectionTable {
    fn send(&mut self, to: ConnectionId, event: &ServerEvent) -> bool {
        match Self::encode(event) {
            Some(frame) => self.push(to, &frame),
            None => false,
        }
    }

    fn broadcast(&mut self, recipients: &[ConnectionId], event: &ServerEvent) -> usize {
        if recipients.is_empty() {
            return 0;
        }
        let Some(frame) = Self::encode(event) else {
            return 0;
        };
        recipients.iter().filter(|to| self.push(**to, &frame)).count()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashSet;

    use super::*;

    /// Records deliveries instead of sending them.
    #[derive(Debug, Default)]
    pub struct Recorder {
        pub sent: Vec<(ConnectionId, ServerEvent)>,
        /// Connections whose sends fail.
        pub dead: HashSet<ConnectionId>,
    }

    impl Recorder {
        /// Events delivered to `connection_id`, in order.
        pub fn to(&self, connection_id: ConnectionId) -> Vec<&ServerEvent> {
            self.sent
                .iter()
                .filter(|(to, _)| *to == connection_id)
                .map(|(_, event)| event)
                .collect()
        }

        pub fn clear(&mut self) {
            self.sent.clear();
        }
    }

    impl Outbound for Recorder {
        fn send(&mut self, to: ConnectionId, event: &ServerEvent) -> bool {
            if self.dead.contains(&to) {
                return false;
            }
            self.sent.push((to, event.clone()));
            true
        }
    }
}
