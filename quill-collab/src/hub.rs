//! The relay hub: one task, one queue, all relay state.
//!
//! ```text
//! reader task (conn A) ─┐
//! reader task (conn B) ─┼─► HubCommand queue ─► Hub::handle ─► ConnectionTable ─► writer tasks
//! reader task (conn C) ─┘    (FIFO, bounded)       │
//!                                                  └─ SessionRegistry (owned, unshared)
//! ```
//!
//! Commands are processed one at a time in arrival order, so the registry
//! needs no locking and every sender's events go out in the order it sent
//! them. Per-event handlers live in [`Hub::dispatch`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::broadcast::{AtomicBroadcastStats, BroadcastStats, ConnectionTable, Outbox};
use crate::config::ServerConfig;
use crate::edit::EditRelay;
use crate::error::RelayError;
use crate::lifecycle::ConnectionLifecycle;
use crate::presence::{JoinOutcome, JoinProfile, Presence};
use crate::protocol::{ClientEvent, ParticipantView};
use crate::registry::{ConnectionId, DocumentId, SessionRegistry};
use crate::signal::SignalRelay;

/// Work submitted to the hub.
#[derive(Debug)]
pub enum HubCommand {
    /// A transport connection was accepted.
    Connect {
        connection_id: ConnectionId,
        outbox: Outbox,
    },
    /// A decoded client event.
    Event {
        connection_id: ConnectionId,
        event: ClientEvent,
    },
    /// The transport connection ended, for any reason.
    Disconnect { connection_id: ConnectionId },
    /// Current participant list of a document.
    Participants {
        document_id: DocumentId,
        reply: oneshot::Sender<Vec<ParticipantView>>,
    },
}

/// Owner of the session registry and the connection table.
pub struct Hub {
    registry: SessionRegistry,
    connections: ConnectionTable,
    lifecycles: HashMap<ConnectionId, ConnectionLifecycle>,
    commands: mpsc::Receiver<HubCommand>,
}

impl Hub {
    pub fn new(config: &ServerConfig) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        let connections = ConnectionTable::new();
        let handle = HubHandle {
            commands: tx,
            stats: connections.stats_handle(),
        };
        let hub = Self {
            registry: SessionRegistry::with_max_participants(config.max_peers_per_room),
            connections,
            lifecycles: HashMap::new(),
            commands: rx,
        };
        (hub, handle)
    }

    /// Process commands until every [`HubHandle`] is dropped.
    pub async fn run(mut self) {
        log::debug!("Relay hub started");
        while let Some(command) = self.commands.recv().await {
            self.handle(command);
        }
        log::debug!("Relay hub stopped");
    }

    pub fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Connect {
                connection_id,
                outbox,
            } => self.on_connect(connection_id, outbox),
            HubCommand::Event {
                connection_id,
                event,
            } => self.dispatch(connection_id, event),
            HubCommand::Disconnect { connection_id } => self.on_disconnect(connection_id),
            HubCommand::Participants { document_id, reply } => {
                let _ = reply.send(self.registry.participants(&document_id));
            }
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn connection_count(&self) -> usize {
        self.lifecycles.len()
    }

    fn on_connect(&mut self, connection_id: ConnectionId, outbox: Outbox) {
        self.connections.register(connection_id, outbox);
        self.lifecycles
            .insert(connection_id, ConnectionLifecycle::new(connection_id));
        log::debug!("Connection {connection_id} registered");
    }

    fn on_disconnect(&mut self, connection_id: ConnectionId) {
        let Some(mut lifecycle) = self.lifecycles.remove(&connection_id) else {
            log::debug!("Ignoring disconnect of unknown connection {connection_id}");
            return;
        };
        let Some(memberships) = lifecycle.disconnect() else {
            return;
        };

        let left = Presence::new(&mut self.registry, &mut self.connections).disconnect(connection_id);
        if left.len() != memberships.len() {
            log::debug!(
                "Connection {connection_id} tracked {} membership(s), registry held {}",
                memberships.len(),
                left.len()
            );
        }
        self.connections.unregister(&connection_id);
        log::info!(
            "Connection {connection_id} closed after {:?}",
            lifecycle.uptime()
        );
    }

    /// Route one client event to its handler.
    fn dispatch(&mut self, connection_id: ConnectionId, event: ClientEvent) {
        if !self.lifecycles.contains_key(&connection_id) {
            log::warn!(
                "Dropping {} from unregistered connection {connection_id}",
                event.name()
            );
            return;
        }
        let document_id = match DocumentId::new(event.document_id()) {
            Ok(id) => id,
            Err(e) => {
                log::warn!("Dropping {} from {connection_id}: {e}", event.name());
                return;
            }
        };

        match event {
            ClientEvent::JoinDocument(join) => {
                let profile = JoinProfile {
                    user_id: join.user_id,
                    display_name: join.user_name,
                    color: join.user_color,
                };
                self.on_join(connection_id, document_id, profile);
            }
            ClientEvent::LeaveDocument(leave) => {
                self.on_leave(connection_id, document_id, leave.user_id.as_deref());
            }
            ClientEvent::DocumentChange(change) => {
                EditRelay::new(&self.registry, &mut self.connections).submit_change(
                    connection_id,
                    &document_id,
                    change.content,
                    change.delta,
                    change.user_name,
                );
            }
            ClientEvent::CursorMove(cursor) => {
                SignalRelay::new(&mut self.registry, &mut self.connections).cursor_move(
                    connection_id,
                    &document_id,
                    cursor.range,
                    cursor.user_name,
                    cursor.user_color,
                );
            }
            ClientEvent::TypingStart(typing) => {
                SignalRelay::new(&mut self.registry, &mut self.connections).typing_start(
                    connection_id,
                    &document_id,
                    typing.user_name,
                );
            }
            ClientEvent::TypingStop(_) => {
                SignalRelay::new(&mut self.registry, &mut self.connections)
                    .typing_stop(connection_id, &document_id);
            }
        }
    }

    fn on_join(&mut self, connection_id: ConnectionId, document_id: DocumentId, profile: JoinProfile) {
        let outcome = Presence::new(&mut self.registry, &mut self.connections).join(
            connection_id,
            &document_id,
            profile,
        );
        if matches!(outcome, JoinOutcome::Joined(_) | JoinOutcome::Rejoined(_)) {
            if let Some(lifecycle) = self.lifecycles.get_mut(&connection_id) {
                lifecycle.joined(document_id);
            }
        }
    }

    fn on_leave(&mut self, connection_id: ConnectionId, document_id: DocumentId, user_id: Option<&str>) {
        Presence::new(&mut self.registry, &mut self.connections).leave(connection_id, &document_id, user_id);
        if let Some(lifecycle) = self.lifecycles.get_mut(&connection_id) {
            lifecycle.left(&document_id);
        }
    }
}

/// Cloneable handle for submitting work to a running [`Hub`].
///
/// The command queue is bounded: when the hub falls behind, senders wait,
/// which stalls only the connection that is sending.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
    stats: Arc<AtomicBroadcastStats>,
}

impl HubHandle {
    pub async fn connect(
        &self,
        connection_id: ConnectionId,
        outbox: Outbox,
    ) -> Result<(), RelayError> {
        self.submit_command(HubCommand::Connect {
            connection_id,
            outbox,
        })
        .await
    }

    pub async fn submit(
        &self,
        connection_id: ConnectionId,
        event: ClientEvent,
    ) -> Result<(), RelayError> {
        self.submit_command(HubCommand::Event {
            connection_id,
            event,
        })
        .await
    }

    pub async fn disconnect(&self, connection_id: ConnectionId) -> Result<(), RelayError> {
        self.submit_command(HubCommand::Disconnect { connection_id }).await
    }

    /// Queue a disconnect without waiting, for use from `Drop`.
    ///
    /// Falls back to a spawned send when the queue is full, so the
    /// disconnect still lands after everything this connection submitted.
    pub fn disconnect_now(&self, connection_id: ConnectionId) -> Result<(), RelayError> {
        match self.commands.try_send(HubCommand::Disconnect { connection_id }) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(RelayError::HubStopped),
            Err(mpsc::error::TrySendError::Full(command)) => {
                let runtime = tokio::runtime::Handle::try_current()
                    .map_err(|_| RelayError::HubStopped)?;
                let commands = self.commands.clone();
                runtime.spawn(async move {
                    if commands.send(command).await.is_err() {
                        log::debug!("Hub gone before disconnect of {connection_id}");
                    }
                });
                Ok(())
            }
        }
    }

    /// Ask the hub for a document's current participant list.
    pub async fn participants(
        &self,
        document_id: DocumentId,
    ) -> Result<Vec<ParticipantView>, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.submit_command(HubCommand::Participants { document_id, reply })
            .await?;
        rx.await.map_err(|_| RelayError::HubStopped)
    }

    pub fn stats(&self) -> BroadcastStats {
        self.stats.snapshot()
    }

    async fn submit_command(&self, command: HubCommand) -> Result<(), RelayError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RelayError::HubStopped)
    }
}
