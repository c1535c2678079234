//! Presence coordinator: join, leave and disconnect.
//!
//! ## Flow
//!
//! ```text
//! join-document ──► Presence::join ──► registry.upsert
//!                                    ├─► user-joined  → other members (full list)
//!                                    └─► active-users → joiner (full list)
//!
//! leave-document ─► Presence::leave ─► registry.remove ─► user-left → remaining
//! transport close ► Presence::disconnect (every session containing the connection)
//! ```
//!
//! The coordinator borrows the registry and the outbound sink for one
//! event; it holds no state of its own.

use crate::broadcast::Outbound;
use crate::protocol::{ActiveUsers, ServerEvent, UserJoined, UserLeft, DEFAULT_USER_NAME};
use crate::registry::{random_color, ConnectionId, DocumentId, Participant, SessionRegistry};

/// Identity fields a client supplies on join. All optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinProfile {
    pub user_id: Option<String>,
    pub display_name: Option<String>,
    pub color: Option<String>,
}

/// Result of a join attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// First join of this connection to the document.
    Joined(Participant),
    /// The connection was already a member; its entry was overwritten.
    Rejoined(Participant),
    /// The session is at its participant cap.
    SessionFull,
}

pub struct Presence<'a, O: Outbound> {
    registry: &'a mut SessionRegistry,
    out: &'a mut O,
}

impl<'a, O: Outbound> Presence<'a, O> {
    pub fn new(registry: &'a mut SessionRegistry, out: &'a mut O) -> Self {
        Self { registry, out }
    }

    /// Add (or overwrite) `connection_id` in `document_id`'s session.
    ///
    /// Other members receive `user-joined`, the joiner receives
    /// `active-users`; both carry the full participant list.
    pub fn join(
        &mut self,
        connection_id: ConnectionId,
        document_id: &DocumentId,
        profile: JoinProfile,
    ) -> JoinOutcome {
        if !self.registry.admits(document_id, &connection_id) {
            log::warn!("Session {document_id} is full, refusing join from {connection_id}");
            return JoinOutcome::SessionFull;
        }

        // A rejoin without a colour keeps the one already assigned.
        let existing_color = self
            .registry
            .participant(document_id, &connection_id)
            .map(|p| p.color.clone());
        let color = non_empty(profile.color)
            .or(existing_color)
            .unwrap_or_else(random_color);

        let participant = Participant {
            connection_id,
            user_id: non_empty(profile.user_id).unwrap_or_else(|| connection_id.to_string()),
            display_name: non_empty(profile.display_name)
                .unwrap_or_else(|| DEFAULT_USER_NAME.to_string()),
            color,
            is_typing: false,
        };

        let previous = self.registry.upsert(document_id.clone(), participant.clone());
        let users = self.registry.participants(document_id);
        let others = self.registry.recipients(document_id, &connection_id);

        log::info!(
            "{} ({}) joined {document_id} via {connection_id}, {} present",
            participant.display_name,
            participant.user_id,
            users.len()
        );

        let joined = ServerEvent::UserJoined(UserJoined {
            user_id: participant.user_id.clone(),
            user_name: participant.display_name.clone(),
            user_color: participant.color.clone(),
            users: users.clone(),
        });
        self.out.broadcast(&others, &joined);
        self.out
            .send(connection_id, &ServerEvent::ActiveUsers(ActiveUsers { users }));

        match previous {
            Some(_) => JoinOutcome::Rejoined(participant),
            None => JoinOutcome::Joined(participant),
        }
    }

    /// Remove `connection_id` from `document_id` and notify the remaining
    /// members. A no-op if it was not a member.
    pub fn leave(
        &mut self,
        connection_id: ConnectionId,
        document_id: &DocumentId,
        claimed_user_id: Option<&str>,
    ) -> Option<Participant> {
        let Some(removed) = self.registry.remove(document_id, &connection_id) else {
            log::debug!(
                "Ignoring leave of {document_id} from non-member {connection_id} (user {:?})",
                claimed_user_id
            );
            return None;
        };

        log::info!(
            "{} ({}) left {document_id} via {connection_id}",
            removed.display_name,
            removed.user_id
        );
        self.announce_departure(document_id, &removed);
        Some(removed)
    }

    /// Remove `connection_id` from every session it belongs to.
    ///
    /// Returns the documents it was removed from. Sessions it already left
    /// are skipped silently.
    pub fn disconnect(&mut self, connection_id: ConnectionId) -> Vec<DocumentId> {
        let documents = self.registry.documents_of(&connection_id);
        for document_id in &documents {
            if let Some(removed) = self.registry.remove(document_id, &connection_id) {
                self.announce_departure(document_id, &removed);
            }
        }

        if !documents.is_empty() {
            log::info!(
                "Connection {connection_id} dropped from {} session(s)",
                documents.len()
            );
        }
        documents
    }

    fn announce_departure(&mut self, document_id: &DocumentId, removed: &Participant) {
        let remaining = self.registry.recipients(document_id, &removed.connection_id);
        let left = ServerEvent::UserLeft(UserLeft {
            user_id: removed.user_id.clone(),
            user_name: removed.display_name.clone(),
            users: self.registry.participants(document_id),
        });
        self.out.broadcast(&remaining, &left);
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}
