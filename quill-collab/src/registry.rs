//! Session registry: document id → connected participants.
//!
//! Purely in-memory. A session exists while it has at least one
//! participant; removing the last participant removes the session.

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use rand::seq::IndexedRandom;
use uuid::Uuid;

use crate::protocol::{ParticipantView, ProtocolError};

/// Colours handed out to participants that join without one.
pub const PALETTE: [&str; 6] = [
    "#3b82f6", // blue
    "#8b5cf6", // violet
    "#10b981", // emerald
    "#f59e0b", // amber
    "#ef4444", // red
    "#ec4899", // pink
];

/// Pick a palette colour uniformly at random.
pub fn random_color() -> String {
    PALETTE
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(PALETTE[0])
        .to_string()
}

/// Opaque, client-supplied document identifier. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Result<Self, ProtocolError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ProtocolError::EmptyDocumentId);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one live transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// One connection's presence record within a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub connection_id: ConnectionId,
    pub user_id: String,
    pub display_name: String,
    pub color: String,
    pub is_typing: bool,
}

impl Participant {
    pub fn view(&self) -> ParticipantView {
        ParticipantView {
            socket_id: self.connection_id.to_string(),
            user_id: self.user_id.clone(),
            user_name: self.display_name.clone(),
            user_color: self.color.clone(),
            is_typing: self.is_typing,
        }
    }
}

/// Participants of one document, in join order.
#[derive(Debug, Default)]
pub struct Session {
    participants: IndexMap<ConnectionId, Participant>,
}

impl Session {
    /// Insert or overwrite. An overwritten entry keeps its list position.
    pub fn upsert(&mut self, participant: Participant) -> Option<Participant> {
        self.participants.insert(participant.connection_id, participant)
    }

    pub fn remove(&mut self, connection_id: &ConnectionId) -> Option<Participant> {
        self.participants.shift_remove(connection_id)
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<&Participant> {
        self.participants.get(connection_id)
    }

    pub fn get_mut(&mut self, connection_id: &ConnectionId) -> Option<&mut Participant> {
        self.participants.get_mut(connection_id)
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.participants.contains_key(connection_id)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn views(&self) -> Vec<ParticipantView> {
        self.participants.values().map(Participant::view).collect()
    }

    /// Every member except `except`.
    pub fn others(&self, except: &ConnectionId) -> Vec<ConnectionId> {
        self.participants
            .keys()
            .filter(|id| *id != except)
            .copied()
            .collect()
    }
}

/// All live sessions of this process.
///
/// Owned by the hub and lent to the presence, edit and signal relays for
/// the duration of one event.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: HashMap<DocumentId, Session>,
    max_participants: usize,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::with_max_participants(usize::MAX)
    }

    /// Cap the number of participants a single session admits.
    pub fn with_max_participants(max_participants: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            max_participants,
        }
    }

    pub fn session(&self, document_id: &DocumentId) -> Option<&Session> {
        self.sessions.get(document_id)
    }

    pub fn session_mut(&mut self, document_id: &DocumentId) -> Option<&mut Session> {
        self.sessions.get_mut(document_id)
    }

    /// Whether `connection_id` may (re)join `document_id` without exceeding the cap.
    pub fn admits(&self, document_id: &DocumentId, connection_id: &ConnectionId) -> bool {
        match self.sessions.get(document_id) {
            Some(session) => {
                session.contains(connection_id) || session.len() < self.max_participants
            }
            None => self.max_participants > 0,
        }
    }

    /// Insert or overwrite a participant, creating the session if needed.
    pub fn upsert(&mut self, document_id: DocumentId, participant: Participant) -> Option<Participant> {
        self.sessions.entry(document_id).or_default().upsert(participant)
    }

    /// Remove a participant. Drops the session once it is empty.
    pub fn remove(&mut self, document_id: &DocumentId, connection_id: &ConnectionId) -> Option<Participant> {
        let session = self.sessions.get_mut(document_id)?;
        let removed = session.remove(connection_id);
        if session.is_empty() {
            self.sessions.remove(document_id);
        }
        removed
    }

    pub fn participant(&self, document_id: &DocumentId, connection_id: &ConnectionId) -> Option<&Participant> {
        self.sessions.get(document_id)?.get(connection_id)
    }

    pub fn participant_mut(
        &mut self,
        document_id: &DocumentId,
        connection_id: &ConnectionId,
    ) -> Option<&mut Participant> {
        self.sessions.get_mut(document_id)?.get_mut(connection_id)
    }

    /// Current participant list of a document (empty if it has no session).
    pub fn participants(&self, document_id: &DocumentId) -> Vec<ParticipantView> {
        self.sessions
            .get(document_id)
            .map(Session::views)
            .unwrap_or_default()
    }

    /// Broadcast recipients for an event sent by `sender` to `document_id`.
    pub fn recipients(&self, document_id: &DocumentId, sender: &ConnectionId) -> Vec<ConnectionId> {
        self.sessions
            .get(document_id)
            .map(|s| s.others(sender))
            .unwrap_or_default()
    }

    /// Documents `connection_id` is a member of, sorted.
    pub fn documents_of(&self, connection_id: &ConnectionId) -> Vec<DocumentId> {
        let mut docs: Vec<DocumentId> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.contains(connection_id))
            .map(|(id, _)| id.clone())
            .collect();
        docs.sort();
        docs
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn participant_count(&self) -> usize {
        self.sessions.values().map(Session::len).sum()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(connection_id: ConnectionId, user: &str) -> Participant {
        Participant {
            connection_id,
            user_id: user.to_string(),
            display_name: user.to_uppercase(),
            color: PALETTE[0].to_string(),
            is_typing: false,
        }
    }

    fn doc(id: &str) -> DocumentId {
        DocumentId::new(id).unwrap()
    }

    #[test]
    fn test_document_id_rejects_empty() {
        assert_eq!(DocumentId::new(""), Err(ProtocolError::EmptyDocumentId));
        assert_eq!(doc("doc1").as_str(), "doc1");
    }

    #[test]
    fn test_random_color_is_from_palette() {
        for _ in 0..100 {
            assert!(PALETTE.contains(&random_color().as_str()));
        }
    }

    #[test]
    fn test_palette_is_distinct() {
        let mut colors = PALETTE.to_vec();
        colors.sort();
        colors.dedup();
        assert_eq!(colors.len(), PALETTE.len());
    }

    #[test]
    fn test_upsert_creates_session() {
        let mut registry = SessionRegistry::new();
        let c1 = ConnectionId::new();
        assert!(registry.upsert(doc("d"), participant(c1, "a")).is_none());
        assert_eq!(registry.session_count(), 1);
        assert_eq!(registry.participants(&doc("d")).len(), 1);
    }

    #[test]
    fn test_upsert_overwrites_in_place() {
        let mut registry = SessionRegistry::new();
        let (c1, c2) = (ConnectionId::new(), ConnectionId::new());
        registry.upsert(doc("d"), participant(c1, "a"));
        registry.upsert(doc("d"), participant(c2, "b"));
        let previous = registry.upsert(doc("d"), participant(c1, "z"));

        assert_eq!(previous.map(|p| p.user_id), Some("a".to_string()));
        let users: Vec<String> = registry.participants(&doc("d")).into_iter().map(|p| p.user_id).collect();
        assert_eq!(users, vec!["z", "b"]);
    }

    #[test]
    fn test_remove_last_participant_drops_session() {
        let mut registry = SessionRegistry::new();
        let c1 = ConnectionId::new();
        registry.upsert(doc("d"), participant(c1, "a"));

        assert!(registry.remove(&doc("d"), &c1).is_some());
        assert_eq!(registry.session_count(), 0);
        assert!(registry.session(&doc("d")).is_none());
    }

    #[test]
    fn test_remove_unknown_is_none() {
        let mut registry = SessionRegistry::new();
        let c1 = ConnectionId::new();
        assert!(registry.remove(&doc("nope"), &c1).is_none());

        registry.upsert(doc("d"), participant(ConnectionId::new(), "a"));
        assert!(registry.remove(&doc("d"), &c1).is_none());
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn test_remove_keeps_join_order() {
        let mut registry = SessionRegistry::new();
        let ids: Vec<ConnectionId> = (0..4).map(|_| ConnectionId::new()).collect();
        for (i, id) in ids.iter().enumerate() {
            registry.upsert(doc("d"), participant(*id, &format!("u{i}")));
        }
        registry.remove(&doc("d"), &ids[1]);
        let users: Vec<String> = registry.participants(&doc("d")).into_iter().map(|p| p.user_id).collect();
        assert_eq!(users, vec!["u0", "u2", "u3"]);
    }

    #[test]
    fn test_recipients_exclude_sender() {
        let mut registry = SessionRegistry::new();
        let (c1, c2, c3) = (ConnectionId::new(), ConnectionId::new(), ConnectionId::new());
        registry.upsert(doc("d"), participant(c1, "a"));
        registry.upsert(doc("d"), participant(c2, "b"));
        registry.upsert(doc("d"), participant(c3, "c"));

        let recipients = registry.recipients(&doc("d"), &c2);
        assert_eq!(recipients, vec![c1, c3]);
        assert!(registry.recipients(&doc("other"), &c2).is_empty());
    }

    #[test]
    fn test_documents_of_spans_sessions() {
        let mut registry = SessionRegistry::new();
        let (c1, c2) = (ConnectionId::new(), ConnectionId::new());
        registry.upsert(doc("b"), participant(c1, "a"));
        registry.upsert(doc("a"), participant(c1, "a"));
        registry.upsert(doc("c"), participant(c2, "b"));

        assert_eq!(registry.documents_of(&c1), vec![doc("a"), doc("b")]);
        assert_eq!(registry.documents_of(&c2), vec![doc("c")]);
        assert_eq!(registry.participant_count(), 3);
    }

    #[test]
    fn test_admits_respects_cap() {
        let mut registry = SessionRegistry::with_max_participants(1);
        let (c1, c2) = (ConnectionId::new(), ConnectionId::new());
        assert!(registry.admits(&doc("d"), &c1));
        registry.upsert(doc("d"), participant(c1, "a"));

        assert!(registry.admits(&doc("d"), &c1), "rejoin is always admitted");
        assert!(!registry.admits(&doc("d"), &c2));
        assert!(registry.admits(&doc("other"), &c2));
    }

    #[test]
    fn test_participant_view() {
        let c1 = ConnectionId::new();
        let view = participant(c1, "a").view();
        assert_eq!(view.socket_id, c1.to_string());
        assert_eq!(view.user_name, "A");
        assert!(!view.is_typing);
    }
}
