//! Ephemeral signals: cursor positions and typing indicators.
//!
//! Same fan-out shape as the edit relay. Cursor moves are pure
//! pass-through; typing signals also flip the sender's `is_typing` flag so
//! later participant lists reflect it.

use serde_json::Value;

use crate::broadcast::Outbound;
use crate::protocol::{
    now_millis, CursorUpdate, ServerEvent, UserTyping, DEFAULT_CURSOR_COLOR, DEFAULT_USER_NAME,
};
use crate::registry::{ConnectionId, DocumentId, SessionRegistry};

pub struct SignalRelay<'a, O: Outbound> {
    registry: &'a mut SessionRegistry,
    out: &'a mut O,
}

impl<'a, O: Outbound> SignalRelay<'a, O> {
    pub fn new(registry: &'a mut SessionRegistry, out: &'a mut O) -> Self {
        Self { registry, out }
    }

    /// Relay a cursor/selection change as `cursor-update`.
    pub fn cursor_move(
        &mut self,
        connection_id: ConnectionId,
        document_id: &DocumentId,
        range: Value,
        user_name: Option<String>,
        user_color: Option<String>,
    ) -> usize {
        let recipients = self.registry.recipients(document_id, &connection_id);
        if recipients.is_empty() {
            return 0;
        }

        let event = ServerEvent::CursorUpdate(CursorUpdate {
            user_id: self.sender_id(document_id, connection_id),
            user_name: or_default(user_name, DEFAULT_USER_NAME),
            user_color: or_default(user_color, DEFAULT_CURSOR_COLOR),
            range,
            timestamp: now_millis(),
        });
        log::trace!("Cursor move in {document_id} from {connection_id}");
        self.out.broadcast(&recipients, &event)
    }

    pub fn typing_start(
        &mut self,
        connection_id: ConnectionId,
        document_id: &DocumentId,
        user_name: Option<String>,
    ) -> usize {
        let user_name = Some(or_default(user_name, DEFAULT_USER_NAME));
        self.set_typing(connection_id, document_id, true, user_name)
    }

    pub fn typing_stop(&mut self, connection_id: ConnectionId, document_id: &DocumentId) -> usize {
        self.set_typing(connection_id, document_id, false, None)
    }

    fn set_typing(
        &mut self,
        connection_id: ConnectionId,
        document_id: &DocumentId,
        is_typing: bool,
        user_name: Option<String>,
    ) -> usize {
        if let Some(participant) = self.registry.participant_mut(document_id, &connection_id) {
            participant.is_typing = is_typing;
        }

        let recipients = self.registry.recipients(document_id, &connection_id);
        if recipients.is_empty() {
            return 0;
        }

        let event = ServerEvent::UserTyping(UserTyping {
            user_id: self.sender_id(document_id, connection_id),
            user_name,
            is_typing,
        });
        log::debug!("{connection_id} typing={is_typing} in {document_id}");
        self.out.broadcast(&recipients, &event)
    }

    fn sender_id(&self, document_id: &DocumentId, connection_id: ConnectionId) -> String {
        self.registry
            .participant(document_id, &connection_id)
            .map(|p| p.user_id.clone())
            .unwrap_or_else(|| connection_id.to_string())
    }
}

fn or_default(value: Option<String>, default: &str) -> String {
    value
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}
