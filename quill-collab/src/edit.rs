//! Edit relay: rebroadcast document content to the other participants.
//!
//! Last writer wins. The relay does not order, merge or store content;
//! every `document-change` is forwarded as received, and each client keeps
//! whichever update it applied last. Concurrent editors may diverge.

use serde_json::Value;

use crate::broadcast::Outbound;
use crate::protocol::{now_millis, ChangeRange, DocumentUpdate, ServerEvent, DEFAULT_USER_NAME};
use crate::registry::{ConnectionId, DocumentId, SessionRegistry};

pub struct EditRelay<'a, O: Outbound> {
    registry: &'a SessionRegistry,
    out: &'a mut O,
}

impl<'a, O: Outbound> EditRelay<'a, O> {
    pub fn new(registry: &'a SessionRegistry, out: &'a mut O) -> Self {
        Self { registry, out }
    }

    /// Send `document-update` to every participant of `document_id` other
    /// than the sender. Returns the number of recipients that accepted it.
    pub fn submit_change(
        &mut self,
        connection_id: ConnectionId,
        document_id: &DocumentId,
        content: Value,
        delta: Option<Value>,
        user_name: Option<String>,
    ) -> usize {
        let recipients = self.registry.recipients(document_id, &connection_id);
        if recipients.is_empty() {
            log::trace!("Change to {document_id} from {connection_id} has no recipients");
            return 0;
        }

        let user_id = self
            .registry
            .participant(document_id, &connection_id)
            .map(|p| p.user_id.clone())
            .unwrap_or_else(|| connection_id.to_string());
        let change_range = delta.as_ref().map(ChangeRange::from_delta);

        let update = ServerEvent::DocumentUpdate(DocumentUpdate {
            content,
            delta,
            user_id,
            user_name: user_name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| DEFAULT_USER_NAME.to_string()),
            timestamp: now_millis(),
            change_range,
        });

        let delivered = self.out.broadcast(&recipients, &update);
        log::debug!(
            "Relayed change to {document_id} from {connection_id} to {delivered}/{} peer(s)",
            recipients.len()
        );
        delivered
    }
}
