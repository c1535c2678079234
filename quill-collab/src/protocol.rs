//! JSON event protocol spoken over the relay WebSocket.
//!
//! Wire format (one text frame per event):
//! ```text
//! {
//!   "event": "document-change",        ← kebab-case event name
//!   "data":  { "documentId": "...", … } ← camelCase payload
//! }
//! ```
//!
//! Every event in both directions is a variant of [`ClientEvent`] or
//! [`ServerEvent`]. Payloads that do not match a variant are rejected by
//! [`ClientEvent::decode`] before they reach the relay.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Display name used when a client does not send one.
pub const DEFAULT_USER_NAME: &str = "Anonymous";

/// Cursor colour used when a `cursor-move` carries none.
pub const DEFAULT_CURSOR_COLOR: &str = "#3b82f6";

// ───────────────────────────────────────────────────────────────────
// Client → server
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinDocument {
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentChange {
    pub document_id: String,
    /// Full document representation. Authoritative.
    pub content: Value,
    /// Structural change descriptor. Advisory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorMove {
    pub document_id: String,
    /// Position/selection descriptor, opaque to the relay.
    #[serde(default)]
    pub range: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_color: Option<String>,
}

/// Payload shared by `typing-start` and `typing-stop`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typing {
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveDocument {
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Events a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinDocument(JoinDocument),
    DocumentChange(DocumentChange),
    CursorMove(CursorMove),
    TypingStart(Typing),
    TypingStop(Typing),
    LeaveDocument(LeaveDocument),
}

impl ClientEvent {
    /// Parse one text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Decode(e.to_string()))
    }

    /// Serialize to one text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinDocument(_) => "join-document",
            Self::DocumentChange(_) => "document-change",
            Self::CursorMove(_) => "cursor-move",
            Self::TypingStart(_) => "typing-start",
            Self::TypingStop(_) => "typing-stop",
            Self::LeaveDocument(_) => "leave-document",
        }
    }

    /// Document the event is scoped to.
    pub fn document_id(&self) -> &str {
        match self {
            Self::JoinDocument(p) => &p.document_id,
            Self::DocumentChange(p) => &p.document_id,
            Self::CursorMove(p) => &p.document_id,
            Self::TypingStart(p) | Self::TypingStop(p) => &p.document_id,
            Self::LeaveDocument(p) => &p.document_id,
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Server → client
// ───────────────────────────────────────────────────────────────────

/// One entry of a participant list as clients see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub socket_id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_color: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserJoined {
    pub user_id: String,
    pub user_name: String,
    pub user_color: String,
    pub users: Vec<ParticipantView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveUsers {
    pub users: Vec<ParticipantView>,
}

/// Span touched by an edit, derived from the first delta op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRange {
    pub index: u64,
    pub length: u64,
}

impl ChangeRange {
    /// `index` is the leading `retain` (0 if absent), `length` the op count
    /// (1 if there are none).
    pub fn from_delta(delta: &Value) -> Self {
        let ops = delta.get("ops").and_then(Value::as_array);
        let index = ops
            .and_then(|ops| ops.first())
            .and_then(|op| op.get("retain"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let length = match ops.map(Vec::len) {
            Some(n) if n > 0 => n as u64,
            _ => 1,
        };
        Self { index, length }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUpdate {
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<Value>,
    pub user_id: String,
    pub user_name: String,
    pub timestamp: i64,
    pub change_range: Option<ChangeRange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorUpdate {
    pub user_id: String,
    pub user_name: String,
    pub user_color: String,
    pub range: Value,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTyping {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLeft {
    pub user_id: String,
    pub user_name: String,
    pub users: Vec<ParticipantView>,
}

/// Events the relay emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    UserJoined(UserJoined),
    ActiveUsers(ActiveUsers),
    DocumentUpdate(DocumentUpdate),
    CursorUpdate(CursorUpdate),
    UserTyping(UserTyping),
    UserLeft(UserLeft),
}

impl ServerEvent {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Decode(e.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::UserJoined(_) => "user-joined",
            Self::ActiveUsers(_) => "active-users",
            Self::DocumentUpdate(_) => "document-update",
            Self::CursorUpdate(_) => "cursor-update",
            Self::UserTyping(_) => "user-typing",
            Self::UserLeft(_) => "user-left",
        }
    }
}

/// Server wall clock in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed event: {0}")]
    Decode(String),
    #[error("failed to encode event: {0}")]
    Encode(String),
    #[error("document id must not be empty")]
    EmptyDocumentId,
}
