//! # quill-collab: Real-time collaboration relay for the Quill editor
//!
//! Relays document edits, cursor positions and typing indicators between
//! the clients editing the same document, and keeps each document's
//! participant list current as people join, leave or drop off.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌──────────────┐
//! │ RelayClient │ ◄────────────────► │ RelayServer  │
//! │ (per user)  │     JSON events    │ (accept loop)│
//! └─────────────┘                    └──────┬───────┘
//!                                           │ HubCommand (FIFO, bounded)
//!                                           ▼
//!                                    ┌──────────────┐
//!                                    │ Hub          │
//!                                    │ SessionReg.  │
//!                                    └──────┬───────┘
//!                                           │
//!                                    ┌──────┴───────┐
//!                                    │ConnectionTable│
//!                                    │ (fan-out)    │
//!                                    └──────────────┘
//! ```
//!
//! The server keeps no document content. Changes are relayed as received
//! and clients apply the latest one they see.
//!
//! ## Modules
//!
//! - [`protocol`]: JSON event vocabulary
//! - [`registry`]: Sessions and participants
//! - [`presence`]: Join, leave and disconnect coordination
//! - [`edit`]: Document change relay
//! - [`signal`]: Cursor and typing relay
//! - [`lifecycle`]: Per-connection state machine
//! - [`broadcast`]: Per-connection outboxes with backpressure
//! - [`hub`]: Single-task event loop owning all relay state
//! - [`server`]: WebSocket relay server
//! - [`client`]: WebSocket relay client

pub mod broadcast;
pub mod client;
pub mod config;
pub mod edit;
pub mod error;
pub mod hub;
pub mod lifecycle;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod signal;

// Re-exports for convenience
pub use broadcast::{BroadcastStats, ConnectionTable, Outbound};
pub use client::{ConnectionState, RelayClient, RelayEvent};
pub use config::ServerConfig;
pub use edit::EditRelay;
pub use error::RelayError;
pub use hub::{Hub, HubCommand, HubHandle};
pub use lifecycle::{ConnectionLifecycle, LinkState};
pub use presence::{JoinOutcome, JoinProfile, Presence};
pub use protocol::{ClientEvent, ParticipantView, ProtocolError, ServerEvent};
pub use registry::{ConnectionId, DocumentId, Participant, SessionRegistry};
pub use server::RelayServer;
pub use signal::SignalRelay;
