use tokio_tungstenite::tungstenite;

use crate::protocol::ProtocolError;

/// Errors surfaced by the relay server and client.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] envy::Error),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("relay hub is not running")]
    HubStopped,
}
