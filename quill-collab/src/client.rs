//! WebSocket relay client.
//!
//! A thin counterpart to [`crate::server`]: one writer task fed by a
//! channel, one reader task that decodes server events and forwards them
//! to the application. Used by the integration tests and by tooling.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::error::RelayError;
use crate::protocol::{
    ClientEvent, CursorMove, DocumentChange, JoinDocument, LeaveDocument, ServerEvent, Typing,
};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the relay client.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Connected,
    Received(ServerEvent),
    Disconnected,
}

pub struct RelayClient {
    state: Arc<RwLock<ConnectionState>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Message>>,

    event_rx: Option<mpsc::Receiver<RelayEvent>>,
    event_tx: mpsc::Sender<RelayEvent>,

    server_url: String,
}

impl RelayClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<RelayEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server and spawn the reader and writer tasks.
    pub async fn connect(&mut self) -> Result<(), RelayError> {
        *self.state.write().await = ConnectionState::Connecting;

        let ws_stream = match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(e.into());
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Message>(256);
        self.outgoing_tx = Some(out_tx);

        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if ws_writer.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(RelayEvent::Connected).await;

        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerEvent::decode(text.as_str()) {
                        Ok(event) => {
                            if event_tx.send(RelayEvent::Received(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => log::warn!("Undecodable server frame: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(RelayEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Send one client event.
    pub async fn send(&self, event: ClientEvent) -> Result<(), RelayError> {
        let tx = self.outgoing_tx.as_ref().ok_or(RelayError::ConnectionClosed)?;
        let text = event.encode()?;
        tx.send(Message::text(text))
            .await
            .map_err(|_| RelayError::ConnectionClosed)
    }

    pub async fn join(
        &self,
        document_id: &str,
        user_id: Option<&str>,
        user_name: Option<&str>,
        user_color: Option<&str>,
    ) -> Result<(), RelayError> {
        self.send(ClientEvent::JoinDocument(JoinDocument {
            document_id: document_id.to_string(),
            user_id: user_id.map(str::to_string),
            user_name: user_name.map(str::to_string),
            user_color: user_color.map(str::to_string),
        }))
        .await
    }

    pub async fn change(
        &self,
        document_id: &str,
        content: Value,
        delta: Option<Value>,
        user_name: Option<&str>,
    ) -> Result<(), RelayError> {
        self.send(ClientEvent::DocumentChange(DocumentChange {
            document_id: document_id.to_string(),
            content,
            delta,
            user_name: user_name.map(str::to_string),
        }))
        .await
    }

    pub async fn cursor(
        &self,
        document_id: &str,
        range: Value,
        user_name: Option<&str>,
        user_color: Option<&str>,
    ) -> Result<(), RelayError> {
        self.send(ClientEvent::CursorMove(CursorMove {
            document_id: document_id.to_string(),
            range,
            user_name: user_name.map(str::to_string),
            user_color: user_color.map(str::to_string),
        }))
        .await
    }

    pub async fn typing(
        &self,
        document_id: &str,
        is_typing: bool,
        user_name: Option<&str>,
    ) -> Result<(), RelayError> {
        let typing = Typing {
            document_id: document_id.to_string(),
            user_name: user_name.map(str::to_string),
        };
        let event = if is_typing {
            ClientEvent::TypingStart(typing)
        } else {
            ClientEvent::TypingStop(typing)
        };
        self.send(event).await
    }

    pub async fn leave(&self, document_id: &str, user_id: Option<&str>) -> Result<(), RelayError> {
        self.send(ClientEvent::LeaveDocument(LeaveDocument {
            document_id: document_id.to_string(),
            user_id: user_id.map(str::to_string),
        }))
        .await
    }

    /// Close the connection. The writer task sends a close frame once
    /// queued messages are flushed.
    pub async fn close(&mut self) {
        if self.outgoing_tx.take().is_some() {
            *self.state.write().await = ConnectionState::Disconnected;
        }
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}
