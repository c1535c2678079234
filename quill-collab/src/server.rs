//! WebSocket relay server.
//!
//! Architecture:
//! ```text
//! Client A ──► reader ─┐                          ┌─► writer ──► Client A
//!                      ├─► Hub (registry, FIFO) ──┤
//! Client B ──► reader ─┘                          └─► writer ──► Client B
//! ```
//!
//! Each accepted socket gets one task that selects between inbound frames
//! and its bounded outbox. Inbound text frames are decoded into
//! [`ClientEvent`]s and queued on the hub; the hub encodes each broadcast
//! once and pushes the frame to every recipient's outbox.
//!
//! However a connection ends (close frame, transport error, failed write,
//! heartbeat timeout or task cancellation) its [`DisconnectGuard`] queues
//! exactly one disconnect on the hub.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

use crate::broadcast::{BroadcastStats, Frame};
use crate::config::ServerConfig;
use crate::error::RelayError;
use crate::hub::{Hub, HubHandle};
use crate::protocol::ClientEvent;
use crate::registry::ConnectionId;

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Source of inbound TCP connections.
trait Acceptor {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Acceptor for TcpListener {
    fn accept(&self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    hub: Hub,
    handle: HubHandle,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Self {
        let (hub, handle) = Hub::new(&config);
        Self {
            config,
            hub,
            handle,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handle to the hub, usable after the server has been moved into `run`.
    pub fn handle(&self) -> HubHandle {
        self.handle.clone()
    }

    pub fn stats(&self) -> BroadcastStats {
        self.handle.stats()
    }

    /// Bind the configured address and serve. Only returns if binding fails.
    pub async fn run(self) -> Result<(), RelayError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), RelayError> {
        log::info!("Relay server listening on {}", listener.local_addr()?);
        self.serve_with(listener).await
    }

    /// Accept loop. A failed accept (descriptor exhaustion, aborted
    /// handshake) is logged and retried after [`ACCEPT_BACKOFF`].
    async fn serve_with<A: Acceptor>(self, acceptor: A) -> Result<(), RelayError> {
        let Self {
            config,
            hub,
            handle,
        } = self;
        tokio::spawn(hub.run());

        loop {
            let (stream, addr) = match acceptor.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    log::warn!("Failed to accept connection: {e}");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            log::debug!("New TCP connection from {addr}");

            let hub = handle.clone();
            let config = config.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, hub, config).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }
}

/// Queues a disconnect on the hub when dropped.
struct DisconnectGuard {
    hub: HubHandle,
    connection_id: ConnectionId,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if self.hub.disconnect_now(self.connection_id).is_err() {
            log::debug!("Hub gone before disconnect of {}", self.connection_id);
        }
    }
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    hub: HubHandle,
    config: ServerConfig,
) -> Result<(), RelayError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let connection_id = ConnectionId::new();
    let (outbox, mut frames) = mpsc::channel::<Frame>(config.broadcast_capacity.max(1));
    hub.connect(connection_id, outbox).await?;
    let _guard = DisconnectGuard {
        hub: hub.clone(),
        connection_id,
    };
    log::info!("WebSocket connection {connection_id} established from {addr}");

    let heartbeat = config.heartbeat_interval();
    let timeout = config.heartbeat_timeout();
    let mut ticker = heartbeat.map(tokio::time::interval);
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                last_seen = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => match ClientEvent::decode(text.as_str()) {
                        Ok(event) => {
                            log::trace!("{connection_id} sent {}", event.name());
                            hub.submit(connection_id, event).await?;
                        }
                        Err(e) => log::warn!("Failed to decode message from {addr}: {e}"),
                    },
                    Some(Ok(Message::Binary(data))) => {
                        log::warn!("Ignoring {} byte binary frame from {addr}", data.len());
                    }
                    Some(Ok(Message::Ping(data))) => {
                        ws_sender.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("Connection {connection_id} closed from {addr}");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        log::error!("WebSocket error from {addr}: {e}");
                        break;
                    }
                }
            }

            frame = frames.recv() => {
                match frame {
                    Some(frame) => ws_sender.send(Message::Text(frame)).await?,
                    None => break,
                }
            }

            _ = tick(&mut ticker) => {
                if is_stale(last_seen, heartbeat, timeout) {
                    log::warn!("Connection {connection_id} from {addr} timed out");
                    break;
                }
                ws_sender.send(Message::Ping(Default::default())).await?;
            }
        }
    }

    let _ = ws_sender.close().await;
    Ok(())
}

/// Next heartbeat tick, or never when heartbeats are disabled.
async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn is_stale(last_seen: Instant, interval: Option<Duration>, timeout: Duration) -> bool {
    match interval {
        Some(interval) => last_seen.elapsed() > interval + timeout,
        None => false,
    }
}
