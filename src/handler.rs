//! WebSocket connection handler
//!
//! Handles individual client connections: WebSocket handshake, the read loop
//! driving the session state machine and idle timer, and the write task
//! draining the connection's outbound queue.

use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::client::Eviction;
use crate::config::Config;
use crate::error::AppError;
use crate::liveness::IdleTimer;
use crate::message::Outbound;
use crate::server::{ServerHandle, SHUTDOWN_REASON};
use crate::session::{DisconnectReason, Session};
use crate::types::ClientId;

/// Outbound queue size per connection
const OUTBOUND_BUFFER_SIZE: usize = 64;

/// How long the write task gets to flush a close before it is aborted
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Close frame reason when the server ends a connection on its own
const CLOSE_REASON: &str = "Connection closed";

type WsSender = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Per-connection settings taken from `Config`
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub idle_timeout: Option<Duration>,
    pub max_message_length: usize,
}

impl From<&Config> for ConnectionSettings {
    fn from(config: &Config) -> Self {
        Self {
            idle_timeout: config.idle_timeout(),
            max_message_length: config.max_message_length,
        }
    }
}

/// Why the write task stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterExit {
    /// Every sender of the outbound queue is gone
    QueueClosed,
    /// The socket refused a frame
    SendFailed,
    /// Sent a Close frame on request
    Closed,
}

/// Handle a new TCP connection
///
/// Performs the WebSocket handshake, registers the connection with the
/// ChatServer, and runs it until close, error or timeout.
pub async fn handle_connection(
    stream: TcpStream,
    server: ServerHandle,
    settings: ConnectionSettings,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (ws_sender, mut ws_receiver) = ws_stream.split();

    let client_id = ClientId::new();
    info!(event = "new-connection", %client_id, remote_addr = %peer_addr, "Client {} connected from {}", client_id, peer_addr);

    // Channel for server -> client traffic
    let (out_tx, out_rx) = mpsc::channel::<Outbound>(OUTBOUND_BUFFER_SIZE);
    // Eviction stays deliverable when the peer stops reading and out_tx fills
    let (evict_tx, mut evict_rx) = watch::channel(None);

    // Register with ChatServer before any payload is processed
    if let Err(e) = server
        .connect(client_id, peer_addr.clone(), out_tx.clone(), evict_tx)
        .await
    {
        error!("Failed to register client {} - server closed", client_id);
        return Err(e);
    }

    let mut writer = tokio::spawn(write_loop(ws_sender, out_rx));
    let mut session = Session::new(
        client_id,
        peer_addr,
        server.clone(),
        out_tx.clone(),
        settings.max_message_length,
    );
    let mut idle = IdleTimer::new(settings.idle_timeout);

    let reason = loop {
        tokio::select! {
            frame = ws_receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        idle.reset();
                        session.handle_data(text.as_bytes()).await?;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        idle.reset();
                        session.handle_data(&data).await?;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        server.mark_alive(client_id).await?;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Frame(_))) => {
                        // Pong is handled automatically by tungstenite
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Client {} closed the connection", client_id);
                        break DisconnectReason::Closed;
                    }
                    Some(Err(e)) => {
                        error!(event = "error", %client_id, "WebSocket error for {}: {}", client_id, e);
                        break DisconnectReason::Error;
                    }
                }
            }
            _ = idle.expired() => {
                session.handle_idle_timeout().await?;
                break DisconnectReason::Timeout;
            }
            Ok(()) = evict_rx.changed() => {
                let eviction = *evict_rx.borrow_and_update();
                match eviction {
                    Some(Eviction::Unresponsive) => break DisconnectReason::Unresponsive,
                    Some(Eviction::Shutdown) => break DisconnectReason::Shutdown,
                    None => {}
                }
            }
            exit = &mut writer => {
                break match exit {
                    Ok(WriterExit::Closed) | Ok(WriterExit::QueueClosed) => DisconnectReason::Closed,
                    Ok(WriterExit::SendFailed) | Err(_) => DisconnectReason::Error,
                };
            }
        }
    };

    if let Err(e) = session.handle_close(reason).await {
        warn!("Could not report disconnect of {}: {}", client_id, e);
    }

    if !writer.is_finished() {
        match reason {
            // Drop the socket without a closing handshake
            DisconnectReason::Timeout | DisconnectReason::Unresponsive => writer.abort(),
            _ => {
                let close_reason = match reason {
                    DisconnectReason::Shutdown => SHUTDOWN_REASON,
                    _ => CLOSE_REASON,
                };
                let _ = out_tx.try_send(Outbound::Close(close_reason));
                if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
                    writer.abort();
                }
            }
        }
    }

    debug!("Connection {} finished ({})", client_id, reason);
    Ok(())
}

/// Drain the outbound queue into the socket
async fn write_loop(mut ws_sender: WsSender, mut out_rx: mpsc::Receiver<Outbound>) -> WriterExit {
    while let Some(outbound) = out_rx.recv().await {
        let frame = match outbound {
            Outbound::Envelope(msg) => match serde_json::to_string(&msg) {
                Ok(json) => Message::Text(json.into()),
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    // Continue - don't break on serialization errors
                    continue;
                }
            },
            Outbound::Ping => Message::Ping(Vec::new()),
            Outbound::Close(reason) => {
                let _ = ws_sender
                    .send(Message::Close(Some(CloseFrame {
                        code: CloseCode::Away,
                        reason: reason.into(),
                    })))
                    .await;
                return WriterExit::Closed;
            }
        };

        if ws_sender.send(frame).await.is_err() {
            debug!("WebSocket send failed, ending write task");
            return WriterExit::SendFailed;
        }
    }

    debug!("Write task ended for client");
    let _ = ws_sender.close().await;
    WriterExit::QueueClosed
}
