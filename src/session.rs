//! Per-connection session state machine
//!
//! `Anonymous` → `Registered` on a successful nickname claim; either state →
//! `Closed` on close, error or idle timeout. Each transition is a method so it
//! can be driven directly in tests, without a socket.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::error::{AppError, Rejection};
use crate::message::Outbound;
use crate::registry::Registration;
use crate::server::ServerHandle;
use crate::types::{ClientId, Nickname};
use crate::validate::{validate_message, validate_nickname};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Registered,
    Closed,
}

/// Why a connection ended, as reported in the `disconnect` log event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Idle timer fired
    Timeout,
    /// Missed a keepalive ping
    Unresponsive,
    /// Remote closed or the stream ended
    Closed,
    /// Transport error
    Error,
    /// Server shutting down
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DisconnectReason::Timeout => "timeout",
            DisconnectReason::Unresponsive => "unresponsive",
            DisconnectReason::Closed => "closed",
            DisconnectReason::Error => "error",
            DisconnectReason::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one connection, owned by that connection's task
pub struct Session {
    client_id: ClientId,
    remote_addr: String,
    nickname: Option<Nickname>,
    state: SessionState,
    /// Set by the idle-timeout path; suppresses the leave notice on close
    terminated: bool,
    max_message_length: usize,
    server: ServerHandle,
    /// This connection's own outbound queue, for replies to it alone
    outbound: mpsc::Sender<Outbound>,
}

impl Session {
    pub fn new(
        client_id: ClientId,
        remote_addr: String,
        server: ServerHandle,
        outbound: mpsc::Sender<Outbound>,
        max_message_length: usize,
    ) -> Self {
        Self {
            client_id,
            remote_addr,
            nickname: None,
            state: SessionState::Anonymous,
            terminated: false,
            max_message_length,
            server,
            outbound,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn nickname(&self) -> Option<&Nickname> {
        self.nickname.as_ref()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Inbound payload
    ///
    /// The first accepted payload is a nickname claim; after that every
    /// payload is chat. Ignored once closed.
    pub async fn handle_data(&mut self, payload: &[u8]) -> Result<(), AppError> {
        match self.state {
            SessionState::Anonymous => self.claim_nickname(payload).await,
            SessionState::Registered => self.post_message(payload).await,
            SessionState::Closed => Ok(()),
        }
    }

    /// Anonymous + data: try to register
    async fn claim_nickname(&mut self, payload: &[u8]) -> Result<(), AppError> {
        let nickname = match validate_nickname(payload) {
            Ok(nickname) => nickname,
            Err(rejection) => {
                debug!("Client {} sent invalid nickname: {}", self.client_id, rejection);
                self.reject(rejection);
                return Ok(());
            }
        };

        match self.server.register(self.client_id, nickname.clone()).await? {
            Registration::Accepted => {
                self.nickname = Some(nickname);
                self.state = SessionState::Registered;
            }
            Registration::Taken => {
                debug!("Client {} asked for taken nickname {}", self.client_id, nickname);
                self.reject(Rejection::NicknameTaken);
            }
            Registration::Unknown => {
                warn!("Client {} is missing from the registry", self.client_id);
            }
        }
        Ok(())
    }

    /// Registered + data: broadcast a chat line
    async fn post_message(&mut self, payload: &[u8]) -> Result<(), AppError> {
        match validate_message(payload, self.max_message_length) {
            Ok(text) => self.server.chat(self.client_id, text).await,
            Err(rejection) => {
                debug!("Client {} sent invalid message: {}", self.client_id, rejection);
                self.reject(rejection);
                Ok(())
            }
        }
    }

    /// Idle timer fired
    ///
    /// Leaves the session Closed and terminated; the caller drops the
    /// transport. The close event that follows is then a no-op.
    pub async fn handle_idle_timeout(&mut self) -> Result<(), AppError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.terminated = true;
        let notice = self
            .registered_nickname()
            .map(|nick| format!("{} was disconnected due to inactivity", nick));
        self.close(DisconnectReason::Timeout, notice).await
    }

    /// Close event, transport error or keepalive termination
    pub async fn handle_close(&mut self, reason: DisconnectReason) -> Result<(), AppError> {
        if self.state == SessionState::Closed || self.terminated {
            return Ok(());
        }
        let notice = self
            .registered_nickname()
            .map(|nick| format!("{} left the chat, connection lost", nick));
        self.close(reason, notice).await
    }

    async fn close(&mut self, reason: DisconnectReason, notice: Option<String>) -> Result<(), AppError> {
        self.state = SessionState::Closed;
        info!(
            event = "disconnect",
            reason = %reason,
            client_id = %self.client_id,
            remote_addr = %self.remote_addr,
            nickname = self.nickname.as_ref().map(Nickname::as_str).unwrap_or(""),
            "Peer {} disconnected", self.remote_addr
        );
        self.server.disconnect(self.client_id, notice).await
    }

    fn registered_nickname(&self) -> Option<&Nickname> {
        match self.state {
            SessionState::Registered => self.nickname.as_ref(),
            _ => None,
        }
    }

    /// Send an `error` envelope to this connection only
    ///
    /// Never waits on the queue: a peer that stops reading loses the reply
    /// but cannot stall its own read loop.
    fn reject(&self, rejection: Rejection) {
        match self.outbound.try_send(Outbound::Envelope(rejection.into())) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!("Outbound queue full for {}, dropping rejection", self.client_id);
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}
