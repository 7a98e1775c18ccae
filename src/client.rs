//! Client struct definition
//!
//! The registry's view of one open connection: its outbound queue,
//! claimed nickname and keepalive flag.

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::error::SendError;
use crate::message::{Outbound, ServerMessage};
use crate::types::{ClientId, Nickname};

/// Why the server is ending a connection on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eviction {
    /// Missed a keepalive ping
    Unresponsive,
    /// Server shutting down
    Shutdown,
}

/// Connected client information
#[derive(Debug)]
pub struct Client {
    /// Unique identifier for this client
    pub id: ClientId,
    /// Nickname (None until registration succeeds, then never changes)
    pub nickname: Option<Nickname>,
    /// Peer address captured at accept time
    pub remote_addr: String,
    /// Server → Client outbound queue
    pub sender: mpsc::Sender<Outbound>,
    /// Out-of-band signal to the connection task, independent of the queue
    pub eviction: watch::Sender<Option<Eviction>>,
    /// Answered the last keepalive ping
    pub is_alive: bool,
}

impl Client {
    /// Create a new anonymous client
    pub fn new(
        id: ClientId,
        remote_addr: String,
        sender: mpsc::Sender<Outbound>,
        eviction: watch::Sender<Option<Eviction>>,
    ) -> Self {
        Self {
            id,
            nickname: None,
            remote_addr,
            sender,
            eviction,
            is_alive: true,
        }
    }

    /// Queue an instruction without waiting
    ///
    /// A full or closed queue drops the instruction; one slow or closing
    /// peer never holds up the caller.
    pub fn deliver(&self, outbound: Outbound) -> Result<(), SendError> {
        match self.sender.try_send(outbound) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                debug!("Outbound queue full for {}, dropping", self.id);
                Err(SendError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(SendError::ChannelClosed),
        }
    }

    /// Queue an envelope for this client
    pub fn send(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.deliver(Outbound::Envelope(msg))
    }

    /// Tell the connection task to end the connection
    ///
    /// Works even when the outbound queue is full. Returns false once the
    /// connection task has gone away.
    pub fn evict(&self, eviction: Eviction) -> bool {
        self.eviction.send(Some(eviction)).is_ok()
    }

    /// Get the display name for this client
    ///
    /// Returns the nickname if set, otherwise "Unknown".
    pub fn display_name(&self) -> &str {
        self.nickname.as_ref().map(Nickname::as_str).unwrap_or("Unknown")
    }

    /// Check if this client has claimed a nickname
    pub fn is_registered(&self) -> bool {
        self.nickname.is_some()
    }
}
