//! Message protocol definitions
//!
//! Server → client envelopes are JSON, using Serde's tagged enum so each
//! envelope carries exactly one `type`. Client → server payloads are raw
//! text with no envelope: the first is a nickname claim, the rest are chat.

use serde::Serialize;

use crate::error::Rejection;
use crate::types::Nickname;

/// Server → Client envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Registration accepted
    User { data: UserData },
    /// Rejection of the most recent input
    Error { text: String },
    /// Server-originated notice (join, leave, timeout)
    Info { data: Notice },
    /// Chat line from a registered participant
    Message { data: ChatLine },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserData {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    /// Milliseconds since the Unix epoch
    pub time: i64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatLine {
    /// Milliseconds since the Unix epoch
    pub time: i64,
    pub text: String,
    pub author: String,
}

impl ServerMessage {
    /// Registration acknowledgment for `nickname`
    pub fn user(nickname: &Nickname) -> Self {
        ServerMessage::User {
            data: UserData {
                name: nickname.to_string(),
            },
        }
    }

    /// Server notice stamped with the current time
    pub fn info(text: impl Into<String>) -> Self {
        ServerMessage::Info {
            data: Notice {
                time: now_millis(),
                text: text.into(),
            },
        }
    }

    /// Chat line stamped with the current time
    ///
    /// `text` must already be sanitized.
    pub fn chat(author: &Nickname, text: impl Into<String>) -> Self {
        ServerMessage::Message {
            data: ChatLine {
                time: now_millis(),
                text: text.into(),
                author: author.to_string(),
            },
        }
    }
}

/// Convert a rejection into the `error` envelope sent back to the client
impl From<Rejection> for ServerMessage {
    fn from(rejection: Rejection) -> Self {
        ServerMessage::Error {
            text: rejection.to_string(),
        }
    }
}

/// Instructions queued for a connection's write task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Serialize and send as one text frame
    Envelope(ServerMessage),
    /// Send a WebSocket Ping for the keepalive sweep
    Ping,
    /// Send a Close frame with the given reason, then stop
    Close(&'static str),
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
