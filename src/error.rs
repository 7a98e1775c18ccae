//! Error types for the chat relay
//!
//! Defines application-level errors, user-input rejections and
//! message send errors. Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Application-level errors
///
/// These are fatal to the connection (or, during shutdown, to the process).
/// User-input problems are `Rejection`s instead and never end a connection.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error (fatal - registry actor is gone)
    #[error("Channel send error")]
    ChannelSend,
}

/// Rejected user input
///
/// Recovered locally: the offending connection receives an `error` envelope
/// carrying the `Display` text, and its state does not change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Payload bytes are not valid UTF-8
    #[error("Invalid input. Text must be valid UTF-8.")]
    InvalidEncoding,

    /// Nickname fails the syntax rule
    #[error("Invalid nickname. Min 2, max 10, latin letters or numbers.")]
    InvalidFormat,

    /// Another connection already holds the nickname
    #[error("Failed to connect. Nickname already taken.")]
    NicknameTaken,

    /// Chat message longer than the configured limit
    #[error("Invalid message. Max {max} characters.")]
    TooLong { max: usize },
}

/// Message send errors
///
/// Occurs when attempting to send messages through closed channels.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The receiver is alive but not draining its queue
    #[error("Queue full")]
    QueueFull,
}
