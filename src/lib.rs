//! Shared-Room WebSocket Chat Relay Library
//!
//! A WebSocket chat relay built with tokio-tungstenite using the Actor
//! pattern for state management.
//!
//! # Features
//! - Nickname claim as the first payload of every connection
//! - Case-sensitive nickname uniqueness across open connections
//! - Broadcast of sanitized chat lines to every registered participant
//! - Join and leave notices
//! - Idle timeout and/or ping/pong keepalive sweep
//! - Graceful shutdown closing every connection
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `ChatServer` is the central actor owning the session registry
//! - Each connection has a `handler` task owning its `Session` state machine
//!   and idle timer, and talking to the actor through a `ServerHandle`
//! - No locks needed - all registry access goes through message passing
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use tokio_util::sync::CancellationToken;
//! use chat_relay::{serve, Config};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::default();
//!     let listener = TcpListener::bind(config.bind_addr()).await.unwrap();
//!     serve(listener, config, CancellationToken::new()).await.unwrap();
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod listener;
pub mod liveness;
pub mod message;
pub mod registry;
pub mod sanitize;
pub mod server;
pub mod session;
pub mod types;
pub mod validate;

// Re-export main types for convenience
pub use client::{Client, Eviction};
pub use config::{Config, LivenessPolicy};
pub use error::{AppError, Rejection, SendError};
pub use handler::{handle_connection, ConnectionSettings};
pub use listener::serve;
pub use message::{Outbound, ServerMessage};
pub use registry::{Registration, Registry};
pub use sanitize::sanitize;
pub use server::{ChatServer, ServerCommand, ServerHandle};
pub use session::{DisconnectReason, Session, SessionState};
pub use types::{ClientId, Nickname};
pub use validate::{validate_message, validate_nickname};
