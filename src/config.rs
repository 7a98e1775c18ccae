//! Server configuration
//!
//! Read once at startup from command-line flags, falling back to
//! environment variables and then to the defaults below.

use std::time::Duration;

use clap::{Parser, ValueEnum};

/// Which liveness mechanisms are active
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LivenessPolicy {
    /// Per-connection timer reset by every inbound payload
    IdleTimeout,
    /// Process-wide ping/pong sweep
    Keepalive,
    /// Both, independently; whichever fires first wins
    Both,
}

impl LivenessPolicy {
    pub fn uses_idle_timeout(self) -> bool {
        matches!(self, LivenessPolicy::IdleTimeout | LivenessPolicy::Both)
    }

    pub fn uses_keepalive(self) -> bool {
        matches!(self, LivenessPolicy::Keepalive | LivenessPolicy::Both)
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "chat_relay", about = "Shared-room WebSocket chat relay")]
pub struct Config {
    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind
    #[arg(long, env = "PORT", default_value_t = 1337)]
    pub port: u16,

    /// Silence allowed before a connection is dropped
    #[arg(
        long,
        env = "IDLE_TIMEOUT_MILLIS",
        default_value_t = 180_000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub idle_timeout_millis: u64,

    /// Longest accepted chat message, in characters
    #[arg(long, env = "MAX_MESSAGE_LENGTH", default_value_t = 280)]
    pub max_message_length: usize,

    /// Liveness mechanisms to run
    #[arg(long, env = "LIVENESS", value_enum, default_value_t = LivenessPolicy::IdleTimeout)]
    pub liveness: LivenessPolicy,

    /// Period of the keepalive sweep
    #[arg(
        long,
        env = "KEEPALIVE_INTERVAL_MILLIS",
        default_value_t = 3000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub keepalive_interval_millis: u64,
}

impl Config {
    /// `host:port` to bind
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Idle timeout, if the policy includes it
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.liveness
            .uses_idle_timeout()
            .then(|| Duration::from_millis(self.idle_timeout_millis))
    }

    /// Keepalive sweep period, if the policy includes it
    pub fn keepalive_interval(&self) -> Option<Duration> {
        self.liveness
            .uses_keepalive()
            .then(|| Duration::from_millis(self.keepalive_interval_millis))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 1337,
            idle_timeout_millis: 180_000,
            max_message_length: crate::validate::DEFAULT_MAX_MESSAGE_LENGTH,
            liveness: LivenessPolicy::IdleTimeout,
            keepalive_interval_millis: 3000,
        }
    }
}
