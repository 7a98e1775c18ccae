//! Liveness monitoring
//!
//! Two independent mechanisms:
//! - `IdleTimer`: owned by one connection task, reset on every inbound payload
//! - `run_keepalive_sweep`: one process-wide ticker driving the registry's
//!   ping/pong sweep

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::server::ServerHandle;

/// Per-connection idle timer
///
/// Holds exactly one pending deadline. Resetting moves that deadline in
/// place, and the timer lives in the connection task, so a reset can never
/// race with a stale firing.
pub struct IdleTimer {
    timeout: Option<Duration>,
    sleep: Pin<Box<Sleep>>,
}

impl IdleTimer {
    /// Start the timer; `None` builds a timer that never fires
    pub fn new(timeout: Option<Duration>) -> Self {
        let deadline = Instant::now() + timeout.unwrap_or(Duration::ZERO);
        Self {
            timeout,
            sleep: Box::pin(tokio::time::sleep_until(deadline)),
        }
    }

    /// Push the deadline to `timeout` from now
    pub fn reset(&mut self) {
        if let Some(timeout) = self.timeout {
            self.sleep.as_mut().reset(Instant::now() + timeout);
        }
    }

    /// Resolves when the connection has been silent for the whole timeout
    pub async fn expired(&mut self) {
        if self.timeout.is_none() {
            return pending().await;
        }
        self.sleep.as_mut().await;
    }
}

/// Shortest sweep period; `interval` panics on zero
const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(1);

/// Drive the keepalive sweep every `period` until cancelled
///
/// Stops early if the registry actor is gone.
pub async fn run_keepalive_sweep(server: ServerHandle, period: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(period.max(MIN_SWEEP_PERIOD));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately, we don't want that
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if server.sweep().await.is_err() {
                    break;
                }
            }
        }
    }
    debug!("Keepalive sweep stopped");
}
