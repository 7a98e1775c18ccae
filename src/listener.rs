//! Accept loop and graceful shutdown
//!
//! `serve` owns one ChatServer actor and spawns a handler task per accepted
//! connection until the shutdown token is cancelled.

use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::AppError;
use crate::handler::{handle_connection, ConnectionSettings};
use crate::liveness::run_keepalive_sweep;
use crate::server::ChatServer;

/// How long connections get to finish after being asked to close
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Run the relay on `listener` until `shutdown` is cancelled
///
/// On shutdown every open connection is sent a Close frame. An error is
/// returned if the close request could not be delivered.
pub async fn serve(listener: TcpListener, config: Config, shutdown: CancellationToken) -> Result<(), AppError> {
    let local_addr = listener.local_addr()?;

    let (server, handle) = ChatServer::channel();
    tokio::spawn(server.run());

    if let Some(period) = config.keepalive_interval() {
        tokio::spawn(run_keepalive_sweep(handle.clone(), period, shutdown.clone()));
    }

    info!(
        event = "server-up",
        addr = %local_addr,
        liveness = ?config.liveness,
        "Chat relay listening on {}", local_addr
    );

    let settings = ConnectionSettings::from(&config);
    let mut connections = JoinSet::new();

    // Connection accept loop
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!("Accepted TCP connection from {}", addr);
                    let handle = handle.clone();
                    connections.spawn(async move {
                        if let Err(e) = handle_connection(stream, handle, settings).await {
                            error!(event = "error", remote_addr = %addr, "Connection handler error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!(event = "error", "Failed to accept connection: {}", e);
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    info!(event = "shutdown", status = "start", "Shutting down");
    drop(listener);

    let closed = handle.shutdown().await;
    drop(handle);

    let drain = async { while connections.join_next().await.is_some() {} };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("Connections still open after {:?}, aborting", SHUTDOWN_GRACE);
        connections.abort_all();
    }

    match closed {
        Ok(count) => {
            info!(event = "shutdown", status = "end", closed = count, "Shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!(event = "error", "Failed to close connections: {}", e);
            Err(e)
        }
    }
}
