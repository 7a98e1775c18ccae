//! ChatServer Actor implementation
//!
//! The central actor that owns the session registry. Connection handlers talk
//! to it through a cloneable `ServerHandle`; because the actor processes one
//! command at a time, a nickname check and the assignment that follows it can
//! never interleave with another connection's claim.

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use crate::client::{Client, Eviction};
use crate::error::AppError;
use crate::message::{Outbound, ServerMessage};
use crate::registry::{Registration, Registry};
use crate::types::{ClientId, Nickname};

/// Channel buffer size for server commands
pub const CHANNEL_BUFFER_SIZE: usize = 256;

/// Close frame reason sent to every connection on shutdown
pub const SHUTDOWN_REASON: &str = "Server shutting down";

/// Commands sent from handlers to the ChatServer actor
#[derive(Debug)]
pub enum ServerCommand {
    /// New connection accepted
    Connect {
        client_id: ClientId,
        remote_addr: String,
        sender: mpsc::Sender<Outbound>,
        eviction: watch::Sender<Option<Eviction>>,
    },
    /// Connection closed; broadcast `notice` to the remaining participants
    Disconnect {
        client_id: ClientId,
        notice: Option<String>,
    },
    /// Claim a nickname
    Register {
        client_id: ClientId,
        nickname: Nickname,
        reply: oneshot::Sender<Registration>,
    },
    /// Broadcast a sanitized chat line from a registered client
    Chat {
        client_id: ClientId,
        text: String,
    },
    /// Query nickname ownership
    IsTaken {
        nickname: Nickname,
        reply: oneshot::Sender<bool>,
    },
    /// Pong received
    MarkAlive {
        client_id: ClientId,
    },
    /// Keepalive sweep tick
    Sweep,
    /// Connection counts (open, registered)
    Stats {
        reply: oneshot::Sender<(usize, usize)>,
    },
    /// Close every open connection
    Shutdown {
        reply: oneshot::Sender<usize>,
    },
}

/// The main ChatServer actor
pub struct ChatServer {
    registry: Registry,
    /// Command receiver channel
    receiver: mpsc::Receiver<ServerCommand>,
}

impl ChatServer {
    /// Create a new ChatServer with the given command receiver
    pub fn new(receiver: mpsc::Receiver<ServerCommand>) -> Self {
        Self {
            registry: Registry::new(),
            receiver,
        }
    }

    /// Create the actor together with a handle to it
    pub fn channel() -> (Self, ServerHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        (Self::new(cmd_rx), ServerHandle::new(cmd_tx))
    }

    /// Run the ChatServer event loop
    ///
    /// Continuously receives and processes commands until all senders are dropped.
    pub async fn run(mut self) {
        info!("ChatServer started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("ChatServer shutting down");
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::Connect {
                client_id,
                remote_addr,
                sender,
                eviction,
            } => self.handle_connect(client_id, remote_addr, sender, eviction),
            ServerCommand::Disconnect { client_id, notice } => {
                self.handle_disconnect(client_id, notice)
            }
            ServerCommand::Register {
                client_id,
                nickname,
                reply,
            } => {
                let outcome = self.handle_register(client_id, nickname);
                let _ = reply.send(outcome);
            }
            ServerCommand::Chat { client_id, text } => self.handle_chat(client_id, text),
            ServerCommand::IsTaken { nickname, reply } => {
                let _ = reply.send(self.registry.is_taken(&nickname));
            }
            ServerCommand::MarkAlive { client_id } => self.registry.mark_alive(client_id),
            ServerCommand::Sweep => {
                for client_id in self.registry.sweep() {
                    debug!("Evicting unresponsive client {}", client_id);
                }
            }
            ServerCommand::Stats { reply } => {
                let _ = reply.send((self.registry.len(), self.registry.registered_count()));
            }
            ServerCommand::Shutdown { reply } => {
                let closed = self.registry.close_all();
                info!("Asked {} connections to close", closed);
                let _ = reply.send(closed);
            }
        }
    }

    /// Handle new client connection
    fn handle_connect(
        &mut self,
        client_id: ClientId,
        remote_addr: String,
        sender: mpsc::Sender<Outbound>,
        eviction: watch::Sender<Option<Eviction>>,
    ) {
        debug!("Client {} added from {}", client_id, remote_addr);
        self.registry.add(Client::new(client_id, remote_addr, sender, eviction));
        debug!("Total clients: {}", self.registry.len());
    }

    /// Handle client disconnection
    fn handle_disconnect(&mut self, client_id: ClientId, notice: Option<String>) {
        let Some(client) = self.registry.remove(client_id) else {
            return;
        };
        debug!("Client {} ({}) removed", client_id, client.display_name());

        if let Some(text) = notice {
            self.registry.broadcast(&ServerMessage::info(text), None);
        }
        debug!("Total clients: {}", self.registry.len());
    }

    /// Handle a nickname claim
    ///
    /// On success the claimant gets its `user` acknowledgment before anyone
    /// else hears about the join.
    fn handle_register(&mut self, client_id: ClientId, nickname: Nickname) -> Registration {
        let outcome = self.registry.register(client_id, nickname.clone());
        if outcome != Registration::Accepted {
            return outcome;
        }

        if let Some(client) = self.registry.get(client_id) {
            info!(
                event = "new-user",
                %client_id,
                nickname = %nickname,
                remote_addr = %client.remote_addr,
                "User is known as {}", nickname
            );
            let _ = client.send(ServerMessage::user(&nickname));
        }

        self.registry.broadcast(
            &ServerMessage::info(format!("{} has joined", nickname)),
            Some(client_id),
        );
        outcome
    }

    /// Handle chat message
    fn handle_chat(&mut self, client_id: ClientId, text: String) {
        let Some(author) = self.registry.get(client_id).and_then(|c| c.nickname.clone()) else {
            return;
        };

        info!(event = "message", %client_id, author = %author, "Received message from {}", author);
        let delivered = self.registry.broadcast(&ServerMessage::chat(&author, text), None);
        debug!("Message from {} delivered to {} clients", author, delivered);
    }
}

/// Cloneable handle to the ChatServer actor
///
/// Every method fails with `AppError::ChannelSend` once the actor is gone.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    cmd_tx: mpsc::Sender<ServerCommand>,
}

impl ServerHandle {
    pub fn new(cmd_tx: mpsc::Sender<ServerCommand>) -> Self {
        Self { cmd_tx }
    }

    async fn send(&self, cmd: ServerCommand) -> Result<(), AppError> {
        self.cmd_tx.send(cmd).await.map_err(|_| AppError::ChannelSend)
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> ServerCommand) -> Result<T, AppError> {
        let (reply, response) = oneshot::channel();
        self.send(build(reply)).await?;
        response.await.map_err(|_| AppError::ChannelSend)
    }

    /// Add a new anonymous connection
    ///
    /// `eviction` is how the actor ends the connection without going
    /// through its outbound queue.
    pub async fn connect(
        &self,
        client_id: ClientId,
        remote_addr: String,
        sender: mpsc::Sender<Outbound>,
        eviction: watch::Sender<Option<Eviction>>,
    ) -> Result<(), AppError> {
        self.send(ServerCommand::Connect {
            client_id,
            remote_addr,
            sender,
            eviction,
        })
        .await
    }

    /// Remove a connection and announce `notice` to the rest
    pub async fn disconnect(&self, client_id: ClientId, notice: Option<String>) -> Result<(), AppError> {
        self.send(ServerCommand::Disconnect { client_id, notice }).await
    }

    /// Atomically check and claim `nickname`
    pub async fn register(&self, client_id: ClientId, nickname: Nickname) -> Result<Registration, AppError> {
        self.request(|reply| ServerCommand::Register {
            client_id,
            nickname,
            reply,
        })
        .await
    }

    /// Broadcast a chat line from `client_id` to every registered client
    pub async fn chat(&self, client_id: ClientId, text: String) -> Result<(), AppError> {
        self.send(ServerCommand::Chat { client_id, text }).await
    }

    /// Whether an open connection currently holds `nickname`
    pub async fn is_taken(&self, nickname: Nickname) -> Result<bool, AppError> {
        self.request(|reply| ServerCommand::IsTaken { nickname, reply }).await
    }

    pub async fn mark_alive(&self, client_id: ClientId) -> Result<(), AppError> {
        self.send(ServerCommand::MarkAlive { client_id }).await
    }

    pub async fn sweep(&self) -> Result<(), AppError> {
        self.send(ServerCommand::Sweep).await
    }

    /// (open connections, registered connections)
    pub async fn stats(&self) -> Result<(usize, usize), AppError> {
        self.request(|reply| ServerCommand::Stats { reply }).await
    }

    /// Ask every open connection to close, returning how many were asked
    pub async fn shutdown(&self) -> Result<usize, AppError> {
        self.request(|reply| ServerCommand::Shutdown { reply }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::validate_nickname;

    fn nick(name: &str) -> Nickname {
        validate_nickname(name.as_bytes()).unwrap()
    }

    fn spawn_server() -> ServerHandle {
        let (server, handle) = ChatServer::channel();
        tokio::spawn(server.run());
        handle
    }

    async fn connect(handle: &ServerHandle) -> (ClientId, mpsc::Receiver<Outbound>) {
        let (id, rx, _evict_rx) = connect_watched(handle).await;
        (id, rx)
    }

    async fn connect_watched(
        handle: &ServerHandle,
    ) -> (ClientId, mpsc::Receiver<Outbound>, watch::Receiver<Option<Eviction>>) {
        let (tx, rx) = mpsc::channel(32);
        let (evict_tx, evict_rx) = watch::channel(None);
        let id = ClientId::new();
        handle.connect(id, "127.0.0.1:9".to_string(), tx, evict_tx).await.unwrap();
        (id, rx, evict_rx)
    }

    fn envelope(outbound: Option<Outbound>) -> ServerMessage {
        match outbound {
            Some(Outbound::Envelope(msg)) => msg,
            other => panic!("expected envelope, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_register_acks_then_announces() {
        let handle = spawn_server();
        let (a, mut rx_a) = connect(&handle).await;
        let (b, mut rx_b) = connect(&handle).await;

        assert_eq!(handle.register(a, nick("alice")).await.unwrap(), Registration::Accepted);
        assert_eq!(envelope(rx_a.recv().await), ServerMessage::user(&nick("alice")));

        assert_eq!(handle.register(b, nick("alice")).await.unwrap(), Registration::Taken);
        assert_eq!(handle.register(b, nick("bob")).await.unwrap(), Registration::Accepted);
        assert_eq!(envelope(rx_b.recv().await), ServerMessage::user(&nick("bob")));

        match envelope(rx_a.recv().await) {
            ServerMessage::Info { data } => assert_eq!(data.text, "bob has joined"),
            other => panic!("unexpected {other:?}"),
        }
        // The joiner does not hear its own join notice.
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_concurrent_claims_single_winner() {
        let handle = spawn_server();
        let mut ids = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..8 {
            let (id, rx) = connect(&handle).await;
            ids.push(id);
            receivers.push(rx);
        }

        let claims: Vec<_> = ids
            .iter()
            .map(|&id| {
                let handle = handle.clone();
                tokio::spawn(async move { handle.register(id, nick("same")).await.unwrap() })
            })
            .collect();
        let mut accepted = 0;
        for claim in claims {
            if claim.await.unwrap() == Registration::Accepted {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        assert!(handle.is_taken(nick("same")).await.unwrap());
    }

    #[tokio::test]
    async fn test_chat_reaches_all_registered_including_sender() {
        let handle = spawn_server();
        let (a, mut rx_a) = connect(&handle).await;
        let (b, mut rx_b) = connect(&handle).await;
        let (_anon, mut rx_anon) = connect(&handle).await;
        handle.register(a, nick("alice")).await.unwrap();
        handle.register(b, nick("bob")).await.unwrap();
        // Drain acks and join notice.
        envelope(rx_a.recv().await);
        envelope(rx_b.recv().await);
        envelope(rx_a.recv().await);

        handle.chat(a, "hi".to_string()).await.unwrap();
        assert_eq!(handle.stats().await.unwrap(), (3, 2));

        for rx in [&mut rx_a, &mut rx_b] {
            match envelope(rx.recv().await) {
                ServerMessage::Message { data } => {
                    assert_eq!(data.author, "alice");
                    assert_eq!(data.text, "hi");
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(rx_anon.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_chat_from_anonymous_is_dropped() {
        let handle = spawn_server();
        let (a, mut rx_a) = connect(&handle).await;
        let (anon, _rx) = connect(&handle).await;
        handle.register(a, nick("alice")).await.unwrap();
        envelope(rx_a.recv().await);

        handle.chat(anon, "psst".to_string()).await.unwrap();
        handle.stats().await.unwrap();
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_frees_nickname_and_notifies() {
        let handle = spawn_server();
        let (a, _rx_a) = connect(&handle).await;
        let (b, mut rx_b) = connect(&handle).await;
        handle.register(a, nick("alice")).await.unwrap();
        handle.register(b, nick("bob")).await.unwrap();
        envelope(rx_b.recv().await);

        handle
            .disconnect(a, Some("alice left the chat, connection lost".to_string()))
            .await
            .unwrap();
        assert!(!handle.is_taken(nick("alice")).await.unwrap());
        match envelope(rx_b.recv().await) {
            ServerMessage::Info { data } => {
                assert_eq!(data.text, "alice left the chat, connection lost")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_shutdown_closes_everyone() {
        let handle = spawn_server();
        let (_a, _rx_a, mut evict_a) = connect_watched(&handle).await;
        let (_b, _rx_b, mut evict_b) = connect_watched(&handle).await;
        // Already gone; not counted.
        let (_c, _rx_c, evict_c) = connect_watched(&handle).await;
        drop(evict_c);

        assert_eq!(handle.shutdown().await.unwrap(), 2);
        assert_eq!(*evict_a.borrow_and_update(), Some(Eviction::Shutdown));
        assert_eq!(*evict_b.borrow_and_update(), Some(Eviction::Shutdown));
    }

    #[tokio::test]
    async fn test_sweep_evicts_after_missed_ping() {
        let handle = spawn_server();
        let (a, mut rx_a, mut evict_a) = connect_watched(&handle).await;

        handle.sweep().await.unwrap();
        assert_eq!(rx_a.recv().await, Some(Outbound::Ping));
        handle.sweep().await.unwrap();
        evict_a.changed().await.unwrap();
        assert_eq!(*evict_a.borrow_and_update(), Some(Eviction::Unresponsive));

        // Still registered until its task reports the disconnect.
        assert_eq!(handle.stats().await.unwrap(), (1, 0));
        handle.disconnect(a, None).await.unwrap();
        assert_eq!(handle.stats().await.unwrap(), (0, 0));
    }

    #[tokio::test]
    async fn test_handle_fails_after_actor_stops() {
        let (server, handle) = ChatServer::channel();
        drop(server);
        assert!(matches!(handle.sweep().await, Err(AppError::ChannelSend)));
    }
}
