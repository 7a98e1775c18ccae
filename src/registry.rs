//! Session registry
//!
//! The set of open connections, anonymous or registered. It is owned by the
//! `ChatServer` actor, so every method here runs serialized with every other.

use std::collections::HashMap;

use tracing::debug;

use crate::client::{Client, Eviction};
use crate::message::{Outbound, ServerMessage};
use crate::types::{ClientId, Nickname};

/// Outcome of a nickname claim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// Nickname assigned to the claimant
    Accepted,
    /// Another open connection holds the nickname
    Taken,
    /// The claimant is not (or no longer) in the registry
    Unknown,
}

/// All open connections, keyed by id
#[derive(Debug, Default)]
pub struct Registry {
    clients: HashMap<ClientId, Client>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a freshly accepted, anonymous connection
    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id, client);
    }

    /// Remove a connection, returning its record if it was present
    pub fn remove(&mut self, client_id: ClientId) -> Option<Client> {
        self.clients.remove(&client_id)
    }

    pub fn get(&self, client_id: ClientId) -> Option<&Client> {
        self.clients.get(&client_id)
    }

    /// True iff an open connection currently holds exactly `nickname`
    pub fn is_taken(&self, nickname: &Nickname) -> bool {
        self.clients
            .values()
            .any(|c| c.nickname.as_ref() == Some(nickname))
    }

    /// Check uniqueness and assign the nickname in one step
    ///
    /// A connection that already holds a nickname keeps it.
    pub fn register(&mut self, client_id: ClientId, nickname: Nickname) -> Registration {
        if self.is_taken(&nickname) {
            return Registration::Taken;
        }
        match self.clients.get_mut(&client_id) {
            Some(client) if client.nickname.is_none() => {
                client.nickname = Some(nickname);
                Registration::Accepted
            }
            Some(_) => Registration::Taken,
            None => Registration::Unknown,
        }
    }

    /// Deliver `msg` to every registered connection, optionally skipping one
    ///
    /// Failed deliveries are skipped. Returns how many queues accepted it.
    pub fn broadcast(&self, msg: &ServerMessage, except: Option<ClientId>) -> usize {
        let mut delivered = 0;
        for client in self.clients.values() {
            if !client.is_registered() || Some(client.id) == except {
                continue;
            }
            match client.send(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => debug!("Skipping broadcast to {}", client.id),
            }
        }
        delivered
    }

    /// Set the keepalive flag after a Pong
    pub fn mark_alive(&mut self, client_id: ClientId) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.is_alive = true;
        }
    }

    /// One keepalive pass over every connection
    ///
    /// Connections that did not answer the previous ping are evicted; the
    /// rest get their flag cleared and a new ping. Returns the ids whose
    /// connection task received the eviction.
    pub fn sweep(&mut self) -> Vec<ClientId> {
        let mut terminated = Vec::new();
        for client in self.clients.values_mut() {
            if client.is_alive {
                client.is_alive = false;
                // A full queue just skips this ping; the flag stays false.
                let _ = client.deliver(Outbound::Ping);
            } else if client.evict(Eviction::Unresponsive) {
                terminated.push(client.id);
            }
        }
        terminated
    }

    /// Ask every connection to close, returning how many were asked
    pub fn close_all(&self) -> usize {
        self.clients
            .values()
            .filter(|c| c.evict(Eviction::Shutdown))
            .count()
    }

    /// Number of open connections
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Number of connections holding a nickname
    pub fn registered_count(&self) -> usize {
        self.clients.values().filter(|c| c.is_registered()).count()
    }
}
