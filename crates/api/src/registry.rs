//! Subscription registry.
//!
//! One task owns every live connection and the symbol -> subscribers map.
//! All changes arrive through a single mailbox and are applied one at a
//! time, so no locks guard the maps and a broadcast always sees the
//! subscriber set as of the moment it is processed.

use quotefeed_core::StreamMessage;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type ConnectionId = Uuid;

/// The registry's end of one client channel: an id and a bounded outbound
/// buffer drained by that connection's writer task.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    outbound: mpsc::Sender<StreamMessage>,
}

impl Connection {
    /// Create a connection with room for `buffer` undelivered messages.
    /// The receiver belongs to the transport writer.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<StreamMessage>) {
        let (outbound, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                id: Uuid::new_v4(),
                outbound,
            },
            rx,
        )
    }
}

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Registered, no subscriptions yet.
    Connected,
    /// Subscribed to at least one symbol.
    Subscribed,
    /// Gone. Terminal.
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub clients: usize,
    pub active_symbols: usize,
    /// Connections dropped because their outbound buffer was full or closed.
    pub evicted: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Subscription registry has stopped")]
    Closed,
}

enum Command {
    Register(Connection),
    Unregister(ConnectionId),
    Subscribe {
        id: ConnectionId,
        symbol: String,
    },
    Broadcast(StreamMessage),
    ActiveSymbols(oneshot::Sender<Vec<String>>),
    State {
        id: ConnectionId,
        reply: oneshot::Sender<ConnectionState>,
    },
    Stats(oneshot::Sender<RegistryStats>),
}

/// Cloneable sender side of the registry mailbox.
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<Command>,
}

impl RegistryHandle {
    async fn send(&self, command: Command) -> Result<(), RegistryError> {
        self.tx.send(command).await.map_err(|_| RegistryError::Closed)
    }

    async fn ask<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.send(command(reply)).await?;
        rx.await.map_err(|_| RegistryError::Closed)
    }

    pub async fn register(&self, connection: Connection) -> Result<(), RegistryError> {
        self.send(Command::Register(connection)).await
    }

    /// Remove a connection everywhere and close its outbound channel.
    /// Unknown ids are ignored.
    pub async fn unregister(&self, id: ConnectionId) -> Result<(), RegistryError> {
        self.send(Command::Unregister(id)).await
    }

    pub async fn subscribe(&self, id: ConnectionId, symbol: &str) -> Result<(), RegistryError> {
        self.send(Command::Subscribe {
            id,
            symbol: symbol.to_string(),
        })
        .await
    }

    /// Deliver to the subscribers of `message.symbol`, or to every client
    /// when the message has no symbol.
    pub async fn broadcast(&self, message: StreamMessage) -> Result<(), RegistryError> {
        self.send(Command::Broadcast(message)).await
    }

    /// Symbols with at least one subscriber, sorted.
    pub async fn active_symbols(&self) -> Result<Vec<String>, RegistryError> {
        self.ask(Command::ActiveSymbols).await
    }

    pub async fn connection_state(&self, id: ConnectionId) -> Result<ConnectionState, RegistryError> {
        self.ask(|reply| Command::State { id, reply }).await
    }

    pub async fn stats(&self) -> Result<RegistryStats, RegistryError> {
        self.ask(Command::Stats).await
    }
}

/// Registry state. Only ever touched by the task started in [`Registry::spawn`].
#[derive(Default)]
pub struct Registry {
    clients: HashMap<ConnectionId, Connection>,
    subscribers: BTreeMap<String, HashSet<ConnectionId>>,
    evicted: u64,
}

impl Registry {
    /// Start the registry task. It stops once every handle is dropped.
    pub fn spawn(mailbox_capacity: usize) -> (RegistryHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
        let task = tokio::spawn(Registry::default().run(rx));
        (RegistryHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            self.handle(command);
        }
        debug!(clients = self.clients.len(), "Registry mailbox closed");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register(connection) => self.register(connection),
            Command::Unregister(id) => {
                self.remove(id);
            }
            Command::Subscribe { id, symbol } => self.subscribe(id, symbol),
            Command::Broadcast(message) => self.broadcast(&message),
            Command::ActiveSymbols(reply) => {
                let _ = reply.send(self.subscribers.keys().cloned().collect());
            }
            Command::State { id, reply } => {
                let _ = reply.send(self.state_of(id));
            }
            Command::Stats(reply) => {
                let _ = reply.send(RegistryStats {
                    clients: self.clients.len(),
                    active_symbols: self.subscribers.len(),
                    evicted: self.evicted,
                });
            }
        }
    }

    fn register(&mut self, connection: Connection) {
        debug!(connection = %connection.id, "Registering connection");
        self.clients.insert(connection.id, connection);
    }

    fn subscribe(&mut self, id: ConnectionId, symbol: String) {
        if !self.clients.contains_key(&id) {
            debug!(connection = %id, symbol = %symbol, "Ignoring subscribe from unknown connection");
            return;
        }
        self.subscribers.entry(symbol).or_default().insert(id);
    }

    /// Drop a connection from the client set and every subscriber set,
    /// pruning sets that become empty. Returns whether it was registered.
    fn remove(&mut self, id: ConnectionId) -> bool {
        let Some(connection) = self.clients.remove(&id) else {
            return false;
        };
        self.subscribers.retain(|_, subs| {
            subs.remove(&id);
            !subs.is_empty()
        });
        // Dropping the sender ends the writer task, which closes the socket.
        drop(connection);
        true
    }

    fn broadcast(&mut self, message: &StreamMessage) {
        let targets: Vec<ConnectionId> = match message.symbol.as_deref() {
            Some(symbol) => self
                .subscribers
                .get(symbol)
                .map(|subs| subs.iter().copied().collect())
                .unwrap_or_default(),
            None => self.clients.keys().copied().collect(),
        };
        if targets.is_empty() {
            debug!(symbol = ?message.symbol, "Broadcast has no recipients");
            return;
        }

        let mut evict = Vec::new();
        for id in targets {
            let Some(connection) = self.clients.get(&id) else {
                continue;
            };
            match connection.outbound.try_send(message.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(connection = %id, "Outbound buffer full, disconnecting slow consumer");
                    evict.push(id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(connection = %id, "Outbound channel closed");
                    evict.push(id);
                }
            }
        }

        for id in evict {
            if self.remove(id) {
                self.evicted += 1;
                info!(connection = %id, "Connection evicted");
            }
        }
    }

    fn state_of(&self, id: ConnectionId) -> ConnectionState {
        if !self.clients.contains_key(&id) {
            ConnectionState::Disconnected
        } else if self.subscribers.values().any(|subs| subs.contains(&id)) {
            ConnectionState::Subscribed
        } else {
            ConnectionState::Connected
        }
    }
}
