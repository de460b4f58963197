//! Connection registry.
//!
//! One control task owns the map of live connections and is the only code
//! that touches it. Everything else talks to it through [`RegistryHandle`],
//! which queues commands. The control loop never waits on the network:
//! delivery is a non-blocking push onto the connection's bounded outbound
//! queue, and a full queue evicts the connection.

use logrelay_broker::CancellationToken;
use logrelay_protocol::defaults::{DEFAULT_CONTROL_CAPACITY, DEFAULT_OUTBOUND_CAPACITY};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    /// Per-connection outbound queue capacity
    pub outbound_capacity: usize,
    pub control_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            control_capacity: DEFAULT_CONTROL_CAPACITY,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Client id must not be empty")]
    EmptyId,

    #[error("Registry is shut down")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictReason {
    /// Outbound queue full
    Backpressure,
    /// A newer connection registered the same id
    Replaced,
    /// Writer side already gone
    WriterGone,
    Shutdown,
}

/// What a newly registered connection gets back.
#[derive(Debug)]
pub struct Registration {
    pub id: String,
    /// Distinguishes this connection from earlier ones with the same id
    pub generation: u64,
    pub outbound: mpsc::Receiver<String>,
    /// Cancelled when the registry drops the connection
    pub closed: CancellationToken,
}

enum Command {
    Register {
        id: String,
        reply: oneshot::Sender<Registration>,
    },
    Unregister {
        id: String,
        generation: u64,
    },
    Deliver {
        client_id: String,
        payload: String,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
    Shutdown,
}

struct Connection {
    generation: u64,
    outbound: mpsc::Sender<String>,
    closed: CancellationToken,
}

impl Connection {
    fn close(self, id: &str, reason: EvictReason) {
        self.closed.cancel();
        match reason {
            EvictReason::Backpressure => {
                warn!(client_id = %id, generation = self.generation, "Outbound queue full, evicting slow client")
            }
            EvictReason::Replaced => {
                info!(client_id = %id, generation = self.generation, "Connection replaced by newer registration")
            }
            EvictReason::WriterGone | EvictReason::Shutdown => {
                debug!(client_id = %id, generation = self.generation, ?reason, "Connection closed")
            }
        }
        // Dropping `outbound` closes the queue; the writer drains and stops.
    }
}

#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<Command>,
}

impl RegistryHandle {
    /// Register `id`. An existing connection with the same id is evicted.
    pub async fn register(&self, id: &str) -> Result<Registration, RegistryError> {
        if id.is_empty() {
            return Err(RegistryError::EmptyId);
        }
        let (reply, rx) = oneshot::channel();
        self.send(Command::Register {
            id: id.to_string(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| RegistryError::Closed)
    }

    /// Remove `id` if its live entry still has `generation`.
    pub async fn unregister(&self, id: &str, generation: u64) {
        let _ = self
            .send(Command::Unregister {
                id: id.to_string(),
                generation,
            })
            .await;
    }

    /// Queue `payload` for the connection registered as `client_id`, if any.
    pub async fn deliver(&self, client_id: &str, payload: String) -> Result<(), RegistryError> {
        self.send(Command::Deliver {
            client_id: client_id.to_string(),
            payload,
        })
        .await
    }

    pub async fn count(&self) -> Result<usize, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Count { reply }).await?;
        rx.await.map_err(|_| RegistryError::Closed)
    }

    /// Close every connection and stop the control task.
    pub async fn shutdown(&self) {
        let _ = self.send(Command::Shutdown).await;
    }

    async fn send(&self, cmd: Command) -> Result<(), RegistryError> {
        self.tx.send(cmd).await.map_err(|_| RegistryError::Closed)
    }
}

pub struct Registry {
    config: RegistryConfig,
    commands: mpsc::Receiver<Command>,
    connections: HashMap<String, Connection>,
    next_generation: u64,
}

impl Registry {
    /// Start the control task.
    pub fn spawn(config: RegistryConfig) -> (RegistryHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.control_capacity.max(1));
        let registry = Registry {
            config,
            commands: rx,
            connections: HashMap::new(),
            next_generation: 0,
        };
        let task = tokio::spawn(registry.run());
        (RegistryHandle { tx }, task)
    }

    async fn run(mut self) {
        debug!(outbound_capacity = self.config.outbound_capacity, "Registry started");

        while let Some(cmd) = self.commands.recv().await {
            match cmd {
                Command::Register { id, reply } => self.register(id, reply),
                Command::Unregister { id, generation } => self.unregister(&id, generation),
                Command::Deliver { client_id, payload } => self.deliver(&client_id, payload),
                Command::Count { reply } => {
                    let _ = reply.send(self.connections.len());
                }
                Command::Shutdown => break,
            }
        }

        let live = self.connections.len();
        for (id, conn) in self.connections.drain() {
            conn.close(&id, EvictReason::Shutdown);
        }
        info!(closed = live, "Registry stopped");
    }

    fn register(&mut self, id: String, reply: oneshot::Sender<Registration>) {
        if let Some(old) = self.connections.remove(&id) {
            old.close(&id, EvictReason::Replaced);
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let (tx, rx) = mpsc::channel(self.config.outbound_capacity.max(1));
        let closed = CancellationToken::new();

        let registration = Registration {
            id: id.clone(),
            generation,
            outbound: rx,
            closed: closed.clone(),
        };
        if reply.send(registration).is_err() {
            // Requester went away before the reply.
            return;
        }

        info!(client_id = %id, generation, "Client registered");
        self.connections.insert(
            id,
            Connection {
                generation,
                outbound: tx,
                closed,
            },
        );
    }

    fn unregister(&mut self, id: &str, generation: u64) {
        let live = self.connections.get(id).map(|conn| conn.generation);
        match live {
            Some(live) if live == generation => {
                if let Some(conn) = self.connections.remove(id) {
                    conn.closed.cancel();
                    info!(client_id = %id, generation, "Client unregistered");
                }
            }
            Some(_) => debug!(client_id = %id, generation, "Ignoring stale unregister"),
            None => {}
        }
    }

    fn deliver(&mut self, client_id: &str, payload: String) {
        let Some(conn) = self.connections.get(client_id) else {
            debug!(client_id = %client_id, "No live connection for event");
            return;
        };

        let reason = match conn.outbound.try_send(payload) {
            Ok(()) => return,
            Err(TrySendError::Full(_)) => EvictReason::Backpressure,
            Err(TrySendError::Closed(_)) => EvictReason::WriterGone,
        };
        if let Some(conn) = self.connections.remove(client_id) {
            conn.close(client_id, reason);
        }
    }
}
