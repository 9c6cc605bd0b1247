//! Registry owner and broadcast engine.
//!
//! A single task owns the [`Registry`] and applies one [`Command`] at a time,
//! so every register, unregister and broadcast sees a consistent registry and
//! no lock is needed. Sessions talk to it through a cloneable [`HubHandle`].
//!
//! Delivery is best effort: frames are pushed onto each recipient's bounded
//! outbound queue with `try_send`. A full or closed queue only costs that
//! recipient the frame; it is never reported to the sender.

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::registry::{ConnId, Registry, RegistryError};
use crate::protocol::ChatMessage;

/// Outbound queue of one connection, drained by its writer task.
pub type Peer = mpsc::Sender<Bytes>;

const COMMAND_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 64;

/// Registry changes, for orchestration outside the protocol core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    UserJoined(String),
    UserLeft(String),
    /// The last registered user left.
    RegistryEmpty,
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("registry task has stopped")]
    Closed,
}

#[derive(Debug)]
enum Command {
    Register {
        conn: ConnId,
        username: String,
        peer: Peer,
        reply: oneshot::Sender<Result<String, HubError>>,
    },
    Message {
        conn: ConnId,
        body: String,
    },
    Unregister {
        conn: ConnId,
        reply: oneshot::Sender<Option<String>>,
    },
    Usernames {
        reply: oneshot::Sender<Vec<String>>,
    },
}

#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<ServerEvent>,
}

impl HubHandle {
    /// Registers `conn` under a unique name derived from `username`.
    ///
    /// Everyone already registered is told about the newcomer before it is
    /// inserted; the newcomer then receives the Welcome frame on `peer`.
    pub async fn register(
        &self,
        conn: ConnId,
        username: String,
        peer: Peer,
    ) -> Result<String, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Register {
            conn,
            username,
            peer,
            reply,
        })
        .await?;
        rx.await.map_err(|_| HubError::Closed)?
    }

    /// Relays `body` from `conn` to every other registered connection.
    pub async fn broadcast_message(&self, conn: ConnId, body: String) -> Result<(), HubError> {
        self.send(Command::Message { conn, body }).await
    }

    /// Removes `conn`, telling the remaining users. Returns the name it held,
    /// or `None` if it was never registered.
    pub async fn unregister(&self, conn: ConnId) -> Result<Option<String>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Unregister { conn, reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Names currently registered, in no particular order.
    pub async fn usernames(&self) -> Result<Vec<String>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Usernames { reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    async fn send(&self, command: Command) -> Result<(), HubError> {
        self.commands.send(command).await.map_err(|_| HubError::Closed)
    }
}

pub struct Hub {
    server_name: String,
    registry: Registry<Peer>,
    events: broadcast::Sender<ServerEvent>,
}

impl Hub {
    /// Starts the registry task. It stops once every handle is dropped.
    pub fn spawn(server_name: impl Into<String>) -> HubHandle {
        let (commands, rx) = mpsc::channel(COMMAND_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let hub = Hub {
            server_name: server_name.into(),
            registry: Registry::new(),
            events: events.clone(),
        };
        tokio::spawn(hub.run(rx));
        HubHandle { commands, events }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Register {
                    conn,
                    username,
                    peer,
                    reply,
                } => {
                    let _ = reply.send(self.register(conn, &username, peer));
                }
                Command::Message { conn, body } => self.broadcast_message(conn, body),
                Command::Unregister { conn, reply } => {
                    let _ = reply.send(self.unregister(conn));
                }
                Command::Usernames { reply } => {
                    let _ = reply.send(self.registry.usernames().map(str::to_owned).collect());
                }
            }
        }
        debug!("Registry task stopped");
    }

    fn register(&mut self, conn: ConnId, requested: &str, peer: Peer) -> Result<String, HubError> {
        if self.registry.contains(conn) {
            return Err(RegistryError::ConnectionTaken(conn).into());
        }
        let assigned = self.registry.assign_name(requested);

        self.broadcast_all(&ChatMessage::UserJoined {
            username: assigned.clone(),
        });
        self.registry.insert(conn, assigned.clone(), peer)?;

        let welcome = ChatMessage::Welcome {
            server_name: self.server_name.clone(),
        };
        if let Some(peer) = self.registry.peer(conn) {
            deliver(conn, peer, Bytes::from(welcome.encode()));
        }

        info!(%conn, requested, assigned = %assigned, "User registered");
        let _ = self.events.send(ServerEvent::UserJoined(assigned.clone()));
        Ok(assigned)
    }

    fn unregister(&mut self, conn: ConnId) -> Option<String> {
        let (username, _peer) = self.registry.remove(conn)?;

        self.broadcast_all(&ChatMessage::UserLeft {
            username: username.clone(),
        });

        info!(%conn, username = %username, remaining = self.registry.len(), "User left");
        let _ = self.events.send(ServerEvent::UserLeft(username.clone()));
        if self.registry.is_empty() {
            let _ = self.events.send(ServerEvent::RegistryEmpty);
        }
        Some(username)
    }

    fn broadcast_message(&self, sender: ConnId, body: String) {
        let Some(username) = self.registry.username_of(sender) else {
            warn!(conn = %sender, "Dropping message from unregistered connection");
            return;
        };
        let frame = Bytes::from(
            ChatMessage::Broadcast {
                username: username.to_string(),
                body,
            }
            .encode(),
        );
        debug!(conn = %sender, "Broadcasting: {}", frame.escape_ascii());
        for (conn, peer) in self.registry.peers() {
            if conn != sender {
                deliver(conn, peer, frame.clone());
            }
        }
    }

    fn broadcast_all(&self, message: &ChatMessage) {
        let frame = Bytes::from(message.encode());
        for (conn, peer) in self.registry.peers() {
            deliver(conn, peer, frame.clone());
        }
    }
}

fn deliver(conn: ConnId, peer: &Peer, frame: Bytes) {
    match peer.try_send(frame) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(%conn, "Outbound queue full, dropping frame");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(%conn, "Outbound queue closed, skipping");
        }
    }
}
