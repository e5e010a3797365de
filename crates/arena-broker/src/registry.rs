//! The session registry.
//!
//! A process-wide directory mapping session identifiers to running sessions.
//! The map is owned by a single control loop; creation, lookup, and
//! deregistration are serialized through it, so a lookup can never race a
//! concurrent create or teardown.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use arena_core::{BrokerError, Game, SessionId};

use crate::config::BrokerConfig;
use crate::session::{self, SessionHandle};

const COMMAND_QUEUE: usize = 64;

pub(crate) enum RegistryCommand {
    Create {
        reply: oneshot::Sender<SessionHandle>,
    },
    Get {
        id: SessionId,
        reply: oneshot::Sender<Option<SessionHandle>>,
    },
    /// Sent by a session entering its terminated state. The only path that
    /// removes a registry entry.
    Deregister { id: SessionId },
}

/// Clonable handle to the registry control loop, plus the one static game
/// descriptor this broker hosts.
#[derive(Clone, Debug)]
pub struct Registry {
    tx: mpsc::Sender<RegistryCommand>,
    game: Arc<Game>,
}

impl Registry {
    /// Start the registry control loop and return a handle to it. The loop
    /// is running before any handle exists, so no request can be sent into
    /// a registry that was never launched.
    pub fn spawn(game: Game, config: BrokerConfig) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let inner = RegistryLoop {
            sessions: HashMap::new(),
            config,
            tx: tx.clone(),
        };
        tokio::spawn(inner.run(rx));
        Self {
            tx,
            game: Arc::new(game),
        }
    }

    /// Mint a session with a fresh identifier and start its control loop.
    pub async fn create_session(&self) -> Result<SessionHandle, BrokerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RegistryCommand::Create { reply })
            .await
            .map_err(|_| BrokerError::RegistryClosed)?;
        rx.await.map_err(|_| BrokerError::RegistryClosed)
    }

    /// Look a session up by identifier. Serialized with concurrent create
    /// and deregister traffic through the control loop.
    pub async fn get_session(&self, id: &SessionId) -> Option<SessionHandle> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(RegistryCommand::Get {
                id: id.clone(),
                reply,
            })
            .await
            .is_err()
        {
            return None;
        }
        rx.await.ok().flatten()
    }

    /// The hosted game's descriptor.
    pub fn game(&self) -> &Game {
        &self.game
    }

    /// Read-only lookup against the static descriptor.
    pub fn get_game(&self, id: &str) -> Result<Game, BrokerError> {
        if self.game.id == id {
            Ok((*self.game).clone())
        } else {
            Err(BrokerError::UnsupportedGame(id.to_owned()))
        }
    }
}

struct RegistryLoop {
    sessions: HashMap<SessionId, SessionHandle>,
    config: BrokerConfig,
    /// Handed to each session so it can deregister itself on termination.
    tx: mpsc::Sender<RegistryCommand>,
}

impl RegistryLoop {
    async fn run(mut self, mut rx: mpsc::Receiver<RegistryCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                RegistryCommand::Create { reply } => {
                    let id = SessionId::new();
                    let handle = session::spawn(id.clone(), self.tx.clone(), &self.config);
                    self.sessions.insert(id.clone(), handle.clone());
                    tracing::info!(session_id = %id, active = self.sessions.len(), "session registered");
                    if reply.send(handle).is_err() {
                        // Caller vanished mid-create; the session expires on
                        // its own join window.
                        tracing::debug!(session_id = %id, "create reply dropped");
                    }
                }
                RegistryCommand::Get { id, reply } => {
                    let _ = reply.send(self.sessions.get(&id).cloned());
                }
                RegistryCommand::Deregister { id } => {
                    if self.sessions.remove(&id).is_some() {
                        tracing::info!(session_id = %id, active = self.sessions.len(), "session deregistered");
                    }
                }
            }
        }
    }
}
