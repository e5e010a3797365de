use tokio::sync::mpsc;

use arena_core::{ConnectionId, Envelope, PlayerInfo};

/// Handle to one live connection's outbound queue.
///
/// The outbound pump holds the receiving end; dropping this handle is what
/// ends the pump and closes the underlying socket.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Envelope>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Envelope>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }
}

/// A player's membership record within a session, independent of whether its
/// connection is currently live. `connection: None` is an invitee that has
/// not joined yet, or a player whose connection was released.
#[derive(Debug)]
pub struct Participant {
    info: PlayerInfo,
    connection: Option<ConnectionHandle>,
}

impl Participant {
    /// An invited player that has not connected yet.
    pub fn invited(info: PlayerInfo) -> Self {
        Self {
            info,
            connection: None,
        }
    }

    /// A player bridged in over a live connection.
    pub fn connected(info: PlayerInfo, connection: ConnectionHandle) -> Self {
        Self {
            info,
            connection: Some(connection),
        }
    }

    pub fn info(&self) -> &PlayerInfo {
        &self.info
    }

    pub fn contact_key(&self) -> &str {
        self.info.contact_key()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn connection_id(&self) -> Option<&ConnectionId> {
        self.connection.as_ref().map(ConnectionHandle::id)
    }

    /// Enqueue an envelope for delivery to this player's connection.
    ///
    /// Never blocks: a full queue drops the envelope with a warning, and a
    /// queue whose pump has already stopped drops it silently. Returns
    /// whether the envelope was accepted.
    pub fn send(&self, envelope: Envelope) -> bool {
        let Some(connection) = &self.connection else {
            return false;
        };
        match connection.tx.try_send(envelope) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(env)) => {
                tracing::warn!(
                    player = %self.info.email,
                    action = ?env.action,
                    "outbound queue full, dropping envelope"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Release the connection. Idempotent. Dropping the sender closes the
    /// outbound queue, which makes the pump close the socket and exit.
    pub fn stop(&mut self) {
        self.connection = None;
    }
}
