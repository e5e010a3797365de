/// Error taxonomy of the broker.
///
/// Failures local to one player's connection (`SerializationFailed`,
/// `ConnectionLost`) resolve to that player's removal and never terminate a
/// session. Lookup failures (`UnsupportedGame`, `SessionNotFound`) surface to
/// the HTTP caller as a rejection.
#[derive(Clone, Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("envelope payload not serializable: {0}")]
    SerializationFailed(String),

    #[error("game {0} is not supported")]
    UnsupportedGame(String),

    #[error("no such game session: {0}")]
    SessionNotFound(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The registry control loop is no longer running. Cannot happen before
    /// shutdown: the loop is started before any handle to it exists.
    #[error("registry is not running")]
    RegistryClosed,
}

impl BrokerError {
    /// Short classification string for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SerializationFailed(_) => "serialization_failed",
            Self::UnsupportedGame(_) => "unsupported_game",
            Self::SessionNotFound(_) => "session_not_found",
            Self::ConnectionLost(_) => "connection_lost",
            Self::RegistryClosed => "registry_closed",
        }
    }

    /// True when the failure is contained to a single connection and must
    /// not propagate past that player's removal.
    pub fn is_connection_local(&self) -> bool {
        matches!(self, Self::SerializationFailed(_) | Self::ConnectionLost(_))
    }
}
