//! The wire envelope exchanged between connections and a session.
//!
//! Every WebSocket text frame carries exactly one envelope:
//! `{ "action": <tag>, "data": <opaque string>, "player": {id,name,email} }`.
//! The `data` payload stays an opaque string at this layer; only action tags
//! with a known payload shape decode into something typed.

use serde::{Deserialize, Serialize};

use crate::errors::BrokerError;
use crate::game::Game;
use crate::ids::SessionId;

/// Action tag of a wire envelope. The tags keep their historical wire
/// spelling; an inbound frame with any other tag fails to parse.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum GameAction {
    #[serde(rename = "START_GAME")]
    StartGame,
    #[serde(rename = "GAME_PLAY")]
    GamePlay,
    #[serde(rename = "UPDATE_GAME_STATE")]
    UpdateState,
    #[serde(rename = "ON_GAME_SESSION_CREATED")]
    SessionCreated,
    #[serde(rename = "ON_GAME_OVER")]
    GameOver,
    #[serde(rename = "ON_GAME_INIT")]
    GameInit,
    #[serde(rename = "ON_USER_CONNECTED")]
    UserConnected,
    #[serde(rename = "ON_USER_DISCONNECTED")]
    UserDisconnected,
}

/// Identity of a player as it appears on the wire.
///
/// Handed to the broker by the authentication layer and trusted as-is. The
/// email doubles as the contact key: unique within a session, stable across
/// reconnects.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

impl PlayerInfo {
    pub fn new(id: u64, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            email: email.into(),
        }
    }

    /// The session-scoped deduplication key.
    pub fn contact_key(&self) -> &str {
        &self.email
    }
}

/// Payload of `START_GAME`: the invite roster plus the opaque initial state.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StartGamePayload {
    #[serde(default)]
    pub players: Vec<PlayerInfo>,
    #[serde(default)]
    pub gamedata: String,
}

/// Payload of `ON_GAME_SESSION_CREATED`, sent to the creator of a session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionCreatedPayload {
    pub game: Game,
    #[serde(rename = "id")]
    pub session_id: SessionId,
}

/// Payload of `ON_GAME_OVER`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameOverPayload {
    pub message: String,
}

/// Typed view of an envelope payload, for the action tags that have one.
#[derive(Clone, Debug)]
pub enum Decoded {
    StartGame(StartGamePayload),
    SessionCreated(SessionCreatedPayload),
}

/// One self-describing message unit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub action: GameAction,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub player: PlayerInfo,
}

impl Envelope {
    /// Serialize `payload` into a new envelope.
    ///
    /// `originator` is the player the message is attributed to; `None`
    /// produces the anonymous envelope used for session-originated notices.
    pub fn wrap<T: Serialize>(
        action: GameAction,
        payload: &T,
        originator: Option<&PlayerInfo>,
    ) -> Result<Self, BrokerError> {
        let data = serde_json::to_string(payload)
            .map_err(|e| BrokerError::SerializationFailed(e.to_string()))?;
        Ok(Self::raw(action, data, originator))
    }

    /// Build an envelope around a payload that is already in wire form.
    pub fn raw(
        action: GameAction,
        data: impl Into<String>,
        originator: Option<&PlayerInfo>,
    ) -> Self {
        Self {
            action,
            data: data.into(),
            player: originator.cloned().unwrap_or_default(),
        }
    }

    /// The originating player, or `None` when the envelope carries the
    /// anonymous identity (a contact key is required to attribute it).
    pub fn originator(&self) -> Option<&PlayerInfo> {
        if self.player.email.is_empty() {
            None
        } else {
            Some(&self.player)
        }
    }

    /// Decode the payload according to the action tag.
    ///
    /// `Ok(None)` means the tag has no defined payload shape — the caller
    /// gets no further structured data, which is not an error. A malformed
    /// payload under a tag that does have a shape is `SerializationFailed`.
    pub fn decode(&self) -> Result<Option<Decoded>, BrokerError> {
        match self.action {
            GameAction::StartGame => {
                let payload: StartGamePayload = self.decode_data()?;
                Ok(Some(Decoded::StartGame(payload)))
            }
            GameAction::SessionCreated => {
                let payload: SessionCreatedPayload = self.decode_data()?;
                Ok(Some(Decoded::SessionCreated(payload)))
            }
            _ => Ok(None),
        }
    }

    fn decode_data<T: for<'de> Deserialize<'de>>(&self) -> Result<T, BrokerError> {
        serde_json::from_str(&self.data).map_err(|e| BrokerError::SerializationFailed(e.to_string()))
    }
}
