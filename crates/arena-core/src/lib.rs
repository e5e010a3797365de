pub mod envelope;
pub mod errors;
pub mod game;
pub mod ids;

pub use envelope::{
    Decoded, Envelope, GameAction, GameOverPayload, PlayerInfo, SessionCreatedPayload,
    StartGamePayload,
};
pub use errors::BrokerError;
pub use game::Game;
pub use ids::{ConnectionId, SessionId};
