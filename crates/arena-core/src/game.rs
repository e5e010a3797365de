use serde::{Deserialize, Serialize};

/// Static descriptor of the single game this broker hosts.
///
/// Loaded once at process start; read-only configuration afterwards.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub id: String,
    pub name: String,
    pub description: String,
}

impl Game {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
        }
    }

    /// Load the descriptor from `GAME_ID` / `GAME_NAME` / `GAME_DESCRIPTION`,
    /// falling back to a development default for unset variables.
    pub fn from_env() -> Self {
        Self {
            id: std::env::var("GAME_ID").unwrap_or_else(|_| "tictactoe".into()),
            name: std::env::var("GAME_NAME").unwrap_or_else(|_| "Tic Tac Toe".into()),
            description: std::env::var("GAME_DESCRIPTION")
                .unwrap_or_else(|_| "Three in a row wins".into()),
        }
    }
}
