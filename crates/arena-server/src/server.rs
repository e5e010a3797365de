//! HTTP/WebSocket entry points.
//!
//! Three game routes — info lookup, create-and-bridge, join-and-bridge —
//! plus a health probe. Everything past the upgrade is owned by the broker:
//! the handlers only authenticate, look up, and hand the socket to the
//! connection bridge.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use arena_broker::{BrokerConfig, Registry};
use arena_core::{Envelope, Game, GameAction, SessionCreatedPayload, SessionId};

use crate::identity::identity_from_headers;
use crate::ws::{self, Greeting};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Port to bind; 0 picks a free one.
    pub port: u16,
    /// Depth of each player's outbound envelope queue.
    pub send_queue: usize,
    /// Seconds a session waits for its roster to fully connect.
    pub join_window_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            send_queue: 256,
            join_window_secs: 30 * 60,
        }
    }
}

impl ServerConfig {
    fn broker(&self) -> BrokerConfig {
        BrokerConfig {
            join_window: std::time::Duration::from_secs(self.join_window_secs),
            send_queue: self.send_queue,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub send_queue: usize,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/games/gameinfo", get(game_info))
        .route("/games/startnewgame", get(start_game))
        .route("/games/joingame/{session_id}", get(join_game))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Start the registry and the server. Returns a handle that keeps the
/// listener task alive.
pub async fn start(config: ServerConfig, game: Game) -> Result<ServerHandle, std::io::Error> {
    let registry = Registry::spawn(game, config.broker());
    let state = AppState {
        registry: registry.clone(),
        send_queue: config.send_queue,
    };

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "arena server started");

    let server = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        registry,
        _server: server,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    pub registry: Registry,
    _server: tokio::task::JoinHandle<()>,
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

#[derive(Debug, serde::Deserialize)]
struct GameQuery {
    #[serde(default)]
    gameid: String,
}

/// `GET /games/gameinfo?gameid=…` — descriptor lookup, no session involved.
async fn game_info(State(state): State<AppState>, Query(query): Query<GameQuery>) -> Response {
    match state.registry.get_game(&query.gameid) {
        Ok(game) => Json(serde_json::json!({ "status": true, "message": game })).into_response(),
        Err(e) => {
            tracing::debug!(kind = e.kind(), gameid = %query.gameid, "game info rejected");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

/// `GET /games/startnewgame?gameid=…` — upgrade, mint a session, bridge the
/// caller in as its first player, and greet them with the session-created
/// envelope.
async fn start_game(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<GameQuery>,
    headers: HeaderMap,
) -> Response {
    let info = match identity_from_headers(&headers) {
        Ok(info) => info,
        Err(status) => return status.into_response(),
    };
    // Validate the game id before committing to the upgrade.
    let game = match state.registry.get_game(&query.gameid) {
        Ok(game) => game,
        Err(e) => {
            tracing::debug!(kind = e.kind(), gameid = %query.gameid, "session creation rejected");
            return StatusCode::FORBIDDEN.into_response();
        }
    };

    ws.on_upgrade(move |socket| async move {
        let session = match state.registry.create_session().await {
            Ok(session) => session,
            Err(e) => {
                tracing::error!(kind = e.kind(), "session creation failed");
                return;
            }
        };
        let payload = SessionCreatedPayload {
            game,
            session_id: session.id().clone(),
        };
        let greeting = match Envelope::wrap(GameAction::SessionCreated, &payload, Some(&info)) {
            Ok(envelope) => Greeting::Envelope(envelope),
            Err(e) => {
                tracing::warn!(kind = e.kind(), "session-created notice not sent");
                Greeting::StateSnapshot
            }
        };
        ws::bridge(socket, info, session, greeting, state.send_queue).await;
    })
}

/// `GET /games/joingame/{session_id}` — look the session up, upgrade, bridge
/// the joiner in, and greet them with the current state snapshot.
async fn join_game(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let info = match identity_from_headers(&headers) {
        Ok(info) => info,
        Err(status) => return status.into_response(),
    };
    // Look up before upgrading: a dead identifier is a 404, not a socket.
    let id = SessionId::from_raw(session_id);
    let Some(session) = state.registry.get_session(&id).await else {
        tracing::debug!(session_id = %id, "join rejected, no such session");
        return StatusCode::NOT_FOUND.into_response();
    };

    ws.on_upgrade(move |socket| {
        ws::bridge(socket, info, session, Greeting::StateSnapshot, state.send_queue)
    })
}
