//! The connection bridge.
//!
//! Adapts one upgraded WebSocket into the two pumps a session consumes: an
//! inbound pump decoding frames into `Deliver` events, and an outbound pump
//! draining the player's private queue onto the socket. A failure on either
//! side resolves to that player's removal and nothing more.

use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use arena_broker::{ConnectionHandle, Participant, SessionHandle};
use arena_core::{ConnectionId, Envelope, PlayerInfo};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// What a freshly bridged player is greeted with after registration.
pub enum Greeting {
    /// A ready-made envelope for the creator of a session.
    Envelope(Envelope),
    /// The authoritative game-state snapshot, for a late joiner.
    StateSnapshot,
}

/// Bridge one connection into a session and pump it until either side ends.
///
/// Registers the player (evicting any previous connection under the same
/// contact key), delivers the greeting, runs both pumps, and reports
/// Unregister once either pump finishes.
pub async fn bridge(
    socket: WebSocket,
    info: PlayerInfo,
    session: SessionHandle,
    greeting: Greeting,
    send_queue: usize,
) {
    let connection_id = ConnectionId::new();
    let contact = info.email.clone();
    let (tx, rx) = mpsc::channel(send_queue);

    let participant = Participant::connected(
        info.clone(),
        ConnectionHandle::new(connection_id.clone(), tx),
    );
    session.register(participant).await;

    match greeting {
        Greeting::Envelope(envelope) => session.send_to(contact.clone(), envelope).await,
        Greeting::StateSnapshot => session.send_state_to(contact.clone()).await,
    }

    let (ws_tx, ws_rx) = socket.split();
    let writer = tokio::spawn(outbound_pump(ws_tx, rx));
    let reader = tokio::spawn(inbound_pump(ws_rx, info, session.clone()));

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    session.unregister(contact.clone(), connection_id).await;
    tracing::info!(session_id = %session.id(), player = %contact, "connection bridge closed");
}

/// Drain the player's private queue onto the socket, pinging on an interval.
/// A closed queue is the one and only termination signal: the session has
/// released this connection, so close the socket and exit.
async fn outbound_pump(mut ws_tx: SplitSink<WebSocket, WsMessage>, mut rx: mpsc::Receiver<Envelope>) {
    let mut ping = tokio::time::interval(HEARTBEAT_INTERVAL);
    ping.tick().await; // consume first immediate tick

    loop {
        tokio::select! {
            envelope = rx.recv() => match envelope {
                Some(envelope) => match serde_json::to_string(&envelope) {
                    Ok(text) => {
                        if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "outbound envelope not serializable"),
                },
                None => break,
            },
            _ = ping.tick() => {
                if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = ws_tx.close().await;
}

/// Decode one envelope per text frame, stamp it with this player's verified
/// identity, and hand it to the session. The only path client traffic enters
/// a session. An undecodable frame or a closed/failed read ends the loop,
/// which the bridge turns into an Unregister.
async fn inbound_pump(mut ws_rx: SplitStream<WebSocket>, info: PlayerInfo, session: SessionHandle) {
    while let Some(Ok(message)) = ws_rx.next().await {
        match message {
            WsMessage::Text(text) => match serde_json::from_str::<Envelope>(text.as_str()) {
                Ok(mut envelope) => {
                    envelope.player = info.clone();
                    session.deliver(envelope).await;
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %session.id(),
                        player = %info.email,
                        error = %e,
                        "undecodable frame, dropping connection"
                    );
                    break;
                }
            },
            WsMessage::Close(_) => break,
            // axum answers pings automatically; pongs need no bookkeeping.
            WsMessage::Ping(_) | WsMessage::Pong(_) => {}
            _ => {}
        }
    }
}
