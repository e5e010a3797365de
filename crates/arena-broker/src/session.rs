//! The session actor.
//!
//! All mutation of a session's roster and game data happens inside one
//! control loop; everything else talks to it through [`SessionHandle`].
//! Events for one session are processed in strict delivery order, while
//! different sessions run fully in parallel.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

use arena_core::{
    ConnectionId, Decoded, Envelope, GameAction, GameOverPayload, SessionId, StartGamePayload,
};

use crate::config::BrokerConfig;
use crate::participant::Participant;
use crate::registry::RegistryCommand;

const COMMAND_QUEUE: usize = 64;

/// Who a session-side delivery goes to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Audience {
    /// Every connected participant.
    All,
    /// Everyone except the named contact key (relays skip their originator).
    Except(String),
    /// Exactly the named contact key.
    Only(String),
}

/// Events accepted by a session's control loop.
pub enum SessionCommand {
    /// Bridge a player in. Evicts any previous entry under the same contact
    /// key first; the last connection wins.
    Register(Participant),
    /// Drop a player, if the named connection still owns its roster entry.
    Unregister {
        contact: String,
        connection: ConnectionId,
    },
    /// Client-originated traffic, dispatched by action tag.
    Deliver(Envelope),
    /// Enqueue an envelope for a single participant.
    SendTo { contact: String, envelope: Envelope },
    /// Send the current game data to one participant as a state snapshot.
    SendState { contact: String },
}

/// Cheap, clonable handle routing events into one session's control loop.
///
/// Sends against a terminated session are dropped silently; the session is
/// already unreachable through the registry by then.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    id: SessionId,
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub async fn register(&self, participant: Participant) {
        self.command(SessionCommand::Register(participant)).await;
    }

    pub async fn unregister(&self, contact: impl Into<String>, connection: ConnectionId) {
        self.command(SessionCommand::Unregister {
            contact: contact.into(),
            connection,
        })
        .await;
    }

    pub async fn deliver(&self, envelope: Envelope) {
        self.command(SessionCommand::Deliver(envelope)).await;
    }

    pub async fn send_to(&self, contact: impl Into<String>, envelope: Envelope) {
        self.command(SessionCommand::SendTo {
            contact: contact.into(),
            envelope,
        })
        .await;
    }

    pub async fn send_state_to(&self, contact: impl Into<String>) {
        self.command(SessionCommand::SendState {
            contact: contact.into(),
        })
        .await;
    }

    async fn command(&self, command: SessionCommand) {
        if self.tx.send(command).await.is_err() {
            tracing::debug!(session_id = %self.id, "session terminated, command dropped");
        }
    }
}

/// Start a session's control loop. Only the registry mints sessions.
pub(crate) fn spawn(
    id: SessionId,
    registry: mpsc::Sender<RegistryCommand>,
    config: &BrokerConfig,
) -> SessionHandle {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    let session = GameSession {
        id: id.clone(),
        players: HashMap::new(),
        game_data: String::new(),
        registry,
        join_window: config.join_window,
    };
    tokio::spawn(session.run(rx));
    SessionHandle { id, tx }
}

struct GameSession {
    id: SessionId,
    /// Contact key to membership record. Never touched outside the loop.
    players: HashMap<String, Participant>,
    /// Last-known-good opaque game state, replaced whole or not at all.
    game_data: String,
    registry: mpsc::Sender<RegistryCommand>,
    join_window: Duration,
}

impl GameSession {
    async fn run(mut self, mut rx: mpsc::Receiver<SessionCommand>) {
        tracing::info!(session_id = %self.id, "session started");
        let timer = sleep(self.join_window);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(SessionCommand::Register(player)) => self.register(player),
                    Some(SessionCommand::Unregister { contact, connection }) => {
                        self.unregister(&contact, &connection);
                        if self.players.is_empty() {
                            break;
                        }
                    }
                    Some(SessionCommand::Deliver(envelope)) => {
                        if self.deliver(envelope) {
                            timer.as_mut().reset(Instant::now() + self.join_window);
                        }
                    }
                    Some(SessionCommand::SendTo { contact, envelope }) => {
                        self.broadcast(&envelope, &Audience::Only(contact));
                    }
                    Some(SessionCommand::SendState { contact }) => self.send_state(&contact),
                    None => break,
                },
                () = &mut timer => {
                    if self.players.is_empty() {
                        break;
                    }
                    if !self.all_connected() {
                        self.announce_timeout();
                        break;
                    }
                    // A full, connected roster that is merely quiet is not
                    // abandoned.
                    timer.as_mut().reset(Instant::now() + self.join_window);
                }
            }
        }

        self.shutdown().await;
    }

    fn register(&mut self, player: Participant) {
        let contact = player.contact_key().to_owned();
        // Last connection wins: a reconnect evicts the previous entry and
        // closes its connection.
        if let Some(mut old) = self.players.remove(&contact) {
            tracing::debug!(session_id = %self.id, player = %contact, "evicting superseded connection");
            old.stop();
        }
        let info = player.info().clone();
        self.players.insert(contact.clone(), player);
        tracing::info!(session_id = %self.id, player = %contact, "player registered");

        match Envelope::wrap(GameAction::UserConnected, &info, Some(&info)) {
            Ok(envelope) => self.broadcast(&envelope, &Audience::Except(contact)),
            Err(e) => {
                tracing::warn!(session_id = %self.id, kind = e.kind(), "user-connected notice not sent")
            }
        }
    }

    fn unregister(&mut self, contact: &str, connection: &ConnectionId) {
        let Some(current) = self.players.get(contact) else {
            return;
        };
        // A late unregister from an evicted connection must not knock out
        // the replacement that owns this contact key now.
        if current.connection_id().is_some_and(|id| id != connection) {
            tracing::debug!(session_id = %self.id, player = %contact, "stale unregister ignored");
            return;
        }
        let Some(mut removed) = self.players.remove(contact) else {
            return;
        };
        removed.stop();
        tracing::info!(session_id = %self.id, player = %contact, "player unregistered");

        let info = removed.info().clone();
        match Envelope::wrap(GameAction::UserDisconnected, &info, Some(&info)) {
            Ok(envelope) => self.broadcast(&envelope, &Audience::Except(contact.to_owned())),
            Err(e) => {
                tracing::warn!(session_id = %self.id, kind = e.kind(), "user-disconnected notice not sent")
            }
        }
    }

    /// Returns whether the envelope counts as activity that re-arms the
    /// join-window timer.
    fn deliver(&mut self, envelope: Envelope) -> bool {
        match envelope.action {
            GameAction::StartGame => {
                match envelope.decode() {
                    Ok(Some(Decoded::StartGame(payload))) => self.replace_roster(payload),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(
                        session_id = %self.id,
                        kind = e.kind(),
                        "dropping start-game envelope with undecodable payload"
                    ),
                }
                false
            }
            GameAction::UpdateState => {
                self.game_data = envelope.data;
                false
            }
            _ => {
                let audience = match envelope.originator() {
                    Some(originator) => Audience::Except(originator.contact_key().to_owned()),
                    None => Audience::All,
                };
                self.broadcast(&envelope, &audience);
                true
            }
        }
    }

    /// `START_GAME`: the invite list becomes the roster. Invitees already
    /// here with a live connection keep it; everyone else starts out
    /// invited-but-not-connected; players missing from the list are dropped.
    fn replace_roster(&mut self, payload: StartGamePayload) {
        let mut previous = std::mem::take(&mut self.players);
        for invited in payload.players {
            let contact = invited.contact_key().to_owned();
            if contact.is_empty() {
                tracing::debug!(session_id = %self.id, "skipping invite without contact key");
                continue;
            }
            match previous.remove(&contact) {
                Some(existing) if existing.is_connected() => {
                    self.players.insert(contact, existing);
                }
                _ => {
                    self.players.insert(contact, Participant::invited(invited));
                }
            }
        }
        for (contact, mut dropped) in previous {
            tracing::debug!(session_id = %self.id, player = %contact, "dropped from roster by new invite list");
            dropped.stop();
        }
        self.game_data = payload.gamedata;
        tracing::info!(session_id = %self.id, roster = self.players.len(), "game started");
    }

    fn send_state(&self, contact: &str) {
        let Some(player) = self.players.get(contact) else {
            return;
        };
        let envelope = Envelope::raw(GameAction::GameInit, self.game_data.clone(), Some(player.info()));
        self.broadcast(&envelope, &Audience::Only(contact.to_owned()));
    }

    fn broadcast(&self, envelope: &Envelope, audience: &Audience) {
        for (contact, player) in &self.players {
            if !player.is_connected() {
                continue;
            }
            let wanted = match audience {
                Audience::All => true,
                Audience::Except(skipped) => contact != skipped,
                Audience::Only(target) => contact == target,
            };
            if wanted && !player.send(envelope.clone()) {
                tracing::debug!(session_id = %self.id, player = %contact, "broadcast dropped for unreachable player");
            }
        }
    }

    fn all_connected(&self) -> bool {
        self.players.values().all(Participant::is_connected)
    }

    fn announce_timeout(&self) {
        tracing::info!(session_id = %self.id, "join window elapsed with absent players");
        let notice = GameOverPayload {
            message: "timed out waiting for all players to join".into(),
        };
        match Envelope::wrap(GameAction::GameOver, &notice, None) {
            Ok(envelope) => self.broadcast(&envelope, &Audience::All),
            Err(e) => {
                tracing::warn!(session_id = %self.id, kind = e.kind(), "game-over notice not sent")
            }
        }
    }

    async fn shutdown(&mut self) {
        for (_, mut player) in self.players.drain() {
            player.stop();
        }
        if self
            .registry
            .send(RegistryCommand::Deregister {
                id: self.id.clone(),
            })
            .await
            .is_err()
        {
            tracing::debug!(session_id = %self.id, "registry already gone at deregister");
        }
        tracing::info!(session_id = %self.id, "session terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participant::ConnectionHandle;
    use crate::registry::Registry;
    use arena_core::{Game, PlayerInfo};

    fn test_registry(join_window: Duration) -> Registry {
        Registry::spawn(
            Game::new("g1", "Test Game", "for tests"),
            BrokerConfig {
                join_window,
                send_queue: 8,
            },
        )
    }

    fn player(id: u64, email: &str) -> (Participant, mpsc::Receiver<Envelope>, ConnectionId) {
        let (tx, rx) = mpsc::channel(8);
        let conn = ConnectionId::new();
        let participant = Participant::connected(
            PlayerInfo::new(id, format!("player-{id}"), email),
            ConnectionHandle::new(conn.clone(), tx),
        );
        (participant, rx, conn)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    #[tokio::test]
    async fn first_register_sends_no_notice() {
        let registry = test_registry(Duration::from_secs(600));
        let session = registry.create_session().await.unwrap();

        let (alice, mut rx_a, _) = player(1, "alice@example.com");
        session.register(alice).await;
        settle().await;

        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn register_notifies_existing_players_only() {
        let registry = test_registry(Duration::from_secs(600));
        let session = registry.create_session().await.unwrap();

        let (alice, mut rx_a, _) = player(1, "alice@example.com");
        let (bob, mut rx_b, _) = player(2, "bob@example.com");
        session.register(alice).await;
        session.register(bob).await;
        settle().await;

        let notice = rx_a.try_recv().unwrap();
        assert_eq!(notice.action, GameAction::UserConnected);
        assert_eq!(notice.player.email, "bob@example.com");
        assert!(rx_b.try_recv().is_err(), "the joiner hears nothing about itself");
    }

    #[tokio::test]
    async fn unregister_notifies_remaining_and_is_idempotent() {
        let registry = test_registry(Duration::from_secs(600));
        let session = registry.create_session().await.unwrap();

        let (alice, mut rx_a, _) = player(1, "alice@example.com");
        let (bob, _rx_b, conn_b) = player(2, "bob@example.com");
        session.register(alice).await;
        session.register(bob).await;
        settle().await;
        let _ = rx_a.try_recv();

        session.unregister("bob@example.com", conn_b.clone()).await;
        settle().await;
        let notice = rx_a.try_recv().unwrap();
        assert_eq!(notice.action, GameAction::UserDisconnected);
        assert_eq!(notice.player.email, "bob@example.com");

        // Second unregister of the same player is a no-op.
        session.unregister("bob@example.com", conn_b).await;
        settle().await;
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn reconnect_evicts_previous_connection() {
        let registry = test_registry(Duration::from_secs(600));
        let session = registry.create_session().await.unwrap();

        let (alice_old, mut rx_old, _) = player(1, "alice@example.com");
        session.register(alice_old).await;
        settle().await;

        let (alice_new, mut rx_new, _) = player(1, "alice@example.com");
        session.register(alice_new).await;
        settle().await;

        // The superseded connection's queue closes.
        assert!(rx_old.recv().await.is_none());

        // Only the new connection receives session traffic.
        session
            .deliver(Envelope::raw(GameAction::GamePlay, "e2e4", None))
            .await;
        settle().await;
        assert_eq!(rx_new.try_recv().unwrap().data, "e2e4");
    }

    #[tokio::test]
    async fn stale_unregister_does_not_evict_replacement() {
        let registry = test_registry(Duration::from_secs(600));
        let session = registry.create_session().await.unwrap();

        let (alice_old, _rx_old, conn_old) = player(1, "alice@example.com");
        session.register(alice_old).await;
        let (alice_new, mut rx_new, _) = player(1, "alice@example.com");
        session.register(alice_new).await;
        settle().await;

        // The evicted connection's pump reports its own teardown late.
        session.unregister("alice@example.com", conn_old).await;
        settle().await;

        session
            .deliver(Envelope::raw(GameAction::GamePlay, "still here", None))
            .await;
        settle().await;
        assert_eq!(rx_new.try_recv().unwrap().data, "still here");
    }

    #[tokio::test]
    async fn relay_skips_originator() {
        let registry = test_registry(Duration::from_secs(600));
        let session = registry.create_session().await.unwrap();

        let (alice, mut rx_a, _) = player(1, "alice@example.com");
        let (bob, mut rx_b, _) = player(2, "bob@example.com");
        let alice_info = alice.info().clone();
        session.register(alice).await;
        session.register(bob).await;
        settle().await;
        let _ = rx_a.try_recv();

        session
            .deliver(Envelope::raw(GameAction::GamePlay, "e2e4", Some(&alice_info)))
            .await;
        settle().await;

        assert!(rx_a.try_recv().is_err(), "originator must not hear its own move");
        let relayed = rx_b.try_recv().unwrap();
        assert_eq!(relayed.action, GameAction::GamePlay);
        assert_eq!(relayed.data, "e2e4");
        assert_eq!(relayed.player.email, "alice@example.com");
    }

    #[tokio::test]
    async fn anonymous_relay_reaches_everyone() {
        let registry = test_registry(Duration::from_secs(600));
        let session = registry.create_session().await.unwrap();

        let (alice, mut rx_a, _) = player(1, "alice@example.com");
        let (bob, mut rx_b, _) = player(2, "bob@example.com");
        session.register(alice).await;
        session.register(bob).await;
        settle().await;
        let _ = rx_a.try_recv();

        session
            .deliver(Envelope::raw(GameAction::GamePlay, "tick", None))
            .await;
        settle().await;

        assert_eq!(rx_a.try_recv().unwrap().data, "tick");
        assert_eq!(rx_b.try_recv().unwrap().data, "tick");
    }

    #[tokio::test]
    async fn start_game_replaces_roster_and_state() {
        let registry = test_registry(Duration::from_secs(600));
        let session = registry.create_session().await.unwrap();

        let (alice, mut rx_a, _) = player(1, "alice@example.com");
        let (mallory, mut rx_m, _) = player(3, "mallory@example.com");
        let alice_info = alice.info().clone();
        session.register(alice).await;
        session.register(mallory).await;
        settle().await;
        let _ = rx_a.try_recv();

        // Alice starts a game inviting herself and Carol; Mallory is out.
        let invite = StartGamePayload {
            players: vec![
                alice_info.clone(),
                PlayerInfo::new(4, "Carol", "carol@example.com"),
            ],
            gamedata: "fresh board".into(),
        };
        let envelope = Envelope::wrap(GameAction::StartGame, &invite, Some(&alice_info)).unwrap();
        session.deliver(envelope).await;
        settle().await;

        // Mallory's connection is released.
        assert!(rx_m.recv().await.is_none());

        // Alice keeps her live connection and can pull the fresh state.
        session.send_state_to("alice@example.com").await;
        settle().await;
        let snapshot = rx_a.try_recv().unwrap();
        assert_eq!(snapshot.action, GameAction::GameInit);
        assert_eq!(snapshot.data, "fresh board");

        // Carol is invited but not connected, so a relay reaches only Alice.
        session
            .deliver(Envelope::raw(GameAction::GamePlay, "ping", None))
            .await;
        settle().await;
        assert_eq!(rx_a.try_recv().unwrap().data, "ping");
    }

    #[tokio::test]
    async fn update_state_replaces_data_without_broadcast() {
        let registry = test_registry(Duration::from_secs(600));
        let session = registry.create_session().await.unwrap();

        let (alice, mut rx_a, _) = player(1, "alice@example.com");
        session.register(alice).await;
        settle().await;

        session
            .deliver(Envelope::raw(GameAction::UpdateState, "turn 2", None))
            .await;
        settle().await;
        assert!(rx_a.try_recv().is_err(), "state updates are not relayed");

        session.send_state_to("alice@example.com").await;
        settle().await;
        assert_eq!(rx_a.try_recv().unwrap().data, "turn 2");
    }

    #[tokio::test]
    async fn malformed_start_game_payload_is_dropped() {
        let registry = test_registry(Duration::from_secs(600));
        let session = registry.create_session().await.unwrap();

        let (alice, mut rx_a, _) = player(1, "alice@example.com");
        let alice_info = alice.info().clone();
        session.register(alice).await;
        settle().await;

        session
            .deliver(Envelope::raw(GameAction::StartGame, "not json", Some(&alice_info)))
            .await;
        settle().await;

        // Session survives and keeps serving the existing roster.
        session
            .deliver(Envelope::raw(GameAction::GamePlay, "alive", None))
            .await;
        settle().await;
        assert_eq!(rx_a.try_recv().unwrap().data, "alive");
    }

    #[tokio::test]
    async fn emptied_session_terminates_and_deregisters() {
        let registry = test_registry(Duration::from_secs(600));
        let session = registry.create_session().await.unwrap();
        let id = session.id().clone();

        let (alice, _rx_a, conn_a) = player(1, "alice@example.com");
        session.register(alice).await;
        settle().await;
        assert!(registry.get_session(&id).await.is_some());

        session.unregister("alice@example.com", conn_a).await;
        settle().await;
        assert!(registry.get_session(&id).await.is_none(), "no orphaned sessions");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_with_absent_invitee_announces_game_over() {
        let window = Duration::from_secs(60);
        let registry = test_registry(window);
        let session = registry.create_session().await.unwrap();
        let id = session.id().clone();

        let (alice, mut rx_a, _) = player(1, "alice@example.com");
        let alice_info = alice.info().clone();
        session.register(alice).await;

        let invite = StartGamePayload {
            players: vec![
                alice_info.clone(),
                PlayerInfo::new(2, "Bob", "bob@example.com"),
            ],
            gamedata: String::new(),
        };
        session
            .deliver(Envelope::wrap(GameAction::StartGame, &invite, Some(&alice_info)).unwrap())
            .await;
        settle().await;

        // Bob never joins; the join window elapses.
        tokio::time::sleep(window + Duration::from_secs(1)).await;
        settle().await;

        let notice = rx_a.try_recv().unwrap();
        assert_eq!(notice.action, GameAction::GameOver);
        assert!(notice.data.contains("timed out"));
        assert!(rx_a.try_recv().is_err(), "exactly one game-over notice");
        assert!(registry.get_session(&id).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_with_full_roster_rearms() {
        let window = Duration::from_secs(60);
        let registry = test_registry(window);
        let session = registry.create_session().await.unwrap();
        let id = session.id().clone();

        let (alice, mut rx_a, _) = player(1, "alice@example.com");
        let (bob, _rx_b, _) = player(2, "bob@example.com");
        session.register(alice).await;
        session.register(bob).await;
        settle().await;
        let _ = rx_a.try_recv();

        // Quiet but fully connected: several windows pass without traffic.
        tokio::time::sleep(window * 3).await;
        settle().await;

        assert!(rx_a.try_recv().is_err(), "no game-over for a connected roster");
        assert!(registry.get_session(&id).await.is_some());
    }
}
