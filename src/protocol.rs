//! Applies game messages to the local store and builds the ones we send.

mod movement;

use std::{collections::HashMap, sync::Arc};

use tracing::{debug, warn};

use crate::{
    chat::{ChatLine, prepare_text},
    config::{GameConfig, MAX_CHAT_LENGTH},
    ids::random_id,
    message::GameMessage,
    player::{Player, PlayerId, PlayerSnapshot},
    preset::CharacterPreset,
    room::GameEvent,
    state::{GameStore, StateUpdate},
};

pub use movement::Interpolation;

/// What handling an inbound message asks the caller to do.
#[derive(Debug, Default, PartialEq)]
pub struct Reaction {
    /// Messages to send back to the room.
    pub replies: Vec<GameMessage>,
    /// Notifications for the UI.
    pub events: Vec<GameEvent>,
}

impl Reaction {
    fn reply(message: GameMessage) -> Self {
        Self {
            replies: vec![message],
            events: vec![],
        }
    }

    fn event(event: GameEvent) -> Self {
        Self {
            replies: vec![],
            events: vec![event],
        }
    }
}

/// Result of a local movement intent.
#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome {
    /// Blocked by the scene; nothing changed and nothing is sent.
    Rejected,
    /// Position updated. Carries the broadcast unless it was throttled.
    Moved(Option<GameMessage>),
}

pub struct ProtocolHandler {
    config: GameConfig,
    interpolations: HashMap<PlayerId, Interpolation>,
    last_movement_sent: Option<u64>,
    /// A throttled local move that still has to go out.
    movement_pending: bool,
}

impl ProtocolHandler {
    pub fn new(config: GameConfig) -> Self {
        Self {
            config,
            interpolations: HashMap::new(),
            last_movement_sent: None,
            movement_pending: false,
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    fn movement_interval_ms(&self) -> u64 {
        self.config.movement_interval.as_millis() as u64
    }

    /// Apply one inbound message at local time `now` (ms).
    pub fn handle(&mut self, store: &mut GameStore, message: GameMessage, now: u64) -> Reaction {
        match message {
            GameMessage::PlayerJoined { id, player } => self.on_player_joined(store, id, player, now),
            GameMessage::RequestPlayers { id } => {
                debug!(from = %id, "player list requested");
                Reaction::reply(GameMessage::PlayerList {
                    players: roster(store, now),
                })
            }
            GameMessage::PlayerList { players } => self.on_player_list(store, players, now),
            GameMessage::PlayerSync { player } => self.on_player_sync(store, player, now),
            // The timestamp is on the sender's clock, which is not ours.
            // Glides start when the message arrives.
            GameMessage::Movement {
                player_id, x, y, ..
            } => {
                self.on_movement(store, player_id, (x, y), now);
                Reaction::default()
            }
            GameMessage::Chat { player_id, text } => self.on_chat(store, player_id, text, now),
            GameMessage::AvatarUpdate { player_id, avatar } => {
                if store.state().is_local(&player_id) {
                    return Reaction::default();
                }
                let mut players = store.state().players.clone();
                if let Some(player) = players.get_mut(&player_id) {
                    player.avatar = Some(avatar);
                    player.last_seen = now;
                    store.update(StateUpdate::players(players));
                }
                Reaction::default()
            }
            GameMessage::PlayerLeft { player_id } => {
                if store.state().is_local(&player_id) {
                    warn!(player = %player_id, "peer reported our own id as left");
                    return Reaction::default();
                }
                self.remove_player(store, &player_id)
            }
        }
    }

    fn on_player_joined(
        &mut self,
        store: &mut GameStore,
        id: PlayerId,
        mut snapshot: PlayerSnapshot,
        now: u64,
    ) -> Reaction {
        if store.state().is_local(&id) {
            warn!(player = %id, "remote player joined with our own id");
            return Reaction::default();
        }
        if id.is_empty() || store.state().players.contains_key(&id) {
            return Reaction::default();
        }
        snapshot.id = id.clone();
        let mut players = store.state().players.clone();
        players.upsert(Player::from_snapshot(snapshot, now));
        store.update(StateUpdate::players(players));
        debug!(player = %id, "player joined");

        let mut reaction = Reaction::event(GameEvent::PlayerJoined(id));
        if let Some(local) = store.state().local_player() {
            reaction.replies.push(GameMessage::PlayerSync {
                player: local.snapshot(now),
            });
        }
        reaction
    }

    fn on_player_list(
        &mut self,
        store: &mut GameStore,
        snapshots: Vec<PlayerSnapshot>,
        now: u64,
    ) -> Reaction {
        let mut players = store.state().players.clone();
        let mut reaction = Reaction::default();
        for snapshot in snapshots {
            let id = snapshot.id.clone();
            if id.is_empty() || store.state().is_local(&id) || players.contains_key(&id) {
                continue;
            }
            players.upsert(Player::from_snapshot(snapshot, now));
            reaction.events.push(GameEvent::PlayerJoined(id));
        }
        if !reaction.events.is_empty() {
            store.update(StateUpdate::players(players));
        }
        reaction
    }

    fn on_player_sync(&mut self, store: &mut GameStore, snapshot: PlayerSnapshot, now: u64) -> Reaction {
        let id = snapshot.id.clone();
        if id.is_empty() {
            warn!("player_sync without a player id");
            return Reaction::default();
        }
        if store.state().is_local(&id) {
            warn!(player = %id, "ignoring remote sync of our own id");
            return Reaction::default();
        }
        let mut players = store.state().players.clone();
        let reaction = match players.get_mut(&id) {
            Some(player) => {
                player.merge(snapshot);
                player.last_seen = now;
                Reaction::default()
            }
            None => {
                players.upsert(Player::from_snapshot(snapshot, now));
                Reaction::event(GameEvent::PlayerJoined(id))
            }
        };
        store.update(StateUpdate::players(players));
        reaction
    }

    fn on_movement(&mut self, store: &mut GameStore, player_id: PlayerId, to: (f64, f64), now: u64) {
        let state = store.state();
        if state.is_local(&player_id) {
            return;
        }
        let Some(player) = state.player(&player_id) else {
            debug!(player = %player_id, "movement from unknown player");
            return;
        };
        let glide = Interpolation::new((player.x, player.y), to, now, self.movement_interval_ms());
        self.interpolations.insert(player_id, glide);
        self.advance(store, now);
    }

    fn on_chat(&mut self, store: &mut GameStore, player_id: PlayerId, text: String, now: u64) -> Reaction {
        let state = store.state();
        let Some(sender) = state.player(&player_id) else {
            debug!(player = %player_id, "chat from unknown player");
            return Reaction::default();
        };
        let text: String = text.chars().take(MAX_CHAT_LENGTH).collect();
        let line = ChatLine {
            player_id: player_id.clone(),
            display_name: sender.display_name.clone(),
            color: sender.chat_color.clone(),
            text: text.clone(),
            timestamp: now,
        };
        let mut players = state.players.clone();
        let mut chat_log = state.chat_log.clone();
        if let Some(sender) = players.get_mut(&player_id) {
            sender.push_bubble(&text, now, self.config.max_stacked_messages);
            sender.last_seen = now;
        }
        chat_log.push(line.clone());
        store.update(StateUpdate::players(players).with_chat_log(chat_log));
        Reaction::event(GameEvent::ChatReceived(line))
    }

    fn remove_player(&mut self, store: &mut GameStore, player_id: &str) -> Reaction {
        self.interpolations.remove(player_id);
        let mut players = store.state().players.clone();
        if players.remove(player_id).is_none() {
            return Reaction::default();
        }
        store.update(StateUpdate::players(players));
        debug!(player = %player_id, "player left");
        Reaction::event(GameEvent::PlayerLeft(player_id.to_string()))
    }

    /// Step every running glide to `now`. Returns true while any is still running.
    pub fn advance(&mut self, store: &mut GameStore, now: u64) -> bool {
        if self.interpolations.is_empty() {
            return false;
        }
        let mut players = store.state().players.clone();
        self.interpolations.retain(|id, glide| {
            let Some(player) = players.get_mut(id) else {
                return false;
            };
            (player.x, player.y) = glide.position(now);
            !glide.is_finished(now)
        });
        store.update(StateUpdate::players(players));
        !self.interpolations.is_empty()
    }

    pub fn is_animating(&self) -> bool {
        !self.interpolations.is_empty()
    }

    /// Create our own player at the spawn point.
    pub fn spawn_local(&mut self, store: &mut GameStore, preset: &CharacterPreset, now: u64) -> PlayerId {
        let mut player = Player::new(random_id(), self.config.spawn_x, self.config.spawn_y);
        preset.apply_to(&mut player);
        player.last_seen = now;
        let id = player.id.clone();
        store.update(StateUpdate::local_player(player));
        debug!(player = %id, "spawned local player");
        id
    }

    /// Presence announcement sent whenever a channel (re)opens.
    pub fn announce(&self, store: &GameStore, now: u64) -> Vec<GameMessage> {
        let Some(local) = store.state().local_player() else {
            return vec![];
        };
        let snapshot = local.snapshot(now);
        vec![
            GameMessage::PlayerJoined {
                id: local.id.clone(),
                player: snapshot.clone(),
            },
            GameMessage::PlayerSync { player: snapshot },
            GameMessage::RequestPlayers {
                id: local.id.clone(),
            },
        ]
    }

    /// Move our player to `(x, y)`, clamped to the scene and gated by collision.
    pub fn move_local(&mut self, store: &mut GameStore, x: f64, y: f64, now: u64) -> MoveOutcome {
        if !x.is_finite() || !y.is_finite() {
            return MoveOutcome::Rejected;
        }
        let state = store.state();
        let Some(local) = state.local_player() else {
            return MoveOutcome::Rejected;
        };
        let (x, y) = match &state.current_scene {
            Some(scene) => {
                let (x, y) = scene.clamp_position(x, y, self.config.player_size);
                if scene.collides(x, y, self.config.collision_box) {
                    return MoveOutcome::Rejected;
                }
                (x, y)
            }
            None => (x, y),
        };
        let mut local = local.clone();
        local.x = x;
        local.y = y;
        local.last_seen = now;
        let id = local.id.clone();
        store.update(StateUpdate::local_player(local));

        let due = self
            .last_movement_sent
            .is_none_or(|sent| now.saturating_sub(sent) >= self.movement_interval_ms());
        if !due {
            self.movement_pending = true;
            return MoveOutcome::Moved(None);
        }
        self.last_movement_sent = Some(now);
        self.movement_pending = false;
        MoveOutcome::Moved(Some(GameMessage::Movement {
            player_id: id,
            x,
            y,
            timestamp: now,
        }))
    }

    /// Keyboard-style step of `player_speed` pixels per unit direction.
    pub fn step_local(&mut self, store: &mut GameStore, dx: f64, dy: f64, now: u64) -> MoveOutcome {
        let Some(local) = store.state().local_player() else {
            return MoveOutcome::Rejected;
        };
        let speed = self.config.player_speed;
        let (x, y) = (local.x + dx * speed, local.y + dy * speed);
        self.move_local(store, x, y, now)
    }

    /// Broadcast the final position of a move that was throttled.
    pub fn flush_movement(&mut self, store: &GameStore, now: u64) -> Option<GameMessage> {
        if !self.movement_pending {
            return None;
        }
        let interval = self.movement_interval_ms();
        if self
            .last_movement_sent
            .is_some_and(|sent| now.saturating_sub(sent) < interval)
        {
            return None;
        }
        let local = store.state().local_player()?;
        self.movement_pending = false;
        self.last_movement_sent = Some(now);
        Some(GameMessage::Movement {
            player_id: local.id.clone(),
            x: local.x,
            y: local.y,
            timestamp: now,
        })
    }

    /// Show a chat line locally and build the message that carries it.
    pub fn chat_local(&mut self, store: &mut GameStore, raw: &str, now: u64) -> Option<GameMessage> {
        let text = prepare_text(raw)?;
        let state = store.state();
        let mut local = state.local_player()?.clone();
        local.push_bubble(&text, now, self.config.max_stacked_messages);
        let mut chat_log = state.chat_log.clone();
        chat_log.push(ChatLine {
            player_id: local.id.clone(),
            display_name: local.display_name.clone(),
            color: local.chat_color.clone(),
            text: text.clone(),
            timestamp: now,
        });
        let player_id = local.id.clone();
        store.update(StateUpdate::local_player(local).with_chat_log(chat_log));
        Some(GameMessage::Chat { player_id, text })
    }

    pub fn set_avatar(&mut self, store: &mut GameStore, avatar: &str) -> Option<GameMessage> {
        let mut local = store.state().local_player()?.clone();
        let avatar: Arc<str> = avatar.into();
        local.avatar = Some(avatar.clone());
        let player_id = local.id.clone();
        store.update(StateUpdate::local_player(local));
        Some(GameMessage::AvatarUpdate { player_id, avatar })
    }

    pub fn apply_preset(
        &mut self,
        store: &mut GameStore,
        preset: &CharacterPreset,
        now: u64,
    ) -> Option<GameMessage> {
        let mut local = store.state().local_player()?.clone();
        preset.apply_to(&mut local);
        let player = local.snapshot(now);
        store.update(StateUpdate::local_player(local));
        Some(GameMessage::PlayerSync { player })
    }

    /// Liveness beacon: our full snapshot with a fresh timestamp.
    pub fn heartbeat(&self, store: &GameStore, now: u64) -> Option<GameMessage> {
        let local = store.state().local_player()?;
        Some(GameMessage::PlayerSync {
            player: local.snapshot(now),
        })
    }

    pub fn leave(&self, store: &GameStore) -> Option<GameMessage> {
        let local = store.state().local_player()?;
        Some(GameMessage::PlayerLeft {
            player_id: local.id.clone(),
        })
    }

    /// Expire chat bubbles and drop remote players that went quiet.
    pub fn housekeeping(&mut self, store: &mut GameStore, now: u64) -> Vec<GameEvent> {
        let lifetime = self.config.message_duration.as_millis() as u64;
        let timeout = self.config.player_timeout.map(|t| t.as_millis() as u64);
        let state = store.state();
        let mut players = state.players.clone();
        let mut changed = false;
        let mut events = vec![];

        let stale: Vec<PlayerId> = match timeout {
            Some(timeout) => players
                .values()
                .filter(|p| !state.is_local(&p.id) && now.saturating_sub(p.last_seen) > timeout)
                .map(|p| p.id.clone())
                .collect(),
            None => vec![],
        };
        for id in stale {
            warn!(player = %id, "player timed out");
            players.remove(&id);
            self.interpolations.remove(&id);
            events.push(GameEvent::PlayerLeft(id));
            changed = true;
        }
        for player in players.values_mut() {
            changed |= player.expire_bubbles(now, lifetime);
        }
        if changed {
            store.update(StateUpdate::players(players));
        }
        events
    }

    /// Forget remote motion, e.g. after the channel was rebuilt.
    pub fn reset(&mut self) {
        self.interpolations.clear();
        self.movement_pending = false;
        self.last_movement_sent = None;
    }
}

/// Snapshots of every known player. Remote entries keep their own `lastSeen`.
fn roster(store: &GameStore, now: u64) -> Vec<PlayerSnapshot> {
    let state = store.state();
    state
        .players
        .values()
        .map(|p| {
            let seen = if state.is_local(&p.id) { now } else { p.last_seen };
            p.snapshot(seen)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_CHAT_COLOR, DEFAULT_DISPLAY_NAME};
    use crate::message::{Frame, decode};
    use crate::scene::{Layer, Scene};

    const T0: u64 = 1_000_000;

    fn setup() -> (ProtocolHandler, GameStore) {
        let mut handler = ProtocolHandler::new(GameConfig::default());
        let mut store = GameStore::new(800.0, 600.0);
        handler.spawn_local(&mut store, &CharacterPreset::default(), T0);
        (handler, store)
    }

    fn remote(id: &str, x: f64, y: f64) -> PlayerSnapshot {
        PlayerSnapshot {
            id: id.to_string(),
            x: Some(x),
            y: Some(y),
            display_name: Some(format!("{id}-name")),
            ..Default::default()
        }
    }

    fn join(handler: &mut ProtocolHandler, store: &mut GameStore, id: &str, x: f64, y: f64) -> Reaction {
        handler.handle(
            store,
            GameMessage::PlayerJoined {
                id: id.to_string(),
                player: remote(id, x, y),
            },
            T0,
        )
    }

    #[test]
    fn join_inserts_and_replies_with_own_sync() {
        let (mut handler, mut store) = setup();
        let reaction = join(&mut handler, &mut store, "bob", 0.0, 0.0);
        assert_eq!(store.state().players.len(), 2);
        assert_eq!(reaction.events, vec![GameEvent::PlayerJoined("bob".to_string())]);
        let [GameMessage::PlayerSync { player }] = reaction.replies.as_slice() else {
            panic!("expected a single player_sync reply");
        };
        assert_eq!(Some(&player.id), store.state().local_player.as_ref());

        // Repeated joins are no-ops.
        let again = join(&mut handler, &mut store, "bob", 9.0, 9.0);
        assert_eq!(again, Reaction::default());
        assert_eq!(store.state().player("bob").map(|p| p.x), Some(0.0));
    }

    #[test]
    fn own_id_from_remote_is_ignored() {
        let (mut handler, mut store) = setup();
        let me = store.state().local_player.clone().unwrap();
        let before = store.snapshot();
        join(&mut handler, &mut store, &me, 1.0, 1.0);
        handler.handle(&mut store, GameMessage::PlayerSync { player: remote(&me, 7.0, 7.0) }, T0);
        handler.handle(&mut store, GameMessage::PlayerLeft { player_id: me.clone() }, T0);
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn request_players_lists_everyone() {
        let (mut handler, mut store) = setup();
        join(&mut handler, &mut store, "bob", 0.0, 0.0);
        let reaction = handler.handle(&mut store, GameMessage::RequestPlayers { id: "bob".into() }, T0);
        let [GameMessage::PlayerList { players }] = reaction.replies.as_slice() else {
            panic!("expected player_list");
        };
        assert_eq!(players.len(), 2);
    }

    #[test]
    fn player_list_unions_by_id() {
        let (mut handler, mut store) = setup();
        join(&mut handler, &mut store, "bob", 5.0, 5.0);
        let reaction = handler.handle(
            &mut store,
            GameMessage::PlayerList {
                players: vec![remote("bob", 99.0, 99.0), remote("cy", 1.0, 2.0), remote("cy", 3.0, 4.0)],
            },
            T0,
        );
        assert_eq!(store.state().players.len(), 3);
        assert_eq!(store.state().player("bob").map(|p| p.x), Some(5.0));
        assert_eq!(reaction.events, vec![GameEvent::PlayerJoined("cy".to_string())]);
    }

    #[test]
    fn sync_merges_and_stamps_last_seen() {
        let (mut handler, mut store) = setup();
        join(&mut handler, &mut store, "bob", 5.0, 5.0);
        let partial = PlayerSnapshot {
            id: "bob".to_string(),
            x: Some(42.0),
            chat_color: None,
            last_seen: Some(1),
            ..Default::default()
        };
        handler.handle(&mut store, GameMessage::PlayerSync { player: partial }, T0 + 500);
        let bob = store.state().player("bob").unwrap();
        assert_eq!((bob.x, bob.y), (42.0, 5.0));
        assert_eq!(bob.display_name, "bob-name");
        assert_eq!(bob.chat_color, crate::config::DEFAULT_CHAT_COLOR);
        assert_eq!(bob.last_seen, T0 + 500);

        let reaction = handler.handle(&mut store, GameMessage::PlayerSync { player: remote("dee", 0.0, 0.0) }, T0);
        assert_eq!(reaction.events, vec![GameEvent::PlayerJoined("dee".to_string())]);
    }

    #[test]
    fn movement_interpolates_over_the_interval() {
        let (mut handler, mut store) = setup();
        join(&mut handler, &mut store, "bob", 0.0, 0.0);
        handler.handle(
            &mut store,
            GameMessage::Movement {
                player_id: "bob".to_string(),
                x: 100.0,
                y: 0.0,
                timestamp: 0,
            },
            T0,
        );
        assert!(handler.is_animating());

        assert!(handler.advance(&mut store, T0 + 25));
        let x = store.state().player("bob").unwrap().x;
        assert!((x - 50.0).abs() < 1e-6, "x = {x}");

        assert!(!handler.advance(&mut store, T0 + 50));
        assert_eq!(store.state().player("bob").unwrap().x, 100.0);
        assert!(!handler.is_animating());
    }

    #[test]
    fn sender_timestamp_does_not_shift_the_glide() {
        for timestamp in [0, T0 + 60_000, u64::MAX] {
            let (mut handler, mut store) = setup();
            join(&mut handler, &mut store, "bob", 0.0, 0.0);
            handler.handle(
                &mut store,
                GameMessage::Movement {
                    player_id: "bob".to_string(),
                    x: 100.0,
                    y: 0.0,
                    timestamp,
                },
                T0,
            );
            assert_eq!(store.state().player("bob").unwrap().x, 0.0);
            handler.advance(&mut store, T0 + 25);
            let x = store.state().player("bob").unwrap().x;
            assert!((x - 50.0).abs() < 1e-6, "timestamp {timestamp}: x = {x}");
        }
    }

    #[test]
    fn join_without_a_snapshot_uses_defaults() {
        let (mut handler, mut store) = setup();
        let Ok(Frame::Game(message)) = decode(r#"{"type":"player_joined","id":"p9"}"#) else {
            panic!("expected a player_joined frame");
        };
        let reaction = handler.handle(&mut store, message, T0);
        assert_eq!(reaction.events, vec![GameEvent::PlayerJoined("p9".to_string())]);
        let joined = store.state().player("p9").cloned().unwrap();
        assert_eq!(joined.id, "p9");
        assert_eq!(joined.display_name, DEFAULT_DISPLAY_NAME);
        assert_eq!(joined.chat_color, DEFAULT_CHAT_COLOR);
        assert_eq!(joined.last_seen, T0);
    }

    #[test]
    fn new_movement_supersedes_from_current_position() {
        let (mut handler, mut store) = setup();
        join(&mut handler, &mut store, "bob", 0.0, 0.0);
        let movement = |x| GameMessage::Movement {
            player_id: "bob".to_string(),
            x,
            y: 0.0,
            timestamp: 0,
        };
        handler.handle(&mut store, movement(100.0), T0);
        handler.advance(&mut store, T0 + 25);
        handler.handle(&mut store, movement(0.0), T0 + 25);
        handler.advance(&mut store, T0 + 50);
        let x = store.state().player("bob").unwrap().x;
        assert!((x - 25.0).abs() < 1e-6, "x = {x}");
    }

    #[test]
    fn movement_for_unknown_or_local_player_is_ignored() {
        let (mut handler, mut store) = setup();
        let me = store.state().local_player.clone().unwrap();
        for id in [me, "ghost".to_string()] {
            handler.handle(
                &mut store,
                GameMessage::Movement {
                    player_id: id,
                    x: 1.0,
                    y: 1.0,
                    timestamp: 0,
                },
                T0,
            );
        }
        assert!(!handler.is_animating());
        assert_eq!(store.state().local_player().map(|p| p.x), Some(50.0));
    }

    #[test]
    fn chat_keeps_three_newest_and_logs_every_line() {
        let (mut handler, mut store) = setup();
        join(&mut handler, &mut store, "bob", 0.0, 0.0);
        for (i, text) in ["one", "two", "three", "four"].into_iter().enumerate() {
            let reaction = handler.handle(
                &mut store,
                GameMessage::Chat {
                    player_id: "bob".to_string(),
                    text: text.to_string(),
                },
                T0 + i as u64,
            );
            assert_eq!(reaction.events.len(), 1);
        }
        let bob = store.state().player("bob").unwrap();
        let bubbles: Vec<_> = bob.message_queue.iter().map(|b| b.text.as_str()).collect();
        assert_eq!(bubbles, ["four", "three", "two"]);
        assert_eq!(store.state().chat_log.len(), 4);
        assert_eq!(store.state().chat_log.latest().map(|l| l.display_name.as_str()), Some("bob-name"));

        let ignored = handler.handle(
            &mut store,
            GameMessage::Chat {
                player_id: "ghost".to_string(),
                text: "boo".to_string(),
            },
            T0,
        );
        assert_eq!(ignored, Reaction::default());
    }

    #[test]
    fn avatar_and_leave() {
        let (mut handler, mut store) = setup();
        join(&mut handler, &mut store, "bob", 0.0, 0.0);
        handler.handle(
            &mut store,
            GameMessage::AvatarUpdate {
                player_id: "bob".to_string(),
                avatar: "data:image/png;base64,AAAA".into(),
            },
            T0,
        );
        assert_eq!(
            store.state().player("bob").and_then(|p| p.avatar.as_deref()),
            Some("data:image/png;base64,AAAA")
        );
        let reaction = handler.handle(&mut store, GameMessage::PlayerLeft { player_id: "bob".into() }, T0);
        assert_eq!(reaction.events, vec![GameEvent::PlayerLeft("bob".to_string())]);
        assert_eq!(store.state().players.len(), 1);
        let again = handler.handle(&mut store, GameMessage::PlayerLeft { player_id: "bob".into() }, T0);
        assert!(again.events.is_empty());
    }

    fn walled_store(handler: &mut ProtocolHandler) -> GameStore {
        let mut store = GameStore::new(800.0, 600.0);
        let mut scene = Scene::new("main", 8, 8);
        let mut walls = Layer::new("walls", 8, 8).with_collision();
        walls.set_tile(2, 2, 7);
        scene.layers.push(walls);
        store.update(StateUpdate::scene(scene));
        handler.spawn_local(&mut store, &CharacterPreset::default(), T0);
        store
    }

    #[test]
    fn collision_gate_blocks_without_side_effects() {
        let mut handler = ProtocolHandler::new(GameConfig::default());
        let mut store = walled_store(&mut handler);
        let before = store.snapshot();

        // Tile (2, 2) covers pixels 128..192.
        assert_eq!(handler.move_local(&mut store, 160.0, 160.0, T0), MoveOutcome::Rejected);
        assert_eq!(store.snapshot(), before);

        let MoveOutcome::Moved(Some(GameMessage::Movement { x, y, .. })) =
            handler.move_local(&mut store, 224.0, 160.0, T0)
        else {
            panic!("move one tile away should succeed");
        };
        assert_eq!((x, y), (224.0, 160.0));
        assert_eq!(store.state().local_player().map(|p| (p.x, p.y)), Some((224.0, 160.0)));
    }

    #[test]
    fn non_finite_targets_are_rejected() {
        let (mut handler, mut store) = setup();
        let before = store.snapshot();
        for (x, y) in [
            (f64::NAN, 10.0),
            (10.0, f64::NAN),
            (f64::INFINITY, 10.0),
            (10.0, f64::NEG_INFINITY),
        ] {
            assert_eq!(handler.move_local(&mut store, x, y, T0), MoveOutcome::Rejected);
            assert_eq!(handler.step_local(&mut store, x, y, T0), MoveOutcome::Rejected);
        }
        assert_eq!(store.snapshot(), before);
        assert!(handler.flush_movement(&store, T0 + 1_000).is_none());
    }

    #[test]
    fn moves_are_clamped_and_throttled() {
        let mut handler = ProtocolHandler::new(GameConfig::default());
        let mut store = walled_store(&mut handler);

        let outcome = handler.move_local(&mut store, -500.0, 400.0, T0);
        assert!(matches!(outcome, MoveOutcome::Moved(Some(_))));
        assert_eq!(store.state().local_player().map(|p| p.x), Some(32.0));

        let outcome = handler.step_local(&mut store, 1.0, 0.0, T0 + 10);
        assert_eq!(outcome, MoveOutcome::Moved(None));
        assert_eq!(store.state().local_player().map(|p| p.x), Some(34.0));

        assert_eq!(handler.flush_movement(&store, T0 + 20), None);
        let Some(GameMessage::Movement { x, .. }) = handler.flush_movement(&store, T0 + 60) else {
            panic!("throttled move should be flushed");
        };
        assert_eq!(x, 34.0);
        assert_eq!(handler.flush_movement(&store, T0 + 200), None);
    }

    #[test]
    fn local_chat_is_prepared_and_shown() {
        let (mut handler, mut store) = setup();
        assert_eq!(handler.chat_local(&mut store, "   ", T0), None);
        let Some(GameMessage::Chat { text, .. }) = handler.chat_local(&mut store, "  hello  ", T0) else {
            panic!("expected chat");
        };
        assert_eq!(text, "hello");
        let local = store.state().local_player().unwrap();
        assert_eq!(local.message_queue[0].text, "hello");
        assert_eq!(store.state().chat_log.len(), 1);
    }

    #[test]
    fn housekeeping_expires_bubbles_and_evicts_quiet_players() {
        let (mut handler, mut store) = setup();
        join(&mut handler, &mut store, "bob", 0.0, 0.0);
        handler.handle(
            &mut store,
            GameMessage::Chat {
                player_id: "bob".to_string(),
                text: "hi".to_string(),
            },
            T0,
        );
        assert!(handler.housekeeping(&mut store, T0 + 1_000).is_empty());
        assert_eq!(store.state().player("bob").unwrap().message_queue.len(), 1);

        assert!(handler.housekeeping(&mut store, T0 + 3_000).is_empty());
        assert!(store.state().player("bob").unwrap().message_queue.is_empty());

        let events = handler.housekeeping(&mut store, T0 + 15_001);
        assert_eq!(events, vec![GameEvent::PlayerLeft("bob".to_string())]);
        assert_eq!(store.state().players.len(), 1);
        assert!(store.state().local_player().is_some());
    }

    #[test]
    fn eviction_can_be_disabled() {
        let mut handler = ProtocolHandler::new(GameConfig {
            player_timeout: None,
            ..Default::default()
        });
        let mut store = GameStore::new(800.0, 600.0);
        handler.spawn_local(&mut store, &CharacterPreset::default(), T0);
        join(&mut handler, &mut store, "bob", 0.0, 0.0);
        assert!(handler.housekeeping(&mut store, T0 + 3_600_000).is_empty());
        assert_eq!(store.state().players.len(), 2);
    }

    #[test]
    fn announcement_covers_join_sync_and_request() {
        let (handler, store) = setup();
        let tags: Vec<_> = handler.announce(&store, T0).iter().map(GameMessage::tag).collect();
        assert_eq!(tags, ["player_joined", "player_sync", "request_players"]);
        assert!(handler.announce(&GameStore::new(1.0, 1.0), T0).is_empty());
    }
}
