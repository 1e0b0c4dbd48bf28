//! Local mirror of the shared world.
//!
//! [`GameStore::update`] is the only way state changes: it builds a fresh
//! [`GameState`] from a partial replacement, recomputes the camera and
//! publishes the snapshot to renderers.

use std::sync::Arc;

use tokio::sync::watch;

use crate::{
    chat::ChatLog,
    player::{Player, PlayerId, PlayerMap},
    scene::{Scene, Viewport},
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameState {
    pub players: PlayerMap,
    /// Id of our own entry in `players`.
    pub local_player: Option<PlayerId>,
    pub current_scene: Option<Arc<Scene>>,
    pub viewport: Viewport,
    pub chat_log: ChatLog,
}

impl GameState {
    pub fn local_player(&self) -> Option<&Player> {
        self.local_player.as_ref().and_then(|id| self.players.get(id))
    }

    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn is_local(&self, id: &str) -> bool {
        self.local_player.as_deref() == Some(id)
    }
}

/// Fields to replace. Anything left `None` keeps its previous value.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub players: Option<PlayerMap>,
    /// Our own player; it is also written into `players`.
    pub local_player: Option<Player>,
    pub current_scene: Option<Arc<Scene>>,
    pub chat_log: Option<ChatLog>,
}

impl StateUpdate {
    pub fn players(players: PlayerMap) -> Self {
        Self {
            players: Some(players),
            ..Default::default()
        }
    }

    pub fn local_player(player: Player) -> Self {
        Self {
            local_player: Some(player),
            ..Default::default()
        }
    }

    pub fn scene(scene: Scene) -> Self {
        Self {
            current_scene: Some(Arc::new(scene)),
            ..Default::default()
        }
    }

    pub fn with_chat_log(mut self, chat_log: ChatLog) -> Self {
        self.chat_log = Some(chat_log);
        self
    }
}

pub struct GameStore {
    state: Arc<GameState>,
    screen: (f64, f64),
    publisher: watch::Sender<Arc<GameState>>,
}

impl GameStore {
    pub fn new(screen_width: f64, screen_height: f64) -> Self {
        Self::with_chat_log(screen_width, screen_height, ChatLog::default())
    }

    pub fn with_chat_log(screen_width: f64, screen_height: f64, chat_log: ChatLog) -> Self {
        let state = Arc::new(GameState {
            chat_log,
            ..Default::default()
        });
        let (publisher, _) = watch::channel(state.clone());
        Self {
            state,
            screen: (screen_width, screen_height),
            publisher,
        }
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn snapshot(&self) -> Arc<GameState> {
        self.state.clone()
    }

    /// Renderers redraw whenever this receiver changes.
    pub fn subscribe(&self) -> watch::Receiver<Arc<GameState>> {
        self.publisher.subscribe()
    }

    pub fn resize(&mut self, width: f64, height: f64) {
        self.screen = (width, height);
        self.update(StateUpdate::default());
    }

    pub fn update(&mut self, partial: StateUpdate) {
        let prev = self.state.as_ref();

        let mut players = partial.players.unwrap_or_else(|| prev.players.clone());
        let local_player = match partial.local_player {
            Some(local) => {
                let id = local.id.clone();
                players.upsert(local);
                Some(id)
            }
            None => prev.local_player.clone(),
        };
        // A replacement player set never drops our own entry.
        if let Some(id) = &local_player
            && !players.contains_key(id)
            && let Some(previous) = prev.players.get(id)
        {
            players.upsert(previous.clone());
        }

        let current_scene = partial.current_scene.or_else(|| prev.current_scene.clone());
        let chat_log = partial.chat_log.unwrap_or_else(|| prev.chat_log.clone());

        let focus = local_player.as_ref().and_then(|id| players.get(id));
        let viewport = match (focus, &current_scene) {
            (Some(player), Some(scene)) => Viewport::follow(
                player.x,
                player.y,
                self.screen,
                scene.pixel_width(),
                scene.pixel_height(),
            ),
            _ => prev.viewport,
        };

        self.state = Arc::new(GameState {
            players,
            local_player,
            current_scene,
            viewport,
            chat_log,
        });
        self.publisher.send_replace(self.state.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_local() -> GameStore {
        let mut store = GameStore::new(200.0, 100.0);
        store.update(StateUpdate::local_player(Player::new("me", 50.0, 350.0)));
        store
    }

    #[test]
    fn omitted_fields_keep_previous_values() {
        let mut store = store_with_local();
        store.update(StateUpdate::scene(Scene::new("main", 8, 8)));
        store.update(StateUpdate::default());
        let state = store.state();
        assert_eq!(state.local_player.as_deref(), Some("me"));
        assert_eq!(state.players.len(), 1);
        assert!(state.current_scene.is_some());
    }

    #[test]
    fn local_player_survives_player_replacement() {
        let mut store = store_with_local();
        let others: PlayerMap = [Player::new("a", 0.0, 0.0), Player::new("b", 0.0, 0.0)]
            .into_iter()
            .collect();
        store.update(StateUpdate::players(others));
        let state = store.state();
        assert_eq!(state.players.len(), 3);
        assert!(state.local_player().is_some());

        store.update(StateUpdate::players(PlayerMap::default()));
        assert_eq!(store.state().local_player().map(|p| p.id.as_str()), Some("me"));
    }

    #[test]
    fn local_invariant_holds_over_update_sequences() {
        let mut store = GameStore::new(800.0, 600.0);
        let updates = vec![
            StateUpdate::players([Player::new("x", 1.0, 1.0)].into_iter().collect()),
            StateUpdate::local_player(Player::new("me", 2.0, 2.0)),
            StateUpdate::players(PlayerMap::default()),
            StateUpdate::scene(Scene::new("main", 4, 4)),
            StateUpdate::local_player(Player::new("me", 9.0, 9.0)),
            StateUpdate::players([Player::new("y", 1.0, 1.0)].into_iter().collect()),
        ];
        for update in updates {
            store.update(update);
            let state = store.state();
            if let Some(id) = &state.local_player {
                assert_eq!(state.players.get(id).map(|p| &p.id), Some(id));
            }
        }
        assert_eq!(store.state().local_player().map(|p| p.x), Some(9.0));
    }

    #[test]
    fn viewport_follows_local_player() {
        let mut store = store_with_local();
        store.update(StateUpdate::scene(Scene::new("main", 8, 8)));
        let view = store.state().viewport;
        assert_eq!((view.x, view.y, view.width, view.height), (0.0, 300.0, 200.0, 100.0));

        let mut moved = store.state().local_player().unwrap().clone();
        moved.x = 300.0;
        store.update(StateUpdate::local_player(moved));
        assert_eq!(store.state().viewport.x, 200.0);
    }

    #[test]
    fn updates_are_published() {
        let mut store = GameStore::new(800.0, 600.0);
        let mut renders = store.subscribe();
        store.update(StateUpdate::local_player(Player::new("me", 0.0, 0.0)));
        assert!(renders.has_changed().unwrap());
        assert_eq!(renders.borrow_and_update().players.len(), 1);
    }
}
