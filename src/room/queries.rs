use crate::{
    GameRoom,
    ids::RoomId,
    player::Player,
    session::ConnectionStatus,
    state::GameState,
};
use std::sync::Arc;
use tokio::sync::watch;

impl GameRoom {
    /// Room id; share it as `?room=<id>` to let others join.
    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn local_player_id(&self) -> &str {
        &self.local_player
    }

    /// Latest published state.
    pub fn state(&self) -> Arc<GameState> {
        self.state.borrow().clone()
    }

    /// Changes whenever the state does; renderers redraw on each change.
    pub fn subscribe_state(&self) -> watch::Receiver<Arc<GameState>> {
        self.state.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Every known player, ours included, sorted by id.
    pub fn players(&self) -> Vec<Player> {
        let mut players: Vec<Player> = self.state().players.values().cloned().collect();
        players.sort_by(|a, b| a.id.cmp(&b.id));
        players
    }

    pub fn local_player(&self) -> Option<Player> {
        self.state().local_player().cloned()
    }
}
