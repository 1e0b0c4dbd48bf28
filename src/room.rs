//! Game Room

mod actions;
mod events;
mod queries;

use crate::{
    chat::ChatLog,
    clock::Clock,
    config::Config,
    ids::RoomId,
    player::PlayerId,
    preset::CharacterPreset,
    protocol::ProtocolHandler,
    session::{ConnectionStatus, PeerSession},
    state::{GameState, GameStore},
    transport::Connector,
};
use anyhow::Result;
use std::sync::Arc;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::info;

pub use actions::Intent;
pub use events::GameEvent;
use events::RoomDriver;

/// UI intents waiting for the event loop.
const INTENT_CAPACITY: usize = 64;
/// Notifications waiting for the UI; extra ones are dropped.
const EVENT_CAPACITY: usize = 128;

/// Handle to a running room. The event loop stops when this is dropped.
pub struct GameRoom {
    id: RoomId,
    local_player: PlayerId,
    intents: mpsc::Sender<Intent>,
    state: watch::Receiver<Arc<GameState>>,
    status: watch::Receiver<ConnectionStatus>,
    event_handle: Option<JoinHandle<()>>,
}

impl Drop for GameRoom {
    fn drop(&mut self) {
        if let Some(handle) = self.event_handle.take() {
            handle.abort();
        }
    }
}

impl GameRoom {
    /// Open a new room; its id is ours to share.
    pub async fn create<C: Connector>(
        connector: C,
        config: Config,
        preset: CharacterPreset,
    ) -> Result<(Self, mpsc::Receiver<GameEvent>)> {
        Self::start(connector, None, config, preset).await
    }

    /// Join the room `room` created by someone else.
    pub async fn join<C: Connector>(
        connector: C,
        room: &str,
        config: Config,
        preset: CharacterPreset,
    ) -> Result<(Self, mpsc::Receiver<GameEvent>)> {
        Self::start(connector, Some(room), config, preset).await
    }

    async fn start<C: Connector>(
        connector: C,
        room: Option<&str>,
        config: Config,
        preset: CharacterPreset,
    ) -> Result<(Self, mpsc::Receiver<GameEvent>)> {
        config.validate()?;
        let clock = Clock::new();
        let game = config.game;
        let mut store = GameStore::with_chat_log(
            game.screen_width,
            game.screen_height,
            ChatLog::new(game.chat_max_messages),
        );
        let mut protocol = ProtocolHandler::new(game);
        let local_player = protocol.spawn_local(&mut store, &preset, clock.now());

        let mut session = PeerSession::new(connector, config.session);
        let status = session.subscribe_status();
        let id = session.connect(room).await?;
        for message in protocol.announce(&store, clock.now()) {
            session.send(message);
        }
        info!(room = %id, player = %local_player, "entered room");

        let (intent_tx, intent_rx) = mpsc::channel(INTENT_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
        let state = store.subscribe();
        let driver = RoomDriver::new(session, store, protocol, clock, intent_rx, event_tx);
        let event_handle = tokio::spawn(driver.run());

        let room = Self {
            id,
            local_player,
            intents: intent_tx,
            state,
            status,
            event_handle: Some(event_handle),
        };
        Ok((room, event_rx))
    }
}
