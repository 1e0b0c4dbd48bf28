#![allow(dead_code)]

use p2p_plaza::transport::MemoryRelay;
use p2p_plaza::*;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;

pub const ROOM: &str = "abc123xyz";

pub fn preset(name: &str) -> CharacterPreset {
    CharacterPreset {
        display_name: name.to_string(),
        ..Default::default()
    }
}

pub fn test_config() -> Config {
    Config::default()
}

pub fn game(id: &str) -> GameMessage {
    GameMessage::Chat {
        player_id: "tester".to_string(),
        text: id.to_string(),
    }
}

/// Text of a chat frame produced by [`game`].
pub fn chat_text(frame: &str) -> String {
    match decode(frame) {
        Ok(Frame::Game(GameMessage::Chat { text, .. })) => text,
        other => panic!("expected a chat frame, got {other:?}"),
    }
}

pub async fn await_event(events: &mut mpsc::Receiver<GameEvent>) -> anyhow::Result<GameEvent> {
    let duration = Duration::from_secs(2);
    tokio::time::timeout(duration, events.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("Event channel closed"))
}

/// Skip events until one matches.
pub async fn await_matching(
    events: &mut mpsc::Receiver<GameEvent>,
    within: Duration,
    wanted: impl Fn(&GameEvent) -> bool,
) -> anyhow::Result<GameEvent> {
    tokio::time::timeout(within, async {
        loop {
            match events.recv().await {
                Some(event) if wanted(&event) => return Ok(event),
                Some(_) => continue,
                None => return Err(anyhow::anyhow!("Event channel closed")),
            }
        }
    })
    .await?
}

/// Wait until the room's published state satisfies `check`.
pub async fn wait_for_state(
    room: &GameRoom,
    check: impl Fn(&GameState) -> bool,
) -> anyhow::Result<Arc<GameState>> {
    let mut states = room.subscribe_state();
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            {
                let state = states.borrow_and_update();
                if check(&state) {
                    return Ok::<_, anyhow::Error>(state.clone());
                }
            }
            states.changed().await?;
        }
    })
    .await?
}

pub async fn wait_for_players(room: &GameRoom, count: usize) -> anyhow::Result<Arc<GameState>> {
    wait_for_state(room, |state| state.players.len() == count).await
}

pub async fn setup_host(
    relay: &MemoryRelay,
    name: &str,
) -> anyhow::Result<(GameRoom, mpsc::Receiver<GameEvent>)> {
    let (room, events) = GameRoom::create(relay.clone(), test_config(), preset(name)).await?;
    assert_eq!(room.status(), ConnectionStatus::Connected);
    Ok((room, events))
}

pub async fn join_test_room(
    relay: &MemoryRelay,
    room: &RoomId,
    name: &str,
) -> anyhow::Result<(GameRoom, mpsc::Receiver<GameEvent>)> {
    GameRoom::join(relay.clone(), room, test_config(), preset(name)).await
}

/// A host and a guest who already see each other.
pub async fn connected_pair(
    relay: &MemoryRelay,
) -> anyhow::Result<(
    (GameRoom, mpsc::Receiver<GameEvent>),
    (GameRoom, mpsc::Receiver<GameEvent>),
)> {
    let (host, host_events) = setup_host(relay, "Ada").await?;
    let (guest, guest_events) = join_test_room(relay, host.id(), "Bo").await?;
    wait_for_players(&host, 2).await?;
    wait_for_players(&guest, 2).await?;
    Ok(((host, host_events), (guest, guest_events)))
}
