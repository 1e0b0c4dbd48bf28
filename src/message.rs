//! Wire format of the game channel.
//!
//! Every frame is a JSON text object with a mandatory `type` tag. Game frames
//! carry player state; signaling frames (`offer`, `answer`, `candidate`) only
//! matter while a channel is being negotiated and are opaque to the game.

use crate::{
    error::Error,
    player::{PlayerId, PlayerSnapshot},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameMessage {
    PlayerJoined {
        id: PlayerId,
        #[serde(default)]
        player: PlayerSnapshot,
    },
    RequestPlayers {
        id: PlayerId,
    },
    PlayerList {
        players: Vec<PlayerSnapshot>,
    },
    PlayerSync {
        player: PlayerSnapshot,
    },
    #[serde(rename_all = "camelCase")]
    Movement {
        player_id: PlayerId,
        x: f64,
        y: f64,
        timestamp: u64,
    },
    #[serde(rename_all = "camelCase")]
    Chat { player_id: PlayerId, text: String },
    #[serde(rename_all = "camelCase")]
    AvatarUpdate {
        player_id: PlayerId,
        avatar: Arc<str>,
    },
    #[serde(rename_all = "camelCase")]
    PlayerLeft { player_id: PlayerId },
}

impl GameMessage {
    pub const TAGS: [&'static str; 8] = [
        "player_joined",
        "request_players",
        "player_list",
        "player_sync",
        "movement",
        "chat",
        "avatar_update",
        "player_left",
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            GameMessage::PlayerJoined { .. } => "player_joined",
            GameMessage::RequestPlayers { .. } => "request_players",
            GameMessage::PlayerList { .. } => "player_list",
            GameMessage::PlayerSync { .. } => "player_sync",
            GameMessage::Movement { .. } => "movement",
            GameMessage::Chat { .. } => "chat",
            GameMessage::AvatarUpdate { .. } => "avatar_update",
            GameMessage::PlayerLeft { .. } => "player_left",
        }
    }

    pub fn encode(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::EncodeError(e.to_string()))
    }
}

/// Connection setup payloads exchanged over the signaling relay.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalMessage {
    Offer {
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    Answer {
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    Candidate {
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
}

impl SignalMessage {
    pub const TAGS: [&'static str; 3] = ["offer", "answer", "candidate"];
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Game(GameMessage),
    Signal(SignalMessage),
}

/// Decode one text frame, telling malformed payloads apart from unknown tags.
pub fn decode(frame: &str) -> Result<Frame, Error> {
    let value: Value = serde_json::from_str(frame).map_err(|e| Error::DecodeError(e.to_string()))?;
    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::DecodeError("missing `type` field".to_string()))?
        .to_string();

    if SignalMessage::TAGS.contains(&tag.as_str()) {
        return serde_json::from_value(value)
            .map(Frame::Signal)
            .map_err(|e| Error::DecodeError(format!("{tag}: {e}")));
    }
    if !GameMessage::TAGS.contains(&tag.as_str()) {
        return Err(Error::UnknownMessageType(tag));
    }
    serde_json::from_value(value)
        .map(Frame::Game)
        .map_err(|e| Error::DecodeError(format!("{tag}: {e}")))
}
