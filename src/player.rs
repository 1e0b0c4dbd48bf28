use std::{
    collections::{HashMap, VecDeque},
    fmt::Display,
    ops::{Deref, DerefMut},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_CHAT_COLOR, DEFAULT_DISPLAY_NAME};

pub type PlayerId = String;

/// A chat bubble shown above a player.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatBubble {
    pub text: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub x: f64,
    pub y: f64,
    pub display_name: String,
    /// `#rrggbb`
    pub chat_color: String,
    /// Opaque encoded image.
    pub avatar: Option<Arc<str>>,
    /// Newest first.
    pub message_queue: VecDeque<ChatBubble>,
    pub last_seen: u64,
}

impl Display for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name)
    }
}

impl Player {
    pub fn new(id: impl Into<PlayerId>, x: f64, y: f64) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
            chat_color: DEFAULT_CHAT_COLOR.to_string(),
            avatar: None,
            message_queue: VecDeque::new(),
            last_seen: 0,
        }
    }

    /// Build a player from a possibly incomplete wire snapshot.
    pub fn from_snapshot(snapshot: PlayerSnapshot, seen_at: u64) -> Self {
        let mut player = Self::new(snapshot.id.clone(), 0.0, 0.0);
        player.merge(snapshot);
        player.last_seen = seen_at;
        player
    }

    /// Overwrite every field the snapshot carries; keep the rest.
    pub fn merge(&mut self, snapshot: PlayerSnapshot) {
        let PlayerSnapshot {
            id: _,
            x,
            y,
            display_name,
            chat_color,
            avatar,
            last_seen,
        } = snapshot;
        if let Some(x) = x {
            self.x = x;
        }
        if let Some(y) = y {
            self.y = y;
        }
        if let Some(name) = display_name.filter(|name| !name.is_empty()) {
            self.display_name = name;
        }
        match chat_color.filter(|color| !color.is_empty()) {
            Some(color) => self.chat_color = color,
            None if self.chat_color.is_empty() => self.chat_color = DEFAULT_CHAT_COLOR.to_string(),
            None => {}
        }
        if avatar.is_some() {
            self.avatar = avatar;
        }
        if let Some(last_seen) = last_seen {
            self.last_seen = last_seen;
        }
    }

    /// Full snapshot of this player stamped with `now`.
    pub fn snapshot(&self, now: u64) -> PlayerSnapshot {
        PlayerSnapshot {
            id: self.id.clone(),
            x: Some(self.x),
            y: Some(self.y),
            display_name: Some(self.display_name.clone()),
            chat_color: Some(self.chat_color.clone()),
            avatar: self.avatar.clone(),
            last_seen: Some(now),
        }
    }

    /// Stack a chat bubble, keeping only the `max` most recent.
    pub fn push_bubble(&mut self, text: &str, timestamp: u64, max: usize) {
        self.message_queue.push_front(ChatBubble {
            text: text.to_string(),
            timestamp,
        });
        self.message_queue.truncate(max);
    }

    /// Drop bubbles older than `lifetime_ms`. Returns true if any were removed.
    pub fn expire_bubbles(&mut self, now: u64, lifetime_ms: u64) -> bool {
        let before = self.message_queue.len();
        self.message_queue
            .retain(|bubble| now.saturating_sub(bubble.timestamp) < lifetime_ms);
        self.message_queue.len() != before
    }
}

/// Player state as carried on the wire. Absent fields leave the receiver's
/// copy untouched.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    #[serde(default)]
    pub id: PlayerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<Arc<str>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerMap(HashMap<PlayerId, Player>);

impl Deref for PlayerMap {
    type Target = HashMap<PlayerId, Player>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for PlayerMap {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl Display for PlayerMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (id, player) in self.0.iter() {
            writeln!(f, "[{id}]: '{player}' @ ({:.0}, {:.0})", player.x, player.y)?;
        }
        Ok(())
    }
}

impl FromIterator<Player> for PlayerMap {
    fn from_iter<T: IntoIterator<Item = Player>>(iter: T) -> Self {
        Self(iter.into_iter().map(|p| (p.id.clone(), p)).collect())
    }
}

impl PlayerMap {
    pub fn upsert(&mut self, player: Player) {
        self.0.insert(player.id.clone(), player);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bubbles_keep_three_newest_first() {
        let mut player = Player::new("p1", 0.0, 0.0);
        for (i, text) in ["one", "two", "three", "four"].iter().enumerate() {
            player.push_bubble(text, i as u64, 3);
        }
        let texts: Vec<_> = player.message_queue.iter().map(|b| b.text.as_str()).collect();
        assert_eq!(texts, ["four", "three", "two"]);
    }

    #[test]
    fn bubbles_expire_independently() {
        let mut player = Player::new("p1", 0.0, 0.0);
        player.push_bubble("old", 1_000, 3);
        player.push_bubble("new", 2_500, 3);
        assert!(player.expire_bubbles(4_000, 3_000));
        assert_eq!(player.message_queue.len(), 1);
        assert_eq!(player.message_queue[0].text, "new");
        assert!(!player.expire_bubbles(5_000, 3_000));
        assert!(player.expire_bubbles(5_500, 3_000));
        assert!(player.message_queue.is_empty());
    }

    #[test]
    fn merge_only_overwrites_present_fields() {
        let mut player = Player::new("p1", 10.0, 20.0);
        player.display_name = "Ada".to_string();
        player.merge(PlayerSnapshot {
            id: "p1".to_string(),
            x: Some(42.0),
            ..Default::default()
        });
        assert_eq!((player.x, player.y), (42.0, 20.0));
        assert_eq!(player.display_name, "Ada");
        assert_eq!(player.chat_color, DEFAULT_CHAT_COLOR);
    }

    #[test]
    fn incomplete_snapshot_gets_defaults() {
        let snapshot: PlayerSnapshot = serde_json::from_str(r#"{"id":"p2","x":5}"#).unwrap();
        let player = Player::from_snapshot(snapshot, 77);
        assert_eq!(player.x, 5.0);
        assert_eq!(player.display_name, DEFAULT_DISPLAY_NAME);
        assert_eq!(player.chat_color, DEFAULT_CHAT_COLOR);
        assert_eq!(player.last_seen, 77);
    }
}
