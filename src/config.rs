//! Tunables for the peer session and the shared world.
//!
//! Every field has a default, so a config file only needs to name what it
//! overrides:
//!
//! ```toml
//! [session]
//! attempt_timeout = "8s"
//!
//! [game]
//! player_timeout = "30s"
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Length of a room identifier (and of every generated peer/player id).
pub const ROOM_ID_LEN: usize = 9;
/// Storage key of the persisted character preset.
pub const PRESET_KEY: &str = "character_preset";
pub const DEFAULT_CHAT_COLOR: &str = "#88ff88";
pub const DEFAULT_DISPLAY_NAME: &str = "Anonymous";
/// Chat text is cut to this many characters before it is sent.
pub const MAX_CHAT_LENGTH: usize = 200;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub game: GameConfig,
}

impl Config {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the event loops cannot run with.
    pub fn validate(&self) -> Result<()> {
        for (name, period) in [
            ("session.heartbeat_interval", self.session.heartbeat_interval),
            ("game.frame_interval", self.game.frame_interval),
            ("game.housekeeping_interval", self.game.housekeeping_interval),
        ] {
            if period.is_zero() {
                bail!("invalid configuration: {name} must be greater than zero");
            }
        }
        Ok(())
    }

    /// Read a TOML config file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("unable to read config '{}'", path.display()))?;
        Self::from_toml_str(&raw)
    }
}

/// Peer session lifecycle settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Join attempts before the connection is reported as failed.
    pub max_attempts: u32,
    /// Window for a single join attempt, long enough for relay fallback.
    #[serde(with = "humantime_serde")]
    pub attempt_timeout: Duration,
    /// Pause before retrying after an explicit connection error.
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    /// Delay between losing an open channel and the reconnection attempt.
    #[serde(with = "humantime_serde")]
    pub reconnect_delay: Duration,
    /// Upper bound for messages waiting on a closed channel; `None` is unbounded.
    pub queue_capacity: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            attempt_timeout: Duration::from_secs(12),
            retry_backoff: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(5),
            queue_capacity: Some(256),
        }
    }
}

/// World, movement and chat settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GameConfig {
    /// Minimum gap between movement broadcasts; also the remote interpolation window.
    #[serde(with = "humantime_serde")]
    pub movement_interval: Duration,
    /// Animation frame period used while remote players are interpolating.
    #[serde(with = "humantime_serde")]
    pub frame_interval: Duration,
    /// Period of chat bubble expiry and stale player eviction.
    #[serde(with = "humantime_serde")]
    pub housekeeping_interval: Duration,
    /// Chat bubbles kept above a player.
    pub max_stacked_messages: usize,
    /// Lifetime of a single chat bubble.
    #[serde(with = "humantime_serde")]
    pub message_duration: Duration,
    /// Lines kept in the chat log.
    pub chat_max_messages: usize,
    /// Remote players silent for longer than this are dropped; `None` keeps them forever.
    #[serde(with = "humantime_serde")]
    pub player_timeout: Option<Duration>,
    /// Pixels per movement step.
    pub player_speed: f64,
    /// Sprite size, used to keep players inside the scene.
    pub player_size: f64,
    /// Side of the square sampled against collision layers.
    pub collision_box: f64,
    pub spawn_x: f64,
    pub spawn_y: f64,
    pub screen_width: f64,
    pub screen_height: f64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            movement_interval: Duration::from_millis(50),
            frame_interval: Duration::from_millis(16),
            housekeeping_interval: Duration::from_millis(250),
            max_stacked_messages: 3,
            message_duration: Duration::from_secs(3),
            chat_max_messages: 50,
            player_timeout: Some(Duration::from_secs(15)),
            player_speed: 2.0,
            player_size: 64.0,
            collision_box: 32.0,
            spawn_x: 50.0,
            spawn_y: 350.0,
            screen_width: 800.0,
            screen_height: 600.0,
        }
    }
}
