use crate::{GameRoom, preset::CharacterPreset, scene::Scene};
use anyhow::{Result, anyhow};
use tokio::sync::oneshot;

/// Requests from the UI to the room event loop.
#[derive(Debug)]
pub enum Intent {
    /// Move to an absolute position. Replies whether the move was allowed.
    Move {
        x: f64,
        y: f64,
        reply: oneshot::Sender<bool>,
    },
    /// Step by `player_speed` in the given direction.
    Step {
        dx: f64,
        dy: f64,
        reply: oneshot::Sender<bool>,
    },
    Chat(String),
    Avatar(String),
    Preset(CharacterPreset),
    LoadScene(Box<Scene>),
    Resize {
        width: f64,
        height: f64,
    },
    Leave(oneshot::Sender<()>),
}

impl GameRoom {
    async fn submit(&self, intent: Intent) -> Result<()> {
        self.intents
            .send(intent)
            .await
            .map_err(|_| anyhow!("room event loop has stopped"))
    }

    /// Move our player to `(x, y)`. Returns false if the scene blocks it.
    pub async fn move_to(&self, x: f64, y: f64) -> Result<bool> {
        let (reply, moved) = oneshot::channel();
        self.submit(Intent::Move { x, y, reply }).await?;
        Ok(moved.await?)
    }

    /// Keyboard-style step, e.g. `(1.0, 0.0)` for right.
    pub async fn step(&self, dx: f64, dy: f64) -> Result<bool> {
        let (reply, moved) = oneshot::channel();
        self.submit(Intent::Step { dx, dy, reply }).await?;
        Ok(moved.await?)
    }

    /// Send a chat message
    pub async fn send_chat(&self, text: &str) -> Result<()> {
        self.submit(Intent::Chat(text.to_string())).await
    }

    /// Replace our avatar image (an opaque encoded string).
    pub async fn update_avatar(&self, avatar: &str) -> Result<()> {
        self.submit(Intent::Avatar(avatar.to_string())).await
    }

    /// Apply a character preset to our player and share it.
    pub async fn apply_preset(&self, preset: CharacterPreset) -> Result<()> {
        self.submit(Intent::Preset(preset)).await
    }

    pub async fn load_scene(&self, scene: Scene) -> Result<()> {
        self.submit(Intent::LoadScene(Box::new(scene))).await
    }

    pub async fn resize(&self, width: f64, height: f64) -> Result<()> {
        self.submit(Intent::Resize { width, height }).await
    }

    /// Say goodbye to the room and stop the event loop.
    pub async fn leave(mut self) -> Result<()> {
        let (reply, done) = oneshot::channel();
        self.submit(Intent::Leave(reply)).await?;
        done.await?;
        if let Some(handle) = self.event_handle.take() {
            handle.await?;
        }
        Ok(())
    }
}
