//! Character customisation, persisted locally between sessions.

use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    config::{DEFAULT_CHAT_COLOR, DEFAULT_DISPLAY_NAME, PRESET_KEY},
    persist::write_atomic,
    player::Player,
};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Category {
    Skin,
    Eyes,
    Hair,
    Top,
    Bottoms,
    Shoes,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Skin,
        Category::Eyes,
        Category::Hair,
        Category::Top,
        Category::Bottoms,
        Category::Shoes,
    ];

    /// Number of sprite variants available.
    pub fn asset_count(self) -> usize {
        match self {
            Category::Skin => 6,
            Category::Eyes => 8,
            Category::Hair => 18,
            Category::Top => 10,
            Category::Bottoms => 9,
            Category::Shoes => 11,
        }
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Category::Skin => "skin",
            Category::Eyes => "eyes",
            Category::Hair => "hair",
            Category::Top => "top",
            Category::Bottoms => "bottoms",
            Category::Shoes => "shoes",
        };
        write!(f, "{name}")
    }
}

fn default_display_name() -> String {
    DEFAULT_DISPLAY_NAME.to_string()
}

fn default_chat_color() -> String {
    DEFAULT_CHAT_COLOR.to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CharacterPreset {
    #[serde(default)]
    pub skin: usize,
    #[serde(default)]
    pub eyes: usize,
    #[serde(default)]
    pub hair: usize,
    #[serde(default)]
    pub top: usize,
    #[serde(default)]
    pub bottoms: usize,
    #[serde(default)]
    pub shoes: usize,
    #[serde(default = "default_display_name")]
    pub display_name: String,
    #[serde(default = "default_chat_color")]
    pub chat_color: String,
}

impl Default for CharacterPreset {
    fn default() -> Self {
        Self {
            skin: 0,
            eyes: 0,
            hair: 0,
            top: 0,
            bottoms: 0,
            shoes: 0,
            display_name: default_display_name(),
            chat_color: default_chat_color(),
        }
    }
}

impl CharacterPreset {
    pub fn get(&self, category: Category) -> usize {
        match category {
            Category::Skin => self.skin,
            Category::Eyes => self.eyes,
            Category::Hair => self.hair,
            Category::Top => self.top,
            Category::Bottoms => self.bottoms,
            Category::Shoes => self.shoes,
        }
    }

    fn slot(&mut self, category: Category) -> &mut usize {
        match category {
            Category::Skin => &mut self.skin,
            Category::Eyes => &mut self.eyes,
            Category::Hair => &mut self.hair,
            Category::Top => &mut self.top,
            Category::Bottoms => &mut self.bottoms,
            Category::Shoes => &mut self.shoes,
        }
    }

    /// Step a category forwards or backwards, wrapping at either end.
    pub fn cycle(&mut self, category: Category, direction: i32) -> usize {
        let count = category.asset_count() as i64;
        let slot = self.slot(category);
        *slot = (*slot as i64 + direction as i64).rem_euclid(count) as usize;
        *slot
    }

    /// Copy the identity fields onto a player.
    pub fn apply_to(&self, player: &mut Player) {
        if !self.display_name.trim().is_empty() {
            player.display_name = self.display_name.trim().to_string();
        }
        if !self.chat_color.is_empty() {
            player.chat_color = self.chat_color.clone();
        }
    }
}

/// Reads and writes the preset blob in a directory.
#[derive(Debug, Clone)]
pub struct PresetStore {
    dir: PathBuf,
}

impl PresetStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{PRESET_KEY}.json"))
    }

    /// `None` if nothing has been saved yet.
    pub async fn load(&self) -> Result<Option<CharacterPreset>> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = tokio::fs::read(&path)
            .await
            .with_context(|| format!("unable to read '{}'", path.display()))?;
        let preset = serde_json::from_slice(&raw).context("invalid character preset")?;
        Ok(Some(preset))
    }

    pub async fn save(&self, preset: &CharacterPreset) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(preset)?;
        write_atomic(&self.path(), &bytes).await?;
        debug!(path = %self.path().display(), "saved character preset");
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycling_wraps_both_ways() {
        let mut preset = CharacterPreset::default();
        assert_eq!(preset.cycle(Category::Skin, -1), 5);
        assert_eq!(preset.cycle(Category::Skin, 1), 0);
        for _ in 0..18 {
            preset.cycle(Category::Hair, 1);
        }
        assert_eq!(preset.get(Category::Hair), 0);
        assert_eq!(preset.cycle(Category::Shoes, 12), 1);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let preset: CharacterPreset = serde_json::from_str(r#"{"hair":4,"displayName":"Ada"}"#).unwrap();
        assert_eq!(preset.hair, 4);
        assert_eq!(preset.display_name, "Ada");
        assert_eq!(preset.chat_color, DEFAULT_CHAT_COLOR);
    }

    #[test]
    fn blank_name_keeps_player_name() {
        let mut player = Player::new("p1", 0.0, 0.0);
        let preset = CharacterPreset {
            display_name: "  ".to_string(),
            chat_color: "#ff00ff".to_string(),
            ..Default::default()
        };
        preset.apply_to(&mut player);
        assert_eq!(player.display_name, DEFAULT_DISPLAY_NAME);
        assert_eq!(player.chat_color, "#ff00ff");
    }

    #[tokio::test]
    async fn store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = PresetStore::new(dir.path().join("prefs"));
        assert_eq!(store.load().await.unwrap(), None);

        let mut preset = CharacterPreset {
            display_name: "Bo".to_string(),
            ..Default::default()
        };
        preset.cycle(Category::Top, 3);
        store.save(&preset).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(preset));
        assert!(store.path().ends_with("character_preset.json"));
    }
}
