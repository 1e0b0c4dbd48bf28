//! Tile map scene: layers, collision sampling and the camera viewport.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Source tile edge in pixels.
pub const TILE_SIZE: f64 = 16.0;
/// Render scale applied to every tile.
pub const TILE_SCALE: f64 = 4.0;
/// Tile index meaning "nothing painted here".
pub const DEFAULT_TILE: i32 = -1;

fn default_tile_px() -> f64 {
    TILE_SIZE * TILE_SCALE
}

fn default_visible() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Layer {
    pub name: String,
    /// Row-major: `tiles[y][x]`.
    pub tiles: Vec<Vec<i32>>,
    #[serde(default)]
    pub collision: bool,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

impl Layer {
    pub fn new(name: impl Into<String>, width: usize, height: usize) -> Self {
        Self {
            name: name.into(),
            tiles: vec![vec![DEFAULT_TILE; width]; height],
            collision: false,
            visible: true,
        }
    }

    pub fn with_collision(mut self) -> Self {
        self.collision = true;
        self
    }

    /// Tile at a tile coordinate, `None` outside the layer.
    pub fn tile(&self, tx: i64, ty: i64) -> Option<i32> {
        let row = self.tiles.get(usize::try_from(ty).ok()?)?;
        row.get(usize::try_from(tx).ok()?).copied()
    }

    pub fn set_tile(&mut self, tx: usize, ty: usize, value: i32) -> bool {
        match self.tiles.get_mut(ty).and_then(|row| row.get_mut(tx)) {
            Some(tile) => {
                *tile = value;
                true
            }
            None => false,
        }
    }

    /// Paint the 4-connected region of equal tiles around `(tx, ty)` with
    /// `value`. Returns the number of tiles changed.
    pub fn flood_fill(&mut self, tx: usize, ty: usize, value: i32) -> usize {
        let Some(target) = self.tile(tx as i64, ty as i64) else {
            return 0;
        };
        if target == value {
            return 0;
        }
        let mut filled = 0;
        let mut pending = vec![(tx, ty)];
        while let Some((x, y)) = pending.pop() {
            if self.tile(x as i64, y as i64) != Some(target) {
                continue;
            }
            self.tiles[y][x] = value;
            filled += 1;
            pending.push((x + 1, y));
            pending.push((x, y + 1));
            if let Some(left) = x.checked_sub(1) {
                pending.push((left, y));
            }
            if let Some(up) = y.checked_sub(1) {
                pending.push((x, up));
            }
        }
        filled
    }
}

/// Camera rectangle in scene pixels.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    /// Center on `(focus_x, focus_y)` without leaving a `scene_width` x
    /// `scene_height` area.
    pub fn follow(
        focus_x: f64,
        focus_y: f64,
        screen: (f64, f64),
        scene_width: f64,
        scene_height: f64,
    ) -> Self {
        let (width, height) = screen;
        let x = (focus_x - width / 2.0).clamp(0.0, (scene_width - width).max(0.0));
        let y = (focus_y - height / 2.0).clamp(0.0, (scene_height - height).max(0.0));
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    #[serde(default)]
    pub id: String,
    /// Width in tiles.
    pub width: usize,
    /// Height in tiles.
    pub height: usize,
    /// Rendered tile edge in pixels.
    #[serde(default = "default_tile_px")]
    pub tile_size: f64,
    #[serde(default)]
    pub layers: Vec<Layer>,
}

impl Scene {
    pub fn new(id: impl Into<String>, width: usize, height: usize) -> Self {
        Self {
            id: id.into(),
            width,
            height,
            tile_size: default_tile_px(),
            layers: vec![Layer::new("Layer 1", width, height)],
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("invalid scene file")
    }

    pub fn pixel_width(&self) -> f64 {
        self.width as f64 * self.tile_size
    }

    pub fn pixel_height(&self) -> f64 {
        self.height as f64 * self.tile_size
    }

    pub fn layer_mut(&mut self, name: &str) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|layer| layer.name == name)
    }

    /// True if the pixel falls on a painted tile of any collision layer.
    /// Pixels outside a collision layer count as blocked.
    pub fn is_blocked_at(&self, x: f64, y: f64) -> bool {
        let tx = (x / self.tile_size).floor() as i64;
        let ty = (y / self.tile_size).floor() as i64;
        self.layers
            .iter()
            .filter(|layer| layer.collision)
            .any(|layer| layer.tile(tx, ty) != Some(DEFAULT_TILE))
    }

    /// Sample the four corners of a `size` box centered on `(x, y)`.
    pub fn collides(&self, x: f64, y: f64, size: f64) -> bool {
        let half = size / 2.0;
        [
            (x - half, y - half),
            (x + half, y - half),
            (x - half, y + half),
            (x + half, y + half),
        ]
        .into_iter()
        .any(|(px, py)| self.is_blocked_at(px, py))
    }

    /// Keep a `size` sprite centered on `(x, y)` inside the scene.
    pub fn clamp_position(&self, x: f64, y: f64, size: f64) -> (f64, f64) {
        let half = size / 2.0;
        (
            x.clamp(half, (self.pixel_width() - half).max(half)),
            y.clamp(half, (self.pixel_height() - half).max(half)),
        )
    }
}
