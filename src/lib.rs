mod chat;
mod clock;
mod config;
mod error;
mod ids;
mod iroh;
mod message;
mod persist;
mod player;
mod preset;
mod protocol;
mod room;
mod scene;
mod session;
mod state;
pub mod transport;

pub use chat::{ChatLine, ChatLog, prepare_text};
pub use clock::{Clock, unix_millis};
pub use config::{
    Config, DEFAULT_CHAT_COLOR, DEFAULT_DISPLAY_NAME, GameConfig, MAX_CHAT_LENGTH, PRESET_KEY,
    ROOM_ID_LEN, SessionConfig,
};
pub use error::Error;
pub use ids::{RoomId, random_id};
pub use crate::iroh::Iroh;
pub use message::{Frame, GameMessage, SignalMessage, decode};
pub use player::{ChatBubble, Player, PlayerId, PlayerMap, PlayerSnapshot};
pub use preset::{Category, CharacterPreset, PresetStore};
pub use protocol::{Interpolation, MoveOutcome, ProtocolHandler, Reaction};
pub use room::{GameEvent, GameRoom, Intent};
pub use scene::{DEFAULT_TILE, Layer, Scene, TILE_SCALE, TILE_SIZE, Viewport};
pub use session::{ChannelState, ConnectionStatus, OutboundQueue, PeerSession, Role, SessionEvent};
pub use state::{GameState, GameStore, StateUpdate};
