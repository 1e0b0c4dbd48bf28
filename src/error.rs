use thiserror::Error;

#[derive(Error, PartialEq, Eq, Debug, Clone)]
pub enum Error {
    #[error("Invalid room ID '{0}': expected 9 alphanumeric characters.")]
    InvalidRoomId(String),
    #[error("Unable to connect to room {room}: {reason}")]
    ConnectionFailed { room: String, reason: String },
    #[error("Connection attempt {attempt} timed out.")]
    ConnectionTimeout { attempt: u32 },
    #[error("Connection error: {0}")]
    ConnectionError(String),
    #[error("Failed to send on channel: {0}")]
    ChannelSendFailed(String),
    #[error("Channel is closed.")]
    ChannelClosed,
    #[error("Malformed message: {0}")]
    DecodeError(String),
    #[error("Failed to encode message: {0}")]
    EncodeError(String),
    #[error("Unknown message type '{0}'.")]
    UnknownMessageType(String),
    #[error("Room {0} not found.")]
    RoomNotFound(String),
}
