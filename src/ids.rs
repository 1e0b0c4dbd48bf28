use crate::{config::ROOM_ID_LEN, error::Error};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{fmt::Display, ops::Deref};

const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Random base-36 identifier of [`ROOM_ID_LEN`] characters.
pub fn random_id() -> String {
    let mut rng = rand::rng();
    (0..ROOM_ID_LEN)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Address of a room: the id of the peer that created it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Validate a room identifier, as carried in `?room=<id>`.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let valid = raw.chars().count() == ROOM_ID_LEN && raw.chars().all(|c| c.is_ascii_alphanumeric());
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(Error::InvalidRoomId(raw.to_string()))
        }
    }

    pub fn generate() -> Self {
        Self(random_id())
    }

    /// Query string that lets a second participant join this room.
    pub fn query(&self) -> String {
        format!("?room={}", self.0)
    }

    /// Extract and validate the `room` parameter of a query string.
    pub fn from_query(query: &str) -> Result<Option<Self>, Error> {
        query
            .trim_start_matches('?')
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == "room")
            .map(|(_, value)| Self::parse(value))
            .transpose()
    }
}

impl Deref for RoomId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for RoomId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomId> for String {
    fn from(value: RoomId) -> Self {
        value.0
    }
}
