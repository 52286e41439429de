//! Room codes: short human-shareable identifiers for a room.
//!
//! A room code maps to the host's well-known transport address, so anyone
//! holding the code can dial the current host.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// Symbols allowed in a room code: letters and digits minus the visually
/// ambiguous ones (0/O, 1/I).
pub const ROOM_CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Number of symbols in a room code
pub const ROOM_CODE_LEN: usize = 5;

/// A validated 5-character room code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    /// Validate and wrap a code received from a user or from storage
    pub fn new(code: String) -> Result<Self, DomainError> {
        let code = code.trim().to_ascii_uppercase();
        let valid = code.len() == ROOM_CODE_LEN
            && code.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b));
        if !valid {
            return Err(DomainError::InvalidRoomCode(code));
        }
        Ok(Self(code))
    }

    /// Allocate a fresh uniformly-random code
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code = (0..ROOM_CODE_LEN)
            .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The host's well-known transport address for this room
    pub fn address(&self) -> String {
        format!("room-{}", self.0.to_ascii_lowercase())
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
