//! Participant identity and room membership records.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::DomainError;

/// Identifier of one room participant.
///
/// Doubles as the participant's well-known transport address, so a peer can
/// be dialed directly during host migration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Validate and wrap an existing id (e.g. one restored from storage)
    pub fn new(id: String) -> Result<Self, DomainError> {
        if id.trim().is_empty() {
            return Err(DomainError::EmptyPeerId);
        }
        Ok(Self(id))
    }

    /// Allocate a fresh random id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One member of the room, host included.
///
/// `queued` marks a participant admitted while a game was already running:
/// it is listed in the room but held out of play until the next round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: PeerId,
    pub name: String,
    pub is_host: bool,
    pub queued: bool,
}

impl Participant {
    pub fn new(id: PeerId, name: String) -> Self {
        Self {
            id,
            name,
            is_host: false,
            queued: false,
        }
    }

    pub fn host(id: PeerId, name: String) -> Self {
        Self {
            id,
            name,
            is_host: true,
            queued: false,
        }
    }
}
