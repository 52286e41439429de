//! Domain-layer errors.

use thiserror::Error;

/// Validation errors raised by domain value objects
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("peer id must not be empty")]
    EmptyPeerId,

    #[error("invalid room code '{0}': expected 5 characters from the room-code alphabet")]
    InvalidRoomCode(String),

    #[error("display name must not be empty")]
    EmptyDisplayName,
}
