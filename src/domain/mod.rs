//! Domain model: participants, room codes, the host-side registry, and the
//! seam to the external game logic.

pub mod directory;
pub mod error;
pub mod hooks;
pub mod participant;
pub mod room_code;

pub use directory::{
    DisconnectedEntry, JoinOutcome, RoomDirectory, DISCONNECT_GRACE_MILLIS, ROOM_CAPACITY,
};
pub use error::DomainError;
pub use hooks::GameHooks;
pub use participant::{Participant, PeerId};
pub use room_code::{RoomCode, ROOM_CODE_ALPHABET, ROOM_CODE_LEN};

#[cfg(test)]
pub use hooks::MockGameHooks;
