//! Session roles and persistence.
//!
//! [`HostSession`] runs on the one authoritative participant; every other
//! participant runs a [`PeerSession`]. Both are event-driven: the embedding
//! application owns the loop and feeds transport events into the session's
//! handlers, which run to completion synchronously.

pub mod host;
pub mod identity;
pub mod peer;
pub mod record;
pub mod store;

use thiserror::Error;

use crate::domain::DomainError;
use crate::transport::TransportError;

pub use host::HostSession;
pub use identity::{SessionIdentity, SessionPersistence};
pub use peer::{PeerNotice, PeerSession, JOIN_TIMEOUT_MILLIS};
pub use record::{SessionRecord, SESSION_EXPIRY_MILLIS};
pub use store::{InMemorySessionStore, SessionStore, SESSION_STORAGE_KEY};

/// Failures surfaced by session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("room '{0}' not found")]
    RoomNotFound(String),

    #[error("room is full")]
    RoomFull,

    #[error("connection attempt timed out")]
    ConnectTimeout,

    #[error("could not allocate an unclaimed room code")]
    RoomCodeExhausted,

    #[error("persisted session is stale or its identity was claimed elsewhere")]
    SessionExpired,

    #[error("no other participants available")]
    NoEligibleSuccessor,

    #[error("join was rejected: {0}")]
    JoinRejected(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
