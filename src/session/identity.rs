//! Local participant identity and its persistence.

use std::sync::Arc;

use crate::common::clock::Clock;
use crate::domain::{PeerId, RoomCode};

use super::record::SessionRecord;
use super::store::{SessionStore, SESSION_STORAGE_KEY};

/// This participant's identity within one room.
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub peer_id: PeerId,
    pub name: String,
    pub room_code: RoomCode,
    pub is_host: bool,
}

/// Saves, loads, and clears the single persisted session record.
///
/// `load` doubles as the expiry check: an absent, corrupt, or stale record is
/// cleared from storage and reported as `None`, falling back to a manual
/// join.
#[derive(Clone)]
pub struct SessionPersistence {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
}

impl SessionPersistence {
    pub fn new(store: Arc<dyn SessionStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Persist the current identity, replacing any prior record
    pub fn save(&self, identity: &SessionIdentity, game_in_progress: bool) {
        let record = SessionRecord {
            peer_id: identity.peer_id.clone(),
            room_code: identity.room_code.clone(),
            player_name: identity.name.clone(),
            is_host: identity.is_host,
            game_in_progress,
            timestamp: self.clock.now_millis(),
        };
        match serde_json::to_string(&record) {
            Ok(json) => self.store.put(SESSION_STORAGE_KEY, json),
            Err(e) => tracing::warn!("Failed to serialize session record: {}", e),
        }
    }

    /// Return the persisted record, or `None` (clearing storage) when it is
    /// absent, unparsable, or older than the expiry window
    pub fn load(&self) -> Option<SessionRecord> {
        let raw = self.store.get(SESSION_STORAGE_KEY)?;
        let record: SessionRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Discarding unparsable session record: {}", e);
                self.store.remove(SESSION_STORAGE_KEY);
                return None;
            }
        };
        if record.is_expired(self.clock.now_millis()) {
            tracing::info!("Persisted session expired, clearing");
            self.store.remove(SESSION_STORAGE_KEY);
            return None;
        }
        Some(record)
    }

    /// Remove the record (explicit leave)
    pub fn clear(&self) {
        self.store.remove(SESSION_STORAGE_KEY);
    }
}
