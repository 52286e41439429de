//! The locally-persisted session record.

use serde::{Deserialize, Serialize};

use crate::domain::{PeerId, RoomCode};

/// How long a persisted session stays resumable (1 hour)
pub const SESSION_EXPIRY_MILLIS: i64 = 60 * 60 * 1000;

/// One JSON object written under a single well-known storage key, enabling a
/// reloaded tab to resume its previous identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub peer_id: PeerId,
    pub room_code: RoomCode,
    pub player_name: String,
    pub is_host: bool,
    pub game_in_progress: bool,
    /// Unix millis at save time
    pub timestamp: i64,
}

impl SessionRecord {
    pub fn is_expired(&self, now: i64) -> bool {
        now - self.timestamp > SESSION_EXPIRY_MILLIS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(timestamp: i64) -> SessionRecord {
        SessionRecord {
            peer_id: PeerId::new("p-1".to_string()).unwrap(),
            room_code: RoomCode::new("ABCDE".to_string()).unwrap(),
            player_name: "alice".to_string(),
            is_host: true,
            game_in_progress: false,
            timestamp,
        }
    }

    #[test]
    fn test_record_serializes_with_camel_case_keys() {
        // テスト項目: 永続化レコードが規定の camelCase キーで書かれる
        // given (前提条件):
        let record = sample_record(42);

        // when (操作):
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&record).unwrap()).unwrap();

        // then (期待する結果):
        assert_eq!(json["peerId"], "p-1");
        assert_eq!(json["roomCode"], "ABCDE");
        assert_eq!(json["playerName"], "alice");
        assert_eq!(json["isHost"], true);
        assert_eq!(json["gameInProgress"], false);
        assert_eq!(json["timestamp"], 42);
    }

    #[test]
    fn test_record_expires_after_one_hour() {
        // テスト項目: 保存から 1 時間を超えたレコードが期限切れになる
        // given (前提条件):
        let record = sample_record(0);

        // then (期待する結果):
        assert!(!record.is_expired(SESSION_EXPIRY_MILLIS));
        assert!(record.is_expired(SESSION_EXPIRY_MILLIS + 1));
    }
}
