//! Protocol message definitions and JSON codec.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{Participant, PeerId};

/// All messages exchanged inside a room.
///
/// Host-authoritative unless noted. Snapshots travel as opaque JSON values;
/// their schema belongs to the game, not to this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProtocolMessage {
    /// peer → host: join or reconnection handshake
    #[serde(rename_all = "camelCase")]
    Join {
        participant_id: PeerId,
        name: String,
        #[serde(default)]
        reconnecting: bool,
        /// Client's copy of the last unfiltered backup, offered so a host
        /// that lost its own memory can recover
        #[serde(default, skip_serializing_if = "Option::is_none")]
        game_state_backup: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        join_order: Option<Vec<PeerId>>,
    },

    /// host → joiner
    #[serde(rename_all = "camelCase")]
    JoinAccepted {
        participant_id: PeerId,
        room_code: String,
        game_in_progress: bool,
        #[serde(default)]
        reconnected: bool,
    },

    /// host → joiner: full roster right after admission
    #[serde(rename_all = "camelCase")]
    PlayerList {
        participants: Vec<Participant>,
        join_order: Vec<PeerId>,
    },

    /// host → others
    #[serde(rename_all = "camelCase")]
    PlayerJoined { participant: Participant },

    /// host → others: permanent departure
    #[serde(rename_all = "camelCase")]
    PlayerLeft { participant_id: PeerId },

    /// host → others: transport closed, participant may still return
    #[serde(rename_all = "camelCase")]
    PlayerDisconnected {
        participant_id: PeerId,
        may_reconnect: bool,
    },

    /// host → others: grace-period restoration
    #[serde(rename_all = "camelCase")]
    PlayerReconnected { participant_id: PeerId },

    /// host → peer: viewer-filtered snapshot
    #[serde(rename_all = "camelCase")]
    GameState { state: Value },

    /// host → peer: whole unfiltered snapshot kept for disaster recovery
    #[serde(rename_all = "camelCase")]
    FullStateBackup {
        state: Value,
        join_order: Vec<PeerId>,
    },

    /// new host → all, after a migration
    #[serde(rename_all = "camelCase")]
    NewHostAnnouncement {
        new_host_id: PeerId,
        room_code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        game_state: Option<Value>,
        join_order: Vec<PeerId>,
    },

    /// peer → host: player intent, opaque to this crate
    #[serde(rename_all = "camelCase")]
    Action {
        participant_id: PeerId,
        payload: Value,
    },

    /// either direction; the host relays to everyone else
    #[serde(rename_all = "camelCase")]
    Chat {
        participant_id: PeerId,
        text: String,
        timestamp: i64,
    },

    /// host → peer: surfaced to the rejected or failing side only
    #[serde(rename_all = "camelCase")]
    Error { message: String },

    /// Game-specific passthrough, treated like an action by the host
    #[serde(rename_all = "camelCase")]
    Game {
        participant_id: PeerId,
        payload: Value,
    },
}

/// Serialize a message to its JSON wire form
pub fn encode(message: &ProtocolMessage) -> String {
    serde_json::to_string(message).expect("protocol messages always serialize")
}

/// Parse a wire message. Unknown `type` tags and malformed payloads are
/// errors; the caller logs and ignores them.
pub fn decode(text: &str) -> Result<ProtocolMessage, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_accepted_wire_shape() {
        // テスト項目: join-accepted がタグ付き camelCase JSON になる
        // given (前提条件):
        let message = ProtocolMessage::JoinAccepted {
            participant_id: PeerId::new("p-1".to_string()).unwrap(),
            room_code: "ABCDE".to_string(),
            game_in_progress: true,
            reconnected: false,
        };

        // when (操作):
        let wire: Value = serde_json::from_str(&encode(&message)).unwrap();

        // then (期待する結果):
        assert_eq!(wire["type"], "join-accepted");
        assert_eq!(wire["participantId"], "p-1");
        assert_eq!(wire["roomCode"], "ABCDE");
        assert_eq!(wire["gameInProgress"], true);
    }

    #[test]
    fn test_join_round_trips_with_optional_fields() {
        // テスト項目: 任意フィールド付き join がラウンドトリップする
        // given (前提条件):
        let message = ProtocolMessage::Join {
            participant_id: PeerId::new("p-2".to_string()).unwrap(),
            name: "bob".to_string(),
            reconnecting: true,
            game_state_backup: Some(json!({"phase": "betting"})),
            join_order: Some(vec![PeerId::new("h".to_string()).unwrap()]),
        };

        // when (操作):
        let decoded = decode(&encode(&message)).unwrap();

        // then (期待する結果):
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_join_tolerates_missing_optional_fields() {
        // テスト項目: 旧クライアントからの最小形 join が受理される
        // given (前提条件):
        let wire = r#"{"type":"join","participantId":"p-3","name":"carol"}"#;

        // when (操作):
        let decoded = decode(wire).unwrap();

        // then (期待する結果):
        match decoded {
            ProtocolMessage::Join {
                reconnecting,
                game_state_backup,
                join_order,
                ..
            } => {
                assert!(!reconnecting);
                assert!(game_state_backup.is_none());
                assert!(join_order.is_none());
            }
            other => panic!("expected join, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_message_type_fails_to_decode() {
        // テスト項目: 未知の type タグがデコードエラーになる（呼び出し側で無視）
        // given (前提条件):
        let wire = r#"{"type":"time-travel","participantId":"p-4"}"#;

        // when (操作):
        let result = decode(wire);

        // then (期待する結果):
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_json_fails_to_decode() {
        // テスト項目: 壊れた JSON がデコードエラーになる
        // given (前提条件):
        let wire = "{not json";

        // when (操作):
        let result = decode(wire);

        // then (期待する結果):
        assert!(result.is_err());
    }
}
