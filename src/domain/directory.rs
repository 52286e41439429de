//! Host-side participant registry.
//!
//! The directory is the single authority for who is in the room: active
//! members, recently-disconnected members still inside the grace period, and
//! the join order used as the election tiebreaker during host migration.
//!
//! All mutation is synchronous; the session layer calls into the directory
//! from inside its message handlers, so no locking is needed.

use std::collections::HashMap;

use super::participant::{Participant, PeerId};

/// Maximum number of simultaneously active participants
pub const ROOM_CAPACITY: usize = 10;

/// How long a disconnected participant may still be restored (5 minutes)
pub const DISCONNECT_GRACE_MILLIS: i64 = 5 * 60 * 1000;

/// A participant parked in the grace-period cache after a transport close.
#[derive(Debug, Clone)]
pub struct DisconnectedEntry {
    pub participant: Participant,
    pub disconnected_at: i64,
}

/// Result of a join request, decided by [`RoomDirectory::accept_join`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Brand-new participant admitted to the room
    Admitted { participant: Participant },
    /// Known participant restored from the active set or the grace cache
    Restored { participant: Participant },
    /// Active participant count is at capacity
    RoomFull,
}

/// Registry of room participants, owned by the current host.
#[derive(Debug)]
pub struct RoomDirectory {
    host_id: PeerId,
    active: HashMap<PeerId, Participant>,
    disconnected: HashMap<PeerId, DisconnectedEntry>,
    join_order: Vec<PeerId>,
    capacity: usize,
    grace_millis: i64,
}

impl RoomDirectory {
    /// Create the directory for a freshly-registered host.
    ///
    /// The host becomes the first active participant and the join order is
    /// seeded with its id at index 0.
    pub fn register_host(host_id: PeerId, name: String) -> Self {
        let mut active = HashMap::new();
        active.insert(host_id.clone(), Participant::host(host_id.clone(), name));
        Self {
            host_id: host_id.clone(),
            active,
            disconnected: HashMap::new(),
            join_order: vec![host_id],
            capacity: ROOM_CAPACITY,
            grace_millis: DISCONNECT_GRACE_MILLIS,
        }
    }

    /// Rebuild a directory around a new host, from roster knowledge carried
    /// over a migration. The join order is normalized: deduplicated, host
    /// forced to index 0, and every active participant guaranteed a slot.
    pub fn from_roster(
        host_id: PeerId,
        host_name: String,
        others: impl IntoIterator<Item = Participant>,
        join_order: Vec<PeerId>,
    ) -> Self {
        let mut directory = Self::register_host(host_id.clone(), host_name);
        for mut participant in others {
            if participant.id == host_id {
                continue;
            }
            participant.is_host = false;
            directory.active.insert(participant.id.clone(), participant);
        }
        let mut order = vec![host_id];
        for id in join_order {
            if !order.contains(&id) {
                order.push(id);
            }
        }
        directory.join_order = order;
        let missing: Vec<PeerId> = directory
            .active
            .keys()
            .filter(|id| !directory.join_order.contains(id))
            .cloned()
            .collect();
        directory.join_order.extend(missing);
        directory
    }

    /// Shrink the capacity limit (tests only; the protocol limit is 10)
    #[cfg(test)]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn host_id(&self) -> &PeerId {
        &self.host_id
    }

    /// Active participants in join order
    pub fn participants(&self) -> Vec<Participant> {
        self.join_order
            .iter()
            .filter_map(|id| self.active.get(id))
            .cloned()
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn contains_active(&self, id: &PeerId) -> bool {
        self.active.contains_key(id)
    }

    pub fn get(&self, id: &PeerId) -> Option<&Participant> {
        self.active.get(id)
    }

    pub fn join_order(&self) -> &[PeerId] {
        &self.join_order
    }

    /// Whether `id` sits in the grace-period cache
    pub fn is_disconnected(&self, id: &PeerId) -> bool {
        self.disconnected.contains_key(id)
    }

    /// Decide a join request.
    ///
    /// A request from a known id (active or inside the grace cache), or one
    /// that explicitly sets `reconnecting`, is a restoration: the participant
    /// keeps its place in the join order and its `queued` flag is cleared.
    /// Otherwise the joiner is admitted as a new participant, `queued` when a
    /// game is already in progress, or rejected when the room is full.
    pub fn accept_join(
        &mut self,
        from: PeerId,
        name: String,
        reconnecting: bool,
        game_in_progress: bool,
        now: i64,
    ) -> JoinOutcome {
        self.purge_expired(now);

        let known = self.active.contains_key(&from) || self.disconnected.contains_key(&from);
        if known || reconnecting {
            let mut participant = self
                .disconnected
                .remove(&from)
                .map(|entry| entry.participant)
                .or_else(|| self.active.remove(&from))
                .unwrap_or_else(|| Participant::new(from.clone(), name));
            participant.queued = false;
            participant.is_host = from == self.host_id;
            self.active.insert(from.clone(), participant.clone());
            self.ensure_in_join_order(&from);
            return JoinOutcome::Restored { participant };
        }

        if self.active.len() >= self.capacity {
            return JoinOutcome::RoomFull;
        }

        let mut participant = Participant::new(from.clone(), name);
        participant.queued = game_in_progress;
        self.active.insert(from.clone(), participant.clone());
        self.join_order.push(from);
        JoinOutcome::Admitted { participant }
    }

    /// Park a participant in the grace cache after its transport closed.
    ///
    /// Returns the parked participant, or `None` if the id was not active.
    /// The id keeps its place in the join order so a restored participant
    /// retains its election rank.
    pub fn handle_disconnect(&mut self, id: &PeerId, now: i64) -> Option<Participant> {
        let participant = self.active.remove(id)?;
        self.disconnected.insert(
            id.clone(),
            DisconnectedEntry {
                participant: participant.clone(),
                disconnected_at: now,
            },
        );
        Some(participant)
    }

    /// Permanently remove a participant (explicit leave, not a transport
    /// failure). Drops it from the active set, the grace cache, and the join
    /// order.
    pub fn leave(&mut self, id: &PeerId) -> Option<Participant> {
        let participant = self
            .active
            .remove(id)
            .or_else(|| self.disconnected.remove(id).map(|entry| entry.participant));
        self.join_order.retain(|existing| existing != id);
        participant
    }

    /// Drop grace-cache entries older than the grace period.
    ///
    /// Called lazily on the next directory access rather than from a timer.
    /// Expired participants also lose their join-order slot: their departure
    /// is now considered permanent.
    pub fn purge_expired(&mut self, now: i64) {
        let grace = self.grace_millis;
        let expired: Vec<PeerId> = self
            .disconnected
            .iter()
            .filter(|(_, entry)| now - entry.disconnected_at > grace)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            tracing::info!("Participant '{}' grace period expired, removing", id);
            self.disconnected.remove(&id);
            self.join_order.retain(|existing| existing != &id);
        }
    }

    /// Adopt a join order supplied by a reconnecting client.
    ///
    /// Only applied when this directory knows nothing beyond the host itself
    /// and the supplying client, i.e. the host reloaded and lost its memory.
    /// The supplier already re-registered when its hint is processed, so its
    /// own entry carries no information. Ids are deduplicated, the host is
    /// forced back to index 0, and the supplier keeps a slot even if its own
    /// hint omits it.
    pub fn adopt_join_order_hint(&mut self, hint: &[PeerId], supplier: &PeerId) {
        let informed = self
            .join_order
            .iter()
            .any(|id| id != &self.host_id && id != supplier);
        if informed {
            return;
        }
        let mut order = vec![self.host_id.clone()];
        for id in hint {
            if !order.contains(id) {
                order.push(id.clone());
            }
        }
        if !order.contains(supplier) {
            order.push(supplier.clone());
        }
        self.join_order = order;
    }

    fn ensure_in_join_order(&mut self, id: &PeerId) {
        if !self.join_order.contains(id) {
            self.join_order.push(id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory_with_two_peers() -> (RoomDirectory, PeerId, PeerId, PeerId) {
        let host = PeerId::generate();
        let p1 = PeerId::generate();
        let p2 = PeerId::generate();
        let mut directory = RoomDirectory::register_host(host.clone(), "host".to_string());
        directory.accept_join(p1.clone(), "p1".to_string(), false, false, 0);
        directory.accept_join(p2.clone(), "p2".to_string(), false, false, 0);
        (directory, host, p1, p2)
    }

    #[test]
    fn test_register_host_seeds_join_order() {
        // テスト項目: ホスト登録で join order の先頭にホスト ID が置かれる
        // given (前提条件):
        let host = PeerId::generate();

        // when (操作):
        let directory = RoomDirectory::register_host(host.clone(), "host".to_string());

        // then (期待する結果):
        assert_eq!(directory.join_order(), &[host.clone()]);
        assert!(directory.get(&host).unwrap().is_host);
        assert_eq!(directory.active_count(), 1);
    }

    #[test]
    fn test_accept_join_admits_new_participant_in_order() {
        // テスト項目: 新規参加者が join order の末尾に追加される
        // given (前提条件):
        let (directory, host, p1, p2) = directory_with_two_peers();

        // then (期待する結果):
        assert_eq!(directory.join_order(), &[host, p1, p2]);
        assert_eq!(directory.active_count(), 3);
    }

    #[test]
    fn test_accept_join_queues_participant_during_game() {
        // テスト項目: ゲーム進行中の参加者は queued で受け入れられる
        // given (前提条件):
        let host = PeerId::generate();
        let mut directory = RoomDirectory::register_host(host, "host".to_string());

        // when (操作):
        let outcome =
            directory.accept_join(PeerId::generate(), "late".to_string(), false, true, 0);

        // then (期待する結果):
        match outcome {
            JoinOutcome::Admitted { participant } => assert!(participant.queued),
            other => panic!("expected admission, got {other:?}"),
        }
    }

    #[test]
    fn test_accept_join_rejects_when_room_full() {
        // テスト項目: 定員超過時に RoomFull が返り、状態が変化しない
        // given (前提条件):
        let host = PeerId::generate();
        let mut directory =
            RoomDirectory::register_host(host, "host".to_string()).with_capacity(2);
        directory.accept_join(PeerId::generate(), "p1".to_string(), false, false, 0);

        // when (操作):
        let outcome = directory.accept_join(PeerId::generate(), "p2".to_string(), false, false, 0);

        // then (期待する結果):
        assert_eq!(outcome, JoinOutcome::RoomFull);
        assert_eq!(directory.active_count(), 2);
        assert_eq!(directory.join_order().len(), 2);
    }

    #[test]
    fn test_disconnect_moves_participant_to_grace_cache() {
        // テスト項目: 切断された参加者が active からグレースキャッシュに移る
        // given (前提条件):
        let (mut directory, _host, p1, _p2) = directory_with_two_peers();

        // when (操作):
        let parked = directory.handle_disconnect(&p1, 1_000);

        // then (期待する結果):
        assert!(parked.is_some());
        assert!(!directory.contains_active(&p1));
        assert!(directory.is_disconnected(&p1));
        // join order は保持される
        assert!(directory.join_order().contains(&p1));
    }

    #[test]
    fn test_participant_never_active_and_cached_at_once() {
        // テスト項目: 同じ ID が active とキャッシュに同時に存在しない
        // given (前提条件):
        let (mut directory, _host, p1, _p2) = directory_with_two_peers();
        directory.handle_disconnect(&p1, 1_000);

        // when (操作): 復帰
        directory.accept_join(p1.clone(), "p1".to_string(), true, false, 2_000);

        // then (期待する結果):
        assert!(directory.contains_active(&p1));
        assert!(!directory.is_disconnected(&p1));
    }

    #[test]
    fn test_reconnect_within_grace_restores_and_clears_queued() {
        // テスト項目: グレース期間内の再接続で queued がリセットされ join order が重複しない
        // given (前提条件):
        let host = PeerId::generate();
        let mut directory = RoomDirectory::register_host(host.clone(), "host".to_string());
        let late = PeerId::generate();
        directory.accept_join(late.clone(), "late".to_string(), false, true, 0);
        directory.handle_disconnect(&late, 1_000);

        // when (操作): 5 分以内に同じ ID で再接続
        let outcome = directory.accept_join(late.clone(), "late".to_string(), true, true, 60_000);

        // then (期待する結果):
        match outcome {
            JoinOutcome::Restored { participant } => assert!(!participant.queued),
            other => panic!("expected restoration, got {other:?}"),
        }
        let occurrences = directory
            .join_order()
            .iter()
            .filter(|id| **id == late)
            .count();
        assert_eq!(occurrences, 1);
    }

    #[test]
    fn test_grace_expiry_purges_cache_and_join_order() {
        // テスト項目: グレース期間超過でキャッシュと join order から除去される
        // given (前提条件):
        let (mut directory, _host, p1, _p2) = directory_with_two_peers();
        directory.handle_disconnect(&p1, 0);

        // when (操作): 5 分 + 1ms 経過後に次のアクセスが走る
        directory.purge_expired(DISCONNECT_GRACE_MILLIS + 1);

        // then (期待する結果):
        assert!(!directory.is_disconnected(&p1));
        assert!(!directory.join_order().contains(&p1));
    }

    #[test]
    fn test_expired_id_rejoins_as_new_participant() {
        // テスト項目: 期限切れ後の再参加は復帰ではなく新規参加になる
        // given (前提条件):
        let (mut directory, _host, p1, _p2) = directory_with_two_peers();
        directory.handle_disconnect(&p1, 0);

        // when (操作): グレース期間をとうに過ぎてから reconnecting なしで参加
        let outcome = directory.accept_join(
            p1.clone(),
            "p1".to_string(),
            false,
            false,
            DISCONNECT_GRACE_MILLIS * 2,
        );

        // then (期待する結果):
        assert!(matches!(outcome, JoinOutcome::Admitted { .. }));
    }

    #[test]
    fn test_leave_removes_permanently() {
        // テスト項目: 明示的な退出で全ての集合から除去される
        // given (前提条件):
        let (mut directory, _host, p1, _p2) = directory_with_two_peers();

        // when (操作):
        let left = directory.leave(&p1);

        // then (期待する結果):
        assert!(left.is_some());
        assert!(!directory.contains_active(&p1));
        assert!(!directory.is_disconnected(&p1));
        assert!(!directory.join_order().contains(&p1));
    }

    #[test]
    fn test_join_order_hint_adopted_only_without_own_memory() {
        // テスト項目: join order ヒントはホストと提供者以外を知らない場合のみ採用される
        // given (前提条件):
        let host = PeerId::generate();
        let p1 = PeerId::generate();
        let p2 = PeerId::generate();
        let mut amnesiac = RoomDirectory::register_host(host.clone(), "host".to_string());

        // when (操作): リロード直後のホストがクライアントのヒントを受け取る
        amnesiac.adopt_join_order_hint(&[host.clone(), p1.clone(), p2.clone(), p1.clone()], &p1);

        // then (期待する結果): 重複なしで採用され、ホストが先頭
        assert_eq!(amnesiac.join_order(), &[host.clone(), p1.clone(), p2.clone()]);

        // when (操作): 既に他の参加者を知っているホストは無視する
        let (mut informed, ihost, ip1, ip2) = directory_with_two_peers();
        informed.adopt_join_order_hint(&[ihost.clone(), ip2.clone(), ip1.clone()], &ip1);

        // then (期待する結果):
        assert_eq!(informed.join_order(), &[ihost, ip1, ip2]);
    }

    #[test]
    fn test_join_order_hint_accepted_after_supplier_rejoined() {
        // テスト項目: ヒントの提供者自身が復帰登録済みでも採用される
        // given (前提条件): リロード直後のホストに p1 が復帰済み
        let host = PeerId::generate();
        let p1 = PeerId::generate();
        let p2 = PeerId::generate();
        let mut directory = RoomDirectory::register_host(host.clone(), "host".to_string());
        directory.accept_join(p1.clone(), "p1".to_string(), true, false, 0);
        assert_eq!(directory.join_order(), &[host.clone(), p1.clone()]);

        // when (操作): p1 が全員分の join order を知らせる
        directory.adopt_join_order_hint(&[host.clone(), p1.clone(), p2.clone()], &p1);

        // then (期待する結果): 未復帰の p2 も選出順位を取り戻す
        assert_eq!(directory.join_order(), &[host, p1, p2]);
    }
}
