//! Host-migration state machine.
//!
//! Every non-host participant supervises its host connection. When the host
//! is lost the peer first retries the host directly, then falls back to a
//! leader election over the replicated join order. The machine here is
//! pure: it consumes events (transport, timer, inbound message) and emits
//! effects, so timing behavior is testable without wall-clock delays. The
//! async [`driver`] executes the effects over a real transport.

pub mod driver;

use crate::domain::PeerId;

pub use driver::{run_migration, MigrationOutcome};

/// Reconnection attempts before electing a successor
pub const MAX_RECONNECT_ATTEMPTS: u8 = 5;

/// Fixed cadence between reconnection attempts
pub const RETRY_INTERVAL_MILLIS: u64 = 1_000;

/// Independent bound on each single reconnection attempt
pub const ATTEMPT_TIMEOUT_MILLIS: u64 = 800;

/// Where this peer stands in the migration protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationState {
    /// Host link healthy
    Connected,
    /// Host lost; direct reconnection attempt `attempt` in flight or pending
    Reconnecting { attempt: u8 },
    /// Direct reconnection succeeded; no migration needed
    Recovered,
    /// All attempts exhausted; election decided
    MigrationPending,
    /// This peer won the election and is taking over
    Migrating,
    /// Takeover finished; this peer is the host now
    NewHostSelf,
    /// Another peer is (expected to become) the host
    FollowingNewHost { host: PeerId },
    /// No eligible successor existed
    Failed,
}

/// Inputs driving the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationEvent {
    /// The host connection closed or errored
    HostConnectionLost,
    /// The in-flight reconnection attempt succeeded
    ReconnectSucceeded,
    /// The in-flight reconnection attempt failed or timed out
    ReconnectFailed,
    /// The retry cadence timer fired
    RetryTimerFired,
    /// A `new-host-announcement` arrived (supersedes everything else)
    AnnouncementReceived { new_host: PeerId },
    /// Our own takeover completed
    TakeoverComplete,
}

/// Outputs for the driver to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationEffect {
    /// Dial the host's address and redo the reconnecting join handshake,
    /// bounded by [`ATTEMPT_TIMEOUT_MILLIS`]
    AttemptReconnect { attempt: u8 },
    /// Arm the retry timer
    ScheduleRetry { delay_millis: u64 },
    /// Disarm timers and abandon in-flight attempts
    CancelRetry,
    /// We are the elected leader: take the room over
    BecomeHost,
    /// Wait passively for the expected leader's announcement
    AwaitAnnouncement { expected_leader: PeerId },
    /// Resume under the announced host
    FollowNewHost { host: PeerId },
    /// Terminal: nobody left to take over
    Abort,
}

/// Pure transition machine for one peer's view of a migration.
///
/// Election inputs are frozen at construction: the join order and roster as
/// last replicated before the host vanished. Every survivor holds the same
/// copies, so each elects the same leader independently.
#[derive(Debug)]
pub struct MigrationMachine {
    state: MigrationState,
    self_id: PeerId,
    old_host: PeerId,
    join_order: Vec<PeerId>,
    known: Vec<PeerId>,
}

impl MigrationMachine {
    pub fn new(
        self_id: PeerId,
        old_host: PeerId,
        join_order: Vec<PeerId>,
        known: Vec<PeerId>,
    ) -> Self {
        Self {
            state: MigrationState::Connected,
            self_id,
            old_host,
            join_order,
            known,
        }
    }

    pub fn state(&self) -> &MigrationState {
        &self.state
    }

    /// The migration leader: first join-order entry, old host excluded, that
    /// is still a known participant
    pub fn elect_leader(&self) -> Option<&PeerId> {
        self.join_order
            .iter()
            .filter(|id| **id != self.old_host)
            .find(|id| **id == self.self_id || self.known.contains(id))
    }

    /// Advance on one event, returning the effects to execute.
    pub fn on_event(&mut self, event: MigrationEvent) -> Vec<MigrationEffect> {
        use MigrationEvent as Ev;
        use MigrationState as St;

        // An announcement supersedes whatever we were doing, even our own
        // takeover: the last processed announcement wins.
        if let Ev::AnnouncementReceived { new_host } = &event {
            let host = new_host.clone();
            self.state = St::FollowingNewHost { host: host.clone() };
            return vec![
                MigrationEffect::CancelRetry,
                MigrationEffect::FollowNewHost { host },
            ];
        }

        match (&self.state, event) {
            (St::Connected, Ev::HostConnectionLost) => {
                self.state = St::Reconnecting { attempt: 1 };
                vec![MigrationEffect::AttemptReconnect { attempt: 1 }]
            }
            (St::Reconnecting { .. }, Ev::ReconnectSucceeded) => {
                self.state = St::Recovered;
                vec![MigrationEffect::CancelRetry]
            }
            (St::Reconnecting { attempt }, Ev::ReconnectFailed) => {
                let attempt = *attempt;
                if attempt < MAX_RECONNECT_ATTEMPTS {
                    vec![MigrationEffect::ScheduleRetry {
                        delay_millis: RETRY_INTERVAL_MILLIS,
                    }]
                } else {
                    self.state = St::MigrationPending;
                    self.decide_succession()
                }
            }
            (St::Reconnecting { attempt }, Ev::RetryTimerFired) => {
                let next = attempt + 1;
                self.state = St::Reconnecting { attempt: next };
                vec![MigrationEffect::AttemptReconnect { attempt: next }]
            }
            (St::Migrating, Ev::TakeoverComplete) => {
                self.state = St::NewHostSelf;
                vec![]
            }
            (state, event) => {
                tracing::debug!("Ignoring {:?} in migration state {:?}", event, state);
                vec![]
            }
        }
    }

    fn decide_succession(&mut self) -> Vec<MigrationEffect> {
        match self.elect_leader().cloned() {
            None => {
                self.state = MigrationState::Failed;
                vec![MigrationEffect::Abort]
            }
            Some(leader) if leader == self.self_id => {
                self.state = MigrationState::Migrating;
                vec![MigrationEffect::BecomeHost]
            }
            Some(leader) => {
                self.state = MigrationState::FollowingNewHost {
                    host: leader.clone(),
                };
                vec![MigrationEffect::AwaitAnnouncement {
                    expected_leader: leader,
                }]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<PeerId> {
        (0..n)
            .map(|i| PeerId::new(format!("peer-{i}")).unwrap())
            .collect()
    }

    /// Feed the machine the full failure sequence: initial loss, then
    /// alternating retry timers and failures until attempts exhaust.
    fn exhaust_reconnects(machine: &mut MigrationMachine) -> Vec<MigrationEffect> {
        let mut effects = machine.on_event(MigrationEvent::HostConnectionLost);
        loop {
            assert!(matches!(
                effects.last(),
                Some(MigrationEffect::AttemptReconnect { .. })
            ));
            effects = machine.on_event(MigrationEvent::ReconnectFailed);
            match effects.first() {
                Some(MigrationEffect::ScheduleRetry { delay_millis }) => {
                    assert_eq!(*delay_millis, RETRY_INTERVAL_MILLIS);
                    effects = machine.on_event(MigrationEvent::RetryTimerFired);
                }
                _ => return effects,
            }
        }
    }

    #[test]
    fn test_first_successful_reconnect_recovers() {
        // テスト項目: 最初の再接続成功で Recovered になり残りがキャンセルされる
        // given (前提条件):
        let peers = ids(3);
        let mut machine = MigrationMachine::new(
            peers[1].clone(),
            peers[0].clone(),
            peers.clone(),
            peers.clone(),
        );

        // when (操作):
        let effects = machine.on_event(MigrationEvent::HostConnectionLost);
        assert_eq!(effects, vec![MigrationEffect::AttemptReconnect { attempt: 1 }]);
        let effects = machine.on_event(MigrationEvent::ReconnectSucceeded);

        // then (期待する結果):
        assert_eq!(machine.state(), &MigrationState::Recovered);
        assert_eq!(effects, vec![MigrationEffect::CancelRetry]);
    }

    #[test]
    fn test_exhausted_attempts_elect_self_as_leader() {
        // テスト項目: 5 回失敗後、join order 先頭の生存者が自分ならホスト昇格
        // given (前提条件): join order = [H, P1, P2]、自分は P1
        let peers = ids(3);
        let mut machine = MigrationMachine::new(
            peers[1].clone(),
            peers[0].clone(),
            peers.clone(),
            peers.clone(),
        );

        // when (操作):
        let effects = exhaust_reconnects(&mut machine);

        // then (期待する結果):
        assert_eq!(effects, vec![MigrationEffect::BecomeHost]);
        assert_eq!(machine.state(), &MigrationState::Migrating);
        let effects = machine.on_event(MigrationEvent::TakeoverComplete);
        assert!(effects.is_empty());
        assert_eq!(machine.state(), &MigrationState::NewHostSelf);
    }

    #[test]
    fn test_exhausted_attempts_follow_elected_leader() {
        // テスト項目: 自分がリーダーでなければ受動的に告知を待つ
        // given (前提条件): join order = [H, P1, P2]、自分は P2
        let peers = ids(3);
        let mut machine = MigrationMachine::new(
            peers[2].clone(),
            peers[0].clone(),
            peers.clone(),
            peers.clone(),
        );

        // when (操作):
        let effects = exhaust_reconnects(&mut machine);

        // then (期待する結果): リーダーは P1
        assert_eq!(
            effects,
            vec![MigrationEffect::AwaitAnnouncement {
                expected_leader: peers[1].clone()
            }]
        );
        assert_eq!(
            machine.state(),
            &MigrationState::FollowingNewHost {
                host: peers[1].clone()
            }
        );
    }

    #[test]
    fn test_unknown_join_order_entries_are_skipped_in_election() {
        // テスト項目: join order 上の未知の参加者は選出から除外される
        // given (前提条件): P1 は既に退出済みで known に含まれない
        let peers = ids(4);
        let known = vec![peers[2].clone(), peers[3].clone()];
        let machine = MigrationMachine::new(
            peers[3].clone(),
            peers[0].clone(),
            peers.clone(),
            known,
        );

        // when (操作):
        let leader = machine.elect_leader();

        // then (期待する結果):
        assert_eq!(leader, Some(&peers[2]));
    }

    #[test]
    fn test_sole_survivor_aborts_with_no_successor() {
        // テスト項目: 後継者が存在しない場合に終端エラーで停止する
        // given (前提条件): 部屋にはホストと自分しかいなかった
        let peers = ids(2);
        let mut machine = MigrationMachine::new(
            peers[1].clone(),
            peers[0].clone(),
            vec![peers[0].clone()],
            vec![],
        );

        // when (操作):
        let effects = exhaust_reconnects(&mut machine);

        // then (期待する結果):
        assert_eq!(effects, vec![MigrationEffect::Abort]);
        assert_eq!(machine.state(), &MigrationState::Failed);
    }

    #[test]
    fn test_announcement_supersedes_reconnect_attempts() {
        // テスト項目: 再接続中に届いた告知が再試行を打ち切って優先される
        // given (前提条件):
        let peers = ids(3);
        let mut machine = MigrationMachine::new(
            peers[2].clone(),
            peers[0].clone(),
            peers.clone(),
            peers.clone(),
        );
        machine.on_event(MigrationEvent::HostConnectionLost);

        // when (操作):
        let effects = machine.on_event(MigrationEvent::AnnouncementReceived {
            new_host: peers[1].clone(),
        });

        // then (期待する結果):
        assert_eq!(
            effects,
            vec![
                MigrationEffect::CancelRetry,
                MigrationEffect::FollowNewHost {
                    host: peers[1].clone()
                }
            ]
        );
        assert_eq!(
            machine.state(),
            &MigrationState::FollowingNewHost {
                host: peers[1].clone()
            }
        );
    }

    #[test]
    fn test_last_announcement_wins_even_after_self_takeover() {
        // テスト項目: 自分がホスト化した後でも後続の告知に従う（最後の告知が勝つ）
        // given (前提条件): P1 が昇格済み
        let peers = ids(3);
        let mut machine = MigrationMachine::new(
            peers[1].clone(),
            peers[0].clone(),
            peers.clone(),
            peers.clone(),
        );
        exhaust_reconnects(&mut machine);
        machine.on_event(MigrationEvent::TakeoverComplete);
        assert_eq!(machine.state(), &MigrationState::NewHostSelf);

        // when (操作): 別の告知が届く
        let effects = machine.on_event(MigrationEvent::AnnouncementReceived {
            new_host: peers[2].clone(),
        });

        // then (期待する結果): 両者がホストを自認する状態は解消される
        assert!(effects.contains(&MigrationEffect::FollowNewHost {
            host: peers[2].clone()
        }));
        assert_eq!(
            machine.state(),
            &MigrationState::FollowingNewHost {
                host: peers[2].clone()
            }
        );
    }
}
