//! The host-side session: room authority and message hub.
//!
//! The host owns the participant registry and the authoritative game
//! snapshot, serializes inbound messages in arrival order, and replicates
//! state to every participant. The embedding application owns the event
//! loop: it accepts connections from the listener returned at creation and
//! feeds every connection event into [`HostSession::handle_event`].

use std::sync::Arc;

use serde_json::Value;

use crate::common::clock::Clock;
use crate::domain::{
    GameHooks, JoinOutcome, Participant, PeerId, RoomCode, RoomDirectory,
};
use crate::protocol::{decode, ProtocolMessage};
use crate::replication::{LinkId, ReplicationChannel};
use crate::transport::{
    Connection, ConnectionEvent, ConnectionEvents, Listener, Transport, TransportError,
};

use super::identity::{SessionIdentity, SessionPersistence};
use super::store::SessionStore;
use super::SessionError;

/// How many random codes to try before giving up on a collision streak
const ROOM_CODE_ALLOC_ATTEMPTS: usize = 5;

/// Authoritative session of the current host.
pub struct HostSession<G: GameHooks> {
    transport: Arc<dyn Transport>,
    persistence: SessionPersistence,
    clock: Arc<dyn Clock>,
    hooks: G,
    identity: SessionIdentity,
    directory: RoomDirectory,
    links: ReplicationChannel,
    game_in_progress: bool,
}

impl<G: GameHooks> HostSession<G> {
    /// Open a new room: allocate a room code, claim its address, and seed the
    /// registry with the host itself. Returns the session plus the listener
    /// the embedding event loop accepts connections from.
    pub async fn create(
        transport: Arc<dyn Transport>,
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        hooks: G,
        name: String,
    ) -> Result<(Self, Listener), SessionError> {
        let peer_id = PeerId::generate();
        let (room_code, listener) = claim_fresh_room_code(transport.as_ref()).await?;
        tracing::info!("Opened room '{}' as host '{}'", room_code, peer_id);

        let identity = SessionIdentity {
            peer_id: peer_id.clone(),
            name: name.clone(),
            room_code,
            is_host: true,
        };
        let persistence = SessionPersistence::new(store, clock.clone());
        persistence.save(&identity, false);

        let session = Self {
            transport,
            persistence,
            clock,
            hooks,
            directory: RoomDirectory::register_host(peer_id, name),
            links: ReplicationChannel::new(),
            identity,
            game_in_progress: false,
        };
        Ok((session, listener))
    }

    /// Resume hosting after a reload, from the persisted record.
    ///
    /// Re-claims the room-code address; if another identity holds it the
    /// stale record is cleared and `SessionExpired` is returned. The room
    /// roster and snapshot are recovered from clients as they reconnect with
    /// their cached backups.
    pub async fn resume(
        transport: Arc<dyn Transport>,
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        hooks: G,
    ) -> Result<(Self, Listener), SessionError> {
        let persistence = SessionPersistence::new(store, clock.clone());
        let record = persistence.load().ok_or(SessionError::SessionExpired)?;
        if !record.is_host {
            return Err(SessionError::SessionExpired);
        }

        let listener = match transport.listen(&record.room_code.address()).await {
            Ok(listener) => listener,
            Err(TransportError::AddressTaken(_)) => {
                tracing::warn!(
                    "Room address for '{}' already claimed, clearing stale session",
                    record.room_code
                );
                persistence.clear();
                return Err(SessionError::SessionExpired);
            }
            Err(e) => return Err(e.into()),
        };
        tracing::info!("Resumed hosting room '{}'", record.room_code);

        let identity = SessionIdentity {
            peer_id: record.peer_id.clone(),
            name: record.player_name.clone(),
            room_code: record.room_code.clone(),
            is_host: true,
        };
        persistence.save(&identity, record.game_in_progress);

        let session = Self {
            transport,
            persistence,
            clock,
            hooks,
            directory: RoomDirectory::register_host(record.peer_id, record.player_name),
            links: ReplicationChannel::new(),
            identity,
            game_in_progress: record.game_in_progress,
        };
        Ok((session, listener))
    }

    /// Take over an existing room after winning the migration election.
    ///
    /// Re-claims the room-code address, dials every surviving participant to
    /// deliver the `new-host-announcement`, adopts the replicated backup as
    /// the authoritative snapshot, and persists the new host identity.
    /// Returns the event streams of the freshly-opened connections so the
    /// embedding loop can keep pumping them.
    pub(crate) async fn assume(
        transport: Arc<dyn Transport>,
        persistence: SessionPersistence,
        clock: Arc<dyn Clock>,
        mut hooks: G,
        mut identity: SessionIdentity,
        others: Vec<Participant>,
        join_order: Vec<PeerId>,
        backup: Option<Value>,
        game_in_progress: bool,
    ) -> Result<(Self, Listener, Vec<(LinkId, ConnectionEvents)>), SessionError> {
        let listener = transport.listen(&identity.room_code.address()).await?;
        identity.is_host = true;
        persistence.save(&identity, game_in_progress);
        tracing::info!(
            "Participant '{}' taking over room '{}' as new host",
            identity.peer_id,
            identity.room_code
        );

        let mut directory = RoomDirectory::from_roster(
            identity.peer_id.clone(),
            identity.name.clone(),
            others,
            join_order,
        );
        let announcement = ProtocolMessage::NewHostAnnouncement {
            new_host_id: identity.peer_id.clone(),
            room_code: identity.room_code.as_str().to_string(),
            game_state: backup.clone(),
            join_order: directory.join_order().to_vec(),
        };

        let mut links = ReplicationChannel::new();
        let mut streams = Vec::new();
        let now = clock.now_millis();
        let targets: Vec<PeerId> = directory
            .participants()
            .into_iter()
            .map(|p| p.id)
            .filter(|id| *id != identity.peer_id)
            .collect();
        for target in targets {
            match transport
                .connect(identity.peer_id.as_str(), target.as_str())
                .await
            {
                Ok(conn) => {
                    let (sender, events) = conn.split();
                    let link = links.attach(sender);
                    links.bind(link, target.clone());
                    links.send_to_link(link, &announcement);
                    streams.push((link, events));
                }
                Err(e) => {
                    tracing::warn!("Could not reach '{}' during takeover: {}", target, e);
                    directory.handle_disconnect(&target, now);
                }
            }
        }

        hooks.on_become_host(backup.as_ref());

        let mut session = Self {
            transport,
            persistence,
            clock,
            hooks,
            directory,
            links,
            identity,
            game_in_progress,
        };
        session.broadcast_state();
        Ok((session, listener, streams))
    }

    /// Register a connection accepted from the listener. Returns the link id
    /// plus the event stream the embedding loop must pump into
    /// [`HostSession::handle_event`].
    pub fn accept_connection(&mut self, connection: Connection) -> (LinkId, ConnectionEvents) {
        let (sender, events) = connection.split();
        let link = self.links.attach(sender);
        tracing::debug!("Accepted connection as link {}", link);
        (link, events)
    }

    /// Feed one transport event for `link`. Runs to completion before the
    /// next event may be handled.
    pub fn handle_event(&mut self, link: LinkId, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Open => {}
            ConnectionEvent::Data(text) => match decode(&text) {
                Ok(message) => self.handle_message(link, message),
                Err(e) => {
                    tracing::warn!("Ignoring malformed message on link {}: {}", link, e);
                }
            },
            ConnectionEvent::Closed => self.handle_close(link),
            ConnectionEvent::Error(reason) => {
                tracing::warn!("Transport error on link {}: {}", link, reason);
                self.handle_close(link);
            }
        }
    }

    fn handle_message(&mut self, link: LinkId, message: ProtocolMessage) {
        match message {
            ProtocolMessage::Join {
                participant_id,
                name,
                reconnecting,
                game_state_backup,
                join_order,
            } => self.handle_join(
                link,
                participant_id,
                name,
                reconnecting,
                game_state_backup,
                join_order,
            ),
            ProtocolMessage::Action {
                participant_id,
                payload,
            }
            | ProtocolMessage::Game {
                participant_id,
                payload,
            } => {
                self.hooks.on_action(&participant_id, &payload);
                self.broadcast_state();
            }
            ProtocolMessage::Chat {
                participant_id,
                text,
                timestamp,
            } => {
                self.links.broadcast(
                    &ProtocolMessage::Chat {
                        participant_id: participant_id.clone(),
                        text,
                        timestamp,
                    },
                    Some(&participant_id),
                );
            }
            ProtocolMessage::NewHostAnnouncement { new_host_id, .. } => {
                // A successor was elected while this host was away. Peers
                // that processed the announcement have already rebound to
                // it; this arm only logs the handover and keeps local state.
                tracing::warn!(
                    "Received new-host-announcement for '{}' while hosting; a successor exists",
                    new_host_id
                );
            }
            other => {
                tracing::warn!("Ignoring unexpected message on link {}: {:?}", link, other);
            }
        }
    }

    fn handle_join(
        &mut self,
        link: LinkId,
        from: PeerId,
        name: String,
        reconnecting: bool,
        game_state_backup: Option<Value>,
        join_order_hint: Option<Vec<PeerId>>,
    ) {
        let now = self.clock.now_millis();
        let outcome = self.directory.accept_join(
            from.clone(),
            name,
            reconnecting,
            self.game_in_progress,
            now,
        );
        match outcome {
            JoinOutcome::RoomFull => {
                tracing::info!("Rejecting '{}': room is full", from);
                self.links.send_to_link(
                    link,
                    &ProtocolMessage::Error {
                        message: "room full".to_string(),
                    },
                );
            }
            JoinOutcome::Restored { participant } => {
                tracing::info!("Participant '{}' restored", participant.id);
                if let Some(hint) = join_order_hint {
                    self.directory.adopt_join_order_hint(&hint, &participant.id);
                }
                self.links.bind(link, participant.id.clone());
                self.links.send_to_link(
                    link,
                    &ProtocolMessage::JoinAccepted {
                        participant_id: participant.id.clone(),
                        room_code: self.identity.room_code.as_str().to_string(),
                        game_in_progress: self.game_in_progress,
                        reconnected: true,
                    },
                );
                self.links.send_to_link(
                    link,
                    &ProtocolMessage::PlayerList {
                        participants: self.directory.participants(),
                        join_order: self.directory.join_order().to_vec(),
                    },
                );
                self.links.broadcast(
                    &ProtocolMessage::PlayerReconnected {
                        participant_id: participant.id.clone(),
                    },
                    Some(&participant.id),
                );
                self.hooks.on_player_reconnected(&participant.id);
                if self.hooks.snapshot().is_none() {
                    if let Some(backup) = game_state_backup {
                        // Host reloaded and lost its memory; the client's
                        // replicated backup becomes authoritative.
                        tracing::info!(
                            "Adopting game-state backup supplied by '{}'",
                            participant.id
                        );
                        self.hooks.on_become_host(Some(&backup));
                    }
                }
                self.broadcast_state();
            }
            JoinOutcome::Admitted { participant } => {
                tracing::info!(
                    "Participant '{}' joined{}",
                    participant.id,
                    if participant.queued { " (queued)" } else { "" }
                );
                self.links.bind(link, participant.id.clone());
                self.links.send_to_link(
                    link,
                    &ProtocolMessage::JoinAccepted {
                        participant_id: participant.id.clone(),
                        room_code: self.identity.room_code.as_str().to_string(),
                        game_in_progress: self.game_in_progress,
                        reconnected: false,
                    },
                );
                self.links.send_to_link(
                    link,
                    &ProtocolMessage::PlayerList {
                        participants: self.directory.participants(),
                        join_order: self.directory.join_order().to_vec(),
                    },
                );
                self.links.broadcast(
                    &ProtocolMessage::PlayerJoined {
                        participant: participant.clone(),
                    },
                    Some(&participant.id),
                );
                self.hooks.on_player_joined(&participant, participant.queued);
                self.broadcast_state();
            }
        }
    }

    fn handle_close(&mut self, link: LinkId) {
        let Some(peer) = self.links.remove(link) else {
            // Unbound link: the dialer vanished before introducing itself.
            return;
        };
        let now = self.clock.now_millis();
        if let Some(participant) = self.directory.handle_disconnect(&peer, now) {
            tracing::info!(
                "Participant '{}' disconnected, holding for grace period",
                participant.id
            );
            self.links.broadcast(
                &ProtocolMessage::PlayerDisconnected {
                    participant_id: participant.id.clone(),
                    may_reconnect: true,
                },
                None,
            );
            self.hooks.on_player_left(&participant.id, true);
        }
    }

    /// Permanently remove a participant (explicit leave, driven by the
    /// embedding layer, never by a transport failure).
    pub fn remove_participant(&mut self, id: &PeerId) {
        if let Some(participant) = self.directory.leave(id) {
            tracing::info!("Participant '{}' left the room", participant.id);
            self.links.broadcast(
                &ProtocolMessage::PlayerLeft {
                    participant_id: participant.id.clone(),
                },
                Some(&participant.id),
            );
            self.hooks.on_player_left(&participant.id, false);
        }
    }

    /// Replicate the current snapshot to everyone, returning the host's own
    /// filtered view for local rendering. `None` when no game has started.
    pub fn broadcast_state(&mut self) -> Option<Value> {
        let snapshot = self.hooks.snapshot()?;
        Some(self.links.broadcast_state(
            &self.hooks,
            &snapshot,
            self.directory.join_order(),
            self.directory.host_id(),
        ))
    }

    /// Toggle the in-game flag; new joiners are queued while it is set
    pub fn set_game_in_progress(&mut self, in_progress: bool) {
        self.game_in_progress = in_progress;
        self.persistence.save(&self.identity, in_progress);
    }

    /// Relay a chat line originated by the host itself
    pub fn send_chat(&mut self, text: String) {
        let message = ProtocolMessage::Chat {
            participant_id: self.identity.peer_id.clone(),
            text,
            timestamp: self.clock.now_millis(),
        };
        self.links.broadcast(&message, None);
    }

    /// Close every connection and clear the persisted record (explicit
    /// teardown, e.g. the host leaves its own room)
    pub fn shutdown(mut self) {
        tracing::info!("Shutting down room '{}'", self.identity.room_code);
        self.links.close_all();
        self.persistence.clear();
    }

    /// Mutable access to the game hooks, for the embedding game loop
    pub fn hooks_mut(&mut self) -> &mut G {
        &mut self.hooks
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.identity.peer_id
    }

    pub fn room_code(&self) -> &RoomCode {
        &self.identity.room_code
    }

    pub fn game_in_progress(&self) -> bool {
        self.game_in_progress
    }

    /// Active participants in join order
    pub fn participants(&self) -> Vec<Participant> {
        self.directory.participants()
    }

    pub fn join_order(&self) -> &[PeerId] {
        self.directory.join_order()
    }

    /// The transport this session was built over
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::common::clock::FixedClock;
    use crate::domain::MockGameHooks;
    use crate::protocol::encode;
    use crate::transport::memory::InMemoryTransport;

    use super::*;

    fn join_message(player: &PeerId, name: &str) -> String {
        encode(&ProtocolMessage::Join {
            participant_id: player.clone(),
            name: name.to_string(),
            reconnecting: false,
            game_state_backup: None,
            join_order: None,
        })
    }

    #[tokio::test]
    async fn test_join_and_actions_drive_hooks_in_arrival_order() {
        // テスト項目: ホストは join とアクションを到着順にフックへ渡す
        // given (前提条件): 参加 1 回とアクション 2 回を順序付きで期待するモック
        let transport = InMemoryTransport::new();
        let mut hooks = MockGameHooks::new();
        let mut seq = mockall::Sequence::new();
        hooks
            .expect_on_player_joined()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| ());
        hooks
            .expect_on_action()
            .withf(|_, payload| *payload == json!({ "n": 1 }))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| ());
        hooks
            .expect_on_action()
            .withf(|_, payload| *payload == json!({ "n": 2 }))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| ());
        hooks.expect_snapshot().returning(|| None);
        let (mut host, mut listener) = HostSession::create(
            transport.clone(),
            Arc::new(crate::session::InMemorySessionStore::new()),
            Arc::new(FixedClock::new(1_000)),
            hooks,
            "hana".to_string(),
        )
        .await
        .expect("open room");

        // when (操作): 生の接続から join と 2 つのアクションを送り込む
        let player = PeerId::new("p1".to_string()).expect("peer id");
        let connection = transport
            .connect(player.as_str(), &host.room_code().address())
            .await
            .expect("dial room");
        connection.send(join_message(&player, "jiro")).expect("join");
        connection
            .send(encode(&ProtocolMessage::Action {
                participant_id: player.clone(),
                payload: json!({ "n": 1 }),
            }))
            .expect("first action");
        connection
            .send(encode(&ProtocolMessage::Action {
                participant_id: player,
                payload: json!({ "n": 2 }),
            }))
            .expect("second action");
        let accepted = listener.recv().await.expect("inbound connection");
        let (link, mut events) = host.accept_connection(accepted);
        while let Ok(event) = events.try_recv() {
            host.handle_event(link, event);
        }

        // then (期待する結果): 参加者が登録され、モックの順序検証が通る
        assert_eq!(host.participants().len(), 2);
    }

    #[tokio::test]
    async fn test_transport_close_holds_participant_for_grace_period() {
        // テスト項目: 接続断の参加者は猶予付き離脱としてフックへ通知される
        // given (前提条件): 参加済みの接続が 1 本ある
        let transport = InMemoryTransport::new();
        let mut hooks = MockGameHooks::new();
        hooks.expect_on_player_joined().times(1).returning(|_, _| ());
        hooks
            .expect_on_player_left()
            .withf(|_, may_reconnect| *may_reconnect)
            .times(1)
            .returning(|_, _| ());
        hooks.expect_snapshot().returning(|| None);
        let (mut host, mut listener) = HostSession::create(
            transport.clone(),
            Arc::new(crate::session::InMemorySessionStore::new()),
            Arc::new(FixedClock::new(1_000)),
            hooks,
            "hana".to_string(),
        )
        .await
        .expect("open room");
        let player = PeerId::new("p1".to_string()).expect("peer id");
        let connection = transport
            .connect(player.as_str(), &host.room_code().address())
            .await
            .expect("dial room");
        connection.send(join_message(&player, "jiro")).expect("join");
        let accepted = listener.recv().await.expect("inbound connection");
        let (link, mut events) = host.accept_connection(accepted);
        while let Ok(event) = events.try_recv() {
            host.handle_event(link, event);
        }
        assert_eq!(host.participants().len(), 2);

        // when (操作): 相手側が接続を閉じる
        connection.close();
        while let Ok(event) = events.try_recv() {
            host.handle_event(link, event);
        }

        // then (期待する結果): アクティブからは消えるが join 順の席は残る
        assert_eq!(host.participants().len(), 1);
        assert_eq!(host.join_order().len(), 2);
    }
}

/// Allocate a room code whose address is still free.
async fn claim_fresh_room_code(
    transport: &dyn Transport,
) -> Result<(RoomCode, Listener), SessionError> {
    for _ in 0..ROOM_CODE_ALLOC_ATTEMPTS {
        let code = RoomCode::generate();
        match transport.listen(&code.address()).await {
            Ok(listener) => return Ok((code, listener)),
            Err(TransportError::AddressTaken(_)) => {
                tracing::debug!("Room code '{}' collided, retrying", code);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(SessionError::RoomCodeExhausted)
}
