//! The peer-side session: a non-host participant.
//!
//! A peer keeps a single connection to the host, a read-only filtered view
//! of the game, and one stale unfiltered backup for disaster recovery. It
//! also listens on its own participant-id address so a newly-elected host
//! can reach it during migration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::timeout;

use crate::common::clock::Clock;
use crate::domain::{Participant, PeerId, RoomCode};
use crate::protocol::{decode, encode, ProtocolMessage};
use crate::transport::{
    ConnectionEvent, ConnectionEvents, ConnectionSender, Listener, Transport, TransportError,
};

use super::identity::{SessionIdentity, SessionPersistence};
use super::store::SessionStore;
use super::SessionError;

/// Upper bound on the initial join handshake (5 seconds)
pub const JOIN_TIMEOUT_MILLIS: u64 = 5_000;

/// What a handled event means for the embedding presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerNotice {
    /// The host connection closed or errored; start migration
    HostConnectionLost,
    /// Membership changed (join/leave/disconnect/reconnect or a fresh list)
    RosterUpdated,
    /// A new filtered view of the game arrived
    StateUpdated,
    /// A migration announcement moved authority to the given participant
    HostChanged(PeerId),
    ChatReceived {
        from: PeerId,
        text: String,
        timestamp: i64,
    },
    ErrorReceived(String),
}

/// Session state of a non-host participant.
pub struct PeerSession<G> {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) persistence: SessionPersistence,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) hooks: G,
    pub(crate) identity: SessionIdentity,
    pub(crate) host: Option<ConnectionSender>,
    pub(crate) host_id: Option<PeerId>,
    pub(crate) participants: HashMap<PeerId, Participant>,
    pub(crate) join_order: Vec<PeerId>,
    pub(crate) backup: Option<Value>,
    pub(crate) view: Option<Value>,
    pub(crate) game_in_progress: bool,
}

impl<G> PeerSession<G> {
    /// Join the room identified by `room_code` with a fresh identity.
    ///
    /// Claims our own participant-id address for inbound migration
    /// connections, dials the host, and completes the join handshake.
    /// Returns the session, the host connection's event stream, and our own
    /// listener; the embedding loop pumps both.
    pub async fn join(
        transport: Arc<dyn Transport>,
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        hooks: G,
        room_code: RoomCode,
        name: String,
    ) -> Result<(Self, ConnectionEvents, Listener), SessionError> {
        let peer_id = PeerId::generate();
        let listener = transport.listen(peer_id.as_str()).await?;
        let persistence = SessionPersistence::new(store, clock.clone());
        let identity = SessionIdentity {
            peer_id,
            name,
            room_code,
            is_host: false,
        };
        let mut session = Self {
            transport,
            persistence,
            clock,
            hooks,
            identity,
            host: None,
            host_id: None,
            participants: HashMap::new(),
            join_order: Vec::new(),
            backup: None,
            view: None,
            game_in_progress: false,
        };
        let events = timeout(
            Duration::from_millis(JOIN_TIMEOUT_MILLIS),
            session.dial_host(false),
        )
        .await
        .map_err(|_| SessionError::ConnectTimeout)??;
        session
            .persistence
            .save(&session.identity, session.game_in_progress);
        tracing::info!(
            "Joined room '{}' as '{}'",
            session.identity.room_code,
            session.identity.peer_id
        );
        Ok((session, events, listener))
    }

    /// Resume a previous peer session from the persisted record.
    ///
    /// Reuses the prior participant id so the host restores us instead of
    /// admitting a stranger. `cached_backup`/`cached_join_order` may carry a
    /// copy the embedding layer preserved across the reload; they are
    /// attached to the handshake so even a host that lost its own memory can
    /// recover. A claimed identity address means another tab took over: the
    /// stale record is cleared and `SessionExpired` returned.
    pub async fn reconnect(
        transport: Arc<dyn Transport>,
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        hooks: G,
        cached_backup: Option<Value>,
        cached_join_order: Option<Vec<PeerId>>,
    ) -> Result<(Self, ConnectionEvents, Listener), SessionError> {
        let persistence = SessionPersistence::new(store, clock.clone());
        let record = persistence.load().ok_or(SessionError::SessionExpired)?;
        if record.is_host {
            return Err(SessionError::SessionExpired);
        }

        let listener = match transport.listen(record.peer_id.as_str()).await {
            Ok(listener) => listener,
            Err(TransportError::AddressTaken(_)) => {
                tracing::warn!(
                    "Identity '{}' already claimed elsewhere, clearing stale session",
                    record.peer_id
                );
                persistence.clear();
                return Err(SessionError::SessionExpired);
            }
            Err(e) => return Err(e.into()),
        };

        let identity = SessionIdentity {
            peer_id: record.peer_id,
            name: record.player_name,
            room_code: record.room_code,
            is_host: false,
        };
        let mut session = Self {
            transport,
            persistence,
            clock,
            hooks,
            identity,
            host: None,
            host_id: None,
            participants: HashMap::new(),
            join_order: cached_join_order.unwrap_or_default(),
            backup: cached_backup,
            view: None,
            game_in_progress: record.game_in_progress,
        };
        let events = timeout(
            Duration::from_millis(JOIN_TIMEOUT_MILLIS),
            session.dial_host(true),
        )
        .await
        .map_err(|_| SessionError::ConnectTimeout)??;
        session
            .persistence
            .save(&session.identity, session.game_in_progress);
        tracing::info!(
            "Reconnected to room '{}' as '{}'",
            session.identity.room_code,
            session.identity.peer_id
        );
        Ok((session, events, listener))
    }

    /// Dial the room address and complete the join handshake. On success the
    /// host sender is installed and the connection's event stream returned.
    pub(crate) async fn dial_host(
        &mut self,
        reconnecting: bool,
    ) -> Result<ConnectionEvents, SessionError> {
        let address = self.identity.room_code.address();
        let connection = match self
            .transport
            .connect(self.identity.peer_id.as_str(), &address)
            .await
        {
            Ok(connection) => connection,
            Err(TransportError::Unreachable(_)) => {
                return Err(SessionError::RoomNotFound(
                    self.identity.room_code.to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        };
        let (sender, mut events) = connection.split();
        let join = ProtocolMessage::Join {
            participant_id: self.identity.peer_id.clone(),
            name: self.identity.name.clone(),
            reconnecting,
            game_state_backup: if reconnecting { self.backup.clone() } else { None },
            join_order: if reconnecting && !self.join_order.is_empty() {
                Some(self.join_order.clone())
            } else {
                None
            },
        };
        sender.send(encode(&join))?;

        let game_in_progress = complete_handshake(&mut events).await?;
        self.game_in_progress = game_in_progress;
        self.host = Some(sender);
        Ok(events)
    }

    /// Feed one event from the host connection. Returns what changed, for
    /// the presentation layer.
    pub fn handle_event(&mut self, event: ConnectionEvent) -> Option<PeerNotice> {
        match event {
            ConnectionEvent::Open => None,
            ConnectionEvent::Data(text) => match decode(&text) {
                Ok(message) => self.handle_message(message),
                Err(e) => {
                    tracing::warn!("Ignoring malformed message from host: {}", e);
                    None
                }
            },
            ConnectionEvent::Closed => {
                tracing::warn!("Host connection closed");
                self.host = None;
                Some(PeerNotice::HostConnectionLost)
            }
            ConnectionEvent::Error(reason) => {
                tracing::warn!("Host connection error: {}", reason);
                self.host = None;
                Some(PeerNotice::HostConnectionLost)
            }
        }
    }

    fn handle_message(&mut self, message: ProtocolMessage) -> Option<PeerNotice> {
        match message {
            ProtocolMessage::PlayerList {
                participants,
                join_order,
            } => {
                self.participants = participants
                    .into_iter()
                    .map(|p| (p.id.clone(), p))
                    .collect();
                self.host_id = self
                    .participants
                    .values()
                    .find(|p| p.is_host)
                    .map(|p| p.id.clone());
                self.join_order = join_order;
                Some(PeerNotice::RosterUpdated)
            }
            ProtocolMessage::PlayerJoined { participant } => {
                if !self.join_order.contains(&participant.id) {
                    self.join_order.push(participant.id.clone());
                }
                self.participants
                    .insert(participant.id.clone(), participant);
                Some(PeerNotice::RosterUpdated)
            }
            ProtocolMessage::PlayerLeft { participant_id } => {
                self.participants.remove(&participant_id);
                self.join_order.retain(|id| id != &participant_id);
                Some(PeerNotice::RosterUpdated)
            }
            ProtocolMessage::PlayerDisconnected { participant_id, .. } => {
                // Kept in the roster: the host holds it for the grace period.
                tracing::info!("Participant '{}' disconnected", participant_id);
                Some(PeerNotice::RosterUpdated)
            }
            ProtocolMessage::PlayerReconnected { participant_id } => {
                if let Some(participant) = self.participants.get_mut(&participant_id) {
                    participant.queued = false;
                }
                Some(PeerNotice::RosterUpdated)
            }
            ProtocolMessage::GameState { state } => {
                self.view = Some(state);
                Some(PeerNotice::StateUpdated)
            }
            ProtocolMessage::FullStateBackup { state, join_order } => {
                // Overwrite-only: a client retains just the latest backup.
                self.backup = Some(state);
                self.join_order = join_order;
                None
            }
            ProtocolMessage::NewHostAnnouncement {
                new_host_id,
                game_state,
                join_order,
                ..
            } => {
                self.apply_announcement(new_host_id.clone(), game_state, join_order);
                Some(PeerNotice::HostChanged(new_host_id))
            }
            ProtocolMessage::JoinAccepted {
                game_in_progress, ..
            } => {
                self.game_in_progress = game_in_progress;
                None
            }
            ProtocolMessage::Chat {
                participant_id,
                text,
                timestamp,
            } => Some(PeerNotice::ChatReceived {
                from: participant_id,
                text,
                timestamp,
            }),
            ProtocolMessage::Error { message } => {
                tracing::warn!("Error from host: {}", message);
                Some(PeerNotice::ErrorReceived(message))
            }
            other => {
                tracing::warn!("Ignoring host-bound message from host: {:?}", other);
                None
            }
        }
    }

    /// Adopt a migration announcement: replace authority, join order, and
    /// (when supplied) the backup. Last announcement processed wins.
    pub(crate) fn apply_announcement(
        &mut self,
        new_host_id: PeerId,
        game_state: Option<Value>,
        join_order: Vec<PeerId>,
    ) {
        tracing::info!("Adopting '{}' as the new host", new_host_id);
        self.participants.retain(|id, _| join_order.contains(id));
        for participant in self.participants.values_mut() {
            participant.is_host = participant.id == new_host_id;
        }
        self.host_id = Some(new_host_id);
        self.join_order = join_order;
        if let Some(state) = game_state {
            self.backup = Some(state);
        }
    }

    /// Adopt an announcement that arrived on a fresh inbound connection,
    /// keeping that connection as the new host link.
    pub(crate) fn adopt_new_host(
        &mut self,
        new_host_id: PeerId,
        game_state: Option<Value>,
        join_order: Vec<PeerId>,
        sender: ConnectionSender,
    ) {
        self.apply_announcement(new_host_id, game_state, join_order);
        self.host = Some(sender);
        self.persistence
            .save(&self.identity, self.game_in_progress);
    }

    /// Submit a player intent to the host
    pub fn send_action(&self, payload: Value) -> Result<(), SessionError> {
        let host = self.host.as_ref().ok_or(TransportError::ConnectionClosed)?;
        host.send(encode(&ProtocolMessage::Action {
            participant_id: self.identity.peer_id.clone(),
            payload,
        }))?;
        Ok(())
    }

    /// Send a chat line to the host for relay
    pub fn send_chat(&self, text: String) -> Result<(), SessionError> {
        let host = self.host.as_ref().ok_or(TransportError::ConnectionClosed)?;
        host.send(encode(&ProtocolMessage::Chat {
            participant_id: self.identity.peer_id.clone(),
            text,
            timestamp: self.clock.now_millis(),
        }))?;
        Ok(())
    }

    /// Drop the host link without clearing the persisted record, as a
    /// closing browser tab would. The session can be picked up again with
    /// [`PeerSession::reconnect`] while the grace period lasts.
    pub fn disconnect(&mut self) {
        if let Some(host) = &self.host {
            host.close();
        }
        self.host = None;
    }

    /// Leave the room for good: close the host link and clear the persisted
    /// record so the session cannot be resumed.
    pub fn leave(self) {
        if let Some(host) = &self.host {
            host.close();
        }
        self.persistence.clear();
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.identity.peer_id
    }

    pub fn room_code(&self) -> &RoomCode {
        &self.identity.room_code
    }

    pub fn host_id(&self) -> Option<&PeerId> {
        self.host_id.as_ref()
    }

    pub fn game_in_progress(&self) -> bool {
        self.game_in_progress
    }

    /// Roster as last replicated, in join order
    pub fn participants(&self) -> Vec<Participant> {
        self.join_order
            .iter()
            .filter_map(|id| self.participants.get(id))
            .cloned()
            .collect()
    }

    pub fn join_order(&self) -> &[PeerId] {
        &self.join_order
    }

    /// Latest filtered view, for rendering
    pub fn view(&self) -> Option<&Value> {
        self.view.as_ref()
    }

    /// Latest unfiltered backup, for disaster recovery
    pub fn backup(&self) -> Option<&Value> {
        self.backup.as_ref()
    }

    /// Mutable access to the game hooks, for the embedding game loop
    pub fn hooks_mut(&mut self) -> &mut G {
        &mut self.hooks
    }
}

/// Read events until the host answers the join, surfacing rejections.
/// Returns the room's `game_in_progress` flag from the acceptance.
async fn complete_handshake(events: &mut ConnectionEvents) -> Result<bool, SessionError> {
    loop {
        match events.recv().await {
            Some(ConnectionEvent::Open) => continue,
            Some(ConnectionEvent::Data(text)) => match decode(&text) {
                Ok(ProtocolMessage::JoinAccepted {
                    game_in_progress, ..
                }) => return Ok(game_in_progress),
                Ok(ProtocolMessage::Error { message }) => {
                    return Err(if message == "room full" {
                        SessionError::RoomFull
                    } else {
                        SessionError::JoinRejected(message)
                    });
                }
                Ok(other) => {
                    tracing::warn!("Unexpected message during handshake: {:?}", other);
                }
                Err(e) => {
                    tracing::warn!("Ignoring malformed message during handshake: {}", e);
                }
            },
            Some(ConnectionEvent::Closed) | None => {
                return Err(TransportError::ConnectionClosed.into());
            }
            Some(ConnectionEvent::Error(reason)) => {
                tracing::warn!("Transport error during handshake: {}", reason);
                return Err(TransportError::ConnectionClosed.into());
            }
        }
    }
}
