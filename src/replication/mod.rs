//! Message distribution and state replication.
//!
//! The host keeps one [`ReplicationChannel`] holding the sending half of
//! every participant connection. Broadcasts are best-effort: links that are
//! not currently open are skipped silently, matching the transport's
//! fire-and-forget semantics. State replication sends each viewer its own
//! filtered projection plus the whole unfiltered snapshot as a disaster
//! backup.

use std::collections::HashMap;

use serde_json::Value;

use crate::domain::{GameHooks, PeerId};
use crate::protocol::{encode, ProtocolMessage};
use crate::transport::{ConnectionSender, ConnectionState};

/// Host-local identifier for one attached connection
pub type LinkId = u64;

#[derive(Debug)]
struct Link {
    sender: ConnectionSender,
    peer: Option<PeerId>,
}

/// Registry of live connections, keyed by link id with an optional
/// participant binding once the join handshake identifies the other side.
#[derive(Debug, Default)]
pub struct ReplicationChannel {
    next_id: LinkId,
    links: HashMap<LinkId, Link>,
}

impl ReplicationChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly-accepted connection, not yet tied to a participant
    pub fn attach(&mut self, sender: ConnectionSender) -> LinkId {
        let id = self.next_id;
        self.next_id += 1;
        self.links.insert(id, Link { sender, peer: None });
        id
    }

    /// Tie a link to the participant that introduced itself on it.
    ///
    /// A reconnecting participant gets a fresh link; any previous link bound
    /// to the same id is closed and dropped first.
    pub fn bind(&mut self, link: LinkId, peer: PeerId) {
        let stale: Vec<LinkId> = self
            .links
            .iter()
            .filter(|(id, l)| l.peer.as_ref() == Some(&peer) && **id != link)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            if let Some(old) = self.links.remove(&id) {
                old.sender.close();
            }
        }
        if let Some(entry) = self.links.get_mut(&link) {
            entry.peer = Some(peer);
        }
    }

    pub fn peer_of(&self, link: LinkId) -> Option<&PeerId> {
        self.links.get(&link).and_then(|l| l.peer.as_ref())
    }

    /// Drop a link, closing it and returning the participant it was bound to
    pub fn remove(&mut self, link: LinkId) -> Option<PeerId> {
        let entry = self.links.remove(&link)?;
        entry.sender.close();
        entry.peer
    }

    /// Number of links currently bound to a participant
    pub fn bound_count(&self) -> usize {
        self.links.values().filter(|l| l.peer.is_some()).count()
    }

    /// Send to one link regardless of binding (used for handshake replies)
    pub fn send_to_link(&self, link: LinkId, message: &ProtocolMessage) {
        if let Some(entry) = self.links.get(&link) {
            if entry.sender.send(encode(message)).is_err() {
                tracing::warn!("Failed to send to link {}", link);
            }
        }
    }

    /// Send to the link bound to `peer`, if any and open
    pub fn send_to_peer(&self, peer: &PeerId, message: &ProtocolMessage) {
        let wire = encode(message);
        for entry in self.links.values() {
            if entry.peer.as_ref() == Some(peer) {
                if entry.sender.send(wire.clone()).is_err() {
                    tracing::warn!("Failed to send to participant '{}'", peer);
                }
            }
        }
    }

    /// Best-effort broadcast to every bound, open link except `exclude`.
    ///
    /// Links that are not open are skipped without surfacing an error.
    pub fn broadcast(&self, message: &ProtocolMessage, exclude: Option<&PeerId>) {
        let wire = encode(message);
        for entry in self.links.values() {
            let Some(peer) = entry.peer.as_ref() else {
                continue;
            };
            if Some(peer) == exclude {
                continue;
            }
            if entry.sender.state() != ConnectionState::Open {
                tracing::debug!("Skipping closed link to '{}' during broadcast", peer);
                continue;
            }
            if entry.sender.send(wire.clone()).is_err() {
                tracing::warn!("Failed to broadcast to participant '{}'", peer);
            }
        }
    }

    /// Replicate game state to every participant.
    ///
    /// Each viewer receives its own projection from
    /// [`GameHooks::filter_for_viewer`] followed by the whole unfiltered
    /// snapshot as `full-state-backup`. Returns the host's own projection,
    /// computed with the same filter so the host's rendering path is
    /// identical to a remote participant's.
    pub fn broadcast_state<G: GameHooks>(
        &self,
        hooks: &G,
        snapshot: &Value,
        join_order: &[PeerId],
        host_id: &PeerId,
    ) -> Value {
        let backup = encode(&ProtocolMessage::FullStateBackup {
            state: snapshot.clone(),
            join_order: join_order.to_vec(),
        });
        for entry in self.links.values() {
            let Some(peer) = entry.peer.as_ref() else {
                continue;
            };
            if entry.sender.state() != ConnectionState::Open {
                continue;
            }
            let view = hooks.filter_for_viewer(snapshot, peer);
            let state = encode(&ProtocolMessage::GameState { state: view });
            if entry.sender.send(state).is_err() || entry.sender.send(backup.clone()).is_err() {
                tracing::warn!("Failed to replicate state to participant '{}'", peer);
            }
        }
        hooks.filter_for_viewer(snapshot, host_id)
    }

    /// Close every link (host shutdown or abdication)
    pub fn close_all(&mut self) {
        for entry in self.links.values() {
            entry.sender.close();
        }
        self.links.clear();
    }
}
