//! Executes migration effects over a real transport.
//!
//! [`run_migration`] consumes the peer session when its host link drops,
//! drives the pure [`MigrationMachine`](super::MigrationMachine) with
//! transport results and timer expirations, and resolves into one of three
//! outcomes: the old host recovered, this peer took over, or another peer
//! did.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use crate::domain::{GameHooks, Participant, PeerId};
use crate::protocol::ProtocolMessage;
use crate::replication::LinkId;
use crate::session::{HostSession, PeerSession, SessionError};
use crate::transport::{
    Connection, ConnectionEvent, ConnectionEvents, Listener, TransportError,
};

use super::{
    MigrationEffect, MigrationEvent, MigrationMachine, ATTEMPT_TIMEOUT_MILLIS,
    MAX_RECONNECT_ATTEMPTS,
};

/// How a completed migration left this participant.
pub enum MigrationOutcome<G: GameHooks> {
    /// The old host came back; the session continues unchanged
    Recovered {
        session: PeerSession<G>,
        host_events: ConnectionEvents,
    },
    /// This peer won the election and is the host now
    BecameHost {
        session: HostSession<G>,
        listener: Listener,
        /// Event streams of the connections opened to the surviving peers
        peer_links: Vec<(LinkId, ConnectionEvents)>,
    },
    /// Another peer took over; its announcement connection is the new host
    /// link
    Following {
        session: PeerSession<G>,
        host_events: ConnectionEvents,
    },
}

/// Supervise the loss of the host connection to completion.
///
/// `own_listener` is the listener on this peer's own address, where a
/// newly-elected host delivers its announcement; it is polled throughout so
/// an announcement supersedes reconnection attempts and retry waits.
pub async fn run_migration<G: GameHooks>(
    mut session: PeerSession<G>,
    own_listener: &mut Listener,
) -> Result<MigrationOutcome<G>, SessionError> {
    let old_host = session
        .host_id()
        .cloned()
        .or_else(|| session.join_order().first().cloned())
        .ok_or(SessionError::NoEligibleSuccessor)?;
    let known: Vec<PeerId> = session.participants().into_iter().map(|p| p.id).collect();
    let mut machine = MigrationMachine::new(
        session.peer_id().clone(),
        old_host.clone(),
        session.join_order().to_vec(),
        known,
    );

    let mut pending: VecDeque<MigrationEffect> = machine
        .on_event(MigrationEvent::HostConnectionLost)
        .into_iter()
        .collect();

    while let Some(effect) = pending.pop_front() {
        match effect {
            MigrationEffect::AttemptReconnect { attempt } => {
                tracing::info!(
                    "Reconnecting to lost host, attempt {}/{}",
                    attempt,
                    MAX_RECONNECT_ATTEMPTS
                );
                tokio::select! {
                    result = timeout(
                        Duration::from_millis(ATTEMPT_TIMEOUT_MILLIS),
                        session.dial_host(true),
                    ) => match result {
                        Ok(Ok(host_events)) => {
                            machine.on_event(MigrationEvent::ReconnectSucceeded);
                            tracing::info!("Host recovered on attempt {}", attempt);
                            return Ok(MigrationOutcome::Recovered {
                                session,
                                host_events,
                            });
                        }
                        Ok(Err(e)) => {
                            tracing::debug!("Reconnect attempt {} failed: {}", attempt, e);
                            pending.extend(machine.on_event(MigrationEvent::ReconnectFailed));
                        }
                        Err(_) => {
                            tracing::debug!("Reconnect attempt {} timed out", attempt);
                            pending.extend(machine.on_event(MigrationEvent::ReconnectFailed));
                        }
                    },
                    inbound = own_listener.recv() => {
                        return adopt_inbound(session, &mut machine, inbound).await;
                    }
                }
            }
            MigrationEffect::ScheduleRetry { delay_millis } => {
                tokio::select! {
                    _ = sleep(Duration::from_millis(delay_millis)) => {
                        pending.extend(machine.on_event(MigrationEvent::RetryTimerFired));
                    }
                    inbound = own_listener.recv() => {
                        return adopt_inbound(session, &mut machine, inbound).await;
                    }
                }
            }
            MigrationEffect::BecomeHost => {
                let outcome = take_over(session, &old_host).await?;
                machine.on_event(MigrationEvent::TakeoverComplete);
                return Ok(outcome);
            }
            MigrationEffect::AwaitAnnouncement { expected_leader } => {
                tracing::info!(
                    "Waiting for new-host announcement, expecting '{}'",
                    expected_leader
                );
                let inbound = own_listener.recv().await;
                return adopt_inbound(session, &mut machine, inbound).await;
            }
            MigrationEffect::Abort => {
                tracing::error!("No other participants available to take over");
                return Err(SessionError::NoEligibleSuccessor);
            }
            MigrationEffect::CancelRetry | MigrationEffect::FollowNewHost { .. } => {
                // Bookkeeping effects; the driver's control flow already
                // reflects them.
            }
        }
    }

    Err(SessionError::NoEligibleSuccessor)
}

/// Read the announcement off a fresh inbound connection and follow it.
async fn adopt_inbound<G: GameHooks>(
    mut session: PeerSession<G>,
    machine: &mut MigrationMachine,
    inbound: Option<Connection>,
) -> Result<MigrationOutcome<G>, SessionError> {
    let connection = inbound.ok_or(TransportError::ConnectionClosed)?;
    let (sender, mut events) = connection.split();
    loop {
        match events.recv().await {
            Some(ConnectionEvent::Open) => continue,
            Some(ConnectionEvent::Data(text)) => match crate::protocol::decode(&text) {
                Ok(ProtocolMessage::NewHostAnnouncement {
                    new_host_id,
                    game_state,
                    join_order,
                    ..
                }) => {
                    machine.on_event(MigrationEvent::AnnouncementReceived {
                        new_host: new_host_id.clone(),
                    });
                    session.adopt_new_host(new_host_id, game_state, join_order, sender);
                    return Ok(MigrationOutcome::Following {
                        session,
                        host_events: events,
                    });
                }
                Ok(other) => {
                    tracing::warn!("Expected announcement, ignoring {:?}", other);
                }
                Err(e) => {
                    tracing::warn!("Ignoring malformed message during migration: {}", e);
                }
            },
            Some(ConnectionEvent::Closed) | Some(ConnectionEvent::Error(_)) | None => {
                return Err(TransportError::ConnectionClosed.into());
            }
        }
    }
}

/// Flip this peer into the host role and rebuild the star topology.
async fn take_over<G: GameHooks>(
    session: PeerSession<G>,
    old_host: &PeerId,
) -> Result<MigrationOutcome<G>, SessionError> {
    let PeerSession {
        transport,
        persistence,
        clock,
        hooks,
        identity,
        participants,
        join_order,
        backup,
        game_in_progress,
        ..
    } = session;

    let self_id = identity.peer_id.clone();
    let others: Vec<Participant> = participants
        .into_values()
        .filter(|p| p.id != self_id && p.id != *old_host)
        .collect();
    let order: Vec<PeerId> = join_order
        .into_iter()
        .filter(|id| id != old_host)
        .collect();

    let (session, listener, peer_links) = HostSession::assume(
        transport,
        persistence,
        clock,
        hooks,
        identity,
        others,
        order,
        backup,
        game_in_progress,
    )
    .await?;
    Ok(MigrationOutcome::BecameHost {
        session,
        listener,
        peer_links,
    })
}
