//! The seam between session coordination and the actual game.
//!
//! The game logic (rules, phases, payouts) lives outside this crate and owns
//! an opaque snapshot. The session layer drives it through [`GameHooks`] and
//! never inspects the snapshot beyond handing it to `filter_for_viewer`.

use serde_json::Value;

use super::participant::{Participant, PeerId};

/// Hooks the embedding game implements; invoked by the host session.
///
/// Handlers run to completion inside the host's message loop, so
/// implementations must not block.
#[cfg_attr(test, mockall::automock)]
pub trait GameHooks: Send + 'static {
    /// A participant was admitted. `queued` means a game is already running
    /// and the player should be held for the next round.
    fn on_player_joined(&mut self, participant: &Participant, queued: bool);

    /// A participant left or its transport closed. With
    /// `may_reconnect = true` the departure may still be undone within the
    /// grace period.
    fn on_player_left(&mut self, participant_id: &PeerId, may_reconnect: bool);

    /// A previously-disconnected participant was restored.
    fn on_player_reconnected(&mut self, participant_id: &PeerId);

    /// A player intent (action or game passthrough) arrived. The host calls
    /// this in arrival order; the payload is opaque to the session layer.
    fn on_action(&mut self, from: &PeerId, payload: &Value);

    /// This process just became authoritative for game state. `recovered`
    /// carries the snapshot to resume from, if any (the replicated backup
    /// after a migration, or a client's backup after a host reload).
    fn on_become_host<'a>(&mut self, recovered: Option<&'a Value>);

    /// The current authoritative snapshot, or `None` before the first game
    /// starts. Sent whole as the unfiltered backup.
    fn snapshot(&self) -> Option<Value>;

    /// Project the snapshot for one viewer, hiding every other participant's
    /// private sub-state unless the snapshot's phase marks it publicly
    /// revealed. Must be pure: the shared snapshot is never mutated and each
    /// viewer gets an independent projection.
    fn filter_for_viewer(&self, snapshot: &Value, viewer: &PeerId) -> Value;
}
