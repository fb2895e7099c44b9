//! Movement events exposed to collaborators.
//!
//! The simulation and the sessions never block on collaborators. They hand
//! events to an [`EventSink`]; what the sink does with them (animation,
//! audio, telemetry) is outside this crate.
//!
//! ```text
//! gait defines:         Collaborator implements:
//! ┌───────────────┐     ┌───────────────┐
//! │ trait EventSink│ ←── │ impl EventSink│
//! └───────────────┘     └───────────────┘
//! ```

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

use crate::state::{ActorId, ModeTransition, ReconciliationResult, TickId};

/// Why an actor lost sync with its authority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DesyncReason {
    /// The prediction buffer overflowed and evicted unacknowledged history.
    BufferOverflow,
    /// The authority answered a tick that had already been evicted.
    HistoryEvicted,
    /// The authority answered a tick newer than anything predicted.
    AheadOfHistory,
}

/// Event emitted by the simulation or a session.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MovementEvent {
    /// Locomotion mode changed on a live (non-replayed) tick.
    ModeChanged {
        /// Actor concerned.
        actor: ActorId,
        /// The change.
        transition: ModeTransition,
    },
    /// A reconciliation pass finished.
    Reconciled {
        /// Actor concerned.
        actor: ActorId,
        /// Outcome of the pass.
        result: ReconciliationResult,
    },
    /// The actor lost sync and was snapped.
    Desynced {
        /// Actor concerned.
        actor: ActorId,
        /// Tick at which sync was lost.
        tick: TickId,
        /// Cause.
        reason: DesyncReason,
    },
}

impl MovementEvent {
    /// Actor this event is about.
    #[must_use]
    pub const fn actor(&self) -> ActorId {
        match self {
            Self::ModeChanged { actor, .. }
            | Self::Reconciled { actor, .. }
            | Self::Desynced { actor, .. } => *actor,
        }
    }
}

/// Receiver of movement events.
pub trait EventSink {
    /// Accepts one event. Must not block.
    fn emit(&mut self, event: MovementEvent);
}

impl EventSink for Vec<MovementEvent> {
    fn emit(&mut self, event: MovementEvent) {
        self.push(event);
    }
}

/// Forwards events to another thread. A full or disconnected channel drops
/// the event rather than stalling the tick.
impl EventSink for Sender<MovementEvent> {
    fn emit(&mut self, event: MovementEvent) {
        let _ = self.try_send(event);
    }
}

/// Sink that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: MovementEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MovementMode;

    fn mode_change(actor: u32) -> MovementEvent {
        MovementEvent::ModeChanged {
            actor: ActorId(actor),
            transition: ModeTransition {
                from: MovementMode::Grounded,
                to: MovementMode::Falling,
                tick: 7,
            },
        }
    }

    #[test]
    fn test_vec_sink_collects() {
        let mut sink: Vec<MovementEvent> = Vec::new();
        sink.emit(mode_change(1));
        sink.emit(mode_change(2));
        assert_eq!(sink.len(), 2);
        assert_eq!(sink[1].actor(), ActorId(2));
    }

    #[test]
    fn test_channel_sink_never_blocks_when_full() {
        let (mut tx, rx) = crossbeam_channel::bounded(1);
        tx.emit(mode_change(1));
        tx.emit(mode_change(2)); // dropped, channel full
        assert_eq!(rx.try_iter().count(), 1);

        drop(rx);
        tx.emit(mode_change(3)); // disconnected, still fine
    }
}
