//! # Reconciliation
//!
//! Compares an authoritative state with the prediction made for the same
//! tick and repairs the history when they disagree.
//!
//! ```text
//! buffer:    [100][101][102][103][104]
//! authority:       [101*]
//!
//! within tolerance → Accepted   (nothing rewritten)
//! outside          → Corrected  (101 := 101*, replay 102..104 into scratch, commit)
//! 101 evicted      → Desynced   (snap to 101*, history cleared)
//! 101 > 104        → Desynced   (authority is ahead of every prediction)
//! ```
//!
//! Tolerances are squared distances. Reported errors are plain distances.
//! Replay never emits mode transitions; they were emitted when the ticks
//! were first predicted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use gait_core::{Simulator, WorldQuery};
use gait_shared::{
    AuthorityState, DesyncReason, GaitConfig, MovementState, ReconcileOutcome, ReconciliationResult, TickId,
};
use thiserror::Error;

use crate::prediction::{PredictionBuffer, PredictionError};

/// Errors raised by a cancellable reconciliation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileError {
    /// The token was cancelled before the replay finished. The buffer is
    /// untouched.
    #[error("resimulation aborted before tick {at}")]
    Aborted {
        /// First tick that was not replayed.
        at: TickId,
    },
}

/// Shared cancellation flag for an in-flight resimulation.
///
/// Cloning shares the flag. Removing an actor cancels its token.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Creates a live token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels every holder of this token.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// True once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Reconciliation engine. Owns the simulator used for replay and a scratch
/// area reused between passes.
#[derive(Debug)]
pub struct Reconciler {
    simulator: Simulator,
    dt: f32,
    position_tolerance_sq: f32,
    velocity_tolerance_sq: f32,
    scratch: Vec<MovementState>,
}

impl Reconciler {
    /// Creates a reconciler using the tick length and tolerances of `config`.
    #[must_use]
    pub fn new(simulator: Simulator, config: &GaitConfig) -> Self {
        Self::with_tolerances(
            simulator,
            config.tick_seconds(),
            config.position_tolerance_sq,
            config.velocity_tolerance_sq,
        )
    }

    /// Creates a reconciler with explicit tolerances (squared distances).
    #[must_use]
    pub fn with_tolerances(simulator: Simulator, dt: f32, position_tolerance_sq: f32, velocity_tolerance_sq: f32) -> Self {
        Self {
            simulator,
            dt,
            position_tolerance_sq,
            velocity_tolerance_sq,
            scratch: Vec::new(),
        }
    }

    /// Simulator used for replay.
    #[inline]
    #[must_use]
    pub const fn simulator(&self) -> &Simulator {
        &self.simulator
    }

    /// Fixed step used for replay, in seconds.
    #[inline]
    #[must_use]
    pub const fn dt(&self) -> f32 {
        self.dt
    }

    /// Index of `tick` in `buffer`, or why it cannot be matched.
    ///
    /// # Errors
    ///
    /// [`DesyncReason::HistoryEvicted`] when the tick is older than the
    /// oldest entry (or the buffer is empty after predicting past it),
    /// [`DesyncReason::AheadOfHistory`] when it is newer than every entry.
    pub fn locate(buffer: &PredictionBuffer, tick: TickId) -> Result<usize, DesyncReason> {
        match (buffer.oldest(), buffer.latest()) {
            (Some(oldest), Some(latest)) => {
                if tick < oldest.tick {
                    Err(DesyncReason::HistoryEvicted)
                } else if tick > latest.tick {
                    Err(DesyncReason::AheadOfHistory)
                } else {
                    buffer.index_of(tick).ok_or(DesyncReason::HistoryEvicted)
                }
            }
            _ => match buffer.last_tick() {
                Some(last) if tick <= last => Err(DesyncReason::HistoryEvicted),
                _ => Err(DesyncReason::AheadOfHistory),
            },
        }
    }

    /// Reconciles `authority` against `buffer`.
    ///
    /// Never fails. If a replay cannot finish, the actor is snapped to the
    /// authority as for a desync.
    pub fn reconcile<W: WorldQuery + ?Sized>(
        &mut self,
        buffer: &mut PredictionBuffer,
        authority: &AuthorityState,
        world: &W,
    ) -> ReconciliationResult {
        match self.reconcile_with(buffer, authority, world, || false) {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(%err, "replay did not finish, snapping to authority");
                self.desync(buffer, authority)
            }
        }
    }

    /// Like [`reconcile`](Self::reconcile), checking `token` between replay
    /// steps.
    ///
    /// # Errors
    ///
    /// [`ReconcileError::Aborted`] when the token is cancelled; the buffer
    /// is left exactly as it was.
    pub fn reconcile_cancellable<W: WorldQuery + ?Sized>(
        &mut self,
        buffer: &mut PredictionBuffer,
        authority: &AuthorityState,
        world: &W,
        token: &CancellationToken,
    ) -> Result<ReconciliationResult, ReconcileError> {
        self.reconcile_with(buffer, authority, world, || token.is_cancelled())
    }

    /// Replays the stored inputs after `tick` from the state stored at
    /// `tick`, without touching the buffer.
    ///
    /// Returns the replayed states for the ticks after `tick`. With no
    /// correction applied these equal the stored states bit for bit.
    ///
    /// # Errors
    ///
    /// [`PredictionError::NotFound`] when `tick` is not held.
    pub fn resimulate_from<W: WorldQuery + ?Sized>(
        &self,
        buffer: &PredictionBuffer,
        tick: TickId,
        world: &W,
    ) -> Result<Vec<MovementState>, PredictionError> {
        let start = buffer.rewind(tick)?.state;
        let index = buffer.index_of(tick).ok_or(PredictionError::NotFound { tick })?;

        let mut state = start;
        let mut replayed = Vec::with_capacity(buffer.len() - index - 1);
        for entry in buffer.iter().skip(index + 1) {
            state = self.simulator.step(&state, &entry.input, self.dt, world).state;
            replayed.push(state);
        }
        Ok(replayed)
    }

    fn reconcile_with<W, F>(
        &mut self,
        buffer: &mut PredictionBuffer,
        authority: &AuthorityState,
        world: &W,
        cancelled: F,
    ) -> Result<ReconciliationResult, ReconcileError>
    where
        W: WorldQuery + ?Sized,
        F: Fn() -> bool,
    {
        let tick = authority.tick();
        let target = authority.state;

        let index = match Self::locate(buffer, tick) {
            Ok(index) => index,
            Err(reason) => {
                tracing::warn!(tick, ?reason, "authority state cannot be matched to prediction history");
                return Ok(self.desync(buffer, authority));
            }
        };

        let predicted = buffer.iter().nth(index).map(|entry| entry.state).unwrap_or(target);
        let position_error_sq = predicted.position.distance_squared(target.position);
        let velocity_error_sq = predicted.velocity.distance_squared(target.velocity);

        let within = position_error_sq <= self.position_tolerance_sq
            && velocity_error_sq <= self.velocity_tolerance_sq
            && predicted.mode == target.mode;
        if within {
            return Ok(ReconciliationResult {
                outcome: ReconcileOutcome::Accepted,
                corrected_from: tick,
                position_error: position_error_sq.sqrt(),
                velocity_error: velocity_error_sq.sqrt(),
                snap: None,
            });
        }

        // Replay into scratch, commit only when complete.
        self.scratch.clear();
        self.scratch.push(target);
        let mut state = target;
        for entry in buffer.iter().skip(index + 1) {
            if cancelled() {
                return Err(ReconcileError::Aborted { at: entry.tick });
            }
            state = self.simulator.step(&state, &entry.input, self.dt, world).state;
            self.scratch.push(state);
        }
        buffer.commit_states(index, &self.scratch);

        tracing::debug!(
            tick,
            replayed = self.scratch.len() - 1,
            position_error = position_error_sq.sqrt(),
            "prediction corrected"
        );

        Ok(ReconciliationResult {
            outcome: ReconcileOutcome::Corrected,
            corrected_from: tick,
            position_error: position_error_sq.sqrt(),
            velocity_error: velocity_error_sq.sqrt(),
            snap: None,
        })
    }

    /// Snaps to the authority and discards the history.
    fn desync(&self, buffer: &mut PredictionBuffer, authority: &AuthorityState) -> ReconciliationResult {
        let tick = authority.tick();
        let target = authority.state;
        let (position_error, velocity_error) = buffer
            .latest()
            .map_or((0.0, 0.0), |latest| (latest.state.position_error(&target), latest.state.velocity_error(&target)));
        buffer.clear();

        ReconciliationResult {
            outcome: ReconcileOutcome::Desynced,
            corrected_from: tick,
            position_error,
            velocity_error,
            snap: Some(target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction::PredictionEntry;
    use gait_core::PlaneWorld;
    use gait_shared::{ActionFlags, InputCommand, MovementMode, Vec2, Vec3};

    const DT: f32 = 1.0 / 60.0;

    fn reconciler() -> Reconciler {
        Reconciler::with_tolerances(Simulator::default(), DT, 0.5, 0.5)
    }

    /// Predicts `count` ticks of idle standing starting at tick 100.
    fn idle_history(sim: &Simulator, world: &PlaneWorld, x: f32, count: u32) -> PredictionBuffer {
        let mut buffer = PredictionBuffer::new(64);
        let mut state = MovementState::spawn(Vec3::new(x, 0.0, 0.0), MovementMode::Grounded, 99);
        for tick in 100..100 + count {
            let input = InputCommand::new(tick, Vec2::ZERO, ActionFlags::NONE);
            state = sim.step(&state, &input, DT, world).state;
            buffer.push(PredictionEntry::new(input, state)).unwrap();
        }
        buffer
    }

    fn authority_at(tick: TickId, x: f32) -> AuthorityState {
        AuthorityState::new(tick, MovementState::spawn(Vec3::new(x, 0.0, 0.0), MovementMode::Grounded, tick))
    }

    #[test]
    fn test_small_error_is_accepted() {
        let world = PlaneWorld::flat(0.0);
        let mut rec = reconciler();
        let mut buffer = idle_history(rec.simulator(), &world, 10.0, 5);
        let before: Vec<_> = buffer.iter().copied().collect();

        let result = rec.reconcile(&mut buffer, &authority_at(100, 10.6), &world);
        assert_eq!(result.outcome, ReconcileOutcome::Accepted);
        assert!((result.position_error - 0.6).abs() < 1e-5);
        assert!(result.snap.is_none());
        assert_eq!(buffer.iter().copied().collect::<Vec<_>>(), before);
    }

    #[test]
    fn test_large_error_is_corrected_and_replayed() {
        let world = PlaneWorld::flat(0.0);
        let mut rec = reconciler();
        let mut buffer = idle_history(rec.simulator(), &world, 10.0, 5);

        let authority = authority_at(100, 15.0);
        let result = rec.reconcile(&mut buffer, &authority, &world);
        assert_eq!(result.outcome, ReconcileOutcome::Corrected);
        assert_eq!(result.corrected_from, 100);
        assert!((result.position_error - 5.0).abs() < 1e-5);

        // The authoritative state is stored as received
        let corrected = buffer.get(100).unwrap().state;
        assert!(corrected.bitwise_eq(&authority.state));
        assert_eq!(corrected.position, Vec3::new(15.0, 0.0, 0.0));
        let mut state = corrected;
        for entry in buffer.iter().skip(1) {
            state = rec.simulator().step(&state, &entry.input, DT, &world).state;
            assert!(entry.state.bitwise_eq(&state));
        }
    }

    #[test]
    fn test_mode_mismatch_is_corrected() {
        let world = PlaneWorld::flat(0.0);
        let mut rec = reconciler();
        let mut buffer = idle_history(rec.simulator(), &world, 0.0, 3);
        let mut authority = authority_at(101, 0.0);
        authority.state.mode = MovementMode::Falling;

        let result = rec.reconcile(&mut buffer, &authority, &world);
        assert_eq!(result.outcome, ReconcileOutcome::Corrected);
    }

    #[test]
    fn test_evicted_tick_desyncs() {
        let world = PlaneWorld::flat(0.0);
        let mut rec = reconciler();
        let mut buffer = idle_history(rec.simulator(), &world, 0.0, 5);
        buffer.truncate(102);

        assert_eq!(Reconciler::locate(&buffer, 101), Err(DesyncReason::HistoryEvicted));
        let result = rec.reconcile(&mut buffer, &authority_at(101, 3.0), &world);
        assert_eq!(result.outcome, ReconcileOutcome::Desynced);
        assert_eq!(result.snap.unwrap().position.x, 3.0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_authority_ahead_of_history_desyncs() {
        let world = PlaneWorld::flat(0.0);
        let mut rec = reconciler();
        let mut buffer = idle_history(rec.simulator(), &world, 0.0, 5);

        assert_eq!(Reconciler::locate(&buffer, 500), Err(DesyncReason::AheadOfHistory));
        let result = rec.reconcile(&mut buffer, &authority_at(500, 1.0), &world);
        assert_eq!(result.outcome, ReconcileOutcome::Desynced);
        assert_eq!(result.snap.unwrap().tick, 500);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_cancelled_replay_leaves_buffer_untouched() {
        let world = PlaneWorld::flat(0.0);
        let mut rec = reconciler();
        let mut buffer = idle_history(rec.simulator(), &world, 10.0, 5);
        let before: Vec<_> = buffer.iter().copied().collect();

        let token = CancellationToken::new();
        token.cancel();
        let err = rec
            .reconcile_cancellable(&mut buffer, &authority_at(100, 15.0), &world, &token)
            .unwrap_err();
        assert_eq!(err, ReconcileError::Aborted { at: 101 });
        assert_eq!(buffer.iter().copied().collect::<Vec<_>>(), before);
    }

    #[test]
    fn test_token_is_shared_between_clones() {
        let token = CancellationToken::new();
        let held = token.clone();
        assert!(!held.is_cancelled());
        token.cancel();
        assert!(held.is_cancelled());
    }

    #[test]
    fn test_resimulate_from_reproduces_history() {
        let world = PlaneWorld::flat(0.0);
        let sim = Simulator::default();
        let mut buffer = PredictionBuffer::new(64);
        let mut state = MovementState::spawn(Vec3::ZERO, MovementMode::Grounded, 0);
        for tick in 1..=40 {
            let flags = if tick == 10 { ActionFlags::JUMP } else { ActionFlags::SPRINT };
            let input = InputCommand::new(tick, Vec2::new(0.3, 0.9), flags);
            state = sim.step(&state, &input, DT, &world).state;
            buffer.push(PredictionEntry::new(input, state)).unwrap();
        }

        let rec = Reconciler::with_tolerances(sim, DT, 0.01, 0.25);
        let replayed = rec.resimulate_from(&buffer, 5, &world).unwrap();
        assert_eq!(replayed.len(), 35);
        for (entry, state) in buffer.iter().skip(5).zip(&replayed) {
            assert!(entry.state.bitwise_eq(state));
        }
        assert!(rec.resimulate_from(&buffer, 99, &world).is_err());
    }
}
