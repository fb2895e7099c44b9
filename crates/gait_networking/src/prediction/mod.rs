//! # Prediction Buffer
//!
//! Bounded, oldest-first history of locally predicted ticks for one actor.
//!
//! ```text
//! Input:      [101][102][103][104][105]
//!               │    │    │    │    │
//! Prediction: [P101][P102][P103][P104][P105]   ← push, tick = last + 1
//!               │
//! Authority:  [A101]──────────────────────     ← truncate(101) once reconciled
//! ```
//!
//! Ticks are contiguous. When the buffer is full the oldest entry is evicted;
//! evicting history the authority never confirmed means the actor can no
//! longer be reconciled, so the first eviction of an episode raises a desync.

use std::collections::VecDeque;

use gait_shared::{InputCommand, MovementState, TickId};
use thiserror::Error;

/// Errors raised by the prediction buffer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionError {
    /// A push did not continue the tick sequence.
    #[error("prediction out of sequence: expected tick {expected}, got {actual}")]
    Sequence {
        /// Tick the buffer expected.
        expected: TickId,
        /// Tick that was pushed.
        actual: TickId,
    },

    /// The requested tick is not held.
    #[error("tick {tick} is not in the prediction history")]
    NotFound {
        /// Requested tick.
        tick: TickId,
    },
}

/// Result type for prediction operations.
pub type PredictionResult<T> = Result<T, PredictionError>;

/// One predicted tick: the input applied and the state it produced.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PredictionEntry {
    /// Tick of the input.
    pub tick: TickId,
    /// Input applied on this tick.
    pub input: InputCommand,
    /// State after applying the input.
    pub state: MovementState,
}

impl PredictionEntry {
    /// Pairs an input with the state it produced. The tick is the input's.
    #[inline]
    #[must_use]
    pub const fn new(input: InputCommand, state: MovementState) -> Self {
        Self { tick: input.tick, input, state }
    }
}

/// What a successful push did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// Stored without eviction.
    Stored,
    /// Stored after evicting the oldest entry.
    Overflowed {
        /// Tick that was evicted.
        evicted: TickId,
        /// True for the first eviction since the last truncate/clear.
        desync_raised: bool,
    },
}

/// Bounded prediction history for one actor.
#[derive(Clone, Debug)]
pub struct PredictionBuffer {
    entries: VecDeque<PredictionEntry>,
    capacity: usize,
    /// Last tick pushed. Survives truncation so the sequence stays checked.
    last_tick: Option<TickId>,
    overflow_latched: bool,
}

impl PredictionBuffer {
    /// Creates an empty buffer holding at most `capacity` entries (min 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            last_tick: None,
            overflow_latched: false,
        }
    }

    /// Appends the next predicted tick.
    ///
    /// The first push after construction or [`clear`](Self::clear) may use
    /// any tick; later pushes must use exactly the previous tick + 1.
    ///
    /// # Errors
    ///
    /// [`PredictionError::Sequence`] when the tick does not follow.
    pub fn push(&mut self, entry: PredictionEntry) -> PredictionResult<PushOutcome> {
        if let Some(last) = self.last_tick {
            let expected = last.wrapping_add(1);
            if entry.tick != expected {
                return Err(PredictionError::Sequence { expected, actual: entry.tick });
            }
        }

        let mut outcome = PushOutcome::Stored;
        if self.entries.len() >= self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                let desync_raised = !self.overflow_latched;
                self.overflow_latched = true;
                outcome = PushOutcome::Overflowed { evicted: evicted.tick, desync_raised };
            }
        }

        self.entries.push_back(entry);
        self.last_tick = Some(entry.tick);
        Ok(outcome)
    }

    /// Evicts every entry with tick ≤ `upto` and re-arms the overflow latch.
    ///
    /// Returns the number of entries evicted.
    pub fn truncate(&mut self, upto: TickId) -> usize {
        let before = self.entries.len();
        while self.entries.front().is_some_and(|entry| entry.tick <= upto) {
            self.entries.pop_front();
        }
        self.overflow_latched = false;
        before - self.entries.len()
    }

    /// Entry at `tick`, as the starting point of a replay.
    ///
    /// # Errors
    ///
    /// [`PredictionError::NotFound`] when the tick is not held.
    pub fn rewind(&self, tick: TickId) -> PredictionResult<&PredictionEntry> {
        self.get(tick).ok_or(PredictionError::NotFound { tick })
    }

    /// Entry at `tick`, if held.
    #[must_use]
    pub fn get(&self, tick: TickId) -> Option<&PredictionEntry> {
        self.index_of(tick).and_then(|index| self.entries.get(index))
    }

    /// Position of `tick` in the buffer. Ticks are contiguous, so this is
    /// an offset from the front.
    #[must_use]
    pub fn index_of(&self, tick: TickId) -> Option<usize> {
        let front = self.entries.front()?.tick;
        if tick < front {
            return None;
        }
        let index = (tick - front) as usize;
        (index < self.entries.len()).then_some(index)
    }

    /// Drops everything, including the sequence check and the overflow latch.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.last_tick = None;
        self.overflow_latched = false;
    }

    /// Entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &PredictionEntry> {
        self.entries.iter()
    }

    /// Number of entries held.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is held.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Newest entry.
    #[must_use]
    pub fn latest(&self) -> Option<&PredictionEntry> {
        self.entries.back()
    }

    /// Oldest entry.
    #[must_use]
    pub fn oldest(&self) -> Option<&PredictionEntry> {
        self.entries.front()
    }

    /// Last tick pushed, even if it has since been truncated.
    #[inline]
    #[must_use]
    pub const fn last_tick(&self) -> Option<TickId> {
        self.last_tick
    }

    /// True between an overflow and the next truncate/clear.
    #[inline]
    #[must_use]
    pub const fn is_overflowed(&self) -> bool {
        self.overflow_latched
    }

    /// Overwrites the states of consecutive entries starting at `index`.
    ///
    /// Used to commit a finished resimulation in one go.
    pub(crate) fn commit_states(&mut self, index: usize, states: &[MovementState]) {
        for (entry, state) in self.entries.iter_mut().skip(index).zip(states) {
            entry.state = *state;
        }
    }
}

impl Default for PredictionBuffer {
    fn default() -> Self {
        Self::new(64)
    }
}
