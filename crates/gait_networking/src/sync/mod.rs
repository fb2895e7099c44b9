//! # Network Synchronization
//!
//! Glue between the wire and the tick loop.
//!
//! ```text
//! network context                 simulation context
//! ┌────────────────┐   bounded    ┌────────────────┐
//! │ InboxProducer  │ ──────────►  │ Inbox::drain   │ ──► session.receive
//! └────────────────┘  crossbeam   └────────────────┘
//! ```
//!
//! - Client side: [`InputHistory`] keeps unacknowledged inputs for
//!   redundant resends, [`SendCadence`] decides when a datagram goes out.
//! - Authority side: [`AuthorityInputQueue`] orders inputs by tick and
//!   never waits; a missing input is replaced by the last known one. An
//!   input from far past the applied tick (the client outlived a long
//!   outage) moves the timeline forward to it.
//! - Both: [`SharedStats`] counters, readable from any thread, and
//!   [`RemovedActors`] to drop traffic still in flight for a despawned actor.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use gait_shared::{ActorId, InputCommand, TickId};
use parking_lot::Mutex;

/// Synchronization counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Datagrams handed to a transport.
    pub datagrams_sent: u64,
    /// Datagrams decoded successfully.
    pub datagrams_received: u64,
    /// Datagrams rejected by the decoder.
    pub decode_errors: u64,
    /// Datagrams seen twice.
    pub duplicate_datagrams: u64,
    /// Sent datagrams the remote acknowledged.
    pub datagrams_acked: u64,
    /// Sent datagrams never acknowledged.
    pub datagrams_lost: u64,
    /// Records for a tick already applied (stale or duplicated).
    pub stale_records: u64,
    /// Records for actors that were removed.
    pub dropped_for_removed_actor: u64,
    /// Datagrams dropped because the inbox was full.
    pub inbox_overflows: u64,
    /// Inputs applied by the authority as received.
    pub inputs_applied: u64,
    /// Inputs the authority had to repeat.
    pub inputs_repeated: u64,
    /// Times an input queue jumped forward after a long input gap.
    pub timeline_resyncs: u64,
    /// Ticks the authority skipped over in those jumps.
    pub ticks_skipped: u64,
    /// Reconciliations accepted.
    pub accepted: u64,
    /// Reconciliations that rewrote history.
    pub corrected: u64,
    /// Desyncs (snaps to authority).
    pub desynced: u64,
    /// Replays aborted by cancellation.
    pub aborted: u64,
    /// Prediction buffer overflow episodes.
    pub buffer_overflows: u64,
}

impl SyncStats {
    /// Fraction of reconciliations that needed a rewrite.
    #[must_use]
    pub fn correction_rate(&self) -> f64 {
        let total = self.accepted + self.corrected + self.desynced;
        if total == 0 {
            0.0
        } else {
            (self.corrected + self.desynced) as f64 / total as f64
        }
    }
}

/// [`SyncStats`] shared between the simulation and I/O contexts.
#[derive(Clone, Debug, Default)]
pub struct SharedStats(Arc<Mutex<SyncStats>>);

impl SharedStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies `f` under the lock.
    pub fn update(&self, f: impl FnOnce(&mut SyncStats)) {
        f(&mut self.0.lock());
    }

    /// Copy of the current counters.
    #[must_use]
    pub fn snapshot(&self) -> SyncStats {
        *self.0.lock()
    }
}

/// Recently removed actors.
///
/// Remembers the newest `capacity` removals; older ones are forgotten and
/// their late datagrams are handled like any unknown actor's.
#[derive(Clone, Debug)]
pub struct RemovedActors {
    ids: BTreeSet<ActorId>,
    order: VecDeque<ActorId>,
    capacity: usize,
}

impl RemovedActors {
    /// Removals remembered by sessions and authorities.
    pub const DEFAULT_CAPACITY: usize = 256;

    /// Empty set remembering up to `capacity` removals (min 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { ids: BTreeSet::new(), order: VecDeque::with_capacity(capacity), capacity }
    }

    /// Records a removal, forgetting the oldest one when full.
    pub fn insert(&mut self, id: ActorId) {
        if !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    /// Forgets `id`, e.g. because it spawned again.
    pub fn remove(&mut self, id: ActorId) {
        if self.ids.remove(&id) {
            self.order.retain(|&other| other != id);
        }
    }

    /// True while `id`'s removal is remembered.
    #[must_use]
    pub fn contains(&self, id: ActorId) -> bool {
        self.ids.contains(&id)
    }

    /// Removals remembered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True when nothing is remembered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Default for RemovedActors {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

/// Why a datagram did not make it into the inbox.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushError {
    /// The inbox is full; the datagram was dropped.
    Full,
    /// The simulation side is gone.
    Disconnected,
}

/// Creates a bounded single-producer/single-consumer datagram queue.
#[must_use]
pub fn inbox(capacity: usize) -> (InboxProducer, Inbox) {
    let (tx, rx) = bounded(capacity.max(1));
    (InboxProducer { tx }, Inbox { rx })
}

/// Network-side end of the inbox. Not `Clone`: one producer only.
#[derive(Debug)]
pub struct InboxProducer {
    tx: Sender<Vec<u8>>,
}

impl InboxProducer {
    /// Queues a datagram without blocking.
    ///
    /// # Errors
    ///
    /// [`PushError::Full`] drops the datagram; [`PushError::Disconnected`]
    /// means the consumer is gone and the producer should stop.
    pub fn push(&self, datagram: Vec<u8>) -> Result<(), PushError> {
        self.tx.try_send(datagram).map_err(|err| match err {
            TrySendError::Full(_) => PushError::Full,
            TrySendError::Disconnected(_) => PushError::Disconnected,
        })
    }
}

/// Simulation-side end of the inbox.
#[derive(Debug)]
pub struct Inbox {
    rx: Receiver<Vec<u8>>,
}

impl Inbox {
    /// Next queued datagram, if any.
    #[must_use]
    pub fn try_recv(&self) -> Option<Vec<u8>> {
        match self.rx.try_recv() {
            Ok(datagram) => Some(datagram),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Everything queued right now.
    pub fn drain(&self) -> impl Iterator<Item = Vec<u8>> + '_ {
        self.rx.try_iter()
    }

    /// Number of queued datagrams.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// True when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Fires once every `interval` ticks, independent of the tick rate.
#[derive(Clone, Copy, Debug)]
pub struct SendCadence {
    interval: u32,
    elapsed: u32,
}

impl SendCadence {
    /// Cadence firing every `interval` ticks (min 1). The first tick fires.
    #[must_use]
    pub const fn new(interval: u32) -> Self {
        let interval = if interval == 0 { 1 } else { interval };
        Self { interval, elapsed: interval - 1 }
    }

    /// Advances one tick; true when a send is due.
    pub fn tick(&mut self) -> bool {
        self.elapsed += 1;
        if self.elapsed >= self.interval {
            self.elapsed = 0;
            true
        } else {
            false
        }
    }
}

/// Client-side record of inputs the authority has not acknowledged.
#[derive(Clone, Debug)]
pub struct InputHistory {
    inputs: VecDeque<InputCommand>,
    capacity: usize,
    max_redundant: usize,
}

impl InputHistory {
    /// History holding up to `capacity` inputs, sending at most
    /// `max_redundant` per datagram.
    #[must_use]
    pub fn new(capacity: usize, max_redundant: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inputs: VecDeque::with_capacity(capacity),
            capacity,
            max_redundant: max_redundant.clamp(1, capacity),
        }
    }

    /// Records a predicted input.
    pub fn push(&mut self, input: InputCommand) {
        if self.inputs.len() >= self.capacity {
            self.inputs.pop_front();
        }
        self.inputs.push_back(input);
    }

    /// Forgets inputs with tick ≤ `tick`.
    pub fn acknowledge(&mut self, tick: TickId) {
        while self.inputs.front().is_some_and(|input| input.tick <= tick) {
            self.inputs.pop_front();
        }
    }

    /// Newest unacknowledged inputs to send, oldest first.
    #[must_use]
    pub fn unacknowledged(&self) -> Vec<InputCommand> {
        let skip = self.inputs.len().saturating_sub(self.max_redundant);
        self.inputs.iter().skip(skip).copied().collect()
    }

    /// Number of unacknowledged inputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    /// True when everything is acknowledged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Forgets everything.
    pub fn clear(&mut self) {
        self.inputs.clear();
    }
}

/// Why the authority refused an input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputRejection {
    /// Tick already applied.
    Stale,
    /// Tick already queued.
    Duplicate,
}

/// How a received input entered an [`AuthorityInputQueue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Queued {
    /// Within reach of the applied tick.
    InOrder,
    /// Too far past the applied tick. The queue dropped whatever it held
    /// and resumed just before this input; `skipped` ticks are never
    /// simulated.
    Resynced {
        /// Ticks between the old applied tick and this input.
        skipped: u32,
    },
}

/// Authority-side per-actor input queue, ordered by tick.
///
/// Inputs are stored exactly as received so the authority steps with the
/// same command the client predicted with. At most `max_ahead` ticks are
/// held past the applied tick.
#[derive(Clone, Debug)]
pub struct AuthorityInputQueue {
    pending: BTreeMap<TickId, InputCommand>,
    last_applied: Option<TickId>,
    last_input: Option<InputCommand>,
    max_ahead: u32,
}

impl AuthorityInputQueue {
    /// Queue accepting inputs up to `max_ahead` ticks past the last applied.
    #[must_use]
    pub fn new(max_ahead: u32) -> Self {
        Self {
            pending: BTreeMap::new(),
            last_applied: None,
            last_input: None,
            max_ahead: max_ahead.max(1),
        }
    }

    /// Queue whose first expected input is `tick + 1`.
    #[must_use]
    pub fn starting_after(tick: TickId, max_ahead: u32) -> Self {
        Self { last_applied: Some(tick), ..Self::new(max_ahead) }
    }

    /// Queues a received input.
    ///
    /// A tick more than `max_ahead` past the applied one means the inputs
    /// in between are gone for good: the client only keeps a bounded
    /// history. The timeline then resumes at `input.tick`.
    ///
    /// # Errors
    ///
    /// [`InputRejection`] for stale or duplicate ticks.
    pub fn insert(&mut self, input: InputCommand) -> Result<Queued, InputRejection> {
        let mut queued = Queued::InOrder;
        if let Some(last) = self.last_applied {
            if input.tick <= last {
                return Err(InputRejection::Stale);
            }
            if input.tick - last > self.max_ahead {
                let resume = input.tick - 1;
                // Everything pending is older than the new input
                self.pending.clear();
                self.last_applied = Some(resume);
                queued = Queued::Resynced { skipped: resume - last };
            }
        }
        if self.pending.contains_key(&input.tick) {
            return Err(InputRejection::Duplicate);
        }
        self.pending.insert(input.tick, input);
        Ok(queued)
    }

    /// Input for the next tick, if it can be applied now. The second value
    /// is true when the input was missing and the last known one was
    /// repeated in its place.
    ///
    /// Never waits on a hole: once a later tick has arrived, a missing tick
    /// is filled by repetition. Before any input was applied the timeline
    /// starts at the oldest queued tick.
    pub fn next(&mut self) -> Option<(InputCommand, bool)> {
        let (&first, _) = self.pending.iter().next()?;

        let (input, repeated) = match (self.last_applied, self.last_input) {
            (Some(last), Some(previous)) => {
                let tick = last.wrapping_add(1);
                match self.pending.remove(&tick) {
                    Some(input) => (input, false),
                    None => (previous.repeated_at(tick), true),
                }
            }
            _ => (self.pending.remove(&first)?, false),
        };

        self.last_applied = Some(input.tick);
        self.last_input = Some(input);
        Some((input, repeated))
    }

    /// Last applied tick.
    #[inline]
    #[must_use]
    pub const fn last_applied(&self) -> Option<TickId> {
        self.last_applied
    }

    /// Number of queued inputs.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
