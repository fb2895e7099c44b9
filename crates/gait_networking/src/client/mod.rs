//! # Client Session
//!
//! Client-side prediction, reconciliation and remote interpolation.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CLIENT SESSION                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐       │
//! │  │ Prediction   │  │ Reconciler   │  │ Remote       │       │
//! │  │ (per actor)  │  │ (shared)     │  │ Interpolation│       │
//! │  └──────────────┘  └──────────────┘  └──────────────┘       │
//! │         │                 │                 │               │
//! │         └─────────────────┼─────────────────┘               │
//! │                           │                                 │
//! │              ┌────────────▼───────────┐                     │
//! │              │  Correction Smoothing  │                     │
//! │              │  (rendered transform)  │                     │
//! │              └────────────────────────┘                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Per tick, for every locally controlled actor:
//!
//! 1. [`ClientSession::predict`] steps the actor and records the entry
//! 2. [`ClientSession::poll_send`] emits the unacknowledged inputs when due
//! 3. [`ClientSession::drain_inbox`] reconciles whatever authority arrived
//!
//! Nothing here blocks or waits for the network.

use std::collections::BTreeMap;

use gait_core::{Simulator, WorldQuery};
use gait_shared::{
    ActorId, AuthorityState, DesyncReason, EventSink, GaitConfig, InputCommand, MovementEvent, MovementState,
    ReconcileOutcome, ReconciliationResult, TickId, Transform,
};
use thiserror::Error;

use crate::prediction::{PredictionBuffer, PredictionEntry, PredictionError, PushOutcome};
use crate::protocol::{decode, quantized_roundtrip, AckTracker, DeliveryTracker, PacketKind, PacketWriter, Payload};
use crate::reconciliation::{CancellationToken, ReconcileError, Reconciler};
use crate::smoothing::{CorrectionSmoother, RemoteInterpolator};
use crate::sync::{Inbox, InputHistory, RemovedActors, SendCadence, SharedStats, SyncStats};

/// Errors surfaced by a client session.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// The actor's prediction history broke its sequence. The actor stays
    /// faulted until [`ClientSession::resync`].
    #[error("prediction faulted: {0}")]
    Faulted(#[from] PredictionError),

    /// No such locally controlled actor.
    #[error("unknown actor {0}")]
    UnknownActor(ActorId),

    /// The actor is already controlled by this session.
    #[error("actor {0} already exists")]
    DuplicateActor(ActorId),
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// A locally controlled actor.
#[derive(Debug)]
struct PredictedActor {
    buffer: PredictionBuffer,
    current: MovementState,
    next_tick: TickId,
    last_authority_tick: Option<TickId>,
    history: InputHistory,
    cadence: SendCadence,
    smoother: CorrectionSmoother,
    ack: AckTracker,
    delivery: DeliveryTracker,
    token: CancellationToken,
    fault: Option<PredictionError>,
}

impl PredictedActor {
    fn new(config: &GaitConfig, spawn: MovementState) -> Self {
        let mut smoother = CorrectionSmoother::from_config(config);
        smoother.snap(spawn.transform());
        Self {
            buffer: PredictionBuffer::new(config.buffer_capacity),
            current: spawn,
            next_tick: spawn.tick.wrapping_add(1),
            last_authority_tick: None,
            history: InputHistory::new(config.buffer_capacity, config.max_redundant_inputs),
            cadence: SendCadence::new(config.send_interval_ticks),
            smoother,
            ack: AckTracker::new(),
            delivery: DeliveryTracker::new(),
            token: CancellationToken::new(),
            fault: None,
        }
    }
}

/// Client side of the synchronization protocol.
pub struct ClientSession {
    config: GaitConfig,
    reconciler: Reconciler,
    actors: BTreeMap<ActorId, PredictedActor>,
    remotes: BTreeMap<ActorId, RemoteInterpolator>,
    /// Actors removed locally; their in-flight records are dropped.
    removed: RemovedActors,
    writer: PacketWriter,
    stats: SharedStats,
}

impl ClientSession {
    /// Creates a session.
    #[must_use]
    pub fn new(config: GaitConfig, simulator: Simulator) -> Self {
        let reconciler = Reconciler::new(simulator, &config);
        Self {
            config,
            reconciler,
            actors: BTreeMap::new(),
            remotes: BTreeMap::new(),
            removed: RemovedActors::default(),
            writer: PacketWriter::new(),
            stats: SharedStats::new(),
        }
    }

    /// Starts predicting `id` from `spawn`. The first input is expected for
    /// `spawn.tick + 1`.
    ///
    /// # Errors
    ///
    /// [`SessionError::DuplicateActor`] if `id` is already predicted.
    pub fn add_actor(&mut self, id: ActorId, spawn: MovementState) -> SessionResult<()> {
        if self.actors.contains_key(&id) {
            return Err(SessionError::DuplicateActor(id));
        }
        self.removed.remove(id);
        self.remotes.remove(&id);
        self.actors.insert(id, PredictedActor::new(&self.config, spawn));
        tracing::info!("Actor {} joined at tick {}", id, spawn.tick);
        Ok(())
    }

    /// Stops predicting `id`: its history is discarded, any resimulation in
    /// flight is cancelled and later records for it are dropped.
    ///
    /// Returns the leave datagram to send to the authority.
    pub fn remove_actor(&mut self, id: ActorId) -> Option<Vec<u8>> {
        let mut actor = self.actors.remove(&id)?;
        actor.token.cancel();
        self.removed.insert(id);
        tracing::info!("Actor {} left", id);

        let header = actor.ack.next_header(PacketKind::Leave, id);
        self.writer.serialize_leave(&header).then(|| self.writer.as_slice().to_vec())
    }

    /// Predicts one tick for `id`.
    ///
    /// With input quantization on, the actor is stepped with the command as
    /// the authority will decode it.
    ///
    /// # Errors
    ///
    /// [`SessionError::UnknownActor`], or [`SessionError::Faulted`] when
    /// `input.tick` does not follow the previous prediction.
    pub fn predict<W, S>(
        &mut self,
        id: ActorId,
        input: InputCommand,
        world: &W,
        sink: &mut S,
    ) -> SessionResult<MovementState>
    where
        W: WorldQuery + ?Sized,
        S: EventSink + ?Sized,
    {
        let actor = self.actors.get_mut(&id).ok_or(SessionError::UnknownActor(id))?;
        if let Some(fault) = actor.fault {
            return Err(SessionError::Faulted(fault));
        }

        let sanitized = input.sanitized();
        let command = if self.config.input_quantization { quantized_roundtrip(&sanitized) } else { sanitized };

        let simulator = self.reconciler.simulator();
        let output = simulator.step(&actor.current, &command, self.reconciler.dt(), world);

        match actor.buffer.push(PredictionEntry::new(command, output.state)) {
            Ok(PushOutcome::Stored) => {}
            Ok(PushOutcome::Overflowed { evicted, desync_raised }) => {
                if desync_raised {
                    tracing::warn!("Actor {} prediction buffer overflowed at tick {}", id, evicted);
                    self.stats.update(|s| s.buffer_overflows += 1);
                    sink.emit(MovementEvent::Desynced { actor: id, tick: evicted, reason: DesyncReason::BufferOverflow });
                }
            }
            Err(err) => {
                tracing::error!("Actor {} prediction faulted: {}", id, err);
                actor.fault = Some(err);
                return Err(err.into());
            }
        }

        actor.current = output.state;
        actor.next_tick = command.tick.wrapping_add(1);
        actor.history.push(command);
        if let Some(transition) = output.transition {
            sink.emit(MovementEvent::ModeChanged { actor: id, transition });
        }
        Ok(output.state)
    }

    /// Input datagram for `id` if one is due this tick.
    ///
    /// Call once per simulation tick per actor; the configured send
    /// interval decides when something comes out.
    ///
    /// # Errors
    ///
    /// [`SessionError::UnknownActor`].
    pub fn poll_send(&mut self, id: ActorId) -> SessionResult<Option<Vec<u8>>> {
        let actor = self.actors.get_mut(&id).ok_or(SessionError::UnknownActor(id))?;
        if !actor.cadence.tick() || actor.history.is_empty() {
            return Ok(None);
        }

        let header = actor.ack.next_header(PacketKind::InputBatch, id);
        let inputs = actor.history.unacknowledged();
        if !self.writer.serialize_inputs(&header, &inputs, self.config.input_quantization) {
            tracing::warn!("Actor {} input batch of {} does not fit a datagram", id, inputs.len());
            return Ok(None);
        }
        let forgotten = actor.delivery.sent(header.sequence);
        self.stats.update(|s| {
            s.datagrams_sent += 1;
            s.datagrams_lost += u64::from(forgotten);
        });
        Ok(Some(self.writer.as_slice().to_vec()))
    }

    /// Handles one received datagram.
    ///
    /// Returns the reconciliation it caused, if any. Malformed, duplicate
    /// and stale datagrams are counted and dropped.
    pub fn receive<W, S>(&mut self, bytes: &[u8], world: &W, sink: &mut S) -> Option<ReconciliationResult>
    where
        W: WorldQuery + ?Sized,
        S: EventSink + ?Sized,
    {
        let datagram = match decode(bytes) {
            Ok(datagram) => datagram,
            Err(err) => {
                tracing::warn!("Dropping malformed datagram: {}", err);
                self.stats.update(|s| s.decode_errors += 1);
                return None;
            }
        };
        self.stats.update(|s| s.datagrams_received += 1);

        let id = datagram.header.actor;
        if self.removed.contains(id) {
            self.stats.update(|s| s.dropped_for_removed_actor += 1);
            return None;
        }

        match datagram.payload {
            Payload::Authority(authority) => {
                if let Some(actor) = self.actors.get_mut(&id) {
                    if !actor.ack.record(datagram.header.sequence) {
                        self.stats.update(|s| s.duplicate_datagrams += 1);
                        return None;
                    }
                    let delivery = actor.delivery.on_header(&datagram.header);
                    self.stats.update(|s| {
                        s.datagrams_acked += u64::from(delivery.acked);
                        s.datagrams_lost += u64::from(delivery.lost);
                    });
                    match self.apply_authority(id, &authority, world, sink) {
                        Ok(result) => result,
                        Err(err) => {
                            tracing::debug!("Authority for actor {} ignored: {}", id, err);
                            None
                        }
                    }
                } else {
                    let config = &self.config;
                    let remote = self.remotes.entry(id).or_insert_with(|| RemoteInterpolator::from_config(config));
                    if !remote.push(authority) {
                        self.stats.update(|s| s.stale_records += 1);
                    }
                    None
                }
            }
            Payload::Leave => {
                if self.remotes.remove(&id).is_some() {
                    tracing::info!("Remote actor {} left", id);
                }
                None
            }
            Payload::Inputs(_) => {
                tracing::debug!("Ignoring input batch for actor {} on a client", id);
                None
            }
        }
    }

    /// Handles every datagram queued in `inbox`. Returns how many
    /// reconciliations they caused.
    pub fn drain_inbox<W, S>(&mut self, inbox: &Inbox, world: &W, sink: &mut S) -> usize
    where
        W: WorldQuery + ?Sized,
        S: EventSink + ?Sized,
    {
        inbox.drain().filter(|bytes| self.receive(bytes, world, sink).is_some()).count()
    }

    /// Reconciles `id` against an authoritative state.
    ///
    /// Returns `Ok(None)` when the state is stale (not newer than the last
    /// one applied) or the replay was cancelled.
    ///
    /// # Errors
    ///
    /// [`SessionError::UnknownActor`] or [`SessionError::Faulted`].
    pub fn apply_authority<W, S>(
        &mut self,
        id: ActorId,
        authority: &AuthorityState,
        world: &W,
        sink: &mut S,
    ) -> SessionResult<Option<ReconciliationResult>>
    where
        W: WorldQuery + ?Sized,
        S: EventSink + ?Sized,
    {
        let actor = self.actors.get_mut(&id).ok_or(SessionError::UnknownActor(id))?;
        if let Some(fault) = actor.fault {
            return Err(SessionError::Faulted(fault));
        }

        let tick = authority.tick();
        if actor.last_authority_tick.is_some_and(|last| tick <= last) {
            self.stats.update(|s| s.stale_records += 1);
            return Ok(None);
        }

        let reason = Reconciler::locate(&actor.buffer, tick).err();
        let result = match self.reconciler.reconcile_cancellable(&mut actor.buffer, authority, world, &actor.token) {
            Ok(result) => result,
            Err(ReconcileError::Aborted { at }) => {
                tracing::debug!("Actor {} resimulation aborted at tick {}", id, at);
                self.stats.update(|s| s.aborted += 1);
                return Ok(None);
            }
        };

        actor.last_authority_tick = Some(tick);
        actor.history.acknowledge(tick);

        match result.outcome {
            ReconcileOutcome::Accepted => {
                let _ = actor.buffer.truncate(tick);
                self.stats.update(|s| s.accepted += 1);
            }
            ReconcileOutcome::Corrected => {
                if let Some(latest) = actor.buffer.latest() {
                    actor.current = latest.state;
                }
                let _ = actor.buffer.truncate(tick);
                self.stats.update(|s| s.corrected += 1);
            }
            ReconcileOutcome::Desynced => {
                if let Some(snap) = result.snap {
                    actor.current = snap;
                }
                if tick >= actor.next_tick {
                    actor.next_tick = tick.wrapping_add(1);
                }
                let reason = reason.unwrap_or(DesyncReason::HistoryEvicted);
                tracing::warn!("Actor {} desynced at tick {} ({:?}), snapped to authority", id, tick, reason);
                self.stats.update(|s| s.desynced += 1);
                sink.emit(MovementEvent::Desynced { actor: id, tick, reason });
            }
        }

        actor.smoother.on_reconciled(&result, actor.current.transform());
        sink.emit(MovementEvent::Reconciled { actor: id, result });
        Ok(Some(result))
    }

    /// Clears a faulted (or any) actor and restarts prediction from `state`.
    ///
    /// # Errors
    ///
    /// [`SessionError::UnknownActor`].
    pub fn resync(&mut self, id: ActorId, state: MovementState) -> SessionResult<()> {
        let actor = self.actors.get_mut(&id).ok_or(SessionError::UnknownActor(id))?;
        actor.buffer.clear();
        actor.history.clear();
        actor.current = state;
        actor.next_tick = state.tick.wrapping_add(1);
        actor.fault = None;
        actor.smoother.snap(state.transform());
        tracing::info!("Actor {} resynced at tick {}", id, state.tick);
        Ok(())
    }

    /// Transform to draw this frame for a locally controlled actor.
    pub fn rendered_transform(&mut self, id: ActorId, frame_ms: f32) -> Option<Transform> {
        let actor = self.actors.get_mut(&id)?;
        Some(actor.smoother.update(actor.current.transform(), frame_ms))
    }

    /// Advances every remote actor's render clock.
    pub fn advance_remotes(&mut self, frame_ms: f32) {
        for remote in self.remotes.values_mut() {
            remote.advance(frame_ms);
        }
    }

    /// Transform to draw for a remote actor.
    #[must_use]
    pub fn remote_transform(&self, id: ActorId) -> Option<Transform> {
        self.remotes.get(&id)?.sample()
    }

    /// Current predicted state.
    #[must_use]
    pub fn state(&self, id: ActorId) -> Option<MovementState> {
        self.actors.get(&id).map(|actor| actor.current)
    }

    /// Tick the next input for `id` must carry.
    #[must_use]
    pub fn next_tick(&self, id: ActorId) -> Option<TickId> {
        self.actors.get(&id).map(|actor| actor.next_tick)
    }

    /// Newest authority tick reconciled for `id`.
    #[must_use]
    pub fn last_authority_tick(&self, id: ActorId) -> Option<TickId> {
        self.actors.get(&id)?.last_authority_tick
    }

    /// Prediction history of `id`.
    #[must_use]
    pub fn buffer(&self, id: ActorId) -> Option<&PredictionBuffer> {
        self.actors.get(&id).map(|actor| &actor.buffer)
    }

    /// Cancellation token of `id`'s resimulations.
    #[must_use]
    pub fn token(&self, id: ActorId) -> Option<CancellationToken> {
        self.actors.get(&id).map(|actor| actor.token.clone())
    }

    /// True when `id` needs a [`resync`](Self::resync).
    #[must_use]
    pub fn is_faulted(&self, id: ActorId) -> bool {
        self.actors.get(&id).is_some_and(|actor| actor.fault.is_some())
    }

    /// Locally controlled actors, in id order.
    pub fn actors(&self) -> impl Iterator<Item = ActorId> + '_ {
        self.actors.keys().copied()
    }

    /// Remote actors seen so far, in id order.
    pub fn remotes(&self) -> impl Iterator<Item = ActorId> + '_ {
        self.remotes.keys().copied()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> SyncStats {
        self.stats.snapshot()
    }

    /// Shared counters, e.g. for an I/O task.
    #[must_use]
    pub fn shared_stats(&self) -> SharedStats {
        self.stats.clone()
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &GaitConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PacketHeader;
    use crate::sync::inbox;
    use gait_core::PlaneWorld;
    use gait_shared::{ActionFlags, MovementMode, NullSink, Vec2, Vec3, PROTOCOL_VERSION};

    const ACTOR: ActorId = ActorId(1);

    fn session() -> ClientSession {
        let config = GaitConfig::default();
        let mut session = ClientSession::new(config, Simulator::default());
        session
            .add_actor(ACTOR, MovementState::spawn(Vec3::ZERO, MovementMode::Grounded, 0))
            .unwrap();
        session
    }

    fn forward(tick: TickId) -> InputCommand {
        InputCommand::new(tick, Vec2::new(0.0, 1.0), ActionFlags::NONE)
    }

    fn authority_datagram(sequence: u16, authority: &AuthorityState) -> Vec<u8> {
        datagram_for(ACTOR, sequence, 0, authority)
    }

    fn datagram_for(actor: ActorId, sequence: u16, ack_bits: u32, authority: &AuthorityState) -> Vec<u8> {
        let header = PacketHeader {
            version: PROTOCOL_VERSION,
            kind: PacketKind::Authority as u8,
            actor,
            sequence,
            ack: 0,
            ack_bits,
        };
        let mut writer = PacketWriter::new();
        assert!(writer.serialize_authority(&header, authority));
        writer.as_slice().to_vec()
    }

    #[test]
    fn test_predict_sequences_ticks() {
        let world = PlaneWorld::default();
        let mut session = session();
        let mut events: Vec<MovementEvent> = Vec::new();

        for tick in 1..=10 {
            session.predict(ACTOR, forward(tick), &world, &mut events).unwrap();
        }
        assert_eq!(session.next_tick(ACTOR), Some(11));
        assert_eq!(session.buffer(ACTOR).map(PredictionBuffer::len), Some(10));
        assert!(session.state(ACTOR).is_some_and(|s| s.position.z > 0.0));
    }

    #[test]
    fn test_sequence_error_faults_actor() {
        let world = PlaneWorld::default();
        let mut session = session();

        session.predict(ACTOR, forward(1), &world, &mut NullSink).unwrap();
        let err = session.predict(ACTOR, forward(5), &world, &mut NullSink).unwrap_err();
        assert_eq!(err, SessionError::Faulted(PredictionError::Sequence { expected: 2, actual: 5 }));
        assert!(session.is_faulted(ACTOR));
        // Still faulted, even with the right tick
        assert!(session.predict(ACTOR, forward(2), &world, &mut NullSink).is_err());

        let state = session.state(ACTOR).unwrap_or_default();
        session.resync(ACTOR, state).unwrap();
        assert!(session.predict(ACTOR, forward(2), &world, &mut NullSink).is_ok());
    }

    #[test]
    fn test_poll_send_batches_unacknowledged() {
        let world = PlaneWorld::default();
        let mut session = session();

        assert_eq!(session.poll_send(ACTOR), Ok(None));
        for tick in 1..=3 {
            session.predict(ACTOR, forward(tick), &world, &mut NullSink).unwrap();
        }
        let bytes = session.poll_send(ACTOR).unwrap().unwrap_or_default();
        match decode(&bytes).map(|d| d.payload) {
            Ok(Payload::Inputs(inputs)) => {
                let ticks: Vec<_> = inputs.iter().map(|c| c.tick).collect();
                assert_eq!(ticks, vec![1, 2, 3]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_authority_datagram_reconciles_once() {
        let world = PlaneWorld::default();
        let mut session = session();
        for tick in 1..=5 {
            session.predict(ACTOR, forward(tick), &world, &mut NullSink).unwrap();
        }
        let predicted = session.buffer(ACTOR).and_then(|b| b.get(3)).map(|e| e.state).unwrap_or_default();
        let bytes = authority_datagram(0, &AuthorityState::new(3, predicted));

        let mut events: Vec<MovementEvent> = Vec::new();
        assert!(session.receive(&bytes, &world, &mut events).is_some());
        assert!(session.receive(&bytes, &world, &mut events).is_none());

        let reconciled = events.iter().filter(|e| matches!(e, MovementEvent::Reconciled { .. })).count();
        assert_eq!(reconciled, 1);
        assert_eq!(session.stats().duplicate_datagrams, 1);
        assert_eq!(session.stats().accepted, 1);
        // Acknowledged history is gone
        assert_eq!(session.buffer(ACTOR).and_then(PredictionBuffer::oldest).map(|e| e.tick), Some(4));
    }

    #[test]
    fn test_removed_actor_drops_records() {
        let world = PlaneWorld::default();
        let mut session = session();
        session.predict(ACTOR, forward(1), &world, &mut NullSink).unwrap();
        let token = session.token(ACTOR).unwrap_or_default();

        let leave = session.remove_actor(ACTOR);
        assert!(leave.is_some());
        assert!(token.is_cancelled());

        let state = MovementState::spawn(Vec3::ZERO, MovementMode::Grounded, 1);
        let bytes = authority_datagram(0, &AuthorityState::new(1, state));
        assert!(session.receive(&bytes, &world, &mut NullSink).is_none());
        assert_eq!(session.stats().dropped_for_removed_actor, 1);
        assert!(session.remotes().next().is_none());
    }

    #[test]
    fn test_removed_actors_are_forgotten_eventually() {
        let world = PlaneWorld::default();
        let mut session = session();
        let spawn = MovementState::spawn(Vec3::ZERO, MovementMode::Grounded, 0);
        for id in 100..400 {
            session.add_actor(ActorId(id), spawn).unwrap();
            assert!(session.remove_actor(ActorId(id)).is_some());
        }

        let late = AuthorityState::new(1, spawn);
        assert!(session.receive(&datagram_for(ActorId(399), 0, 0, &late), &world, &mut NullSink).is_none());
        assert_eq!(session.stats().dropped_for_removed_actor, 1);
        // Long gone: an unknown actor again
        assert!(session.receive(&datagram_for(ActorId(100), 0, 0, &late), &world, &mut NullSink).is_none());
        assert_eq!(session.stats().dropped_for_removed_actor, 1);
        assert_eq!(session.remotes().collect::<Vec<_>>(), vec![ActorId(100)]);
    }

    #[test]
    fn test_drain_inbox_counts_reconciliations() {
        let world = PlaneWorld::default();
        let mut session = session();
        for tick in 1..=5 {
            session.predict(ACTOR, forward(tick), &world, &mut NullSink).unwrap();
        }
        // Input batch with sequence 0
        assert!(session.poll_send(ACTOR).unwrap().is_some());

        let predicted = session.buffer(ACTOR).and_then(|b| b.get(3)).map(|e| e.state).unwrap_or_default();
        let bytes = datagram_for(ACTOR, 0, 0b1, &AuthorityState::new(3, predicted));
        let (producer, inbox) = inbox(8);
        producer.push(bytes.clone()).unwrap();
        producer.push(bytes).unwrap();
        producer.push(vec![0xFF]).unwrap();

        assert_eq!(session.drain_inbox(&inbox, &world, &mut NullSink), 1);
        assert!(inbox.is_empty());
        let stats = session.stats();
        assert_eq!((stats.accepted, stats.duplicate_datagrams, stats.decode_errors), (1, 1, 1));
        assert_eq!((stats.datagrams_acked, stats.datagrams_lost), (1, 0));
    }

    #[test]
    fn test_garbage_is_counted() {
        let world = PlaneWorld::default();
        let mut session = session();
        assert!(session.receive(&[0xFF, 0x00], &world, &mut NullSink).is_none());
        assert_eq!(session.stats().decode_errors, 1);
    }

    #[test]
    fn test_unknown_actor_authority_goes_to_remote() {
        let world = PlaneWorld::default();
        let mut session = session();
        let other = ActorId(9);
        let header = PacketHeader {
            version: PROTOCOL_VERSION,
            kind: PacketKind::Authority as u8,
            actor: other,
            sequence: 0,
            ack: 0,
            ack_bits: 0,
        };
        let state = MovementState::spawn(Vec3::new(4.0, 0.0, 0.0), MovementMode::Grounded, 7);
        let mut writer = PacketWriter::new();
        assert!(writer.serialize_authority(&header, &AuthorityState::new(7, state)));

        assert!(session.receive(writer.as_slice(), &world, &mut NullSink).is_none());
        assert_eq!(session.remotes().collect::<Vec<_>>(), vec![other]);
        assert_eq!(session.remote_transform(other).map(|t| t.position.x), Some(4.0));
    }
}
