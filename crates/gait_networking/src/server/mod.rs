//! # Authority
//!
//! The authoritative side of the synchronization protocol.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        AUTHORITY                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐       │
//! │  │ Input queues │  │ Step         │  │ Authority    │       │
//! │  │ (per actor)  │──│ (fixed tick) │──│ records      │       │
//! │  └──────────────┘  └──────────────┘  └──────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each tick, every actor consumes the inputs that arrived, in tick order,
//! with the same simulator the clients predict with. A hole with later
//! inputs behind it is filled by repeating the last input; nothing waits.
//! After an input gap longer than the client's history, the actor resumes
//! at the first input that arrives and the ticks in between are skipped.
//! The resulting state goes back to the owning client tagged with the last
//! applied input tick, which doubles as the input acknowledgment.

mod tick;

pub use tick::{TickClock, TickStats};

use std::collections::BTreeMap;

use gait_core::{Simulator, WorldQuery};
use gait_shared::{
    ActorId, AuthorityState, EventSink, GaitConfig, MovementEvent, MovementState, TickId,
};

use crate::protocol::{decode, AckTracker, DeliveryTracker, PacketKind, PacketWriter, Payload};
use crate::sync::{AuthorityInputQueue, InputRejection, Queued, RemovedActors, SendCadence, SharedStats, SyncStats};
use crate::transport::Reliability;

/// A datagram the authority wants delivered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outgoing {
    /// Actor whose owner should receive it.
    pub actor: ActorId,
    /// Encoded datagram.
    pub bytes: Vec<u8>,
    /// Delivery hint.
    pub reliability: Reliability,
}

#[derive(Debug)]
struct AuthoritativeActor {
    state: MovementState,
    queue: AuthorityInputQueue,
    ack: AckTracker,
    delivery: DeliveryTracker,
    cadence: SendCadence,
    /// State changed, or the client is still resending acknowledged input.
    dirty: bool,
}

/// Authoritative simulation of every actor.
pub struct Authority {
    config: GaitConfig,
    simulator: Simulator,
    actors: BTreeMap<ActorId, AuthoritativeActor>,
    removed: RemovedActors,
    writer: PacketWriter,
    stats: SharedStats,
}

impl Authority {
    /// Creates an authority with no actors.
    #[must_use]
    pub fn new(config: GaitConfig, simulator: Simulator) -> Self {
        Self {
            config,
            simulator,
            actors: BTreeMap::new(),
            removed: RemovedActors::default(),
            writer: PacketWriter::new(),
            stats: SharedStats::new(),
        }
    }

    /// Spawns `id`. Its first input is expected for `spawn.tick + 1`.
    ///
    /// Returns `false` if the actor already exists.
    pub fn add_actor(&mut self, id: ActorId, spawn: MovementState) -> bool {
        if self.actors.contains_key(&id) {
            return false;
        }
        self.removed.remove(id);
        let max_ahead = u32::try_from(self.config.buffer_capacity).unwrap_or(u32::MAX);
        self.actors.insert(
            id,
            AuthoritativeActor {
                state: spawn,
                queue: AuthorityInputQueue::starting_after(spawn.tick, max_ahead),
                ack: AckTracker::new(),
                delivery: DeliveryTracker::new(),
                cadence: SendCadence::new(self.config.send_interval_ticks),
                dirty: false,
            },
        );
        tracing::info!("Authority spawned actor {} at tick {}", id, spawn.tick);
        true
    }

    /// Despawns `id` and returns the leave datagram for its owner.
    pub fn remove_actor(&mut self, id: ActorId) -> Option<Outgoing> {
        let mut actor = self.actors.remove(&id)?;
        self.removed.insert(id);
        tracing::info!("Authority removed actor {}", id);

        let header = actor.ack.next_header(PacketKind::Leave, id);
        self.writer.serialize_leave(&header).then(|| Outgoing {
            actor: id,
            bytes: self.writer.as_slice().to_vec(),
            reliability: Reliability::Reliable,
        })
    }

    /// Handles one datagram from a client. Returns the number of inputs
    /// queued from it.
    pub fn receive(&mut self, bytes: &[u8]) -> usize {
        let datagram = match decode(bytes) {
            Ok(datagram) => datagram,
            Err(err) => {
                tracing::warn!("Dropping malformed datagram: {}", err);
                self.stats.update(|s| s.decode_errors += 1);
                return 0;
            }
        };
        self.stats.update(|s| s.datagrams_received += 1);

        let id = datagram.header.actor;
        if self.removed.contains(id) {
            self.stats.update(|s| s.dropped_for_removed_actor += 1);
            return 0;
        }
        let Some(actor) = self.actors.get_mut(&id) else {
            tracing::debug!("Datagram for unknown actor {}", id);
            return 0;
        };
        if !actor.ack.record(datagram.header.sequence) {
            self.stats.update(|s| s.duplicate_datagrams += 1);
            return 0;
        }
        let delivery = actor.delivery.on_header(&datagram.header);
        self.stats.update(|s| {
            s.datagrams_acked += u64::from(delivery.acked);
            s.datagrams_lost += u64::from(delivery.lost);
        });

        match datagram.payload {
            Payload::Inputs(inputs) => {
                let mut queued = 0;
                for input in inputs {
                    match actor.queue.insert(input) {
                        Ok(Queued::InOrder) => queued += 1,
                        Ok(Queued::Resynced { skipped }) => {
                            tracing::warn!(
                                "Actor {} input resumed at tick {}, skipped {} ticks",
                                id,
                                input.tick,
                                skipped
                            );
                            actor.dirty = true;
                            self.stats.update(|s| {
                                s.timeline_resyncs += 1;
                                s.ticks_skipped += u64::from(skipped);
                            });
                            queued += 1;
                        }
                        Err(InputRejection::Stale | InputRejection::Duplicate) => {
                            // The client has not seen our acknowledgment yet
                            actor.dirty = true;
                            self.stats.update(|s| s.stale_records += 1);
                        }
                    }
                }
                queued
            }
            Payload::Leave => {
                let _ = self.remove_actor(id);
                0
            }
            Payload::Authority(_) => {
                tracing::debug!("Ignoring authority record for actor {} from a client", id);
                0
            }
        }
    }

    /// Runs one authority tick: applies every input that can be applied and
    /// returns the authority datagrams that are due.
    pub fn tick<W, S>(&mut self, world: &W, sink: &mut S) -> Vec<Outgoing>
    where
        W: WorldQuery + ?Sized,
        S: EventSink + ?Sized,
    {
        let dt = self.config.tick_seconds();
        let mut outgoing = Vec::new();
        let mut forgotten = 0u64;

        for (&id, actor) in &mut self.actors {
            let (mut applied, mut repeated) = (0u64, 0u64);
            while let Some((input, was_repeated)) = actor.queue.next() {
                let output = self.simulator.step(&actor.state, &input, dt, world);
                actor.state = output.state;
                if let Some(transition) = output.transition {
                    sink.emit(MovementEvent::ModeChanged { actor: id, transition });
                }
                if was_repeated {
                    repeated += 1;
                } else {
                    applied += 1;
                }
                actor.dirty = true;
            }
            if applied + repeated > 0 {
                self.stats.update(|s| {
                    s.inputs_applied += applied;
                    s.inputs_repeated += repeated;
                });
            }
            if repeated > 0 {
                tracing::debug!("Actor {} missing {} inputs, repeated the last one", id, repeated);
            }

            if !actor.cadence.tick() || !actor.dirty {
                continue;
            }
            let Some(tick) = actor.queue.last_applied() else {
                continue;
            };
            let header = actor.ack.next_header(PacketKind::Authority, id);
            if self.writer.serialize_authority(&header, &AuthorityState::new(tick, actor.state)) {
                forgotten += u64::from(actor.delivery.sent(header.sequence));
                outgoing.push(Outgoing {
                    actor: id,
                    bytes: self.writer.as_slice().to_vec(),
                    reliability: Reliability::Unreliable,
                });
                actor.dirty = false;
            }
        }

        if !outgoing.is_empty() {
            let sent = outgoing.len() as u64;
            self.stats.update(|s| {
                s.datagrams_sent += sent;
                s.datagrams_lost += forgotten;
            });
        }
        outgoing
    }

    /// Authoritative state of `id`.
    #[must_use]
    pub fn state(&self, id: ActorId) -> Option<MovementState> {
        self.actors.get(&id).map(|actor| actor.state)
    }

    /// Last input tick applied for `id`.
    #[must_use]
    pub fn last_applied(&self, id: ActorId) -> Option<TickId> {
        self.actors.get(&id)?.queue.last_applied()
    }

    /// Actors in id order.
    pub fn actors(&self) -> impl Iterator<Item = ActorId> + '_ {
        self.actors.keys().copied()
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
}
