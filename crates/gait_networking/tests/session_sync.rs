//! # Client / Authority Synchronization
//!
//! End-to-end runs of a predicting client against the authority, over an
//! instant loopback and over a seeded lossy link.
//!
//! Run with: cargo test --package gait_networking --test session_sync

use gait_core::{PlaneWorld, Simulator};
use gait_networking::protocol::PacketKind;
use gait_networking::{
    AckTracker, Authority, ClientSession, LinkConditions, LoopbackTransport, LossyEndpoint, LossyLink, PacketWriter,
    Reliability, Transport,
};
use gait_shared::{
    ActionFlags, ActorId, AuthorityState, DesyncReason, GaitConfig, InputCommand, MovementEvent, MovementMode,
    MovementState, NetworkPreset, NullSink, ReconcileOutcome, TickId, Vec2, Vec3,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const ACTOR: ActorId = ActorId(1);

fn spawn() -> MovementState {
    MovementState::spawn(Vec3::ZERO, MovementMode::Grounded, 0)
}

fn random_input(rng: &mut ChaCha8Rng, tick: TickId) -> InputCommand {
    // Occasionally out of range so sanitizing is exercised too
    let scale = if rng.gen_bool(0.05) { 3.0 } else { 1.0 };
    let axes = Vec2::new(rng.gen_range(-1.0..=1.0) * scale, rng.gen_range(-1.0..=1.0) * scale);
    let flags = ActionFlags::from_bits_truncate(rng.gen::<u8>() & if rng.gen_bool(0.05) { 0x07 } else { 0x06 });
    InputCommand::new(tick, axes, flags)
}

fn session(config: &GaitConfig) -> ClientSession {
    let mut client = ClientSession::new(config.clone(), Simulator::default());
    client.add_actor(ACTOR, spawn()).unwrap();
    client
}

fn authority(config: &GaitConfig) -> Authority {
    let mut authority = Authority::new(config.clone(), Simulator::default());
    assert!(authority.add_actor(ACTOR, spawn()));
    authority
}

fn authority_datagram(ack: &mut AckTracker, state: AuthorityState) -> Vec<u8> {
    let mut writer = PacketWriter::new();
    let header = ack.next_header(PacketKind::Authority, ACTOR);
    assert!(writer.serialize_authority(&header, &state));
    writer.as_slice().to_vec()
}

/// Client and authority joined by a [`LossyLink`], advanced in simulated time.
struct LossyHarness {
    config: GaitConfig,
    world: PlaneWorld,
    client: ClientSession,
    authority: Authority,
    link: LossyLink,
    client_end: LossyEndpoint,
    authority_end: LossyEndpoint,
    events: Vec<MovementEvent>,
    elapsed_ms: f64,
}

impl LossyHarness {
    fn new(config: GaitConfig, conditions: LinkConditions, seed: u64) -> Self {
        let (link, client_end, authority_end) = LossyLink::pair(conditions, seed);
        Self {
            client: session(&config),
            authority: authority(&config),
            config,
            world: PlaneWorld::flat(0.0),
            link,
            client_end,
            authority_end,
            events: Vec::new(),
            elapsed_ms: 0.0,
        }
    }

    /// One tick on both sides. `None` keeps the client idle (no prediction)
    /// while it still resends what is unacknowledged.
    fn tick(&mut self, input: Option<InputCommand>) {
        while let Some(bytes) = self.client_end.receive() {
            let _ = self.client.receive(&bytes, &self.world, &mut self.events);
        }
        if let Some(input) = input {
            self.client.predict(ACTOR, input, &self.world, &mut self.events).unwrap();
        }
        if let Some(bytes) = self.client.poll_send(ACTOR).unwrap() {
            self.client_end.send(&bytes, Reliability::Unreliable).unwrap();
        }

        while let Some(bytes) = self.authority_end.receive() {
            let _ = self.authority.receive(&bytes);
        }
        for out in self.authority.tick(&self.world, &mut NullSink) {
            self.authority_end.send(&out.bytes, out.reliability).unwrap();
        }

        self.elapsed_ms += f64::from(self.config.tick_millis());
        let target = self.elapsed_ms as u64;
        self.link.advance(target - self.link.now_ms());
    }
}

#[test]
fn verify_lossy_link_converges() {
    let config = GaitConfig::from_preset(NetworkPreset::Regular);
    let harsh = LinkConditions { base_latency_ms: 60, jitter_ms: 20, loss_percent: 10, duplicate_percent: 5 };
    let mut harness = LossyHarness::new(config.clone(), harsh, 7);
    let mut rng = ChaCha8Rng::seed_from_u64(99);

    for tick in 1..=600 {
        let input = random_input(&mut rng, tick);
        harness.tick(Some(input));
    }
    // Let every input and acknowledgment settle
    for _ in 0..180 {
        harness.tick(None);
    }

    let client = &harness.client;
    let authority = &harness.authority;
    assert_eq!(authority.last_applied(ACTOR), Some(600));
    assert_eq!(client.last_authority_tick(ACTOR), Some(600));
    assert!(client.buffer(ACTOR).unwrap().is_empty());

    let predicted = client.state(ACTOR).unwrap();
    let authoritative = authority.state(ACTOR).unwrap();
    assert_eq!(predicted.tick, 600);
    assert_eq!(authoritative.tick, 600);
    assert!(
        predicted.position.distance_squared(authoritative.position) <= config.position_tolerance_sq,
        "{predicted:?} vs {authoritative:?}"
    );

    let stats = client.stats();
    assert_eq!(stats.desynced, 0);
    assert_eq!(stats.buffer_overflows, 0);
    assert!(stats.accepted > 0);

    let link = harness.link.stats();
    assert!(link.dropped > 0);
    assert!(link.duplicated > 0);
}

#[test]
fn verify_recovers_after_outage_longer_than_history() {
    let config = GaitConfig::from_preset(NetworkPreset::Lan);
    assert_eq!(config.buffer_capacity, 64);
    let mut harness = LossyHarness::new(config.clone(), LinkConditions::LAN, 3);
    let mut rng = ChaCha8Rng::seed_from_u64(21);

    for tick in 1..=10 {
        harness.tick(Some(random_input(&mut rng, tick)));
    }
    // Both directions go dark for longer than the client keeps history
    harness.link.set_conditions(LinkConditions { loss_percent: 100, ..LinkConditions::LAN });
    for tick in 11..=110 {
        harness.tick(Some(random_input(&mut rng, tick)));
    }
    let stalled = harness.client.last_authority_tick(ACTOR);
    assert!(stalled.is_some_and(|tick| tick <= 10), "{stalled:?}");
    assert_eq!(harness.authority.last_applied(ACTOR), Some(10));

    let overflowed = harness
        .events
        .iter()
        .any(|event| matches!(event, MovementEvent::Desynced { reason: DesyncReason::BufferOverflow, .. }));
    assert!(overflowed);

    harness.link.set_conditions(LinkConditions::LAN);
    for tick in 111..=710 {
        harness.tick(Some(random_input(&mut rng, tick)));
    }
    for _ in 0..60 {
        harness.tick(None);
    }

    let client = &harness.client;
    let authority = &harness.authority;
    assert_eq!(authority.last_applied(ACTOR), Some(710));
    assert_eq!(client.last_authority_tick(ACTOR), Some(710));
    assert!(client.buffer(ACTOR).unwrap().is_empty());

    let predicted = client.state(ACTOR).unwrap();
    let authoritative = authority.state(ACTOR).unwrap();
    assert!(
        predicted.position.distance_squared(authoritative.position) <= config.position_tolerance_sq,
        "{predicted:?} vs {authoritative:?}"
    );
    assert!(predicted.velocity.distance_squared(authoritative.velocity) <= config.velocity_tolerance_sq);

    let resumed = authority.stats();
    assert_eq!(resumed.timeline_resyncs, 1);
    assert!(resumed.ticks_skipped > 0);

    let stats = client.stats();
    assert_eq!(stats.buffer_overflows, 1);
    assert!(stats.corrected >= 1);
    assert!(stats.accepted > 500);
    assert!(stats.datagrams_lost > 0);
}

#[test]
fn verify_quantized_prediction_matches_authority() {
    let config = GaitConfig::from_preset(NetworkPreset::Competitive);
    assert!(config.input_quantization);

    let world = PlaneWorld::flat(0.0);
    let mut client = session(&config);
    let mut authority = authority(&config);
    let (mut client_end, mut authority_end) = LoopbackTransport::pair();
    let mut events = Vec::new();
    let mut rng = ChaCha8Rng::seed_from_u64(5);

    for tick in 1..=300 {
        client.predict(ACTOR, random_input(&mut rng, tick), &world, &mut events).unwrap();
        if let Some(bytes) = client.poll_send(ACTOR).unwrap() {
            client_end.send(&bytes, Reliability::Unreliable).unwrap();
        }
        while let Some(bytes) = authority_end.receive() {
            let _ = authority.receive(&bytes);
        }
        for out in authority.tick(&world, &mut NullSink) {
            authority_end.send(&out.bytes, out.reliability).unwrap();
        }
        while let Some(bytes) = client_end.receive() {
            let _ = client.receive(&bytes, &world, &mut events);
        }
    }

    let stats = client.stats();
    assert_eq!(stats.accepted, 300);
    assert_eq!(stats.corrected, 0);
    assert_eq!(stats.desynced, 0);
    for event in &events {
        if let MovementEvent::Reconciled { result, .. } = event {
            assert_eq!(result.position_error, 0.0);
            assert_eq!(result.velocity_error, 0.0);
        }
    }
    assert!(client.state(ACTOR).unwrap().bitwise_eq(&authority.state(ACTOR).unwrap()));
}

#[test]
fn verify_overflow_raises_desync_once() {
    let config = GaitConfig::from_preset(NetworkPreset::Lan);
    assert_eq!(config.buffer_capacity, 64);

    let world = PlaneWorld::flat(0.0);
    let mut client = session(&config);
    let mut events = Vec::new();
    for tick in 1..=100 {
        client.predict(ACTOR, InputCommand::new(tick, Vec2::new(0.0, 1.0), ActionFlags::NONE), &world, &mut events).unwrap();
    }

    let desyncs: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            MovementEvent::Desynced { tick, reason, .. } => Some((*tick, *reason)),
            _ => None,
        })
        .collect();
    assert_eq!(desyncs, vec![(1, DesyncReason::BufferOverflow)]);

    let buffer = client.buffer(ACTOR).unwrap();
    assert_eq!(buffer.len(), 64);
    assert_eq!(buffer.oldest().unwrap().tick, 37);
    assert_eq!(buffer.latest().unwrap().tick, 100);
    assert_eq!(client.stats().buffer_overflows, 1);
}

#[test]
fn verify_repeated_authority_state_reconciles_once() {
    let config = GaitConfig::default();
    let world = PlaneWorld::flat(0.0);
    let mut client = session(&config);
    let mut events = Vec::new();
    for tick in 1..=10 {
        client.predict(ACTOR, InputCommand::new(tick, Vec2::new(1.0, 0.0), ActionFlags::NONE), &world, &mut events).unwrap();
    }
    events.clear();

    let mut state = client.buffer(ACTOR).unwrap().get(4).unwrap().state;
    state.position.x += 1.0;
    let authority_state = AuthorityState::new(4, state);

    let mut ack = AckTracker::new();
    let first = authority_datagram(&mut ack, authority_state);
    let resent = authority_datagram(&mut ack, authority_state);

    let result = client.receive(&first, &world, &mut events).unwrap();
    assert_eq!(result.outcome, ReconcileOutcome::Corrected);
    let after_first = client.state(ACTOR).unwrap();

    // Same datagram again, then the same record under a new sequence
    assert!(client.receive(&first, &world, &mut events).is_none());
    assert!(client.receive(&resent, &world, &mut events).is_none());

    let reconciled = events.iter().filter(|e| matches!(e, MovementEvent::Reconciled { .. })).count();
    assert_eq!(reconciled, 1);
    assert!(client.state(ACTOR).unwrap().bitwise_eq(&after_first));

    let stats = client.stats();
    assert_eq!(stats.corrected, 1);
    assert_eq!(stats.duplicate_datagrams, 1);
    assert_eq!(stats.stale_records, 1);
}

#[test]
fn verify_correction_replays_and_blends() {
    let config = GaitConfig::default();
    let world = PlaneWorld::flat(0.0);
    let simulator = Simulator::default();
    let mut client = session(&config);
    let mut sink = Vec::new();
    for tick in 1..=10 {
        client.predict(ACTOR, InputCommand::new(tick, Vec2::new(1.0, 0.5), ActionFlags::SPRINT), &world, &mut sink).unwrap();
    }
    let before = client.rendered_transform(ACTOR, config.tick_millis()).unwrap();

    let buffer = client.buffer(ACTOR).unwrap();
    let replay: Vec<InputCommand> = buffer.iter().filter(|entry| entry.tick > 5).map(|entry| entry.input).collect();
    let mut corrected = buffer.get(5).unwrap().state;
    corrected.position.x += 2.0;

    let result = client
        .apply_authority(ACTOR, &AuthorityState::new(5, corrected), &world, &mut sink)
        .unwrap()
        .unwrap();
    assert_eq!(result.outcome, ReconcileOutcome::Corrected);
    assert_eq!(result.corrected_from, 5);
    assert!((result.position_error - 2.0).abs() < 1e-4);

    // Every later tick is recomputed from the authoritative state
    let mut expected = corrected;
    for input in &replay {
        expected = simulator.step(&expected, input, config.tick_seconds(), &world).state;
    }
    let state = client.state(ACTOR).unwrap();
    assert!(state.bitwise_eq(&expected));
    assert_eq!(client.buffer(ACTOR).unwrap().oldest().unwrap().tick, 6);

    // The blend starts where the actor was drawn and ends on the simulation
    let first_frame = client.rendered_transform(ACTOR, 0.0).unwrap();
    assert!(first_frame.position.distance(before.position) < 1e-5);
    let settled = client.rendered_transform(ACTOR, config.smoothing_window_ms + 1.0).unwrap();
    assert_eq!(settled.position, state.position);
}

#[test]
fn verify_observer_interpolates_and_sees_leave() {
    let config = GaitConfig::default();
    let world = PlaneWorld::flat(0.0);
    let mut owner = session(&config);
    let mut authority = authority(&config);
    let mut observer = ClientSession::new(config.clone(), Simulator::default());
    let mut sink = Vec::new();

    for tick in 1..=120 {
        owner.predict(ACTOR, InputCommand::new(tick, Vec2::new(0.0, 1.0), ActionFlags::NONE), &world, &mut sink).unwrap();
        if let Some(bytes) = owner.poll_send(ACTOR).unwrap() {
            let _ = authority.receive(&bytes);
        }
        for out in authority.tick(&world, &mut NullSink) {
            let _ = owner.receive(&out.bytes, &world, &mut sink);
            let _ = observer.receive(&out.bytes, &world, &mut sink);
        }
        observer.advance_remotes(config.tick_millis());
    }

    assert_eq!(observer.remotes().collect::<Vec<_>>(), vec![ACTOR]);
    let drawn = observer.remote_transform(ACTOR).unwrap();
    let actual = authority.state(ACTOR).unwrap().position;
    // Rendered in the past, moving forward along +Z
    assert!(drawn.position.z > 0.0);
    assert!(drawn.position.z < actual.z);

    let farewell = authority.remove_actor(ACTOR).unwrap();
    assert_eq!(farewell.reliability, Reliability::Reliable);
    let _ = observer.receive(&farewell.bytes, &world, &mut sink);
    assert_eq!(observer.remotes().count(), 0);
    assert!(observer.remote_transform(ACTOR).is_none());
}

#[test]
fn verify_owner_leave_despawns() {
    let config = GaitConfig::default();
    let world = PlaneWorld::flat(0.0);
    let mut owner = session(&config);
    let mut authority = authority(&config);
    let mut sink = Vec::new();

    let mut last_batch = Vec::new();
    for tick in 1..=3 {
        owner.predict(ACTOR, InputCommand::new(tick, Vec2::ZERO, ActionFlags::NONE), &world, &mut sink).unwrap();
        last_batch = owner.poll_send(ACTOR).unwrap().unwrap();
        let _ = authority.receive(&last_batch);
    }

    let leave = owner.remove_actor(ACTOR).unwrap();
    assert!(owner.poll_send(ACTOR).is_err());
    let _ = authority.receive(&leave);
    assert!(authority.state(ACTOR).is_none());

    // Late traffic for the departed actor is dropped
    assert_eq!(authority.receive(&last_batch), 0);
    assert_eq!(authority.stats().dropped_for_removed_actor, 1);
}
