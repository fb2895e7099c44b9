//! # Determinism Verification
//!
//! The step is the contract between client and authority: replaying the
//! same inputs from the same state must land on the same bits.
//!
//! Run with: cargo test --package gait_core --test determinism

use gait_core::{Aabb, MovementTuning, PlaneWorld, Simulator};
use gait_shared::{ActionFlags, InputCommand, MovementMode, MovementState, Vec2, Vec3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const DT: f32 = 1.0 / 60.0;

fn arena() -> PlaneWorld {
    PlaneWorld::flat(0.0)
        .with_water(1.2)
        .with_obstacle(Aabb::new(Vec3::new(3.0, 0.0, -2.0), Vec3::new(4.0, 2.5, 2.0)))
        .with_obstacle(Aabb::new(Vec3::new(-6.0, 0.0, -6.0), Vec3::new(-2.0, 0.4, -2.0)))
}

fn random_inputs(seed: u64, count: u32) -> Vec<InputCommand> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (1..=count)
        .map(|tick| {
            let axes = Vec2::new(rng.gen_range(-1.0..=1.0), rng.gen_range(-1.0..=1.0));
            // Jump on roughly one tick in ten, sprint/crouch at random
            let mask = if rng.gen_bool(0.1) { 0x07 } else { 0x06 };
            let flags = ActionFlags::from_bits_truncate(rng.gen::<u8>() & mask);
            InputCommand::new(tick, axes, flags)
        })
        .collect()
}

fn run(sim: &Simulator, world: &PlaneWorld, inputs: &[InputCommand]) -> Vec<MovementState> {
    let mut state = MovementState::spawn(Vec3::ZERO, MovementMode::Grounded, 0);
    inputs
        .iter()
        .map(|input| {
            state = sim.step(&state, input, DT, world).state;
            state
        })
        .collect()
}

#[test]
fn verify_replay_is_bit_identical() {
    let sim = Simulator::default();
    let world = arena();

    for seed in [1_u64, 7, 42, 1337] {
        let inputs = random_inputs(seed, 600);
        let first = run(&sim, &world, &inputs);
        let second = run(&sim, &world, &inputs);

        for (a, b) in first.iter().zip(&second) {
            assert!(a.bitwise_eq(b), "seed {seed} diverged at tick {}", a.tick);
            assert!(a.is_finite());
        }
    }
}

#[test]
fn verify_replay_from_mid_history() {
    // Restarting from a stored state must reproduce the tail exactly.
    let sim = Simulator::default();
    let world = arena();
    let inputs = random_inputs(99, 300);
    let full = run(&sim, &world, &inputs);

    let mut state = full[149];
    for (input, expected) in inputs[150..].iter().zip(&full[150..]) {
        state = sim.step(&state, input, DT, &world).state;
        assert!(state.bitwise_eq(expected));
    }
}

#[test]
fn verify_separate_instances_agree() {
    let client = Simulator::new(MovementTuning::default());
    let authority = Simulator::new(MovementTuning::default());
    let world = arena();
    let inputs = random_inputs(5, 400);

    let a = run(&client, &world, &inputs);
    let b = run(&authority, &world, &inputs);
    assert!(a.last().unwrap().bitwise_eq(b.last().unwrap()));
}

#[test]
fn verify_tuning_changes_outcome() {
    let world = arena();
    let inputs = random_inputs(11, 120);
    let slow = Simulator::new(MovementTuning { max_speed: 2.0, ..MovementTuning::default() });
    let fast = Simulator::default();

    let a = run(&slow, &world, &inputs);
    let b = run(&fast, &world, &inputs);
    assert!(!a.last().unwrap().bitwise_eq(b.last().unwrap()));
}

#[test]
fn verify_repeated_jump_is_ignored_in_air() {
    let sim = Simulator::default();
    let world = PlaneWorld::flat(0.0);
    let mut state = MovementState::spawn(Vec3::ZERO, MovementMode::Grounded, 0);
    let mut peak = 0.0_f32;
    for tick in 1..=30 {
        // Holding jump must not add height once airborne
        state = sim
            .step(&state, &InputCommand::new(tick, Vec2::ZERO, ActionFlags::JUMP), DT, &world)
            .state;
        peak = peak.max(state.position.y);
    }
    let tuning = sim.tuning();
    let ballistic = tuning.jump_velocity * tuning.jump_velocity / (2.0 * tuning.gravity);
    assert!(peak <= ballistic + 0.05, "peak {peak} above {ballistic}");
}

#[test]
fn verify_oversized_dt_is_clamped() {
    let sim = Simulator::default();
    let world = PlaneWorld::flat(0.0);
    let state = MovementState::spawn(Vec3::ZERO, MovementMode::Grounded, 0);
    let input = InputCommand::new(1, Vec2::new(0.0, 1.0), ActionFlags::NONE);

    let clamped = sim.step(&state, &input, 5.0, &world).state;
    let max = sim.step(&state, &input, sim.tuning().max_delta_time, &world).state;
    assert!(clamped.bitwise_eq(&max));

    let negative = sim.step(&state, &input, -1.0, &world).state;
    assert_eq!(negative.position, Vec3::ZERO);
}

#[test]
fn verify_step_onto_ledge_and_back_down() {
    let sim = Simulator::default();
    // 0.4 high platform: walking off it keeps the actor grounded (step down)
    let world = PlaneWorld::flat(0.0).with_obstacle(Aabb::new(
        Vec3::new(-5.0, 0.0, -5.0),
        Vec3::new(0.0, 0.4, 5.0),
    ));
    let mut state = MovementState::spawn(Vec3::new(-2.0, 0.4, 0.0), MovementMode::Grounded, 0);
    let mut saw_falling = false;
    for tick in 1..=90 {
        let out = sim.step(&state, &InputCommand::new(tick, Vec2::new(1.0, 0.0), ActionFlags::NONE), DT, &world);
        state = out.state;
        saw_falling |= state.mode == MovementMode::Falling;
    }
    assert!(!saw_falling);
    assert_eq!(state.mode, MovementMode::Grounded);
    assert_eq!(state.position.y, 0.0);
    assert!(state.position.x > 1.0);
}
