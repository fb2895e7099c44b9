//! # Locomotion Step
//!
//! One call advances one actor by one tick:
//!
//! ```text
//! sanitize ─► resolve mode (pre-move, jump) ─► integrate velocity
//!          ─► swept move (≤ 3 slides) ─► resolve mode (post-move) ─► snap / turn
//! ```
//!
//! ## Determinism
//!
//! Only `+ - * /`, `sqrt`, `min`/`max` and comparisons on `f32`, always in
//! the same order. No trigonometry, no clocks, no randomness. The same
//! state, input, dt and world produce bit-identical output on every call.

use gait_shared::{InputCommand, ModeTransition, MovementMode, MovementState, Quaternion, Vec3};
use gait_shared::math::NEARLY_ZERO_SQ;

use crate::modes::{self, ModeContext, TransitionRule};
use crate::tuning::{MovementTuning, PlanarProfile};
use crate::world::WorldQuery;

/// Slide iterations per move.
pub const MAX_SLIDE_ITERATIONS: usize = 3;

/// Moves shorter than this are skipped.
const MIN_MOVE_SQ: f32 = 1.0e-10;

/// Below this planar speed the facing is left alone.
const TURN_MIN_SPEED_SQ: f32 = 1.0e-4;

/// Result of one step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepOutput {
    /// State at the end of the tick.
    pub state: MovementState,
    /// Mode change during the tick, for animation/audio collaborators.
    pub transition: Option<ModeTransition>,
}

/// The deterministic locomotion step.
#[derive(Clone, Debug, Default)]
pub struct Simulator {
    tuning: MovementTuning,
}

impl Simulator {
    /// Creates a simulator with the given tuning.
    #[must_use]
    pub const fn new(tuning: MovementTuning) -> Self {
        Self { tuning }
    }

    /// Tuning in use.
    #[inline]
    #[must_use]
    pub const fn tuning(&self) -> &MovementTuning {
        &self.tuning
    }

    /// Advances `state` by one tick of `input`.
    ///
    /// Never fails: non-finite input axes, state components and `dt` are
    /// sanitized, and `dt` is clamped to `[0, max_delta_time]`.
    #[must_use]
    pub fn step<W: WorldQuery + ?Sized>(
        &self,
        state: &MovementState,
        input: &InputCommand,
        dt: f32,
        world: &W,
    ) -> StepOutput {
        let tuning = &self.tuning;
        let input = input.sanitized();
        let dt = self.clamp_dt(dt);
        let start = sanitize_state(state);

        let mut next = start;
        next.tick = input.tick;

        // Pre-move: honours the jump request.
        let immersion = sanitize_immersion(world.immersion(&next));
        let ground = world.ground_trace(&next, modes::reach(next.mode, tuning));
        let pre = modes::resolve(
            &ModeContext {
                mode: next.mode,
                immersion,
                jump_requested: input.jump(),
                vertical_speed: next.velocity.y,
                ground,
            },
            tuning,
        );
        next.mode = pre.target();
        if pre == TransitionRule::Jump {
            next.velocity.y = tuning.jump_velocity;
        }

        next.velocity = self.integrate_velocity(next.velocity, &input, next.mode, immersion, dt);
        slide_move(&mut next, dt, world);

        // Post-move: landing and leaving the ground.
        let immersion = sanitize_immersion(world.immersion(&next));
        let ground = world.ground_trace(&next, modes::reach(next.mode, tuning));
        let post = modes::resolve(
            &ModeContext {
                mode: next.mode,
                immersion,
                jump_requested: false,
                vertical_speed: next.velocity.y,
                ground,
            },
            tuning,
        );
        next.mode = post.target();
        if post == TransitionRule::Supported {
            if let Some(hit) = ground {
                next.position.y = hit.point.y;
            }
            next.velocity.y = 0.0;
        }

        self.turn_towards_travel(&mut next, dt);

        let transition = (next.mode != start.mode).then(|| ModeTransition {
            from: start.mode,
            to: next.mode,
            tick: next.tick,
        });
        if let Some(change) = transition {
            tracing::trace!(tick = change.tick, from = %change.from, to = %change.to, "mode transition");
        }

        StepOutput { state: next, transition }
    }

    fn clamp_dt(&self, dt: f32) -> f32 {
        if dt.is_finite() && dt > 0.0 {
            dt.min(self.tuning.max_delta_time)
        } else {
            0.0
        }
    }

    fn max_speed(&self, input: &InputCommand) -> f32 {
        let mut speed = self.tuning.max_speed;
        if input.sprint() {
            speed *= self.tuning.sprint_multiplier;
        }
        if input.crouch() {
            speed *= self.tuning.crouch_multiplier;
        }
        speed
    }

    fn integrate_velocity(
        &self,
        velocity: Vec3,
        input: &InputCommand,
        mode: MovementMode,
        immersion: f32,
        dt: f32,
    ) -> Vec3 {
        let tuning = &self.tuning;
        let wish = Vec3::new(input.axes.x, 0.0, input.axes.y);
        let max_speed = self.max_speed(input);

        match mode {
            MovementMode::Grounded => {
                let mut planar = self.integrate_planar(velocity.horizontal(), wish, max_speed, tuning.grounded(), dt);
                if immersion > tuning.partial_immersion_threshold {
                    let wading = ((immersion - tuning.partial_immersion_threshold)
                        * tuning.partial_immersion_slowdown
                        * dt)
                        .min(1.0);
                    planar = planar * (1.0 - wading);
                }
                planar
            }
            MovementMode::Falling => {
                let planar = self.integrate_planar(velocity.horizontal(), wish, max_speed, tuning.airborne(), dt);
                let vertical = (velocity.y - tuning.gravity * dt).max(-tuning.terminal_velocity);
                planar.with_y(vertical)
            }
            MovementMode::Swimming => {
                let planar = self.integrate_planar(velocity.horizontal(), wish, max_speed, tuning.buoyant(), dt);
                let lift = tuning.gravity * (immersion * (1.0 + tuning.buoyancy) - 1.0);
                let moving = planar.with_y(velocity.y + lift * dt);
                let drag = (tuning.fluid_friction * immersion * dt).min(1.0);
                let damped = moving * (1.0 - drag);
                damped.with_y(damped.y.max(-tuning.terminal_velocity))
            }
        }
    }

    /// Horizontal acceleration, braking and speed limiting.
    ///
    /// Braking only acts on the velocity component lateral to the input
    /// direction; with no input it acts on the whole velocity.
    fn integrate_planar(
        &self,
        velocity: Vec3,
        wish: Vec3,
        max_speed: f32,
        profile: PlanarProfile,
        dt: f32,
    ) -> Vec3 {
        let speed_sq = velocity.length_squared();
        let over_max = speed_sq > max_speed * max_speed;
        let wish_len_sq = wish.length_squared();

        if wish_len_sq <= NEARLY_ZERO_SQ {
            let decel = if over_max { profile.over_max.max(profile.braking) } else { profile.braking };
            return self.brake(velocity, decel * dt);
        }

        let wish_len = wish_len_sq.sqrt();
        let dir = wish * (1.0 / wish_len);
        let along = velocity.dot(dir);
        let lateral = self.brake(velocity - dir * along, profile.braking * dt);
        let mut out = lateral + dir * (along + profile.acceleration * wish_len * dt);

        let limit = max_speed * wish_len;
        let out_sq = out.length_squared();
        if over_max {
            let speed = out_sq.sqrt();
            let target = (speed - profile.over_max * dt).max(limit);
            if speed > target {
                out = out * (target / speed);
            }
        } else if out_sq > limit * limit {
            // Easing off an analog stick slows down at the braking rate.
            let speed = out_sq.sqrt();
            let previous = speed_sq.sqrt();
            let target = if previous > limit {
                (previous - profile.braking * dt).max(limit)
            } else {
                limit
            };
            out = out * (target.min(speed) / speed);
        }
        out
    }

    fn brake(&self, velocity: Vec3, amount: f32) -> Vec3 {
        let speed_sq = velocity.length_squared();
        if speed_sq <= NEARLY_ZERO_SQ {
            return Vec3::ZERO;
        }
        let speed = speed_sq.sqrt();
        let reduced = speed - amount;
        if reduced <= self.tuning.brake_to_stop_speed {
            Vec3::ZERO
        } else {
            velocity * (reduced / speed)
        }
    }

    fn turn_towards_travel(&self, state: &mut MovementState, dt: f32) {
        let planar = state.velocity.horizontal();
        if dt <= 0.0 || planar.length_squared() <= TURN_MIN_SPEED_SQ {
            return;
        }
        let target = Quaternion::from_yaw_direction(planar);
        let alpha = (self.tuning.rotation_sharpness * dt).min(1.0);
        state.orientation = state.orientation.nlerp(target, alpha);
    }
}

/// Swept move with up to [`MAX_SLIDE_ITERATIONS`] slides along hit normals.
fn slide_move<W: WorldQuery + ?Sized>(state: &mut MovementState, dt: f32, world: &W) {
    let mut remaining = state.velocity * dt;
    for _ in 0..MAX_SLIDE_ITERATIONS {
        if remaining.length_squared() <= MIN_MOVE_SQ {
            return;
        }
        match world.sweep(state, remaining) {
            None => {
                state.position += remaining;
                return;
            }
            Some(hit) => {
                let time = hit.time.clamp(0.0, 1.0);
                state.position += remaining * time;
                remaining = (remaining * (1.0 - time)).slide_along(hit.normal);
                state.velocity = state.velocity.slide_along(hit.normal);
            }
        }
    }
}

fn sanitize_state(state: &MovementState) -> MovementState {
    let mut clean = *state;
    if !clean.position.is_finite() {
        clean.position = Vec3::ZERO;
    }
    if !clean.velocity.is_finite() {
        clean.velocity = Vec3::ZERO;
    }
    if !clean.orientation.is_finite() {
        clean.orientation = Quaternion::IDENTITY;
    }
    clean
}

fn sanitize_immersion(immersion: f32) -> f32 {
    if immersion.is_finite() {
        immersion.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{Aabb, PlaneWorld};
    use gait_shared::{ActionFlags, Vec2};

    const DT: f32 = 1.0 / 60.0;

    fn input(tick: u32, x: f32, y: f32, flags: ActionFlags) -> InputCommand {
        InputCommand::new(tick, Vec2::new(x, y), flags)
    }

    fn grounded_at(x: f32) -> MovementState {
        MovementState::spawn(Vec3::new(x, 0.0, 0.0), MovementMode::Grounded, 0)
    }

    #[test]
    fn test_step_is_bit_identical() {
        let sim = Simulator::default();
        let world = PlaneWorld::flat(0.0);
        let state = grounded_at(0.0);
        let cmd = input(1, 0.7, 0.7, ActionFlags::SPRINT);

        let a = sim.step(&state, &cmd, DT, &world);
        let b = sim.step(&state, &cmd, DT, &world);
        assert!(a.state.bitwise_eq(&b.state));
    }

    #[test]
    fn test_forward_input_accelerates_and_caps() {
        let sim = Simulator::default();
        let world = PlaneWorld::flat(0.0);
        let mut state = grounded_at(0.0);
        for tick in 1..=120 {
            state = sim.step(&state, &input(tick, 0.0, 1.0, ActionFlags::NONE), DT, &world).state;
        }
        assert_eq!(state.mode, MovementMode::Grounded);
        assert!(state.position.z > 5.0);
        assert!(state.velocity.length() <= sim.tuning().max_speed + 1e-4);
        assert_eq!(state.position.y, 0.0);
        assert_eq!(state.tick, 120);
    }

    #[test]
    fn test_braking_stops_actor() {
        let sim = Simulator::default();
        let world = PlaneWorld::flat(0.0);
        let mut state = grounded_at(0.0);
        state.velocity = Vec3::new(6.0, 0.0, 0.0);
        for tick in 1..=30 {
            state = sim.step(&state, &input(tick, 0.0, 0.0, ActionFlags::NONE), DT, &world).state;
        }
        assert_eq!(state.velocity, Vec3::ZERO);
    }

    #[test]
    fn test_jump_and_land() {
        let sim = Simulator::default();
        let world = PlaneWorld::flat(0.0);
        let state = grounded_at(0.0);

        let out = sim.step(&state, &input(1, 0.0, 0.0, ActionFlags::JUMP), DT, &world);
        assert_eq!(out.state.mode, MovementMode::Falling);
        assert!(out.state.position.y > 0.0);
        assert_eq!(
            out.transition,
            Some(ModeTransition { from: MovementMode::Grounded, to: MovementMode::Falling, tick: 1 })
        );

        let mut state = out.state;
        let mut landed_at = None;
        for tick in 2..=120 {
            let out = sim.step(&state, &input(tick, 0.0, 0.0, ActionFlags::NONE), DT, &world);
            state = out.state;
            if let Some(change) = out.transition {
                assert_eq!(change.to, MovementMode::Grounded);
                landed_at = Some(change.tick);
                break;
            }
        }
        assert!(landed_at.is_some());
        assert_eq!(state.position.y, 0.0);
        assert_eq!(state.velocity.y, 0.0);
    }

    #[test]
    fn test_walks_off_ledge_and_falls() {
        let sim = Simulator::default();
        let world = PlaneWorld::flat(-5.0).with_obstacle(Aabb::new(
            Vec3::new(-10.0, -5.0, -10.0),
            Vec3::new(1.0, 0.0, 10.0),
        ));
        let mut state = grounded_at(0.0);
        state.velocity = Vec3::new(8.0, 0.0, 0.0);
        let mut fell = false;
        for tick in 1..=60 {
            let out = sim.step(&state, &input(tick, 1.0, 0.0, ActionFlags::NONE), DT, &world);
            state = out.state;
            if state.mode == MovementMode::Falling {
                fell = true;
                break;
            }
        }
        assert!(fell);
        assert!(state.position.x > 1.0);
    }

    #[test]
    fn test_wall_blocks_and_slides() {
        let sim = Simulator::default();
        let world = PlaneWorld::flat(0.0).with_obstacle(Aabb::new(
            Vec3::new(1.0, 0.0, -50.0),
            Vec3::new(2.0, 3.0, 50.0),
        ));
        let mut state = grounded_at(0.0);
        for tick in 1..=120 {
            // Diagonal into the wall: X is blocked, Z keeps going
            state = sim.step(&state, &input(tick, 0.7, 0.7, ActionFlags::NONE), DT, &world).state;
        }
        assert!(state.position.x <= 1.0 - world.actor_half_width + 1e-4);
        assert!(state.position.z > 2.0);
    }

    #[test]
    fn test_enters_water_and_swims() {
        let sim = Simulator::default();
        let world = PlaneWorld::flat(-20.0).with_water(0.0);
        let mut state = MovementState::spawn(Vec3::new(0.0, 1.0, 0.0), MovementMode::Falling, 0);
        let mut swam = false;
        for tick in 1..=1200 {
            let out = sim.step(&state, &input(tick, 0.0, 0.0, ActionFlags::NONE), DT, &world);
            state = out.state;
            if state.mode == MovementMode::Swimming {
                swam = true;
            }
        }
        assert!(swam);
        assert_eq!(state.mode, MovementMode::Swimming);
        // Buoyancy floats the swimmer back up near the surface
        assert!(state.position.y > -3.0 && state.position.y < 0.0, "{:?}", state.position);
    }

    #[test]
    fn test_sanitizes_garbage() {
        let sim = Simulator::default();
        let world = PlaneWorld::flat(0.0);
        let mut state = grounded_at(0.0);
        state.velocity = Vec3::new(f32::NAN, 0.0, f32::INFINITY);

        let out = sim.step(&state, &input(1, f32::NAN, 1.0, ActionFlags::NONE), f32::NAN, &world);
        assert!(out.state.is_finite());
        // NaN dt means no time passes
        assert_eq!(out.state.position, Vec3::ZERO);

        let out = sim.step(&grounded_at(0.0), &input(1, 0.0, 1.0, ActionFlags::NONE), 10.0, &world);
        // dt clamped to max_delta_time (0.1 s): at most 60 * 0.1 * 0.1 = 0.6 units
        assert!(out.state.position.z <= 0.6 + 1e-4);
    }

    #[test]
    fn test_facing_turns_towards_travel() {
        let sim = Simulator::default();
        let world = PlaneWorld::flat(0.0);
        let mut state = grounded_at(0.0);
        for tick in 1..=120 {
            state = sim.step(&state, &input(tick, 1.0, 0.0, ActionFlags::NONE), DT, &world).state;
        }
        let target = Quaternion::from_yaw_direction(Vec3::X);
        assert!(state.orientation.dot(target) > 0.999);
    }
}
