//! Movement state and input model.
//!
//! A [`MovementState`] is a pure function of the previous state and one
//! [`InputCommand`]: exactly one command advances exactly one tick. Nothing in
//! here reads clocks or globals.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::math::{Quaternion, Transform, Vec2, Vec3};

/// Simulation tick number.
pub type TickId = u32;

/// Identifier of a simulated actor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId(pub u32);

impl ActorId {
    /// Creates a new actor id.
    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw wire value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor#{}", self.0)
    }
}

/// Locomotion mode. Closed set; see the transition table in `gait_core`.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementMode {
    /// Standing or walking on walkable ground.
    Grounded = 0,
    /// Airborne, under gravity.
    #[default]
    Falling = 1,
    /// Immersed in fluid.
    Swimming = 2,
}

impl MovementMode {
    /// Converts from the wire byte.
    #[inline]
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Grounded),
            1 => Some(Self::Falling),
            2 => Some(Self::Swimming),
            _ => None,
        }
    }

    /// Wire byte.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Lower-case name, for logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Grounded => "grounded",
            Self::Falling => "falling",
            Self::Swimming => "swimming",
        }
    }
}

impl fmt::Display for MovementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Discrete action bitset carried by every input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionFlags(u8);

impl ActionFlags {
    /// No actions.
    pub const NONE: Self = Self(0);
    /// Jump request.
    pub const JUMP: Self = Self(1 << 0);
    /// Crouch held.
    pub const CROUCH: Self = Self(1 << 1);
    /// Sprint held.
    pub const SPRINT: Self = Self(1 << 2);

    const KNOWN: u8 = Self::JUMP.0 | Self::CROUCH.0 | Self::SPRINT.0;

    /// Builds flags from raw bits, dropping unknown bits.
    #[inline]
    #[must_use]
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::KNOWN)
    }

    /// Raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True when every bit of `other` is set.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of both sets.
    #[inline]
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for ActionFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// One tick of player intent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InputCommand {
    /// Tick this command advances.
    pub tick: TickId,
    /// Movement axes, unit length at most.
    pub axes: Vec2,
    /// Discrete actions.
    pub flags: ActionFlags,
    /// Client-local timestamp in milliseconds. Informational only.
    pub timestamp_ms: u32,
}

impl InputCommand {
    /// Creates a new command.
    #[must_use]
    pub const fn new(tick: TickId, axes: Vec2, flags: ActionFlags) -> Self {
        Self { tick, axes, flags, timestamp_ms: 0 }
    }

    /// Same command stamped with a client-local time.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp_ms: u32) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    /// Same intent re-targeted at another tick. Used by the authority to
    /// fill a gap left by a missing input.
    #[must_use]
    pub const fn repeated_at(mut self, tick: TickId) -> Self {
        self.tick = tick;
        self
    }

    /// Copy with non-finite axes zeroed and the axes clamped to unit length.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        self.axes = if self.axes.is_finite() {
            self.axes.clamp_length_max(1.0)
        } else {
            Vec2::ZERO
        };
        self.flags = ActionFlags::from_bits_truncate(self.flags.bits());
        self
    }

    /// Jump requested this tick.
    #[inline]
    #[must_use]
    pub const fn jump(&self) -> bool {
        self.flags.contains(ActionFlags::JUMP)
    }

    /// Sprint held this tick.
    #[inline]
    #[must_use]
    pub const fn sprint(&self) -> bool {
        self.flags.contains(ActionFlags::SPRINT)
    }

    /// Crouch held this tick.
    #[inline]
    #[must_use]
    pub const fn crouch(&self) -> bool {
        self.flags.contains(ActionFlags::CROUCH)
    }
}

/// Full locomotion state of one actor at the end of a tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MovementState {
    /// Feet position in world units, Y up.
    pub position: Vec3,
    /// Velocity in world units per second.
    pub velocity: Vec3,
    /// Facing.
    pub orientation: Quaternion,
    /// Locomotion mode.
    pub mode: MovementMode,
    /// Tick of the input that produced this state.
    pub tick: TickId,
}

impl MovementState {
    /// Spawns an actor at rest.
    #[must_use]
    pub const fn spawn(position: Vec3, mode: MovementMode, tick: TickId) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            orientation: Quaternion::IDENTITY,
            mode,
            tick,
        }
    }

    /// Distance between the two positions.
    #[must_use]
    pub fn position_error(&self, other: &Self) -> f32 {
        self.position.distance(other.position)
    }

    /// Magnitude of the velocity difference.
    #[must_use]
    pub fn velocity_error(&self, other: &Self) -> f32 {
        self.velocity.distance(other.velocity)
    }

    /// Bit-identical comparison of every field.
    #[must_use]
    pub fn bitwise_eq(&self, other: &Self) -> bool {
        self.position.bitwise_eq(other.position)
            && self.velocity.bitwise_eq(other.velocity)
            && self.orientation.bitwise_eq(other.orientation)
            && self.mode == other.mode
            && self.tick == other.tick
    }

    /// True when no component is NaN or infinite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.velocity.is_finite() && self.orientation.is_finite()
    }

    /// Render transform for this state.
    #[must_use]
    pub const fn transform(&self) -> Transform {
        Transform::new(self.position, self.orientation, 1.0)
    }
}

/// An authoritative state together with the input tick it was computed from.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthorityState {
    /// Input tick the authority applied last.
    pub input_tick: TickId,
    /// Authoritative result of that tick.
    pub state: MovementState,
}

impl AuthorityState {
    /// Wraps an authoritative state. The state's own tick is aligned to
    /// `input_tick`.
    #[must_use]
    pub const fn new(input_tick: TickId, mut state: MovementState) -> Self {
        state.tick = input_tick;
        Self { input_tick, state }
    }

    /// Tick this state answers.
    #[inline]
    #[must_use]
    pub const fn tick(&self) -> TickId {
        self.input_tick
    }
}

/// Change of locomotion mode, reported next to the stepped state.
///
/// Collaborators such as animation and audio consume it. It never feeds back
/// into the simulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeTransition {
    /// Mode before the tick.
    pub from: MovementMode,
    /// Mode after the tick.
    pub to: MovementMode,
    /// Tick on which the change happened.
    pub tick: TickId,
}

/// Verdict of one reconciliation pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReconcileOutcome {
    /// Prediction was within tolerance; nothing rewritten.
    Accepted,
    /// Prediction was rewritten from the authority tick onward.
    Corrected,
    /// History could not be matched; snapped to authority.
    Desynced,
}

/// Result of reconciling one authority state against the prediction history.
///
/// Created per pass, handed to the smoothing layer, then dropped.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReconciliationResult {
    /// Verdict.
    pub outcome: ReconcileOutcome,
    /// Authority tick the pass started from.
    pub corrected_from: TickId,
    /// Distance between predicted and authoritative position, before rewrite.
    pub position_error: f32,
    /// Magnitude of the velocity difference, before rewrite.
    pub velocity_error: f32,
    /// State to snap to when the outcome is [`ReconcileOutcome::Desynced`].
    pub snap: Option<MovementState>,
}

impl ReconciliationResult {
    /// True when the predicted history was changed.
    #[must_use]
    pub const fn rewrote_history(&self) -> bool {
        !matches!(self.outcome, ReconcileOutcome::Accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_clamps_axes() {
        let input = InputCommand::new(1, Vec2::new(3.0, 4.0), ActionFlags::NONE).sanitized();
        assert!((input.axes.length_squared() - 1.0).abs() < 1e-6);

        let nan = InputCommand::new(1, Vec2::new(f32::NAN, 0.5), ActionFlags::NONE).sanitized();
        assert_eq!(nan.axes, Vec2::ZERO);
    }

    #[test]
    fn test_sanitize_drops_unknown_flags() {
        let mut input = InputCommand::new(1, Vec2::ZERO, ActionFlags::JUMP);
        input.flags = ActionFlags(0xF1);
        let clean = input.sanitized();
        assert!(clean.jump());
        assert_eq!(clean.flags.bits(), 0x01);
    }

    #[test]
    fn test_flags() {
        let flags = ActionFlags::JUMP | ActionFlags::SPRINT;
        let input = InputCommand::new(0, Vec2::ZERO, flags);
        assert!(input.jump());
        assert!(input.sprint());
        assert!(!input.crouch());
    }

    #[test]
    fn test_mode_wire_roundtrip_rejects_unknown() {
        assert_eq!(MovementMode::from_u8(2), Some(MovementMode::Swimming));
        assert_eq!(MovementMode::from_u8(3), None);
    }

    #[test]
    fn test_state_errors() {
        let a = MovementState::spawn(Vec3::new(10.0, 0.0, 0.0), MovementMode::Grounded, 100);
        let b = MovementState::spawn(Vec3::new(10.6, 0.0, 0.0), MovementMode::Grounded, 100);
        assert!((a.position_error(&b) - 0.6).abs() < 1e-5);
        assert_eq!(a.velocity_error(&b), 0.0);
    }

    #[test]
    fn test_bitwise_eq_distinguishes_signed_zero() {
        let a = MovementState::spawn(Vec3::ZERO, MovementMode::Grounded, 0);
        let mut b = a;
        assert!(a.bitwise_eq(&b));
        b.velocity.x = -0.0;
        assert_eq!(a, b);
        assert!(!a.bitwise_eq(&b));
    }

    #[test]
    fn test_authority_state_aligns_tick() {
        let state = MovementState::spawn(Vec3::ZERO, MovementMode::Falling, 3);
        let authority = AuthorityState::new(42, state);
        assert_eq!(authority.tick(), 42);
        assert_eq!(authority.state.tick, 42);
    }
}
