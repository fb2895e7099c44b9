//! # Mode Transition Table
//!
//! Locomotion modes are a closed enum. The next mode is picked by walking
//! [`TRANSITION_TABLE`] top to bottom and taking the first rule whose guard
//! holds. The last rule always holds, so resolution is total.
//!
//! | Priority | Rule         | Guard                                                        | Target   |
//! |----------|--------------|--------------------------------------------------------------|----------|
//! | 1        | Submerged    | immersion >= `buoyant_min_immersion`                         | Swimming |
//! | 2        | StillInFluid | swimming and immersion >= min immersion - exit tolerance     | Swimming |
//! | 3        | Jump         | grounded and jump requested (pre-move only)                  | Falling  |
//! | 4        | Rising       | not grounded and velocity.y > `rising_speed_threshold`       | Falling  |
//! | 5        | Supported    | walkable floor within reach                                  | Grounded |
//! | 6        | Unsupported  | always                                                       | Falling  |
//!
//! The table runs twice per step: before the move (with the jump request)
//! and after it (landing, walking off a ledge).

use gait_shared::MovementMode;

use crate::tuning::MovementTuning;
use crate::world::GroundHit;

/// One row of the transition table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransitionRule {
    /// Deep enough in fluid to swim.
    Submerged,
    /// Already swimming and not yet out of the fluid.
    StillInFluid,
    /// Grounded actor asked to jump.
    Jump,
    /// Airborne actor still moving up; landing is deferred.
    Rising,
    /// Walkable floor within reach.
    Supported,
    /// Nothing else applies.
    Unsupported,
}

/// Rules in evaluation order.
pub const TRANSITION_TABLE: [TransitionRule; 6] = [
    TransitionRule::Submerged,
    TransitionRule::StillInFluid,
    TransitionRule::Jump,
    TransitionRule::Rising,
    TransitionRule::Supported,
    TransitionRule::Unsupported,
];

/// Inputs to the guards, gathered once per evaluation.
#[derive(Clone, Copy, Debug)]
pub struct ModeContext {
    /// Mode going into the evaluation.
    pub mode: MovementMode,
    /// Fluid immersion fraction.
    pub immersion: f32,
    /// Jump requested (only honoured before the move).
    pub jump_requested: bool,
    /// Vertical speed.
    pub vertical_speed: f32,
    /// Floor found by the ground trace, if any.
    pub ground: Option<GroundHit>,
}

impl TransitionRule {
    /// Mode the rule selects.
    #[must_use]
    pub const fn target(self) -> MovementMode {
        match self {
            Self::Submerged | Self::StillInFluid => MovementMode::Swimming,
            Self::Jump | Self::Rising | Self::Unsupported => MovementMode::Falling,
            Self::Supported => MovementMode::Grounded,
        }
    }

    /// Whether the rule applies.
    #[must_use]
    pub fn guard(self, ctx: &ModeContext, tuning: &MovementTuning) -> bool {
        match self {
            Self::Submerged => ctx.immersion >= tuning.buoyant_min_immersion,
            Self::StillInFluid => {
                ctx.mode == MovementMode::Swimming
                    && ctx.immersion >= tuning.buoyant_min_immersion - tuning.fluid_exit_tolerance
            }
            Self::Jump => ctx.mode == MovementMode::Grounded && ctx.jump_requested,
            Self::Rising => {
                ctx.mode != MovementMode::Grounded && ctx.vertical_speed > tuning.rising_speed_threshold
            }
            Self::Supported => ctx.ground.is_some_and(|hit| {
                hit.normal.y >= tuning.walkable_floor_z && hit.distance <= reach(ctx.mode, tuning)
            }),
            Self::Unsupported => true,
        }
    }
}

/// How far below the feet a floor still supports an actor in `mode`.
#[inline]
#[must_use]
pub fn reach(mode: MovementMode, tuning: &MovementTuning) -> f32 {
    match mode {
        MovementMode::Grounded => tuning.max_step_down_height.max(tuning.contact_tolerance),
        MovementMode::Falling | MovementMode::Swimming => tuning.contact_tolerance,
    }
}

/// Walks the table and returns the first matching rule.
#[must_use]
pub fn resolve(ctx: &ModeContext, tuning: &MovementTuning) -> TransitionRule {
    TRANSITION_TABLE
        .iter()
        .copied()
        .find(|rule| rule.guard(ctx, tuning))
        .unwrap_or(TransitionRule::Unsupported)
}
