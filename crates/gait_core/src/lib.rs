//! # GAIT Core - Deterministic Locomotion
//!
//! One pure step function shared by the predicting client and the
//! authority:
//!
//! ```text
//! (MovementState, InputCommand, dt, &dyn WorldQuery) ──► Simulator::step ──► MovementState
//! ```
//!
//! ## Guarantees
//!
//! - Same inputs, same tuning, same world: bit-identical output
//! - Never panics, never produces NaN (inputs are sanitized)
//! - No clocks, no randomness, no allocation in the step
//!
//! Collision data is not owned here. The caller passes a [`WorldQuery`];
//! [`PlaneWorld`] is a small reference implementation.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod modes;
pub mod simulator;
pub mod tuning;
pub mod world;

pub use modes::{ModeContext, TransitionRule, TRANSITION_TABLE};
pub use simulator::{Simulator, StepOutput, MAX_SLIDE_ITERATIONS};
pub use tuning::{MovementTuning, PlanarProfile};
pub use world::{Aabb, GroundHit, PlaneWorld, SweepHit, WorldQuery};
