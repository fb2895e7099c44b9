//! # GAIT Shared
//!
//! Common types used by the simulation core, the predicting client and the
//! authority.
//!
//! ## CRITICAL RULE
//!
//! This crate must NEVER depend on:
//! - `tokio` or any other runtime
//! - `gait_core` or `gait_networking`
//!
//! Everything here is plain data plus configuration loading.

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod constants;
pub mod events;
pub mod math;
pub mod state;

pub use config::{ConfigError, ConfigResult, GaitConfig, NetworkPreset, SmoothingCurve};
pub use constants::{DEFAULT_TICK_RATE, MAX_DATAGRAM_SIZE, MAX_INPUTS_PER_BATCH, PROTOCOL_VERSION};
pub use events::{DesyncReason, EventSink, MovementEvent, NullSink};
pub use math::{Quaternion, Transform, Vec2, Vec3};
pub use state::{
    ActionFlags, ActorId, AuthorityState, InputCommand, ModeTransition, MovementMode, MovementState,
    ReconcileOutcome, ReconciliationResult, TickId,
};
