//! # Protocol & Simulation Constants
//!
//! Values baked into both sides of the link. Changing any of the wire
//! constants requires bumping [`PROTOCOL_VERSION`].

// =============================================================================
// WIRE
// =============================================================================

/// Version byte leading every datagram.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum datagram size (MTU-safe).
pub const MAX_DATAGRAM_SIZE: usize = 1200;

/// Maximum inputs carried by one datagram.
pub const MAX_INPUTS_PER_BATCH: usize = 64;

// =============================================================================
// SIMULATION
// =============================================================================

/// Default fixed tick rate (updates per second).
pub const DEFAULT_TICK_RATE: u32 = 60;

/// Default bind address for the demo authority.
pub const DEFAULT_BIND: &str = "127.0.0.1:7777";
