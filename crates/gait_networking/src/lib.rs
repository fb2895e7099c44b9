//! # GAIT Networking - Prediction, Reconciliation & Sync
//!
//! Everything between the deterministic step and the wire.
//!
//! ## Architecture
//!
//! - **Prediction**: bounded per-actor history of (tick, input, state)
//! - **Reconciliation**: compare with the authority, rewind, replay
//! - **Protocol**: versioned little-endian datagrams, redundant input batches
//! - **Sync**: inbox between I/O and tick, send cadence, authority input queues
//! - **Smoothing**: correction blending and remote interpolation
//! - **Transport**: loopback, seeded lossy link, UDP
//!
//! ## Authority Model
//!
//! ```text
//! CLIENT                                   AUTHORITY
//!   |                                          |
//!   |--- inputs [T-3 .. T] (redundant) ------->|  <- steps the same simulator
//!   |                                          |
//!   |<-- state @ T' (acknowledges ≤ T') -------|
//!   |                                          |
//!   reconcile T': accept, or rewrite T'..T
//! ```
//!
//! The client never decides outcomes; it predicts and yields.
//!
//! ## Example
//!
//! ```rust,ignore
//! use gait_networking::{Authority, ClientSession};
//!
//! let mut client = ClientSession::new(config.clone(), simulator.clone());
//! let mut authority = Authority::new(config, simulator);
//!
//! // Each tick:
//! client.predict(actor, input, &world, &mut sink)?;
//! if let Some(bytes) = client.poll_send(actor)? {
//!     transport.send(&bytes, Reliability::Unreliable)?;
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod prediction;
pub mod protocol;
pub mod reconciliation;
pub mod server;
pub mod smoothing;
pub mod sync;
pub mod transport;

// Re-exports for convenience
pub use client::{ClientSession, SessionError, SessionResult};
pub use prediction::{PredictionBuffer, PredictionEntry, PredictionError, PredictionResult, PushOutcome};
pub use protocol::{decode, AckTracker, Datagram, DecodeError, PacketHeader, PacketKind, PacketWriter, Payload};
pub use reconciliation::{CancellationToken, ReconcileError, Reconciler};
pub use server::{Authority, Outgoing, TickClock};
pub use smoothing::{smooth, CorrectionSmoother, RemoteInterpolator};
pub use sync::{inbox, Inbox, InboxProducer, SharedStats, SyncStats};
pub use transport::{
    LinkConditions, LinkStats, LoopbackTransport, LossyEndpoint, LossyLink, Reliability, Transport, TransportError,
    UdpLink,
};
