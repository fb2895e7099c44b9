//! # Network Protocol
//!
//! Minimal-state datagrams between predicting clients and the authority.
//!
//! ## Datagram Structure
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Envelope (14 bytes, little endian)                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │ version (1) │ kind (1) │ actor (4) │ seq (2) │ ack (2) │ bits (4) │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Payload                                                      │
//! │   InputBatch:  count (1) + count × InputRecord (13 or 9)     │
//! │   Authority:   AuthorityRecord (45)                          │
//! │   Leave:       -                                             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Clients resend every unacknowledged input in each batch, so one lost
//! datagram is covered by the next. The authority acknowledges inputs
//! implicitly through the tick of its authority record. Header acks only
//! feed delivery counters.

mod ack;
mod packets;
mod serialization;

pub use ack::{AckTracker, Delivery, DeliveryTracker};
pub use packets::{
    dequantize_axis, quantize_axis, quantized_roundtrip, AuthorityRecord, Datagram, InputRecord, PacketHeader,
    PacketKind, Payload, QuantizedInputRecord,
};
pub use serialization::{decode, DecodeError, DecodeResult, PacketReader, PacketWriter};
