//! Datagram sequence / ack bookkeeping.
//!
//! Each side numbers its datagrams and echoes the newest sequence it has
//! seen plus a 32-bit window of the ones before it. The window also
//! catches duplicate deliveries.
//!
//! Acks never trigger a resend. Input delivery rides on redundancy and the
//! authority tick; the echoed window only feeds [`DeliveryTracker`], which
//! counts how many of our datagrams made it.

use std::collections::VecDeque;

use gait_shared::{ActorId, PROTOCOL_VERSION};

use super::packets::{PacketHeader, PacketKind};

/// Width of the ack window.
const WINDOW: u16 = 32;

/// Sequence and ack state for one datagram stream.
#[derive(Clone, Debug, Default)]
pub struct AckTracker {
    send_sequence: u16,
    recv_ack: u16,
    ack_bits: u32,
    received_any: bool,
}

impl AckTracker {
    /// Creates a tracker with nothing sent or received.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            send_sequence: 0,
            recv_ack: 0,
            ack_bits: 0,
            received_any: false,
        }
    }

    /// Header for the next outgoing datagram. Consumes a sequence number.
    pub fn next_header(&mut self, kind: PacketKind, actor: ActorId) -> PacketHeader {
        let sequence = self.send_sequence;
        self.send_sequence = self.send_sequence.wrapping_add(1);
        PacketHeader {
            version: PROTOCOL_VERSION,
            kind: kind as u8,
            actor,
            sequence,
            ack: self.recv_ack,
            ack_bits: self.ack_bits,
        }
    }

    /// Records a received sequence number.
    ///
    /// Returns `false` for a duplicate, or for a datagram too old to be
    /// told apart from one.
    pub fn record(&mut self, sequence: u16) -> bool {
        if !self.received_any {
            self.received_any = true;
            self.recv_ack = sequence;
            self.ack_bits = 1;
            return true;
        }

        let diff = sequence.wrapping_sub(self.recv_ack);
        if diff == 0 {
            return false;
        }

        if diff < 0x8000 {
            // Newer
            self.ack_bits = if diff < WINDOW { (self.ack_bits << diff) | 1 } else { 1 };
            self.recv_ack = sequence;
            true
        } else {
            // Older
            let back = self.recv_ack.wrapping_sub(sequence);
            if back >= WINDOW {
                return false;
            }
            let bit = 1u32 << back;
            if self.ack_bits & bit != 0 {
                return false;
            }
            self.ack_bits |= bit;
            true
        }
    }

    /// True when the remote, in `header`, acknowledges our `sequence`.
    #[must_use]
    pub fn is_acked(header: &PacketHeader, sequence: u16) -> bool {
        let back = header.ack.wrapping_sub(sequence);
        back < WINDOW && header.ack_bits & (1u32 << back) != 0
    }

    /// Newest sequence received.
    #[inline]
    #[must_use]
    pub const fn recv_ack(&self) -> u16 {
        self.recv_ack
    }

    /// Receive window bits.
    #[inline]
    #[must_use]
    pub const fn ack_bits(&self) -> u32 {
        self.ack_bits
    }
}

/// Datagrams confirmed by one remote header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Sent datagrams the remote acknowledged.
    pub acked: u32,
    /// Sent datagrams that can no longer be acknowledged.
    pub lost: u32,
}

/// Our sent sequences still waiting for the remote's verdict.
#[derive(Clone, Debug, Default)]
pub struct DeliveryTracker {
    in_flight: VecDeque<u16>,
}

impl DeliveryTracker {
    /// Sequences remembered before the oldest counts as lost.
    const CAPACITY: usize = 2 * WINDOW as usize;

    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remembers a sent sequence. Returns 1 when the oldest one had to be
    /// forgotten unconfirmed, 0 otherwise.
    pub fn sent(&mut self, sequence: u16) -> u32 {
        self.in_flight.push_back(sequence);
        if self.in_flight.len() > Self::CAPACITY {
            self.in_flight.pop_front();
            1
        } else {
            0
        }
    }

    /// Settles every in-flight sequence `header` acknowledges, or that fell
    /// out of its window without being acknowledged.
    pub fn on_header(&mut self, header: &PacketHeader) -> Delivery {
        let mut delivery = Delivery::default();
        self.in_flight.retain(|&sequence| {
            if AckTracker::is_acked(header, sequence) {
                delivery.acked += 1;
                return false;
            }
            let back = header.ack.wrapping_sub(sequence);
            if (WINDOW..0x8000).contains(&back) {
                delivery.lost += 1;
                return false;
            }
            true
        });
        delivery
    }

    /// Sequences awaiting a verdict.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}
