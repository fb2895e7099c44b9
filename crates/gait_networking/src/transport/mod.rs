//! # Transport Layer
//!
//! Datagram channels the synchronization layer sends through.
//!
//! ## Design
//!
//! - One small trait, [`Transport`]: `send(bytes, reliability)` / `receive()`
//! - No retransmission here: redundant input batches and tick staleness
//!   cover loss one layer up
//! - Adapters:
//!   - [`LoopbackTransport`]: in-process pair, perfect link
//!   - [`LossyLink`]: seeded latency / jitter / loss / duplication
//!   - [`UdpLink`]: real UDP, non-blocking, with an async inbox pump

mod lossy;
mod udp;

pub use lossy::{LinkConditions, LinkStats, LossyEndpoint, LossyLink};
pub use udp::{pump_udp, UdpLink};

use crossbeam_channel::{unbounded, Receiver, Sender};
use gait_shared::MAX_DATAGRAM_SIZE;
use thiserror::Error;

/// Delivery hint passed with every datagram.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Reliability {
    /// May be lost, duplicated or reordered.
    #[default]
    Unreliable,
    /// Must arrive (session control such as `Leave`).
    Reliable,
}

/// Transport failures.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The other end is gone.
    #[error("transport disconnected")]
    Disconnected,

    /// Datagram larger than the wire allows.
    #[error("datagram of {len} bytes exceeds {max}")]
    Oversized {
        /// Datagram length.
        len: usize,
        /// Limit.
        max: usize,
    },

    /// Socket error.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// A datagram channel to one peer.
pub trait Transport {
    /// Sends one datagram. Never blocks.
    ///
    /// # Errors
    ///
    /// [`TransportError`] when the datagram cannot be handed to the channel.
    fn send(&mut self, bytes: &[u8], reliability: Reliability) -> TransportResult<()>;

    /// Next received datagram, if one is waiting. Never blocks.
    fn receive(&mut self) -> Option<Vec<u8>>;
}

/// Transport statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Datagrams sent.
    pub datagrams_sent: u64,
    /// Datagrams received.
    pub datagrams_received: u64,
    /// Bytes sent.
    pub bytes_sent: u64,
    /// Bytes received.
    pub bytes_received: u64,
    /// Send errors.
    pub send_errors: u64,
}

pub(crate) fn check_size(bytes: &[u8]) -> TransportResult<()> {
    if bytes.len() > MAX_DATAGRAM_SIZE {
        Err(TransportError::Oversized { len: bytes.len(), max: MAX_DATAGRAM_SIZE })
    } else {
        Ok(())
    }
}

/// In-process perfect link. Datagrams arrive in order, exactly once.
#[derive(Debug)]
pub struct LoopbackTransport {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    stats: TransportStats,
}

impl LoopbackTransport {
    /// Creates two connected ends.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = unbounded();
        let (b_tx, a_rx) = unbounded();
        (
            Self { tx: a_tx, rx: a_rx, stats: TransportStats::default() },
            Self { tx: b_tx, rx: b_rx, stats: TransportStats::default() },
        )
    }

    /// Returns statistics.
    #[must_use]
    pub const fn stats(&self) -> &TransportStats {
        &self.stats
    }
}

impl Transport for LoopbackTransport {
    fn send(&mut self, bytes: &[u8], _reliability: Reliability) -> TransportResult<()> {
        check_size(bytes)?;
        if self.tx.send(bytes.to_vec()).is_err() {
            self.stats.send_errors += 1;
            return Err(TransportError::Disconnected);
        }
        self.stats.datagrams_sent += 1;
        self.stats.bytes_sent += bytes.len() as u64;
        Ok(())
    }

    fn receive(&mut self) -> Option<Vec<u8>> {
        let bytes = self.rx.try_recv().ok()?;
        self.stats.datagrams_received += 1;
        self.stats.bytes_received += bytes.len() as u64;
        Some(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_pair() {
        let (mut a, mut b) = LoopbackTransport::pair();
        a.send(b"hello", Reliability::Unreliable).unwrap();
        a.send(b"world", Reliability::Reliable).unwrap();

        assert_eq!(b.receive().as_deref(), Some(&b"hello"[..]));
        assert_eq!(b.receive().as_deref(), Some(&b"world"[..]));
        assert!(b.receive().is_none());
        assert!(a.receive().is_none());
        assert_eq!(a.stats().datagrams_sent, 2);
        assert_eq!(b.stats().bytes_received, 10);
    }

    #[test]
    fn test_oversized_rejected() {
        let (mut a, _b) = LoopbackTransport::pair();
        let big = vec![0u8; MAX_DATAGRAM_SIZE + 1];
        assert!(matches!(
            a.send(&big, Reliability::Unreliable),
            Err(TransportError::Oversized { len, .. }) if len == MAX_DATAGRAM_SIZE + 1
        ));
    }

    #[test]
    fn test_disconnected() {
        let (mut a, b) = LoopbackTransport::pair();
        drop(b);
        assert!(matches!(a.send(b"x", Reliability::Unreliable), Err(TransportError::Disconnected)));
        assert_eq!(a.stats().send_errors, 1);
    }
}
