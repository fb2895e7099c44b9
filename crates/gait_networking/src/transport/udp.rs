//! UDP adapter.
//!
//! [`UdpLink`] is a thin non-blocking wrapper usable straight from the tick
//! loop. For an I/O context separate from the tick, [`pump_udp`] runs a
//! tokio task that moves every received datagram into an [`Inbox`].
//!
//! [`Inbox`]: crate::sync::Inbox

use std::io;
use std::net::SocketAddr;

use gait_shared::MAX_DATAGRAM_SIZE;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use super::{check_size, Reliability, Transport, TransportError, TransportResult, TransportStats};
use crate::sync::{InboxProducer, PushError, SharedStats};

/// UDP socket talking to a single peer.
///
/// The peer is either set up front or learned from the first datagram
/// received. Datagrams from anyone else are ignored.
#[derive(Debug)]
pub struct UdpLink {
    socket: std::net::UdpSocket,
    local_addr: SocketAddr,
    peer: Option<SocketAddr>,
    recv_buffer: Box<[u8; MAX_DATAGRAM_SIZE]>,
    stats: TransportStats,
    foreign: u64,
}

impl UdpLink {
    /// Binds a non-blocking socket.
    ///
    /// # Errors
    ///
    /// Any bind or socket option error.
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = std::net::UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;
        Ok(Self {
            socket,
            local_addr,
            peer: None,
            recv_buffer: Box::new([0u8; MAX_DATAGRAM_SIZE]),
            stats: TransportStats::default(),
            foreign: 0,
        })
    }

    /// Fixes the peer address.
    pub fn set_peer(&mut self, peer: SocketAddr) {
        self.peer = Some(peer);
    }

    /// Returns the local address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Peer address, once known.
    #[must_use]
    pub const fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Returns statistics.
    #[must_use]
    pub const fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Datagrams ignored because they came from another address.
    #[must_use]
    pub const fn foreign_datagrams(&self) -> u64 {
        self.foreign
    }

    /// Hands receiving over to a [`pump_udp`] task. Sending through this
    /// link keeps working; [`Transport::receive`] should no longer be used.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// When the socket cannot be duplicated or registered with the runtime.
    pub fn spawn_pump(&self, producer: InboxProducer, stats: SharedStats) -> io::Result<JoinHandle<()>> {
        let socket = UdpSocket::from_std(self.socket.try_clone()?)?;
        Ok(pump_udp(socket, producer, stats))
    }
}

impl Transport for UdpLink {
    fn send(&mut self, bytes: &[u8], _reliability: Reliability) -> TransportResult<()> {
        check_size(bytes)?;
        let peer = self.peer.ok_or(TransportError::Disconnected)?;
        match self.socket.send_to(bytes, peer) {
            Ok(n) => {
                self.stats.datagrams_sent += 1;
                self.stats.bytes_sent += n as u64;
                Ok(())
            }
            Err(e) => {
                self.stats.send_errors += 1;
                Err(e.into())
            }
        }
    }

    fn receive(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.socket.recv_from(&mut self.recv_buffer[..]) {
                Ok((len, from)) => {
                    let peer = *self.peer.get_or_insert(from);
                    if from != peer {
                        self.foreign += 1;
                        continue;
                    }
                    self.stats.datagrams_received += 1;
                    self.stats.bytes_received += len as u64;
                    return Some(self.recv_buffer[..len].to_vec());
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                Err(e) => {
                    tracing::debug!("udp receive error: {}", e);
                    return None;
                }
            }
        }
    }
}

/// Spawns a task moving datagrams from `socket` into `producer`.
///
/// A full inbox drops the datagram and counts it. The task ends when the
/// inbox's consumer is dropped.
pub fn pump_udp(socket: UdpSocket, producer: InboxProducer, stats: SharedStats) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            match socket.recv_from(&mut buffer).await {
                Ok((len, _from)) => match producer.push(buffer[..len].to_vec()) {
                    Ok(()) => {}
                    Err(PushError::Full) => stats.update(|s| s.inbox_overflows += 1),
                    Err(PushError::Disconnected) => {
                        tracing::info!("inbox closed, stopping udp pump");
                        break;
                    }
                },
                Err(e) => {
                    tracing::warn!("udp pump receive error: {}", e);
                    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::inbox;
    use std::time::{Duration, Instant};

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[test]
    fn test_udp_roundtrip_learns_peer() {
        let mut client = UdpLink::bind(loopback()).unwrap();
        let mut server = UdpLink::bind(loopback()).unwrap();
        client.set_peer(server.local_addr());

        // Unknown peer: nowhere to send yet
        assert!(matches!(server.send(b"early", Reliability::Unreliable), Err(TransportError::Disconnected)));

        client.send(b"ping", Reliability::Unreliable).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        let received = loop {
            if let Some(bytes) = server.receive() {
                break bytes;
            }
            assert!(Instant::now() < deadline, "datagram never arrived");
            std::thread::sleep(Duration::from_millis(1));
        };
        assert_eq!(received, b"ping");
        assert_eq!(server.peer(), Some(client.local_addr()));

        server.send(b"pong", Reliability::Unreliable).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(bytes) = client.receive() {
                assert_eq!(bytes, b"pong");
                break;
            }
            assert!(Instant::now() < deadline, "reply never arrived");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pump_feeds_inbox() {
        let mut client = UdpLink::bind(loopback()).unwrap();
        let server = UdpLink::bind(loopback()).unwrap();
        client.set_peer(server.local_addr());

        let (producer, inbox) = inbox(8);
        let stats = SharedStats::new();
        let pump = server.spawn_pump(producer, stats.clone()).unwrap();

        client.send(&[1, 2, 3], Reliability::Unreliable).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let received = loop {
            if let Some(bytes) = inbox.try_recv() {
                break bytes;
            }
            assert!(Instant::now() < deadline, "pump never delivered");
            tokio::time::sleep(Duration::from_millis(1)).await;
        };
        assert_eq!(received, vec![1, 2, 3]);
        assert_eq!(stats.snapshot().inbox_overflows, 0);
        pump.abort();
    }
}
