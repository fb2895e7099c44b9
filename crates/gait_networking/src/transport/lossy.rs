//! Simulated network link for tests and the demo binary.
//!
//! Both directions share one seeded RNG and one explicit clock, so a run is
//! reproducible from its seed and the order of sends.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;

use gait_shared::NetworkPreset;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{check_size, Reliability, Transport, TransportResult};

/// Network conditions for simulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkConditions {
    /// One-way base latency in milliseconds.
    pub base_latency_ms: u32,
    /// Jitter (variance) in milliseconds.
    pub jitter_ms: u32,
    /// Packet loss percentage (0-100).
    pub loss_percent: u8,
    /// Duplicate packet percentage (0-100).
    pub duplicate_percent: u8,
}

impl LinkConditions {
    /// Perfect network conditions.
    pub const PERFECT: Self = Self {
        base_latency_ms: 0,
        jitter_ms: 0,
        loss_percent: 0,
        duplicate_percent: 0,
    };

    /// Local network.
    pub const LAN: Self = Self {
        base_latency_ms: 1,
        jitter_ms: 0,
        loss_percent: 0,
        duplicate_percent: 0,
    };

    /// Wired, ping below 60 ms.
    pub const COMPETITIVE: Self = Self {
        base_latency_ms: 25,
        jitter_ms: 5,
        loss_percent: 0,
        duplicate_percent: 0,
    };

    /// Stable, ping below 100 ms, loss below 2%.
    pub const REGULAR: Self = Self {
        base_latency_ms: 45,
        jitter_ms: 15,
        loss_percent: 2,
        duplicate_percent: 1,
    };

    /// Unstable, ping up to 200 ms, loss up to 5%.
    pub const LOW_END: Self = Self {
        base_latency_ms: 80,
        jitter_ms: 40,
        loss_percent: 5,
        duplicate_percent: 2,
    };

    /// Conditions a preset is tuned for. `Custom` gets `REGULAR`.
    #[must_use]
    pub const fn for_preset(preset: NetworkPreset) -> Self {
        match preset {
            NetworkPreset::Lan => Self::LAN,
            NetworkPreset::Competitive => Self::COMPETITIVE,
            NetworkPreset::Regular | NetworkPreset::Custom => Self::REGULAR,
            NetworkPreset::LowEnd => Self::LOW_END,
        }
    }

    /// Draws a one-way latency with jitter.
    pub fn generate_latency(&self, rng: &mut impl Rng) -> u64 {
        let jitter = if self.jitter_ms > 0 {
            rng.gen_range(-(self.jitter_ms as i64)..=self.jitter_ms as i64)
        } else {
            0
        };
        (i64::from(self.base_latency_ms) + jitter).max(0) as u64
    }

    /// Returns true if the datagram should be dropped.
    pub fn should_drop(&self, rng: &mut impl Rng) -> bool {
        self.loss_percent > 0 && rng.gen_range(0..100u8) < self.loss_percent
    }

    /// Returns true if the datagram should be delivered twice.
    pub fn should_duplicate(&self, rng: &mut impl Rng) -> bool {
        self.duplicate_percent > 0 && rng.gen_range(0..100u8) < self.duplicate_percent
    }
}

impl Default for LinkConditions {
    fn default() -> Self {
        Self::REGULAR
    }
}

/// Link counters, both directions together.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Datagrams handed to the link.
    pub sent: u64,
    /// Datagrams lost.
    pub dropped: u64,
    /// Extra copies delivered.
    pub duplicated: u64,
    /// Datagrams handed to a receiver.
    pub delivered: u64,
}

#[derive(Debug)]
struct InFlight {
    deliver_at: u64,
    order: u64,
    bytes: Vec<u8>,
}

impl PartialEq for InFlight {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for InFlight {}

impl PartialOrd for InFlight {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InFlight {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deliver_at, self.order).cmp(&(other.deliver_at, other.order))
    }
}

#[derive(Debug)]
struct LinkCore {
    conditions: LinkConditions,
    rng: ChaCha8Rng,
    now_ms: u64,
    order: u64,
    /// Indexed by receiving side.
    queues: [BinaryHeap<Reverse<InFlight>>; 2],
    stats: LinkStats,
}

impl LinkCore {
    fn enqueue(&mut self, to: usize, bytes: &[u8]) {
        let deliver_at = self.now_ms + self.conditions.generate_latency(&mut self.rng);
        self.order += 1;
        self.queues[to].push(Reverse(InFlight { deliver_at, order: self.order, bytes: bytes.to_vec() }));
    }
}

/// Control handle of a simulated link: owns the clock.
#[derive(Clone, Debug)]
pub struct LossyLink {
    core: Arc<Mutex<LinkCore>>,
}

impl LossyLink {
    /// Creates a link and its two endpoints.
    #[must_use]
    pub fn pair(conditions: LinkConditions, seed: u64) -> (Self, LossyEndpoint, LossyEndpoint) {
        let core = Arc::new(Mutex::new(LinkCore {
            conditions,
            rng: ChaCha8Rng::seed_from_u64(seed),
            now_ms: 0,
            order: 0,
            queues: [BinaryHeap::new(), BinaryHeap::new()],
            stats: LinkStats::default(),
        }));
        (
            Self { core: Arc::clone(&core) },
            LossyEndpoint { core: Arc::clone(&core), side: 0 },
            LossyEndpoint { core, side: 1 },
        )
    }

    /// Advances the link clock.
    pub fn advance(&self, ms: u64) {
        self.core.lock().now_ms += ms;
    }

    /// Current link time.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        self.core.lock().now_ms
    }

    /// Changes conditions for datagrams sent from now on.
    pub fn set_conditions(&self, conditions: LinkConditions) {
        self.core.lock().conditions = conditions;
    }

    /// Datagrams still in flight, both directions.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        let core = self.core.lock();
        core.queues[0].len() + core.queues[1].len()
    }

    /// Returns statistics.
    #[must_use]
    pub fn stats(&self) -> LinkStats {
        self.core.lock().stats
    }
}

/// One end of a [`LossyLink`].
#[derive(Debug)]
pub struct LossyEndpoint {
    core: Arc<Mutex<LinkCore>>,
    side: usize,
}

impl Transport for LossyEndpoint {
    fn send(&mut self, bytes: &[u8], reliability: Reliability) -> TransportResult<()> {
        check_size(bytes)?;
        let to = 1 - self.side;
        let mut core = self.core.lock();
        let core = &mut *core;
        core.stats.sent += 1;

        if reliability == Reliability::Unreliable {
            let conditions = core.conditions;
            if conditions.should_drop(&mut core.rng) {
                core.stats.dropped += 1;
                return Ok(());
            }
            if conditions.should_duplicate(&mut core.rng) {
                core.stats.duplicated += 1;
                core.enqueue(to, bytes);
            }
        }
        core.enqueue(to, bytes);
        Ok(())
    }

    fn receive(&mut self) -> Option<Vec<u8>> {
        let mut core = self.core.lock();
        let now = core.now_ms;
        let queue = &mut core.queues[self.side];
        if queue.peek().is_some_and(|Reverse(next)| next.deliver_at <= now) {
            let Reverse(datagram) = queue.pop()?;
            core.stats.delivered += 1;
            Some(datagram.bytes)
        } else {
            None
        }
    }
}
