//! Fixed-rate tick clock for real-time loops.
//!
//! Simulated-time runs (tests, the lossy-link demo) drive ticks directly and
//! do not need it.

use std::time::{Duration, Instant};

/// Deadline-driven fixed timestep.
///
/// Each released tick moves the deadline forward by exactly one period, so a
/// slow tick is followed by catch-up ticks instead of a slower simulation.
#[derive(Debug)]
pub struct TickClock {
    period: Duration,
    next_due: Instant,
    released: u64,
    stats: TickStats,
}

/// How long ticks took to run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Slowest tick, in microseconds.
    pub worst_us: u64,
    /// Exponential moving average, in microseconds.
    pub average_us: u64,
    /// Ticks that ran longer than one period.
    pub overruns: u64,
}

impl TickClock {
    /// Creates a clock ticking `tick_rate_hz` times per second (min 1).
    /// The first tick is due one period from now.
    #[must_use]
    pub fn new(tick_rate_hz: u32) -> Self {
        let period = Duration::from_micros(1_000_000 / u64::from(tick_rate_hz.max(1)));
        Self { period, next_due: Instant::now() + period, released: 0, stats: TickStats::default() }
    }

    /// True while a tick is due. Call in a loop until it returns false.
    #[must_use]
    pub fn should_tick(&self) -> bool {
        Instant::now() >= self.next_due
    }

    /// Releases the due tick and returns its start time.
    #[must_use]
    pub fn begin_tick(&mut self) -> Instant {
        self.next_due += self.period;
        self.released += 1;
        Instant::now()
    }

    /// Records the run time of the tick started at `start`.
    pub fn end_tick(&mut self, start: Instant) {
        let spent = start.elapsed();
        let spent_us = u64::try_from(spent.as_micros()).unwrap_or(u64::MAX);
        let stats = &mut self.stats;
        stats.worst_us = stats.worst_us.max(spent_us);
        stats.average_us = if self.released <= 1 { spent_us } else { (stats.average_us * 7 + spent_us) / 8 };
        if spent > self.period {
            stats.overruns += 1;
        }
    }

    /// Sleeps until the next tick is due. Returns at once when behind.
    pub fn wait_for_next_tick(&self) {
        if let Some(remaining) = self.next_due.checked_duration_since(Instant::now()) {
            std::thread::sleep(remaining);
        }
    }

    /// Ticks released so far.
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.released
    }

    /// Run-time statistics.
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Length of one tick.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period() {
        assert_eq!(TickClock::new(60).period(), Duration::from_micros(16_666));
        assert_eq!(TickClock::new(0).period(), Duration::from_secs(1));
    }

    #[test]
    fn test_not_due_before_first_period() {
        let clock = TickClock::new(1);
        assert!(!clock.should_tick());
        assert_eq!(clock.tick_count(), 0);
    }

    #[test]
    fn test_catches_up_after_stall() {
        let mut clock = TickClock::new(1000);
        clock.wait_for_next_tick();
        std::thread::sleep(Duration::from_millis(3));
        let mut released = 0;
        while clock.should_tick() && released < 100 {
            let start = clock.begin_tick();
            clock.end_tick(start);
            released += 1;
        }
        assert!(released >= 3, "{released}");
        assert_eq!(clock.tick_count(), released);
        assert_eq!(clock.stats().overruns, 0);
    }
}
