//! # Clock and Pacing
//!
//! Game time is a [`Tick`] counter (milliseconds). The [`GameClock`] only
//! moves when the simulation steps, so tests and replays drive it directly.
//! [`TickPacer`] ties steps to the wall clock for a live server.

use std::time::{Duration, Instant};

use realmcast_shared::{Tick, TICKS_PER_SECOND};

/// Monotonic game clock.
#[derive(Clone, Copy, Debug)]
pub struct GameClock {
    now: Tick,
    step: Tick,
}

impl GameClock {
    /// A clock at tick 0 advancing `step` ticks per step.
    #[must_use]
    pub const fn new(step: Tick) -> Self {
        Self { now: 0, step }
    }

    /// Current tick.
    #[inline]
    #[must_use]
    pub const fn now(&self) -> Tick {
        self.now
    }

    /// Ticks per step.
    #[inline]
    #[must_use]
    pub const fn step(&self) -> Tick {
        self.step
    }

    /// Moves one step forward and returns the new tick.
    pub fn advance(&mut self) -> Tick {
        self.now += self.step;
        self.now
    }

    /// Moves forward to `tick`. Earlier ticks are ignored.
    pub fn advance_to(&mut self, tick: Tick) -> Tick {
        self.now = self.now.max(tick);
        self.now
    }
}

/// Wall-clock timing statistics of simulation steps.
#[derive(Clone, Copy, Debug, Default)]
pub struct TickStats {
    /// Minimum step duration observed.
    pub min_tick_us: u64,
    /// Maximum step duration observed.
    pub max_tick_us: u64,
    /// Average step duration (rolling).
    pub avg_tick_us: u64,
    /// Steps slower than the configured budget.
    pub late_ticks: u64,
    /// Steps measured.
    pub total_ticks: u64,
    /// Commands applied.
    pub commands: u64,
    /// Sessions dropped after a fault.
    pub faults: u64,
}

impl TickStats {
    /// Records one step that took `duration_us`.
    pub fn record(&mut self, duration_us: u64, budget_us: u64) {
        if self.total_ticks == 0 {
            self.min_tick_us = duration_us;
            self.avg_tick_us = duration_us;
        }
        self.total_ticks += 1;
        self.min_tick_us = self.min_tick_us.min(duration_us);
        self.max_tick_us = self.max_tick_us.max(duration_us);
        self.avg_tick_us = (self.avg_tick_us * 15 + duration_us) / 16;
        if duration_us > budget_us {
            self.late_ticks += 1;
        }
    }
}

/// Paces simulation steps against real time.
pub struct TickPacer {
    step: Duration,
    last_tick: Instant,
}

impl TickPacer {
    /// Paces steps of `step` game ticks.
    #[must_use]
    pub fn new(step: Tick) -> Self {
        Self { step: Duration::from_micros(step * 1_000_000 / TICKS_PER_SECOND), last_tick: Instant::now() }
    }

    /// Wall-clock length of one step.
    #[must_use]
    pub fn step(&self) -> Duration {
        self.step
    }

    /// Sleeps until the next step is due, then marks it started.
    pub fn wait_for_next_tick(&mut self) {
        let elapsed = self.last_tick.elapsed();
        if elapsed < self.step {
            let remaining = self.step - elapsed;
            // Sleep for most of the time, spin the rest
            if remaining > Duration::from_micros(1000) {
                std::thread::sleep(remaining - Duration::from_micros(500));
            }
            while self.last_tick.elapsed() < self.step {
                std::hint::spin_loop();
            }
        }
        self.last_tick = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_steps() {
        let mut clock = GameClock::new(50);
        assert_eq!(clock.now(), 0);
        assert_eq!(clock.advance(), 50);
        assert_eq!(clock.advance_to(20), 50);
        assert_eq!(clock.advance_to(1_000), 1_000);
    }

    #[test]
    fn test_stats_track_min_max_and_late() {
        let mut stats = TickStats::default();
        stats.record(100, 1_000);
        stats.record(2_000, 1_000);
        stats.record(50, 1_000);
        assert_eq!(stats.total_ticks, 3);
        assert_eq!(stats.min_tick_us, 50);
        assert_eq!(stats.max_tick_us, 2_000);
        assert_eq!(stats.late_ticks, 1);
    }

    #[test]
    fn test_pacer_step_length() {
        assert_eq!(TickPacer::new(50).step(), Duration::from_millis(50));
    }
}
