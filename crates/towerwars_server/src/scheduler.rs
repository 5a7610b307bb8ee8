//! Fixed-step timing for the game loop thread.

use std::time::{Duration, Instant};

use towerwars_protocol::TICK_RATE;

/// Seconds per simulation step.
pub const TICK_INTERVAL: f32 = 1.0 / TICK_RATE as f32;

/// Steps the accumulator will hold at most; a stall longer than this is
/// forgiven instead of replayed.
const MAX_PENDING_STEPS: u32 = 5;

/// Accumulator clock for a fixed-rate loop: the outer loop runs as often
/// as it likes, [`FixedStep::advance`] says how many whole simulation
/// steps are due, and [`FixedStep::sleep_budget`] says how long to doze
/// before the next one.
#[derive(Debug)]
pub struct FixedStep {
    interval: Duration,
    accumulator: Duration,
    last: Instant,
}

impl FixedStep {
    pub fn new(ticks_per_second: u32) -> Self {
        Self {
            interval: Duration::from_secs(1) / ticks_per_second.max(1),
            accumulator: Duration::ZERO,
            last: Instant::now(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Folds elapsed wall time into the accumulator and returns the number
    /// of whole steps now due.
    pub fn advance(&mut self) -> u32 {
        let now = Instant::now();
        self.accumulator += now.duration_since(self.last);
        self.last = now;

        let cap = self.interval * MAX_PENDING_STEPS;
        if self.accumulator > cap {
            self.accumulator = cap;
        }

        let mut steps = 0;
        while self.accumulator >= self.interval {
            self.accumulator -= self.interval;
            steps += 1;
        }
        steps
    }

    /// Time until the next step is due, for the inter-iteration sleep.
    pub fn sleep_budget(&self) -> Duration {
        self.interval.saturating_sub(self.accumulator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_time_no_steps() {
        let mut step = FixedStep::new(20);
        assert_eq!(step.advance(), 0);
    }

    #[test]
    fn accumulated_time_yields_steps() {
        let mut step = FixedStep::new(20);
        // Pretend the loop stalled for 125 ms.
        step.last -= Duration::from_millis(125);
        assert_eq!(step.advance(), 2);
        // The 25 ms remainder stays in the accumulator.
        assert!(step.sleep_budget() <= Duration::from_millis(25));
    }

    #[test]
    fn long_stalls_are_capped() {
        let mut step = FixedStep::new(20);
        step.last -= Duration::from_secs(60);
        assert!(step.advance() <= 5);
    }
}
