//! Exponential reconnect backoff.

use biogate_core::config::BackoffConfig;
use std::time::Duration;

/// Doubling backoff with a cap.
///
/// Starts at the configured initial delay and doubles on every failure
/// until the cap; `reset` returns it to the initial delay after a
/// successful connection.
#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    #[must_use]
    pub fn new(config: &BackoffConfig) -> Self {
        let initial = config.initial();
        Backoff {
            initial,
            cap: config.cap(),
            current: initial,
        }
    }

    /// Delay to wait before the next attempt; advances the schedule.
    pub fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.cap);
        delay
    }

    /// Return to the initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(initial_ms: u64, cap_ms: u64) -> BackoffConfig {
        BackoffConfig {
            initial_ms,
            cap_ms,
            ..BackoffConfig::default()
        }
    }

    #[test]
    fn test_doubles_until_cap() {
        let mut backoff = Backoff::new(&config(1000, 30_000));
        let delays: Vec<u64> = (0..7).map(|_| backoff.next().as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16_000, 30_000, 30_000]);
    }

    #[test]
    fn test_reset_restarts_schedule() {
        let mut backoff = Backoff::new(&config(1000, 30_000));
        backoff.next();
        backoff.next();
        backoff.reset();
        assert_eq!(backoff.next(), Duration::from_millis(1000));
    }
}
