//! Exponential backoff for the process supervisor's respawn loop (spec
//! §4.7). Synchronous counterpart of the async reconnect-loop `Backoff`
//! pattern: same min/max/cur/jitter/doubling shape, `sleep` blocks the
//! calling thread instead of awaiting a timer.

use std::time::Duration;

pub const SUPERVISOR_MIN_BACKOFF: Duration = Duration::from_millis(250);
pub const SUPERVISOR_MAX_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    cur: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Backoff { min, max, cur: min }
    }

    pub fn reset(&mut self) {
        self.cur = self.min;
    }

    pub fn current(&self) -> Duration {
        self.cur
    }

    /// Block for the current backoff duration plus jitter, then double
    /// (capped at `max`) for next time.
    pub fn sleep(&mut self) {
        let jitter = Duration::from_millis(rand::random::<u64>() % 150);
        std::thread::sleep(self.cur + jitter);
        self.cur = (self.cur * 2).min(self.max);
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::new(SUPERVISOR_MIN_BACKOFF, SUPERVISOR_MAX_BACKOFF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_min_and_doubles_up_to_cap() {
        let mut b = Backoff::new(Duration::from_millis(250), Duration::from_secs(5));
        assert_eq!(b.current(), Duration::from_millis(250));
        b.cur = b.cur * 2; // simulate one failed spawn without sleeping in the test
        assert_eq!(b.current(), Duration::from_millis(500));
    }

    #[test]
    fn caps_at_max_after_repeated_doubling() {
        let mut b = Backoff::new(Duration::from_millis(250), Duration::from_secs(5));
        for _ in 0..10 {
            b.cur = (b.cur * 2).min(b.max);
        }
        assert_eq!(b.current(), Duration::from_secs(5));
    }

    #[test]
    fn reset_returns_to_min() {
        let mut b = Backoff::new(Duration::from_millis(250), Duration::from_secs(5));
        b.cur = Duration::from_secs(5);
        b.reset();
        assert_eq!(b.current(), Duration::from_millis(250));
    }
}
