//! Optimistic rate limiter with capped exponential backoff
//!
//! The limiter never throttles proactively; it only honors explicit backoff
//! after the server answered 429. Each consecutive rate limit doubles the
//! delay (step capped at 10 doublings, delay capped at 60 s) with a small
//! multiplicative jitter; any accepted submission resets it.

use std::time::{Duration, Instant};

use rand::Rng;

const BASE_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(60);
const MAX_STEP: u32 = 10;

#[derive(Debug)]
pub struct RateLimiter {
    step: u32,
    until: Option<Instant>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            step: 0,
            until: None,
        }
    }

    /// Remaining explicit backoff, if any.
    pub fn backoff_remaining(&self, now: Instant) -> Option<Duration> {
        match self.until {
            Some(until) if until > now => Some(until - now),
            _ => None,
        }
    }

    pub fn backoff_active(&self, now: Instant) -> bool {
        self.backoff_remaining(now).is_some()
    }

    /// Register a 429 and return the delay until the next attempt.
    pub fn on_rate_limited(&mut self, now: Instant) -> Duration {
        let exp = BASE_DELAY.as_secs_f64() * f64::from(1u32 << self.step.min(MAX_STEP));
        let jitter = rand::thread_rng().gen_range(1.0..1.25);
        let delay = Duration::from_secs_f64((exp * jitter).min(MAX_DELAY.as_secs_f64()));
        self.step = (self.step + 1).min(MAX_STEP);
        self.until = Some(now + delay);
        delay
    }

    /// Clear backoff state after a successful submission.
    pub fn reset(&mut self) {
        self.step = 0;
        self.until = None;
    }

    pub fn step(&self) -> u32 {
        self.step
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Capped exponential delay for per-task retries after retryable server
/// errors. No shared state: the failing task stays at the head of the queue.
pub fn retry_delay(retries: u32) -> Duration {
    let exp = BASE_DELAY.as_secs_f64() * f64::from(1u32 << retries.min(MAX_STEP));
    let jitter = rand::thread_rng().gen_range(1.0..1.25);
    Duration::from_secs_f64((exp * jitter).min(MAX_DELAY.as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_monotone_and_bounded() {
        let mut limiter = RateLimiter::new();
        let now = Instant::now();
        let mut previous = Duration::ZERO;
        for _ in 0..16 {
            let delay = limiter.on_rate_limited(now);
            assert!(delay >= previous, "backoff shrank: {delay:?} < {previous:?}");
            assert!(delay <= MAX_DELAY);
            previous = delay;
        }
    }

    #[test]
    fn test_backoff_blocks_until_deadline() {
        let mut limiter = RateLimiter::new();
        let now = Instant::now();
        assert!(!limiter.backoff_active(now));
        let delay = limiter.on_rate_limited(now);
        assert!(delay >= BASE_DELAY);
        assert!(limiter.backoff_active(now));
        assert!(!limiter.backoff_active(now + MAX_DELAY + Duration::from_secs(1)));
    }

    #[test]
    fn test_reset_clears_state() {
        let mut limiter = RateLimiter::new();
        let now = Instant::now();
        limiter.on_rate_limited(now);
        limiter.on_rate_limited(now);
        assert!(limiter.step() > 0);
        limiter.reset();
        assert_eq!(limiter.step(), 0);
        assert!(!limiter.backoff_active(now));
    }

    #[test]
    fn test_step_caps() {
        let mut limiter = RateLimiter::new();
        let now = Instant::now();
        for _ in 0..64 {
            limiter.on_rate_limited(now);
        }
        assert_eq!(limiter.step(), MAX_STEP);
    }

    #[test]
    fn test_retry_delay_caps_at_max() {
        assert!(retry_delay(0) >= BASE_DELAY);
        assert!(retry_delay(30) <= MAX_DELAY);
    }
}
