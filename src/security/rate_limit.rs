//! Token-bucket rate limiting for the turn endpoint
//!
//! Each turn can fan out into several LLM calls and sandbox executions, so
//! the gateway admits turns through a token bucket: bursts up to `capacity`,
//! then `refill_rate` turns per second sustained.
//!
//! ```text
//!   capacity=10, rate=5/sec
//!   t=0.0s  10 requests → all admitted, bucket empty
//!   t=0.2s   1 request  → admitted (0.2s * 5/s = 1 token refilled)
//!   t=0.2s   1 request  → denied
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Fractional tokens are stored scaled to avoid floats in the atomic
const SCALE: u64 = 1000;

/// Upper bound on the advertised back-off, for very slow refill rates
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Lock-free token bucket (the refill timestamp sits behind a short mutex)
pub struct RateLimiter {
    capacity: u64,
    refill_rate: f64,
    tokens_scaled: AtomicU64,
    last_refill: Mutex<Instant>,
}

impl RateLimiter {
    /// Bucket starting full
    pub fn new(capacity: u64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            tokens_scaled: AtomicU64::new(capacity * SCALE),
            last_refill: Mutex::new(Instant::now()),
        }
    }

    /// 50 burst, 10 turns/sec
    pub fn with_defaults() -> Self {
        Self::new(50, 10.0)
    }

    /// Take one token if available
    pub fn try_acquire(&self) -> bool {
        self.refill();

        loop {
            let current = self.tokens_scaled.load(Ordering::Relaxed);
            if current < SCALE {
                return false;
            }
            if self
                .tokens_scaled
                .compare_exchange(current, current - SCALE, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Like [`RateLimiter::try_acquire`] but reports how long to back off
    pub fn check(&self) -> Result<(), RateLimitError> {
        if self.try_acquire() {
            Ok(())
        } else {
            Err(RateLimitError::new(self.refill_rate))
        }
    }

    fn refill(&self) {
        let now = Instant::now();

        // A poisoned lock only means another thread panicked mid-refill;
        // the timestamp is still usable.
        let mut last = match self.last_refill.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let elapsed = now.duration_since(*last);
        let tokens_to_add = (elapsed.as_secs_f64() * self.refill_rate * SCALE as f64) as u64;

        if tokens_to_add == 0 {
            return;
        }
        *last = now;

        let max_scaled = self.capacity * SCALE;
        loop {
            let current = self.tokens_scaled.load(Ordering::Relaxed);
            let new = current.saturating_add(tokens_to_add).min(max_scaled);
            if self
                .tokens_scaled
                .compare_exchange(current, new, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn available_tokens(&self) -> u64 {
        self.tokens_scaled.load(Ordering::Relaxed) / SCALE
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }
}

/// Returned when a turn is rejected by the limiter
#[derive(Debug)]
pub struct RateLimitError {
    /// Time until one token is available again
    pub retry_after: Duration,
}

impl RateLimitError {
    /// A zero or unusable rate advertises one second
    pub fn new(refill_rate: f64) -> Self {
        let retry_after = if refill_rate.is_finite() && refill_rate > 0.0 {
            Duration::try_from_secs_f64(1.0 / refill_rate)
                .map(|d| d.min(MAX_RETRY_AFTER))
                .unwrap_or(MAX_RETRY_AFTER)
        } else {
            Duration::from_secs(1)
        };
        Self { retry_after }
    }
}

impl std::fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Rate limited. Retry after {:?}", self.retry_after)
    }
}

impl std::error::Error for RateLimitError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_rate_limit() {
        let limiter = RateLimiter::new(3, 1.0);

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_refill() {
        let limiter = RateLimiter::new(2, 100.0);

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());

        // 10ms = 1 token at 100/sec
        std::thread::sleep(Duration::from_millis(15));
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_check_reports_retry_after() {
        let limiter = RateLimiter::new(1, 4.0);
        assert!(limiter.check().is_ok());

        let err = limiter.check().unwrap_err();
        assert_eq!(err.retry_after, Duration::from_millis(250));
    }

    #[test]
    fn test_default_config() {
        let limiter = RateLimiter::with_defaults();
        assert_eq!(limiter.capacity(), 50);
        assert!((limiter.refill_rate() - 10.0).abs() < 0.01);
        assert_eq!(limiter.available_tokens(), 50);
    }

    #[test]
    fn test_retry_after_is_bounded() {
        // 1/rate overflows to infinity here
        assert_eq!(RateLimitError::new(1e-320).retry_after, MAX_RETRY_AFTER);
        assert_eq!(RateLimitError::new(1e-6).retry_after, MAX_RETRY_AFTER);
        assert_eq!(RateLimitError::new(0.0).retry_after, Duration::from_secs(1));
        assert_eq!(RateLimitError::new(f64::NAN).retry_after, Duration::from_secs(1));

        let limiter = RateLimiter::new(1, 1e-320);
        assert!(limiter.check().is_ok());
        assert_eq!(limiter.check().unwrap_err().retry_after, MAX_RETRY_AFTER);
    }

    #[test]
    fn test_huge_refill_rate_saturates() {
        let limiter = RateLimiter::new(2, f64::MAX);
        assert!(limiter.try_acquire());
        std::thread::sleep(Duration::from_millis(2));
        assert!(limiter.try_acquire());
        assert!(limiter.available_tokens() <= 2);
    }
}
