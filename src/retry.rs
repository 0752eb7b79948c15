//! Retry policy and exponential backoff for transport failures.

use async_trait::async_trait;
use std::time::Duration;

/// Default base delay between attempts, in microseconds.
pub const DEFAULT_BASE_DELAY_MICROS: u64 = 100_000;

/// How many times a transport failure is retried, and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `0` means a single attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_micros: u64) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_micros(base_delay_micros),
        }
    }

    /// Total attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Backoff before the retry that follows the 0-based `attempt`:
    /// `base_delay * 2^attempt` at microsecond precision, saturating at
    /// [`Duration::MAX`] instead of overflowing.
    pub fn delay(&self, attempt: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        1u128
            .checked_shl(attempt)
            .and_then(|factor| self.base_delay.as_micros().checked_mul(factor))
            .and_then(|micros| u64::try_from(micros).ok())
            .map_or(Duration::MAX, Duration::from_micros)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(0, DEFAULT_BASE_DELAY_MICROS)
    }
}

/// Suspension point used between attempts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer; only the calling task is suspended.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 0);
        assert_eq!(policy.base_delay, Duration::from_micros(100_000));
        assert_eq!(policy.max_attempts(), 1);
    }

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = RetryPolicy::new(3, 1000);
        assert_eq!(policy.delay(0), Duration::from_micros(1000));
        assert_eq!(policy.delay(1), Duration::from_micros(2000));
        assert_eq!(policy.delay(2), Duration::from_micros(4000));
    }

    #[test]
    fn test_zero_base_delay() {
        let policy = RetryPolicy::new(5, 0);
        assert_eq!(policy.delay(4), Duration::ZERO);
    }

    #[test]
    fn test_delay_keeps_doubling_past_32_attempts() {
        let policy = RetryPolicy::new(40, 1);
        assert_eq!(policy.delay(31), Duration::from_micros(1 << 31));
        assert_eq!(policy.delay(32), Duration::from_micros(1 << 32));
        assert_eq!(policy.delay(40), Duration::from_micros(1 << 40));
        assert_eq!(RetryPolicy::new(5, 0).delay(200), Duration::ZERO);
    }

    #[test]
    fn test_delay_saturates() {
        let policy = RetryPolicy::new(u32::MAX, u64::MAX);
        assert_eq!(policy.delay(200), Duration::MAX);
        assert_eq!(RetryPolicy::new(70, 1).delay(64), Duration::MAX);
        assert_eq!(policy.max_attempts(), u32::MAX);
    }

    #[tokio::test]
    async fn test_tokio_sleeper_waits() {
        let start = std::time::Instant::now();
        TokioSleeper.sleep(Duration::from_millis(20)).await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
