//! Retry and timeout policies the executor delegates to around a step body.
//!
//! The engine treats both as opaque combinators supplied by an external
//! resilience library; this module ships only a minimal default so the
//! crate is usable without pulling one in.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

/// A retry policy consulted after a step body raises.
///
/// The executor calls [`delay_before`](RetryPolicy::delay_before) with the
/// 1-indexed attempt number that is *about* to run; `None` means retries are
/// exhausted and rollback should begin.
#[async_trait]
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    fn max_attempts(&self) -> u32;

    async fn delay_before(&self, attempt: u32) -> Option<Duration>;
}

/// Exponential backoff with full jitter, capped at `max_delay`.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: base_delay.saturating_mul(32),
        }
    }

    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }
}

#[async_trait]
impl RetryPolicy for ExponentialBackoff {
    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    async fn delay_before(&self, attempt: u32) -> Option<Duration> {
        if attempt > self.max_attempts {
            return None;
        }
        let scale = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        let capped = self.base_delay.saturating_mul(scale).min(self.max_delay);
        let jitter_ceiling_ms = (capped.as_millis() as u64).max(1);
        let jitter_ms = rand::rng().random_range(0..=jitter_ceiling_ms);
        Some(Duration::from_millis(jitter_ms))
    }
}

/// A policy that never retries; the step's first raised failure goes
/// straight to rollback.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRetry;

#[async_trait]
impl RetryPolicy for NoRetry {
    fn max_attempts(&self) -> u32 {
        0
    }

    async fn delay_before(&self, _attempt: u32) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exponential_backoff_exhausts_after_max_attempts() {
        let policy = ExponentialBackoff::new(2, Duration::from_millis(10));
        assert!(policy.delay_before(1).await.is_some());
        assert!(policy.delay_before(2).await.is_some());
        assert!(policy.delay_before(3).await.is_none());
    }

    #[tokio::test]
    async fn delay_never_exceeds_max_delay() {
        let policy =
            ExponentialBackoff::new(10, Duration::from_millis(100)).with_max_delay(Duration::from_millis(150));
        for attempt in 1..=10 {
            let delay = policy.delay_before(attempt).await.unwrap();
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn no_retry_never_grants_a_delay() {
        assert!(NoRetry.delay_before(1).await.is_none());
    }
}
