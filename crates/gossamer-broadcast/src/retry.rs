//! Retry policy and backoff schedule for delivery attempts.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// How the delay grows between failed attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// `initial_delay * 2^n` after the n-th failure (zero-based)
    Exponential,
    /// As `Exponential`, plus up to 10% random extra
    ExponentialWithJitter,
}

impl BackoffStrategy {
    /// Delay following zero-based failed attempt `failed`, capped at `cap`
    pub fn delay_after(&self, failed: u32, initial: Duration, cap: Duration) -> Duration {
        let doubled = initial.saturating_mul(2u32.saturating_pow(failed));
        let delay = match self {
            BackoffStrategy::Exponential => doubled,
            BackoffStrategy::ExponentialWithJitter => {
                use rand::Rng;
                let extra = doubled.mul_f64(0.1 * rand::thread_rng().gen::<f64>());
                doubled.saturating_add(extra)
            }
        };
        delay.min(cap)
    }
}

/// Attempt budget and backoff for one delivery.
///
/// `max_attempts` counts every call, the first one included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
}

impl RetryPolicy {
    /// 3 attempts, 50ms then doubling, capped at 5s
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            strategy: BackoffStrategy::Exponential,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, enable: bool) -> Self {
        self.strategy = if enable {
            BackoffStrategy::ExponentialWithJitter
        } else {
            BackoffStrategy::Exponential
        };
        self
    }

    pub fn delay_after(&self, failed: u32) -> Duration {
        self.strategy
            .delay_after(failed, self.initial_delay, self.max_delay)
    }

    /// Call `attempt(n)` until it succeeds or the budget runs out.
    ///
    /// Backoff sleeps sit between attempts only; the last failure returns at
    /// once. A zero budget still makes one call.
    pub async fn retry<F, Fut, T, E>(&self, mut attempt: F) -> RetryResult<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let budget = self.max_attempts.max(1);
        let mut slept = Duration::ZERO;
        let mut n = 0;

        loop {
            let result = attempt(n).await;
            n += 1;
            if result.is_ok() || n >= budget {
                return RetryResult {
                    result,
                    attempts: n,
                    total_retry_delay: slept,
                };
            }

            let delay = self.delay_after(n - 1);
            slept += delay;
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

/// Final result of [`RetryPolicy::retry`] with attempt accounting
#[derive(Debug, Clone)]
pub struct RetryResult<T, E> {
    pub result: Result<T, E>,
    pub attempts: u32,
    /// Time spent in backoff sleeps
    pub total_retry_delay: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn exponential_delays_double_and_cap() {
        let policy = RetryPolicy::exponential().with_max_delay(Duration::from_millis(150));
        assert_eq!(policy.delay_after(0), Duration::from_millis(50));
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(150));
        assert_eq!(policy.delay_after(40), Duration::from_millis(150));
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let policy = RetryPolicy::exponential().with_jitter(true);
        for _ in 0..32 {
            let delay = policy.delay_after(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(110));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts_without_trailing_sleep() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::exponential();

        let outcome = policy
            .retry(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("down") }
            })
            .await;

        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.total_retry_delay, Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_first_success() {
        let policy = RetryPolicy::exponential();

        let outcome = policy
            .retry(|n| async move {
                if n == 1 {
                    Ok(n)
                } else {
                    Err("flaky")
                }
            })
            .await;

        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.result, Ok(1));
        assert_eq!(outcome.total_retry_delay, Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_still_tries_once() {
        let policy = RetryPolicy::exponential().with_max_attempts(0);
        let outcome = policy.retry(|_| async { Err::<(), _>(()) }).await;
        assert_eq!(outcome.attempts, 1);
    }
}
