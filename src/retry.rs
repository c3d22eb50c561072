use std::future::Future;
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::warn;

/// Bounded exponential backoff shared by every component that talks to a
/// remote API. Which errors are worth another attempt is decided per call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first call included.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Self::default()
        }
    }

    /// Retries without sleeping between attempts.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Sleep schedule between attempts: `2 * base`, `4 * base`, ... capped at
    /// `max_delay`. One entry per retry.
    pub fn delays(&self) -> Vec<Duration> {
        let factor = self.base_delay.as_millis().min(u64::MAX as u128) as u64;
        let retries = self.max_attempts.saturating_sub(1);
        let schedule = ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max_delay)
            .take(retries);

        if self.jitter {
            schedule.map(jitter).collect()
        } else {
            schedule.collect()
        }
    }

    /// Runs `action` until it succeeds, fails with an error `is_retryable`
    /// rejects, or the attempt budget is spent.
    pub async fn run<T, E, A, Fut, P>(
        &self,
        label: &str,
        action: A,
        is_retryable: P,
    ) -> Result<T, E>
    where
        A: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let condition = |error: &E| {
            let retry = is_retryable(error);
            if retry {
                warn!("{} failed with retryable error: {}, backing off", label, error);
            }
            retry
        };

        RetryIf::spawn(self.delays(), action, condition).await
    }
}
