use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Attempt budget with a linearly growing pause: `base * n` after the n-th failure.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Pause after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Calls `op` until it yields `Some` or the budget runs out. Exhaustion is
    /// reported as `None`; it is up to the caller whether that is fatal.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Option<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        for attempt in 1..=self.max_attempts {
            if let Some(value) = op(attempt).await {
                return Some(value);
            }
            if attempt < self.max_attempts {
                let delay = self.delay_after(attempt);
                warn!(
                    "Retrying {what} in {:.1}s (attempt {attempt}/{})",
                    delay.as_secs_f64(),
                    self.max_attempts,
                );
                tokio::time::sleep(delay).await;
            }
        }
        warn!("Giving up on {what} after {} attempts", self.max_attempts);
        None
    }
}
