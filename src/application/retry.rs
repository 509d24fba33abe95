use crate::error::{PaymentError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::warn;

/// Jittered exponential backoff for activity calls.
///
/// Only errors that report themselves as retryable are retried; ledger
/// rejections and validation failures surface immediately. Each attempt is
/// bounded by `step_timeout`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_pct: f64,
    pub step_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: usize,
        base_delay_ms: u64,
        max_delay_ms: u64,
        jitter_pct: f64,
        step_timeout: Duration,
    ) -> Self {
        let clamped_base = base_delay_ms.max(1);
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms: clamped_base,
            max_delay_ms: max_delay_ms.max(clamped_base),
            jitter_pct: jitter_pct.clamp(0.0, 1.0),
            step_timeout,
        }
    }

    /// One attempt, no backoff. Useful for tests that want failures to surface.
    pub fn no_retry() -> Self {
        Self::new(1, 1, 1, 0.0, Duration::from_secs(300))
    }

    fn next_delay(&self, attempt: usize) -> Duration {
        let exp = 2_u64.saturating_pow(attempt as u32);
        let delay = self
            .base_delay_ms
            .saturating_mul(exp)
            .min(self.max_delay_ms);
        let jittered = if self.jitter_pct > 0.0 {
            let spread = (delay as f64 * self.jitter_pct) as i64;
            let delta = rand::thread_rng().gen_range(-spread..=spread);
            delay.saturating_add_signed(delta)
        } else {
            delay
        };
        Duration::from_millis(jittered)
    }

    /// Runs `op` until it succeeds, fails permanently or attempts run out.
    pub async fn run<F, Fut, T>(&self, name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            let result = match timeout(self.step_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(PaymentError::TimeoutError(name.to_string())),
            };
            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        warn!(step = name, attempts = attempt, error = %err, "giving up on step");
                        return Err(err);
                    }
                    let delay = self.next_delay(attempt - 1);
                    warn!(
                        step = name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying step"
                    );
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, 250, 5_000, 0.2, Duration::from_secs(300))
    }
}
