//! Capped exponential backoff for transient store failures.

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

/// Retry policy shared by the task store and the coordination store:
/// 3 retries, 0.5 s initial delay, doubling, capped at 5 s.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Run `op`, retrying every failure up to `max_retries` times.
    pub async fn run<T, E, F, Fut>(&self, op_name: &str, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.run_if(op_name, op, |_| true).await
    }

    /// Run `op`, retrying only failures for which `retryable` returns
    /// true. Non-retryable failures (integrity violations, bad input)
    /// propagate immediately.
    pub async fn run_if<T, E, F, Fut, P>(
        &self,
        op_name: &str,
        mut op: F,
        retryable: P,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut delay = self.initial_delay;

        for attempt in 0..=self.max_retries {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_retries && retryable(&err) => {
                    warn!(
                        "{} attempt {} failed: {}. Retrying in {:?}",
                        op_name,
                        attempt + 1,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.mul_f64(self.backoff_factor).min(self.max_delay);
                }
                Err(err) => {
                    if retryable(&err) {
                        error!(
                            "{} failed after {} attempts: {}",
                            op_name,
                            self.max_retries + 1,
                            err
                        );
                    }
                    return Err(err);
                }
            }
        }
        unreachable!("retry loop always returns")
    }
}
