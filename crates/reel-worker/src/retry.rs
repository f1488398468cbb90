//! Retry utilities with linear or exponential backoff.
//!
//! Retry is opt-in per call: wrap the specific operation that talks to a
//! flaky external service (object store, job store, generation service).

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `n * base`
    Linear,
    /// `base * 2^(n-1)`, capped
    Exponential,
    /// Uniform in `[base, exponential delay]`
    ExponentialJitter,
}

/// Retry behavior for one operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff: Backoff,
    /// Operation name for logs and metrics
    pub operation_name: String,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff: Backoff::ExponentialJitter,
            operation_name: "operation".to_string(),
        }
    }
}

impl RetryPolicy {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Same settings under another operation name.
    pub fn named(&self, operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..self.clone()
        }
    }

    /// Delay before retry `n` (1-based).
    pub fn delay_for_retry(&self, n: u32) -> Duration {
        let n = n.max(1);
        match self.backoff {
            Backoff::Linear => self.base_delay.saturating_mul(n),
            Backoff::Exponential => self.exponential(n),
            Backoff::ExponentialJitter => {
                let capped = self.exponential(n);
                if capped <= self.base_delay {
                    return capped;
                }
                let ms = rand::rng()
                    .random_range(self.base_delay.as_millis() as u64..=capped.as_millis() as u64);
                Duration::from_millis(ms)
            }
        }
    }

    fn exponential(&self, n: u32) -> Duration {
        let factor = 2u32.saturating_pow(n - 1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `operation` until it succeeds or attempts run out. The last error
    /// is returned unchanged.
    pub async fn run<F, Fut, T, E>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.run_if(|_| true, operation).await
    }

    /// Like [`run`](Self::run), but stops at the first error `should_retry` rejects.
    pub async fn run_if<P, F, Fut, T, E>(&self, should_retry: P, mut operation: F) -> Result<T, E>
    where
        P: Fn(&E) -> bool,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 1u32;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            operation = %self.operation_name,
                            attempt,
                            "Succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(e) if attempt < self.max_attempts && should_retry(&e) => {
                    let delay = self.delay_for_retry(attempt);
                    warn!(
                        operation = %self.operation_name,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Attempt failed, retrying: {}",
                        e
                    );
                    metrics::counter!(
                        "pipeline_retries_total",
                        "operation" => self.operation_name.clone()
                    )
                    .increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Suppresses log spam from background loops that fail repeatedly.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive_failures: u32,
    max_logged_failures: u32,
    suppressed: bool,
}

impl FailureTracker {
    pub fn new(max_logged_failures: u32) -> Self {
        Self {
            consecutive_failures: 0,
            max_logged_failures,
            suppressed: false,
        }
    }

    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 && self.suppressed {
            debug!(
                "Operation recovered after {} consecutive failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        self.suppressed = false;
    }

    /// Returns `true` if this failure should be logged.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;

        if self.consecutive_failures <= self.max_logged_failures {
            true
        } else {
            if !self.suppressed {
                self.suppressed = true;
                warn!(
                    "Suppressing further failure logs after {} consecutive failures",
                    self.max_logged_failures
                );
            }
            false
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }
}
