// src/error_recovery.rs
//! Retry/backoff controller for page requests.
//!
//! Rate limiting and transient failures are handled by separate budgets:
//! a 429 waits a fixed delay and re-issues the same request, indefinitely
//! unless a ceiling is configured; a transient failure backs off
//! exponentially for a bounded number of attempts. Fatal errors are
//! returned immediately.

use crate::constants::{
    DEFAULT_RATE_LIMIT_DELAY, DEFAULT_TRANSIENT_ATTEMPTS, DEFAULT_TRANSIENT_BACKOFF,
    DEFAULT_TRANSIENT_BACKOFF_CAP,
};
use crate::error::FetchError;
use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry tuning for one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Wait between rate-limited attempts.
    pub rate_limit_delay: Duration,
    /// Maximum rate-limit retries; `None` retries for as long as the API
    /// keeps throttling. A persistently throttled endpoint then never
    /// completes.
    pub max_rate_limit_retries: Option<u32>,
    /// Total attempts (first try included) for transient failures.
    pub transient_attempts: u32,
    /// First transient backoff; doubles per attempt.
    pub transient_backoff: Duration,
    /// Cap for the transient backoff.
    pub transient_backoff_cap: Duration,
    /// Upper bound of random jitter added to every wait. Zero disables it.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rate_limit_delay: DEFAULT_RATE_LIMIT_DELAY,
            max_rate_limit_retries: None,
            transient_attempts: DEFAULT_TRANSIENT_ATTEMPTS,
            transient_backoff: DEFAULT_TRANSIENT_BACKOFF,
            transient_backoff_cap: DEFAULT_TRANSIENT_BACKOFF_CAP,
            jitter: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    pub fn with_rate_limit_delay(self, delay: Duration) -> Self {
        Self {
            rate_limit_delay: delay,
            ..self
        }
    }

    /// Delay before re-issuing a throttled request.
    ///
    /// A server-provided `Retry-After` wins when it is longer than the
    /// configured delay.
    fn rate_limit_wait(&self, retry_after: Option<Duration>) -> Duration {
        let base = retry_after.map_or(self.rate_limit_delay, |ra| ra.max(self.rate_limit_delay));
        base + self.jitter_sample()
    }

    /// Delay before transient attempt `attempt + 1` (1-based `attempt`).
    fn transient_wait(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self
            .transient_backoff
            .saturating_mul(factor)
            .min(self.transient_backoff_cap);
        delay + self.jitter_sample()
    }

    fn jitter_sample(&self) -> Duration {
        if self.jitter.is_zero() {
            return Duration::ZERO;
        }
        let max_ms = self.jitter.as_millis().min(u64::MAX as u128) as u64;
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }
}

/// Per-request retry bookkeeping. Fresh for every logical request; never
/// shared between keys or persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitState {
    /// Number of 429 responses absorbed.
    pub rate_limit_retries: u32,
    /// Number of transient failures absorbed.
    pub transient_retries: u32,
    /// Total time spent waiting.
    pub waited: Duration,
}

impl RateLimitState {
    pub fn total_retries(&self) -> u32 {
        self.rate_limit_retries + self.transient_retries
    }

    /// Folds another request's bookkeeping into a running total.
    pub fn absorb(&mut self, other: &RateLimitState) {
        self.rate_limit_retries += other.rate_limit_retries;
        self.transient_retries += other.transient_retries;
        self.waited += other.waited;
    }
}

/// Runs `operation` until it succeeds, fails fatally, or exhausts its retry budget.
///
/// Returns the successful value together with the retry bookkeeping for the
/// request. Waits race against `cancel`; a cancelled wait returns
/// [`FetchError::Cancelled`].
pub async fn retry_with_backoff<F, T, Fut>(
    mut operation: F,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
) -> Result<(T, RateLimitState), FetchError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, FetchError>>,
{
    let mut state = RateLimitState::default();
    let mut transient_attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        // Dropping the in-flight future aborts the underlying HTTP call.
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            outcome = operation() => outcome,
        };
        let error = match outcome {
            Ok(value) => return Ok((value, state)),
            Err(e) => e,
        };

        let delay = match &error {
            FetchError::RateLimited { retry_after, .. } => {
                if let Some(max) = policy.max_rate_limit_retries {
                    if state.rate_limit_retries >= max {
                        log::error!(
                            "{}: still rate limited after {} retries, giving up",
                            label,
                            state.rate_limit_retries
                        );
                        return Err(error);
                    }
                }
                state.rate_limit_retries += 1;
                let delay = policy.rate_limit_wait(*retry_after);
                log::info!(
                    "{}: rate limit exceeded, retry {} in {:?}",
                    label,
                    state.rate_limit_retries,
                    delay
                );
                delay
            }
            FetchError::Transient { .. } => {
                transient_attempt += 1;
                if transient_attempt >= policy.transient_attempts {
                    log::error!(
                        "{}: failed after {} attempts: {}",
                        label,
                        transient_attempt,
                        error
                    );
                    return Err(error);
                }
                state.transient_retries += 1;
                let delay = policy.transient_wait(transient_attempt);
                log::warn!(
                    "{}: attempt {}/{} failed ({}), retrying after {:?}",
                    label,
                    transient_attempt,
                    policy.transient_attempts,
                    error,
                    delay
                );
                delay
            }
            FetchError::Fatal { .. } | FetchError::Cancelled => return Err(error),
        };

        tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        state.waited += delay;
    }
}
