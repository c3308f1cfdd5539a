//! Retry utilities with exponential backoff and jitter.
//!
//! This module provides a generic executor for operations that may fail
//! transiently. Each failure is classified as retryable or terminal; terminal
//! failures abort at once, retryable ones are retried after a backoff delay
//! until the policy's attempt budget is spent. Waiting is cooperative with a
//! [`CancellationToken`].
//!
//! # Example
//!
//! ```rust,no_run
//! use platform_reconcile::api::ApiError;
//! use platform_reconcile::retry::{execute, RetryPolicy};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn example() {
//!     let cancel = CancellationToken::new();
//!     let policy = RetryPolicy::api();
//!
//!     let result = execute(&cancel, &policy, "get_project", || async {
//!         // Your operation here
//!         Ok::<_, ApiError>("project-id".to_string())
//!     })
//!     .await;
//!
//!     if let Ok(outcome) = result {
//!         println!("{} after {} attempt(s)", outcome.value, outcome.attempts);
//!     }
//! }
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::error::ErrorKind;

/// Message fragments treated as transient when an error carries no explicit
/// retryability hint.
pub const DEFAULT_RETRYABLE_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "connection refused",
    "connection reset",
    "temporarily unavailable",
    "rate limit",
    "429",
    "500",
    "502",
    "503",
    "504",
];

/// Errors that can tell whether they are worth retrying.
///
/// Errors produced by this crate's transport set an explicit hint where they
/// originate. Errors from uncontrolled sources return `None` and are
/// classified by matching their message against the policy's patterns.
pub trait Classify: std::fmt::Display {
    /// Explicit retryability, if known.
    fn retryable_hint(&self) -> Option<bool> {
        None
    }
}

impl Classify for std::io::Error {}

/// Retry policy.
///
/// Controls how many times an operation is attempted and how long to wait
/// between attempts. Policies are plain values; use the named constructors
/// for the standard presets and the `with_*` methods to adjust them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (0 is treated as 1)
    pub max_attempts: u32,

    /// Delay before the second attempt
    pub initial_delay: Duration,

    /// Upper bound for any single delay (before jitter)
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each attempt
    pub backoff_factor: f64,

    /// Symmetric random spread applied to each delay, in `[0.0, 1.0]`
    pub jitter_factor: f64,

    /// Case-insensitive message fragments marking an error as transient
    pub retryable_patterns: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::api()
    }
}

impl RetryPolicy {
    /// Policy for ordinary platform API calls.
    pub fn api() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            jitter_factor: 0.1,
            retryable_patterns: default_patterns(),
        }
    }

    /// Policy for calls that mostly fail on network blips.
    ///
    /// More attempts with shorter delays than [`RetryPolicy::api`].
    pub fn network() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            jitter_factor: 0.2,
            retryable_patterns: default_patterns(),
        }
    }

    /// Policy for calls rejected by server-side rate limiting.
    ///
    /// Long delays with wide jitter so concurrent pipelines spread out.
    pub fn rate_limit() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff_factor: 3.0,
            jitter_factor: 0.25,
            retryable_patterns: default_patterns(),
        }
    }

    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 1.0,
            jitter_factor: 0.0,
            retryable_patterns: default_patterns(),
        }
    }

    /// Set the attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the initial and maximum delays.
    pub fn with_delays(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.max_delay = max_delay;
        self
    }

    /// Set the backoff multiplier.
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Set the jitter factor (clamped to `[0.0, 1.0]`).
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter_factor = jitter.clamp(0.0, 1.0);
        self
    }

    /// Replace the retryable message patterns.
    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retryable_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Jitter-free delay to wait after failed attempt `attempt` (1-based).
    ///
    /// Equals `min(initial_delay × backoff_factor^(attempt−1), max_delay)`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.initial_delay.as_nanos() as f64 * self.backoff_factor.powi(exponent);
        let capped = scaled.min(self.max_delay.as_nanos() as f64).max(0.0);
        Duration::from_nanos(capped.round() as u64)
    }

    /// Delay after failed attempt `attempt`, with jitter applied.
    ///
    /// The result lies in `[base × (1 − j), base × (1 + j)]` and is never
    /// negative.
    pub fn jittered_delay<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(attempt).as_nanos() as f64;
        let jitter = self.jitter_factor.clamp(0.0, 1.0);
        if jitter == 0.0 || base == 0.0 {
            return Duration::from_nanos(base as u64);
        }
        let range = base * jitter;
        let offset = rng.gen::<f64>() * range * 2.0 - range;
        Duration::from_nanos((base + offset).max(0.0).round() as u64)
    }

    /// Classify an error.
    ///
    /// An explicit hint on the error wins; otherwise the message is matched
    /// case-insensitively against `retryable_patterns`.
    pub fn is_retryable<E: Classify + ?Sized>(&self, error: &E) -> bool {
        error
            .retryable_hint()
            .unwrap_or_else(|| self.matches_pattern(&error.to_string()))
    }

    /// Check a message against `retryable_patterns`.
    pub fn matches_pattern(&self, message: &str) -> bool {
        let message = message.to_lowercase();
        self.retryable_patterns
            .iter()
            .any(|p| !p.is_empty() && message.contains(&p.to_lowercase()))
    }
}

fn default_patterns() -> Vec<String> {
    DEFAULT_RETRYABLE_PATTERNS
        .iter()
        .map(|p| p.to_string())
        .collect()
}

/// Successful outcome of a retried call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryResult<T> {
    /// Value returned by the successful attempt
    pub value: T,

    /// Number of invocations made, including the successful one
    pub attempts: u32,

    /// Sum of all delays waited between attempts
    pub total_delay: Duration,
}

impl<T> RetryResult<T> {
    /// Add the statistics of an earlier round of the same call.
    pub fn with_prior(mut self, prior_attempts: u32, prior_delay: Duration) -> Self {
        self.attempts += prior_attempts;
        self.total_delay += prior_delay;
        self
    }
}

/// Failed outcome of a retried call.
#[derive(Debug, Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    /// Failure classified as transient, still failing when attempts ran out
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    Retryable {
        /// Operation name
        operation: String,
        /// Number of invocations made
        attempts: u32,
        /// Sum of all delays waited
        total_delay: Duration,
        /// Last underlying error
        #[source]
        source: E,
    },

    /// Failure classified as permanent
    #[error("{operation} failed: {source}")]
    NonRetryable {
        /// Operation name
        operation: String,
        /// Number of invocations made
        attempts: u32,
        /// Underlying error
        #[source]
        source: E,
    },

    /// Cancelled before an attempt or while waiting between attempts
    #[error("{operation} cancelled after {attempts} attempt(s)")]
    Timeout {
        /// Operation name
        operation: String,
        /// Number of invocations made before cancellation
        attempts: u32,
        /// Sum of all completed delays
        total_delay: Duration,
        /// Error of the last attempt, if one was made
        last_error: Option<E>,
    },
}

impl<E: std::error::Error + 'static> RetryError<E> {
    /// The kind tag of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RetryError::Retryable { .. } => ErrorKind::Retryable,
            RetryError::NonRetryable { .. } => ErrorKind::NonRetryable,
            RetryError::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    /// Number of invocations made.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Retryable { attempts, .. }
            | RetryError::NonRetryable { attempts, .. }
            | RetryError::Timeout { attempts, .. } => *attempts,
        }
    }

    /// Sum of all delays waited.
    pub fn total_delay(&self) -> Duration {
        match self {
            RetryError::Retryable { total_delay, .. } | RetryError::Timeout { total_delay, .. } => {
                *total_delay
            }
            RetryError::NonRetryable { .. } => Duration::ZERO,
        }
    }

    /// Add the statistics of an earlier round of the same call.
    pub fn with_prior(mut self, prior_attempts: u32, prior_delay: Duration) -> Self {
        match &mut self {
            RetryError::Retryable {
                attempts,
                total_delay,
                ..
            }
            | RetryError::Timeout {
                attempts,
                total_delay,
                ..
            } => {
                *attempts += prior_attempts;
                *total_delay += prior_delay;
            }
            RetryError::NonRetryable { attempts, .. } => *attempts += prior_attempts,
        }
        self
    }

    /// The last underlying error, if an attempt was made.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Retryable { source, .. } | RetryError::NonRetryable { source, .. } => {
                Some(source)
            }
            RetryError::Timeout { last_error, .. } => last_error.as_ref(),
        }
    }
}

/// Execute an operation under a retry policy.
///
/// The operation is invoked up to `policy.max_attempts` times. The loop stops
/// at the first success, at the first error classified as terminal, when the
/// attempt budget is spent, or when `cancel` fires. Cancellation is checked
/// before every attempt and raced against every backoff wait.
///
/// # Arguments
///
/// * `cancel` - Cancellation token for the surrounding run
/// * `policy` - Retry policy
/// * `operation` - Operation name used in events and errors
/// * `f` - Function to execute (must be `FnMut` and return a `Future`)
///
/// # Returns
///
/// The value with attempt statistics, or a [`RetryError`] telling apart
/// terminal failures, exhausted retries and cancellation
pub async fn execute<F, Fut, T, E>(
    cancel: &CancellationToken,
    policy: &RetryPolicy,
    operation: &str,
    mut f: F,
) -> Result<RetryResult<T>, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + std::error::Error + 'static,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    let mut total_delay = Duration::ZERO;
    let mut last_error = None;

    loop {
        if cancel.is_cancelled() {
            tracing::warn!(
                operation = operation,
                attempts = attempt,
                "Operation cancelled before attempt"
            );
            return Err(RetryError::Timeout {
                operation: operation.to_string(),
                attempts: attempt,
                total_delay,
                last_error,
            });
        }

        attempt += 1;

        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(
                        operation = operation,
                        attempts = attempt,
                        total_delay_ms = total_delay.as_millis() as u64,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(RetryResult {
                    value,
                    attempts: attempt,
                    total_delay,
                });
            }
            Err(e) if !policy.is_retryable(&e) => {
                tracing::debug!(
                    operation = operation,
                    attempt = attempt,
                    error = %e,
                    "Error is not retryable, returning immediately"
                );
                return Err(RetryError::NonRetryable {
                    operation: operation.to_string(),
                    attempts: attempt,
                    source: e,
                });
            }
            Err(e) if attempt >= max_attempts => {
                tracing::error!(
                    operation = operation,
                    attempts = attempt,
                    total_delay_ms = total_delay.as_millis() as u64,
                    error = %e,
                    "All retry attempts exhausted"
                );
                return Err(RetryError::Retryable {
                    operation: operation.to_string(),
                    attempts: attempt,
                    total_delay,
                    source: e,
                });
            }
            Err(e) => {
                let delay = policy.jittered_delay(attempt, &mut rand::thread_rng());
                tracing::warn!(
                    operation = operation,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                last_error = Some(e);

                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::warn!(
                            operation = operation,
                            attempts = attempt,
                            "Operation cancelled during backoff"
                        );
                        return Err(RetryError::Timeout {
                            operation: operation.to_string(),
                            attempts: attempt,
                            total_delay,
                            last_error,
                        });
                    }
                    _ = sleep(delay) => {
                        total_delay += delay;
                    }
                }
            }
        }
    }
}
