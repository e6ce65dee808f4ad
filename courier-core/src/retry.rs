//! # Retry Executor
//!
//! Issues a request until it succeeds or the [`RetryPolicy`] gives up. Every failed
//! outcome is decorated first ([`crate::status::decorate_status`]) and the decorated
//! status is what the policy's predicate looks at; an error that cannot be decorated is
//! surfaced immediately and never retried.
//!
//! Attempts are strictly sequential: attempt `n + 1` is only issued once attempt `n` has
//! failed and the backoff delay has elapsed. With `max_retries = 2` a call makes at most
//! three attempts.
//!
//! The executor is agnostic to what an attempt produces, so the same loop drives unary
//! calls (the outcome is the response) and server streams (the outcome is the started
//! stream).
use crate::{error::CallError, status::DecoratedStatus, stub::StubError};
use rand::Rng;
use std::{fmt, future::Future, sync::Arc, time::Duration};

/// Decides whether a decorated failure is worth another attempt.
pub type RetryPredicate = Arc<dyn Fn(&DecoratedStatus) -> bool + Send + Sync>;

/// Default configuration values.
pub mod defaults {
    use std::time::Duration;

    /// Default maximum number of retries.
    pub const MAX_RETRIES: u32 = 3;

    /// Delay before the first retry.
    pub const BASE_DELAY: Duration = Duration::from_secs(1);

    /// Upper bound of the random delay added to every backoff.
    pub const JITTER: Duration = Duration::from_secs(1);

    /// Maximum delay between two attempts.
    pub const MAX_DELAY: Duration = Duration::from_secs(64);
}

/// Exponential backoff: `base_delay * 2^(retry - 1)` plus up to `jitter`, capped at
/// `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base_delay: Duration,
    pub jitter: Duration,
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay: defaults::BASE_DELAY,
            jitter: defaults::JITTER,
            max_delay: defaults::MAX_DELAY,
        }
    }
}

impl Backoff {
    /// Retry immediately.
    pub fn none() -> Self {
        Self {
            base_delay: Duration::ZERO,
            jitter: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let exponential = self.base_delay.saturating_mul(1 << exponent);

        let jitter = match u64::try_from(self.jitter.as_millis()) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(max) => Duration::from_millis(rand::rng().random_range(0..=max)),
        };

        exponential.saturating_add(jitter).min(self.max_delay)
    }
}

/// Retry configuration of a single call.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt.
    pub max_retries: u32,
    /// Attempts made so far; advanced only by the executor.
    pub current_attempt: u32,
    pub should_retry: RetryPredicate,
    pub backoff: Backoff,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("current_attempt", &self.current_attempt)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(defaults::MAX_RETRIES)
    }
}

impl RetryPolicy {
    /// A policy retrying the default retryable HTTP codes.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            current_attempt: 0,
            should_retry: Arc::new(crate::status::should_retry),
            backoff: Backoff::default(),
        }
    }

    pub fn no_retry() -> Self {
        Self::new(0)
    }

    pub fn with_should_retry(
        mut self,
        predicate: impl Fn(&DecoratedStatus) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Arc::new(predicate);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// This policy with every field set in `overrides` replaced.
    pub fn merged(&self, overrides: &RetryOverrides) -> Self {
        Self {
            max_retries: overrides.max_retries.unwrap_or(self.max_retries),
            current_attempt: 0,
            should_retry: overrides
                .should_retry
                .clone()
                .unwrap_or_else(|| self.should_retry.clone()),
            backoff: overrides.backoff.unwrap_or(self.backoff),
        }
    }
}

/// Per-call overrides of the pipeline's default [`RetryPolicy`].
#[derive(Clone, Default)]
pub struct RetryOverrides {
    pub max_retries: Option<u32>,
    pub should_retry: Option<RetryPredicate>,
    pub backoff: Option<Backoff>,
}

impl fmt::Debug for RetryOverrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOverrides")
            .field("max_retries", &self.max_retries)
            .field("should_retry", &self.should_retry.as_ref().map(|_| ".."))
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl RetryOverrides {
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn should_retry(
        mut self,
        predicate: impl Fn(&DecoratedStatus) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }
}

/// Drives one logical call through its attempts.
#[derive(Debug)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.policy.current_attempt
    }

    /// Repeatedly calls `issue` with the 1-based attempt number.
    ///
    /// # Returns
    ///
    /// * `Ok(T)` - The first successful outcome, unchanged.
    /// * `Err(CallError::Rpc)` - The last decorated failure once retries are exhausted or
    ///   the failure is not retry-worthy.
    /// * `Err(CallError::Transport)` - A failure that could not be decorated.
    pub async fn run<T, F, Fut>(&mut self, mut issue: F) -> Result<T, CallError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StubError>>,
    {
        loop {
            self.policy.current_attempt += 1;
            let attempt = self.policy.current_attempt;

            tracing::debug!(attempt, "issuing request");

            let error = match issue(attempt).await {
                Ok(outcome) => return Ok(outcome),
                Err(error) => error,
            };

            let Some(status) = error.decorate() else {
                return Err(CallError::Transport(error));
            };

            let retry = attempt <= self.policy.max_retries && (self.policy.should_retry)(&status);
            if !retry {
                return Err(CallError::Rpc(status));
            }

            let delay = self.policy.backoff.delay(attempt);
            tracing::warn!(
                attempt,
                code = status.code,
                message = %status.message,
                ?delay,
                "request failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
