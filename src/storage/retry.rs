//! Bounded retry for statements contending on the store file

use std::thread::sleep;
use std::time::Duration;

use rand::Rng;
use rusqlite::ErrorCode;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Delay schedule between attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Retry straight away
    #[default]
    Immediate,
    /// Wait `step_ms * attempt`
    Linear { step_ms: u64 },
    /// Full jitter over an exponential ceiling capped at `max_ms`
    Jittered { base_ms: u64, max_ms: u64 },
}

impl Backoff {
    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Immediate => Duration::ZERO,
            Backoff::Linear { step_ms } => {
                Duration::from_millis(step_ms.saturating_mul(attempt as u64))
            }
            Backoff::Jittered { base_ms, max_ms } => {
                let exp = attempt.saturating_sub(1).min(32);
                let ceiling = base_ms.saturating_mul(1u64 << exp).min(*max_ms);
                if ceiling == 0 {
                    return Duration::ZERO;
                }
                Duration::from_millis(rand::rng().random_range(0..=ceiling))
            }
        }
    }
}

/// Which failures consume another attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetryOn {
    /// Every failure is retried, malformed statements included
    #[default]
    AnyError,
    /// Only busy/locked conflicts are retried
    BusyOnly,
}

/// Attempt budget plus backoff and classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub retry_on: RetryOn,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_on: RetryOn::AnyError,
            backoff: Backoff::Immediate,
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    fn should_retry(&self, err: &rusqlite::Error) -> bool {
        match self.retry_on {
            RetryOn::AnyError => true,
            RetryOn::BusyOnly => is_busy_error(err),
        }
    }

    /// Run `attempt_fn` until it succeeds or the budget runs out.
    ///
    /// Exhaustion is reported through `tracing` and returned as
    /// [`Error::RetriesExhausted`]; a non-retryable failure under
    /// [`RetryOn::BusyOnly`] comes back as [`Error::Rejected`].
    pub fn run<T>(
        &self,
        statement: &str,
        mut attempt_fn: impl FnMut() -> rusqlite::Result<T>,
    ) -> Result<T> {
        let budget = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match attempt_fn() {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(attempt, "statement succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if !self.should_retry(&err) => {
                    tracing::error!(
                        statement = summarize(statement),
                        error = %err,
                        "statement failed with a non-retryable error"
                    );
                    return Err(Error::Rejected { source: err });
                }
                Err(err) if attempt < budget => {
                    let delay = self.backoff.delay(attempt);
                    tracing::debug!(
                        attempt,
                        budget,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "statement failed, retrying"
                    );
                    if !delay.is_zero() {
                        sleep(delay);
                    }
                    attempt += 1;
                }
                Err(err) => {
                    tracing::error!(
                        statement = summarize(statement),
                        attempts = budget,
                        error = %err,
                        "statement failed after exhausting retry budget"
                    );
                    return Err(Error::RetriesExhausted {
                        attempts: budget,
                        source: err,
                    });
                }
            }
        }
    }
}

/// True for SQLite busy/locked conflicts between connections
pub fn is_busy_error(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, _) => {
            matches!(code.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        }
        _ => {
            let msg = err.to_string().to_ascii_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
    }
}

/// First line of a statement, for log fields
fn summarize(statement: &str) -> &str {
    statement
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
}
