//! Retry policy declared by an action or configured process-wide.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Attempts, base delay and backoff mode for one action.
///
/// `retryable` and `non_retryable` hold error categories. When both are empty
/// every error is retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total executions allowed, the first run included. A failure that
    /// brings `retry_count` up to this value is terminal.
    pub max_attempts: u32,
    /// Base delay between attempts, in seconds.
    pub delay_secs: u64,
    /// Double the delay on every further attempt.
    pub backoff: bool,
    /// When non-empty, only these categories are retried.
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub retryable: BTreeSet<String>,
    /// Categories that are never retried. Checked before `retryable`.
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub non_retryable: BTreeSet<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_secs: 5,
            backoff: true,
            retryable: BTreeSet::new(),
            non_retryable: BTreeSet::new(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay_secs: u64, backoff: bool) -> Self {
        Self {
            max_attempts,
            delay_secs,
            backoff,
            ..Self::default()
        }
    }

    pub fn retry_on<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retryable.extend(categories.into_iter().map(Into::into));
        self
    }

    pub fn never_retry_on<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.non_retryable
            .extend(categories.into_iter().map(Into::into));
        self
    }

    /// Delay before retry number `attempt` (1-based):
    /// `delay * 2^(attempt-1)` with backoff, otherwise `delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let secs = if self.backoff {
            let exponent = attempt.max(1) - 1;
            let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
            self.delay_secs.saturating_mul(factor)
        } else {
            self.delay_secs
        };
        Duration::from_secs(secs)
    }
}
