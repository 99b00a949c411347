//! Retry policy resolution and failure classification.
//!
//! Stateless: the resolver holds only the process-wide default policy.

use std::time::Duration;

use stepwise_types::retry::RetryPolicy;

use crate::action::ActionError;

/// What to do after an action failure has been recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-execute after `delay`. `attempt` is the stored retry count.
    Retry { attempt: u32, delay: Duration },
    /// Retryable, but no attempts remain.
    Exhausted,
    /// Classified as never retryable.
    NotRetryable,
}

#[derive(Debug, Clone, Default)]
pub struct RetryResolver {
    default: RetryPolicy,
}

impl RetryResolver {
    pub fn new(default: RetryPolicy) -> Self {
        Self { default }
    }

    pub fn default_policy(&self) -> &RetryPolicy {
        &self.default
    }

    /// The action's declared policy, or the default.
    pub fn resolve(&self, declared: Option<RetryPolicy>) -> RetryPolicy {
        declared.unwrap_or_else(|| self.default.clone())
    }

    /// Non-retryable categories win; a declared retryable set is exclusive;
    /// otherwise everything is retried.
    pub fn is_retryable(policy: &RetryPolicy, error: &ActionError) -> bool {
        if policy.non_retryable.contains(&error.category) {
            return false;
        }
        if !policy.retryable.is_empty() {
            return policy.retryable.contains(&error.category);
        }
        true
    }

    /// Decide on the retry count written by the failure checkpoint.
    pub fn decide(policy: &RetryPolicy, retryable: bool, retry_count: u32, max_retries: u32) -> RetryDecision {
        if !retryable {
            return RetryDecision::NotRetryable;
        }
        if retry_count < max_retries {
            RetryDecision::Retry {
                attempt: retry_count,
                delay: policy.delay_for_attempt(retry_count),
            }
        } else {
            RetryDecision::Exhausted
        }
    }
}
