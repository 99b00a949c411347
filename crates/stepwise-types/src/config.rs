//! Orchestrator configuration types for Stepwise.
//!
//! `OrchestratorConfig` represents the `stepwise.toml` file in the data
//! directory. Every section has defaults, so an empty file is valid.

use serde::{Deserialize, Serialize};

use crate::definition::WorkflowDefinition;
use crate::retry::RetryPolicy;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Process-wide retry policy for actions that declare none.
    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub events: EventConfig,

    /// Workflow types declared in configuration rather than code.
    #[serde(default)]
    pub workflows: Vec<WorkflowDefinition>,
}

/// How queued actions and delayed callbacks are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchDriver {
    /// Persisted in the callback table and drained by the dispatcher.
    #[default]
    Durable,
    /// Queued actions run inline on the scheduler's task.
    Sync,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub driver: DispatchDriver,
    /// Queue name used when an action does not name one.
    pub default_queue: String,
    pub poll_interval_ms: u64,
    /// Maximum callbacks claimed per poll.
    pub batch_size: u32,
    /// Seconds after which a claimed but unfinished callback is reclaimed.
    pub claim_lease_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            driver: DispatchDriver::Durable,
            default_queue: "default".to_string(),
            poll_interval_ms: 500,
            batch_size: 32,
            claim_lease_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Broadcast channel capacity.
    pub capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: OrchestratorConfig = toml::from_str("").unwrap();
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.dispatch.driver, DispatchDriver::Durable);
        assert_eq!(config.dispatch.default_queue, "default");
        assert_eq!(config.events.capacity, 1024);
        assert!(config.workflows.is_empty());
    }

    #[test]
    fn test_full_config() {
        let toml_str = r#"
[retry]
max_attempts = 5
delay_secs = 10

[dispatch]
driver = "sync"
poll_interval_ms = 100

[[workflows]]
type = "order"
name = "Order fulfillment"
blocks = [
  { sequential = ["reserve-stock"] },
  { concurrent = ["charge-card", "send-email"] },
]
"#;
        let config: OrchestratorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.retry.backoff);
        assert_eq!(config.dispatch.driver, DispatchDriver::Sync);
        assert_eq!(config.dispatch.poll_interval_ms, 100);
        assert_eq!(config.dispatch.batch_size, 32);
        assert_eq!(config.workflows.len(), 1);
        assert_eq!(config.workflows[0].action_keys().count(), 3);
    }
}
