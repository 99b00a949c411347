//! Action factory registry.
//!
//! Maps a stable action key to a factory that builds the implementation.
//! Workflow definitions refer to actions only by key.

use std::collections::HashMap;
use std::sync::Arc;

use super::Action;
use super::box_action::BoxAction;

type ActionFactory = Arc<dyn Fn() -> BoxAction + Send + Sync>;

/// Registry of action factories, indexed by key.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    factories: HashMap<String, ActionFactory>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `key`, replacing any previous one.
    pub fn register<A, F>(&mut self, key: impl Into<String>, factory: F)
    where
        A: Action + 'static,
        F: Fn() -> A + Send + Sync + 'static,
    {
        self.factories
            .insert(key.into(), Arc::new(move || BoxAction::new(factory())));
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<A, F>(mut self, key: impl Into<String>, factory: F) -> Self
    where
        A: Action + 'static,
        F: Fn() -> A + Send + Sync + 'static,
    {
        self.register(key, factory);
        self
    }

    /// Build a fresh instance of the action registered under `key`.
    pub fn resolve(&self, key: &str) -> Option<BoxAction> {
        self.factories.get(key).map(|factory| factory())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use stepwise_types::workflow::ExecutionMode;

    use super::*;
    use crate::action::{ActionContext, ActionError, ActionOutput};

    struct Ping;

    impl Action for Ping {
        async fn execute(&self, _ctx: ActionContext) -> Result<ActionOutput, ActionError> {
            Ok(ActionOutput::new(json!("pong")))
        }
    }

    struct Deferred;

    impl Action for Deferred {
        async fn execute(&self, _ctx: ActionContext) -> Result<ActionOutput, ActionError> {
            Ok(ActionOutput::default())
        }

        fn mode(&self) -> ExecutionMode {
            ExecutionMode::QueuedAsync {
                queue: Some("slow".to_string()),
            }
        }
    }

    #[test]
    fn resolves_registered_keys_only() {
        let registry = ActionRegistry::new().with("ping", || Ping);
        assert!(registry.contains("ping"));
        assert!(registry.resolve("ping").is_some());
        assert!(registry.resolve("pong").is_none());
    }

    #[test]
    fn keys_are_sorted() {
        let registry = ActionRegistry::new()
            .with("zeta", || Ping)
            .with("alpha", || Ping);
        assert_eq!(registry.keys(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn boxed_action_keeps_declared_mode() {
        let registry = ActionRegistry::new()
            .with("ping", || Ping)
            .with("deferred", || Deferred);
        assert_eq!(registry.resolve("ping").unwrap().mode(), ExecutionMode::Inline);
        assert!(matches!(
            registry.resolve("deferred").unwrap().mode(),
            ExecutionMode::QueuedAsync { queue: Some(q) } if q == "slow"
        ));
    }
}
