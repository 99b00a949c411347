//! Workflow type registry.
//!
//! Maps a workflow type name to its definition. Built once at boot and
//! validated against the action registry, so a registered definition can
//! never name an action the executor cannot resolve.

use std::collections::HashMap;

use stepwise_types::definition::WorkflowDefinition;
use stepwise_types::workflow::ExecutionMode;

use super::error::DefinitionError;
use crate::action::ActionRegistry;

#[derive(Debug, Clone, Default)]
pub struct WorkflowRegistry {
    definitions: HashMap<String, WorkflowDefinition>,
}

impl WorkflowRegistry {
    /// Build a registry from `definitions`, rejecting duplicates and
    /// unresolvable action keys, fallback keys included.
    pub fn build<I>(definitions: I, actions: &ActionRegistry) -> Result<Self, DefinitionError>
    where
        I: IntoIterator<Item = WorkflowDefinition>,
    {
        let mut registry = Self::default();
        for definition in definitions {
            registry.register(definition, actions)?;
        }
        Ok(registry)
    }

    pub fn register(
        &mut self,
        definition: WorkflowDefinition,
        actions: &ActionRegistry,
    ) -> Result<(), DefinitionError> {
        if definition.workflow_type.trim().is_empty() {
            return Err(DefinitionError::EmptyType);
        }
        if self.definitions.contains_key(&definition.workflow_type) {
            return Err(DefinitionError::DuplicateType(definition.workflow_type));
        }
        if let Some(missing) = definition.action_keys().find(|key| !actions.contains(key)) {
            return Err(DefinitionError::UnknownAction {
                workflow_type: definition.workflow_type.clone(),
                action: missing.to_string(),
            });
        }
        for key in definition.action_keys() {
            let Some(action) = actions.resolve(key) else {
                continue;
            };
            if let ExecutionMode::AwaitsExternalEvent {
                fallback_action: Some(fallback),
                ..
            } = action.mode()
            {
                if !actions.contains(&fallback) {
                    return Err(DefinitionError::UnknownFallback {
                        workflow_type: definition.workflow_type.clone(),
                        action: key.to_string(),
                        fallback,
                    });
                }
            }
        }

        tracing::debug!(
            workflow_type = definition.workflow_type.as_str(),
            actions = definition.action_keys().count(),
            "registered workflow type"
        );
        self.definitions
            .insert(definition.workflow_type.clone(), definition);
        Ok(())
    }

    pub fn get(&self, workflow_type: &str) -> Option<&WorkflowDefinition> {
        self.definitions.get(workflow_type)
    }

    /// Registered definitions, sorted by type name.
    pub fn definitions(&self) -> Vec<&WorkflowDefinition> {
        let mut defs: Vec<_> = self.definitions.values().collect();
        defs.sort_by(|a, b| a.workflow_type.cmp(&b.workflow_type));
        defs
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
