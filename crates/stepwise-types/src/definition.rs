//! Workflow definitions: the ordered and grouped list of action keys a
//! workflow type executes.
//!
//! A definition is composed from blocks. A sequential block gives every entry
//! its own group; a concurrent block puts all its entries in one shared group.
//! `WorkflowDefinition::action_specs` expands the blocks into concrete
//! `(index, group_index, concurrent)` positions.

use serde::{Deserialize, Serialize};

/// One composition block of a definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionBlock {
    Sequential(Vec<String>),
    Concurrent(Vec<String>),
}

/// Immutable specification of a workflow type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Type name the definition is registered under.
    #[serde(rename = "type")]
    pub workflow_type: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    pub blocks: Vec<DefinitionBlock>,
}

/// Position of one action within a definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSpec {
    pub key: String,
    pub index: u32,
    pub group_index: u32,
    pub concurrent: bool,
}

impl WorkflowDefinition {
    pub fn builder(workflow_type: impl Into<String>) -> DefinitionBuilder {
        DefinitionBuilder::new(workflow_type)
    }

    /// Expand the blocks into indexed action positions, in declaration order.
    ///
    /// Indices and group indices both start at zero and increase by one per
    /// allocation. Empty blocks allocate nothing.
    pub fn action_specs(&self) -> Vec<ActionSpec> {
        let mut specs = Vec::new();
        let mut index = 0u32;
        let mut group = 0u32;

        for block in &self.blocks {
            match block {
                DefinitionBlock::Sequential(keys) => {
                    for key in keys {
                        specs.push(ActionSpec {
                            key: key.clone(),
                            index,
                            group_index: group,
                            concurrent: false,
                        });
                        index += 1;
                        group += 1;
                    }
                }
                DefinitionBlock::Concurrent(keys) if keys.is_empty() => {}
                DefinitionBlock::Concurrent(keys) => {
                    for key in keys {
                        specs.push(ActionSpec {
                            key: key.clone(),
                            index,
                            group_index: group,
                            concurrent: true,
                        });
                        index += 1;
                    }
                    group += 1;
                }
            }
        }

        specs
    }

    /// Every action key referenced by the definition.
    pub fn action_keys(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().flat_map(|block| match block {
            DefinitionBlock::Sequential(keys) | DefinitionBlock::Concurrent(keys) => {
                keys.iter().map(String::as_str)
            }
        })
    }
}

/// Builds a `WorkflowDefinition` block by block.
#[derive(Debug, Clone)]
pub struct DefinitionBuilder {
    definition: WorkflowDefinition,
}

impl DefinitionBuilder {
    pub fn new(workflow_type: impl Into<String>) -> Self {
        let workflow_type = workflow_type.into();
        Self {
            definition: WorkflowDefinition {
                name: workflow_type.clone(),
                workflow_type,
                blocks: Vec::new(),
            },
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.definition.name = name.into();
        self
    }

    /// Append one action that runs on its own.
    pub fn then(self, key: impl Into<String>) -> Self {
        self.sequential([key])
    }

    pub fn sequential<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        // Adjacent sequential blocks are equivalent to one.
        match self.definition.blocks.last_mut() {
            Some(DefinitionBlock::Sequential(existing)) => existing.extend(keys),
            _ => self.definition.blocks.push(DefinitionBlock::Sequential(keys)),
        }
        self
    }

    pub fn concurrent<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.definition.blocks.push(DefinitionBlock::Concurrent(
            keys.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn build(self) -> WorkflowDefinition {
        self.definition
    }
}
