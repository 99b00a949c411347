//! Workflow engine core: transition rules, durable checkpointing, action
//! execution, and the advancement loop.
//!
//! - `state_machine` -- the transition table and timestamp effects
//! - `registry` -- validated workflow definitions by type
//! - `retry` -- retry policy resolution and decisions
//! - `checkpoint` -- durable checkpoint manager
//! - `executor` -- runs one action according to its execution mode
//! - `machine` -- the `WorkflowMachine` every entry point goes through

pub mod checkpoint;
pub mod error;
pub mod executor;
pub mod machine;
pub mod registry;
pub mod retry;
pub mod state_machine;

pub use checkpoint::{CheckpointError, CheckpointManager};
pub use error::{DefinitionError, OrchestratorError};
pub use machine::WorkflowMachine;
pub use registry::WorkflowRegistry;
