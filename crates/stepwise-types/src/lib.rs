//! Shared domain types for Stepwise.
//!
//! This crate contains the core domain types used across the orchestrator:
//! workflows, actions, definitions, retry policies, events, configuration,
//! and the repository error type.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod definition;
pub mod error;
pub mod event;
pub mod retry;
pub mod workflow;
