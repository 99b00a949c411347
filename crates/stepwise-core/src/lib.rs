//! Orchestration engine and repository trait definitions for Stepwise.
//!
//! This crate defines the "ports" (repository, job queue, and delayed
//! callback traits) that the infrastructure layer implements. It depends
//! only on `stepwise-types` -- never on `stepwise-infra` or any database/IO
//! crate.

pub mod action;
pub mod dispatch;
pub mod event;
pub mod repository;
pub mod workflow;

#[cfg(test)]
mod testing;
