//! Infrastructure layer for Stepwise.
//!
//! Contains implementations of the ports defined in `stepwise-core`: the
//! SQLite workflow store, the durable callback table that serves as job queue
//! and timer, the dispatcher that drains it, and the TOML configuration
//! loader.

pub mod config;
pub mod dispatch;
pub mod sqlite;
