//! SQLite storage layer.
//!
//! Repository and callback-table implementations backed by SQLite with WAL
//! mode and split read/write connection pools.

pub mod callback;
pub mod pool;
pub mod workflow;

use chrono::{DateTime, SecondsFormat, Utc};
use stepwise_types::error::RepositoryError;
use uuid::Uuid;

pub use callback::SqliteCallbackStore;
pub use pool::DatabasePool;
pub use workflow::SqliteWorkflowRepository;

pub(crate) fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width RFC 3339 in UTC, so stored timestamps sort lexically.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}
