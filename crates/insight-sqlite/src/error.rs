//! Error types for the insight-sqlite crate.

use insight_agent::AgentError;
use thiserror::Error;

/// Alias for `Result<T, WarehouseError>`.
pub type WarehouseResult<T> = Result<T, WarehouseError>;

/// Errors raised by the SQLite warehouse.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The statement would modify the database.
    #[error("statement is not read-only")]
    NotReadOnly,

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for WarehouseError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}

impl From<WarehouseError> for AgentError {
    fn from(err: WarehouseError) -> Self {
        AgentError::Warehouse {
            reason: err.to_string(),
        }
    }
}
