//! Warehouse collaborator interface.
//!
//! The engine never talks to a query engine directly.  It validates SQL with
//! [`Warehouse::dry_run`], pulls rows lazily from
//! [`Warehouse::execute_rows`] and reads table metadata through
//! [`Warehouse::describe`].

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// One result row, keyed by column name.
pub type Row = serde_json::Map<String, Value>;

/// Lazy, finite, non-restartable sequence of rows.
pub type RowStream = BoxStream<'static, Result<Row>>;

/// Identifies the data mart a run queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataMartRef {
    pub project_id: String,
    pub data_mart_id: String,
}

/// Outcome of a dry-run over candidate SQL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DryRunResult {
    /// The engine accepted the statement.
    pub is_valid: bool,
    /// Engine message when the statement was rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Bytes the engine expects the query to scan, when it can estimate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_bytes: Option<u64>,
}

impl DryRunResult {
    /// A passing dry-run with an optional byte estimate.
    pub fn valid(estimated_bytes: Option<u64>) -> Self {
        Self {
            is_valid: true,
            error: None,
            estimated_bytes,
        }
    }

    /// A rejected statement.
    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error: Some(error.into()),
            estimated_bytes: None,
        }
    }
}

/// A query engine the SQL state machine can validate and execute against.
///
/// Implementations are shared read-only across runs.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Estimate validity and cost of `sql` without materialising results.
    async fn dry_run(&self, target: &DataMartRef, sql: &str) -> Result<DryRunResult>;

    /// Start executing `sql` and return a stream of at most `limit` rows.
    ///
    /// Errors returned here, or yielded by the stream, are execution faults.
    async fn execute_rows(&self, target: &DataMartRef, sql: &str, limit: u64) -> Result<RowStream>;

    /// Describe the tables and columns of the data mart as JSON.
    async fn describe(&self, target: &DataMartRef) -> Result<Value>;
}
