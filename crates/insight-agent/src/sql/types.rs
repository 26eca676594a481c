//! Data types for the SQL validate, execute and repair sub-task.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::warehouse::Row;

// ---------------------------------------------------------------------------
// Query plan
// ---------------------------------------------------------------------------

/// A table the plan reads from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanTable {
    /// Table name exactly as the warehouse expects it.
    pub fully_qualified_name: String,
    /// Free-form role, e.g. `fact` or `dimension`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Structured intent the SQL must implement.  Immutable during repair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryPlan {
    pub tables: Vec<PlanTable>,
    pub dimensions: Vec<String>,
    pub metrics: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_filter_description: Option<String>,
    pub where_conditions: Vec<String>,
    pub grouping: Vec<String>,
    pub required_columns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// Step errors
// ---------------------------------------------------------------------------

/// Classification of a failed SQL iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SqlErrorKind {
    /// The dry-run rejected the statement, or the dry-run call itself failed.
    DryRunError,
    /// Execution or row streaming failed.
    ExecuteError,
    /// The dry-run estimate exceeded the byte budget.
    OverBudget,
}

impl fmt::Display for SqlErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DryRunError => "DRY_RUN_ERROR",
            Self::ExecuteError => "EXECUTE_ERROR",
            Self::OverBudget => "OVER_BUDGET",
        })
    }
}

/// One classified failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlStepError {
    pub kind: SqlErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_bytes: Option<u64>,
}

impl SqlStepError {
    pub fn dry_run(message: impl Into<String>) -> Self {
        Self {
            kind: SqlErrorKind::DryRunError,
            message: message.into(),
            estimated_bytes: None,
        }
    }

    pub fn execute(message: impl Into<String>) -> Self {
        Self {
            kind: SqlErrorKind::ExecuteError,
            message: message.into(),
            estimated_bytes: None,
        }
    }

    pub fn over_budget(estimated_bytes: u64, max_bytes: u64) -> Self {
        Self {
            kind: SqlErrorKind::OverBudget,
            message: format!(
                "query would process {estimated_bytes} bytes, over the budget of {max_bytes} bytes"
            ),
            estimated_bytes: Some(estimated_bytes),
        }
    }
}

/// A failed candidate and why it failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRepairAttempt {
    pub sql: String,
    pub error: SqlStepError,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Terminal status of one SQL sub-task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlRunStatus {
    /// Rows were returned.
    Ok,
    /// The query ran and returned nothing.
    NoData,
    /// Repair was exhausted or declined; see the advisor output.
    SqlError,
}

/// Outcome of [`super::SqlPipeline::run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqlRunResult {
    pub status: SqlRunStatus,
    /// The SQL that succeeded, or the last one that failed.
    pub sql: String,
    /// Estimate from the last dry-run that passed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run_bytes: Option<u64>,
    #[serde(default)]
    pub rows: Vec<Row>,
    /// User-facing error summary; never the raw engine message.
    #[serde(default)]
    pub sql_error: Option<String>,
    #[serde(default)]
    pub sql_error_suggestion: Option<String>,
    /// Every failed iteration, oldest first.
    #[serde(default)]
    pub attempts: Vec<QueryRepairAttempt>,
    /// How many times the repair agent was consulted.
    #[serde(default)]
    pub repair_invocations: u32,
}

impl SqlRunResult {
    /// JSON view handed back to the model: drops the raw attempt history.
    pub fn to_tool_result(&self) -> Value {
        serde_json::json!({
            "status": self.status,
            "sql": self.sql,
            "rowCount": self.rows.len(),
            "rows": self.rows,
            "sqlError": self.sql_error,
            "sqlErrorSuggestion": self.sql_error_suggestion,
            "repairAttempts": self.repair_invocations,
        })
    }
}

// ---------------------------------------------------------------------------
// Collaborator contracts
// ---------------------------------------------------------------------------

/// Input to the repair agent.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairInput {
    pub prompt: String,
    pub plan: QueryPlan,
    pub schema: Value,
    /// Most recent attempts, oldest first.  The last one is current.
    pub attempts: Vec<QueryRepairAttempt>,
}

impl RepairInput {
    /// The attempt that must be repaired.
    pub fn current(&self) -> Option<&QueryRepairAttempt> {
        self.attempts.last()
    }
}

/// What the repair agent decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairVerdict {
    /// Try this SQL next.
    RetrySql { sql: String },
    /// Give up and hand over to the advisor.
    CannotRepair { notes: String },
}

/// Input to the advisor agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvisorInput {
    pub prompt: String,
    pub sql: String,
    pub error: SqlStepError,
    pub plan: QueryPlan,
    pub schema: Value,
}

/// User-facing explanation of a SQL failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advice {
    pub summary: String,
    pub suggestion: String,
}
