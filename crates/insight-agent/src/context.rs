//! Per-run context handed to every tool handler.
//!
//! A [`RunContext`] is private to one run.  It carries the caller's budgets
//! and target, collects telemetry, and remembers what the SQL tools produced
//! so the finalize tool can check its claims against real results.

use serde_json::Value;
use uuid::Uuid;

use crate::budget::Budgets;
use crate::sql::types::{SqlRunResult, SqlRunStatus};
use crate::telemetry::Telemetry;
use crate::warehouse::DataMartRef;

/// Mutable state owned by one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Unique identifier for this run.
    pub task_id: Uuid,
    /// Data mart the run queries.
    pub target: DataMartRef,
    /// The user's question.
    pub prompt: String,
    /// Row and byte ceilings.
    pub budgets: Budgets,
    /// Language user-facing text should be written in, if known.
    pub prompt_language: Option<String>,
    /// Append-only LLM and tool telemetry.
    pub telemetry: Telemetry,
    /// Schema description, fetched at most once per run.
    pub schema: Option<Value>,
    /// Every SQL sub-task result, oldest first.
    pub sql_runs: Vec<SqlRunResult>,
}

impl RunContext {
    /// Create a fresh context.
    #[must_use]
    pub fn new(target: DataMartRef, prompt: impl Into<String>, budgets: Budgets) -> Self {
        Self {
            task_id: Uuid::now_v7(),
            target,
            prompt: prompt.into(),
            budgets,
            prompt_language: None,
            telemetry: Telemetry::new(),
            schema: None,
            sql_runs: Vec::new(),
        }
    }

    /// The most recent SQL result, if any.
    pub fn last_sql_run(&self) -> Option<&SqlRunResult> {
        self.sql_runs.last()
    }

    /// The most recent SQL result that returned rows.
    pub fn last_successful_sql_run(&self) -> Option<&SqlRunResult> {
        self.sql_runs
            .iter()
            .rev()
            .find(|r| r.status == SqlRunStatus::Ok)
    }
}
