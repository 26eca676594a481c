//! SQL validate, execute and repair state machine.
//!
//! ```text
//! VALIDATE --ok--> EXECUTE --ok--> SUCCESS (rows or no data)
//!    |                |
//!    +---- error -----+--> REPAIR --retry--> VALIDATE
//!                           |
//!            cannot repair, tracker veto
//!                           v
//!                   ADVISOR_FALLBACK --> FAILED_WITH_ADVICE
//! ```
//!
//! Every failure is recorded in a fresh [`ErrorTracker`] before anything
//! else happens, so a sub-task sees at most `max_errors_total` failed
//! iterations and at most `max_errors_total - 1` repairs, and stops on the
//! first canonical repeat.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::budget::{ErrorPolicy, ErrorTracker};
use crate::context::RunContext;
use crate::error::Result;
use crate::sql::types::{
    Advice, AdvisorInput, QueryPlan, QueryRepairAttempt, RepairInput, RepairVerdict,
    SqlErrorKind, SqlRunResult, SqlRunStatus, SqlStepError,
};
use crate::warehouse::{Row, Warehouse};

/// Attempts shown to the repair agent by default.
pub const DEFAULT_REPAIR_WINDOW: usize = 4;

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Proposes a corrected SQL candidate from the failure history.
#[async_trait]
pub trait RepairAgent: Send + Sync {
    async fn run(&self, input: RepairInput, ctx: &mut RunContext) -> Result<RepairVerdict>;
}

/// Explains a SQL failure to the user without inventing schema facts.
#[async_trait]
pub trait AdvisorAgent: Send + Sync {
    async fn run(&self, input: AdvisorInput, ctx: &mut RunContext) -> Result<Advice>;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning for [`SqlPipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqlPipelineConfig {
    /// Error budget and repeat policy.
    #[serde(flatten)]
    pub policy: ErrorPolicy,
    /// Newest attempts shown to the repair agent.
    pub repair_window: usize,
}

impl Default for SqlPipelineConfig {
    fn default() -> Self {
        Self {
            policy: ErrorPolicy::default(),
            repair_window: DEFAULT_REPAIR_WINDOW,
        }
    }
}

/// One SQL sub-task.
#[derive(Debug, Clone)]
pub struct SqlTaskInput {
    pub prompt: String,
    pub plan: QueryPlan,
    pub schema: Value,
    /// Initial candidate.
    pub sql: String,
}

/// Why the advisor was consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FallbackReason {
    ErrorBudgetExhausted,
    RepeatedError,
    CannotRepair,
}

impl FallbackReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::ErrorBudgetExhausted => "error budget exhausted",
            Self::RepeatedError => "same error repeated",
            Self::CannotRepair => "repair agent declined",
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Runs candidate SQL through dry-run, budget check, execution and repair.
#[derive(Clone)]
pub struct SqlPipeline {
    warehouse: Arc<dyn Warehouse>,
    repair: Arc<dyn RepairAgent>,
    advisor: Arc<dyn AdvisorAgent>,
    config: SqlPipelineConfig,
}

impl SqlPipeline {
    #[must_use]
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        repair: Arc<dyn RepairAgent>,
        advisor: Arc<dyn AdvisorAgent>,
        config: SqlPipelineConfig,
    ) -> Self {
        Self {
            warehouse,
            repair,
            advisor,
            config,
        }
    }

    pub fn config(&self) -> &SqlPipelineConfig {
        &self.config
    }

    /// Drive one SQL sub-task to a terminal state.
    ///
    /// # Errors
    ///
    /// Only configuration and transport errors from the repair or advisor
    /// agents propagate.  SQL failures are reported in the result.
    pub async fn run(&self, input: SqlTaskInput, ctx: &mut RunContext) -> Result<SqlRunResult> {
        let SqlTaskInput {
            prompt,
            plan,
            schema,
            mut sql,
        } = input;
        let mut tracker = ErrorTracker::new(self.config.policy);
        let mut attempts: Vec<QueryRepairAttempt> = Vec::new();
        let mut repair_invocations = 0u32;

        tracing::info!(task_id = %ctx.task_id, "starting sql sub-task");

        let (reason, last_error) = loop {
            let error = match self.validate_and_execute(&sql, ctx).await {
                Ok((rows, dry_run_bytes)) => {
                    let status = if rows.is_empty() {
                        SqlRunStatus::NoData
                    } else {
                        SqlRunStatus::Ok
                    };
                    tracing::info!(
                        task_id = %ctx.task_id,
                        rows = rows.len(),
                        attempts = attempts.len(),
                        "sql sub-task succeeded"
                    );
                    return Ok(SqlRunResult {
                        status,
                        sql,
                        dry_run_bytes,
                        rows,
                        sql_error: None,
                        sql_error_suggestion: None,
                        attempts,
                        repair_invocations,
                    });
                }
                Err(error) => error,
            };

            tracing::warn!(
                task_id = %ctx.task_id,
                kind = %error.kind,
                error = %error.message,
                "sql iteration failed"
            );
            attempts.push(QueryRepairAttempt {
                sql: sql.clone(),
                error: error.clone(),
            });

            let recorded = tracker.record(&error.message);
            if tracker.should_stop_because_repeated(recorded.repeated) {
                break (FallbackReason::RepeatedError, error);
            }
            if !tracker.can_continue() {
                break (FallbackReason::ErrorBudgetExhausted, error);
            }

            let window_start = attempts.len().saturating_sub(self.config.repair_window.max(1));
            let repair_input = RepairInput {
                prompt: prompt.clone(),
                plan: plan.clone(),
                schema: schema.clone(),
                attempts: attempts[window_start..].to_vec(),
            };
            repair_invocations += 1;

            match self.repair.run(repair_input, ctx).await {
                Ok(RepairVerdict::RetrySql { sql: next }) => {
                    tracing::info!(task_id = %ctx.task_id, repair_invocations, "retrying repaired sql");
                    sql = next;
                }
                Ok(RepairVerdict::CannotRepair { notes }) => {
                    tracing::info!(task_id = %ctx.task_id, notes = %notes, "repair declined");
                    break (FallbackReason::CannotRepair, error);
                }
                Err(e) if e.is_fatal() && !e.is_turn_limit() => return Err(e),
                Err(e) => {
                    tracing::warn!(task_id = %ctx.task_id, error = %e, "repair agent failed");
                    break (FallbackReason::CannotRepair, error);
                }
            }
        };

        tracing::info!(
            task_id = %ctx.task_id,
            reason = reason.as_str(),
            total_errors = tracker.total_errors(),
            "falling back to sql advisor"
        );

        let advice = self
            .advise(
                AdvisorInput {
                    prompt,
                    sql: sql.clone(),
                    error: last_error,
                    plan,
                    schema,
                },
                ctx,
            )
            .await?;

        Ok(SqlRunResult {
            status: SqlRunStatus::SqlError,
            sql,
            dry_run_bytes: None,
            rows: Vec::new(),
            sql_error: Some(advice.summary),
            sql_error_suggestion: Some(advice.suggestion),
            attempts,
            repair_invocations,
        })
    }

    /// One VALIDATE + EXECUTE pass.  Returns rows and the dry-run estimate.
    async fn validate_and_execute(
        &self,
        sql: &str,
        ctx: &RunContext,
    ) -> std::result::Result<(Vec<Row>, Option<u64>), SqlStepError> {
        if sql.trim().is_empty() {
            return Err(SqlStepError::dry_run("empty SQL statement"));
        }

        let dry_run = self
            .warehouse
            .dry_run(&ctx.target, sql)
            .await
            .map_err(|e| SqlStepError::dry_run(e.to_string()))?;

        if !dry_run.is_valid {
            return Err(SqlStepError::dry_run(
                dry_run
                    .error
                    .unwrap_or_else(|| "dry-run rejected the query".to_owned()),
            ));
        }

        if ctx.budgets.exceeds_bytes(dry_run.estimated_bytes) {
            return Err(SqlStepError::over_budget(
                dry_run.estimated_bytes.unwrap_or_default(),
                ctx.budgets.max_bytes_processed.unwrap_or_default(),
            ));
        }

        let limit = ctx.budgets.row_limit();
        let mut stream = self
            .warehouse
            .execute_rows(&ctx.target, sql, limit)
            .await
            .map_err(|e| SqlStepError::execute(e.to_string()))?;

        let mut rows = Vec::new();
        while (rows.len() as u64) < limit {
            match stream.next().await {
                Some(Ok(row)) => rows.push(row),
                Some(Err(e)) => return Err(SqlStepError::execute(e.to_string())),
                None => break,
            }
        }

        Ok((rows, dry_run.estimated_bytes))
    }

    /// Ask the advisor; fall back to a generic explanation if it cannot help.
    async fn advise(&self, input: AdvisorInput, ctx: &mut RunContext) -> Result<Advice> {
        let kind = input.error.kind;
        match self.advisor.run(input, ctx).await {
            Ok(advice) => Ok(advice),
            Err(e) if e.is_fatal() && !e.is_turn_limit() => Err(e),
            Err(e) => {
                tracing::warn!(task_id = %ctx.task_id, error = %e, "sql advisor failed");
                Ok(generic_advice(kind))
            }
        }
    }
}

/// Used when the advisor itself fails.  Mentions no schema facts.
fn generic_advice(kind: SqlErrorKind) -> Advice {
    let (summary, suggestion) = match kind {
        SqlErrorKind::OverBudget => (
            "The query needed to scan more data than the configured budget allows.",
            "Narrow the date range or ask about fewer columns, or raise the byte budget.",
        ),
        SqlErrorKind::DryRunError => (
            "A valid query for this question could not be produced.",
            "Rephrase the question using the field names shown in the data mart schema.",
        ),
        SqlErrorKind::ExecuteError => (
            "The query was valid but failed while running.",
            "Try a simpler question or check the data mart's source data.",
        ),
    };
    Advice {
        summary: summary.to_owned(),
        suggestion: suggestion.to_owned(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
