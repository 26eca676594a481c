//! SQL state machine scenarios against a scripted warehouse.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use serde_json::json;

use common::{RecordingAdvisor, ScriptedRepair, ScriptedWarehouse};
use insight_agent::sql::{QueryPlan, RepairVerdict, SqlErrorKind};
use insight_agent::{
    Budgets, DataMartRef, DryRunResult, ErrorPolicy, RunContext, SqlPipeline, SqlPipelineConfig,
    SqlRunStatus, SqlTaskInput,
};

const BAD: &str = "SELECT campaign_name, SUM(clicks2) FROM ads.daily GROUP BY 1";
const GOOD: &str = "SELECT campaign_name, SUM(clicks) FROM ads.daily GROUP BY 1";

fn task(sql: &str) -> SqlTaskInput {
    SqlTaskInput {
        prompt: "clicks per campaign".into(),
        plan: QueryPlan::default(),
        schema: json!({ "columns": ["campaign_name", "clicks"] }),
        sql: sql.into(),
    }
}

fn ctx(budgets: Budgets) -> RunContext {
    RunContext::new(DataMartRef::default(), "clicks per campaign", budgets)
}

fn pipeline(
    warehouse: Arc<ScriptedWarehouse>,
    repair: Arc<ScriptedRepair>,
    advisor: Arc<RecordingAdvisor>,
    policy: ErrorPolicy,
) -> SqlPipeline {
    SqlPipeline::new(
        warehouse,
        repair,
        advisor,
        SqlPipelineConfig {
            policy,
            ..SqlPipelineConfig::default()
        },
    )
}

// ═══════════════════════════════════════════════════════════════════════
//  End-to-end scenarios
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn clean_success() {
    let warehouse = Arc::new(
        ScriptedWarehouse::new()
            .dry_run(GOOD, DryRunResult::valid(Some(500)))
            .rows(GOOD, 3),
    );
    let repair = ScriptedRepair::new(vec![]);
    let advisor = Arc::new(RecordingAdvisor::default());

    let result = pipeline(warehouse.clone(), repair.clone(), advisor.clone(), ErrorPolicy::default())
        .run(task(GOOD), &mut ctx(Budgets::default()))
        .await
        .unwrap();

    assert_eq!(result.status, SqlRunStatus::Ok);
    assert_eq!(result.dry_run_bytes, Some(500));
    assert_eq!(result.rows.len(), 3);
    assert_eq!(result.repair_invocations, 0);
    assert!(result.attempts.is_empty());
    assert_eq!(repair.invocations(), 0);
    assert!(advisor.inputs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn one_repair_then_success() {
    let warehouse = Arc::new(
        ScriptedWarehouse::new()
            .dry_run(BAD, DryRunResult::invalid("Unrecognized name: clicks2 at [1:27]"))
            .rows(GOOD, 3),
    );
    let repair = ScriptedRepair::retry(&[GOOD]);
    let advisor = Arc::new(RecordingAdvisor::default());

    let result = pipeline(warehouse.clone(), repair.clone(), advisor.clone(), ErrorPolicy::default())
        .run(task(BAD), &mut ctx(Budgets::default()))
        .await
        .unwrap();

    assert_eq!(result.status, SqlRunStatus::Ok);
    assert_eq!(result.sql, GOOD);
    assert_eq!(result.repair_invocations, 1);
    assert_eq!(result.attempts.len(), 1);
    assert_eq!(result.attempts[0].sql, BAD);
    assert_eq!(result.attempts[0].error.kind, SqlErrorKind::DryRunError);

    let inputs = repair.inputs.lock().unwrap();
    assert_eq!(inputs[0].current().unwrap().sql, BAD);
    assert!(advisor.inputs.lock().unwrap().is_empty());
    // The failing SQL was never executed.
    assert_eq!(warehouse.executed(), vec![GOOD.to_owned()]);
}

#[tokio::test]
async fn repeated_error_exhausts_repairs_quickly() {
    let second = "SELECT campaign_name, SUM(clicks2) AS c FROM ads.daily GROUP BY 1";
    let third = "SELECT campaign_name, SUM(clicks2) AS total FROM ads.daily GROUP BY 1";
    let warehouse = Arc::new(
        ScriptedWarehouse::new()
            .dry_run(BAD, DryRunResult::invalid("Unrecognized name: clicks2 at [1:27]"))
            .dry_run(second, DryRunResult::invalid("Unrecognized name: clicks2 at [1:31]"))
            .dry_run(third, DryRunResult::invalid("Unrecognized name: clicks2 at [1:35]")),
    );
    let repair = ScriptedRepair::retry(&[second, third, GOOD]);
    let advisor = Arc::new(RecordingAdvisor::default());

    let result = pipeline(warehouse.clone(), repair.clone(), advisor.clone(), ErrorPolicy::default())
        .run(task(BAD), &mut ctx(Budgets::default()))
        .await
        .unwrap();

    assert_eq!(result.status, SqlRunStatus::SqlError);
    assert!(result.repair_invocations <= 2);
    assert_eq!(repair.invocations(), 1);
    assert!(result.rows.is_empty());
    // The second identical failure ends the loop; the third candidate is never tried.
    assert_eq!(
        *warehouse.dry_run_calls.lock().unwrap(),
        vec![BAD.to_owned(), second.to_owned()]
    );
    assert!(warehouse.executed().is_empty());

    let summary = result.sql_error.unwrap();
    assert!(!summary.contains("Unrecognized name"));
    assert_eq!(summary, "The query failed (DRY_RUN_ERROR).");
    assert_eq!(result.sql_error_suggestion.as_deref(), Some("Ask about `clicks` instead."));

    let advised = advisor.inputs.lock().unwrap();
    assert_eq!(advised.len(), 1);
    assert_eq!(advised[0].sql, second);
}

#[tokio::test]
async fn error_budget_caps_failed_iterations_without_repeat_policy() {
    let warehouse = Arc::new(
        ScriptedWarehouse::new()
            .dry_run(BAD, DryRunResult::invalid("alpha broke"))
            .dry_run("SELECT 2", DryRunResult::invalid("beta broke"))
            .dry_run("SELECT 3", DryRunResult::invalid("gamma broke"))
            .dry_run("SELECT 4", DryRunResult::invalid("delta broke")),
    );
    let repair = ScriptedRepair::retry(&["SELECT 2", "SELECT 3", "SELECT 4", GOOD]);
    let policy = ErrorPolicy {
        max_errors_total: 3,
        stop_on_repeated_same_error: false,
    };

    let result = pipeline(warehouse.clone(), repair.clone(), Arc::new(RecordingAdvisor::default()), policy)
        .run(task(BAD), &mut ctx(Budgets::default()))
        .await
        .unwrap();

    assert_eq!(result.status, SqlRunStatus::SqlError);
    assert_eq!(result.attempts.len(), 3);
    assert_eq!(result.repair_invocations, 2);
    assert_eq!(repair.invocations(), 2);
    assert_eq!(result.sql, "SELECT 3");
    assert_eq!(warehouse.dry_run_calls.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn error_budget_of_two_allows_a_single_repair() {
    let warehouse = Arc::new(
        ScriptedWarehouse::new()
            .dry_run(BAD, DryRunResult::invalid("syntax error at position 4"))
            .dry_run("SELECT 2", DryRunResult::invalid("syntax error at position 5")),
    );
    let repair = ScriptedRepair::retry(&["SELECT 2", GOOD]);
    let policy = ErrorPolicy {
        max_errors_total: 2,
        stop_on_repeated_same_error: false,
    };

    let result = pipeline(warehouse, repair.clone(), Arc::new(RecordingAdvisor::default()), policy)
        .run(task(BAD), &mut ctx(Budgets::default()))
        .await
        .unwrap();

    assert_eq!(result.status, SqlRunStatus::SqlError);
    assert_eq!(result.attempts.len(), 2);
    assert_eq!(result.repair_invocations, 1);
    assert_eq!(repair.invocations(), 1);
}

#[tokio::test]
async fn cannot_repair_goes_to_the_advisor() {
    let warehouse = Arc::new(
        ScriptedWarehouse::new().dry_run(BAD, DryRunResult::invalid("Unrecognized name: clicks2")),
    );
    let repair = ScriptedRepair::new(vec![RepairVerdict::CannotRepair {
        notes: "no such metric".into(),
    }]);
    let advisor = Arc::new(RecordingAdvisor::default());

    let result = pipeline(warehouse, repair, advisor.clone(), ErrorPolicy::default())
        .run(task(BAD), &mut ctx(Budgets::default()))
        .await
        .unwrap();

    assert_eq!(result.status, SqlRunStatus::SqlError);
    assert_eq!(result.repair_invocations, 1);
    assert_eq!(advisor.inputs.lock().unwrap().len(), 1);
}

// ═══════════════════════════════════════════════════════════════════════
//  Budgets
// ═══════════════════════════════════════════════════════════════════════

async fn run_with_estimate(estimate: u64, budgets: Budgets) -> insight_agent::SqlRunResult {
    let warehouse = Arc::new(
        ScriptedWarehouse::new()
            .dry_run(GOOD, DryRunResult::valid(Some(estimate)))
            .rows(GOOD, 2),
    );
    pipeline(
        warehouse,
        ScriptedRepair::new(vec![]),
        Arc::new(RecordingAdvisor::default()),
        ErrorPolicy::default(),
    )
    .run(task(GOOD), &mut ctx(budgets))
    .await
    .unwrap()
}

#[tokio::test]
async fn byte_budget_is_inclusive() {
    let budgets = Budgets {
        max_rows: None,
        max_bytes_processed: Some(1000),
    };

    let at_limit = run_with_estimate(1000, budgets).await;
    assert_eq!(at_limit.status, SqlRunStatus::Ok);

    let over = run_with_estimate(1001, budgets).await;
    assert_eq!(over.status, SqlRunStatus::SqlError);
    assert_eq!(over.attempts[0].error.kind, SqlErrorKind::OverBudget);
    assert_eq!(over.attempts[0].error.estimated_bytes, Some(1001));
    assert_eq!(over.sql_error.as_deref(), Some("The query failed (OVER_BUDGET)."));
}

#[tokio::test]
async fn unset_byte_budget_never_blocks() {
    let result = run_with_estimate(u64::MAX, Budgets::default()).await;
    assert_eq!(result.status, SqlRunStatus::Ok);
}

#[tokio::test]
async fn default_row_cap_stops_pulling_at_thirty() {
    let warehouse = Arc::new(ScriptedWarehouse::new().rows(GOOD, 50));
    let result = pipeline(
        warehouse.clone(),
        ScriptedRepair::new(vec![]),
        Arc::new(RecordingAdvisor::default()),
        ErrorPolicy::default(),
    )
    .run(task(GOOD), &mut ctx(Budgets::default()))
    .await
    .unwrap();

    assert_eq!(result.rows.len(), 30);
    assert_eq!(warehouse.rows_pulled.load(Ordering::SeqCst), 30);
}

#[tokio::test]
async fn explicit_row_cap_is_honoured() {
    let warehouse = Arc::new(ScriptedWarehouse::new().rows(GOOD, 50));
    let budgets = Budgets {
        max_rows: Some(5),
        max_bytes_processed: None,
    };
    let result = pipeline(
        warehouse,
        ScriptedRepair::new(vec![]),
        Arc::new(RecordingAdvisor::default()),
        ErrorPolicy::default(),
    )
    .run(task(GOOD), &mut ctx(budgets))
    .await
    .unwrap();

    assert_eq!(result.rows.len(), 5);
}

// ═══════════════════════════════════════════════════════════════════════
//  Empty versus failed
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn zero_rows_is_no_data_not_an_error() {
    let warehouse = Arc::new(ScriptedWarehouse::new().rows(GOOD, 0));
    let repair = ScriptedRepair::new(vec![]);
    let result = pipeline(
        warehouse,
        repair.clone(),
        Arc::new(RecordingAdvisor::default()),
        ErrorPolicy::default(),
    )
    .run(task(GOOD), &mut ctx(Budgets::default()))
    .await
    .unwrap();

    assert_eq!(result.status, SqlRunStatus::NoData);
    assert!(result.sql_error.is_none());
    assert_eq!(repair.invocations(), 0);
}

#[tokio::test]
async fn stream_failure_is_an_execute_error() {
    let warehouse = Arc::new(ScriptedWarehouse::new().failing_stream(GOOD, 2, "quota exceeded"));
    let result = pipeline(
        warehouse,
        ScriptedRepair::new(vec![]),
        Arc::new(RecordingAdvisor::default()),
        ErrorPolicy::default(),
    )
    .run(task(GOOD), &mut ctx(Budgets::default()))
    .await
    .unwrap();

    assert_eq!(result.status, SqlRunStatus::SqlError);
    assert_eq!(result.attempts[0].error.kind, SqlErrorKind::ExecuteError);
    assert!(result.attempts[0].error.message.contains("quota exceeded"));
    assert!(result.rows.is_empty());
}

#[tokio::test]
async fn setup_failure_is_an_execute_error() {
    let warehouse = Arc::new(ScriptedWarehouse::new().failing_setup(GOOD, "permission denied"));
    let result = pipeline(
        warehouse,
        ScriptedRepair::new(vec![]),
        Arc::new(RecordingAdvisor::default()),
        ErrorPolicy::default(),
    )
    .run(task(GOOD), &mut ctx(Budgets::default()))
    .await
    .unwrap();

    assert_eq!(result.attempts[0].error.kind, SqlErrorKind::ExecuteError);
}
