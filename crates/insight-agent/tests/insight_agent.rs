//! End-to-end runs of the insight agent with a scripted model and warehouse.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use serde_json::{Value, json};

use common::{ScriptedLlm, ScriptedWarehouse, plan, text, tool_call};
use insight_agent::{
    AgentError, AnswerRequest, AnswerStatus, AssistantMessage, Budgets, DryRunResult, InsightAgent,
    InsightAgentConfig, Result, RunContext, SqlPipelineConfig, ToolCall, ToolHandler,
    ToolRegistrar, ToolRegistry, ToolSpec,
};

const BAD: &str = "SELECT campaign_name, SUM(clicks2) AS clicks FROM ads.daily GROUP BY 1";
const GOOD: &str = "SELECT campaign_name, SUM(clicks) AS clicks FROM ads.daily GROUP BY 1";

fn agent(llm: &Arc<ScriptedLlm>, warehouse: &Arc<ScriptedWarehouse>) -> InsightAgent {
    InsightAgent::new(
        llm.clone(),
        warehouse.clone(),
        InsightAgentConfig::default(),
        SqlPipelineConfig::default(),
    )
}

fn request() -> AnswerRequest {
    AnswerRequest {
        question: "How many clicks did each campaign get?".into(),
        project_id: "proj".into(),
        data_mart_id: "ads".into(),
        budgets: Budgets::default(),
        ..AnswerRequest::default()
    }
}

fn answer(text: &str) -> AssistantMessage {
    tool_call("finalize", json!({ "status": "answer", "answer": text }))
}

// ═══════════════════════════════════════════════════════════════════════
//  Happy paths
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn clean_success() {
    let llm = ScriptedLlm::new(vec![
        tool_call("schema_get_metadata", json!({})),
        tool_call("sql_run", json!({ "plan": plan(), "sql": GOOD })),
        answer("| campaign | clicks |\n|---|---|\n| campaign 1 | 10 |"),
    ]);
    let warehouse = Arc::new(
        ScriptedWarehouse::new()
            .dry_run(GOOD, DryRunResult::valid(Some(500)))
            .rows(GOOD, 3),
    );

    let result = agent(&llm, &warehouse).answer_question(request()).await.unwrap();

    assert_eq!(result.status, AnswerStatus::Answer);
    assert!(result.answer.unwrap().contains("campaign 1"));
    assert_eq!(result.artifact.as_deref(), Some(GOOD));
    assert_eq!(llm.calls(), 3);
    assert_eq!(result.telemetry.llm_calls.len(), 3);
    assert_eq!(result.telemetry.tool_calls.len(), 3);
    assert!(result.telemetry.tool_calls.iter().all(|c| c.success));
    // The schema is described once even though sql_run needs it too.
    assert_eq!(warehouse.describe_calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        llm.offered.lock().unwrap()[0],
        vec!["schema_get_metadata", "sql_run", "finalize"]
    );
}

#[tokio::test]
async fn repair_sub_agent_fixes_the_query() {
    let llm = ScriptedLlm::new(vec![
        tool_call("sql_run", json!({ "plan": plan(), "sql": BAD })),
        tool_call(
            "submit_repair",
            json!({ "action": "RETRY_SQL", "sql": GOOD, "notes": "clicks2 does not exist" }),
        ),
        answer("Campaign 1 had 10 clicks."),
    ]);
    let warehouse = Arc::new(
        ScriptedWarehouse::new()
            .dry_run(BAD, DryRunResult::invalid("Unrecognized name: clicks2 at [1:27]"))
            .rows(GOOD, 3),
    );

    let result = agent(&llm, &warehouse).answer_question(request()).await.unwrap();

    assert_eq!(result.status, AnswerStatus::Answer);
    assert_eq!(result.artifact.as_deref(), Some(GOOD));
    assert_eq!(llm.offered.lock().unwrap()[1], vec!["submit_repair"]);

    let agents: Vec<&str> = result
        .telemetry
        .llm_calls
        .iter()
        .map(|c| c.agent.as_str())
        .collect();
    assert_eq!(agents, vec!["insight", "query_repair", "insight"]);
}

#[tokio::test]
async fn builder_writes_sql_when_none_is_given() {
    let llm = ScriptedLlm::new(vec![
        tool_call("sql_run", json!({ "plan": plan() })),
        tool_call("submit_sql", json!({ "sql": GOOD })),
        answer("Done."),
    ]);
    let warehouse = Arc::new(ScriptedWarehouse::new().rows(GOOD, 1));

    let result = agent(&llm, &warehouse).answer_question(request()).await.unwrap();

    assert_eq!(result.status, AnswerStatus::Answer);
    assert_eq!(llm.offered.lock().unwrap()[1], vec!["submit_sql"]);
    assert_eq!(warehouse.executed(), vec![GOOD.to_owned()]);
}

#[tokio::test]
async fn exhausted_repair_finalizes_with_advisor_text() {
    let llm = ScriptedLlm::new(vec![
        tool_call("sql_run", json!({ "plan": plan(), "sql": BAD })),
        tool_call("submit_repair", json!({ "action": "CANNOT_REPAIR", "notes": "unknown metric" })),
        tool_call(
            "submit_advice",
            json!({
                "summary": "The question asks for a metric this data mart does not have.",
                "suggestion": "Ask about `clicks` per `campaign_name` instead."
            }),
        ),
        tool_call("finalize", json!({ "status": "sql_error" })),
    ]);
    let warehouse = Arc::new(
        ScriptedWarehouse::new()
            .dry_run(BAD, DryRunResult::invalid("Unrecognized name: clicks2 at [1:27]")),
    );

    let result = agent(&llm, &warehouse).answer_question(request()).await.unwrap();

    assert_eq!(result.status, AnswerStatus::SqlError);
    assert_eq!(
        result.reason_description.as_deref(),
        Some(
            "The question asks for a metric this data mart does not have.\nSuggestion:\n\
             Ask about `clicks` per `campaign_name` instead."
        )
    );
    assert_eq!(result.artifact.as_deref(), Some(BAD));
    assert!(warehouse.executed().is_empty());
}

// ═══════════════════════════════════════════════════════════════════════
//  Loop guarantees
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn answer_is_rejected_until_rows_exist() {
    let llm = ScriptedLlm::new(vec![
        answer("About 1,000 clicks."),
        tool_call("sql_run", json!({ "plan": plan(), "sql": GOOD })),
        answer("Campaign 0 had 0 clicks."),
    ]);
    let warehouse = Arc::new(ScriptedWarehouse::new().rows(GOOD, 2));

    let result = agent(&llm, &warehouse).answer_question(request()).await.unwrap();

    assert_eq!(result.status, AnswerStatus::Answer);
    assert_eq!(result.answer.as_deref(), Some("Campaign 0 had 0 clicks."));
    let first = &result.telemetry.tool_calls[0];
    assert_eq!(first.tool_name, "finalize");
    assert!(!first.success);
    assert!(first.error_message.as_deref().unwrap().contains("returned rows"));
}

#[tokio::test]
async fn only_the_first_finalize_counts() {
    let finalize = |reason: &str| ToolCall {
        id: format!("call_{reason}"),
        name: "finalize".into(),
        arguments_json: json!({ "status": "not_relevant", "reasonDescription": reason }).to_string(),
    };
    let llm = ScriptedLlm::new(vec![AssistantMessage {
        tool_calls: vec![finalize("first"), finalize("second")],
        ..AssistantMessage::default()
    }]);
    let warehouse = Arc::new(ScriptedWarehouse::new());

    let result = agent(&llm, &warehouse).answer_question(request()).await.unwrap();

    assert_eq!(result.status, AnswerStatus::NotRelevant);
    assert_eq!(result.reason_description.as_deref(), Some("first"));
    assert_eq!(result.telemetry.tool_calls.len(), 1);
}

#[tokio::test]
async fn prose_turns_are_nudged_back_to_tools() {
    let llm = ScriptedLlm::new(vec![
        text("The answer is probably 42."),
        tool_call(
            "finalize",
            json!({ "status": "high_ambiguity", "reasonDescription": "Which period?" }),
        ),
    ]);
    let warehouse = Arc::new(ScriptedWarehouse::new());

    let result = agent(&llm, &warehouse).answer_question(request()).await.unwrap();

    assert_eq!(result.status, AnswerStatus::HighAmbiguity);
    // system + user, then the prose reply and the nudge.
    assert_eq!(*llm.transcript_lens.lock().unwrap(), vec![2, 4]);
}

#[tokio::test]
async fn turn_limit_keeps_telemetry() {
    let llm = ScriptedLlm::new(
        (0..10)
            .map(|_| tool_call("schema_get_metadata", json!({})))
            .collect(),
    );
    let warehouse = Arc::new(ScriptedWarehouse::new());
    let config = InsightAgentConfig {
        max_turns: 3,
        ..InsightAgentConfig::default()
    };
    let agent = InsightAgent::new(llm.clone(), warehouse.clone(), config, SqlPipelineConfig::default());

    let result = agent.answer_question(request()).await.unwrap();

    assert_eq!(result.status, AnswerStatus::TurnLimitExceeded);
    assert!(result.answer.is_none());
    assert_eq!(result.telemetry.llm_calls.len(), 3);
    assert_eq!(llm.remaining(), 7);
    assert_eq!(warehouse.describe_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_tools_and_bad_arguments_are_recoverable() {
    let llm = ScriptedLlm::new(vec![
        tool_call("drop_tables", json!({})),
        tool_call("sql_run", json!({ "sql": GOOD })),
        tool_call("finalize", json!({ "status": "cannot_answer", "reasonDescription": "no" })),
    ]);
    let warehouse = Arc::new(ScriptedWarehouse::new());

    let result = agent(&llm, &warehouse).answer_question(request()).await.unwrap();

    assert_eq!(result.status, AnswerStatus::CannotAnswer);
    let failures: Vec<bool> = result.telemetry.tool_calls.iter().map(|c| c.success).collect();
    assert_eq!(failures, vec![false, false, true]);
    assert!(warehouse.executed().is_empty());
}

#[tokio::test]
async fn empty_question_is_rejected() {
    let llm = ScriptedLlm::new(vec![]);
    let warehouse = Arc::new(ScriptedWarehouse::new());
    let mut req = request();
    req.question = "   ".into();

    let err = agent(&llm, &warehouse).answer_question(req).await.unwrap_err();
    assert!(matches!(err, AgentError::ValidationError { .. }));
    assert_eq!(llm.calls(), 0);
}

// ═══════════════════════════════════════════════════════════════════════
//  Extra registrars
// ═══════════════════════════════════════════════════════════════════════

struct Clock;

#[async_trait]
impl ToolHandler for Clock {
    async fn execute(&self, _args: Value, _ctx: &mut RunContext) -> Result<Value> {
        Ok(json!({ "today": "2024-05-01" }))
    }
}

struct ClockTools {
    name: &'static str,
    is_final: bool,
}

impl ClockTools {
    fn named(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            is_final: false,
        })
    }
}

impl ToolRegistrar for ClockTools {
    fn register_tools(&self, registry: &mut ToolRegistry) -> Result<()> {
        let spec = ToolSpec::new(
            self.name,
            "Current date.",
            json!({ "type": "object" }),
            Arc::new(Clock),
        );
        registry.register(if self.is_final { spec.final_tool() } else { spec })
    }
}

#[tokio::test]
async fn extra_registrars_extend_the_tool_set() {
    let llm = ScriptedLlm::new(vec![]);
    let warehouse = Arc::new(ScriptedWarehouse::new());
    let agent = agent(&llm, &warehouse).with_registrar(ClockTools::named("today"));

    let names: Vec<String> = agent
        .tool_definitions()
        .unwrap()
        .into_iter()
        .map(|d| d.name)
        .collect();
    assert_eq!(names, vec!["schema_get_metadata", "sql_run", "finalize", "today"]);
}

#[tokio::test]
async fn colliding_registrars_fail_before_the_model_is_called() {
    let llm = ScriptedLlm::new(vec![answer("x")]);
    let warehouse = Arc::new(ScriptedWarehouse::new());
    let agent = agent(&llm, &warehouse).with_registrar(ClockTools::named("sql_run"));

    let err = agent.answer_question(request()).await.unwrap_err();
    assert!(matches!(err, AgentError::DuplicateTool { ref tool_name } if tool_name == "sql_run"));
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn extra_final_tools_are_rejected_before_the_model_is_called() {
    let llm = ScriptedLlm::new(vec![tool_call("today", json!({}))]);
    let warehouse = Arc::new(ScriptedWarehouse::new());
    let agent = agent(&llm, &warehouse).with_registrar(Arc::new(ClockTools {
        name: "today",
        is_final: true,
    }));

    let err = agent.answer_question(request()).await.unwrap_err();
    assert!(matches!(err, AgentError::ConfigError { ref reason } if reason.contains("`today`")));
    assert_eq!(llm.calls(), 0);
    assert!(agent.tool_definitions().is_err());
}

// ═══════════════════════════════════════════════════════════════════════
//  Schema narrowing and answer language
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn sql_builder_only_sees_the_planned_tables() {
    let llm = ScriptedLlm::new(vec![
        tool_call("sql_run", json!({ "plan": plan() })),
        tool_call("submit_sql", json!({ "sql": GOOD })),
        answer("Done."),
    ]);
    let warehouse = Arc::new(
        ScriptedWarehouse::new()
            .with_schema(json!({
                "tables": [
                    { "name": "ads.daily", "columns": ["campaign_name", "clicks"] },
                    { "name": "ads.payroll", "columns": ["employee", "salary"] }
                ]
            }))
            .rows(GOOD, 1),
    );

    let result = agent(&llm, &warehouse).answer_question(request()).await.unwrap();

    assert_eq!(result.status, AnswerStatus::Answer);
    let prompts = llm.prompts.lock().unwrap();
    let builder_user = &prompts[1].1;
    assert!(builder_user.contains("ads.daily"));
    assert!(!builder_user.contains("payroll"));
    assert!(!builder_user.contains("salary"));
}

#[tokio::test]
async fn prompt_language_reaches_the_system_prompt() {
    let llm = ScriptedLlm::new(vec![tool_call(
        "finalize",
        json!({ "status": "not_relevant", "reasonDescription": "Keine Analysefrage." }),
    )]);
    let warehouse = Arc::new(ScriptedWarehouse::new());
    let mut req = request();
    req.prompt_language = Some(" de ".into());

    let result = agent(&llm, &warehouse).answer_question(req).await.unwrap();

    assert_eq!(result.status, AnswerStatus::NotRelevant);
    let prompts = llm.prompts.lock().unwrap();
    assert!(prompts[0].0.contains("in the language with code \"de\""));

    let llm = ScriptedLlm::new(vec![tool_call(
        "finalize",
        json!({ "status": "not_relevant", "reasonDescription": "Not analytics." }),
    )]);
    agent(&llm, &warehouse).answer_question(request()).await.unwrap();
    assert!(llm.prompts.lock().unwrap()[0].0.contains("same language as the user's question"));
}
