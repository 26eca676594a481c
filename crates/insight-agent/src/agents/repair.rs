//! Query repair sub-agent.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::agents::{SubAgentConfig, check_read_only, normalize_sql, run_structured};
use crate::context::RunContext;
use crate::error::{AgentError, Result};
use crate::llm::ChatCompletionClient;
use crate::prompts;
use crate::registry::{ToolHandler, ToolSpec};
use crate::sql::machine::RepairAgent;
use crate::sql::types::{RepairInput, RepairVerdict};

const SUBMIT_TOOL: &str = "submit_repair";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum Action {
    RetrySql,
    CannotRepair,
}

#[derive(Debug, Deserialize)]
struct Submission {
    action: Action,
    #[serde(default)]
    sql: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

/// Validates a repair decision against the attempt being repaired.
struct SubmitRepair {
    current_sql: String,
}

#[async_trait]
impl ToolHandler for SubmitRepair {
    async fn execute(&self, args: Value, _ctx: &mut RunContext) -> Result<Value> {
        let submission: Submission = serde_json::from_value(args)?;
        let notes = submission.notes.unwrap_or_default();

        match submission.action {
            Action::CannotRepair => Ok(json!({ "action": "CANNOT_REPAIR", "notes": notes })),
            Action::RetrySql => {
                let sql = submission
                    .sql
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| AgentError::ValidationError {
                        reason: "action RETRY_SQL requires a non-empty `sql`".into(),
                    })?;
                check_read_only(&sql)?;
                if normalize_sql(&sql) == normalize_sql(&self.current_sql) {
                    return Err(AgentError::ValidationError {
                        reason: "the repaired SQL is identical to the CURRENT attempt; change the \
                                 expression that caused the error"
                            .into(),
                    });
                }
                Ok(json!({ "action": "RETRY_SQL", "sql": sql.trim(), "notes": notes }))
            }
        }
    }
}

/// [`RepairAgent`] backed by a chat-completion model.
#[derive(Clone)]
pub struct LlmRepairAgent {
    llm: Arc<dyn ChatCompletionClient>,
    config: SubAgentConfig,
}

impl LlmRepairAgent {
    #[must_use]
    pub fn new(llm: Arc<dyn ChatCompletionClient>, config: SubAgentConfig) -> Self {
        Self { llm, config }
    }
}

#[async_trait]
impl RepairAgent for LlmRepairAgent {
    async fn run(&self, input: RepairInput, ctx: &mut RunContext) -> Result<RepairVerdict> {
        let current_sql = input
            .current()
            .map(|a| a.sql.clone())
            .unwrap_or_default();

        let submit = ToolSpec::new(
            SUBMIT_TOOL,
            "Submit a repaired query, or declare that the query cannot be repaired.",
            json!({
                "type": "object",
                "properties": {
                    "action": { "type": "string", "enum": ["RETRY_SQL", "CANNOT_REPAIR"] },
                    "sql": { "type": "string" },
                    "notes": { "type": "string" }
                },
                "required": ["action"]
            }),
            Arc::new(SubmitRepair { current_sql }),
        );

        let content = run_structured(
            self.llm.as_ref(),
            ctx,
            "query_repair",
            prompts::repair_system_prompt(&ctx.budgets, SUBMIT_TOOL),
            prompts::repair_user_prompt(&input),
            submit,
            &self.config,
        )
        .await?;

        let notes = content["notes"].as_str().unwrap_or_default().to_owned();
        match (content["action"].as_str(), content["sql"].as_str()) {
            (Some("RETRY_SQL"), Some(sql)) => Ok(RepairVerdict::RetrySql {
                sql: sql.to_owned(),
            }),
            _ => Ok(RepairVerdict::CannotRepair { notes }),
        }
    }
}
