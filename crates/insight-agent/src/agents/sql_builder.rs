//! SQL builder sub-agent.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::agents::{SubAgentConfig, check_read_only, run_structured};
use crate::context::RunContext;
use crate::error::{AgentError, Result};
use crate::llm::ChatCompletionClient;
use crate::prompts;
use crate::registry::{ToolHandler, ToolSpec};
use crate::sql::types::QueryPlan;

const SUBMIT_TOOL: &str = "submit_sql";

#[derive(Debug, Deserialize)]
struct Submission {
    sql: String,
}

/// Accepts only a single read-only statement.
struct SubmitSql;

#[async_trait]
impl ToolHandler for SubmitSql {
    async fn execute(&self, args: Value, _ctx: &mut RunContext) -> Result<Value> {
        let submission: Submission = serde_json::from_value(args)?;
        check_read_only(&submission.sql)?;
        Ok(json!({ "sql": submission.sql.trim() }))
    }
}

/// Writes the first SQL candidate for a query plan.
#[derive(Clone)]
pub struct SqlBuilderAgent {
    llm: Arc<dyn ChatCompletionClient>,
    config: SubAgentConfig,
}

impl SqlBuilderAgent {
    #[must_use]
    pub fn new(llm: Arc<dyn ChatCompletionClient>, config: SubAgentConfig) -> Self {
        Self { llm, config }
    }

    /// Produce SQL implementing `plan`.
    ///
    /// # Errors
    ///
    /// Returns the loop's error if the model never submits valid SQL.
    pub async fn build(
        &self,
        prompt: &str,
        plan: &QueryPlan,
        schema: &Value,
        ctx: &mut RunContext,
    ) -> Result<String> {
        let submit = ToolSpec::new(
            SUBMIT_TOOL,
            "Submit the final SQL query.",
            json!({
                "type": "object",
                "properties": {
                    "sql": { "type": "string", "minLength": 1 },
                    "notes": { "type": "string" }
                },
                "required": ["sql"]
            }),
            Arc::new(SubmitSql),
        );

        let content = run_structured(
            self.llm.as_ref(),
            ctx,
            "sql_builder",
            prompts::sql_builder_system_prompt(&ctx.budgets, SUBMIT_TOOL),
            prompts::sql_builder_user_prompt(prompt, plan, schema),
            submit,
            &self.config,
        )
        .await?;

        content["sql"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| AgentError::Internal("sql builder returned no sql".into()))
    }
}
