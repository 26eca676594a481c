//! The insight agent.
//!
//! [`InsightAgent::answer_question`] drives one run: it builds a fresh tool
//! registry, seeds the transcript with the question and runs the
//! conversation loop until the model calls `finalize`.
//!
//! Tools exposed to the model:
//!
//! - `schema_get_metadata` -- describe the data mart (cached per run).
//! - `sql_run` -- narrow the schema to the plan's tables, build SQL from the
//!   plan if none is given, then run it through the [`SqlPipeline`].
//! - `finalize` -- final tool; checks the claimed status against what the
//!   SQL tools actually produced in this run.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::agents::{LlmAdvisorAgent, LlmRepairAgent, SqlBuilderAgent, SubAgentConfig};
use crate::budget::Budgets;
use crate::context::RunContext;
use crate::error::{AgentError, Result};
use crate::llm::{ChatCompletionClient, ToolDefinition};
use crate::prompts;
use crate::registry::{ToolHandler, ToolRegistrar, ToolRegistry, ToolSpec};
use crate::runtime::{DEFAULT_MAX_TOOL_RESULT_CHARS, LoopConfig, Transcript, run_tool_loop};
use crate::sql::{
    QueryPlan, SqlPipeline, SqlPipelineConfig, SqlRunStatus, SqlTaskInput, narrow_schema,
};
use crate::telemetry::Telemetry;
use crate::warehouse::{DataMartRef, Warehouse};

pub const SCHEMA_TOOL: &str = "schema_get_metadata";
pub const SQL_RUN_TOOL: &str = "sql_run";
pub const FINALIZE_TOOL: &str = "finalize";

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// A question about one data mart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    pub question: String,
    pub project_id: String,
    pub data_mart_id: String,
    #[serde(default)]
    pub budgets: Budgets,
    /// Report template the answer will be inserted into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Language for the answer and reasons, e.g. `en` or `de`.  When unset
    /// the model answers in the language of the question.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_language: Option<String>,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerStatus {
    Answer,
    NoData,
    NotRelevant,
    CannotAnswer,
    HighAmbiguity,
    SqlError,
    /// The main loop ran out of turns before finalizing.
    TurnLimitExceeded,
}

impl AnswerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Answer => "answer",
            Self::NoData => "no_data",
            Self::NotRelevant => "not_relevant",
            Self::CannotAnswer => "cannot_answer",
            Self::HighAmbiguity => "high_ambiguity",
            Self::SqlError => "sql_error",
            Self::TurnLimitExceeded => "turn_limit_exceeded",
        }
    }
}

/// Result of [`InsightAgent::answer_question`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightAnswer {
    pub task_id: Uuid,
    pub status: AnswerStatus,
    /// Markdown answer, only for [`AnswerStatus::Answer`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    /// Why there is no answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_description: Option<String>,
    /// SQL the answer (or failure) is based on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    pub telemetry: Telemetry,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Limits for the main loop and its sub-agents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightAgentConfig {
    pub max_turns: u32,
    pub sub_agent_max_turns: u32,
    /// Stop after this many consecutive turns without a tool call.
    pub max_idle_turns: Option<u32>,
    pub max_tool_result_chars: usize,
}

impl Default for InsightAgentConfig {
    fn default() -> Self {
        Self {
            max_turns: 16,
            sub_agent_max_turns: 6,
            max_idle_turns: None,
            max_tool_result_chars: DEFAULT_MAX_TOOL_RESULT_CHARS,
        }
    }
}

impl InsightAgentConfig {
    pub fn sub_agent(&self) -> SubAgentConfig {
        SubAgentConfig {
            max_turns: self.sub_agent_max_turns,
            ..SubAgentConfig::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

/// Answers analytics questions by planning, running and checking SQL.
pub struct InsightAgent {
    llm: Arc<dyn ChatCompletionClient>,
    warehouse: Arc<dyn Warehouse>,
    builder: SqlBuilderAgent,
    pipeline: SqlPipeline,
    config: InsightAgentConfig,
    extra_registrars: Vec<Arc<dyn ToolRegistrar>>,
}

impl InsightAgent {
    /// Wire the agent with LLM-backed builder, repair and advisor agents.
    #[must_use]
    pub fn new(
        llm: Arc<dyn ChatCompletionClient>,
        warehouse: Arc<dyn Warehouse>,
        config: InsightAgentConfig,
        sql: SqlPipelineConfig,
    ) -> Self {
        let sub = config.sub_agent();
        let pipeline = SqlPipeline::new(
            warehouse.clone(),
            Arc::new(LlmRepairAgent::new(llm.clone(), sub)),
            Arc::new(LlmAdvisorAgent::new(llm.clone(), sub)),
            sql,
        );
        Self::with_pipeline(llm, warehouse, pipeline, config)
    }

    /// Wire the agent around an already built pipeline.
    #[must_use]
    pub fn with_pipeline(
        llm: Arc<dyn ChatCompletionClient>,
        warehouse: Arc<dyn Warehouse>,
        pipeline: SqlPipeline,
        config: InsightAgentConfig,
    ) -> Self {
        let builder = SqlBuilderAgent::new(llm.clone(), config.sub_agent());
        Self {
            llm,
            warehouse,
            builder,
            pipeline,
            config,
            extra_registrars: Vec::new(),
        }
    }

    /// Expose additional tools to the main loop.
    #[must_use]
    pub fn with_registrar(mut self, registrar: Arc<dyn ToolRegistrar>) -> Self {
        self.extra_registrars.push(registrar);
        self
    }

    pub fn config(&self) -> &InsightAgentConfig {
        &self.config
    }

    /// Build the registry a run would use.
    ///
    /// # Errors
    ///
    /// Fails if two registrars declare the same tool name, or if an extra
    /// registrar declares a final tool: only `finalize` may end a run.
    pub fn build_registry(&self) -> Result<ToolRegistry> {
        let mut registrars: Vec<Arc<dyn ToolRegistrar>> = vec![Arc::new(InsightTools {
            warehouse: self.warehouse.clone(),
            builder: self.builder.clone(),
            pipeline: self.pipeline.clone(),
        })];
        registrars.extend(self.extra_registrars.iter().cloned());
        let registry = ToolRegistry::from_registrars(&registrars)?;

        if let Some(extra) = registry
            .names()
            .into_iter()
            .find(|name| *name != FINALIZE_TOOL && registry.is_final(name))
        {
            return Err(AgentError::ConfigError {
                reason: format!(
                    "tool `{extra}` is declared final; only `{FINALIZE_TOOL}` may end a run"
                ),
            });
        }
        Ok(registry)
    }

    /// Tool definitions as the model sees them.
    ///
    /// # Errors
    ///
    /// See [`Self::build_registry`].
    pub fn tool_definitions(&self) -> Result<Vec<ToolDefinition>> {
        Ok(self.build_registry()?.list_for_model())
    }

    /// Run one question to completion.
    ///
    /// # Errors
    ///
    /// Configuration and model transport errors propagate.  Running out of
    /// turns is reported as [`AnswerStatus::TurnLimitExceeded`].
    pub async fn answer_question(&self, request: AnswerRequest) -> Result<InsightAnswer> {
        if request.question.trim().is_empty() {
            return Err(AgentError::ValidationError {
                reason: "question must not be empty".into(),
            });
        }

        let target = DataMartRef {
            project_id: request.project_id,
            data_mart_id: request.data_mart_id,
        };
        let mut ctx = RunContext::new(target, request.question.clone(), request.budgets);
        ctx.prompt_language = request
            .prompt_language
            .map(|l| l.trim().to_owned())
            .filter(|l| !l.is_empty());
        let registry = self.build_registry()?;

        tracing::info!(
            task_id = %ctx.task_id,
            data_mart_id = %ctx.target.data_mart_id,
            max_rows = ctx.budgets.row_limit(),
            max_bytes = ?ctx.budgets.max_bytes_processed,
            "answering question"
        );

        let mut transcript = Transcript::new(
            prompts::insight_system_prompt(
                &ctx.budgets,
                FINALIZE_TOOL,
                ctx.prompt_language.as_deref(),
            ),
            prompts::insight_user_prompt(&request.question, request.template.as_deref()),
        );
        let loop_config = LoopConfig {
            agent_name: "insight".into(),
            max_turns: self.config.max_turns,
            max_tool_result_chars: self.config.max_tool_result_chars,
            max_idle_turns: self.config.max_idle_turns,
            ..LoopConfig::default()
        };

        let outcome = run_tool_loop(
            self.llm.as_ref(),
            &registry,
            &mut ctx,
            &mut transcript,
            &loop_config,
        )
        .await;

        match outcome {
            Ok(outcome) => {
                let finalized: Finalized = serde_json::from_value(outcome.content)?;
                tracing::info!(
                    task_id = %ctx.task_id,
                    status = finalized.status.as_str(),
                    turns = outcome.turns_used,
                    tokens = ctx.telemetry.total_tokens(),
                    "question answered"
                );
                Ok(InsightAnswer {
                    task_id: ctx.task_id,
                    status: finalized.status,
                    answer: finalized.answer,
                    reason_description: finalized.reason_description,
                    artifact: finalized.artifact,
                    telemetry: ctx.telemetry,
                })
            }
            Err(e) if e.is_turn_limit() => {
                tracing::warn!(task_id = %ctx.task_id, error = %e, "run ended without finalize");
                Ok(InsightAnswer {
                    task_id: ctx.task_id,
                    status: AnswerStatus::TurnLimitExceeded,
                    answer: None,
                    reason_description: Some(e.to_string()),
                    artifact: ctx.last_sql_run().map(|r| r.sql.clone()),
                    telemetry: ctx.telemetry,
                })
            }
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

struct InsightTools {
    warehouse: Arc<dyn Warehouse>,
    builder: SqlBuilderAgent,
    pipeline: SqlPipeline,
}

impl ToolRegistrar for InsightTools {
    fn register_tools(&self, registry: &mut ToolRegistry) -> Result<()> {
        registry.register(ToolSpec::new(
            SCHEMA_TOOL,
            "Describe the tables and columns of the data mart.",
            json!({ "type": "object", "properties": {} }),
            Arc::new(SchemaTool {
                warehouse: self.warehouse.clone(),
            }),
        ))?;

        registry.register(ToolSpec::new(
            SQL_RUN_TOOL,
            "Run a query for a query plan. If `sql` is omitted, SQL is generated from the plan. \
             Failed queries are repaired automatically.",
            sql_run_schema(),
            Arc::new(SqlRunTool {
                warehouse: self.warehouse.clone(),
                builder: self.builder.clone(),
                pipeline: self.pipeline.clone(),
            }),
        ))?;

        registry.register(
            ToolSpec::new(
                FINALIZE_TOOL,
                "Finish the run with a status and, for status `answer`, a Markdown answer.",
                finalize_schema(),
                Arc::new(FinalizeTool),
            )
            .final_tool(),
        )
    }
}

async fn load_schema(warehouse: &dyn Warehouse, ctx: &mut RunContext) -> Result<Value> {
    if let Some(schema) = &ctx.schema {
        return Ok(schema.clone());
    }
    let schema = warehouse.describe(&ctx.target).await?;
    tracing::debug!(task_id = %ctx.task_id, "schema cached");
    ctx.schema = Some(schema.clone());
    Ok(schema)
}

struct SchemaTool {
    warehouse: Arc<dyn Warehouse>,
}

#[async_trait]
impl ToolHandler for SchemaTool {
    async fn execute(&self, _args: Value, ctx: &mut RunContext) -> Result<Value> {
        load_schema(self.warehouse.as_ref(), ctx).await
    }
}

#[derive(Debug, Deserialize)]
struct SqlRunArgs {
    plan: QueryPlan,
    #[serde(default)]
    sql: Option<String>,
}

struct SqlRunTool {
    warehouse: Arc<dyn Warehouse>,
    builder: SqlBuilderAgent,
    pipeline: SqlPipeline,
}

#[async_trait]
impl ToolHandler for SqlRunTool {
    async fn execute(&self, args: Value, ctx: &mut RunContext) -> Result<Value> {
        let args: SqlRunArgs = serde_json::from_value(args)?;
        if args.plan.tables.is_empty() {
            return Err(AgentError::ValidationError {
                reason: "plan.tables must name at least one table".into(),
            });
        }

        let full_schema = load_schema(self.warehouse.as_ref(), ctx).await?;
        let schema = narrow_schema(&args.plan, &full_schema);
        let prompt = ctx.prompt.clone();

        let sql = match args.sql.filter(|s| !s.trim().is_empty()) {
            Some(sql) => sql,
            None => self
                .builder
                .build(&prompt, &args.plan, &schema, ctx)
                .await
                .map_err(|e| {
                    if e.is_turn_limit() {
                        AgentError::ToolExecutionFailed {
                            tool_name: SQL_RUN_TOOL.into(),
                            reason: format!("the SQL builder gave up: {e}"),
                        }
                    } else {
                        e
                    }
                })?,
        };

        let result = self
            .pipeline
            .run(
                SqlTaskInput {
                    prompt,
                    plan: args.plan,
                    schema,
                    sql,
                },
                ctx,
            )
            .await?;

        let content = result.to_tool_result();
        ctx.sql_runs.push(result);
        Ok(content)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinalizeArgs {
    status: AnswerStatus,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    reason_description: Option<String>,
}

/// Normalised finalize output, read back by [`InsightAgent::answer_question`].
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Finalized {
    status: AnswerStatus,
    answer: Option<String>,
    reason_description: Option<String>,
    artifact: Option<String>,
}

struct FinalizeTool;

#[async_trait]
impl ToolHandler for FinalizeTool {
    async fn execute(&self, args: Value, ctx: &mut RunContext) -> Result<Value> {
        let args: FinalizeArgs = serde_json::from_value(args)?;
        let reason = args
            .reason_description
            .filter(|s| !s.trim().is_empty());

        let finalized = match args.status {
            AnswerStatus::Answer => {
                let run = ctx.last_successful_sql_run().ok_or_else(|| AgentError::ValidationError {
                    reason: format!(
                        "status `answer` requires a `{SQL_RUN_TOOL}` call in this run that \
                         returned rows"
                    ),
                })?;
                let answer = args
                    .answer
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| AgentError::ValidationError {
                        reason: "status `answer` requires a non-empty `answer`".into(),
                    })?;
                Finalized {
                    status: AnswerStatus::Answer,
                    answer: Some(answer),
                    reason_description: None,
                    artifact: Some(run.sql.clone()),
                }
            }
            AnswerStatus::SqlError => {
                let run = ctx
                    .sql_runs
                    .iter()
                    .rev()
                    .find(|r| r.status == SqlRunStatus::SqlError)
                    .ok_or_else(|| AgentError::ValidationError {
                        reason: format!(
                            "status `sql_error` requires a failed `{SQL_RUN_TOOL}` call in this run"
                        ),
                    })?;
                Finalized {
                    status: AnswerStatus::SqlError,
                    answer: None,
                    reason_description: Some(format!(
                        "{}\nSuggestion:\n{}",
                        run.sql_error.as_deref().unwrap_or_default(),
                        run.sql_error_suggestion.as_deref().unwrap_or_default()
                    )),
                    artifact: Some(run.sql.clone()),
                }
            }
            AnswerStatus::NoData => Finalized {
                status: AnswerStatus::NoData,
                answer: None,
                reason_description: reason,
                artifact: ctx.last_sql_run().map(|r| r.sql.clone()),
            },
            AnswerStatus::TurnLimitExceeded => {
                return Err(AgentError::ValidationError {
                    reason: "status `turn_limit_exceeded` cannot be chosen".into(),
                });
            }
            status => {
                let reason = reason.ok_or_else(|| AgentError::ValidationError {
                    reason: format!("status `{}` requires `reasonDescription`", status.as_str()),
                })?;
                Finalized {
                    status,
                    answer: None,
                    reason_description: Some(reason),
                    artifact: None,
                }
            }
        };

        Ok(serde_json::to_value(finalized)?)
    }
}

fn sql_run_schema() -> Value {
    let strings = json!({ "type": "array", "items": { "type": "string" } });
    json!({
        "type": "object",
        "properties": {
            "plan": {
                "type": "object",
                "properties": {
                    "tables": {
                        "type": "array",
                        "minItems": 1,
                        "items": {
                            "type": "object",
                            "properties": {
                                "fullyQualifiedName": { "type": "string", "minLength": 1 },
                                "role": { "type": "string" }
                            },
                            "required": ["fullyQualifiedName"]
                        }
                    },
                    "dimensions": strings,
                    "metrics": strings,
                    "dateField": { "type": "string" },
                    "dateFilterDescription": { "type": "string" },
                    "whereConditions": strings,
                    "grouping": strings,
                    "requiredColumns": strings,
                    "notes": { "type": "string" }
                },
                "required": ["tables"]
            },
            "sql": { "type": "string" }
        },
        "required": ["plan"]
    })
}

fn finalize_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "status": {
                "type": "string",
                "enum": ["answer", "no_data", "not_relevant", "cannot_answer", "high_ambiguity", "sql_error"]
            },
            "answer": { "type": "string" },
            "reasonDescription": { "type": "string" }
        },
        "required": ["status"]
    })
}
