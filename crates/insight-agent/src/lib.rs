//! Tool-calling engine that answers analytics questions over a data mart.
//!
//! A question enters [`InsightAgent::answer_question`], which runs a
//! conversation loop against a chat-completion model.  The model plans a
//! query, the SQL state machine validates, executes and repairs it against a
//! [`Warehouse`], and the run ends when the model calls the final tool with
//! a status the engine can check against real results.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌─────────────┐
//! │ InsightAgent │────>│ run_tool_loop│────>│ ToolRegistry│
//! └──────────────┘     └──────┬───────┘     └──────┬──────┘
//!                             │                    │ sql_run
//!                      ┌──────┴───────┐     ┌──────┴──────┐     ┌───────────┐
//!                      │  LLM client  │     │ SqlPipeline │────>│ Warehouse │
//!                      └──────────────┘     └──────┬──────┘     └───────────┘
//!                                                  │
//!                                      repair / advisor sub-agents
//! ```
//!
//! ## Modules
//!
//! - [`llm`] -- Chat-completion client, wire types and response normalisation.
//! - [`registry`] -- Per-run tool registry with schema-validated dispatch.
//! - [`runtime`] -- The bounded tool-calling conversation loop.
//! - [`sql`] -- The validate, execute and repair state machine.
//! - [`budget`] -- Row and byte budgets, error canonicalisation and tracking.
//! - [`agents`] -- LLM-backed SQL builder, repair and advisor sub-agents.
//! - [`agent`] -- The insight agent and its tools.
//! - [`config`] -- TOML and environment configuration.
//! - [`error`] -- Agent error types.

pub mod agent;
pub mod agents;
pub mod budget;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod prompts;
pub mod registry;
pub mod runtime;
pub mod sql;
pub mod summarize;
pub mod telemetry;
pub mod warehouse;

// Re-export the most commonly used types at the crate root.
pub use agent::{AnswerRequest, AnswerStatus, InsightAgent, InsightAgentConfig, InsightAnswer};
pub use budget::{Budgets, ErrorPolicy, ErrorTracker, canonicalize_error};
pub use config::InsightConfig;
pub use context::RunContext;
pub use error::{AgentError, Result};
pub use llm::{
    AssistantMessage, ChatCompletionClient, ChatOptions, LlmClient, LlmClientConfig, LlmProvider,
    Message, Role, ToolCall, ToolChoice, ToolDefinition,
};
pub use registry::{ToolHandler, ToolOutcome, ToolRegistrar, ToolRegistry, ToolSpec};
pub use runtime::{LoopConfig, LoopOutcome, Transcript, run_tool_loop};
pub use sql::{
    AdvisorAgent, QueryPlan, RepairAgent, SqlPipeline, SqlPipelineConfig, SqlRunResult,
    SqlRunStatus, SqlTaskInput,
};
pub use telemetry::Telemetry;
pub use warehouse::{DataMartRef, DryRunResult, Row, RowStream, Warehouse};
