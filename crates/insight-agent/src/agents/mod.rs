//! LLM-backed sub-agents for the SQL sub-task.
//!
//! Each sub-agent is a short conversation loop over a fresh registry holding
//! a single final "submit" tool.  The submit handler validates the model's
//! output, so a bad submission becomes a correction prompt instead of a
//! result.
//!
//! - [`SqlBuilderAgent`] -- writes the first SQL candidate from a plan.
//! - [`LlmRepairAgent`] -- proposes a fix for the current failed attempt.
//! - [`LlmAdvisorAgent`] -- explains a failure using only its inputs.

pub mod advisor;
pub mod repair;
pub mod sql_builder;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::RunContext;
use crate::error::{AgentError, Result};
use crate::llm::ChatCompletionClient;
use crate::registry::{ToolRegistry, ToolSpec};
use crate::runtime::{LoopConfig, Transcript, run_tool_loop};

pub use advisor::LlmAdvisorAgent;
pub use repair::LlmRepairAgent;
pub use sql_builder::SqlBuilderAgent;

/// Limits shared by every sub-agent loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubAgentConfig {
    pub max_turns: u32,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for SubAgentConfig {
    fn default() -> Self {
        Self {
            max_turns: 6,
            temperature: None,
            max_tokens: None,
        }
    }
}

/// Run a one-tool loop and return what the submit tool produced.
pub(crate) async fn run_structured(
    llm: &dyn ChatCompletionClient,
    ctx: &mut RunContext,
    agent_name: &str,
    system_prompt: String,
    user_prompt: String,
    submit: ToolSpec,
    config: &SubAgentConfig,
) -> Result<Value> {
    let mut registry = ToolRegistry::new();
    registry.register(submit.final_tool())?;

    let mut transcript = Transcript::new(system_prompt, user_prompt);
    let loop_config = LoopConfig {
        agent_name: agent_name.to_owned(),
        max_turns: config.max_turns,
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        ..LoopConfig::default()
    };

    let outcome = run_tool_loop(llm, &registry, ctx, &mut transcript, &loop_config).await?;
    Ok(outcome.content)
}

/// Reject anything but a single `SELECT` or `WITH` statement.
///
/// This is a guard on the first keyword and on statement separators, not a
/// SQL parser.
pub fn check_read_only(sql: &str) -> Result<()> {
    let body = strip_leading_noise(sql);
    let keyword: String = body
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();

    if keyword != "SELECT" && keyword != "WITH" {
        return Err(AgentError::ValidationError {
            reason: "SQL must be a single read-only SELECT or WITH statement".into(),
        });
    }

    let trimmed = body.trim_end().trim_end_matches(';');
    if trimmed.contains(';') {
        return Err(AgentError::ValidationError {
            reason: "SQL must contain exactly one statement".into(),
        });
    }
    Ok(())
}

/// Whitespace-insensitive form used to compare SQL candidates.
pub fn normalize_sql(sql: &str) -> String {
    sql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(';')
        .trim_end()
        .to_owned()
}

/// Skip whitespace, comments and opening parentheses before the first keyword.
fn strip_leading_noise(sql: &str) -> &str {
    let mut rest = sql;
    loop {
        let trimmed = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        if let Some(after) = trimmed.strip_prefix("--") {
            rest = after.split_once('\n').map_or("", |(_, tail)| tail);
        } else if let Some(after) = trimmed.strip_prefix("/*") {
            rest = after.split_once("*/").map_or("", |(_, tail)| tail);
        } else {
            return trimmed;
        }
    }
}
