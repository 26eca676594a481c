//! SQL advisor sub-agent.
//!
//! The advisor turns a failed SQL sub-task into a user-facing summary and
//! suggestion.  Its submission is checked for grounding: every identifier it
//! wraps in backticks must occur somewhere in the inputs it was given.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::agents::{SubAgentConfig, run_structured};
use crate::context::RunContext;
use crate::error::{AgentError, Result};
use crate::llm::ChatCompletionClient;
use crate::prompts;
use crate::registry::{ToolHandler, ToolSpec};
use crate::sql::machine::AdvisorAgent;
use crate::sql::types::{Advice, AdvisorInput};

const SUBMIT_TOOL: &str = "submit_advice";

/// Raw error messages shorter than this are not worth policing.
const MIN_ECHO_LEN: usize = 24;

static BACKTICKED: OnceLock<Option<Regex>> = OnceLock::new();

fn backticked() -> Option<&'static Regex> {
    BACKTICKED
        .get_or_init(|| {
            Regex::new(r"`([^`\n]+)`")
                .map_err(|e| tracing::error!(error = %e, "failed to compile identifier regex"))
                .ok()
        })
        .as_ref()
}

#[derive(Debug, Deserialize)]
struct Submission {
    summary: String,
    suggestion: String,
}

/// Rejects advice that mentions names absent from the inputs.
struct SubmitAdvice {
    /// Lowercased concatenation of everything the advisor was shown.
    known_text: String,
    /// Lowercased raw error message.
    raw_error: String,
}

impl SubmitAdvice {
    fn new(input: &AdvisorInput) -> Self {
        let plan = serde_json::to_string(&input.plan).unwrap_or_default();
        let known_text = [
            input.prompt.as_str(),
            input.sql.as_str(),
            input.error.message.as_str(),
            plan.as_str(),
            &input.schema.to_string(),
        ]
        .join("\n")
        .to_lowercase();

        Self {
            known_text,
            raw_error: input.error.message.trim().to_lowercase(),
        }
    }

    fn ungrounded<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let Some(re) = backticked() else {
            return Vec::new();
        };
        re.captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().trim())
            .filter(|name| !name.is_empty() && !self.known_text.contains(&name.to_lowercase()))
            .collect()
    }
}

#[async_trait]
impl ToolHandler for SubmitAdvice {
    async fn execute(&self, args: Value, _ctx: &mut RunContext) -> Result<Value> {
        let submission: Submission = serde_json::from_value(args)?;
        let summary = submission.summary.trim();
        let suggestion = submission.suggestion.trim();

        if summary.is_empty() || suggestion.is_empty() {
            return Err(AgentError::ValidationError {
                reason: "summary and suggestion must both be non-empty".into(),
            });
        }

        if self.raw_error.len() >= MIN_ECHO_LEN && summary.to_lowercase().contains(&self.raw_error) {
            return Err(AgentError::ValidationError {
                reason: "do not paste the raw error message; explain it in plain words".into(),
            });
        }

        let mut unknown = self.ungrounded(summary);
        unknown.extend(self.ungrounded(suggestion));
        if !unknown.is_empty() {
            return Err(AgentError::ValidationError {
                reason: format!(
                    "these names do not appear in the question, SQL, error, plan or schema: {}",
                    unknown.join(", ")
                ),
            });
        }

        Ok(json!({ "summary": summary, "suggestion": suggestion }))
    }
}

/// [`AdvisorAgent`] backed by a chat-completion model.
#[derive(Clone)]
pub struct LlmAdvisorAgent {
    llm: Arc<dyn ChatCompletionClient>,
    config: SubAgentConfig,
}

impl LlmAdvisorAgent {
    #[must_use]
    pub fn new(llm: Arc<dyn ChatCompletionClient>, config: SubAgentConfig) -> Self {
        Self { llm, config }
    }
}

#[async_trait]
impl AdvisorAgent for LlmAdvisorAgent {
    async fn run(&self, input: AdvisorInput, ctx: &mut RunContext) -> Result<Advice> {
        let submit = ToolSpec::new(
            SUBMIT_TOOL,
            "Submit the explanation of the SQL failure and a suggestion for the user.",
            json!({
                "type": "object",
                "properties": {
                    "summary": { "type": "string", "minLength": 1 },
                    "suggestion": { "type": "string", "minLength": 1 }
                },
                "required": ["summary", "suggestion"]
            }),
            Arc::new(SubmitAdvice::new(&input)),
        );

        let system_prompt =
            prompts::advisor_system_prompt(SUBMIT_TOOL, ctx.prompt_language.as_deref());
        let content = run_structured(
            self.llm.as_ref(),
            ctx,
            "sql_advisor",
            system_prompt,
            prompts::advisor_user_prompt(&input),
            submit,
            &self.config,
        )
        .await?;

        Ok(serde_json::from_value(content)?)
    }
}
