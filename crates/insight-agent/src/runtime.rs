//! Tool-calling conversation loop.
//!
//! Drives a bounded number of model turns.  Each turn sends the transcript
//! and the registry's tool list to the model, appends the reply verbatim,
//! then executes any requested tools one after another.  The loop ends when
//! a final tool succeeds or the turn budget runs out.
//!
//! Tool failures never abort the loop: argument errors, schema errors and
//! handler errors become system messages the model can react to.  Only
//! configuration and transport errors propagate.

use std::time::Instant;

use chrono::Utc;
use serde_json::{Value, json};

use crate::context::RunContext;
use crate::error::{AgentError, Result};
use crate::llm::ChatCompletionClient;
use crate::llm::types::{AssistantMessage, ChatOptions, Message, ToolCall, ToolChoice};
use crate::registry::ToolRegistry;
use crate::summarize::serialize_tool_result;
use crate::telemetry::{LlmCallRecord, ToolCallRecord};

/// Default cap on a serialized tool result, in bytes.
pub const DEFAULT_MAX_TOOL_RESULT_CHARS: usize = 16_000;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for one conversation loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Label written into telemetry records.
    pub agent_name: String,

    /// Maximum number of model turns.
    pub max_turns: u32,

    /// Sampling temperature; the client default applies when `None`.
    pub temperature: Option<f32>,

    /// Generation cap; the client default applies when `None`.
    pub max_tokens: Option<u32>,

    /// Tool selection mode sent with every request.
    pub tool_choice: ToolChoice,

    /// Cap on a serialized tool result before it enters the transcript.
    pub max_tool_result_chars: usize,

    /// Stop early after this many consecutive turns without a tool call.
    /// `None` leaves only the turn budget in charge.
    pub max_idle_turns: Option<u32>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            agent_name: "insight".into(),
            max_turns: 16,
            temperature: None,
            max_tokens: None,
            tool_choice: ToolChoice::Auto,
            max_tool_result_chars: DEFAULT_MAX_TOOL_RESULT_CHARS,
            max_idle_turns: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Transcript
// ---------------------------------------------------------------------------

/// Ordered, append-only conversation history.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    /// Start a transcript with a system prompt and the user's question.
    pub fn new(system_prompt: impl Into<String>, user_message: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt), Message::user(user_message)],
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// A loop that ended through a final tool.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    /// The final tool's result, unchanged.
    pub content: Value,
    /// Which final tool ended the loop.
    pub tool_name: String,
    /// Number of model turns used.
    pub turns_used: u32,
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

/// Run the conversation loop until a final tool succeeds.
///
/// # Errors
///
/// - [`AgentError::MaxTurnsExceeded`] when the turn budget runs out.
/// - [`AgentError::IdleTurnLimit`] when `max_idle_turns` is set and reached.
/// - Configuration and transport errors from the client or from a tool.
pub async fn run_tool_loop(
    llm: &dyn ChatCompletionClient,
    registry: &ToolRegistry,
    ctx: &mut RunContext,
    transcript: &mut Transcript,
    config: &LoopConfig,
) -> Result<LoopOutcome> {
    let task_id = ctx.task_id;
    let max_turns = config.max_turns;
    let tools = registry.list_for_model();
    let mut idle_turns = 0u32;

    tracing::info!(
        task_id = %task_id,
        agent = %config.agent_name,
        max_turns,
        tool_count = tools.len(),
        "starting tool loop"
    );

    for turn in 0..max_turns {
        tracing::debug!(agent = %config.agent_name, turn, "tool loop turn start");

        let options = ChatOptions {
            tools: tools.clone(),
            tool_choice: config.tool_choice.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            response_format: None,
        };

        let started = Instant::now();
        let result = llm.complete(transcript.messages(), &options).await;
        let latency_ms = started.elapsed().as_millis() as u64;
        ctx.telemetry
            .record_llm_call(llm_record(config, turn, latency_ms, &result));
        let reply = result?;

        transcript.push(reply.to_message());

        if reply.tool_calls.is_empty() {
            idle_turns += 1;
            if let Some(limit) = config.max_idle_turns
                && idle_turns >= limit
            {
                tracing::warn!(task_id = %task_id, idle_turns, "tool loop stopped on idle turns");
                return Err(AgentError::IdleTurnLimit {
                    task_id,
                    idle_turns,
                });
            }
            if idle_turns >= 2 {
                tracing::warn!(task_id = %task_id, turn, idle_turns, "model keeps replying without tools");
            }
            transcript.push(Message::system(idle_nudge(
                registry,
                &reply.content,
                idle_turns,
            )));
            continue;
        }
        idle_turns = 0;

        tracing::info!(
            task_id = %task_id,
            turn,
            tool_count = reply.tool_calls.len(),
            tools = ?reply.tool_calls.iter().map(|c| &c.name).collect::<Vec<_>>(),
            "model requested tool calls"
        );

        for call in &reply.tool_calls {
            let args_json = call.arguments_or_empty();
            let result = registry.invoke(&call.name, args_json, ctx).await;

            ctx.telemetry.record_tool_call(ToolCallRecord {
                agent: config.agent_name.clone(),
                turn,
                tool_name: call.name.clone(),
                args_json: call.arguments_json.clone(),
                success: result.is_ok(),
                error_message: result.as_ref().err().map(ToString::to_string),
                at: Utc::now(),
            });

            match result {
                Ok(outcome) if outcome.is_final => {
                    tracing::info!(
                        task_id = %task_id,
                        agent = %config.agent_name,
                        tool = %call.name,
                        turns = turn + 1,
                        "tool loop completed"
                    );
                    return Ok(LoopOutcome {
                        content: outcome.content,
                        tool_name: call.name.clone(),
                        turns_used: turn + 1,
                    });
                }
                Ok(outcome) => {
                    let content =
                        serialize_tool_result(&outcome.content, config.max_tool_result_chars);
                    transcript.push(Message::tool_result(&call.id, content));
                }
                Err(e) if e.is_fatal() && !e.is_turn_limit() => {
                    tracing::warn!(tool = %call.name, error = %e, "fatal tool error");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(tool = %call.name, error = %e, "tool call failed");
                    transcript.push(Message::tool_result(
                        &call.id,
                        json!({ "error": e.to_string() }).to_string(),
                    ));
                    transcript.push(Message::system(failure_message(call, &e)));
                }
            }
        }
    }

    tracing::warn!(task_id = %task_id, agent = %config.agent_name, max_turns, "tool loop exhausted turns");
    Err(AgentError::MaxTurnsExceeded { task_id, max_turns })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn llm_record(
    config: &LoopConfig,
    turn: u32,
    latency_ms: u64,
    result: &Result<AssistantMessage>,
) -> LlmCallRecord {
    match result {
        Ok(reply) => LlmCallRecord {
            agent: config.agent_name.clone(),
            turn,
            model: reply.model.clone(),
            usage: reply.usage,
            content: reply.content.clone(),
            reasoning: reply.reasoning.clone(),
            latency_ms,
            error: None,
            at: Utc::now(),
        },
        Err(e) => LlmCallRecord {
            agent: config.agent_name.clone(),
            turn,
            model: None,
            usage: None,
            content: String::new(),
            reasoning: None,
            latency_ms,
            error: Some(e.to_string()),
            at: Utc::now(),
        },
    }
}

/// System message for a turn without tool calls.
fn idle_nudge(registry: &ToolRegistry, content: &str, idle_turns: u32) -> String {
    let mut nudge = match registry.final_tool_name() {
        Some(final_tool) if !content.trim().is_empty() => format!(
            "Do not answer in free text. When you are ready to answer, call the \
             `{final_tool}` tool with your result; otherwise call one of the other tools."
        ),
        _ => "You must call one of the available tools to make progress.".to_owned(),
    };
    if idle_turns >= 2 {
        nudge.push_str(&format!(
            " Available tools: {}.",
            registry.names().join(", ")
        ));
    }
    nudge
}

/// System message describing a failed tool call.
fn failure_message(call: &ToolCall, err: &AgentError) -> String {
    let hint = match err {
        AgentError::UnknownTool { .. } => "Call one of the tools you were given.",
        AgentError::ValidationError { .. } => {
            "Fix the arguments so they match the tool's input schema and call it again."
        }
        _ => "Adjust your approach and try again.",
    };
    format!("Tool `{}` failed: {err}. {hint}", call.name)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
