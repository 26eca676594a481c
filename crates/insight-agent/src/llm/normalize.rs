//! Normalization of chat-completion responses.
//!
//! Models express "call this tool" in three historically distinct shapes.
//! [`parse_chat_completion`] checks them in priority order and uses the first
//! one that yields a call:
//!
//! 1. the structured `tool_calls` array,
//! 2. the legacy single `function_call` field,
//! 3. a `to=functions.NAME ... <|message|>{json}<|call|>` marker embedded in
//!    the text content (see [`parse_commentary_tool_call`]).
//!
//! All functions here are pure so they can be tested without a network.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::llm::types::{AssistantMessage, ToolCall, Usage};

static COMMENTARY_CALL: OnceLock<Option<Regex>> = OnceLock::new();

fn commentary_call() -> Option<&'static Regex> {
    COMMENTARY_CALL
        .get_or_init(|| {
            Regex::new(r"to=functions\.([\w.-]+)(?s:.*?)<\|message\|>(\{(?s:.*?)\})<\|call\|>")
                .map_err(|e| tracing::error!(error = %e, "failed to compile commentary regex"))
                .ok()
        })
        .as_ref()
}

/// Parse a raw `/chat/completions` response body.
///
/// # Errors
///
/// Returns [`AgentError::LlmParseFailed`] when the body carries no
/// `choices[0].message`.
pub fn parse_chat_completion(v: &Value) -> Result<AssistantMessage> {
    let message = &v["choices"][0]["message"];

    if !message.is_object() {
        return Err(AgentError::LlmParseFailed {
            reason: "missing `choices[0].message` in response".into(),
        });
    }

    let content = message["content"].as_str().unwrap_or_default().to_owned();

    let tool_calls = tool_calls_from_array(message)
        .or_else(|| tool_call_from_function_call(message))
        .or_else(|| parse_commentary_tool_call(&content).map(|call| vec![call]))
        .unwrap_or_default()
        .into_iter()
        .map(with_synthetic_id)
        .collect();

    Ok(AssistantMessage {
        content,
        tool_calls,
        usage: extract_usage(v),
        model: v["model"].as_str().map(str::to_owned),
        reasoning: extract_reasoning(v),
    })
}

/// Extract a tool call from an in-content commentary marker.
///
/// Returns `None` when the text holds no complete marker.
pub fn parse_commentary_tool_call(text: &str) -> Option<ToolCall> {
    let caps = commentary_call()?.captures(text)?;
    Some(ToolCall {
        id: String::new(),
        name: caps[1].to_owned(),
        arguments_json: caps[2].to_owned(),
    })
}

/// Token usage from the top-level `usage` object, if present.
///
/// Reasoning tokens are read from `usage.reasoning_tokens` or, for
/// OpenAI-style bodies, `usage.completion_tokens_details.reasoning_tokens`.
pub fn extract_usage(v: &Value) -> Option<Usage> {
    let usage = v.get("usage").filter(|u| u.is_object())?;
    let field = |key: &str| {
        usage[key]
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .unwrap_or(0)
    };

    let prompt_tokens = field("prompt_tokens");
    let completion_tokens = field("completion_tokens");
    let total_tokens = match field("total_tokens") {
        0 => prompt_tokens.saturating_add(completion_tokens),
        n => n,
    };
    let reasoning_tokens = usage["reasoning_tokens"]
        .as_u64()
        .or_else(|| usage["completion_tokens_details"]["reasoning_tokens"].as_u64())
        .and_then(|n| u32::try_from(n).ok());

    Some(Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
        reasoning_tokens,
    })
}

/// Reasoning trace from whichever field the provider used.
pub fn extract_reasoning(v: &Value) -> Option<String> {
    let message = &v["choices"][0]["message"];
    [
        &message["reasoning_content"],
        &message["reasoning"],
        &v["reasoning"],
        &v["output"]["reasoning"],
    ]
    .into_iter()
    .filter_map(Value::as_str)
    .find(|s| !s.is_empty())
    .map(str::to_owned)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn tool_calls_from_array(message: &Value) -> Option<Vec<ToolCall>> {
    let calls: Vec<ToolCall> = message["tool_calls"]
        .as_array()?
        .iter()
        .filter_map(|tc| {
            let func = &tc["function"];
            let name = func["name"].as_str().filter(|n| !n.is_empty())?;
            Some(ToolCall {
                id: tc["id"].as_str().unwrap_or_default().to_owned(),
                name: name.to_owned(),
                arguments_json: arguments_to_string(&func["arguments"]),
            })
        })
        .collect();

    (!calls.is_empty()).then_some(calls)
}

fn tool_call_from_function_call(message: &Value) -> Option<Vec<ToolCall>> {
    let fc = &message["function_call"];
    let name = fc["name"].as_str().filter(|n| !n.is_empty())?;
    Some(vec![ToolCall {
        id: String::new(),
        name: name.to_owned(),
        arguments_json: arguments_to_string(&fc["arguments"]),
    }])
}

/// Some providers send arguments as an object instead of a JSON string.
fn arguments_to_string(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        Value::Null => "{}".to_owned(),
        other => other.to_string(),
    }
}

fn with_synthetic_id(mut call: ToolCall) -> ToolCall {
    if call.id.is_empty() {
        call.id = format!("call_{}", Uuid::now_v7().simple());
    }
    call
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
