//! Core types for LLM interaction.
//!
//! These types are provider-agnostic.  The [`super::client`] module translates
//! them into the OpenAI-compatible wire format and [`super::normalize`] turns
//! raw responses back into an [`AssistantMessage`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The role of a participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions and loop nudges.
    System,
    /// Input from the human user.
    User,
    /// Output from the LLM.
    Assistant,
    /// Result of a tool invocation, fed back to the model.
    Tool,
}

/// A single message in a conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced this message.
    pub role: Role,

    /// The textual content of the message.
    ///
    /// For [`Role::Tool`] messages this is the serialized tool result.  For
    /// assistant turns that only call tools it may be empty.
    #[serde(default)]
    pub content: String,

    /// Tool calls requested by the assistant.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Which tool call a [`Role::Tool`] message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create an assistant message carrying text and any tool calls.
    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tool calls
// ---------------------------------------------------------------------------

/// A normalized tool invocation requested by the LLM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Identifier used to correlate the tool result.
    pub id: String,

    /// Name of the tool to invoke.
    pub name: String,

    /// Raw JSON arguments exactly as the model produced them.  Empty when
    /// the model sent none.
    #[serde(default)]
    pub arguments_json: String,
}

impl ToolCall {
    /// Arguments to hand to the registry, defaulting to `{}` when absent.
    pub fn arguments_or_empty(&self) -> &str {
        if self.arguments_json.trim().is_empty() {
            "{}"
        } else {
            &self.arguments_json
        }
    }
}

/// A tool definition as exposed to the model.  Never carries a handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,

    /// Human-readable description of what the tool does.
    pub description: String,

    /// JSON Schema describing the tool's input parameters.
    pub input_schema: Value,
}

// ---------------------------------------------------------------------------
// Request options
// ---------------------------------------------------------------------------

/// How the model may choose among the offered tools.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    /// Let the model decide.
    #[default]
    Auto,
    /// Forbid tool calls.
    None,
    /// Require at least one tool call.
    Required,
    /// Force one specific function.
    #[serde(untagged)]
    Function(String),
}

impl ToolChoice {
    /// Wire representation for the `tool_choice` request field.
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Auto => Value::from("auto"),
            Self::None => Value::from("none"),
            Self::Required => Value::from("required"),
            Self::Function(name) => serde_json::json!({
                "type": "function",
                "function": { "name": name },
            }),
        }
    }
}

/// Per-call options for [`super::ChatCompletionClient::complete`].
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Tools the model may call this turn.
    pub tools: Vec<ToolDefinition>,
    /// Tool selection mode.  Ignored when `tools` is empty.
    pub tool_choice: ToolChoice,
    /// Sampling temperature; the client default applies when `None`.
    pub temperature: Option<f32>,
    /// Generation cap; the client default applies when `None`.
    pub max_tokens: Option<u32>,
    /// Optional `response_format` object passed through verbatim.
    pub response_format: Option<Value>,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Token usage reported by the endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u32>,
}

/// One normalized assistant turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantMessage {
    /// Text content; empty when the model only called tools.
    pub content: String,
    /// Tool calls, from whichever response shape carried them.
    pub tool_calls: Vec<ToolCall>,
    /// Token usage, when reported.
    pub usage: Option<Usage>,
    /// Model that produced the answer, when reported.
    pub model: Option<String>,
    /// Reasoning trace, for providers that return one.
    pub reasoning: Option<String>,
}

impl AssistantMessage {
    /// Convert into the transcript message appended by the loop.
    pub fn to_message(&self) -> Message {
        Message::assistant(self.content.clone(), self.tool_calls.clone())
    }
}
