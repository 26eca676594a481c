//! Append-only telemetry for one run.
//!
//! The loop writes an [`LlmCallRecord`] per model call and a
//! [`ToolCallRecord`] per tool invocation.  Nothing in the engine reads these
//! back to make decisions; they exist for cost accounting and debugging.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::types::Usage;

/// One call to the chat-completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmCallRecord {
    /// Which agent loop made the call (`insight`, `sql_builder`, ...).
    pub agent: String,
    /// Zero-based turn within that loop.
    pub turn: u32,
    /// Model that answered, when the endpoint reported one.
    pub model: Option<String>,
    /// Token accounting, when the endpoint reported it.
    pub usage: Option<Usage>,
    /// Assistant text content for the turn.
    pub content: String,
    /// Reasoning trace, for providers that return one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Wall-clock latency of the call.
    pub latency_ms: u64,
    /// Error message when the call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

/// One tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub agent: String,
    pub turn: u32,
    pub tool_name: String,
    /// Raw argument JSON exactly as the model produced it.
    pub args_json: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub at: DateTime<Utc>,
}

/// Ordered log of everything the run asked the model and the tools to do.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Telemetry {
    pub llm_calls: Vec<LlmCallRecord>,
    pub tool_calls: Vec<ToolCallRecord>,
}

impl Telemetry {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_llm_call(&mut self, record: LlmCallRecord) {
        self.llm_calls.push(record);
    }

    pub fn record_tool_call(&mut self, record: ToolCallRecord) {
        self.tool_calls.push(record);
    }

    /// Sum of `total_tokens` across every call that reported usage.
    pub fn total_tokens(&self) -> u64 {
        self.llm_calls
            .iter()
            .filter_map(|c| c.usage.as_ref())
            .map(|u| u64::from(u.total_tokens))
            .sum()
    }

    /// Number of tool calls that failed.
    pub fn failed_tool_calls(&self) -> usize {
        self.tool_calls.iter().filter(|c| !c.success).count()
    }
}
