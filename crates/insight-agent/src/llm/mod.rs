//! LLM integration layer.
//!
//! - [`types`] -- Messages, tool calls, request options and usage.
//! - [`client`] -- The [`ChatCompletionClient`] trait and its HTTP implementation.
//! - [`normalize`] -- Pure parsing of raw responses into one tool-call shape.

pub mod client;
pub mod normalize;
pub mod types;

pub use client::{ChatCompletionClient, LlmClient, LlmClientConfig, LlmProvider, OpenRouterOptions};
pub use normalize::{parse_chat_completion, parse_commentary_tool_call};
pub use types::{
    AssistantMessage, ChatOptions, Message, Role, ToolCall, ToolChoice, ToolDefinition, Usage,
};
