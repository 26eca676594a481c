//! Agent error types.
//!
//! Every subsystem of the engine surfaces failures through [`AgentError`].
//! Variants are grouped by how the conversation loop treats them: validation
//! and tool failures are recovered inside the loop, while configuration and
//! transport failures are fatal and propagate to the caller.

use uuid::Uuid;

/// Unified error type for the insight engine.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    // -- Configuration errors ------------------------------------------------
    /// Required connection parameters for the chat-completion endpoint are
    /// not set.
    #[error("llm client is not configured: missing {missing}")]
    LlmNotConfigured { missing: String },

    /// A tool with the same name is already registered.
    #[error("tool `{tool_name}` is already registered")]
    DuplicateTool { tool_name: String },

    /// Configuration validation or loading failed.
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    // -- Transport errors ----------------------------------------------------
    /// An HTTP request to the LLM provider failed before a response arrived.
    #[error("llm request failed: {reason}")]
    LlmRequestFailed { reason: String },

    /// The LLM provider answered with a non-success status.
    #[error("llm endpoint returned {status}: {body}")]
    LlmHttpStatus { status: u16, body: String },

    /// The provider refused the request because of its content policy.
    #[error("llm request rejected by content filter ({status}): {body}")]
    ContentFiltered { status: u16, body: String },

    // -- Protocol errors -----------------------------------------------------
    /// The LLM response could not be parsed into the expected format.
    #[error("llm response parse error: {reason}")]
    LlmParseFailed { reason: String },

    // -- Loop errors ---------------------------------------------------------
    /// The conversation loop exceeded the maximum number of allowed turns.
    #[error("tool loop exceeded max turns ({max_turns}) for task {task_id}")]
    MaxTurnsExceeded { task_id: Uuid, max_turns: u32 },

    /// The model produced too many consecutive turns without calling a tool.
    #[error("tool loop stopped after {idle_turns} idle turns for task {task_id}")]
    IdleTurnLimit { task_id: Uuid, idle_turns: u32 },

    // -- Tool errors ---------------------------------------------------------
    /// A tool call referenced by the model does not exist in the registry.
    #[error("unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    /// A tool invocation failed.
    #[error("tool execution failed for `{tool_name}`: {reason}")]
    ToolExecutionFailed { tool_name: String, reason: String },

    /// Tool arguments or a tool's output failed validation.
    #[error("validation error: {reason}")]
    ValidationError { reason: String },

    // -- Collaborators -------------------------------------------------------
    /// The warehouse collaborator failed outside of a SQL step.
    #[error("warehouse error: {reason}")]
    Warehouse { reason: String },

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Generic -------------------------------------------------------------
    /// Catch-all for unexpected internal errors.  Prefer a typed variant
    /// whenever possible.
    #[error("internal agent error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Whether this error must abort the surrounding loop instead of being
    /// fed back to the model as a correction prompt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::LlmNotConfigured { .. }
                | Self::DuplicateTool { .. }
                | Self::ConfigError { .. }
                | Self::LlmRequestFailed { .. }
                | Self::LlmHttpStatus { .. }
                | Self::ContentFiltered { .. }
                | Self::LlmParseFailed { .. }
                | Self::MaxTurnsExceeded { .. }
                | Self::IdleTurnLimit { .. }
        )
    }

    /// Whether this error marks a loop that ran out of turns.
    pub fn is_turn_limit(&self) -> bool {
        matches!(
            self,
            Self::MaxTurnsExceeded { .. } | Self::IdleTurnLimit { .. }
        )
    }
}

/// Convenience alias used throughout the agent crate.
pub type Result<T> = std::result::Result<T, AgentError>;

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::LlmRequestFailed {
            reason: err.to_string(),
        }
    }
}
