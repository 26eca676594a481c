//! File and environment configuration.
//!
//! [`InsightConfig`] is read from TOML (or JSON, by extension), then the
//! `AI_*` environment variables are laid over the `[llm]` section.  Every
//! field has a default, so an empty file is a valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::agent::InsightAgentConfig;
use crate::error::{AgentError, Result};
use crate::llm::LlmClientConfig;
use crate::sql::SqlPipelineConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightConfig {
    pub llm: LlmClientConfig,
    pub agent: InsightAgentConfig,
    pub sql: SqlPipelineConfig,
}

impl InsightConfig {
    /// Load from `path`.  A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ConfigError`] if the file cannot be read or
    /// parsed, or if the result fails [`Self::validate`].
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!(path = ?path, "configuration file does not exist, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| AgentError::ConfigError {
            reason: format!("failed to read config file {}: {e}", path.display()),
        })?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("json") {
            let config: Self =
                serde_json::from_str(&content).map_err(|e| AgentError::ConfigError {
                    reason: format!("failed to parse JSON config: {e}"),
                })?;
            config.validate()?;
            config
        } else {
            Self::from_toml(&content)?
        };

        tracing::info!(path = ?path, "configuration loaded from file");
        Ok(config)
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ConfigError`] on syntax or validation failure.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| AgentError::ConfigError {
            reason: format!("failed to parse TOML config: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay `AI_*` variables from the process environment.
    pub fn apply_process_env(&mut self) {
        self.llm.apply_env(|key| std::env::var(key).ok());
    }

    /// Reject settings that would make a run meaningless.
    ///
    /// LLM credentials are not checked here; the client reports them at call
    /// time so tool listing works without them.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::ConfigError`] naming the offending key.
    pub fn validate(&self) -> Result<()> {
        let invalid = |key: &str, why: &str| {
            Err(AgentError::ConfigError {
                reason: format!("{key} {why}"),
            })
        };

        if self.agent.max_turns == 0 {
            return invalid("agent.max_turns", "must be at least 1");
        }
        if self.agent.sub_agent_max_turns == 0 {
            return invalid("agent.sub_agent_max_turns", "must be at least 1");
        }
        if self.agent.max_idle_turns == Some(0) {
            return invalid("agent.max_idle_turns", "must be at least 1 when set");
        }
        if self.agent.max_tool_result_chars < 256 {
            return invalid("agent.max_tool_result_chars", "must be at least 256");
        }
        if self.sql.repair_window == 0 {
            return invalid("sql.repair_window", "must be at least 1");
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return invalid("llm.temperature", "must be between 0 and 2");
        }
        if self.llm.max_tokens == 0 {
            return invalid("llm.max_tokens", "must be at least 1");
        }
        if self.llm.timeout_secs == 0 {
            return invalid("llm.timeout_secs", "must be at least 1");
        }
        Ok(())
    }
}
