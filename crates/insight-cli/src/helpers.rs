//! Startup helpers: tracing, configuration and output formatting.

use std::path::Path;

use anyhow::{Context, Result};
use insight_agent::{AnswerStatus, InsightAnswer, InsightConfig};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Install the global subscriber.  Logs go to stderr so stdout stays clean
/// for answers.
pub fn init_tracing(default_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Load `.env`, the config file, then the `AI_*` overrides.
pub fn load_config(path: &Path) -> Result<InsightConfig> {
    if let Ok(env_path) = dotenvy::dotenv() {
        tracing::debug!(path = %env_path.display(), "loaded .env");
    }

    let mut config = InsightConfig::load_from_file(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    config.apply_process_env();
    Ok(config)
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Human-readable rendering of a finished run.
pub fn render_answer(answer: &InsightAnswer) -> String {
    let mut out = String::new();
    match answer.status {
        AnswerStatus::Answer => {
            out.push_str(answer.answer.as_deref().unwrap_or_default());
            out.push('\n');
        }
        status => {
            out.push_str(&format!("[{}]\n", status.as_str()));
            if let Some(reason) = &answer.reason_description {
                out.push_str(reason);
                out.push('\n');
            }
        }
    }

    if let Some(sql) = &answer.artifact {
        out.push_str("\nSQL:\n");
        out.push_str(sql);
        out.push('\n');
    }

    let telemetry = &answer.telemetry;
    out.push_str(&format!(
        "\n{} model calls, {} tool calls, {} tokens\n",
        telemetry.llm_calls.len(),
        telemetry.tool_calls.len(),
        telemetry.total_tokens(),
    ));
    out
}
