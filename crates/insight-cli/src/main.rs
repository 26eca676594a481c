//! CLI entry point for the insight engine.
//!
//! This binary provides the `insight` command: ask a question about a local
//! SQLite data mart, list the tools the model is offered, or check the
//! configuration.

mod helpers;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::info;

use insight_agent::{
    AnswerRequest, Budgets, InsightAgent, InsightConfig, LlmClient, LlmProvider,
};
use insight_sqlite::SqliteWarehouse;

use crate::helpers::{init_tracing, load_config, render_answer};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Answer analytics questions over a data mart with a tool-calling model.
#[derive(Parser)]
#[command(name = "insight", version)]
struct Cli {
    /// Configuration file (TOML, or JSON by extension).
    #[arg(long, global = true, default_value = "config/default.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question about a SQLite data mart.
    Ask {
        /// The question, in natural language.
        question: String,

        /// SQLite database to query (opened read-only).
        #[arg(long)]
        db: PathBuf,

        #[arg(long, default_value = "local")]
        project_id: String,

        #[arg(long, default_value = "default")]
        data_mart_id: String,

        /// Maximum rows returned to the model (default 30).
        #[arg(long)]
        max_rows: Option<u64>,

        /// Maximum bytes a query may scan, from the dry-run estimate.
        #[arg(long)]
        max_bytes: Option<u64>,

        /// Report template the answer will be inserted into.
        #[arg(long)]
        template: Option<PathBuf>,

        /// Language code the answer should be written in (e.g. `de`).
        #[arg(long)]
        language: Option<String>,

        /// Wall-clock limit for the whole run.
        #[arg(long, default_value_t = 600)]
        timeout_secs: u64,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the tool definitions offered to the model.
    Tools,

    /// Validate the configuration and report missing LLM settings.
    Check,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing("info", cli.json_logs);

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Ask {
            question,
            db,
            project_id,
            data_mart_id,
            max_rows,
            max_bytes,
            template,
            language,
            timeout_secs,
            json,
        } => {
            let template = template
                .map(|path| {
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read template {}", path.display()))
                })
                .transpose()?;
            let request = AnswerRequest {
                question,
                project_id,
                data_mart_id,
                budgets: Budgets {
                    max_rows,
                    max_bytes_processed: max_bytes,
                },
                template,
                prompt_language: language,
            };
            cmd_ask(config, db, request, Duration::from_secs(timeout_secs), json).await
        }
        Commands::Tools => cmd_tools(config),
        Commands::Check => cmd_check(&config),
    }
}

fn build_agent(config: &InsightConfig, warehouse: SqliteWarehouse) -> Result<InsightAgent> {
    let llm = LlmClient::new(config.llm.clone()).context("failed to build LLM client")?;
    Ok(InsightAgent::new(
        Arc::new(llm),
        Arc::new(warehouse),
        config.agent,
        config.sql,
    ))
}

// ---------------------------------------------------------------------------
// Subcommand: ask
// ---------------------------------------------------------------------------

async fn cmd_ask(
    config: InsightConfig,
    db: PathBuf,
    request: AnswerRequest,
    timeout: Duration,
    json: bool,
) -> Result<()> {
    config
        .llm
        .ensure_configured()
        .context("set AI_BASE_URL, AI_API_KEY and AI_MODEL, or fill in [llm]")?;

    let warehouse = SqliteWarehouse::open(&db)
        .with_context(|| format!("failed to open data mart {}", db.display()))?;
    let agent = build_agent(&config, warehouse)?;

    info!(db = %db.display(), model = %config.llm.model, "asking question");

    let answer = tokio::time::timeout(timeout, agent.answer_question(request))
        .await
        .map_err(|_| anyhow!("run timed out after {}s", timeout.as_secs()))?
        .context("run failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
    } else {
        print!("{}", render_answer(&answer));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: tools
// ---------------------------------------------------------------------------

fn cmd_tools(config: InsightConfig) -> Result<()> {
    let warehouse = SqliteWarehouse::open_in_memory()?;
    let agent = build_agent(&config, warehouse)?;
    let tools = agent.tool_definitions()?;
    println!("{}", serde_json::to_string_pretty(&tools)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: check
// ---------------------------------------------------------------------------

fn cmd_check(config: &InsightConfig) -> Result<()> {
    let provider = match config.llm.provider {
        LlmProvider::OpenAI => "openai-compatible",
        LlmProvider::OpenRouter => "openrouter",
    };
    println!("provider:        {provider}");
    println!("endpoint:        {}", config.llm.effective_base_url());
    println!("model:           {}", config.llm.model);
    println!("max turns:       {}", config.agent.max_turns);
    println!("sub-agent turns: {}", config.agent.sub_agent_max_turns);
    println!(
        "sql errors:      {} (stop on repeat: {})",
        config.sql.policy.max_errors_total, config.sql.policy.stop_on_repeated_same_error
    );

    match config.llm.ensure_configured() {
        Ok(()) => {
            println!("llm:             configured");
            Ok(())
        }
        Err(e) => Err(anyhow!(e).context("configuration is incomplete")),
    }
}
