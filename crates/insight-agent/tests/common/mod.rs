//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use serde_json::{Value, json};

use insight_agent::sql::{Advice, AdvisorInput, RepairInput, RepairVerdict};
use insight_agent::{
    AdvisorAgent, AgentError, AssistantMessage, ChatCompletionClient, ChatOptions, DataMartRef,
    DryRunResult, Message, RepairAgent, Result, Role, Row, RowStream, RunContext, ToolCall,
    Warehouse,
};

// ═══════════════════════════════════════════════════════════════════════
//  Chat client
// ═══════════════════════════════════════════════════════════════════════

/// Replays canned replies in order and records what each call offered.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<AssistantMessage>>,
    /// Tool names offered on each call, in call order.
    pub offered: Mutex<Vec<Vec<String>>>,
    /// Transcript length on each call.
    pub transcript_lens: Mutex<Vec<usize>>,
    /// System prompt and first user message of each call.
    pub prompts: Mutex<Vec<(String, String)>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<AssistantMessage>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.offered.lock().unwrap().len()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatCompletionClient for ScriptedLlm {
    async fn complete(&self, messages: &[Message], options: &ChatOptions) -> Result<AssistantMessage> {
        self.offered
            .lock()
            .unwrap()
            .push(options.tools.iter().map(|t| t.name.clone()).collect());
        self.transcript_lens.lock().unwrap().push(messages.len());
        let first = |role: Role| {
            messages
                .iter()
                .find(|m| m.role == role)
                .map(|m| m.content.clone())
                .unwrap_or_default()
        };
        self.prompts
            .lock()
            .unwrap()
            .push((first(Role::System), first(Role::User)));
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }
}

/// An assistant turn that calls one tool.
pub fn tool_call(name: &str, args: Value) -> AssistantMessage {
    AssistantMessage {
        tool_calls: vec![ToolCall {
            id: format!("call_{name}"),
            name: name.into(),
            arguments_json: args.to_string(),
        }],
        ..AssistantMessage::default()
    }
}

/// An assistant turn with prose only.
pub fn text(content: &str) -> AssistantMessage {
    AssistantMessage {
        content: content.into(),
        ..AssistantMessage::default()
    }
}

pub fn plan() -> Value {
    json!({
        "tables": [{ "fullyQualifiedName": "ads.daily", "role": "fact" }],
        "dimensions": ["campaign_name"],
        "metrics": ["SUM(clicks)"]
    })
}

// ═══════════════════════════════════════════════════════════════════════
//  Warehouse
// ═══════════════════════════════════════════════════════════════════════

/// Per-SQL scripted dry-runs and results.  Unknown SQL dry-runs as valid
/// with 100 bytes and returns no rows.
#[derive(Default)]
pub struct ScriptedWarehouse {
    dry_runs: HashMap<String, DryRunResult>,
    results: HashMap<String, Vec<std::result::Result<Row, String>>>,
    setup_failures: HashMap<String, String>,
    schema: Value,
    pub dry_run_calls: Mutex<Vec<String>>,
    pub execute_calls: Mutex<Vec<String>>,
    pub describe_calls: AtomicUsize,
    pub rows_pulled: Arc<AtomicUsize>,
}

impl ScriptedWarehouse {
    pub fn new() -> Self {
        Self {
            schema: json!({
                "tables": [{
                    "name": "ads.daily",
                    "columns": ["date", "campaign_name", "clicks", "impressions"]
                }]
            }),
            ..Self::default()
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    pub fn dry_run(mut self, sql: &str, result: DryRunResult) -> Self {
        self.dry_runs.insert(sql.to_owned(), result);
        self
    }

    pub fn rows(mut self, sql: &str, count: usize) -> Self {
        self.results
            .insert(sql.to_owned(), (0..count).map(|i| Ok(row(i))).collect());
        self
    }

    /// Yield `ok` rows, then a stream error.
    pub fn failing_stream(mut self, sql: &str, ok: usize, error: &str) -> Self {
        let mut items: Vec<_> = (0..ok).map(|i| Ok(row(i))).collect();
        items.push(Err(error.to_owned()));
        self.results.insert(sql.to_owned(), items);
        self
    }

    /// Fail when execution starts.
    pub fn failing_setup(mut self, sql: &str, error: &str) -> Self {
        self.setup_failures.insert(sql.to_owned(), error.to_owned());
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.execute_calls.lock().unwrap().clone()
    }
}

pub fn row(i: usize) -> Row {
    let mut row = Row::new();
    row.insert("campaign_name".into(), json!(format!("campaign {i}")));
    row.insert("clicks".into(), json!(i * 10));
    row
}

#[async_trait]
impl Warehouse for ScriptedWarehouse {
    async fn dry_run(&self, _target: &DataMartRef, sql: &str) -> Result<DryRunResult> {
        self.dry_run_calls.lock().unwrap().push(sql.to_owned());
        Ok(self
            .dry_runs
            .get(sql)
            .cloned()
            .unwrap_or_else(|| DryRunResult::valid(Some(100))))
    }

    async fn execute_rows(&self, _target: &DataMartRef, sql: &str, _limit: u64) -> Result<RowStream> {
        self.execute_calls.lock().unwrap().push(sql.to_owned());
        if let Some(reason) = self.setup_failures.get(sql) {
            return Err(AgentError::Warehouse {
                reason: reason.clone(),
            });
        }

        let items = self.results.get(sql).cloned().unwrap_or_default();
        let pulled = self.rows_pulled.clone();
        Ok(stream::iter(items)
            .map(move |item| {
                pulled.fetch_add(1, Ordering::SeqCst);
                item.map_err(|reason| AgentError::Warehouse { reason })
            })
            .boxed())
    }

    async fn describe(&self, _target: &DataMartRef) -> Result<Value> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.schema.clone())
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Repair and advisor
// ═══════════════════════════════════════════════════════════════════════

/// Returns scripted verdicts, then `CannotRepair` once the script runs out.
#[derive(Default)]
pub struct ScriptedRepair {
    verdicts: Mutex<VecDeque<RepairVerdict>>,
    pub inputs: Mutex<Vec<RepairInput>>,
}

impl ScriptedRepair {
    pub fn new(verdicts: Vec<RepairVerdict>) -> Arc<Self> {
        Arc::new(Self {
            verdicts: Mutex::new(verdicts.into()),
            inputs: Mutex::new(Vec::new()),
        })
    }

    pub fn retry(sqls: &[&str]) -> Arc<Self> {
        Self::new(
            sqls.iter()
                .map(|s| RepairVerdict::RetrySql { sql: (*s).into() })
                .collect(),
        )
    }

    pub fn invocations(&self) -> usize {
        self.inputs.lock().unwrap().len()
    }
}

#[async_trait]
impl RepairAgent for ScriptedRepair {
    async fn run(&self, input: RepairInput, _ctx: &mut RunContext) -> Result<RepairVerdict> {
        self.inputs.lock().unwrap().push(input);
        Ok(self
            .verdicts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RepairVerdict::CannotRepair {
                notes: "script exhausted".into(),
            }))
    }
}

/// Summarises the error kind; remembers what it was asked.
#[derive(Default)]
pub struct RecordingAdvisor {
    pub inputs: Mutex<Vec<AdvisorInput>>,
}

#[async_trait]
impl AdvisorAgent for RecordingAdvisor {
    async fn run(&self, input: AdvisorInput, _ctx: &mut RunContext) -> Result<Advice> {
        let advice = Advice {
            summary: format!("The query failed ({}).", input.error.kind),
            suggestion: "Ask about `clicks` instead.".into(),
        };
        self.inputs.lock().unwrap().push(input);
        Ok(advice)
    }
}
