//! Prompt text for the insight agent and its SQL sub-agents.
//!
//! Prompts are plain data.  Budgets are interpolated so the model sees the
//! same limits the state machine enforces.

use serde_json::Value;

use crate::budget::Budgets;
use crate::sql::types::{AdvisorInput, QueryPlan, RepairInput};

/// Main agent instructions.
pub fn insight_system_prompt(
    budgets: &Budgets,
    final_tool: &str,
    language: Option<&str>,
) -> String {
    let max_rows = budgets.row_limit();
    let bytes_rule = match budgets.max_bytes_processed {
        Some(limit) => format!(
            "- Queries may scan at most {limit} bytes. If the question cannot be answered within \
             that budget without changing its meaning, finish with status \"sql_error\"."
        ),
        None => "- Keep queries as narrow as the question allows.".to_owned(),
    };
    let language_line = language_rule(language, "`answer` and `reasonDescription`");

    format!(
        "You are a data analyst answering questions about one data mart.\n\
         \n\
         Workflow:\n\
         1. Call `schema_get_metadata` to learn the tables and columns.\n\
         2. Decide whether the question can be answered from this data mart. If it is unrelated, \
            finish with status \"not_relevant\". If it is too vague to turn into one query, finish \
            with status \"high_ambiguity\" and say what is missing.\n\
         3. Build a query plan and call `sql_run` with it. You may include candidate SQL; if you \
            do not, a SQL builder writes it from the plan.\n\
         4. Finish by calling `{final_tool}` exactly once.\n\
         \n\
         Rules:\n\
         - Only report numbers that appear in rows returned by `sql_run`. Never estimate or invent data.\n\
         - If `sql_run` returns status \"no_data\", finish with status \"no_data\".\n\
         - If `sql_run` returns status \"sql_error\", finish with status \"sql_error\".\n\
         - Results are limited to {max_rows} rows.\n\
         {bytes_rule}\n\
         - The answer is Markdown. Prefer a short sentence followed by a table.\n\
         {language_line}\n\
         - Do not reply in free text; every turn must call a tool."
    )
}

/// Main agent user message.
pub fn insight_user_prompt(question: &str, template: Option<&str>) -> String {
    match template {
        Some(template) => format!(
            "Question:\n{question}\n\nThe answer will be inserted into this report template:\n\
             --- TEMPLATE START ---\n{template}\n--- TEMPLATE END ---"
        ),
        None => format!("Question:\n{question}"),
    }
}

// ---------------------------------------------------------------------------
// SQL builder
// ---------------------------------------------------------------------------

pub fn sql_builder_system_prompt(budgets: &Budgets, submit_tool: &str) -> String {
    let max_rows = budgets.row_limit();
    format!(
        "You are a SQL builder. Write one read-only SQL query that implements the query plan.\n\
         \n\
         Rules:\n\
         - Use only SELECT or WITH statements. No INSERT, UPDATE, DELETE, MERGE or DDL.\n\
         - Use table names from plan.tables[*].fullyQualifiedName exactly as given.\n\
         - Use only columns listed in the plan or present in the schema.\n\
         - Use dimensions as GROUP BY keys and metrics as aggregates.\n\
         - Apply the plan's date filter and where conditions.\n\
         - Always end with LIMIT {max_rows}.\n\
         - Do not invent date formats; it is better to fail than to return misleading rows.\n\
         \n\
         Submit the query by calling `{submit_tool}`."
    )
}

pub fn sql_builder_user_prompt(question: &str, plan: &QueryPlan, schema: &Value) -> String {
    format!(
        "User question (context only; the plan defines the query):\n\
         --- PROMPT START ---\n{question}\n--- PROMPT END ---\n\
         \n{}\n\n{}",
        plan_block(plan),
        schema_block(schema),
    )
}

// ---------------------------------------------------------------------------
// Repair
// ---------------------------------------------------------------------------

pub fn repair_system_prompt(budgets: &Budgets, submit_tool: &str) -> String {
    let max_rows = budgets.row_limit();
    format!(
        "You are a query repair agent. Fix the CURRENT attempt so it runs while keeping the \
         plan's intent.\n\
         \n\
         Rules:\n\
         - Return a single read-only SELECT or WITH statement with LIMIT {max_rows}.\n\
         - You must change the expression that caused the CURRENT error. Returning the same SQL \
           as the CURRENT attempt (ignoring whitespace) is rejected.\n\
         - Use only tables and columns from the plan and schema.\n\
         - Do not hide errors with TRY or SAFE functions.\n\
         - If the query cannot be fixed without guessing, use action \"CANNOT_REPAIR\" and explain why.\n\
         \n\
         Submit your decision by calling `{submit_tool}`."
    )
}

pub fn repair_user_prompt(input: &RepairInput) -> String {
    let last = input.attempts.len().saturating_sub(1);
    let attempts: Vec<String> = input
        .attempts
        .iter()
        .enumerate()
        .map(|(i, a)| {
            let marker = if i == last { " (CURRENT)" } else { "" };
            let bytes = a
                .error
                .estimated_bytes
                .map_or_else(|| "n/a".to_owned(), |b| b.to_string());
            format!(
                "Attempt #{}{marker}:\nSQL:\n--- SQL START ---\n{}\n--- SQL END ---\n\
                 Error kind: {}\nEstimated bytes: {bytes}\nError message:\n\
                 --- ERROR START ---\n{}\n--- ERROR END ---",
                i + 1,
                a.sql,
                a.error.kind,
                a.error.message,
            )
        })
        .collect();

    format!(
        "User question:\n--- PROMPT START ---\n{}\n--- PROMPT END ---\n\
         \n{}\n\n{}\n\
         \nAttempts history (oldest to newest). The LAST attempt is the CURRENT SQL to repair.\n\n{}",
        input.prompt,
        plan_block(&input.plan),
        schema_block(&input.schema),
        attempts.join("\n\n"),
    )
}

// ---------------------------------------------------------------------------
// Advisor
// ---------------------------------------------------------------------------

pub fn advisor_system_prompt(submit_tool: &str, language: Option<&str>) -> String {
    let language_line = language_rule(language, "the summary and the suggestion");
    format!(
        "You explain SQL failures to business users.\n\
         \n\
         Write a one or two sentence summary of what went wrong and one actionable suggestion \
         for rephrasing the question or changing the data mart.\n\
         \n\
         Rules:\n\
         - Use only facts from the question, SQL, error, plan and schema below.\n\
         - Mention column or table names only if they appear in those inputs, and wrap them in \
           backticks.\n\
         - Do not paste the raw error message or SQL.\n\
         {language_line}\n\
         \n\
         Submit by calling `{submit_tool}`."
    )
}

pub fn advisor_user_prompt(input: &AdvisorInput) -> String {
    format!(
        "User question:\n--- PROMPT START ---\n{}\n--- PROMPT END ---\n\
         \nFailing SQL:\n--- SQL START ---\n{}\n--- SQL END ---\n\
         \nError kind: {}\nError message:\n--- ERROR START ---\n{}\n--- ERROR END ---\n\
         \n{}\n\n{}",
        input.prompt,
        input.sql,
        input.error.kind,
        input.error.message,
        plan_block(&input.plan),
        schema_block(&input.schema),
    )
}

// ---------------------------------------------------------------------------
// Shared blocks
// ---------------------------------------------------------------------------

fn language_rule(language: Option<&str>, what: &str) -> String {
    match language {
        Some(language) => format!(
            "- Write {what} in the language with code \"{language}\", the language of the \
             user's question. Keep column and table names as they are."
        ),
        None => format!("- Write {what} in the same language as the user's question."),
    }
}

fn plan_block(plan: &QueryPlan) -> String {
    let plan = serde_json::to_string(plan).unwrap_or_else(|_| "{}".to_owned());
    format!("Query plan (source of truth for intent):\n--- PLAN START ---\n{plan}\n--- PLAN END ---")
}

fn schema_block(schema: &Value) -> String {
    let schema = if schema.is_null() {
        "(no schema provided)".to_owned()
    } else {
        schema.to_string()
    };
    format!("Schema:\n--- SCHEMA START ---\n{schema}\n--- SCHEMA END ---")
}
