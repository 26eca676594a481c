//! Narrowing a data mart description down to the tables a plan uses.
//!
//! The SQL builder, repair and advisor agents only need the plan's tables.
//! Sending the whole description costs tokens and invites the model to reach
//! for unrelated columns.

use serde_json::Value;

use crate::sql::types::QueryPlan;

/// Keys a table entry may carry its name under.
const NAME_KEYS: [&str; 3] = ["name", "fullyQualifiedName", "tableName"];

/// Keep only the tables of `schema` that `plan` names.
///
/// `schema` is expected to hold a `tables` array of objects with a name.  All
/// other top-level keys are kept.  The schema is returned unchanged when it
/// has no such array or when none of its tables match, so a naming mismatch
/// never leaves the SQL agents without a schema.
pub fn narrow_schema(plan: &QueryPlan, schema: &Value) -> Value {
    let Some(tables) = schema.get("tables").and_then(Value::as_array) else {
        return schema.clone();
    };

    let wanted: Vec<String> = plan
        .tables
        .iter()
        .map(|t| clean_name(&t.fully_qualified_name))
        .filter(|name| !name.is_empty())
        .collect();

    let kept: Vec<Value> = tables
        .iter()
        .filter(|table| {
            table_name(table)
                .map(|name| wanted.iter().any(|w| names_match(w, &clean_name(name))))
                .unwrap_or(false)
        })
        .cloned()
        .collect();

    if kept.is_empty() {
        tracing::debug!(
            planned = ?wanted,
            available = tables.len(),
            "no described table matches the plan, keeping the full schema"
        );
        return schema.clone();
    }

    let mut narrowed = schema.clone();
    if let Some(object) = narrowed.as_object_mut() {
        object.insert("tables".to_owned(), Value::Array(kept));
    }
    narrowed
}

fn table_name(table: &Value) -> Option<&str> {
    NAME_KEYS
        .iter()
        .find_map(|key| table.get(*key).and_then(Value::as_str))
}

/// Lowercase and strip identifier quoting.
fn clean_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '`' | '"' | '[' | ']'))
        .collect::<String>()
        .trim()
        .to_lowercase()
}

/// Equal, or one is a dotted suffix of the other (`ads.daily` vs `daily`).
fn names_match(a: &str, b: &str) -> bool {
    a == b || is_dotted_suffix(a, b) || is_dotted_suffix(b, a)
}

fn is_dotted_suffix(full: &str, tail: &str) -> bool {
    full.strip_suffix(tail)
        .is_some_and(|head| head.ends_with('.'))
}
