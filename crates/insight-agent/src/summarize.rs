//! Size-capped serialization of tool results.
//!
//! The transcript itself is never trimmed.  Prompt growth is bounded here
//! instead, at the point a tool result becomes a `tool` message.

use serde_json::{Value, json};

/// Serialize `value` for the transcript, keeping it under `max_chars`.
///
/// Results with a top-level `rows` array are shortened row by row and
/// annotated with `totalRows`, `shownRows` and `truncated`.  Anything else
/// that is still too large collapses to a preview object.  The output is
/// always valid JSON.
pub fn serialize_tool_result(value: &Value, max_chars: usize) -> String {
    let full = value.to_string();
    if full.len() <= max_chars {
        return full;
    }

    if let Some(rows) = value.get("rows").and_then(Value::as_array) {
        let total = rows.len();
        let mut shown = total;
        while shown > 0 {
            shown /= 2;
            let candidate = with_rows(value, rows, shown, total).to_string();
            if candidate.len() <= max_chars {
                return grow_rows(value, rows, shown, total, max_chars).unwrap_or(candidate);
            }
        }
    }

    preview(&full, max_chars)
}

/// Try to fit more rows than the halving step found, one at a time.
fn grow_rows(
    value: &Value,
    rows: &[Value],
    mut shown: usize,
    total: usize,
    max_chars: usize,
) -> Option<String> {
    let mut best = None;
    while shown < total {
        let candidate = with_rows(value, rows, shown + 1, total).to_string();
        if candidate.len() > max_chars {
            break;
        }
        shown += 1;
        best = Some(candidate);
    }
    best
}

fn with_rows(value: &Value, rows: &[Value], shown: usize, total: usize) -> Value {
    let mut out = value.clone();
    out["rows"] = Value::Array(rows[..shown].to_vec());
    out["totalRows"] = json!(total);
    out["shownRows"] = json!(shown);
    out["truncated"] = json!(true);
    out
}

fn preview(full: &str, max_chars: usize) -> String {
    // Escaping can grow the preview, so shrink until the wrapper fits.
    let mut cut = max_chars.saturating_sub(96).min(full.len());
    loop {
        while cut > 0 && !full.is_char_boundary(cut) {
            cut -= 1;
        }
        let out = json!({
            "truncated": true,
            "originalChars": full.len(),
            "preview": &full[..cut],
        })
        .to_string();
        if out.len() <= max_chars || cut == 0 {
            return out;
        }
        cut = cut * 3 / 4;
    }
}
