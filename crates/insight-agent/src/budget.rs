//! Row and byte budgets plus the error tracker that bounds SQL repair.
//!
//! The [`ErrorTracker`] is created fresh for every SQL sub-task.  It counts
//! failures and deduplicates them by a canonical key so that errors which
//! differ only in a byte count, an address or whitespace are recognised as
//! the same root cause.

use std::collections::HashMap;
use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Number of rows collected when the caller does not set `max_rows`.
pub const DEFAULT_MAX_ROWS: u64 = 30;

// ---------------------------------------------------------------------------
// Budgets
// ---------------------------------------------------------------------------

/// Caller-supplied ceilings for one run.  `None` means "no limit".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budgets {
    /// Maximum number of rows a query may return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rows: Option<u64>,

    /// Maximum number of bytes a query may scan, as reported by dry-run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bytes_processed: Option<u64>,
}

impl Budgets {
    /// Row limit to apply when streaming results.
    pub fn row_limit(&self) -> u64 {
        self.max_rows.unwrap_or(DEFAULT_MAX_ROWS)
    }

    /// Returns `true` when `estimated_bytes` exceeds the byte budget.
    ///
    /// An unset budget or an unknown estimate never exceeds.
    pub fn exceeds_bytes(&self, estimated_bytes: Option<u64>) -> bool {
        match (self.max_bytes_processed, estimated_bytes) {
            (Some(limit), Some(bytes)) => bytes > limit,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Error policy
// ---------------------------------------------------------------------------

/// Governs when the SQL repair loop must stop retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorPolicy {
    /// Total number of errors the tracker accepts before vetoing.
    pub max_errors_total: u32,

    /// Stop as soon as an error repeats under canonicalization.
    pub stop_on_repeated_same_error: bool,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self {
            max_errors_total: 3,
            stop_on_repeated_same_error: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Outcome of [`ErrorTracker::record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
    /// The canonical key had been recorded before this call.
    pub repeated: bool,
    /// The canonical key the message was filed under.
    pub canonical: String,
}

/// Counts and deduplicates SQL step errors for one sub-task.
#[derive(Debug, Clone)]
pub struct ErrorTracker {
    policy: ErrorPolicy,
    seen: HashMap<String, u32>,
    total_errors: u32,
}

impl ErrorTracker {
    /// Create an empty tracker governed by `policy`.
    #[must_use]
    pub fn new(policy: ErrorPolicy) -> Self {
        Self {
            policy,
            seen: HashMap::new(),
            total_errors: 0,
        }
    }

    /// Whether another error may still be absorbed.
    pub fn can_continue(&self) -> bool {
        self.total_errors < self.policy.max_errors_total
    }

    /// Record an error message and report whether it is a repeat.
    pub fn record(&mut self, message: &str) -> RecordOutcome {
        self.total_errors += 1;
        let canonical = canonicalize_error(message);
        let count = self.seen.entry(canonical.clone()).or_insert(0);
        let repeated = *count > 0;
        *count += 1;

        tracing::debug!(
            total_errors = self.total_errors,
            repeated,
            key = %canonical,
            "recorded sql error"
        );

        RecordOutcome {
            repeated,
            canonical,
        }
    }

    /// Whether a repeat should end the repair loop under the current policy.
    pub fn should_stop_because_repeated(&self, repeated: bool) -> bool {
        self.policy.stop_on_repeated_same_error && repeated
    }

    /// Number of errors recorded so far.
    pub fn total_errors(&self) -> u32 {
        self.total_errors
    }

    /// How many times the canonical form of `message` has been recorded.
    pub fn count_of(&self, message: &str) -> u32 {
        self.seen
            .get(&canonicalize_error(message))
            .copied()
            .unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Canonicalization
// ---------------------------------------------------------------------------

static HEX_PREFIXED: OnceLock<Option<Regex>> = OnceLock::new();
static HEX_RUN: OnceLock<Option<Regex>> = OnceLock::new();
static NUMBER: OnceLock<Option<Regex>> = OnceLock::new();

/// Compile `pattern` on first use.  A pattern that fails to compile is
/// remembered as `None` and its rewrite step is skipped.
fn cached_regex(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::error!(pattern, error = %e, "failed to compile canonicalization regex");
            None
        }
    })
    .as_ref()
}

/// Normalise an error message into a deduplication key.
///
/// Case-folds (full Unicode lowercase), replaces hex addresses with `<hex>`
/// and numeric literals with `<n>`, then collapses whitespace.  Applying it
/// twice yields the same key.
pub fn canonicalize_error(message: &str) -> String {
    let lowered = message.to_lowercase();
    let step: Cow<'_, str> = match cached_regex(&HEX_PREFIXED, r"\b0x[0-9a-f]+\b") {
        Some(re) => re.replace_all(&lowered, "<hex>"),
        None => Cow::Borrowed(lowered.as_str()),
    };
    let step: Cow<'_, str> = match cached_regex(&HEX_RUN, r"\b[0-9a-f]{8,}\b") {
        Some(re) => Cow::Owned(
            re.replace_all(&step, |caps: &regex::Captures<'_>| {
                let token = &caps[0];
                let has_digit = token.bytes().any(|b| b.is_ascii_digit());
                let has_alpha = token.bytes().any(|b| b.is_ascii_alphabetic());
                if has_digit && has_alpha {
                    "<hex>".to_owned()
                } else {
                    token.to_owned()
                }
            })
            .into_owned(),
        ),
        None => step,
    };
    let step: Cow<'_, str> = match cached_regex(&NUMBER, r"\b\d+(?:[.,]\d+)*\b") {
        Some(re) => Cow::Owned(re.replace_all(&step, "<n>").into_owned()),
        None => step,
    };
    step.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
