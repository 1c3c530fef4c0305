//! Cheap pre-filter deciding whether a request is about the database at all.
//!
//! This is a heuristic, not a guarantee: ambiguous requests pass through and
//! the model (instructed to refuse off-topic questions) plus the response
//! reducer are the final safety net.

use serde::Serialize;

use crate::llm::prompts::CANONICAL_REFUSAL;

/// Words and phrases that mark a request as database related.  Any match
/// overrides the off-topic patterns below.
const DB_KEYWORDS: &[&str] = &[
    "select", "insert", "update", "delete", "table", "database", "query", "sql",
    "where", "join", "group by", "order by", "count", "sum", "avg", "max", "min",
    "show me", "find", "get", "retrieve", "data", "records", "rows", "columns",
];

const NON_DB_PATTERNS: &[&str] = &[
    "weather", "news", "recipe", "movie", "music", "sports", "politics",
    "health", "travel", "shopping", "gaming", "entertainment",
    "what is", "who is", "when did", "how to", "tell me about",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntentVerdict {
    pub is_database: bool,
    /// Set only when `is_database` is false.
    pub refusal: Option<&'static str>,
}

/// Classify a free-text request.
///
/// Refuses only when an off-topic pattern matches and no database keyword
/// does.  Matching is case-insensitive substring matching.
pub fn classify(query: &str) -> IntentVerdict {
    let lowered = query.to_lowercase();

    let off_topic = NON_DB_PATTERNS.iter().any(|p| lowered.contains(p));
    let on_topic = DB_KEYWORDS.iter().any(|k| lowered.contains(k));

    if off_topic && !on_topic {
        IntentVerdict {
            is_database: false,
            refusal: Some(CANONICAL_REFUSAL),
        }
    } else {
        IntentVerdict {
            is_database: true,
            refusal: None,
        }
    }
}
