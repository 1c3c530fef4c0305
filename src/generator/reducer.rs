//! Reduction of raw model output into one canonical result.

use std::sync::LazyLock;

use regex::Regex;

use crate::llm::prompts::CANONICAL_REFUSAL;

/// Phrasings of "I can't help with that" normalised to the canonical refusal.
const REFUSAL_INDICATORS: &[&str] = &[
    "i can only help with sql",
    "database queries only",
    "not related to database",
];

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```(?:sql)?\s*\n?(.*?)\n?```").expect("fenced block pattern")
});

static SQL_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:SELECT|INSERT|UPDATE|DELETE|WITH)\b\s+\S").expect("sql keyword pattern")
});

/// Statement keywords that mark text as SQL from its first character.
static STATEMENT_HEAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:SELECT|INSERT|UPDATE|DELETE|WITH|DECLARE|EXEC|EXECUTE|MERGE|TRUNCATE)\b")
        .expect("statement head pattern")
});

/// Skip leading `--` and `/* */` comments.  Returns the rest of the text and
/// whether any comment was skipped.
fn skip_leading_comments(text: &str) -> (&str, bool) {
    let mut rest = text.trim_start();
    let mut skipped = false;
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map_or("", |(_, tail)| tail).trim_start();
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map_or("", |(_, tail)| tail).trim_start();
        } else {
            return (rest, skipped);
        }
        skipped = true;
    }
}

/// True when `text` is already a statement: it opens with a comment or a
/// statement keyword, so there is no prose to strip.
fn starts_as_sql(text: &str) -> bool {
    let (rest, commented) = skip_leading_comments(text);
    !rest.is_empty() && (commented || STATEMENT_HEAD.is_match(rest))
}

/// What a model response turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reduction {
    /// Out-of-domain answer, normalised to the canonical refusal.
    Refusal,
    /// Extracted SQL statement.
    Sql(String),
    /// Anything else, most likely a clarifying question.
    Clarification(String),
}

impl Reduction {
    /// Apply the reduction policy.  The order matters: refusal detection runs
    /// before code-block extraction so a refusal that quotes backticks is
    /// never taken for SQL.
    pub fn from_raw(raw: &str) -> Self {
        let lowered = raw.to_lowercase();
        if REFUSAL_INDICATORS.iter().any(|i| lowered.contains(i)) {
            return Reduction::Refusal;
        }

        if let Some(inner) = FENCED_BLOCK.captures(raw).and_then(|c| c.get(1)) {
            return Reduction::Sql(inner.as_str().trim().to_string());
        }

        if starts_as_sql(raw) {
            return Reduction::Sql(raw.trim().to_string());
        }

        // Models that skip the fences: drop the prose before the statement.
        if let Some(found) = SQL_START.find(raw) {
            return Reduction::Sql(raw[found.start()..].trim().to_string());
        }

        Reduction::Clarification(raw.trim().to_string())
    }

    pub fn into_text(self) -> String {
        match self {
            Reduction::Refusal => CANONICAL_REFUSAL.to_string(),
            Reduction::Sql(sql) => sql,
            Reduction::Clarification(text) => text,
        }
    }
}

/// Reduce raw model text to a single result string.
pub fn reduce(raw: &str) -> String {
    Reduction::from_raw(raw).into_text()
}
