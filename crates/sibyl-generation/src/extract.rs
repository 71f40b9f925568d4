//! Deterministic extraction of a bare SQL statement from model output.
//!
//! Models wrap queries in markdown fences, reasoning comments, and prose.
//! Everything non-query is stripped here, before validation ever sees the
//! candidate; no downstream stage re-parses free-form model text.

use std::sync::OnceLock;

use regex::Regex;

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:sql)?\s*(.*?)```").expect("static regex"))
}

fn query_start_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Write-op keywords are included so the read-only guard sees them
    // instead of a SELECT buried later in the same statement.
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(SELECT|WITH|INSERT|UPDATE|DELETE|DROP|ALTER|TRUNCATE|CREATE|REPLACE)\b")
            .expect("static regex")
    })
}

fn write_op_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(INSERT|UPDATE|DELETE|DROP|ALTER|TRUNCATE|CREATE|REPLACE)\b")
            .expect("static regex")
    })
}

/// Extract the SQL statement from raw model output.
///
/// Returns `None` when no query-looking text remains after cleaning.
pub fn extract_sql(raw: &str) -> Option<String> {
    // Prefer the first fenced block when present.
    let mut text = match fence_re().captures(raw) {
        Some(caps) => caps.get(1).map(|m| m.as_str())?.to_string(),
        None => raw.replace("```sql", "").replace("```", ""),
    };

    // Drop leading block comments (chain-of-thought reasoning headers).
    loop {
        let trimmed = text.trim_start().to_string();
        if let Some(rest) = trimmed.strip_prefix("/*") {
            match rest.find("*/") {
                Some(end) => text = rest[end + 2..].to_string(),
                None => return None, // unterminated comment, nothing usable
            }
        } else {
            text = trimmed;
            break;
        }
    }

    // Keep from the first SQL-looking keyword onward; discard leading prose.
    let start = query_start_re().find(&text)?.start();
    let mut sql = text[start..].trim().to_string();

    // Trailing prose after the statement terminator is discarded too.
    if let Some(semi) = sql.find(';') {
        sql.truncate(semi + 1);
    }

    if sql.is_empty() {
        None
    } else {
        Some(sql)
    }
}

/// Whether the candidate is a read-only statement. Write operations are
/// rejected at the generation boundary, before validation.
pub fn is_read_only(sql: &str) -> bool {
    !write_op_re().is_match(sql)
}
