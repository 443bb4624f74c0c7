use once_cell::sync::Lazy;
use regex::Regex;

/// Literal the generation policy tells the model to answer with when no
/// query can be written.
pub const INVALID_QUESTION: &str = "Invalid question. No SQL query generated";

static SQL_FENCE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)```sql\b(.*?)```").unwrap());

/// Trimmed body of the first ```sql fenced block, or `""` when there is none.
/// Purely syntactic: the body is not checked for SQL.
pub fn extract(raw: &str) -> String {
    SQL_FENCE_PATTERN
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|body| body.as_str().trim().to_string())
        .unwrap_or_default()
}

/// Like [`extract`], but a completion carrying the decline literal yields
/// `""` even if it also contains a fence.
pub fn extract_query(raw: &str) -> String {
    if raw.contains(INVALID_QUESTION) {
        return String::new();
    }
    extract(raw)
}

pub fn wrap(sql: &str) -> String {
    format!("```sql\n{}\n```", sql)
}
