use super::example::Example;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub const NO_QUERY_RESULT: &str = "No SQL query was generated, so nothing was executed.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionFailureKind {
    Syntax,
    Permission,
    Constraint,
    MissingObject,
    Timeout,
    Other,
}

impl ExecutionFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionFailureKind::Syntax => "syntax",
            ExecutionFailureKind::Permission => "permission",
            ExecutionFailureKind::Constraint => "constraint",
            ExecutionFailureKind::MissingObject => "missing_object",
            ExecutionFailureKind::Timeout => "timeout",
            ExecutionFailureKind::Other => "other",
        }
    }
}

/// What happened when the extracted SQL met the database. Failures are data
/// here: they flow on to answer synthesis instead of aborting the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    NoQuery,
    Success { text: String },
    Failed { kind: ExecutionFailureKind, message: String },
}

impl ExecutionOutcome {
    /// Text handed to the answer synthesizer as the SQL result.
    pub fn result_text(&self) -> String {
        match self {
            ExecutionOutcome::NoQuery => NO_QUERY_RESULT.to_string(),
            ExecutionOutcome::Success { text } => text.clone(),
            ExecutionOutcome::Failed { message, .. } => format!("Error: {}", message),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExecutionOutcome::NoQuery => "no_query",
            ExecutionOutcome::Success { .. } => "success",
            ExecutionOutcome::Failed { .. } => "failed",
        }
    }
}

/// Per-request working state. Created for each question, dropped after the
/// answer is returned.
#[derive(Debug, Clone, Serialize)]
pub struct QueryContext {
    pub id: Uuid,
    pub question: String,
    pub selected_examples: Vec<Example>,
    pub generated_sql: String,
    pub execution: Option<ExecutionOutcome>,
    pub answer: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl QueryContext {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            question: question.into(),
            selected_examples: Vec::new(),
            generated_sql: String::new(),
            execution: None,
            answer: None,
            created_at: Utc::now(),
        }
    }
}
