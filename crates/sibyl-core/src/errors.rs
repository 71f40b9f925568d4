//! Error taxonomy for the pipeline.
//!
//! Two layers: per-subsystem `thiserror` enums aggregated into [`SibylError`],
//! and the closed [`ErrorCategory`] enum produced by [`classify_error`] that
//! drives the correction loop. Downstream logic matches on the category and
//! never re-parses raw error text.

use serde::{Deserialize, Serialize};

pub type SibylResult<T> = Result<T, SibylError>;

/// Closed classification of validation/execution failures.
///
/// The classifier maps raw store and parser messages into this enum once;
/// everything after that (targeted repair, retry policy, user suggestions)
/// keys off the category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    ColumnNotFound,
    TableNotFound,
    SyntaxError,
    Timeout,
    Unknown,
}

impl ErrorCategory {
    /// Human-readable suggestion surfaced with terminal failures.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::ColumnNotFound => {
                "A referenced column does not exist. Try naming the field the way it appears in the data dictionary."
            }
            Self::TableNotFound => {
                "A referenced table does not exist. Try rephrasing the request around a known subject area."
            }
            Self::SyntaxError => {
                "The generated query was malformed. Rephrasing the request in simpler terms often helps."
            }
            Self::Timeout => {
                "The query exceeded its deadline. Narrow the date range or add a row limit and try again."
            }
            Self::Unknown => "The query failed for an unrecognized reason. Try a simpler request.",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ColumnNotFound => "column_not_found",
            Self::TableNotFound => "table_not_found",
            Self::SyntaxError => "syntax_error",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for ErrorCategory {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "column_not_found" => Ok(Self::ColumnNotFound),
            "table_not_found" => Ok(Self::TableNotFound),
            "syntax_error" => Ok(Self::SyntaxError),
            "timeout" => Ok(Self::Timeout),
            "unknown" => Ok(Self::Unknown),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic error-text classifier.
///
/// Pattern set covers SQLite and Postgres phrasings plus the validator's own
/// `SchemaViolation`/`SyntaxInvalid` prefixes.
pub fn classify_error(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();

    if lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("deadline exceeded")
        || lower.contains("interrupted")
    {
        return ErrorCategory::Timeout;
    }
    if lower.contains("no such column")
        || lower.contains("column not found")
        || lower.contains("unknown column")
        || lower.contains("schemaviolation: column")
        || (lower.contains("column") && lower.contains("does not exist"))
    {
        return ErrorCategory::ColumnNotFound;
    }
    if lower.contains("no such table")
        || lower.contains("table not found")
        || lower.contains("schemaviolation")
        || (lower.contains("table") && lower.contains("does not exist"))
        || (lower.contains("relation") && lower.contains("does not exist"))
    {
        return ErrorCategory::TableNotFound;
    }
    if lower.contains("syntax error")
        || lower.contains("syntaxinvalid")
        || lower.contains("parse error")
        || lower.contains("unexpected token")
        || lower.contains("incomplete input")
    {
        return ErrorCategory::SyntaxError;
    }
    ErrorCategory::Unknown
}

/// Language-model capability errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("language model rate limited")]
    RateLimited,

    #[error("language model call timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("language model unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Relational store capability errors.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("query rejected: {message}")]
    Rejected { message: String },

    #[error("query failed: {message}")]
    Execution { message: String },

    #[error("query timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("backend connection closed")]
    Closed,
}

/// Semantic catalog errors.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalog document {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("malformed catalog document {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Query generation errors.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("model produced no usable query text")]
    EmptyCompletion,

    #[error("candidate is not a read-only query: {statement}")]
    NotReadOnly { statement: String },

    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Example/failure store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open example store: {reason}")]
    Open { reason: String },

    #[error("store query failed: {reason}")]
    Query { reason: String },

    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Top-level error for the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum SibylError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid configuration: {reason}")]
    Config { reason: String },

    #[error("retry budget exhausted after {attempts} attempts")]
    RetryBudgetExhausted { attempts: u32 },
}
