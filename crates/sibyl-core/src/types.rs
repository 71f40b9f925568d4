//! Shared data model for the pipeline.
//!
//! Everything here is a plain value type. The orchestrator owns the
//! per-request lifecycle of the ephemeral entities (schema candidates,
//! resolutions, plans, candidates, results); the example store owns
//! [`FewShotExample`] and [`FailureRecord`] rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ErrorCategory;

/// An incoming natural-language request. Immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub text: String,
    /// Optional identity of the requester, carried for audit only.
    pub requester: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl Request {
    pub fn new(text: impl Into<String>, requester: Option<&str>) -> Self {
        Self {
            text: text.into(),
            requester: requester.map(str::to_string),
            received_at: Utc::now(),
        }
    }
}

/// A column of a candidate table, as described by the data dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaColumn {
    pub name: String,
    #[serde(default)]
    pub data_type: String,
    #[serde(default)]
    pub description: String,
}

/// A foreign-key edge from a candidate table, derived from the vetted
/// join paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

/// A table surfaced by schema narrowing for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaCandidate {
    pub table_id: String,
    pub columns: Vec<SchemaColumn>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

impl SchemaCandidate {
    /// Case-insensitive column lookup.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// A fuzzy phrase resolved to a canonical stored value.
///
/// Only resolutions at or above the configured confidence threshold are
/// ever constructed; below-threshold matches are dropped at the resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityResolution {
    pub source_phrase: String,
    pub table_id: String,
    pub column_id: String,
    pub canonical_value: String,
    /// In `[0, 1]`. Exact alias matches score 1.0.
    pub confidence: f64,
}

/// One logical sub-step of a decomposed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: u32,
    pub description: String,
    #[serde(default)]
    pub depends_on: Vec<u32>,
}

/// Ordered decomposition of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub steps: Vec<PlanStep>,
}

impl QueryPlan {
    /// The degenerate plan: one step covering the whole request.
    pub fn single_step(description: impl Into<String>) -> Self {
        Self {
            steps: vec![PlanStep {
                id: 1,
                description: description.into(),
                depends_on: Vec::new(),
            }],
        }
    }

    /// Plan invariants: step ids unique, dependencies reference earlier
    /// steps only (no forward or cyclic references), plan non-empty.
    pub fn is_well_formed(&self) -> bool {
        if self.steps.is_empty() || self.steps.len() > crate::constants::MAX_PLAN_STEPS {
            return false;
        }
        let mut seen: Vec<u32> = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            if seen.contains(&step.id) {
                return false;
            }
            if step.depends_on.iter().any(|d| !seen.contains(d)) {
                return false;
            }
            seen.push(step.id);
        }
        true
    }
}

/// A generated or corrected SQL candidate. Attempts are numbered and
/// retained for audit, never overwritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateQuery {
    pub text: String,
    /// 1-based attempt number within one request.
    pub attempt: u32,
    /// Table ids the candidate was generated against.
    pub schema_refs: Vec<String>,
    /// `table.column=value` bindings supplied to generation.
    pub entity_refs: Vec<String>,
}

/// Outcome of static validation. `is_valid` is derived strictly from
/// `errors` being empty; warnings never block execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Normalized outcome of executing one candidate. Exactly one of
/// (`rows`, `error`) carries data on a terminal outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn ok(column_names: Vec<String>, rows: Vec<Vec<Value>>, elapsed_ms: u64) -> Self {
        Self {
            success: true,
            column_names,
            rows,
            elapsed_ms,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            success: false,
            column_names: Vec::new(),
            rows: Vec::new(),
            elapsed_ms,
            error: Some(error.into()),
        }
    }
}

/// A verified (request, query) pair served to the generator as precedent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FewShotExample {
    pub id: String,
    pub request_text: String,
    pub query_text: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

/// Review status of a logged failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStatus {
    Pending,
    Reviewed,
    Resolved,
}

impl FailureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Reviewed => "reviewed",
            Self::Resolved => "resolved",
        }
    }
}

/// A terminal pipeline failure, persisted for review and later promotion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub id: String,
    pub request_text: String,
    pub last_candidate: String,
    pub error_category: ErrorCategory,
    pub attempts: u32,
    pub status: FailureStatus,
    /// Confirmed external correction, set when the record is resolved.
    pub correction: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The assembled pipeline response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    /// Final (or last attempted) SQL text.
    pub query: Option<String>,
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Natural-language explanation of the result, when available.
    pub narrative: Option<String>,
    pub error: Option<String>,
    pub category: Option<ErrorCategory>,
    /// Human-readable next step on terminal failure.
    pub suggestion: Option<String>,
    pub attempts: u32,
    pub elapsed_ms: u64,
    /// Table ids considered by schema narrowing, for audit.
    pub tables_considered: Vec<String>,
    /// Whether this response was served from the artifact cache.
    pub from_cache: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_invariants_accept_ordered_dependencies() {
        let plan = QueryPlan {
            steps: vec![
                PlanStep {
                    id: 1,
                    description: "Q1 total".into(),
                    depends_on: vec![],
                },
                PlanStep {
                    id: 2,
                    description: "Q2 total".into(),
                    depends_on: vec![],
                },
                PlanStep {
                    id: 3,
                    description: "growth".into(),
                    depends_on: vec![1, 2],
                },
            ],
        };
        assert!(plan.is_well_formed());
    }

    #[test]
    fn plan_invariants_reject_forward_reference() {
        let plan = QueryPlan {
            steps: vec![
                PlanStep {
                    id: 1,
                    description: "a".into(),
                    depends_on: vec![2],
                },
                PlanStep {
                    id: 2,
                    description: "b".into(),
                    depends_on: vec![],
                },
            ],
        };
        assert!(!plan.is_well_formed());
    }

    #[test]
    fn plan_invariants_reject_duplicate_ids() {
        let plan = QueryPlan {
            steps: vec![
                PlanStep {
                    id: 1,
                    description: "a".into(),
                    depends_on: vec![],
                },
                PlanStep {
                    id: 1,
                    description: "b".into(),
                    depends_on: vec![],
                },
            ],
        };
        assert!(!plan.is_well_formed());
    }

    #[test]
    fn validation_result_validity_derives_from_errors() {
        let mut result = ValidationResult::default();
        result.warnings.push("unscoped wildcard projection".into());
        assert!(result.is_valid());
        result.errors.push("SchemaViolation: orders".into());
        assert!(!result.is_valid());
    }
}
