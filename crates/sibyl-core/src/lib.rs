//! # sibyl-core
//!
//! Foundation crate for the Sibyl natural-language-to-SQL pipeline.
//! Defines all shared types, traits, errors, config, and constants.
//! Every other crate in the workspace depends on this.

pub mod config;
pub mod constants;
pub mod errors;
pub mod fingerprint;
pub mod traits;
pub mod types;

// Re-export the most commonly used items at the crate root.
pub use config::SibylConfig;
pub use errors::{ErrorCategory, SibylError, SibylResult};
pub use types::{
    CandidateQuery, EntityResolution, ExecutionResult, FailureRecord, FailureStatus,
    FewShotExample, PlanStep, QueryPlan, Request, Response, SchemaCandidate, ValidationResult,
};
