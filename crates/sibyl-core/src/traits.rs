//! Capability traits at the pipeline's seams.
//!
//! The orchestrator depends only on these interfaces; concrete variants
//! (HTTP language model, SQLite backend, TF-IDF embedder, durable example
//! store) live in the downstream crates.

use std::time::Duration;

use serde_json::Value;

use crate::errors::{BackendError, LlmError, SibylResult};
use crate::types::{FailureRecord, FewShotExample};

/// Opaque text-completion capability.
#[async_trait::async_trait]
pub trait ILanguageModel: Send + Sync {
    /// Complete a prompt. Implementations must enforce their own call
    /// timeout and surface it as [`LlmError::Timeout`].
    async fn complete(
        &self,
        prompt: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String, LlmError>;

    /// Human-readable model name, for logs.
    fn name(&self) -> &str;
}

/// Raw rows returned by the relational store.
#[derive(Debug, Clone, Default)]
pub struct QueryRows {
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Opaque query-execution capability.
#[async_trait::async_trait]
pub trait IQueryBackend: Send + Sync {
    /// Non-mutating dry run. The only probe validation is allowed to make.
    async fn explain(&self, query: &str) -> Result<(), BackendError>;

    /// Execute under a deadline. Implementations must cancel the
    /// underlying query on timeout without leaking the connection.
    async fn execute(&self, query: &str, deadline: Duration) -> Result<QueryRows, BackendError>;
}

/// Embedding generation provider.
pub trait IEmbeddingProvider: Send + Sync {
    /// Embed a single text, returning a vector of floats.
    fn embed(&self, text: &str) -> SibylResult<Vec<f32>>;

    /// The dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Human-readable provider name.
    fn name(&self) -> &str;

    /// Whether this provider is currently available.
    fn is_available(&self) -> bool;
}

/// Cosine similarity between two embeddings. Zero for mismatched or
/// zero-norm vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Read side of the example store, as seen by the generator.
pub trait IExampleStore: Send + Sync {
    /// Nearest verified few-shot examples by embedding similarity.
    fn nearest_verified(&self, embedding: &[f32], k: usize) -> SibylResult<Vec<FewShotExample>>;

    /// Recent similar failures, served to the generator as anti-patterns.
    fn similar_failures(&self, embedding: &[f32], k: usize) -> SibylResult<Vec<FailureRecord>>;
}
