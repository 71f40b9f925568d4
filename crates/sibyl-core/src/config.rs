//! Pipeline configuration.
//!
//! Every stage reads its knobs from a dedicated config struct with serde
//! defaults, aggregated into [`SibylConfig`]. Thresholds that the source
//! material treats as policy (entity confidence, signal blending) are
//! deliberately configuration, not constants.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{SibylError, SibylResult};

/// Named defaults, kept in one place so tests and docs can reference them.
pub mod defaults {
    /// Tables kept by schema narrowing before join expansion.
    pub const TOP_K_TABLES: usize = 5;
    /// Minimum entity-resolution confidence; below this a phrase resolves
    /// to nothing.
    pub const CONFIDENCE_THRESHOLD: f64 = 0.85;
    /// Verified few-shot examples retrieved per generation.
    pub const FEW_SHOT_K: usize = 3;
    /// Similar failures appended as anti-patterns per generation.
    pub const FAILURE_K: usize = 2;
    /// Total attempt budget per request (initial generation included).
    pub const RETRY_BUDGET: u32 = 2;
    /// Query execution deadline in seconds.
    pub const DEADLINE_SECS: u64 = 30;
    /// Artifact cache entry time-to-live in seconds.
    pub const CACHE_TTL_SECS: u64 = 3600;
    /// Artifact cache capacity (entries).
    pub const CACHE_CAPACITY: u64 = 1024;
    /// Embedding dimensionality for the hashed TF-IDF provider.
    pub const EMBED_DIMENSIONS: usize = 256;
    /// OR-disjunct count above which the validator warns.
    pub const MAX_DISJUNCTS: usize = 8;
    /// Generation temperature. Near-zero: this is code, not prose.
    pub const GENERATION_TEMPERATURE: f64 = 0.01;
    /// Decomposition temperature.
    pub const DECOMPOSITION_TEMPERATURE: f64 = 0.1;
    pub const GENERATION_MAX_TOKENS: u32 = 1024;
    pub const DECOMPOSITION_MAX_TOKENS: u32 = 512;
    /// Language-model call timeout in seconds.
    pub const LLM_TIMEOUT_SECS: u64 = 30;
    /// Interval between example-store reconciliation passes, in seconds.
    pub const RECONCILE_INTERVAL_SECS: u64 = 300;
}

/// A deterministic phrase-to-table override for schema narrowing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordOverride {
    pub phrase: String,
    pub table_id: String,
}

/// Schema narrowing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrowerConfig {
    pub top_k: usize,
    /// Phrases that force a table into the candidate set regardless of
    /// score. Used to correct systematic mis-ranking on recurring
    /// vocabulary.
    pub keyword_overrides: Vec<KeywordOverride>,
}

impl Default for NarrowerConfig {
    fn default() -> Self {
        Self {
            top_k: defaults::TOP_K_TABLES,
            keyword_overrides: Vec::new(),
        }
    }
}

/// Entity resolution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub confidence_threshold: f64,
    /// Longest n-gram considered as a candidate phrase.
    pub max_ngram: usize,
    /// Signal toggles for the max-of-two blend.
    pub use_semantic: bool,
    pub use_edit_distance: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: defaults::CONFIDENCE_THRESHOLD,
            max_ngram: crate::constants::MAX_ENTITY_NGRAM,
            use_semantic: true,
            use_edit_distance: true,
        }
    }
}

/// Decomposer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecomposerConfig {
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for DecomposerConfig {
    fn default() -> Self {
        Self {
            temperature: defaults::DECOMPOSITION_TEMPERATURE,
            max_tokens: defaults::DECOMPOSITION_MAX_TOKENS,
        }
    }
}

/// Query generation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub few_shot_k: usize,
    pub failure_k: usize,
    pub temperature: f64,
    pub max_tokens: u32,
    /// SQL dialect named in the prompt.
    pub dialect: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            few_shot_k: defaults::FEW_SHOT_K,
            failure_k: defaults::FAILURE_K,
            temperature: defaults::GENERATION_TEMPERATURE,
            max_tokens: defaults::GENERATION_MAX_TOKENS,
            dialect: "SQLite".to_string(),
        }
    }
}

/// Validator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub max_disjuncts: usize,
    /// Whether to run the EXPLAIN dry-run probe when a backend is wired in.
    pub explain_probe: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_disjuncts: defaults::MAX_DISJUNCTS,
            explain_probe: true,
        }
    }
}

/// Executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub deadline_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            deadline_secs: defaults::DEADLINE_SECS,
        }
    }
}

/// Correction loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    /// Total attempts allowed per request, the initial generation
    /// included. An explicit, finite counter: no open-ended loops.
    pub retry_budget: u32,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            retry_budget: defaults::RETRY_BUDGET,
            temperature: defaults::GENERATION_TEMPERATURE,
            max_tokens: defaults::GENERATION_MAX_TOKENS,
        }
    }
}

/// Artifact cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: defaults::CACHE_TTL_SECS,
            capacity: defaults::CACHE_CAPACITY,
        }
    }
}

/// Example store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Durable store path. `None` keeps the store in memory.
    pub path: Option<PathBuf>,
    /// Reconciliation interval for the background promotion pass.
    pub reconcile_interval_secs: Option<u64>,
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimensions: defaults::EMBED_DIMENSIONS,
        }
    }
}

/// Language-model client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    /// Environment variable holding the API key; never the key itself.
    pub api_key_env: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            api_key_env: "SIBYL_LLM_API_KEY".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            timeout_secs: defaults::LLM_TIMEOUT_SECS,
        }
    }
}

/// Aggregated pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SibylConfig {
    pub narrower: NarrowerConfig,
    pub resolver: ResolverConfig,
    pub decomposer: DecomposerConfig,
    pub generator: GeneratorConfig,
    pub validator: ValidatorConfig,
    pub executor: ExecutorConfig,
    pub correction: CorrectionConfig,
    pub cache: CacheConfig,
    pub store: StoreConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
}

impl SibylConfig {
    /// Load from a TOML file. Unset sections fall back to defaults.
    pub fn load(path: &Path) -> SibylResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| SibylError::Config {
            reason: format!("{}: {e}", path.display()),
        })?;
        let config: Self = toml::from_str(&raw).map_err(|e| SibylError::Config {
            reason: format!("{}: {e}", path.display()),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> SibylResult<()> {
        if !(0.0..=1.0).contains(&self.resolver.confidence_threshold) {
            return Err(SibylError::Config {
                reason: format!(
                    "resolver.confidence_threshold must be in [0,1], got {}",
                    self.resolver.confidence_threshold
                ),
            });
        }
        if self.correction.retry_budget == 0 {
            return Err(SibylError::Config {
                reason: "correction.retry_budget must be at least 1".to_string(),
            });
        }
        if self.embedding.dimensions == 0 {
            return Err(SibylError::Config {
                reason: "embedding.dimensions must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}
