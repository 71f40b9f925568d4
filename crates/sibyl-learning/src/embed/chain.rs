//! Ordered embedding fallback.
//!
//! Providers are tried in order; an unavailable or failing provider is
//! skipped with a warning rather than failing retrieval outright. The
//! last link should be a provider that cannot fail, normally the hashed
//! TF embedder.

use tracing::warn;

use sibyl_core::errors::{SibylError, StoreError};
use sibyl_core::traits::IEmbeddingProvider;
use sibyl_core::SibylResult;

pub struct FallbackChain {
    providers: Vec<Box<dyn IEmbeddingProvider>>,
}

impl FallbackChain {
    pub fn new(providers: Vec<Box<dyn IEmbeddingProvider>>) -> Self {
        Self { providers }
    }

    /// The provider that would serve the next call, for logs.
    pub fn active(&self) -> Option<&str> {
        self.providers
            .iter()
            .find(|p| p.is_available())
            .map(|p| p.name())
    }
}

impl IEmbeddingProvider for FallbackChain {
    fn embed(&self, text: &str) -> SibylResult<Vec<f32>> {
        for provider in &self.providers {
            if !provider.is_available() {
                continue;
            }
            match provider.embed(text) {
                Ok(v) => return Ok(v),
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "embedding provider failed, falling through");
                }
            }
        }
        Err(SibylError::Store(StoreError::Query {
            reason: "no embedding provider available".to_string(),
        }))
    }

    fn dimensions(&self) -> usize {
        self.providers
            .iter()
            .find(|p| p.is_available())
            .map(|p| p.dimensions())
            .unwrap_or(0)
    }

    fn name(&self) -> &str {
        "fallback-chain"
    }

    fn is_available(&self) -> bool {
        self.providers.iter().any(|p| p.is_available())
    }
}
