//! Hashed TF embedding provider.
//!
//! Deterministic and dependency-free: tokens are bucketed into a fixed
//! number of dimensions with FNV-1a, weighted by log-scaled term
//! frequency, and L2-normalized. Not a semantic model, but stable enough
//! for nearest-neighbour retrieval over short analytic requests, and it
//! never goes away.

use std::collections::HashMap;

use sibyl_core::config::EmbeddingConfig;
use sibyl_core::traits::IEmbeddingProvider;
use sibyl_core::SibylResult;

pub struct TfIdfEmbedder {
    dimensions: usize,
}

impl TfIdfEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Self {
        Self {
            dimensions: config.dimensions,
        }
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 1)
            .map(str::to_string)
            .collect()
    }

    fn fnv1a(token: &str) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in token.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash
    }
}

impl IEmbeddingProvider for TfIdfEmbedder {
    fn embed(&self, text: &str) -> SibylResult<Vec<f32>> {
        let mut counts: HashMap<String, u32> = HashMap::new();
        for token in Self::tokenize(text) {
            *counts.entry(token).or_insert(0) += 1;
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for (token, count) in &counts {
            let hash = Self::fnv1a(token);
            let bucket = (hash % self.dimensions as u64) as usize;
            // Second hash bit picks the sign, which spreads collisions
            // instead of always stacking them.
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            let weight = 1.0 + (*count as f32).ln();
            vector[bucket] += sign * weight;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "tfidf-hash"
    }

    fn is_available(&self) -> bool {
        true
    }
}
