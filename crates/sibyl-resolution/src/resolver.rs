//! Entity resolution: candidate phrases from the request scored against
//! every known alias of every categorical column in the candidate tables.
//!
//! Each (phrase, alias) pair is scored with two signals, embedding cosine
//! and a normalized edit-distance similarity, and the maximum of the two
//! wins. Only the best alias per column survives, and
//! only if it clears the confidence threshold; a below-threshold match
//! resolves to nothing rather than a low-confidence guess.

use tracing::debug;

use sibyl_catalog::SemanticCatalog;
use sibyl_core::config::ResolverConfig;
use sibyl_core::traits::{cosine_similarity, IEmbeddingProvider};
use sibyl_core::types::{EntityResolution, SchemaCandidate};

pub struct EntityResolver<'a> {
    embedder: &'a dyn IEmbeddingProvider,
    config: &'a ResolverConfig,
}

impl<'a> EntityResolver<'a> {
    pub fn new(embedder: &'a dyn IEmbeddingProvider, config: &'a ResolverConfig) -> Self {
        Self { embedder, config }
    }

    /// Resolve entities in `request` against the alias tables of the
    /// candidate tables. An empty result is a valid outcome.
    pub fn resolve(
        &self,
        request: &str,
        candidates: &[SchemaCandidate],
        catalog: &SemanticCatalog,
    ) -> Vec<EntityResolution> {
        let phrases = extract_phrases(request, self.config.max_ngram);
        if phrases.is_empty() {
            return Vec::new();
        }

        let mut resolutions = Vec::new();
        for candidate in candidates {
            for mapping in catalog.mappings_for_table(&candidate.table_id) {
                let mut best: Option<EntityResolution> = None;
                for value in &mapping.values {
                    let mut aliases: Vec<&str> =
                        vec![value.canonical.as_str()];
                    aliases.extend(value.aliases.iter().map(String::as_str));
                    for alias in aliases {
                        for phrase in &phrases {
                            let confidence = self.score(phrase, alias);
                            let better = best
                                .as_ref()
                                .map(|b| confidence > b.confidence)
                                .unwrap_or(true);
                            if better {
                                best = Some(EntityResolution {
                                    source_phrase: phrase.clone(),
                                    table_id: mapping.table_id.clone(),
                                    column_id: mapping.column.clone(),
                                    canonical_value: value.canonical.clone(),
                                    confidence,
                                });
                            }
                        }
                    }
                }
                match best {
                    Some(resolution)
                        if resolution.confidence >= self.config.confidence_threshold =>
                    {
                        debug!(
                            phrase = %resolution.source_phrase,
                            canonical = %resolution.canonical_value,
                            confidence = resolution.confidence,
                            "entity resolved"
                        );
                        resolutions.push(resolution);
                    }
                    Some(resolution) => {
                        // Ambiguous: proceed without binding this entity.
                        debug!(
                            phrase = %resolution.source_phrase,
                            column = %resolution.column_id,
                            confidence = resolution.confidence,
                            threshold = self.config.confidence_threshold,
                            "resolution below threshold, dropped"
                        );
                    }
                    None => {}
                }
            }
        }
        resolutions
    }

    /// Max-of-two-signals score for one (phrase, alias) pair, in [0, 1].
    /// Exact case-insensitive matches score 1.0 without touching either
    /// signal.
    fn score(&self, phrase: &str, alias: &str) -> f64 {
        let phrase_lower = phrase.to_lowercase();
        let alias_lower = alias.to_lowercase();
        if phrase_lower == alias_lower {
            return 1.0;
        }

        let edit = if self.config.use_edit_distance {
            strsim::jaro_winkler(&phrase_lower, &alias_lower)
        } else {
            0.0
        };

        let semantic = if self.config.use_semantic {
            match (self.embedder.embed(&phrase_lower), self.embedder.embed(&alias_lower)) {
                (Ok(a), Ok(b)) => cosine_similarity(&a, &b) as f64,
                _ => 0.0,
            }
        } else {
            0.0
        };

        edit.max(semantic).clamp(0.0, 1.0)
    }
}

/// Lowercased word n-grams of the request, longest first so that
/// multi-word aliases get a chance before their fragments.
fn extract_phrases(request: &str, max_ngram: usize) -> Vec<String> {
    let tokens: Vec<String> = request
        .split(|c: char| !c.is_alphanumeric() && c != '&')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect();
    let mut phrases = Vec::new();
    for len in (1..=max_ngram.min(tokens.len())).rev() {
        for window in tokens.windows(len) {
            let phrase = window.join(" ");
            if !phrases.contains(&phrase) {
                phrases.push(phrase);
            }
        }
    }
    phrases
}
