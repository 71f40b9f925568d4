//! Schema narrowing: score every table against the request, keep the
//! top-K, expand one join hop, deduplicate keep-first.
//!
//! Scoring blends lexical token overlap with embedding cosine similarity.
//! The contract is a total order with ties broken by table id, so the
//! result is deterministic for identical input and catalog state.

use tracing::debug;

use sibyl_core::config::NarrowerConfig;
use sibyl_core::traits::{cosine_similarity, IEmbeddingProvider};
use sibyl_core::types::SchemaCandidate;

use crate::catalog::SemanticCatalog;

pub struct SchemaNarrower<'a> {
    catalog: &'a SemanticCatalog,
    embedder: &'a dyn IEmbeddingProvider,
    config: &'a NarrowerConfig,
}

impl<'a> SchemaNarrower<'a> {
    pub fn new(
        catalog: &'a SemanticCatalog,
        embedder: &'a dyn IEmbeddingProvider,
        config: &'a NarrowerConfig,
    ) -> Self {
        Self {
            catalog,
            embedder,
            config,
        }
    }

    /// Narrow the catalog to the candidate tables for one request.
    ///
    /// Order of inclusion: keyword overrides, metric-required tables,
    /// scored top-K, then one-hop join neighbors of everything already
    /// included. Never errors: an empty catalog narrows to an empty list.
    pub fn narrow(&self, request: &str) -> Vec<SchemaCandidate> {
        if self.catalog.is_empty() {
            return Vec::new();
        }
        let request_lower = request.to_lowercase();

        // Forced inclusions first so they survive deduplication.
        let mut selected: Vec<String> = Vec::new();
        for rule in &self.config.keyword_overrides {
            if request_lower.contains(&rule.phrase.to_lowercase())
                && self.catalog.table(&rule.table_id).is_some()
            {
                push_unique(&mut selected, &rule.table_id);
            }
        }
        for (key, metric) in self.catalog.metrics() {
            let spoken = key.replace('_', " ");
            if request_lower.contains(&spoken)
                || (!metric.name.is_empty()
                    && request_lower.contains(&metric.name.to_lowercase()))
            {
                for table in &metric.required_tables {
                    if self.catalog.table(table).is_some() {
                        push_unique(&mut selected, table);
                    }
                }
            }
        }

        // Score the full dictionary. BTreeMap iteration plus the explicit
        // tie-break keeps the order total and stable.
        let request_embedding = self.embedder.embed(request).ok();
        let mut scored: Vec<(f64, &String)> = self
            .catalog
            .table_ids()
            .map(|id| (self.score_table(&request_lower, request_embedding.as_deref(), id), id))
            .collect();
        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(b.1))
        });

        for (_, id) in scored.iter().take(self.config.top_k) {
            push_unique(&mut selected, id);
        }

        // One join hop from everything selected so far.
        let base = selected.clone();
        for id in &base {
            for neighbor in self.catalog.join_neighbors(id) {
                push_unique(&mut selected, neighbor);
            }
        }

        debug!(
            request = request,
            candidates = selected.len(),
            tables = ?selected,
            "schema narrowed"
        );

        selected
            .iter()
            .filter_map(|id| self.catalog.candidate(id))
            .collect()
    }

    fn score_table(
        &self,
        request_lower: &str,
        request_embedding: Option<&[f32]>,
        table_id: &str,
    ) -> f64 {
        let Some(def) = self.catalog.table(table_id) else {
            return 0.0;
        };
        let profile = format!(
            "{} {} {}",
            table_id.replace('_', " "),
            def.business_name,
            def.description
        );

        let lexical = token_overlap(request_lower, &profile.to_lowercase());

        let semantic = match request_embedding {
            Some(query) => self
                .embedder
                .embed(&profile)
                .map(|table_vec| cosine_similarity(query, &table_vec) as f64)
                .unwrap_or(0.0),
            None => 0.0,
        };

        // Direct mention of the table id is a strong signal on its own.
        let mention = if request_lower.contains(&table_id.replace('_', " "))
            || request_lower.contains(table_id)
        {
            1.0
        } else {
            0.0
        };

        lexical + semantic + mention
    }
}

/// Fraction of profile tokens present in the request.
fn token_overlap(request_lower: &str, profile_lower: &str) -> f64 {
    let request_tokens: Vec<&str> = request_lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .collect();
    let profile_tokens: Vec<&str> = profile_lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .collect();
    if profile_tokens.is_empty() {
        return 0.0;
    }
    let hits = profile_tokens
        .iter()
        .filter(|t| request_tokens.contains(t))
        .count();
    hits as f64 / profile_tokens.len() as f64
}

fn push_unique(list: &mut Vec<String>, id: &str) {
    if !list.iter().any(|existing| existing == id) {
        list.push(id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use sibyl_core::config::KeywordOverride;
    use sibyl_core::errors::SibylResult;

    use crate::catalog::{JoinPath, MetricDefinition, TableDefinition};

    /// Deterministic token-hash embedder, good enough for overlap tests.
    struct HashEmbedder;

    impl IEmbeddingProvider for HashEmbedder {
        fn embed(&self, text: &str) -> SibylResult<Vec<f32>> {
            let mut v = vec![0.0f32; 32];
            for token in text.to_lowercase().split_whitespace() {
                let mut h: u32 = 2166136261;
                for b in token.bytes() {
                    h ^= b as u32;
                    h = h.wrapping_mul(16777619);
                }
                v[(h % 32) as usize] += 1.0;
            }
            Ok(v)
        }

        fn dimensions(&self) -> usize {
            32
        }

        fn name(&self) -> &str {
            "hash-test"
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    fn table(description: &str) -> TableDefinition {
        let mut columns = BTreeMap::new();
        columns.insert("id".to_string(), Default::default());
        TableDefinition {
            business_name: String::new(),
            description: description.to_string(),
            primary_key: Some("id".to_string()),
            columns,
        }
    }

    fn catalog() -> SemanticCatalog {
        let mut tables = BTreeMap::new();
        tables.insert("demands".to_string(), table("Open staffing demands"));
        tables.insert("accounts".to_string(), table("Client accounts"));
        tables.insert("users".to_string(), table("Application users and roles"));
        tables.insert(
            "demand_activity".to_string(),
            table("Audit log of demand changes"),
        );
        let join_paths = vec![JoinPath {
            from_table: "demands".to_string(),
            from_column: "account_id".to_string(),
            to_table: "accounts".to_string(),
            to_column: "id".to_string(),
        }];
        SemanticCatalog::from_parts(BTreeMap::new(), tables, Vec::new(), join_paths)
    }

    #[test]
    fn empty_catalog_narrows_to_empty() {
        let catalog = SemanticCatalog::default();
        let config = NarrowerConfig::default();
        let narrower = SchemaNarrower::new(&catalog, &HashEmbedder, &config);
        assert!(narrower.narrow("anything").is_empty());
    }

    #[test]
    fn fewer_tables_than_top_k_returns_all() {
        let catalog = catalog();
        let config = NarrowerConfig::default(); // top_k = 5 > 4 tables
        let narrower = SchemaNarrower::new(&catalog, &HashEmbedder, &config);
        assert_eq!(narrower.narrow("show demands").len(), 4);
    }

    #[test]
    fn result_is_deterministic() {
        let catalog = catalog();
        let config = NarrowerConfig {
            top_k: 2,
            ..Default::default()
        };
        let narrower = SchemaNarrower::new(&catalog, &HashEmbedder, &config);
        let a: Vec<String> = narrower
            .narrow("how many demands per account")
            .into_iter()
            .map(|c| c.table_id)
            .collect();
        let b: Vec<String> = narrower
            .narrow("how many demands per account")
            .into_iter()
            .map(|c| c.table_id)
            .collect();
        assert_eq!(a, b);
    }

    #[test]
    fn size_is_bounded_by_top_k_plus_neighbors() {
        let catalog = catalog();
        let config = NarrowerConfig {
            top_k: 1,
            ..Default::default()
        };
        let narrower = SchemaNarrower::new(&catalog, &HashEmbedder, &config);
        let result = narrower.narrow("show demands");
        // top-1 (demands) plus its single join neighbor (accounts).
        assert!(result.len() <= 2);
        assert_eq!(result[0].table_id, "demands");
    }

    #[test]
    fn keyword_override_forces_inclusion() {
        let catalog = catalog();
        let config = NarrowerConfig {
            top_k: 1,
            keyword_overrides: vec![KeywordOverride {
                phrase: "audit trail".to_string(),
                table_id: "demand_activity".to_string(),
            }],
        };
        let narrower = SchemaNarrower::new(&catalog, &HashEmbedder, &config);
        let result = narrower.narrow("show the audit trail for demands");
        assert_eq!(result[0].table_id, "demand_activity");
    }

    #[test]
    fn metric_match_forces_required_tables() {
        let mut metrics = BTreeMap::new();
        metrics.insert(
            "fulfillment_time".to_string(),
            MetricDefinition {
                name: "Fulfillment Time".to_string(),
                description: "Days from open to filled".to_string(),
                expression: None,
                required_tables: vec!["demand_activity".to_string()],
            },
        );
        let base = catalog();
        let catalog = SemanticCatalog::from_parts(
            metrics,
            base.table_ids()
                .map(|id| (id.clone(), base.table(id).unwrap().clone()))
                .collect(),
            Vec::new(),
            Vec::new(),
        );
        let config = NarrowerConfig {
            top_k: 1,
            ..Default::default()
        };
        let narrower = SchemaNarrower::new(&catalog, &HashEmbedder, &config);
        let result = narrower.narrow("average fulfillment time for java");
        assert_eq!(result[0].table_id, "demand_activity");
    }
}
