//! The query generator: retrieves precedent from the example store, builds
//! the prompt, calls the model, and extracts a clean candidate.

use tracing::{debug, warn};

use sibyl_catalog::SemanticCatalog;
use sibyl_core::config::GeneratorConfig;
use sibyl_core::errors::{GenerationError, SibylError, SibylResult};
use sibyl_core::traits::{IEmbeddingProvider, IExampleStore, ILanguageModel};
use sibyl_core::types::{
    CandidateQuery, EntityResolution, QueryPlan, Request, SchemaCandidate,
};

use crate::extract;
use crate::prompt;

pub struct QueryGenerator<'a> {
    llm: &'a dyn ILanguageModel,
    store: &'a dyn IExampleStore,
    embedder: &'a dyn IEmbeddingProvider,
    config: &'a GeneratorConfig,
}

impl<'a> QueryGenerator<'a> {
    pub fn new(
        llm: &'a dyn ILanguageModel,
        store: &'a dyn IExampleStore,
        embedder: &'a dyn IEmbeddingProvider,
        config: &'a GeneratorConfig,
    ) -> Self {
        Self {
            llm,
            store,
            embedder,
            config,
        }
    }

    /// Produce one candidate query for the given attempt number.
    pub async fn generate(
        &self,
        request: &Request,
        plan: &QueryPlan,
        candidates: &[SchemaCandidate],
        entities: &[EntityResolution],
        catalog: &SemanticCatalog,
        attempt: u32,
    ) -> SibylResult<CandidateQuery> {
        // Precedent retrieval is best-effort: a store hiccup degrades the
        // prompt, it does not fail the request.
        let (examples, failures) = match self.embedder.embed(&request.text) {
            Ok(embedding) => {
                let examples = self
                    .store
                    .nearest_verified(&embedding, self.config.few_shot_k)
                    .unwrap_or_else(|e| {
                        warn!(error = %e, "few-shot retrieval failed");
                        Vec::new()
                    });
                let failures = self
                    .store
                    .similar_failures(&embedding, self.config.failure_k)
                    .unwrap_or_else(|e| {
                        warn!(error = %e, "failure retrieval failed");
                        Vec::new()
                    });
                (examples, failures)
            }
            Err(e) => {
                warn!(error = %e, "request embedding failed, generating without precedent");
                (Vec::new(), Vec::new())
            }
        };

        debug!(
            examples = examples.len(),
            failures = failures.len(),
            attempt,
            "generating candidate"
        );

        let prompt_text = prompt::generation_prompt(
            &request.text,
            plan,
            candidates,
            entities,
            catalog,
            &examples,
            &failures,
            &self.config.dialect,
        );

        let raw = self
            .llm
            .complete(&prompt_text, self.config.temperature, self.config.max_tokens)
            .await
            .map_err(GenerationError::Llm)?;

        let sql = extract::extract_sql(&raw)
            .ok_or(SibylError::Generation(GenerationError::EmptyCompletion))?;
        if !extract::is_read_only(&sql) {
            return Err(SibylError::Generation(GenerationError::NotReadOnly {
                statement: sql,
            }));
        }

        Ok(CandidateQuery {
            text: sql,
            attempt,
            schema_refs: candidates.iter().map(|c| c.table_id.clone()).collect(),
            entity_refs: entities
                .iter()
                .map(|e| format!("{}.{}={}", e.table_id, e.column_id, e.canonical_value))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use sibyl_core::errors::LlmError;
    use sibyl_core::types::{FailureRecord, FewShotExample};

    struct ScriptedModel {
        responses: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().rev().map(String::from).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl ILanguageModel for ScriptedModel {
        async fn complete(
            &self,
            prompt: &str,
            _temperature: f64,
            _max_tokens: u32,
        ) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop()
                .ok_or(LlmError::Unavailable {
                    reason: "script exhausted".to_string(),
                })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct EmptyStore;

    impl IExampleStore for EmptyStore {
        fn nearest_verified(
            &self,
            _embedding: &[f32],
            _k: usize,
        ) -> SibylResult<Vec<FewShotExample>> {
            Ok(Vec::new())
        }

        fn similar_failures(
            &self,
            _embedding: &[f32],
            _k: usize,
        ) -> SibylResult<Vec<FailureRecord>> {
            Ok(Vec::new())
        }
    }

    struct NullEmbedder;

    impl IEmbeddingProvider for NullEmbedder {
        fn embed(&self, _text: &str) -> SibylResult<Vec<f32>> {
            Ok(vec![0.0; 8])
        }

        fn dimensions(&self) -> usize {
            8
        }

        fn name(&self) -> &str {
            "null"
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    fn request(text: &str) -> Request {
        Request::new(text, None)
    }

    #[tokio::test]
    async fn generates_a_clean_candidate() {
        let model = ScriptedModel::new(vec![
            "```sql\nSELECT COUNT(*) FROM demands;\n```",
        ]);
        let config = GeneratorConfig::default();
        let generator = QueryGenerator::new(&model, &EmptyStore, &NullEmbedder, &config);
        let candidate = generator
            .generate(
                &request("how many demands"),
                &QueryPlan::single_step("count"),
                &[],
                &[],
                &SemanticCatalog::default(),
                1,
            )
            .await
            .unwrap();
        assert_eq!(candidate.text, "SELECT COUNT(*) FROM demands;");
        assert_eq!(candidate.attempt, 1);
    }

    #[tokio::test]
    async fn prose_only_output_is_a_generation_failure() {
        let model = ScriptedModel::new(vec!["I am unable to help."]);
        let config = GeneratorConfig::default();
        let generator = QueryGenerator::new(&model, &EmptyStore, &NullEmbedder, &config);
        let err = generator
            .generate(
                &request("how many demands"),
                &QueryPlan::single_step("count"),
                &[],
                &[],
                &SemanticCatalog::default(),
                1,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SibylError::Generation(GenerationError::EmptyCompletion)
        ));
    }

    #[tokio::test]
    async fn write_statements_are_rejected() {
        // A SELECT buried in prose after a write op must not slip through:
        // the extractor finds the UPDATE-leading text and the guard trips.
        let model = ScriptedModel::new(vec!["UPDATE demands SET status = 'closed' -- SELECT"]);
        let config = GeneratorConfig::default();
        let generator = QueryGenerator::new(&model, &EmptyStore, &NullEmbedder, &config);
        let result = generator
            .generate(
                &request("close all demands"),
                &QueryPlan::single_step("x"),
                &[],
                &[],
                &SemanticCatalog::default(),
                1,
            )
            .await;
        assert!(result.is_err());
    }
}
