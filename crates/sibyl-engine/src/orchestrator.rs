//! The pipeline orchestrator.
//!
//! [`Sibyl`] is an explicit context object built once per process; it
//! owns the catalog, configuration, capability handles, and shared
//! stores. No global singletons. `process` runs the full pipeline for
//! one request: cache admission, narrowing, resolution, decomposition,
//! then the generate/validate/execute loop under the attempt budget.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use regex::Regex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sibyl_catalog::{SchemaNarrower, SemanticCatalog};
use sibyl_core::config::SibylConfig;
use sibyl_core::errors::{classify_error, ErrorCategory};
use sibyl_core::fingerprint::fingerprint;
use sibyl_core::traits::{IEmbeddingProvider, ILanguageModel, IQueryBackend};
use sibyl_core::types::{
    CandidateQuery, ExecutionResult, FailureRecord, FailureStatus, Request, Response,
};
use sibyl_core::SibylResult;
use sibyl_execution::{ArtifactCache, Executor};
use sibyl_generation::QueryGenerator;
use sibyl_learning::ExampleStore;
use sibyl_resolution::{Decomposer, EntityResolver};
use sibyl_validation::Validator;

use crate::correction::{Attempt, AttemptState, CorrectionLoop};

/// Counts surfaced by [`Sibyl::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    pub examples: u64,
    pub verified_examples: u64,
    pub failures: u64,
    pub pending_failures: u64,
    pub cache_entries: u64,
}

pub struct Sibyl {
    config: SibylConfig,
    catalog: SemanticCatalog,
    llm: Arc<dyn ILanguageModel>,
    backend: Arc<dyn IQueryBackend>,
    embedder: Arc<dyn IEmbeddingProvider>,
    store: Arc<ExampleStore>,
    cache: ArtifactCache,
}

impl Sibyl {
    pub fn new(
        config: SibylConfig,
        catalog: SemanticCatalog,
        llm: Arc<dyn ILanguageModel>,
        backend: Arc<dyn IQueryBackend>,
        embedder: Arc<dyn IEmbeddingProvider>,
        store: Arc<ExampleStore>,
    ) -> SibylResult<Self> {
        config.validate()?;
        let cache = ArtifactCache::new(&config.cache);
        Ok(Self {
            config,
            catalog,
            llm,
            backend,
            embedder,
            store,
            cache,
        })
    }

    /// Process one natural-language request end to end.
    ///
    /// Identical requests (modulo case and whitespace) are served from
    /// the artifact cache; concurrent identical misses collapse into a
    /// single pipeline run whose response every waiter shares.
    pub async fn process(&self, text: &str, requester: Option<&str>) -> Response {
        let started = Instant::now();
        let key = fingerprint(text);

        if let Some(hit) = self.cache.get(&key) {
            return cached(&hit);
        }

        let lock = self.cache.flight_lock(&key);
        let guard = lock.lock().await;
        if let Some(hit) = self.cache.get(&key) {
            return cached(&hit);
        }

        let request = Request::new(text, requester);
        let response = self.run_pipeline(&request, started).await;
        self.cache.insert(&key, Arc::new(response.clone()));
        drop(guard);
        self.cache.release_flight(&key);
        response
    }

    async fn run_pipeline(&self, request: &Request, started: Instant) -> Response {
        let narrower = SchemaNarrower::new(
            &self.catalog,
            self.embedder.as_ref(),
            &self.config.narrower,
        );
        let candidates = narrower.narrow(&request.text);
        let tables: Vec<String> = candidates.iter().map(|c| c.table_id.clone()).collect();
        debug!(tables = ?tables, "schema narrowed");

        if candidates.is_empty() {
            return failure_response(
                None,
                ErrorCategory::Unknown,
                "no catalog tables matched the request".to_string(),
                0,
                started,
                tables,
            );
        }

        let resolver = EntityResolver::new(self.embedder.as_ref(), &self.config.resolver);
        let entities = resolver.resolve(&request.text, &candidates, &self.catalog);

        let decomposer = Decomposer::new(self.llm.as_ref(), &self.config.decomposer);
        let plan = decomposer.decompose(&request.text, &self.catalog).await;

        let generator = QueryGenerator::new(
            self.llm.as_ref(),
            self.store.as_ref(),
            self.embedder.as_ref(),
            &self.config.generator,
        );
        let validator = Validator::new(&self.config.validator);
        let executor = Executor::new(self.backend.as_ref(), &self.config.executor);
        let reviser = CorrectionLoop::new(self.llm.as_ref(), &self.config.correction);

        let budget = reviser.budget();
        let mut journal: Vec<Attempt> = Vec::with_capacity(budget as usize);
        let mut previous: Option<CandidateQuery> = None;
        let mut failure: Option<(ErrorCategory, String)> = None;
        let mut attempts_used = 0u32;

        for attempt_no in 1..=budget {
            attempts_used = attempt_no;

            let produced = match (&previous, &failure) {
                (Some(prev), Some((category, error))) => {
                    reviser.revise(prev, *category, error, &candidates).await
                }
                _ => {
                    generator
                        .generate(
                            request,
                            &plan,
                            &candidates,
                            &entities,
                            &self.catalog,
                            attempt_no,
                        )
                        .await
                }
            };
            let candidate = match produced {
                Ok(c) => c,
                Err(e) => {
                    let message = e.to_string();
                    warn!(attempt = attempt_no, error = %message, "candidate production failed");
                    journal.push(Attempt {
                        number: attempt_no,
                        query: String::new(),
                        state: AttemptState::Failed,
                        error: Some(message.clone()),
                        category: Some(classify_error(&message)),
                    });
                    failure = Some((classify_error(&message), message));
                    previous = None;
                    // Nothing was produced, so there is nothing to repair.
                    break;
                }
            };

            let mut attempt = Attempt {
                number: attempt_no,
                query: candidate.text.clone(),
                state: AttemptState::Generated,
                error: None,
                category: None,
            };

            attempt.state = AttemptState::Validating;
            let validation = validator
                .validate(&candidate, &candidates, Some(self.backend.as_ref()))
                .await;
            if !validation.is_valid() {
                let message = validation.errors.join("; ");
                let category = classify_error(&message);
                warn!(attempt = attempt_no, error = %message, "validation failed");
                attempt.state = if attempt_no < budget {
                    AttemptState::Correcting
                } else {
                    AttemptState::Failed
                };
                attempt.error = Some(message.clone());
                attempt.category = Some(category);
                journal.push(attempt);
                failure = Some((category, message));
                previous = Some(candidate);
                continue;
            }
            attempt.state = AttemptState::Validated;
            for w in &validation.warnings {
                debug!(attempt = attempt_no, warning = %w, "validation warning");
            }

            attempt.state = AttemptState::Executing;
            let result = executor.run(&candidate).await;
            if result.success {
                attempt.state = AttemptState::Succeeded;
                journal.push(attempt);
                info!(
                    attempts = attempt_no,
                    rows = result.rows.len(),
                    "request succeeded"
                );
                let narrative = self.narrative(&request.text, &candidate.text, &result).await;
                return Response {
                    success: true,
                    query: Some(candidate.text),
                    column_names: result.column_names,
                    rows: result.rows,
                    narrative,
                    error: None,
                    category: None,
                    suggestion: None,
                    attempts: attempt_no,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    tables_considered: tables,
                    from_cache: false,
                };
            }

            let message = result.error.unwrap_or_else(|| "query failed".to_string());
            let category = classify_error(&message);
            warn!(attempt = attempt_no, error = %message, category = %category, "execution failed");
            attempt.state = if attempt_no < budget {
                AttemptState::Correcting
            } else {
                AttemptState::Failed
            };
            attempt.error = Some(message.clone());
            attempt.category = Some(category);
            journal.push(attempt);
            failure = Some((category, message));
            previous = Some(candidate);
        }

        // Budget exhausted. Persist the failure and answer with the last
        // candidate plus a category-specific suggestion.
        let (category, error) = failure
            .unwrap_or((ErrorCategory::Unknown, "query failed".to_string()));
        let last_query = previous.map(|c| c.text);
        debug!(journal = ?journal, "attempt journal at exhaustion");
        self.persist_failure(&request.text, last_query.as_deref(), category, attempts_used);
        failure_response(last_query, category, error, attempts_used, started, tables)
    }

    fn persist_failure(
        &self,
        request_text: &str,
        last_candidate: Option<&str>,
        category: ErrorCategory,
        attempts: u32,
    ) {
        let record = FailureRecord {
            id: Uuid::new_v4().to_string(),
            request_text: request_text.to_string(),
            last_candidate: last_candidate.unwrap_or_default().to_string(),
            error_category: category,
            attempts,
            status: FailureStatus::Pending,
            correction: None,
            created_at: Utc::now(),
        };
        let embedding = self.embedder.embed(request_text).unwrap_or_default();
        if let Err(e) = self.store.record_failure(&record, &embedding) {
            warn!(error = %e, "failed to persist failure record");
        }
    }

    /// One-sentence narrative over the result rows. Best-effort: a model
    /// hiccup means no narrative, never a failed response.
    ///
    /// An empty or NULL-only result is diagnosed against the catalog's
    /// alias tables before answering: an equality filter whose literal
    /// is a near miss of a stored value gets named in the narrative.
    async fn narrative(
        &self,
        request_text: &str,
        sql: &str,
        result: &ExecutionResult,
    ) -> Option<String> {
        if is_empty_or_null(result) {
            let mut text = "The query ran successfully but returned no data.".to_string();
            if let Some(hint) = empty_result_hint(sql, &self.catalog) {
                text.push(' ');
                text.push_str(&hint);
            }
            return Some(text);
        }

        let sample: Vec<&Vec<serde_json::Value>> = result.rows.iter().take(5).collect();
        let prompt = format!(
            "Answer in one or two plain sentences, no preamble.\n\n\
             Question: {request_text}\n\
             Columns: {}\n\
             First rows: {}\n\
             Total rows: {}",
            result.column_names.join(", "),
            serde_json::to_string(&sample).unwrap_or_default(),
            result.rows.len(),
        );
        match self.llm.complete(&prompt, 0.2, 256).await {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "narrative generation failed");
                None
            }
        }
    }

    /// Record explicit feedback on a served response. Idempotent: the
    /// store ignores duplicate pairs.
    ///
    /// A human correction is a verified example immediately; there is no
    /// reason to wait for a reconciliation pass on confirmed input.
    pub fn record_outcome(
        &self,
        request_text: &str,
        final_query: &str,
        was_correct: bool,
        human_correction: Option<&str>,
    ) -> SibylResult<bool> {
        let embedding = self.embedder.embed(request_text)?;
        if was_correct {
            return self
                .store
                .add_verified_example(request_text, final_query, &embedding, &[]);
        }
        if let Some(correction) = human_correction {
            return self.store.add_verified_example(
                request_text,
                correction,
                &embedding,
                &["corrected".to_string()],
            );
        }
        let record = FailureRecord {
            id: Uuid::new_v4().to_string(),
            request_text: request_text.to_string(),
            last_candidate: final_query.to_string(),
            error_category: ErrorCategory::Unknown,
            attempts: 1,
            status: FailureStatus::Pending,
            correction: None,
            created_at: Utc::now(),
        };
        self.store.record_failure(&record, &embedding)
    }

    /// Promote resolved failures into verified examples. Returns the
    /// number promoted.
    pub fn reconcile_examples(&self) -> SibylResult<usize> {
        self.store.reconcile()
    }

    /// Periodic reconciliation task, enabled by
    /// `store.reconcile_interval_secs`. Returns `None` when disabled.
    pub fn spawn_reconciler(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        let interval_secs = self.config.store.reconcile_interval_secs?;
        let engine = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = engine.reconcile_examples() {
                    warn!(error = %e, "reconciliation pass failed");
                }
            }
        }))
    }

    pub fn stats(&self) -> SibylResult<PipelineStats> {
        let store = self.store.stats()?;
        Ok(PipelineStats {
            examples: store.examples,
            verified_examples: store.verified_examples,
            failures: store.failures,
            pending_failures: store.pending_failures,
            cache_entries: self.cache.len(),
        })
    }

    pub fn config(&self) -> &SibylConfig {
        &self.config
    }
}

fn cached(hit: &Arc<Response>) -> Response {
    let mut response = (**hit).clone();
    response.from_cache = true;
    response
}

fn failure_response(
    query: Option<String>,
    category: ErrorCategory,
    error: String,
    attempts: u32,
    started: Instant,
    tables_considered: Vec<String>,
) -> Response {
    Response {
        success: false,
        query,
        column_names: Vec::new(),
        rows: Vec::new(),
        narrative: None,
        error: Some(error),
        category: Some(category),
        suggestion: Some(category.suggestion().to_string()),
        attempts,
        elapsed_ms: started.elapsed().as_millis() as u64,
        tables_considered,
        from_cache: false,
    }
}

/// Checks the equality filters of a query that returned nothing against
/// the catalog's stored values. A literal that differs from a stored
/// value only in case, aliasing, or spelling earns a hint naming the
/// stored value and suggesting a partial (LIKE) match.
fn empty_result_hint(sql: &str, catalog: &SemanticCatalog) -> Option<String> {
    let filter_re = Regex::new(r"([A-Za-z_][A-Za-z0-9_]*)\s*=\s*'([^']+)'").ok()?;
    for caps in filter_re.captures_iter(sql) {
        let column = caps[1].to_string();
        let literal = caps[2].to_string();
        let mut stored_exactly = false;
        let mut closest: Option<(f64, &str)> = None;
        for mapping in catalog.mappings() {
            if !mapping.column.eq_ignore_ascii_case(&column) {
                continue;
            }
            for value in &mapping.values {
                if value.canonical == literal {
                    stored_exactly = true;
                    continue;
                }
                let aliased = value.canonical.eq_ignore_ascii_case(&literal)
                    || value
                        .aliases
                        .iter()
                        .any(|a| a.eq_ignore_ascii_case(&literal));
                let score = if aliased {
                    1.0
                } else {
                    strsim::jaro_winkler(
                        &literal.to_lowercase(),
                        &value.canonical.to_lowercase(),
                    )
                };
                let better = closest.map(|(best, _)| score > best).unwrap_or(true);
                if score >= 0.85 && better {
                    closest = Some((score, value.canonical.as_str()));
                }
            }
        }
        if stored_exactly {
            continue;
        }
        if let Some((_, canonical)) = closest {
            return Some(format!(
                "The filter {column} = '{literal}' matched nothing; the stored value \
                 is '{canonical}'. A partial match such as {column} LIKE '%{literal}%' \
                 may find it."
            ));
        }
    }
    None
}

/// A result with no rows, or whose every value is NULL, reads as "no
/// data" to the person asking.
fn is_empty_or_null(result: &ExecutionResult) -> bool {
    result.rows.is_empty()
        || result
            .rows
            .iter()
            .all(|row| row.iter().all(|v| v.is_null()))
}
