//! End-to-end pipeline tests over a scripted model and an in-memory
//! SQLite backend.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use sibyl_catalog::{ColumnDefinition, EntityMapping, SemanticCatalog, TableDefinition, ValueAlias};
use sibyl_core::config::SibylConfig;
use sibyl_core::errors::{BackendError, ErrorCategory};
use sibyl_core::traits::{IQueryBackend, QueryRows};
use sibyl_engine::{ScriptedModel, Sibyl};
use sibyl_execution::SqliteBackend;
use sibyl_learning::{ExampleStore, TfIdfEmbedder};

fn catalog() -> SemanticCatalog {
    let mut columns = BTreeMap::new();
    columns.insert(
        "id".to_string(),
        ColumnDefinition {
            data_type: "integer".to_string(),
            description: "row id".to_string(),
            categorical: false,
        },
    );
    columns.insert(
        "region".to_string(),
        ColumnDefinition {
            data_type: "text".to_string(),
            description: "sales region".to_string(),
            categorical: true,
        },
    );
    columns.insert(
        "revenue".to_string(),
        ColumnDefinition {
            data_type: "real".to_string(),
            description: "gross revenue".to_string(),
            categorical: false,
        },
    );

    let mut tables = BTreeMap::new();
    tables.insert(
        "sales".to_string(),
        TableDefinition {
            business_name: "Sales".to_string(),
            description: "Recorded sales by region".to_string(),
            primary_key: Some("id".to_string()),
            columns,
        },
    );

    let mappings = vec![EntityMapping {
        table_id: "sales".to_string(),
        column: "region".to_string(),
        values: vec![ValueAlias {
            canonical: "North America".to_string(),
            aliases: vec!["na".to_string()],
        }],
    }];

    SemanticCatalog::from_parts(BTreeMap::new(), tables, mappings, Vec::new())
}

fn seeded_backend() -> Arc<SqliteBackend> {
    let backend = SqliteBackend::open_in_memory().unwrap();
    backend
        .seed(
            "CREATE TABLE sales (id INTEGER PRIMARY KEY, region TEXT, revenue REAL);
             INSERT INTO sales VALUES (1, 'North America', 120.0);
             INSERT INTO sales VALUES (2, 'Europe', 80.0);",
        )
        .unwrap();
    Arc::new(backend)
}

fn engine(
    model: ScriptedModel,
    backend: Arc<dyn IQueryBackend>,
) -> (Arc<Sibyl>, Arc<ExampleStore>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let config = SibylConfig::default();
    let store = Arc::new(ExampleStore::in_memory().unwrap());
    let embedder = Arc::new(TfIdfEmbedder::new(&config.embedding));
    let sibyl = Sibyl::new(
        config,
        catalog(),
        Arc::new(model),
        backend,
        embedder,
        Arc::clone(&store),
    )
    .unwrap();
    (Arc::new(sibyl), store)
}

/// Backend that never finishes in time.
struct TimeoutBackend;

#[async_trait]
impl IQueryBackend for TimeoutBackend {
    async fn explain(&self, _query: &str) -> Result<(), BackendError> {
        Ok(())
    }

    async fn execute(
        &self,
        _query: &str,
        deadline: Duration,
    ) -> Result<QueryRows, BackendError> {
        Err(BackendError::Timeout {
            elapsed_ms: deadline.as_millis() as u64,
        })
    }
}

#[tokio::test]
async fn happy_path_returns_rows_and_narrative() {
    // Script order: decomposition (junk, falls back to a single-step
    // plan), generation, narrative.
    let model = ScriptedModel::new(vec![
        "not a plan",
        "SELECT region, revenue FROM sales ORDER BY region",
        "Europe trails North America in revenue.",
    ]);
    let (engine, _store) = engine(model, seeded_backend());

    let response = engine.process("total revenue by region", None).await;
    assert!(response.success, "error: {:?}", response.error);
    assert_eq!(response.attempts, 1);
    assert_eq!(response.column_names, vec!["region", "revenue"]);
    assert_eq!(response.rows.len(), 2);
    assert_eq!(response.tables_considered, vec!["sales"]);
    assert_eq!(
        response.narrative.as_deref(),
        Some("Europe trails North America in revenue.")
    );
    assert!(!response.from_cache);
}

#[tokio::test]
async fn equivalent_requests_hit_the_cache() {
    let model = ScriptedModel::new(vec![
        "not a plan",
        "SELECT region, revenue FROM sales",
        "Two regions.",
    ]);
    let (engine, _store) = engine(model, seeded_backend());

    let first = engine.process("total revenue by region", None).await;
    assert!(first.success);

    // Case and whitespace differences normalize to the same fingerprint.
    // The script is exhausted, so any second pipeline run would fail.
    let second = engine.process("  Total   REVENUE by region ", None).await;
    assert!(second.success);
    assert!(second.from_cache);
    assert_eq!(second.query, first.query);
}

#[tokio::test]
async fn schema_miss_is_corrected_within_budget() {
    // First candidate names a column that does not exist; the validator
    // catches it and the targeted repair fixes it without another model
    // call.
    let model = ScriptedModel::new(vec![
        "not a plan",
        "SELECT revenu FROM sales",
        "Revenue listed.",
    ]);
    let (engine, _store) = engine(model, seeded_backend());

    let response = engine.process("list revenue", None).await;
    assert!(response.success, "error: {:?}", response.error);
    assert_eq!(response.attempts, 2);
    assert_eq!(response.query.as_deref(), Some("SELECT revenue FROM sales"));
}

/// Backend that only answers queries carrying an explicit row limit.
struct LimitOnlyBackend;

#[async_trait]
impl IQueryBackend for LimitOnlyBackend {
    async fn explain(&self, _query: &str) -> Result<(), BackendError> {
        Ok(())
    }

    async fn execute(
        &self,
        query: &str,
        deadline: Duration,
    ) -> Result<QueryRows, BackendError> {
        if query.contains("LIMIT") {
            Ok(QueryRows {
                column_names: vec!["region".to_string()],
                rows: vec![vec![serde_json::json!("North America")]],
            })
        } else {
            Err(BackendError::Timeout {
                elapsed_ms: deadline.as_millis() as u64,
            })
        }
    }
}

#[tokio::test]
async fn timeout_is_corrected_with_a_row_limit_on_the_second_attempt() {
    // Script order: decomposition, generation (times out), timeout
    // rewrite (succeeds), narrative.
    let model = ScriptedModel::new(vec![
        "not a plan",
        "SELECT region FROM sales",
        "SELECT region FROM sales LIMIT 10",
        "One region shown.",
    ]);
    let (engine, store) = engine(model, Arc::new(LimitOnlyBackend));

    let response = engine.process("every region", None).await;
    assert!(response.success, "error: {:?}", response.error);
    assert_eq!(response.attempts, 2);
    assert_eq!(
        response.query.as_deref(),
        Some("SELECT region FROM sales LIMIT 10")
    );
    assert!(store.pending_failures().unwrap().is_empty());
}

#[tokio::test]
async fn prose_completion_fails_terminally_without_a_retry() {
    // The model declines instead of writing SQL. That leaves nothing to
    // validate or repair, so no further attempt is made: the third
    // scripted entry would succeed if one were, and it must stay unused.
    let model = ScriptedModel::new(vec![
        "not a plan",
        "I cannot answer that with the tables available.",
        "SELECT region FROM sales",
    ]);
    let (engine, store) = engine(model, seeded_backend());

    let response = engine.process("something unanswerable about sales", None).await;
    assert!(!response.success);
    assert_eq!(response.attempts, 1);
    assert!(response.query.is_none());
    assert!(response.error.is_some());

    let failures = store.pending_failures().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].attempts, 1);
}

#[tokio::test]
async fn timeout_exhausts_the_budget_and_logs_a_failure() {
    // Script order: decomposition, generation, timeout rewrite. Both
    // executions time out; the budget (2) is exhausted.
    let model = ScriptedModel::new(vec![
        "not a plan",
        "SELECT region FROM sales",
        "SELECT region FROM sales LIMIT 10",
    ]);
    let (engine, store) = engine(model, Arc::new(TimeoutBackend));

    let response = engine.process("every region ever", None).await;
    assert!(!response.success);
    assert_eq!(response.attempts, 2);
    assert_eq!(response.category, Some(ErrorCategory::Timeout));
    assert_eq!(
        response.query.as_deref(),
        Some("SELECT region FROM sales LIMIT 10")
    );
    assert!(response.suggestion.is_some());

    let failures = store.pending_failures().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].attempts, 2);
    assert_eq!(failures[0].error_category, ErrorCategory::Timeout);
}

#[tokio::test]
async fn concurrent_identical_requests_run_the_pipeline_once() {
    // Exactly one pipeline's worth of scripted responses: a second run
    // would exhaust the script and fail.
    let model = ScriptedModel::new(vec![
        "not a plan",
        "SELECT region, revenue FROM sales",
        "Two regions.",
    ]);
    let (engine, _store) = engine(model, seeded_backend());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine.process("total revenue by region", None).await
        }));
    }

    let mut fresh = 0;
    for handle in handles {
        let response = handle.await.unwrap();
        assert!(response.success, "error: {:?}", response.error);
        if !response.from_cache {
            fresh += 1;
        }
    }
    assert_eq!(fresh, 1);
}

#[tokio::test]
async fn record_outcome_is_idempotent() {
    let model = ScriptedModel::new(vec![]);
    let (engine, _store) = engine(model, seeded_backend());

    let inserted = engine
        .record_outcome(
            "total revenue by region",
            "SELECT region, sum(revenue) FROM sales GROUP BY region",
            true,
            None,
        )
        .unwrap();
    assert!(inserted);

    let inserted_again = engine
        .record_outcome(
            "total revenue by region",
            "SELECT region, sum(revenue) FROM sales GROUP BY region",
            true,
            None,
        )
        .unwrap();
    assert!(!inserted_again);
    assert_eq!(engine.stats().unwrap().verified_examples, 1);
}

#[tokio::test]
async fn human_correction_becomes_a_verified_example_immediately() {
    let model = ScriptedModel::new(vec![]);
    let (engine, _store) = engine(model, seeded_backend());

    engine
        .record_outcome(
            "revenue split",
            "SELECT revenu FROM sales",
            false,
            Some("SELECT region, revenue FROM sales"),
        )
        .unwrap();
    assert_eq!(engine.stats().unwrap().verified_examples, 1);
}

#[tokio::test]
async fn resolved_failures_are_promoted_exactly_once() {
    let model = ScriptedModel::new(vec![
        "not a plan",
        "SELECT region FROM sales",
        "SELECT region FROM sales LIMIT 10",
    ]);
    let (engine, store) = engine(model, Arc::new(TimeoutBackend));

    let response = engine.process("every region ever", None).await;
    assert!(!response.success);

    let failures = store.pending_failures().unwrap();
    store
        .resolve_failure(&failures[0].id, "SELECT DISTINCT region FROM sales")
        .unwrap();

    assert_eq!(engine.reconcile_examples().unwrap(), 1);
    assert_eq!(engine.reconcile_examples().unwrap(), 0);
    assert_eq!(engine.stats().unwrap().verified_examples, 1);
}

#[tokio::test]
async fn empty_result_gets_the_static_narrative() {
    let model = ScriptedModel::new(vec![
        "not a plan",
        "SELECT region FROM sales WHERE revenue > 1000000",
    ]);
    let (engine, _store) = engine(model, seeded_backend());

    let response = engine.process("regions over a million", None).await;
    assert!(response.success, "error: {:?}", response.error);
    assert!(response.rows.is_empty());
    assert_eq!(
        response.narrative.as_deref(),
        Some("The query ran successfully but returned no data.")
    );
}

#[tokio::test]
async fn empty_result_from_a_near_miss_filter_is_diagnosed() {
    // SQLite compares 'north america' to the stored 'North America'
    // case-sensitively, so the query runs clean but matches nothing.
    let model = ScriptedModel::new(vec![
        "not a plan",
        "SELECT revenue FROM sales WHERE region = 'north america'",
    ]);
    let (engine, _store) = engine(model, seeded_backend());

    let response = engine.process("revenue for north america", None).await;
    assert!(response.success, "error: {:?}", response.error);
    assert!(response.rows.is_empty());

    let narrative = response.narrative.unwrap();
    assert!(narrative.contains("returned no data"));
    assert!(narrative.contains("'North America'"));
    assert!(narrative.contains("LIKE"));
}
