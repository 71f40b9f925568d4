//! Generation prompt assembly.
//!
//! Ordering contract: retrieved few-shot precedent comes FIRST, before the
//! task description and generic rules, so that when a stored example and a
//! generic instruction conflict, the specific precedent dominates. This
//! strict prioritization is deliberate, not incidental formatting.

use sibyl_catalog::SemanticCatalog;
use sibyl_core::types::{
    EntityResolution, FailureRecord, FewShotExample, QueryPlan, SchemaCandidate,
};

/// Render the schema candidates into the block shared by generation and
/// correction prompts.
pub fn schema_block(candidates: &[SchemaCandidate]) -> String {
    let mut out = String::new();
    for table in candidates {
        out.push_str(&format!("Table: {}\n", table.table_id));
        if !table.description.is_empty() {
            out.push_str(&format!("Description: {}\n", table.description));
        }
        if let Some(pk) = &table.primary_key {
            out.push_str(&format!("Primary key: {pk}\n"));
        }
        out.push_str("Columns:\n");
        for col in &table.columns {
            if col.description.is_empty() {
                out.push_str(&format!("  - {} ({})\n", col.name, col.data_type));
            } else {
                out.push_str(&format!(
                    "  - {} ({}): {}\n",
                    col.name, col.data_type, col.description
                ));
            }
        }
        for fk in &table.foreign_keys {
            out.push_str(&format!(
                "Join: {}.{} -> {}.{}\n",
                table.table_id, fk.column, fk.references_table, fk.references_column
            ));
        }
        out.push('\n');
    }
    out
}

/// Build the full generation prompt.
#[allow(clippy::too_many_arguments)]
pub fn generation_prompt(
    request: &str,
    plan: &QueryPlan,
    candidates: &[SchemaCandidate],
    entities: &[EntityResolution],
    catalog: &SemanticCatalog,
    examples: &[FewShotExample],
    failures: &[FailureRecord],
    dialect: &str,
) -> String {
    let mut prompt = String::new();

    // Precedent first. These outrank everything below when they conflict.
    if !examples.is_empty() {
        prompt.push_str(
            "## Verified Examples (follow these patterns; they take precedence over \
             the general rules below)\n",
        );
        for ex in examples {
            prompt.push_str(&format!("Q: {}\nSQL: {}\n\n", ex.request_text, ex.query_text));
        }
    }
    if !failures.is_empty() {
        prompt.push_str("## Known Mistakes (avoid these patterns)\n");
        for f in failures {
            prompt.push_str(&format!(
                "Q: {}\nBAD SQL: {}\nFailure: {}\n\n",
                f.request_text,
                f.last_candidate,
                f.error_category.as_str()
            ));
        }
    }

    prompt.push_str(&format!("# Task: Generate a {dialect} query\n\n"));

    let metrics = catalog.metrics();
    if !metrics.is_empty() {
        prompt.push_str("## Business Metrics\n");
        prompt.push_str(&serde_json::to_string_pretty(metrics).unwrap_or_default());
        prompt.push_str("\n\n");
    }

    prompt.push_str("## Schema\n");
    prompt.push_str(&schema_block(candidates));

    if !entities.is_empty() {
        prompt.push_str("## Resolved Values (use these exact values in WHERE clauses)\n");
        for e in entities {
            prompt.push_str(&format!(
                "  - {}.{} = '{}' (from \"{}\")\n",
                e.table_id, e.column_id, e.canonical_value, e.source_phrase
            ));
        }
        prompt.push('\n');
    }

    if plan.steps.len() > 1 {
        prompt.push_str("## Decomposition Plan\n");
        for step in &plan.steps {
            if step.depends_on.is_empty() {
                prompt.push_str(&format!("  {}. {}\n", step.id, step.description));
            } else {
                prompt.push_str(&format!(
                    "  {}. {} (uses results of {:?})\n",
                    step.id, step.description, step.depends_on
                ));
            }
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!(
        "## Request\n\"{request}\"\n\n\
         ## Rules\n\
         - Use ONLY tables and columns listed in the schema above.\n\
         - Read-only: a single SELECT (or WITH...SELECT) statement.\n\
         - Apply the resolved values exactly as given.\n\
         - {dialect} syntax.\n\
         - Output only the SQL, no markdown fences, no explanation.\n"
    ));

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sibyl_core::errors::ErrorCategory;
    use sibyl_core::types::{FailureStatus, SchemaColumn};

    fn example(request: &str, sql: &str) -> FewShotExample {
        FewShotExample {
            id: "x".to_string(),
            request_text: request.to_string(),
            query_text: sql.to_string(),
            embedding: Vec::new(),
            tags: Vec::new(),
            verified: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn examples_come_before_the_task() {
        let prompt = generation_prompt(
            "how many open demands",
            &QueryPlan::single_step("count"),
            &[],
            &[],
            &SemanticCatalog::default(),
            &[example(
                "how many demands",
                "SELECT COUNT(*) FROM demands",
            )],
            &[],
            "SQLite",
        );
        let examples_at = prompt.find("## Verified Examples").unwrap();
        let task_at = prompt.find("# Task").unwrap();
        let rules_at = prompt.find("## Rules").unwrap();
        assert!(examples_at < task_at);
        assert!(task_at < rules_at);
    }

    #[test]
    fn failures_render_as_anti_patterns() {
        let failure = FailureRecord {
            id: "f".to_string(),
            request_text: "revenue by quarter".to_string(),
            last_candidate: "SELECT revenu FROM sales".to_string(),
            error_category: ErrorCategory::ColumnNotFound,
            attempts: 2,
            status: FailureStatus::Pending,
            correction: None,
            created_at: Utc::now(),
        };
        let prompt = generation_prompt(
            "revenue by quarter",
            &QueryPlan::single_step("x"),
            &[],
            &[],
            &SemanticCatalog::default(),
            &[],
            &[failure],
            "SQLite",
        );
        assert!(prompt.contains("Known Mistakes"));
        assert!(prompt.contains("SELECT revenu FROM sales"));
    }

    #[test]
    fn schema_block_lists_columns_and_joins() {
        let candidate = SchemaCandidate {
            table_id: "demands".to_string(),
            columns: vec![SchemaColumn {
                name: "status".to_string(),
                data_type: "text".to_string(),
                description: "lifecycle state".to_string(),
            }],
            description: "Staffing demands".to_string(),
            primary_key: Some("id".to_string()),
            foreign_keys: vec![sibyl_core::types::ForeignKey {
                column: "account_id".to_string(),
                references_table: "accounts".to_string(),
                references_column: "id".to_string(),
            }],
        };
        let block = schema_block(&[candidate]);
        assert!(block.contains("Table: demands"));
        assert!(block.contains("status (text): lifecycle state"));
        assert!(block.contains("demands.account_id -> accounts.id"));
    }
}
