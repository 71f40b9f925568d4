//! Bounded self-correction.
//!
//! Every failed attempt is classified into a closed error category, and
//! the reviser picks the cheapest repair that fits: identifier
//! substitution for schema misses, deterministic cleanup for syntax
//! damage, and a model-assisted rewrite for everything else. The loop
//! never exceeds the configured attempt budget; the orchestrator owns
//! that counter.

use regex::Regex;
use tracing::{debug, warn};

use sibyl_core::config::CorrectionConfig;
use sibyl_core::errors::{ErrorCategory, GenerationError, SibylError, SibylResult};
use sibyl_core::traits::ILanguageModel;
use sibyl_core::types::{CandidateQuery, SchemaCandidate};
use sibyl_generation::{extract, prompt};

/// Lifecycle of one attempt within a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Generated,
    Validating,
    Validated,
    Executing,
    Succeeded,
    Correcting,
    Failed,
}

/// Audit record of one attempt. Attempts are numbered and retained,
/// never overwritten.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub number: u32,
    pub query: String,
    pub state: AttemptState,
    pub error: Option<String>,
    pub category: Option<ErrorCategory>,
}

pub struct CorrectionLoop<'a> {
    llm: &'a dyn ILanguageModel,
    config: &'a CorrectionConfig,
}

impl<'a> CorrectionLoop<'a> {
    pub fn new(llm: &'a dyn ILanguageModel, config: &'a CorrectionConfig) -> Self {
        Self { llm, config }
    }

    /// Total attempts allowed per request, initial generation included.
    pub fn budget(&self) -> u32 {
        self.config.retry_budget
    }

    /// Produce the next candidate from a failed one.
    ///
    /// Schema misses try a targeted identifier substitution before
    /// falling back to the model; timeouts always go to the model with a
    /// narrowing instruction, since re-running the same shape would just
    /// time out again.
    pub async fn revise(
        &self,
        failed: &CandidateQuery,
        category: ErrorCategory,
        error: &str,
        schema: &[SchemaCandidate],
    ) -> SibylResult<CandidateQuery> {
        let attempt = failed.attempt + 1;

        match category {
            ErrorCategory::ColumnNotFound => {
                let columns = schema
                    .iter()
                    .flat_map(|c| c.columns.iter().map(|col| col.name.as_str()));
                if let Some(repaired) = substitute_identifier(&failed.text, error, columns) {
                    debug!(attempt, "applied targeted column substitution");
                    return Ok(renumbered(failed, repaired, attempt));
                }
                self.model_rewrite(failed, category, error, schema, attempt)
                    .await
            }
            ErrorCategory::TableNotFound => {
                let tables = schema.iter().map(|c| c.table_id.as_str());
                if let Some(repaired) = substitute_identifier(&failed.text, error, tables) {
                    debug!(attempt, "applied targeted table substitution");
                    return Ok(renumbered(failed, repaired, attempt));
                }
                self.model_rewrite(failed, category, error, schema, attempt)
                    .await
            }
            ErrorCategory::SyntaxError => {
                // Damage is often residue the extractor can strip.
                if let Some(cleaned) = extract::extract_sql(&failed.text) {
                    if cleaned != failed.text && extract::is_read_only(&cleaned) {
                        debug!(attempt, "applied deterministic syntax cleanup");
                        return Ok(renumbered(failed, cleaned, attempt));
                    }
                }
                self.model_rewrite(failed, category, error, schema, attempt)
                    .await
            }
            ErrorCategory::Timeout | ErrorCategory::Unknown => {
                self.model_rewrite(failed, category, error, schema, attempt)
                    .await
            }
        }
    }

    async fn model_rewrite(
        &self,
        failed: &CandidateQuery,
        category: ErrorCategory,
        error: &str,
        schema: &[SchemaCandidate],
        attempt: u32,
    ) -> SibylResult<CandidateQuery> {
        let mut text = String::new();
        text.push_str("# Task: Fix a failed SQL query\n\n## Schema\n");
        text.push_str(&prompt::schema_block(schema));
        text.push_str(&format!(
            "## Failed Query\n{}\n\n## Error\n{}\n\n## Rules\n\
             - Use ONLY tables and columns listed in the schema above.\n\
             - Read-only: a single SELECT (or WITH...SELECT) statement.\n\
             - Output only the corrected SQL, no markdown fences, no explanation.\n",
            failed.text, error
        ));
        if category == ErrorCategory::Timeout {
            text.push_str("- The query exceeded its deadline. Rewrite it to scan less data and add a LIMIT clause.\n");
        }

        warn!(attempt, category = %category, "falling back to model rewrite");
        let raw = self
            .llm
            .complete(&text, self.config.temperature, self.config.max_tokens)
            .await
            .map_err(GenerationError::Llm)?;

        let sql = extract::extract_sql(&raw)
            .ok_or(SibylError::Generation(GenerationError::EmptyCompletion))?;
        if !extract::is_read_only(&sql) {
            return Err(SibylError::Generation(GenerationError::NotReadOnly {
                statement: sql,
            }));
        }
        Ok(renumbered(failed, sql, attempt))
    }
}

fn renumbered(failed: &CandidateQuery, text: String, attempt: u32) -> CandidateQuery {
    CandidateQuery {
        text,
        attempt,
        schema_refs: failed.schema_refs.clone(),
        entity_refs: failed.entity_refs.clone(),
    }
}

/// Pull the offending identifier out of an error message. Handles the
/// SQLite (`no such column: revenu`), validator (`SchemaViolation:
/// column revenu`), and Postgres (`column "revenu" does not exist`)
/// phrasings.
fn missing_identifier(error: &str) -> Option<String> {
    if let Some(start) = error.find('"') {
        if let Some(len) = error[start + 1..].find('"') {
            let quoted = &error[start + 1..start + 1 + len];
            if !quoted.is_empty() {
                return Some(quoted.to_string());
            }
        }
    }
    let tail = error.rsplit(':').next()?.trim();
    let tail = tail.strip_prefix("column ").unwrap_or(tail);
    let token = tail.split_whitespace().next()?;
    let cleaned: String = token
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '_')
        .to_string();
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Replace the missing identifier with its nearest valid counterpart,
/// whole-word, case-insensitive. Returns `None` when no option is close
/// enough to substitute with confidence.
fn substitute_identifier<'x>(
    sql: &str,
    error: &str,
    options: impl Iterator<Item = &'x str>,
) -> Option<String> {
    let bad = missing_identifier(error)?;
    let bad_lower = bad.to_lowercase();
    let (score, nearest) = options
        .map(|o| (strsim::jaro_winkler(&bad_lower, &o.to_lowercase()), o))
        .max_by(|a, b| a.0.total_cmp(&b.0))?;
    if score < 0.8 || nearest.eq_ignore_ascii_case(&bad) {
        return None;
    }

    let re = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(&bad))).ok()?;
    Some(re.replace_all(sql, nearest).into_owned())
}
