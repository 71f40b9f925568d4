//! Request decomposition: an LLM turns a request into an ordered plan of
//! logical sub-steps, biased by a small fixed set of worked examples.
//!
//! The decomposer never fails outright: any model error, malformed JSON,
//! or invariant violation collapses to a single-step plan covering the
//! whole request.

use tracing::{debug, warn};

use sibyl_catalog::SemanticCatalog;
use sibyl_core::config::DecomposerConfig;
use sibyl_core::traits::ILanguageModel;
use sibyl_core::types::QueryPlan;

/// Worked examples embedded in every decomposition prompt. They bias the
/// plan structure; the model is told not to copy them verbatim.
const WORKED_EXAMPLES: &str = r#"Example 1:
Q: "Show me monthly revenue trends"
A: {"steps": [
  {"id": 1, "description": "Group sales by month"},
  {"id": 2, "description": "Sum revenue per month", "depends_on": [1]},
  {"id": 3, "description": "Order chronologically", "depends_on": [2]}
]}

Example 2:
Q: "Compare Q1 and Q2 revenue"
A: {"steps": [
  {"id": 1, "description": "Calculate Q1 total revenue"},
  {"id": 2, "description": "Calculate Q2 total revenue"},
  {"id": 3, "description": "Calculate growth: (Q2 - Q1) / Q1", "depends_on": [1, 2]}
]}

Example 3:
Q: "How many open demands are there?"
A: {"steps": [
  {"id": 1, "description": "Count demands with open status"}
]}"#;

pub struct Decomposer<'a> {
    llm: &'a dyn ILanguageModel,
    config: &'a DecomposerConfig,
}

impl<'a> Decomposer<'a> {
    pub fn new(llm: &'a dyn ILanguageModel, config: &'a DecomposerConfig) -> Self {
        Self { llm, config }
    }

    /// Decompose a request into a plan. Single-fact requests produce a
    /// single step; comparative requests produce one step per quantity
    /// plus a combination step depending on them.
    pub async fn decompose(&self, request: &str, catalog: &SemanticCatalog) -> QueryPlan {
        let prompt = self.build_prompt(request, catalog);
        let raw = match self
            .llm
            .complete(&prompt, self.config.temperature, self.config.max_tokens)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "decomposition call failed, using single-step plan");
                return QueryPlan::single_step(request);
            }
        };

        match parse_plan(&raw) {
            Some(plan) if plan.is_well_formed() => {
                debug!(steps = plan.steps.len(), "request decomposed");
                plan
            }
            Some(_) => {
                warn!("decomposed plan violated step invariants, using single-step plan");
                QueryPlan::single_step(request)
            }
            None => {
                warn!("decomposition output was not a parsable plan, using single-step plan");
                QueryPlan::single_step(request)
            }
        }
    }

    fn build_prompt(&self, request: &str, catalog: &SemanticCatalog) -> String {
        let metrics = serde_json::to_string_pretty(catalog.metrics()).unwrap_or_default();
        format!(
            "You are a query planner. Decompose natural language business questions \
             into logical steps.\n\n\
             ## Business Metrics Available\n{metrics}\n\n\
             ## Worked Examples (structure guides, do not copy verbatim)\n\
             {WORKED_EXAMPLES}\n\n\
             ## Your Task\n\
             Decompose this request: \"{request}\"\n\n\
             Return ONLY a JSON object with a \"steps\" array. Each step has a \
             numeric \"id\", a \"description\", and an optional \"depends_on\" array \
             referencing earlier step ids."
        )
    }
}

/// Parse the model output into a plan, tolerating markdown fences and
/// surrounding prose.
fn parse_plan(raw: &str) -> Option<QueryPlan> {
    let trimmed = strip_fences(raw);
    // The model sometimes wraps the object in prose; cut to the outermost
    // braces before parsing.
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
    {
        return rest.strip_suffix("```").unwrap_or(rest).trim();
    }
    trimmed
}
