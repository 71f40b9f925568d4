/// Sibyl system version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum number of statements accepted in a single candidate query.
pub const MAX_STATEMENTS_PER_CANDIDATE: usize = 1;

/// Maximum n-gram length considered during entity phrase extraction.
pub const MAX_ENTITY_NGRAM: usize = 4;

/// Maximum number of plan steps accepted from the decomposer before the
/// plan is collapsed to a single step.
pub const MAX_PLAN_STEPS: usize = 12;

/// Filenames of the four semantic-layer documents.
pub const BUSINESS_METRICS_FILE: &str = "business_metrics.json";
pub const DATA_DICTIONARY_FILE: &str = "data_dictionary.json";
pub const ENTITY_MAPPINGS_FILE: &str = "entity_mappings.json";
pub const JOIN_PATHS_FILE: &str = "join_paths.json";
