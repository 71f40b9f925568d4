//! The semantic catalog: four read-only JSON documents loaded once at
//! startup and assumed immutable for the process lifetime.
//!
//! A missing document yields an empty section, never an error; only a
//! present-but-malformed document fails the load.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use sibyl_core::constants::{
    BUSINESS_METRICS_FILE, DATA_DICTIONARY_FILE, ENTITY_MAPPINGS_FILE, JOIN_PATHS_FILE,
};
use sibyl_core::errors::CatalogError;
use sibyl_core::types::{ForeignKey, SchemaCandidate, SchemaColumn};

/// A named business metric with the tables it requires.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricDefinition {
    pub name: String,
    pub description: String,
    /// Optional canonical expression, quoted verbatim into prompts.
    pub expression: Option<String>,
    pub required_tables: Vec<String>,
}

/// One column of the data dictionary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnDefinition {
    pub data_type: String,
    pub description: String,
    /// Marked for entity resolution (holds a closed value set).
    pub categorical: bool,
}

/// One table of the data dictionary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TableDefinition {
    pub business_name: String,
    pub description: String,
    pub primary_key: Option<String>,
    /// BTreeMap keeps column order stable across loads.
    pub columns: BTreeMap<String, ColumnDefinition>,
}

/// A canonical stored value and its user-facing aliases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ValueAlias {
    pub canonical: String,
    pub aliases: Vec<String>,
}

/// The alias table for one categorical column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityMapping {
    pub table_id: String,
    pub column: String,
    pub values: Vec<ValueAlias>,
}

/// A vetted foreign-key relationship between two tables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinPath {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

#[derive(Debug, Default, Deserialize)]
struct MetricsDoc {
    #[serde(default)]
    business_metrics: BTreeMap<String, MetricDefinition>,
}

#[derive(Debug, Default, Deserialize)]
struct DictionaryDoc {
    #[serde(default)]
    data_dictionary: BTreeMap<String, TableDefinition>,
}

#[derive(Debug, Default, Deserialize)]
struct MappingsDoc {
    #[serde(default)]
    entity_mappings: Vec<EntityMapping>,
}

#[derive(Debug, Default, Deserialize)]
struct JoinsDoc {
    #[serde(default)]
    join_paths: Vec<JoinPath>,
}

/// Read-only view over the business definitions.
#[derive(Debug, Default)]
pub struct SemanticCatalog {
    metrics: BTreeMap<String, MetricDefinition>,
    tables: BTreeMap<String, TableDefinition>,
    mappings: Vec<EntityMapping>,
    join_paths: Vec<JoinPath>,
}

impl SemanticCatalog {
    /// Load the four documents from a directory.
    pub fn load(dir: &Path) -> Result<Self, CatalogError> {
        let metrics: MetricsDoc = load_doc(dir, BUSINESS_METRICS_FILE)?;
        let dictionary: DictionaryDoc = load_doc(dir, DATA_DICTIONARY_FILE)?;
        let mappings: MappingsDoc = load_doc(dir, ENTITY_MAPPINGS_FILE)?;
        let joins: JoinsDoc = load_doc(dir, JOIN_PATHS_FILE)?;

        debug!(
            tables = dictionary.data_dictionary.len(),
            metrics = metrics.business_metrics.len(),
            mappings = mappings.entity_mappings.len(),
            join_paths = joins.join_paths.len(),
            "semantic catalog loaded"
        );

        Ok(Self {
            metrics: metrics.business_metrics,
            tables: dictionary.data_dictionary,
            mappings: mappings.entity_mappings,
            join_paths: joins.join_paths,
        })
    }

    /// Build a catalog directly from parts. Used by tests and embedders
    /// that keep their definitions in code.
    pub fn from_parts(
        metrics: BTreeMap<String, MetricDefinition>,
        tables: BTreeMap<String, TableDefinition>,
        mappings: Vec<EntityMapping>,
        join_paths: Vec<JoinPath>,
    ) -> Self {
        Self {
            metrics,
            tables,
            mappings,
            join_paths,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table_ids(&self) -> impl Iterator<Item = &String> {
        self.tables.keys()
    }

    pub fn table(&self, table_id: &str) -> Option<&TableDefinition> {
        self.tables.get(table_id)
    }

    pub fn metrics(&self) -> &BTreeMap<String, MetricDefinition> {
        &self.metrics
    }

    pub fn mappings(&self) -> &[EntityMapping] {
        &self.mappings
    }

    /// Alias tables for a given table, across all its categorical columns.
    pub fn mappings_for_table(&self, table_id: &str) -> Vec<&EntityMapping> {
        self.mappings
            .iter()
            .filter(|m| m.table_id == table_id)
            .collect()
    }

    /// Tables reachable from `table_id` by one join-path hop.
    pub fn join_neighbors(&self, table_id: &str) -> Vec<&str> {
        let mut neighbors = Vec::new();
        for path in &self.join_paths {
            if path.from_table == table_id && !neighbors.contains(&path.to_table.as_str()) {
                neighbors.push(path.to_table.as_str());
            }
            if path.to_table == table_id && !neighbors.contains(&path.from_table.as_str()) {
                neighbors.push(path.from_table.as_str());
            }
        }
        neighbors
    }

    /// Hydrate a table id into the candidate shape the pipeline passes
    /// between stages. Foreign keys are derived from the join paths.
    pub fn candidate(&self, table_id: &str) -> Option<SchemaCandidate> {
        let def = self.tables.get(table_id)?;
        let columns = def
            .columns
            .iter()
            .map(|(name, col)| SchemaColumn {
                name: name.clone(),
                data_type: col.data_type.clone(),
                description: col.description.clone(),
            })
            .collect();
        let foreign_keys = self
            .join_paths
            .iter()
            .filter(|p| p.from_table == table_id)
            .map(|p| ForeignKey {
                column: p.from_column.clone(),
                references_table: p.to_table.clone(),
                references_column: p.to_column.clone(),
            })
            .collect();
        Some(SchemaCandidate {
            table_id: table_id.to_string(),
            columns,
            description: def.description.clone(),
            primary_key: def.primary_key.clone(),
            foreign_keys,
        })
    }
}

fn load_doc<T: Default + for<'de> Deserialize<'de>>(
    dir: &Path,
    file: &str,
) -> Result<T, CatalogError> {
    let path = dir.join(file);
    if !path.exists() {
        warn!(file, "catalog document missing, section left empty");
        return Ok(T::default());
    }
    let raw = std::fs::read_to_string(&path).map_err(|e| CatalogError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|e| CatalogError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}
