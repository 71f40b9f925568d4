//! Semantic catalog: read-only business definitions (data dictionary,
//! metrics, entity aliases, join paths) plus the schema narrower that
//! turns a request into a small candidate table set.

pub mod catalog;
pub mod narrower;

pub use catalog::{
    ColumnDefinition, EntityMapping, JoinPath, MetricDefinition, SemanticCatalog,
    TableDefinition, ValueAlias,
};
pub use narrower::SchemaNarrower;
