//! Execution layer: runs validated candidates under a deadline against an
//! opaque query backend, and memoizes full pipeline responses in a
//! TTL-bounded, single-flight artifact cache.

pub mod backend;
pub mod cache;
pub mod executor;

pub use backend::sqlite::SqliteBackend;
pub use cache::ArtifactCache;
pub use executor::Executor;
