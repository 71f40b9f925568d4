//! Static validation of candidate queries.
//!
//! Pure checks run before anything touches the live store: parse, schema
//! compliance against the narrowed candidate set, read-only enforcement,
//! and non-fatal logic heuristics. The one permitted store interaction is
//! a non-mutating EXPLAIN dry run.

pub mod validator;

pub use validator::Validator;
