//! Embedding providers for retrieval.

pub mod chain;
pub mod tfidf;
