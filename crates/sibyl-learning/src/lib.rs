//! Active-learning layer: the durable example store that feeds generation
//! with verified precedent and known mistakes, plus the embedding
//! providers used for retrieval.

pub mod embed;
pub mod store;

pub use embed::chain::FallbackChain;
pub use embed::tfidf::TfIdfEmbedder;
pub use store::{ExampleStore, StoreStats};
