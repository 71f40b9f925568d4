//! Query generation: renders plan, schema, and resolved entities into a
//! prompt (retrieved precedent first), calls the language model, and
//! deterministically extracts a bare SQL candidate from the output.

pub mod extract;
pub mod generator;
pub mod prompt;

pub use generator::QueryGenerator;
