//! Request interpretation: mapping fuzzy phrases to canonical stored
//! values, and decomposing multi-part requests into ordered plans.

pub mod decomposer;
pub mod resolver;

pub use decomposer::Decomposer;
pub use resolver::EntityResolver;
