//! The engine: wires catalog, resolution, generation, validation,
//! execution, and the example store into one request pipeline with a
//! bounded correction loop.

pub mod correction;
pub mod llm;
pub mod orchestrator;

pub use llm::{HttpCompletionModel, ScriptedModel};
pub use orchestrator::{PipelineStats, Sibyl};
