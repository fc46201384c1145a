pub mod core;
pub mod embedding;
pub mod llm;
pub mod model_server;
pub mod notes;
pub mod rag;
pub mod service;
pub mod speech;
pub mod store;
pub mod vector_math;

#[cfg(test)]
mod testing;

pub use crate::core::errors::RagError;
pub use service::{GenerateOutcome, RagService};
