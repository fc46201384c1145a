//! Retrieval-augmented generation helpers.
//!
//! - `Retriever`: similarity query against the note index with a relevance floor
//! - `PromptAssembler`: formats retrieved notes and the question into one prompt

mod prompt;
mod retriever;

pub use prompt::PromptAssembler;
pub use retriever::{Relevance, Retriever, DEFAULT_MIN_SIMILARITY};
