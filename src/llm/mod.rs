pub mod engine;
pub mod llama_server;
pub mod provider;
pub mod types;

pub use engine::{EngineState, GenerationEngine, TokenStream};
pub use llama_server::{LlamaServerBackend, LlamaServerEmbedder};
pub use provider::GenerationBackend;
pub use types::{GenerationOutcome, Message, Role};
