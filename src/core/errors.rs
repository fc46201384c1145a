use thiserror::Error;

/// Model-backed component that owns a load lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Embedding,
    Generation,
    Transcription,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Embedding => "embedding",
            Component::Generation => "generation",
            Component::Transcription => "transcription",
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("failed to load {component} model: {message}")]
    Load {
        component: Component,
        message: String,
    },
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("a generation is already in progress")]
    ConcurrentGeneration,
    #[error("{0} is not ready")]
    NotReady(Component),
    #[error("a transcription session is already active")]
    TranscriptionBusy,
    #[error("transcription failed: {0}")]
    Transcription(String),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RagError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        RagError::Internal(err.to_string())
    }

    pub fn storage<E: std::fmt::Display>(err: E) -> Self {
        RagError::Storage(err.to_string())
    }

    pub fn load<E: std::fmt::Display>(component: Component, err: E) -> Self {
        RagError::Load {
            component,
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_error_names_the_component() {
        let err = RagError::load(Component::Transcription, "weights missing");
        assert_eq!(
            err.to_string(),
            "failed to load transcription model: weights missing"
        );
    }

    #[test]
    fn not_ready_mentions_component() {
        assert_eq!(
            RagError::NotReady(Component::Generation).to_string(),
            "generation is not ready"
        );
    }
}
