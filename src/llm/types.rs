use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// How a generate call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// Natural end of generation with the full concatenated text.
    Completed(String),
    /// Stopped by `interrupt`. `partial` is what had streamed so far and is
    /// not an answer.
    Interrupted { partial: String },
}

impl GenerationOutcome {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, GenerationOutcome::Interrupted { .. })
    }
}
