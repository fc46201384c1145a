//! User notes and their persistence.

mod json;
mod library;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::errors::RagError;

pub use json::JsonNoteStore;
pub use library::{NoteHit, NoteLibrary};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub title: String,
    pub content: String,
    /// Attachment URIs, carried as-is.
    #[serde(default)]
    pub image_uris: Vec<String>,
    /// Milliseconds since the Unix epoch.
    pub updated_at: i64,
}

/// User-editable fields of a note.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteDraft {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub image_uris: Vec<String>,
}

impl NoteDraft {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            image_uris: Vec::new(),
        }
    }
}

impl Note {
    pub(crate) fn from_draft(id: String, draft: NoteDraft) -> Self {
        Self {
            id,
            title: draft.title.trim().to_string(),
            content: draft.content,
            image_uris: draft.image_uris,
            updated_at: now_millis(),
        }
    }
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Every note, most recently updated first.
    async fn list(&self) -> Result<Vec<Note>, RagError>;

    async fn get(&self, id: &str) -> Result<Note, RagError>;

    /// Stores a new note under a fresh UUID.
    async fn create(&self, draft: NoteDraft) -> Result<Note, RagError>;

    async fn update(&self, id: &str, draft: NoteDraft) -> Result<Note, RagError>;

    /// Returns whether the note existed.
    async fn delete(&self, id: &str) -> Result<bool, RagError>;

    async fn clear(&self) -> Result<(), RagError>;
}
