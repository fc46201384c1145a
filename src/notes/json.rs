use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{now_millis, Note, NoteDraft, NoteStore};
use crate::core::config::AppPaths;
use crate::core::errors::RagError;

/// All notes as one pretty-printed JSON array.
pub struct JsonNoteStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonNoteStore {
    pub fn new(paths: &AppPaths) -> Self {
        Self::with_path(paths.notes_path.clone())
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Vec<Note>, RagError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(RagError::storage(err)),
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw).map_err(|e| {
            RagError::Storage(format!("corrupt notes file {}: {}", self.path.display(), e))
        })
    }

    async fn write_all(&self, notes: &[Note]) -> Result<(), RagError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(RagError::storage)?;
        }
        let serialized = serde_json::to_string_pretty(notes).map_err(RagError::internal)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serialized)
            .await
            .map_err(RagError::storage)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(RagError::storage)
    }
}

#[async_trait]
impl NoteStore for JsonNoteStore {
    async fn list(&self) -> Result<Vec<Note>, RagError> {
        let mut notes = self.read_all().await?;
        notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(notes)
    }

    async fn get(&self, id: &str) -> Result<Note, RagError> {
        self.read_all()
            .await?
            .into_iter()
            .find(|note| note.id == id)
            .ok_or_else(|| RagError::NotFound(format!("note {}", id)))
    }

    async fn create(&self, draft: NoteDraft) -> Result<Note, RagError> {
        let _lock = self.write_lock.lock().await;
        let mut notes = self.read_all().await?;
        let note = Note::from_draft(Uuid::new_v4().to_string(), draft);
        notes.push(note.clone());
        self.write_all(&notes).await?;
        tracing::debug!("Created note {}", note.id);
        Ok(note)
    }

    async fn update(&self, id: &str, draft: NoteDraft) -> Result<Note, RagError> {
        let _lock = self.write_lock.lock().await;
        let mut notes = self.read_all().await?;
        let note = notes
            .iter_mut()
            .find(|note| note.id == id)
            .ok_or_else(|| RagError::NotFound(format!("note {}", id)))?;

        note.title = draft.title.trim().to_string();
        note.content = draft.content;
        note.image_uris = draft.image_uris;
        note.updated_at = now_millis().max(note.updated_at + 1);
        let updated = note.clone();

        self.write_all(&notes).await?;
        Ok(updated)
    }

    async fn delete(&self, id: &str) -> Result<bool, RagError> {
        let _lock = self.write_lock.lock().await;
        let mut notes = self.read_all().await?;
        let before = notes.len();
        notes.retain(|note| note.id != id);
        if notes.len() == before {
            return Ok(false);
        }
        self.write_all(&notes).await?;
        Ok(true)
    }

    async fn clear(&self) -> Result<(), RagError> {
        let _lock = self.write_lock.lock().await;
        self.write_all(&[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> JsonNoteStore {
        JsonNoteStore::with_path(dir.path().join("notes.json"))
    }

    #[tokio::test]
    async fn missing_file_is_an_empty_collection() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store(&dir).list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_trims_title_and_assigns_ids() {
        let dir = tempfile::tempdir().unwrap();
        let notes = store(&dir);

        let first = notes
            .create(NoteDraft::new("  Groceries ", "milk, eggs"))
            .await
            .unwrap();
        let second = notes.create(NoteDraft::new("Books", "Dune")).await.unwrap();

        assert_eq!(first.title, "Groceries");
        assert_ne!(first.id, second.id);
        assert!(Uuid::parse_str(&first.id).is_ok());
        assert_eq!(notes.get(&first.id).await.unwrap(), first);
    }

    #[tokio::test]
    async fn list_is_most_recent_first_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let notes = store(&dir);

        let old = notes.create(NoteDraft::new("Old", "a")).await.unwrap();
        let new = notes.create(NoteDraft::new("New", "b")).await.unwrap();
        let old = notes
            .update(&old.id, NoteDraft::new("Old", "edited"))
            .await
            .unwrap();
        assert!(old.updated_at >= new.updated_at);

        let reopened = store(&dir);
        let listed = reopened.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, old.id);
        assert_eq!(listed[0].content, "edited");
    }

    #[tokio::test]
    async fn update_and_get_of_unknown_note_are_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let notes = store(&dir);

        assert!(matches!(
            notes.get("nope").await,
            Err(RagError::NotFound(_))
        ));
        assert!(matches!(
            notes.update("nope", NoteDraft::default()).await,
            Err(RagError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_clear_empties() {
        let dir = tempfile::tempdir().unwrap();
        let notes = store(&dir);
        let note = notes.create(NoteDraft::new("t", "c")).await.unwrap();
        notes.create(NoteDraft::new("u", "d")).await.unwrap();

        assert!(notes.delete(&note.id).await.unwrap());
        assert!(!notes.delete(&note.id).await.unwrap());
        assert_eq!(notes.list().await.unwrap().len(), 1);

        notes.clear().await.unwrap();
        assert!(notes.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_format_uses_camel_case_fields() {
        let dir = tempfile::tempdir().unwrap();
        let notes = store(&dir);
        let mut draft = NoteDraft::new("Trip", "Lisbon");
        draft.image_uris.push("file:///photos/1.jpg".to_string());
        notes.create(draft).await.unwrap();

        let raw = std::fs::read_to_string(notes.path()).unwrap();
        assert!(raw.contains("\"imageUris\""));
        assert!(raw.contains("\"updatedAt\""));
    }
}
