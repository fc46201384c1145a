//! Keeps the vector index in step with the note store.

use std::sync::Arc;

use serde::Serialize;

use super::{Note, NoteDraft, NoteStore};
use crate::core::errors::RagError;
use crate::store::{NoteMetadata, VectorStore};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteHit {
    pub note: Note,
    pub similarity: f32,
}

#[derive(Clone)]
pub struct NoteLibrary {
    notes: Arc<dyn NoteStore>,
    vectors: Arc<dyn VectorStore>,
}

impl NoteLibrary {
    pub fn new(notes: Arc<dyn NoteStore>, vectors: Arc<dyn VectorStore>) -> Self {
        Self { notes, vectors }
    }

    pub fn vectors(&self) -> &Arc<dyn VectorStore> {
        &self.vectors
    }

    pub async fn list(&self) -> Result<Vec<Note>, RagError> {
        self.notes.list().await
    }

    pub async fn get(&self, id: &str) -> Result<Note, RagError> {
        self.notes.get(id).await
    }

    pub async fn create(&self, draft: NoteDraft) -> Result<Note, RagError> {
        let note = self.notes.create(draft).await?;
        self.index(&note).await?;
        Ok(note)
    }

    pub async fn update(&self, id: &str, draft: NoteDraft) -> Result<Note, RagError> {
        let note = self.notes.update(id, draft).await?;
        self.index(&note).await?;
        Ok(note)
    }

    pub async fn delete(&self, id: &str) -> Result<bool, RagError> {
        let existed = self.notes.delete(id).await?;
        self.vectors.delete(id).await?;
        Ok(existed)
    }

    pub async fn clear(&self) -> Result<(), RagError> {
        self.notes.clear().await?;
        self.vectors.clear().await
    }

    /// Notes most similar to `query`, best first.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<NoteHit>, RagError> {
        let results = self.vectors.query(query, k).await?;
        let mut hits = Vec::with_capacity(results.len());
        for result in results {
            match self.notes.get(&result.id).await {
                Ok(note) => hits.push(NoteHit {
                    note,
                    similarity: result.similarity,
                }),
                Err(RagError::NotFound(_)) => {
                    tracing::debug!("Index entry {} has no note; skipping", result.id);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(hits)
    }

    /// Rebuilds the index from every stored note. Returns how many were indexed.
    pub async fn reindex(&self) -> Result<usize, RagError> {
        self.vectors.clear().await?;
        let notes = self.notes.list().await?;
        let mut indexed = 0;
        for note in &notes {
            if self.index(note).await? {
                indexed += 1;
            }
        }
        tracing::info!("Reindexed {} of {} notes", indexed, notes.len());
        Ok(indexed)
    }

    async fn index(&self, note: &Note) -> Result<bool, RagError> {
        if note.content.trim().is_empty() {
            self.vectors.delete(&note.id).await?;
            return Ok(false);
        }

        let metadata = NoteMetadata::titled(note.title.clone());
        match self.vectors.upsert(&note.id, &note.content, metadata).await {
            Ok(()) => Ok(true),
            Err(err @ RagError::Storage(_)) => Err(err),
            Err(err) => {
                tracing::warn!(
                    "Note {} saved but not indexed: {}; it will not be retrieved until saved again",
                    note.id,
                    err
                );
                self.vectors.delete(&note.id).await?;
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::JsonNoteStore;
    use crate::store::InMemoryVectorStore;
    use crate::testing::FakeEmbedder;

    struct Fixture {
        _dir: tempfile::TempDir,
        embedder: Arc<FakeEmbedder>,
        library: NoteLibrary,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(
            FakeEmbedder::new(2)
                .with_vector("Lisbon trip", vec![1.0, 0.0])
                .with_vector("Buy milk", vec![0.0, 1.0])
                .with_vector("holiday", vec![0.9, 0.1]),
        );
        let vectors = Arc::new(InMemoryVectorStore::new(embedder.clone()));
        let notes = Arc::new(JsonNoteStore::with_path(dir.path().join("notes.json")));
        Fixture {
            _dir: dir,
            embedder,
            library: NoteLibrary::new(notes, vectors),
        }
    }

    #[tokio::test]
    async fn created_notes_are_searchable() {
        let fx = fixture();
        let trip = fx
            .library
            .create(NoteDraft::new("Trip", "Lisbon trip"))
            .await
            .unwrap();
        fx.library
            .create(NoteDraft::new("Shopping", "Buy milk"))
            .await
            .unwrap();

        let hits = fx.library.search("holiday", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].note, trip);
        assert!(hits[0].similarity > hits[1].similarity);
    }

    #[tokio::test]
    async fn update_replaces_the_indexed_text() {
        let fx = fixture();
        let note = fx
            .library
            .create(NoteDraft::new("Trip", "Lisbon trip"))
            .await
            .unwrap();
        fx.library
            .update(&note.id, NoteDraft::new("Trip", "Buy milk"))
            .await
            .unwrap();

        let hits = fx.library.vectors().query("Buy milk", 1).await.unwrap();
        assert_eq!(hits[0].document, "Buy milk");
        assert_eq!(hits[0].metadata.title, "Trip");
        assert_eq!(fx.library.vectors().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_content_is_not_indexed() {
        let fx = fixture();
        let note = fx
            .library
            .create(NoteDraft::new("Trip", "Lisbon trip"))
            .await
            .unwrap();
        fx.library
            .update(&note.id, NoteDraft::new("Trip", "   "))
            .await
            .unwrap();

        assert_eq!(fx.library.vectors().count().await.unwrap(), 0);
        assert_eq!(fx.library.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn embedding_failure_keeps_the_note_but_drops_stale_vectors() {
        let fx = fixture();
        let note = fx
            .library
            .create(NoteDraft::new("Trip", "Lisbon trip"))
            .await
            .unwrap();

        fx.embedder.fail_on("Lisbon trip, day two");
        let updated = fx
            .library
            .update(&note.id, NoteDraft::new("Trip", "Lisbon trip, day two"))
            .await
            .unwrap();

        assert_eq!(fx.library.get(&note.id).await.unwrap(), updated);
        assert_eq!(fx.library.vectors().count().await.unwrap(), 0);

        fx.embedder.recover("Lisbon trip, day two");
        assert_eq!(fx.library.reindex().await.unwrap(), 1);
        assert_eq!(fx.library.vectors().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_removes_from_both_stores() {
        let fx = fixture();
        let note = fx
            .library
            .create(NoteDraft::new("Trip", "Lisbon trip"))
            .await
            .unwrap();

        assert!(fx.library.delete(&note.id).await.unwrap());
        assert!(!fx.library.delete(&note.id).await.unwrap());
        assert_eq!(fx.library.vectors().count().await.unwrap(), 0);
        assert!(fx.library.search("holiday", 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reindex_skips_empty_notes() {
        let fx = fixture();
        fx.library
            .create(NoteDraft::new("Trip", "Lisbon trip"))
            .await
            .unwrap();
        fx.library
            .create(NoteDraft::new("Blank", ""))
            .await
            .unwrap();
        fx.library
            .create(NoteDraft::new("Shopping", "Buy milk"))
            .await
            .unwrap();

        assert_eq!(fx.library.reindex().await.unwrap(), 2);
        assert_eq!(fx.library.vectors().count().await.unwrap(), 2);
    }
}
