// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Canonical book storage: one pretty-printed JSON document per book.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use memoria_core::MemoriaError;
use tracing::{debug, warn};

use crate::types::MemoryBook;

/// Reject ids that could escape the storage directory.
pub fn validate_book_id(id: &str) -> Result<(), MemoriaError> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(MemoriaError::InvalidInput(format!("invalid book id: {id:?}")))
    }
}

/// Reads and writes `{dir}/{book_id}.json`.
pub struct BookStore {
    dir: PathBuf,
}

impl BookStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, book_id: &str) -> PathBuf {
        self.dir.join(format!("{book_id}.json"))
    }

    /// Load a book. A missing file is `Ok(None)`; an unreadable or malformed
    /// one is an error.
    pub async fn load(&self, book_id: &str) -> Result<Option<MemoryBook>, MemoriaError> {
        validate_book_id(book_id)?;
        let path = self.path_for(book_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(MemoriaError::storage(e)),
        };
        let book = serde_json::from_slice(&bytes).map_err(MemoriaError::storage)?;
        Ok(Some(book))
    }

    /// Write a book atomically: serialize to a temp file, then rename over
    /// the target.
    pub async fn save(&self, book: &MemoryBook) -> Result<(), MemoriaError> {
        validate_book_id(&book.id)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(MemoriaError::storage)?;

        let json = serde_json::to_vec_pretty(book).map_err(MemoriaError::storage)?;
        let path = self.path_for(&book.id);
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", book.id, uuid::Uuid::new_v4()));

        if let Err(e) = tokio::fs::write(&tmp, &json).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(MemoriaError::storage(e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(MemoriaError::storage(e));
        }
        debug!(book_id = %book.id, entries = book.entries.len(), "book saved");
        Ok(())
    }

    /// Delete a book file. Returns false if it did not exist.
    pub async fn delete(&self, book_id: &str) -> Result<bool, MemoriaError> {
        validate_book_id(book_id)?;
        match tokio::fs::remove_file(self.path_for(book_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MemoriaError::storage(e)),
        }
    }

    /// Every readable book, oldest first. Unreadable or malformed files are
    /// skipped with a warning.
    pub async fn list(&self) -> Result<Vec<MemoryBook>, MemoriaError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MemoriaError::storage(e)),
        };

        let mut books = Vec::new();
        while let Some(item) = dir.next_entry().await.map_err(MemoriaError::storage)? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_book(&path).await {
                Ok(book) => books.push(book),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable book file"),
            }
        }

        books.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(books)
    }

    pub async fn find_by_character(
        &self,
        character_id: &str,
    ) -> Result<Option<MemoryBook>, MemoriaError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|b| b.character_id.as_deref() == Some(character_id)))
    }

    pub async fn find_by_session(
        &self,
        session_key: &str,
    ) -> Result<Option<MemoryBook>, MemoriaError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|b| b.session_key.as_deref() == Some(session_key)))
    }
}

async fn read_book(path: &Path) -> Result<MemoryBook, MemoriaError> {
    let bytes = tokio::fs::read(path).await.map_err(MemoriaError::storage)?;
    serde_json::from_slice(&bytes).map_err(MemoriaError::storage)
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::types::{MemoryBookSettings, MemoryEntry};

    fn store() -> (tempfile::TempDir, BookStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BookStore::new(dir.path().join("books"));
        (dir, store)
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let (_dir, store) = store();
        let mut book = MemoryBook::new("Alice Memories", MemoryBookSettings::default());
        book.character_id = Some("alice".into());
        book.entries.push(MemoryEntry::manual("Alice likes tea").with_importance(70));
        store.save(&book).await.unwrap();

        let loaded = store.load(&book.id).await.unwrap().unwrap();
        assert_eq!(loaded, book);

        let raw = std::fs::read_to_string(store.path_for(&book.id)).unwrap();
        assert!(raw.contains("\n  \"name\": \"Alice Memories\""));
        assert!(raw.contains("\"characterId\": \"alice\""));
    }

    #[tokio::test]
    async fn save_leaves_no_temp_files() {
        let (_dir, store) = store();
        let book = MemoryBook::new("b", MemoryBookSettings::default());
        store.save(&book).await.unwrap();
        store.save(&book).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![format!("{}.json", book.id)]);
    }

    #[tokio::test]
    async fn load_missing_is_none() {
        let (_dir, store) = store();
        assert!(store.load("nope").await.unwrap().is_none());
        assert!(!store.delete("nope").await.unwrap());
    }

    #[tokio::test]
    #[traced_test]
    async fn list_skips_malformed_files() {
        let (_dir, store) = store();
        let book = MemoryBook::new("good", MemoryBookSettings::default());
        store.save(&book).await.unwrap();
        std::fs::write(store.dir().join("broken.json"), b"{ not json").unwrap();
        std::fs::write(store.dir().join("notes.txt"), b"ignored").unwrap();

        let books = store.list().await.unwrap();
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].id, book.id);
        assert!(logs_contain("skipping unreadable book file"));
    }

    #[tokio::test]
    async fn list_of_missing_dir_is_empty() {
        let (_dir, store) = store();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn find_by_identity() {
        let (_dir, store) = store();
        let mut by_char = MemoryBook::new("c", MemoryBookSettings::default());
        by_char.character_id = Some("char-1".into());
        let mut by_session = MemoryBook::new("s", MemoryBookSettings::default());
        by_session.session_key = Some("sess-1".into());
        store.save(&by_char).await.unwrap();
        store.save(&by_session).await.unwrap();

        assert_eq!(
            store.find_by_character("char-1").await.unwrap().unwrap().id,
            by_char.id
        );
        assert_eq!(
            store.find_by_session("sess-1").await.unwrap().unwrap().id,
            by_session.id
        );
        assert!(store.find_by_character("sess-1").await.unwrap().is_none());
    }

    #[test]
    fn book_id_validation() {
        assert!(validate_book_id("3f2b9c1e-7a4d-4e1b-9a0f-0c1d2e3f4a5b").is_ok());
        assert!(validate_book_id("my_book").is_ok());
        assert!(validate_book_id("").is_err());
        assert!(validate_book_id("../etc").is_err());
        assert!(validate_book_id("a/b").is_err());
    }
}
