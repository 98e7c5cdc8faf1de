// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cache of open per-book index handles.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use memoria_core::MemoriaError;
use tokio::sync::Mutex;
use tracing::debug;

use super::{IndexOptions, VectorIndex};
use crate::book_store::validate_book_id;

/// Opens each book's index on first use and keeps it until closed.
///
/// Closing drops the registry's handle; the connection shuts down once the
/// last outstanding `Arc` is released.
pub struct IndexRegistry {
    dir: PathBuf,
    options: IndexOptions,
    open: Mutex<HashMap<String, Arc<VectorIndex>>>,
}

impl IndexRegistry {
    pub fn new(dir: PathBuf) -> Self {
        Self::with_options(dir, IndexOptions::default())
    }

    pub fn with_options(dir: PathBuf, options: IndexOptions) -> Self {
        Self {
            dir,
            options,
            open: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `{dir}/{book_id}.sqlite`
    pub fn path_for(&self, book_id: &str) -> PathBuf {
        self.dir.join(format!("{book_id}.sqlite"))
    }

    /// The index for `book_id`, opening (and creating) it if needed.
    pub async fn get(&self, book_id: &str) -> Result<Arc<VectorIndex>, MemoriaError> {
        validate_book_id(book_id)?;
        let mut open = self.open.lock().await;
        if let Some(index) = open.get(book_id) {
            return Ok(Arc::clone(index));
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(MemoriaError::storage)?;
        let path = self.path_for(book_id);
        debug!(book_id, path = %path.display(), "opening index");
        let index = Arc::new(VectorIndex::open_with_options(&path, self.options).await?);
        open.insert(book_id.to_string(), Arc::clone(&index));
        Ok(index)
    }

    /// The index for `book_id` if it is open or its database file exists.
    /// Never creates one.
    pub async fn get_existing(
        &self,
        book_id: &str,
    ) -> Result<Option<Arc<VectorIndex>>, MemoriaError> {
        validate_book_id(book_id)?;
        if !self.is_open(book_id).await {
            let exists = tokio::fs::try_exists(self.path_for(book_id))
                .await
                .map_err(MemoriaError::storage)?;
            if !exists {
                return Ok(None);
            }
        }
        self.get(book_id).await.map(Some)
    }

    /// Release the cached handle. Returns false if it was not open.
    pub async fn close(&self, book_id: &str) -> bool {
        self.open.lock().await.remove(book_id).is_some()
    }

    pub async fn close_all(&self) {
        self.open.lock().await.clear();
    }

    pub async fn is_open(&self, book_id: &str) -> bool {
        self.open.lock().await.contains_key(book_id)
    }

    /// Close the index and delete its database files.
    pub async fn remove(&self, book_id: &str) -> Result<(), MemoriaError> {
        validate_book_id(book_id)?;
        self.close(book_id).await;

        let base = self.path_for(book_id);
        for suffix in ["", "-wal", "-shm"] {
            let mut path = base.clone().into_os_string();
            path.push(suffix);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(MemoriaError::storage(e)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryEntry;

    #[tokio::test]
    async fn get_existing_never_creates() {
        let dir = tempfile::tempdir().unwrap();
        let registry = IndexRegistry::new(dir.path().join("index"));

        assert!(registry.get_existing("book-1").await.unwrap().is_none());
        assert!(!registry.path_for("book-1").exists());

        registry.get("book-1").await.unwrap();
        registry.close("book-1").await;
        assert!(registry.get_existing("book-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn handles_are_cached_until_closed() {
        let dir = tempfile::tempdir().unwrap();
        let registry = IndexRegistry::new(dir.path().join("index"));

        let a = registry.get("book-1").await.unwrap();
        let b = registry.get("book-1").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.path_for("book-1").exists());

        assert!(registry.close("book-1").await);
        assert!(!registry.close("book-1").await);
        let c = registry.get("book-1").await.unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let registry = IndexRegistry::new(dir.path().to_path_buf());
        let entry = MemoryEntry::manual("persisted fact");

        registry
            .get("book-1")
            .await
            .unwrap()
            .index_entry(&entry, &[1.0, 0.0], "m")
            .await
            .unwrap();
        registry.close_all().await;

        let index = registry.get("book-1").await.unwrap();
        assert_eq!(index.entry_ids().await.unwrap(), vec![entry.id]);
    }

    #[tokio::test]
    async fn remove_deletes_files() {
        let dir = tempfile::tempdir().unwrap();
        let registry = IndexRegistry::new(dir.path().to_path_buf());
        drop(registry.get("book-1").await.unwrap());

        registry.remove("book-1").await.unwrap();
        assert!(!registry.is_open("book-1").await);
        assert!(!registry.path_for("book-1").exists());
        registry.remove("book-1").await.unwrap();
    }

    #[tokio::test]
    async fn rejects_path_like_book_ids() {
        let dir = tempfile::tempdir().unwrap();
        let registry = IndexRegistry::new(dir.path().to_path_buf());
        assert!(matches!(
            registry.get("../escape").await,
            Err(MemoriaError::InvalidInput(_))
        ));
    }
}
