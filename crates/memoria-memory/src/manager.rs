// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The single entry point coordinating canonical book storage with the
//! per-book index and the embedding provider.
//!
//! Canonical JSON documents are the source of truth. Every index write made
//! here is best-effort: an embedding or index failure is logged and the
//! canonical write still stands. `sync_book` repairs whatever drifted.

use std::collections::HashSet;

use chrono::Utc;
use memoria_config::model::{ExtractionConfig, MemoriaConfig, RetrievalConfig};
use memoria_core::MemoriaError;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::book_store::BookStore;
use crate::embedding::ProviderRegistry;
use crate::index::{HybridOptions, IndexRegistry, IndexStatus};
use crate::types::{BookIdentity, MemoryBook, MemoryBookSettings, MemoryEntry, MemoryEntryPatch};

/// Outcome of [`MemoryManager::sync_book`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Entries embedded and written to the index.
    pub embedded: usize,
    /// Index rows removed because their entry no longer exists.
    pub removed: usize,
    /// Entries left alone (already current, or nothing to embed).
    pub skipped: usize,
}

fn book_not_found(book_id: &str) -> MemoriaError {
    MemoriaError::NotFound {
        kind: "book".into(),
        id: book_id.to_string(),
    }
}

/// Owns the book store, index registry and provider registry.
pub struct MemoryManager {
    books: BookStore,
    indexes: IndexRegistry,
    providers: ProviderRegistry,
    search: HybridOptions,
    retrieval: RetrievalConfig,
    extraction: ExtractionConfig,
    /// Serializes read-modify-write cycles on book documents.
    write_lock: Mutex<()>,
}

impl MemoryManager {
    /// Build a manager rooted at `config.storage.data_dir`.
    pub fn new(config: &MemoriaConfig) -> Self {
        Self::with_registries(
            BookStore::new(config.storage.books_dir()),
            IndexRegistry::new(config.storage.index_dir()),
            ProviderRegistry::from_config(config),
            config,
        )
    }

    pub fn with_registries(
        books: BookStore,
        indexes: IndexRegistry,
        providers: ProviderRegistry,
        config: &MemoriaConfig,
    ) -> Self {
        Self {
            books,
            indexes,
            providers,
            search: HybridOptions::from(&config.search),
            retrieval: config.retrieval.clone(),
            extraction: config.extraction.clone(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn books(&self) -> &BookStore {
        &self.books
    }

    pub fn indexes(&self) -> &IndexRegistry {
        &self.indexes
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn search_options(&self) -> HybridOptions {
        self.search
    }

    pub fn extraction_config(&self) -> &ExtractionConfig {
        &self.extraction
    }

    /// Settings given to books created from now on.
    pub fn default_settings(&self) -> MemoryBookSettings {
        MemoryBookSettings::from(&self.retrieval)
    }

    // --- Books ---

    pub async fn create_memory_book(
        &self,
        name: &str,
        character_id: Option<&str>,
        session_key: Option<&str>,
    ) -> Result<MemoryBook, MemoriaError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MemoriaError::InvalidInput("book name must not be empty".into()));
        }

        let mut book = MemoryBook::new(name, self.default_settings());
        book.character_id = character_id.map(str::to_string);
        book.session_key = session_key.map(str::to_string);

        let _guard = self.write_lock.lock().await;
        self.books.save(&book).await?;
        info!(book_id = %book.id, name = %book.name, "memory book created");
        Ok(book)
    }

    /// Find the book for a character (first) or session (second), creating
    /// it when neither exists. Repeated calls return the same book.
    pub async fn get_or_create_memory_book(
        &self,
        identity: &BookIdentity,
    ) -> Result<MemoryBook, MemoriaError> {
        let _guard = self.write_lock.lock().await;

        if let Some(character_id) = identity.character_id.as_deref()
            && let Some(book) = self.books.find_by_character(character_id).await?
        {
            return Ok(book);
        }
        if let Some(session_key) = identity.session_key.as_deref()
            && let Some(book) = self.books.find_by_session(session_key).await?
        {
            return Ok(book);
        }

        let mut book = MemoryBook::new(identity.book_name(), self.default_settings());
        book.character_id = identity.character_id.clone();
        book.session_key = identity.session_key.clone();
        self.books.save(&book).await?;
        info!(book_id = %book.id, name = %book.name, "memory book created");
        Ok(book)
    }

    pub async fn get_book(&self, book_id: &str) -> Result<Option<MemoryBook>, MemoriaError> {
        self.books.load(book_id).await
    }

    pub async fn list_books(&self) -> Result<Vec<MemoryBook>, MemoriaError> {
        self.books.list().await
    }

    /// Delete a book and its index. Returns false if the book was unknown.
    pub async fn delete_book(&self, book_id: &str) -> Result<bool, MemoriaError> {
        let _guard = self.write_lock.lock().await;
        self.indexes.remove(book_id).await?;
        let existed = self.books.delete(book_id).await?;
        if existed {
            info!(book_id, "memory book deleted");
        }
        Ok(existed)
    }

    pub async fn update_settings(
        &self,
        book_id: &str,
        settings: MemoryBookSettings,
    ) -> Result<Option<MemoryBook>, MemoriaError> {
        let _guard = self.write_lock.lock().await;
        let Some(mut book) = self.books.load(book_id).await? else {
            return Ok(None);
        };
        book.settings = MemoryBookSettings {
            min_importance_for_injection: settings.min_importance_for_injection.min(100),
            ..settings
        };
        book.updated_at = Utc::now();
        self.books.save(&book).await?;
        Ok(Some(book))
    }

    // --- Entries ---

    /// Append an entry to canonical storage only.
    pub async fn add_memory(
        &self,
        book_id: &str,
        mut entry: MemoryEntry,
    ) -> Result<MemoryEntry, MemoriaError> {
        if entry.content.trim().is_empty() {
            return Err(MemoriaError::InvalidInput("memory content must not be empty".into()));
        }
        entry.importance = entry.importance.min(100);

        let _guard = self.write_lock.lock().await;
        let mut book = self
            .books
            .load(book_id)
            .await?
            .ok_or_else(|| book_not_found(book_id))?;
        if book.entry(&entry.id).is_some() {
            return Err(MemoriaError::InvalidInput(format!(
                "entry {} already exists in book {book_id}",
                entry.id
            )));
        }

        book.entries.push(entry.clone());
        book.updated_at = Utc::now();
        self.books.save(&book).await?;
        debug!(book_id, entry_id = %entry.id, "memory added");
        Ok(entry)
    }

    /// Append an entry, then embed and index it. Indexing failures are
    /// logged and never undo the canonical write.
    pub async fn add_memory_with_embedding(
        &self,
        book_id: &str,
        entry: MemoryEntry,
    ) -> Result<MemoryEntry, MemoriaError> {
        let entry = self.add_memory(book_id, entry).await?;
        self.index_best_effort(book_id, &entry).await;
        Ok(entry)
    }

    /// Patch an entry. Returns `None` when the book or entry is unknown.
    pub async fn update_memory(
        &self,
        book_id: &str,
        entry_id: &str,
        patch: MemoryEntryPatch,
    ) -> Result<Option<MemoryEntry>, MemoriaError> {
        if patch.content.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(MemoriaError::InvalidInput("memory content must not be empty".into()));
        }

        let (updated, content_changed) = {
            let _guard = self.write_lock.lock().await;
            let Some(mut book) = self.books.load(book_id).await? else {
                return Ok(None);
            };
            let Some(entry) = book.entry_mut(entry_id) else {
                return Ok(None);
            };
            let content_changed = patch.apply(entry);
            let updated = entry.clone();
            book.updated_at = Utc::now();
            self.books.save(&book).await?;
            (updated, content_changed)
        };

        if content_changed {
            self.reindex_best_effort(book_id, &updated).await;
        } else {
            self.refresh_best_effort(book_id, &updated).await;
        }
        Ok(Some(updated))
    }

    /// Remove an entry from canonical storage only.
    pub async fn delete_memory(&self, book_id: &str, entry_id: &str) -> Result<bool, MemoriaError> {
        let _guard = self.write_lock.lock().await;
        let Some(mut book) = self.books.load(book_id).await? else {
            return Ok(false);
        };
        let before = book.entries.len();
        book.entries.retain(|e| e.id != entry_id);
        if book.entries.len() == before {
            return Ok(false);
        }
        book.updated_at = Utc::now();
        self.books.save(&book).await?;
        debug!(book_id, entry_id, "memory deleted");
        Ok(true)
    }

    /// Remove an entry from the index, then from canonical storage, so the
    /// index never offers an id that canonical lookup cannot resolve.
    pub async fn delete_memory_with_vector(
        &self,
        book_id: &str,
        entry_id: &str,
    ) -> Result<bool, MemoriaError> {
        if self.books.load(book_id).await?.is_none() {
            return Ok(false);
        }
        let index = self.indexes.get(book_id).await?;
        index.remove_entry(entry_id).await?;
        self.delete_memory(book_id, entry_id).await
    }

    /// Mark entries as returned by a retrieval and persist the change, then
    /// mirror the new bookkeeping into the index if the book has one.
    /// Returns the updated entries in `entry_ids` order; unknown ids are
    /// skipped.
    pub async fn record_access(
        &self,
        book_id: &str,
        entry_ids: &[String],
    ) -> Result<Vec<MemoryEntry>, MemoriaError> {
        if entry_ids.is_empty() {
            return Ok(Vec::new());
        }

        let _guard = self.write_lock.lock().await;
        let mut book = self
            .books
            .load(book_id)
            .await?
            .ok_or_else(|| book_not_found(book_id))?;

        let now = Utc::now();
        let mut touched = Vec::with_capacity(entry_ids.len());
        for id in entry_ids {
            if let Some(entry) = book.entry_mut(id) {
                entry.touch(now);
                touched.push(entry.clone());
            }
        }
        if touched.is_empty() {
            return Ok(touched);
        }
        self.books.save(&book).await?;

        let mirrored = async {
            match self.indexes.get_existing(book_id).await? {
                Some(index) => index.refresh_entries(&touched).await,
                None => Ok(0),
            }
        }
        .await;
        if let Err(e) = mirrored {
            warn!(book_id, error = %e, "failed to mirror access bookkeeping into index");
        }
        Ok(touched)
    }

    // --- Index maintenance ---

    /// Bring the index up to date with canonical storage.
    ///
    /// Entries missing from the index, or whose vector came from another
    /// model, are embedded in one request and written in one transaction.
    /// Index rows whose entry no longer exists are removed. Without an
    /// embedding provider this is a no-op.
    pub async fn sync_book(&self, book_id: &str) -> Result<SyncReport, MemoriaError> {
        let book = self
            .books
            .load(book_id)
            .await?
            .ok_or_else(|| book_not_found(book_id))?;

        let Some(provider) = self.providers.resolve_or_warn().await else {
            debug!(book_id, "no embedding provider, sync skipped");
            return Ok(SyncReport {
                skipped: book.entries.len(),
                ..SyncReport::default()
            });
        };

        let index = self.indexes.get(book_id).await?;
        let indexed: HashSet<String> = index.entry_ids().await?.into_iter().collect();
        let stale: HashSet<String> = index
            .entries_needing_embedding(provider.model())
            .await?
            .into_iter()
            .collect();
        let canonical: HashSet<&str> = book.entries.iter().map(|e| e.id.as_str()).collect();

        let mut report = SyncReport::default();
        for id in indexed.iter().filter(|id| !canonical.contains(id.as_str())) {
            if index.remove_entry(id).await? {
                report.removed += 1;
            }
        }

        let pending: Vec<&MemoryEntry> = book
            .entries
            .iter()
            .filter(|e| !indexed.contains(&e.id) || stale.contains(&e.id))
            .collect();
        report.skipped = book.entries.len() - pending.len();

        if !pending.is_empty() {
            let texts: Vec<String> = pending.iter().map(|e| e.content.clone()).collect();
            let vectors = provider.embed_batch(&texts).await?;
            let items: Vec<(MemoryEntry, Vec<f32>)> = pending
                .into_iter()
                .cloned()
                .zip(vectors)
                .filter(|(_, vector)| !vector.is_empty())
                .collect();
            report.skipped += texts.len() - items.len();
            report.embedded = index.index_batch(items, provider.model()).await?;
        }

        info!(
            book_id,
            model = provider.model(),
            embedded = report.embedded,
            removed = report.removed,
            skipped = report.skipped,
            "index synced"
        );
        Ok(report)
    }

    pub async fn index_status(&self, book_id: &str) -> Result<IndexStatus, MemoriaError> {
        if self.books.load(book_id).await?.is_none() {
            return Err(book_not_found(book_id));
        }
        self.indexes.get(book_id).await?.status().await
    }

    /// Whether `content` is semantically a duplicate of something already
    /// indexed for the book. Without a provider, or on any failure, nothing
    /// counts as a duplicate.
    pub async fn is_duplicate(&self, book_id: &str, content: &str, threshold: f32) -> bool {
        let Some(provider) = self.providers.resolve_or_warn().await else {
            return false;
        };
        let result = async {
            let vector = provider.embed_query(content).await?;
            let index = self.indexes.get(book_id).await?;
            index
                .search_vector(&vector, provider.model(), 1, threshold)
                .await
        }
        .await;

        match result {
            Ok(hits) => {
                if let Some(top) = hits.first() {
                    debug!(book_id, existing = %top.id, score = top.score, "duplicate candidate");
                    true
                } else {
                    false
                }
            }
            Err(e) => {
                warn!(book_id, error = %e, "dedup check failed, treating as new");
                false
            }
        }
    }

    /// Release every open index handle.
    pub async fn close(&self) {
        self.indexes.close_all().await;
    }

    async fn index_best_effort(&self, book_id: &str, entry: &MemoryEntry) {
        let Some(provider) = self.providers.resolve_or_warn().await else {
            return;
        };
        let result = async {
            let vector = provider.embed_query(&entry.content).await?;
            let index = self.indexes.get(book_id).await?;
            index.index_entry(entry, &vector, provider.model()).await
        }
        .await;

        if let Err(e) = result {
            warn!(book_id, entry_id = %entry.id, error = %e, "indexing failed, entry stored without vector");
        }
    }

    /// Re-embed an entry whose content changed. When that fails the old
    /// row is dropped so the index never answers with outdated text, and the
    /// next [`sync_book`](Self::sync_book) embeds it again.
    async fn reindex_best_effort(&self, book_id: &str, entry: &MemoryEntry) {
        match self.providers.resolve_or_warn().await {
            Some(provider) => {
                let reindexed = async {
                    let vector = provider.embed_query(&entry.content).await?;
                    let index = self.indexes.get(book_id).await?;
                    index.index_entry(entry, &vector, provider.model()).await
                }
                .await;
                match reindexed {
                    Ok(()) => return,
                    Err(e) => {
                        warn!(book_id, entry_id = %entry.id, error = %e, "re-embedding failed, dropping stale index row");
                    }
                }
            }
            None => debug!(book_id, entry_id = %entry.id, "no embedding provider, dropping stale index row"),
        }

        let removed = async {
            match self.indexes.get_existing(book_id).await? {
                Some(index) => index.remove_entry(&entry.id).await,
                None => Ok(false),
            }
        }
        .await;
        if let Err(e) = removed {
            warn!(book_id, entry_id = %entry.id, error = %e, "failed to drop stale index row");
        }
    }

    async fn refresh_best_effort(&self, book_id: &str, entry: &MemoryEntry) {
        let result = async {
            match self.indexes.get_existing(book_id).await? {
                Some(index) => index.refresh_entry(entry).await,
                None => Ok(false),
            }
        }
        .await;

        if let Err(e) = result {
            warn!(book_id, entry_id = %entry.id, error = %e, "index refresh failed");
        }
    }
}
