// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ranked, budget-limited memory retrieval.
//!
//! With an embedding provider the book's index answers a hybrid (or pure
//! vector) query and results keep relevance order. Without one, or when
//! anything on the vector path fails, entries are matched offline against
//! keywords extracted from the context and sorted by the book's `sort_by`.
//! Every returned entry has its access bookkeeping persisted.

use std::collections::HashMap;
use std::sync::Arc;

use memoria_config::model::SortBy;
use memoria_core::MemoriaError;
use serde::Serialize;
use strum::Display;
use tracing::{debug, warn};

use crate::embedding::EmbeddingProvider;
use crate::manager::MemoryManager;
use crate::text::{contains_any, extract_keywords};
use crate::types::{MemoryBook, MemoryBookSettings, MemoryEntry};

/// Heading placed above rendered memories.
pub const MEMORY_HEADING: &str = "## Memories";

/// Per-call overrides of a book's retrieval settings.
#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    pub max_results: Option<usize>,
    pub min_importance: Option<u8>,
    pub sort_by: Option<SortBy>,
    pub use_keyword_retrieval: Option<bool>,
}

impl RetrieveOptions {
    fn resolve(&self, settings: &MemoryBookSettings) -> Effective {
        Effective {
            max_results: self.max_results.unwrap_or(settings.max_memories_per_request),
            min_importance: self
                .min_importance
                .unwrap_or(settings.min_importance_for_injection),
            sort_by: self.sort_by.unwrap_or(settings.sort_by),
            use_keyword_retrieval: self
                .use_keyword_retrieval
                .unwrap_or(settings.use_keyword_retrieval),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Effective {
    max_results: usize,
    min_importance: u8,
    sort_by: SortBy,
    use_keyword_retrieval: bool,
}

/// How a [`RetrievalResult`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMethod {
    Hybrid,
    Vector,
    Keyword,
    /// Every enabled entry, with no relevance filter.
    All,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    /// Returned entries, best first, with access bookkeeping applied.
    pub entries: Vec<MemoryEntry>,
    /// Entries that passed filtering before truncation.
    pub total_candidates: usize,
    pub truncated: bool,
    pub method: RetrievalMethod,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render under a token budget. Entries are taken in order until the
    /// next one would exceed `max_tokens`; the first is always included.
    pub fn to_prompt(&self, max_tokens: usize) -> String {
        let mut used = 0;
        let mut admitted = Vec::new();
        for entry in &self.entries {
            let cost = entry.estimated_tokens();
            if !admitted.is_empty() && used + cost > max_tokens {
                break;
            }
            used += cost;
            admitted.push(entry);
        }
        render(admitted)
    }
}

/// Render entries as a bulleted list under [`MEMORY_HEADING`]. An empty
/// list renders as an empty string.
pub fn format_memories(entries: &[MemoryEntry]) -> String {
    render(entries.iter())
}

fn render<'a>(entries: impl IntoIterator<Item = &'a MemoryEntry>) -> String {
    let lines: Vec<String> = entries
        .into_iter()
        .map(|e| match e.category.as_deref() {
            Some(category) if !category.is_empty() => format!("- [{category}] {}", e.content),
            _ => format!("- {}", e.content),
        })
        .collect();
    if lines.is_empty() {
        return String::new();
    }
    format!("{MEMORY_HEADING}\n{}", lines.join("\n"))
}

/// Retrieves memories for a conversation context.
pub struct MemoryRetriever {
    manager: Arc<MemoryManager>,
}

impl MemoryRetriever {
    pub fn new(manager: Arc<MemoryManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<MemoryManager> {
        &self.manager
    }

    /// Keyword-only retrieval over canonical storage. No index or embedding
    /// backend is touched.
    pub async fn retrieve_memories(
        &self,
        book_id: &str,
        context: &str,
        options: &RetrieveOptions,
    ) -> Result<RetrievalResult, MemoriaError> {
        let book = self.load_book(book_id).await?;
        let effective = options.resolve(&book.settings);
        let result = offline_rank(&book, context, effective);
        Ok(self.finish(book_id, result).await)
    }

    /// Vector retrieval through the book's index, falling back to
    /// [`retrieve_memories`](Self::retrieve_memories) when no provider is
    /// available, nothing is embedded for the provider's model yet, or any
    /// step fails.
    pub async fn retrieve_memories_with_vector(
        &self,
        book_id: &str,
        context: &str,
        options: &RetrieveOptions,
    ) -> Result<RetrievalResult, MemoriaError> {
        let book = self.load_book(book_id).await?;
        let effective = options.resolve(&book.settings);

        let result = match self.manager.providers().resolve_or_warn().await {
            Some(provider) => match self.vector_rank(&book, &provider, context, effective).await {
                Ok(Some(result)) => result,
                Ok(None) => {
                    debug!(book_id, model = provider.model(), "no usable vectors, using keyword retrieval");
                    offline_rank(&book, context, effective)
                }
                Err(e) => {
                    warn!(book_id, error = %e, "vector retrieval failed, using keyword retrieval");
                    offline_rank(&book, context, effective)
                }
            },
            None => offline_rank(&book, context, effective),
        };
        Ok(self.finish(book_id, result).await)
    }

    async fn load_book(&self, book_id: &str) -> Result<MemoryBook, MemoriaError> {
        self.manager
            .get_book(book_id)
            .await?
            .ok_or_else(|| MemoriaError::NotFound {
                kind: "book".into(),
                id: book_id.to_string(),
            })
    }

    /// `Ok(None)` when the index has no vectors for this provider's model or
    /// the context is blank.
    async fn vector_rank(
        &self,
        book: &MemoryBook,
        provider: &EmbeddingProvider,
        context: &str,
        effective: Effective,
    ) -> Result<Option<RetrievalResult>, MemoriaError> {
        let index = self.manager.indexes().get(&book.id).await?;
        if index.vector_count_for(provider.model()).await? == 0 {
            return Ok(None);
        }
        let query = provider.embed_query(context).await?;
        if query.is_empty() {
            return Ok(None);
        }

        let options = self.manager.search_options();
        let limit = effective.max_results.saturating_mul(2);
        let (hits, method) = if effective.use_keyword_retrieval {
            let hits = index
                .hybrid_search(&query, provider.model(), context, limit, options)
                .await?;
            (hits, RetrievalMethod::Hybrid)
        } else {
            let hits = index
                .search_vector(&query, provider.model(), limit, options.min_score)
                .await?;
            (hits, RetrievalMethod::Vector)
        };

        let by_id: HashMap<&str, &MemoryEntry> =
            book.entries.iter().map(|e| (e.id.as_str(), e)).collect();
        let mut entries: Vec<MemoryEntry> = hits
            .iter()
            .filter_map(|hit| by_id.get(hit.id.as_str()).copied())
            .filter(|e| passes_filters(e, effective.min_importance))
            .cloned()
            .collect();

        let total_candidates = entries.len();
        let truncated = total_candidates > effective.max_results;
        entries.truncate(effective.max_results);
        debug!(book_id = %book.id, %method, hits = hits.len(), returned = entries.len(), "vector retrieval");

        Ok(Some(RetrievalResult {
            entries,
            total_candidates,
            truncated,
            method,
        }))
    }

    /// Persist access bookkeeping for the returned entries.
    async fn finish(&self, book_id: &str, mut result: RetrievalResult) -> RetrievalResult {
        let ids: Vec<String> = result.entries.iter().map(|e| e.id.clone()).collect();
        match self.manager.record_access(book_id, &ids).await {
            Ok(touched) => {
                let touched: HashMap<String, MemoryEntry> =
                    touched.into_iter().map(|e| (e.id.clone(), e)).collect();
                for entry in &mut result.entries {
                    if let Some(updated) = touched.get(&entry.id) {
                        *entry = updated.clone();
                    }
                }
            }
            Err(e) => warn!(book_id, error = %e, "failed to record memory access"),
        }
        result
    }
}

fn passes_filters(entry: &MemoryEntry, min_importance: u8) -> bool {
    entry.enabled && entry.importance >= min_importance
}

/// Filter, sort and truncate entries without an index.
fn offline_rank(book: &MemoryBook, context: &str, effective: Effective) -> RetrievalResult {
    let (tokens, method) = if effective.use_keyword_retrieval {
        (extract_keywords(context), RetrievalMethod::Keyword)
    } else {
        (Vec::new(), RetrievalMethod::All)
    };

    let mut entries: Vec<MemoryEntry> = book
        .entries
        .iter()
        .filter(|e| passes_filters(e, effective.min_importance))
        .filter(|e| {
            tokens.is_empty()
                || contains_any(&e.content, &tokens)
                || e.keywords.iter().any(|k| contains_any(k, &tokens))
        })
        .cloned()
        .collect();

    sort_entries(&mut entries, effective.sort_by);
    let total_candidates = entries.len();
    let truncated = total_candidates > effective.max_results;
    entries.truncate(effective.max_results);
    debug!(book_id = %book.id, %method, tokens = tokens.len(), returned = entries.len(), "offline retrieval");

    RetrievalResult {
        entries,
        total_candidates,
        truncated,
        method,
    }
}

/// Stable sort, descending on the chosen key.
pub fn sort_entries(entries: &mut [MemoryEntry], sort_by: SortBy) {
    match sort_by {
        SortBy::Importance => entries.sort_by(|a, b| b.importance.cmp(&a.importance)),
        SortBy::Recency => entries.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at)),
        SortBy::AccessCount => entries.sort_by(|a, b| b.access_count.cmp(&a.access_count)),
    }
}
