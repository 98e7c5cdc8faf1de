// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-book SQLite index with vector BLOB storage and an FTS5 keyword
//! projection.
//!
//! The index mirrors searchable entry fields, stores one vector per entry
//! tagged with its model, and answers vector, keyword, and hybrid queries.
//! It is a derived projection of canonical book storage and can always be
//! rebuilt from it. All access goes through tokio-rusqlite's single
//! background thread, so writes are serialized.

mod fusion;
mod registry;

use std::path::Path;

use chrono::{DateTime, Utc};
use memoria_core::MemoriaError;
use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Transaction, params};
use serde::Serialize;
use tokio_rusqlite::Connection;
use tracing::{debug, warn};

use crate::text::{contains_any, tokenize};
use crate::types::{EntryType, MemoryEntry, blob_to_vec, cosine_similarity, vec_to_blob};

pub use fusion::{HybridOptions, MatchType, ScoredMatch, fuse_weighted};
pub use registry::IndexRegistry;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Score given to every hit of the substring fallback.
const SUBSTRING_SCORE: f32 = 1.0;

const ENTRY_COLUMNS: &str = "id, content, created_at, last_accessed_at, access_count, \
     entry_type, keywords, importance, category, source, enabled";

/// Convert tokio-rusqlite errors to MemoriaError::Storage.
fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> MemoriaError {
    MemoriaError::storage(e)
}

/// Open-time options.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexOptions {
    /// Skip FTS5 and answer keyword queries with the substring scan.
    pub force_substring_search: bool,
}

/// Snapshot returned by [`VectorIndex::status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStatus {
    pub entry_count: usize,
    pub vector_count: usize,
    pub model: Option<String>,
    pub last_write: Option<DateTime<Utc>>,
    pub fts_enabled: bool,
}

/// One book's index database.
pub struct VectorIndex {
    conn: Connection,
    fts: bool,
}

impl VectorIndex {
    /// Open (or create) the index at `path` and apply migrations.
    pub async fn open(path: &Path) -> Result<Self, MemoriaError> {
        Self::open_with_options(path, IndexOptions::default()).await
    }

    pub async fn open_with_options(
        path: &Path,
        options: IndexOptions,
    ) -> Result<Self, MemoriaError> {
        let conn = Connection::open(path)
            .await
            .map_err(MemoriaError::storage)?;
        Self::init(conn, options).await
    }

    /// A throwaway in-memory index.
    pub async fn open_in_memory() -> Result<Self, MemoriaError> {
        Self::open_in_memory_with_options(IndexOptions::default()).await
    }

    pub async fn open_in_memory_with_options(options: IndexOptions) -> Result<Self, MemoriaError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(MemoriaError::storage)?;
        Self::init(conn, options).await
    }

    async fn init(conn: Connection, options: IndexOptions) -> Result<Self, MemoriaError> {
        let fts = conn
            .call(move |conn| -> Result<bool, MemoriaError> {
                conn.execute_batch(
                    "PRAGMA journal_mode = WAL;
                     PRAGMA foreign_keys = ON;
                     PRAGMA busy_timeout = 5000;",
                )
                .map_err(MemoriaError::storage)?;
                embedded::migrations::runner()
                    .run(conn)
                    .map_err(MemoriaError::storage)?;

                if options.force_substring_search {
                    return Ok(false);
                }
                match ensure_fts(conn) {
                    Ok(()) => Ok(true),
                    Err(e) => {
                        warn!(error = %e, "FTS5 unavailable, keyword search falls back to substring scan");
                        Ok(false)
                    }
                }
            })
            .await
            .map_err(|e| match e {
                tokio_rusqlite::Error::Error(inner) => inner,
                other => MemoriaError::Internal(format!("index connection error: {other}")),
            })?;

        Ok(Self { conn, fts })
    }

    /// Whether keyword search uses FTS5.
    pub fn fts_enabled(&self) -> bool {
        self.fts
    }

    /// Upsert one entry and its vector. Re-indexing an id replaces it.
    pub async fn index_entry(
        &self,
        entry: &MemoryEntry,
        vector: &[f32],
        model: &str,
    ) -> Result<(), MemoriaError> {
        self.index_batch(vec![(entry.clone(), vector.to_vec())], model)
            .await
            .map(|_| ())
    }

    /// Upsert many entries in one transaction. On any failure nothing from
    /// the batch is visible.
    pub async fn index_batch(
        &self,
        items: Vec<(MemoryEntry, Vec<f32>)>,
        model: &str,
    ) -> Result<usize, MemoriaError> {
        if items.is_empty() {
            return Ok(0);
        }
        let model = model.to_string();
        let fts = self.fts;
        let now = Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| -> Result<usize, rusqlite::Error> {
                let tx = conn.transaction()?;
                for (entry, vector) in &items {
                    upsert_entry(&tx, entry, fts)?;
                    tx.execute(
                        "INSERT INTO vectors (entry_id, embedding, model, updated_at)
                         VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT(entry_id) DO UPDATE SET
                            embedding = excluded.embedding,
                            model = excluded.model,
                            updated_at = excluded.updated_at",
                        params![entry.id, vec_to_blob(vector), model, now],
                    )?;
                }
                set_meta(&tx, "model", &model)?;
                set_meta(&tx, "last_write", &now)?;
                tx.commit()?;
                Ok(items.len())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Remove an entry, its vector and its keyword projection. Returns false
    /// when the id was not indexed.
    pub async fn remove_entry(&self, id: &str) -> Result<bool, MemoriaError> {
        let id = id.to_string();
        let fts = self.fts;
        self.conn
            .call(move |conn| -> Result<bool, rusqlite::Error> {
                let tx = conn.transaction()?;
                if fts {
                    tx.execute("DELETE FROM entries_fts WHERE id = ?1", params![id])?;
                }
                tx.execute("DELETE FROM vectors WHERE entry_id = ?1", params![id])?;
                let removed = tx.execute("DELETE FROM entries WHERE id = ?1", params![id])?;
                if removed > 0 {
                    set_meta(&tx, "last_write", &Utc::now().to_rfc3339())?;
                }
                tx.commit()?;
                Ok(removed > 0)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Rewrite the mirrored fields of an already indexed entry, keeping its
    /// vector. Returns false when the entry is not indexed.
    pub async fn refresh_entry(&self, entry: &MemoryEntry) -> Result<bool, MemoriaError> {
        Ok(self.refresh_entries(std::slice::from_ref(entry)).await? == 1)
    }

    /// Refresh the mirrored rows of several entries in one transaction.
    /// Returns how many were indexed.
    pub async fn refresh_entries(&self, entries: &[MemoryEntry]) -> Result<usize, MemoriaError> {
        if entries.is_empty() {
            return Ok(0);
        }
        let entries = entries.to_vec();
        let fts = self.fts;
        self.conn
            .call(move |conn| -> Result<usize, rusqlite::Error> {
                let tx = conn.transaction()?;
                let mut refreshed = 0;
                for entry in &entries {
                    let exists = tx
                        .query_row("SELECT 1 FROM entries WHERE id = ?1", params![entry.id], |_| Ok(()))
                        .optional()?
                        .is_some();
                    if exists {
                        upsert_entry(&tx, entry, fts)?;
                        refreshed += 1;
                    }
                }
                if refreshed > 0 {
                    set_meta(&tx, "last_write", &Utc::now().to_rfc3339())?;
                }
                tx.commit()?;
                Ok(refreshed)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Fetch the mirrored entry for `id`.
    pub async fn get_entry(&self, id: &str) -> Result<Option<MemoryEntry>, MemoriaError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| -> Result<Option<MemoryEntry>, rusqlite::Error> {
                conn.query_row(
                    &format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?1"),
                    params![id],
                    row_to_entry,
                )
                .optional()
            })
            .await
            .map_err(map_tr_err)
    }

    /// Cosine search over enabled entries whose vector was produced by
    /// `model`. Keeps scores at or above `min_score`, best first.
    pub async fn search_vector(
        &self,
        query: &[f32],
        model: &str,
        limit: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredMatch>, MemoriaError> {
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let query = query.to_vec();
        let model = model.to_string();

        let mut hits = self
            .conn
            .call(move |conn| -> Result<Vec<ScoredMatch>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT v.entry_id, v.embedding FROM vectors v
                     JOIN entries e ON e.id = v.entry_id
                     WHERE e.enabled = 1 AND v.model = ?1",
                )?;
                let rows = stmt.query_map(params![model], |row| {
                    let id: String = row.get(0)?;
                    let blob: Vec<u8> = row.get(1)?;
                    Ok((id, blob))
                })?;

                let mut hits = Vec::new();
                for row in rows {
                    let (id, blob) = row?;
                    let score = cosine_similarity(&query, &blob_to_vec(&blob));
                    if score >= min_score {
                        hits.push(ScoredMatch::new(id, score, MatchType::Vector));
                    }
                }
                Ok(hits)
            })
            .await
            .map_err(map_tr_err)?;

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(limit);
        debug!(hits = hits.len(), "vector search");
        Ok(hits)
    }

    /// Keyword search over content and keywords of enabled entries.
    ///
    /// With FTS5, scores are bm25 relevance scaled so the best hit is 1.0.
    /// Without it, every substring hit scores 1.0.
    pub async fn search_keyword(
        &self,
        text: &str,
        limit: usize,
    ) -> Result<Vec<ScoredMatch>, MemoriaError> {
        let tokens = tokenize(text);
        if tokens.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let hits = if self.fts {
            self.search_fts(tokens, limit).await?
        } else {
            self.search_substring(tokens, limit).await?
        };
        debug!(hits = hits.len(), fts = self.fts, "keyword search");
        Ok(hits)
    }

    async fn search_fts(
        &self,
        tokens: Vec<String>,
        limit: usize,
    ) -> Result<Vec<ScoredMatch>, MemoriaError> {
        let query = tokens
            .iter()
            .map(|t| format!("\"{t}\""))
            .collect::<Vec<_>>()
            .join(" OR ");

        let ranked = self
            .conn
            .call(move |conn| -> Result<Vec<(String, f64)>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT entries_fts.id, bm25(entries_fts) AS rank FROM entries_fts
                     JOIN entries e ON e.id = entries_fts.id
                     WHERE entries_fts MATCH ?1 AND e.enabled = 1
                     ORDER BY rank LIMIT ?2",
                )?;
                let ranked = stmt
                    .query_map(params![query, limit as i64], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ranked)
            })
            .await
            .map_err(map_tr_err)?;

        Ok(normalize_bm25(ranked))
    }

    async fn search_substring(
        &self,
        tokens: Vec<String>,
        limit: usize,
    ) -> Result<Vec<ScoredMatch>, MemoriaError> {
        self.conn
            .call(move |conn| -> Result<Vec<ScoredMatch>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT id, content, keywords FROM entries
                     WHERE enabled = 1 ORDER BY importance DESC, id",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?;

                let mut hits = Vec::new();
                for row in rows {
                    let (id, content, keywords) = row?;
                    if contains_any(&content, &tokens) || contains_any(&keywords, &tokens) {
                        hits.push(ScoredMatch::new(id, SUBSTRING_SCORE, MatchType::Keyword));
                        if hits.len() == limit {
                            break;
                        }
                    }
                }
                Ok(hits)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Run vector and keyword search independently, each for `2 * limit`
    /// candidates, and fuse them with [`fuse_weighted`].
    ///
    /// Only vectors with positive similarity count as vector matches, so an
    /// entry found solely by keyword keeps its keyword tag and score.
    pub async fn hybrid_search(
        &self,
        query_vector: &[f32],
        model: &str,
        query_text: &str,
        limit: usize,
        options: HybridOptions,
    ) -> Result<Vec<ScoredMatch>, MemoriaError> {
        let candidates = limit.saturating_mul(2);
        let vector_hits = self
            .search_vector(query_vector, model, candidates, f32::MIN_POSITIVE)
            .await?;
        let keyword_hits = self.search_keyword(query_text, candidates).await?;
        Ok(fuse_weighted(&vector_hits, &keyword_hits, &options, limit))
    }

    /// Ids of indexed entries with no vector or a vector from another model.
    pub async fn entries_needing_embedding(
        &self,
        model: &str,
    ) -> Result<Vec<String>, MemoriaError> {
        let model = model.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<String>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT e.id FROM entries e
                     LEFT JOIN vectors v ON v.entry_id = e.id
                     WHERE v.entry_id IS NULL OR v.model != ?1
                     ORDER BY e.id",
                )?;
                let ids = stmt
                    .query_map(params![model], |row| row.get(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ids)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Every indexed entry id.
    pub async fn entry_ids(&self) -> Result<Vec<String>, MemoriaError> {
        self.conn
            .call(|conn| -> Result<Vec<String>, rusqlite::Error> {
                let mut stmt = conn.prepare("SELECT id FROM entries ORDER BY id")?;
                let ids = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ids)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Number of vectors tagged with `model`.
    pub async fn vector_count_for(&self, model: &str) -> Result<usize, MemoriaError> {
        let model = model.to_string();
        self.conn
            .call(move |conn| -> Result<i64, rusqlite::Error> {
                conn.query_row(
                    "SELECT COUNT(*) FROM vectors WHERE model = ?1",
                    params![model],
                    |row| row.get(0),
                )
            })
            .await
            .map(|n| n as usize)
            .map_err(map_tr_err)
    }

    pub async fn status(&self) -> Result<IndexStatus, MemoriaError> {
        let fts = self.fts;
        self.conn
            .call(move |conn| -> Result<IndexStatus, rusqlite::Error> {
                let entry_count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
                let vector_count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM vectors", [], |row| row.get(0))?;
                let model = get_meta(conn, "model")?;
                let last_write = get_meta(conn, "last_write")?
                    .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                    .map(|d| d.with_timezone(&Utc));
                Ok(IndexStatus {
                    entry_count: entry_count as usize,
                    vector_count: vector_count as usize,
                    model,
                    last_write,
                    fts_enabled: fts,
                })
            })
            .await
            .map_err(map_tr_err)
    }

    /// Remove every entry, vector and metadata row.
    pub async fn clear(&self) -> Result<(), MemoriaError> {
        let fts = self.fts;
        self.conn
            .call(move |conn| -> Result<(), rusqlite::Error> {
                let tx = conn.transaction()?;
                if fts {
                    tx.execute("DELETE FROM entries_fts", [])?;
                }
                tx.execute("DELETE FROM vectors", [])?;
                tx.execute("DELETE FROM entries", [])?;
                tx.execute("DELETE FROM index_meta", [])?;
                tx.commit()
            })
            .await
            .map_err(map_tr_err)
    }
}

/// Create the FTS5 projection and backfill it if it drifted from `entries`
/// (for example after the index was used without FTS).
fn ensure_fts(conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS entries_fts
         USING fts5(id UNINDEXED, content, keywords, tokenize = 'trigram');",
    )?;

    let indexed: i64 = conn.query_row("SELECT COUNT(*) FROM entries_fts", [], |r| r.get(0))?;
    let entries: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |r| r.get(0))?;
    if indexed != entries {
        debug!(indexed, entries, "rebuilding keyword projection");
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM entries_fts", [])?;
        let mut stmt = tx.prepare("SELECT id, content, keywords FROM entries")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        for (id, content, keywords_json) in rows {
            let keywords: Vec<String> = serde_json::from_str(&keywords_json).unwrap_or_default();
            tx.execute(
                "INSERT INTO entries_fts (id, content, keywords) VALUES (?1, ?2, ?3)",
                params![id, content, keywords.join(" ")],
            )?;
        }
        tx.commit()?;
    }
    Ok(())
}

fn upsert_entry(tx: &Transaction<'_>, entry: &MemoryEntry, fts: bool) -> Result<(), rusqlite::Error> {
    let keywords = serde_json::to_string(&entry.keywords)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

    tx.execute(
        "INSERT INTO entries (id, content, created_at, last_accessed_at, access_count,
                              entry_type, keywords, importance, category, source, enabled)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(id) DO UPDATE SET
            content = excluded.content,
            last_accessed_at = excluded.last_accessed_at,
            access_count = excluded.access_count,
            entry_type = excluded.entry_type,
            keywords = excluded.keywords,
            importance = excluded.importance,
            category = excluded.category,
            source = excluded.source,
            enabled = excluded.enabled",
        params![
            entry.id,
            entry.content,
            entry.created_at.to_rfc3339(),
            entry.last_accessed_at.to_rfc3339(),
            entry.access_count as i64,
            entry.entry_type.to_string(),
            keywords,
            entry.importance,
            entry.category,
            entry.source,
            entry.enabled,
        ],
    )?;

    if fts {
        tx.execute("DELETE FROM entries_fts WHERE id = ?1", params![entry.id])?;
        tx.execute(
            "INSERT INTO entries_fts (id, content, keywords) VALUES (?1, ?2, ?3)",
            params![entry.id, entry.content, entry.keywords.join(" ")],
        )?;
    }
    Ok(())
}

fn set_meta(tx: &Transaction<'_>, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    tx.execute(
        "INSERT INTO index_meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

fn get_meta(conn: &rusqlite::Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM index_meta WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

/// bm25 ranks are negative, more negative meaning more relevant. Flip the
/// sign and scale by the best hit so scores land in (0, 1].
fn normalize_bm25(ranked: Vec<(String, f64)>) -> Vec<ScoredMatch> {
    let best = ranked
        .iter()
        .map(|(_, rank)| -rank)
        .fold(0.0_f64, f64::max);

    ranked
        .into_iter()
        .map(|(id, rank)| {
            let score = if best > 0.0 {
                ((-rank) / best).clamp(f64::from(f32::EPSILON), 1.0)
            } else {
                1.0
            };
            ScoredMatch::new(id, score as f32, MatchType::Keyword)
        })
        .collect()
}

fn conversion_err(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_timestamp(idx: usize, value: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

/// Map a row selected with [`ENTRY_COLUMNS`] to a `MemoryEntry`.
fn row_to_entry(row: &rusqlite::Row<'_>) -> Result<MemoryEntry, rusqlite::Error> {
    let created_at: String = row.get(2)?;
    let last_accessed_at: String = row.get(3)?;
    let entry_type: String = row.get(5)?;
    let keywords: String = row.get(6)?;
    let access_count: i64 = row.get(4)?;

    Ok(MemoryEntry {
        id: row.get(0)?,
        content: row.get(1)?,
        created_at: parse_timestamp(2, &created_at)?,
        last_accessed_at: parse_timestamp(3, &last_accessed_at)?,
        access_count: access_count.max(0) as u64,
        entry_type: entry_type
            .parse::<EntryType>()
            .map_err(|e| conversion_err(5, e))?,
        keywords: serde_json::from_str(&keywords).map_err(|e| conversion_err(6, e))?,
        importance: row.get(7)?,
        category: row.get(8)?,
        source: row.get(9)?,
        enabled: row.get(10)?,
    })
}
