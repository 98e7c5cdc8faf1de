// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Memory domain types: entries, books, settings, and vector helpers.

use chrono::{DateTime, Utc};
use memoria_config::model::{RetrievalConfig, SortBy};
use serde::{Deserialize, Deserializer, Serialize};
use strum::{Display, EnumString};

/// Default importance for new entries.
pub const DEFAULT_IMPORTANCE: u8 = 50;

/// How an entry came into existence.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// Added explicitly by a user or operator.
    Manual,
    /// Proposed by the auto-extractor.
    Auto,
}

/// A single remembered fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// Number of times this entry was returned by retrieval. Never decreases.
    #[serde(default)]
    pub access_count: u64,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// 0-100; values outside the range are clamped on load, construction
    /// and update.
    #[serde(default = "default_importance", deserialize_with = "deserialize_importance")]
    pub importance: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_importance() -> u8 {
    DEFAULT_IMPORTANCE
}

/// Accepts any integer from hand-edited documents and clamps it to 0-100.
fn deserialize_importance<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    i64::deserialize(deserializer).map(clamp_importance)
}

fn default_enabled() -> bool {
    true
}

impl MemoryEntry {
    /// A fresh entry with a new id and default metadata.
    pub fn new(content: impl Into<String>, entry_type: EntryType) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            entry_type,
            keywords: Vec::new(),
            importance: DEFAULT_IMPORTANCE,
            category: None,
            source: None,
            enabled: true,
        }
    }

    pub fn manual(content: impl Into<String>) -> Self {
        Self::new(content, EntryType::Manual)
    }

    pub fn auto(content: impl Into<String>) -> Self {
        Self::new(content, EntryType::Auto)
    }

    pub fn with_importance(mut self, importance: i64) -> Self {
        self.importance = clamp_importance(importance);
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Record one retrieval hit.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed_at = now;
        self.access_count = self.access_count.saturating_add(1);
    }

    /// Rough token estimate used by the prompt budget (4 chars per token).
    pub fn estimated_tokens(&self) -> usize {
        self.content.chars().count().div_ceil(4)
    }
}

/// Clamp an arbitrary integer into the 0-100 importance range.
pub fn clamp_importance(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}

/// Partial update applied by `MemoryManager::update_memory`.
#[derive(Debug, Clone, Default)]
pub struct MemoryEntryPatch {
    pub content: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub importance: Option<i64>,
    /// `Some(None)` clears the category.
    pub category: Option<Option<String>>,
    pub enabled: Option<bool>,
}

impl MemoryEntryPatch {
    /// Apply the patch. Returns true when the content changed.
    pub fn apply(self, entry: &mut MemoryEntry) -> bool {
        let mut content_changed = false;
        if let Some(content) = self.content
            && content != entry.content
        {
            entry.content = content;
            content_changed = true;
        }
        if let Some(keywords) = self.keywords {
            entry.keywords = keywords;
        }
        if let Some(importance) = self.importance {
            entry.importance = clamp_importance(importance);
        }
        if let Some(category) = self.category {
            entry.category = category;
        }
        if let Some(enabled) = self.enabled {
            entry.enabled = enabled;
        }
        content_changed
    }
}

/// Per-book retrieval settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryBookSettings {
    pub max_memories_per_request: usize,
    pub max_memory_tokens: usize,
    pub use_keyword_retrieval: bool,
    pub auto_extract: bool,
    #[serde(deserialize_with = "deserialize_importance")]
    pub min_importance_for_injection: u8,
    pub sort_by: SortBy,
}

impl Default for MemoryBookSettings {
    fn default() -> Self {
        Self {
            max_memories_per_request: 10,
            max_memory_tokens: 1000,
            use_keyword_retrieval: true,
            auto_extract: false,
            min_importance_for_injection: 50,
            sort_by: SortBy::Importance,
        }
    }
}

impl From<&RetrievalConfig> for MemoryBookSettings {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            max_memories_per_request: config.max_memories_per_request,
            max_memory_tokens: config.max_memory_tokens,
            use_keyword_retrieval: config.use_keyword_retrieval,
            auto_extract: false,
            min_importance_for_injection: config.min_importance.min(100),
            sort_by: config.sort_by,
        }
    }
}

/// The retrieval scope for one character or session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryBook {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub entries: Vec<MemoryEntry>,
    #[serde(default)]
    pub settings: MemoryBookSettings,
}

impl MemoryBook {
    pub fn new(name: impl Into<String>, settings: MemoryBookSettings) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            character_id: None,
            session_key: None,
            created_at: now,
            updated_at: now,
            entries: Vec::new(),
            settings,
        }
    }

    pub fn entry(&self, id: &str) -> Option<&MemoryEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn entry_mut(&mut self, id: &str) -> Option<&mut MemoryEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    pub fn enabled_entries(&self) -> impl Iterator<Item = &MemoryEntry> {
        self.entries.iter().filter(|e| e.enabled)
    }
}

/// Identifying fields used to find or create a book.
#[derive(Debug, Clone, Default)]
pub struct BookIdentity {
    pub character_id: Option<String>,
    pub character_name: Option<String>,
    pub session_key: Option<String>,
}

impl BookIdentity {
    pub fn character(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            character_id: Some(id.into()),
            character_name: Some(name.into()),
            session_key: None,
        }
    }

    pub fn session(key: impl Into<String>) -> Self {
        Self {
            session_key: Some(key.into()),
            ..Self::default()
        }
    }

    /// Display name for a newly created book.
    pub fn book_name(&self) -> String {
        non_empty(&self.character_name)
            .or_else(|| non_empty(&self.character_id))
            .map(|n| format!("{n} Memories"))
            .or_else(|| non_empty(&self.session_key).map(|k| format!("Session {k}")))
            .unwrap_or_else(|| "Default Memory Book".to_string())
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Convert f32 vector to bytes for SQLite BLOB storage (4-byte little-endian per value).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert SQLite BLOB back to f32 vector. Trailing bytes that do not form
/// a whole value are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// L2-normalize a vector. Vectors with negligible magnitude become all-zero.
pub fn l2_normalize(vec: &[f32]) -> Vec<f32> {
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        vec.iter().map(|v| v / norm).collect()
    } else {
        vec![0.0; vec.len()]
    }
}

/// Cosine similarity. Vectors of unequal length, or with zero magnitude,
/// score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut mag_a = 0.0_f32;
    let mut mag_b = 0.0_f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }

    let denom = mag_a.sqrt() * mag_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}
