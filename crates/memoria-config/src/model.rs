// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Memoria memory engine.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Top-level Memoria configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MemoriaConfig {
    /// Process-level settings (logging).
    #[serde(default)]
    pub agent: AgentConfig,

    /// Where book documents and index databases live.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Embedding backend selection and credentials.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Hybrid search weights.
    #[serde(default)]
    pub search: SearchConfig,

    /// Defaults applied to newly created memory books.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Automatic memory extraction.
    #[serde(default)]
    pub extraction: ExtractionConfig,
}

/// Process-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage locations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Root data directory. Books go to `<data_dir>/books`, indexes to
    /// `<data_dir>/index`, local models to `<data_dir>/models`.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    pub fn books_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("books")
    }

    pub fn index_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("index")
    }

    pub fn models_dir(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("models")
    }
}

fn default_data_dir() -> String {
    dirs::data_dir()
        .map(|p| p.join("memoria"))
        .unwrap_or_else(|| PathBuf::from(".memoria"))
        .to_string_lossy()
        .into_owned()
}

/// Embedding backend identifier.
///
/// `Auto` tries local, OpenAI, then Ollama and uses the first one that
/// can be constructed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    Auto,
    Local,
    OpenAi,
    Ollama,
    None,
}

/// Embedding backend selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingConfig {
    /// Which backend to use (`auto`, `local`, `openai`, `ollama`, `none`).
    #[serde(default = "default_backend")]
    pub backend: EmbeddingBackend,

    /// Backend tried once when an explicitly named backend fails to construct.
    #[serde(default)]
    pub fallback: Option<EmbeddingBackend>,

    /// Model override. When unset, each backend uses its own default model.
    #[serde(default)]
    pub model: Option<String>,

    /// Per-request timeout for remote backends.
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub openai: OpenAiEmbeddingConfig,

    #[serde(default)]
    pub ollama: OllamaEmbeddingConfig,

    #[serde(default)]
    pub local: LocalEmbeddingConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            fallback: None,
            model: None,
            timeout_secs: default_embedding_timeout_secs(),
            openai: OpenAiEmbeddingConfig::default(),
            ollama: OllamaEmbeddingConfig::default(),
            local: LocalEmbeddingConfig::default(),
        }
    }
}

fn default_backend() -> EmbeddingBackend {
    EmbeddingBackend::Auto
}

fn default_embedding_timeout_secs() -> u64 {
    30
}

/// OpenAI-compatible `/embeddings` endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OpenAiEmbeddingConfig {
    /// API key. Falls back to the `OPENAI_API_KEY` environment variable.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    #[serde(default = "default_openai_model")]
    pub model: String,
}

impl Default for OpenAiEmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_openai_base_url(),
            model: default_openai_model(),
        }
    }
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "text-embedding-3-small".to_string()
}

/// Ollama `/api/embed` endpoint. Only usable once `base_url` is set.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OllamaEmbeddingConfig {
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_ollama_model")]
    pub model: String,
}

impl Default for OllamaEmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: default_ollama_model(),
        }
    }
}

fn default_ollama_model() -> String {
    "nomic-embed-text".to_string()
}

/// In-process ONNX model.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LocalEmbeddingConfig {
    /// Directory holding `model.onnx` and `tokenizer.json`. Defaults to
    /// `<data_dir>/models/all-MiniLM-L6-v2`.
    #[serde(default)]
    pub model_dir: Option<String>,

    /// Download the model from HuggingFace when the local backend is
    /// explicitly selected and the files are missing. `auto` never downloads.
    #[serde(default)]
    pub auto_download: bool,
}

/// Hybrid search weights.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SearchConfig {
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,

    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f32,

    /// Minimum combined score for a hybrid result to be kept.
    #[serde(default = "default_min_score")]
    pub min_score: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            vector_weight: default_vector_weight(),
            keyword_weight: default_keyword_weight(),
            min_score: default_min_score(),
        }
    }
}

fn default_vector_weight() -> f32 {
    0.7
}

fn default_keyword_weight() -> f32 {
    0.3
}

fn default_min_score() -> f32 {
    0.15
}

/// Ordering applied to retrieved memories.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    Importance,
    Recency,
    AccessCount,
}

/// Retrieval defaults copied into each new book's settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_memories_per_request")]
    pub max_memories_per_request: usize,

    #[serde(default = "default_max_memory_tokens")]
    pub max_memory_tokens: usize,

    #[serde(default = "default_true")]
    pub use_keyword_retrieval: bool,

    #[serde(default = "default_min_importance")]
    pub min_importance: u8,

    #[serde(default = "default_sort_by")]
    pub sort_by: SortBy,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_memories_per_request: default_max_memories_per_request(),
            max_memory_tokens: default_max_memory_tokens(),
            use_keyword_retrieval: default_true(),
            min_importance: default_min_importance(),
            sort_by: default_sort_by(),
        }
    }
}

fn default_max_memories_per_request() -> usize {
    10
}

fn default_max_memory_tokens() -> usize {
    1000
}

fn default_min_importance() -> u8 {
    50
}

fn default_sort_by() -> SortBy {
    SortBy::Importance
}

fn default_true() -> bool {
    true
}

/// When automatic extraction runs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    Off,
    Trigger,
    Auto,
}

/// Automatic memory extraction.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractionConfig {
    #[serde(default = "default_extraction_mode")]
    pub mode: ExtractionMode,

    /// Case-insensitive regular expressions matched against user messages.
    #[serde(default = "default_triggers")]
    pub triggers: Vec<String>,

    /// Similarity at or above which a candidate is treated as a duplicate.
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f32,

    /// Number of trailing messages included in the extraction prompt.
    #[serde(default = "default_recent_turns")]
    pub recent_turns: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            mode: default_extraction_mode(),
            triggers: default_triggers(),
            dedup_threshold: default_dedup_threshold(),
            recent_turns: default_recent_turns(),
        }
    }
}

fn default_extraction_mode() -> ExtractionMode {
    ExtractionMode::Trigger
}

fn default_triggers() -> Vec<String> {
    [
        r"\bremember\b",
        r"\bdon'?t forget\b",
        r"\bkeep in mind\b",
        "记住",
        "别忘了",
        "不要忘记",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_dedup_threshold() -> f32 {
    0.85
}

fn default_recent_turns() -> usize {
    6
}
