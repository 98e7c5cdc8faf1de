// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable character and session memory for conversational agents.
//!
//! Memories live in books, one per character or session. Each book is a
//! JSON document on disk (the canonical copy) plus a SQLite index holding
//! vectors and a full-text projection. Retrieval works with or without an
//! embedding backend.
//!
//! ## Architecture
//!
//! - **types**: `MemoryEntry`, `MemoryBook`, settings, vector helpers
//! - **embedding**: OpenAI, Ollama and local ONNX backends behind
//!   `EmbeddingProvider`, selected and cached by `ProviderRegistry`
//! - **index**: per-book `VectorIndex` with vector, keyword and hybrid search
//! - **book_store**: atomic JSON persistence for books
//! - **manager**: `MemoryManager`, the entry point for every write
//! - **retriever**: `MemoryRetriever`, ranked and budget-limited recall
//! - **extractor**: LLM and trigger-phrase extraction with dedup
//! - **provider**: `MemoryProvider` hooks for prompt assembly

pub mod book_store;
pub mod embedding;
pub mod extractor;
pub mod index;
pub mod manager;
pub mod model_manager;
pub mod provider;
pub mod retriever;
pub mod text;
pub mod types;

pub use book_store::BookStore;
pub use embedding::{EmbeddingProvider, ProviderRegistry};
pub use extractor::{ExtractionContext, MemoryCandidate, MemoryExtractor, TriggerExtractor};
pub use index::{HybridOptions, IndexRegistry, IndexStatus, MatchType, ScoredMatch, VectorIndex};
pub use manager::{MemoryManager, SyncReport};
pub use model_manager::ModelManager;
pub use provider::MemoryProvider;
pub use retriever::{MemoryRetriever, RetrievalMethod, RetrievalResult, RetrieveOptions};
pub use types::*;
