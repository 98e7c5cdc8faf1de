// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Memoria memory engine.

use thiserror::Error;

/// The primary error type used across all Memoria adapter traits and core operations.
#[derive(Debug, Error)]
pub enum MemoriaError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (book files, index database, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Embedding backend errors (construction, HTTP failure, bad response shape).
    #[error("embedding error: {message}")]
    Embedding {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Completion provider errors raised by the extraction LLM call.
    #[error("provider error: {message}")]
    Provider {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A book or entry the operation requires does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    /// Caller violated an input contract (empty content, mismatched batch).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl MemoriaError {
    /// Wrap any storage-layer error.
    pub fn storage(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        MemoriaError::Storage {
            source: Box::new(e),
        }
    }

    /// Build an embedding error without an underlying source.
    pub fn embedding(message: impl Into<String>) -> Self {
        MemoriaError::Embedding {
            message: message.into(),
            source: None,
        }
    }
}
