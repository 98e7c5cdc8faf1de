// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding adapter trait for vector embedding generation.

use async_trait::async_trait;

use crate::error::MemoriaError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{EmbeddingInput, EmbeddingOutput};

/// Adapter for generating vector embeddings from text.
///
/// Implementations must return one embedding per input text, in input order.
/// Normalization is applied by the caller, so raw model output is acceptable.
#[async_trait]
pub trait EmbeddingAdapter: PluginAdapter {
    /// Name of the model that produces this adapter's vectors.
    fn model(&self) -> &str;

    /// Generates embeddings for the given input.
    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, MemoriaError>;
}
