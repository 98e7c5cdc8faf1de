// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Completion trait used by LLM-based memory extraction.

use async_trait::async_trait;

use crate::error::MemoriaError;

/// A "complete this prompt" capability supplied by the host.
///
/// The engine never talks to an LLM API directly; extraction sends one
/// prompt through this trait and parses the returned text.
#[async_trait]
pub trait CompletionAdapter: Send + Sync {
    /// Completes `prompt` and returns the model's raw text output.
    async fn complete(&self, prompt: &str) -> Result<String, MemoriaError>;
}
