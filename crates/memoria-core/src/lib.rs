// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Memoria memory engine.
//!
//! This crate provides the foundational trait definitions, error types, and
//! common types shared by the engine, the configuration layer, and any host
//! that embeds the engine. Embedding backends and completion clients
//! implement the traits defined here.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::MemoriaError;
pub use types::{ConversationMessage, EmbeddingInput, EmbeddingOutput, HealthStatus, Role};

// Re-export all adapter traits at crate root.
pub use traits::{CompletionAdapter, EmbeddingAdapter, PluginAdapter};
