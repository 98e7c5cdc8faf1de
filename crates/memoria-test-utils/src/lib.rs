// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Memoria integration tests.
//!
//! Provides mock adapters and test harness infrastructure for fast,
//! deterministic, CI-runnable tests without model downloads or network calls.
//!
//! # Components
//!
//! - [`MockEmbedder`] - Deterministic bag-of-words embedding adapter
//! - [`FailingEmbedder`] - Embedding adapter that always errors
//! - [`MockCompletion`] - Completion adapter with pre-configured responses
//! - [`TestHarness`] - Temp data directory plus a wired `MemoryManager`

pub mod harness;
pub mod mock_completion;
pub mod mock_embedder;

pub use harness::TestHarness;
pub use mock_completion::MockCompletion;
pub use mock_embedder::{FailingEmbedder, MockEmbedder};
