// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end integration testing.
//!
//! `TestHarness` assembles a complete memory stack over a temp data
//! directory: book store, index registry and an embedding provider (a
//! mock, or none at all). The directory is removed on drop.

use std::sync::Arc;

use memoria_config::model::{EmbeddingBackend, ExtractionMode, MemoriaConfig};
use memoria_core::{CompletionAdapter, EmbeddingAdapter, MemoriaError};
use memoria_memory::{
    BookStore, EmbeddingProvider, IndexRegistry, MemoryManager, MemoryProvider, MemoryRetriever,
    ProviderRegistry,
};

use crate::mock_completion::MockCompletion;

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    embedder: Option<Arc<dyn EmbeddingAdapter>>,
    responses: Vec<String>,
    extraction_mode: ExtractionMode,
    config: MemoriaConfig,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        let mut config = MemoriaConfig::default();
        config.embedding.backend = EmbeddingBackend::None;
        Self {
            embedder: None,
            responses: Vec::new(),
            extraction_mode: ExtractionMode::Trigger,
            config,
        }
    }

    /// Use `embedder` for every vector operation.
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingAdapter>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Set mock completion responses for LLM extraction.
    pub fn with_completion_responses(mut self, responses: Vec<String>) -> Self {
        self.responses = responses;
        self
    }

    pub fn with_extraction_mode(mut self, mode: ExtractionMode) -> Self {
        self.extraction_mode = mode;
        self
    }

    /// Start from a custom configuration. The data directory and
    /// embedding backend are still overridden by the harness.
    pub fn with_config(mut self, config: MemoriaConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the test harness, creating the temp data directory.
    pub fn build(self) -> Result<TestHarness, MemoriaError> {
        let temp_dir = tempfile::TempDir::new().map_err(MemoriaError::storage)?;

        let mut config = self.config;
        config.storage.data_dir = temp_dir.path().to_string_lossy().into_owned();
        config.embedding.backend = EmbeddingBackend::None;
        config.extraction.mode = self.extraction_mode;

        let providers = match self.embedder {
            Some(embedder) => ProviderRegistry::with_provider(EmbeddingProvider::new(embedder)),
            None => ProviderRegistry::disabled(),
        };
        let manager = Arc::new(MemoryManager::with_registries(
            BookStore::new(config.storage.books_dir()),
            IndexRegistry::new(config.storage.index_dir()),
            providers,
            &config,
        ));

        tracing::debug!(data_dir = %config.storage.data_dir, "test harness ready");

        Ok(TestHarness {
            manager,
            completion: Arc::new(MockCompletion::new(self.responses)),
            config,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete memory stack over a temp directory.
pub struct TestHarness {
    /// The manager every component shares.
    pub manager: Arc<MemoryManager>,
    /// Mock LLM used by [`TestHarness::provider_with_completion`].
    pub completion: Arc<MockCompletion>,
    /// Effective configuration, pointing at the temp directory.
    pub config: MemoriaConfig,
    /// Temp directory kept alive for cleanup on drop.
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    /// Create a new builder for configuring the test harness.
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    pub fn retriever(&self) -> MemoryRetriever {
        MemoryRetriever::new(Arc::clone(&self.manager))
    }

    /// A provider that extracts with trigger phrases only.
    pub fn provider(&self) -> Result<MemoryProvider, MemoriaError> {
        MemoryProvider::new(Arc::clone(&self.manager))
    }

    /// A provider that extracts through the mock completion adapter.
    pub fn provider_with_completion(&self) -> Result<MemoryProvider, MemoriaError> {
        let completion: Arc<dyn CompletionAdapter> = self.completion.clone();
        MemoryProvider::with_completion(Arc::clone(&self.manager), completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_embedder::MockEmbedder;

    #[tokio::test]
    async fn builder_creates_working_environment() {
        let harness = TestHarness::builder().build().unwrap();
        assert!(harness.manager.list_books().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn temp_dirs_are_unique_per_harness() {
        let h1 = TestHarness::builder().build().unwrap();
        let h2 = TestHarness::builder().build().unwrap();

        h1.manager.create_memory_book("one", None, None).await.unwrap();
        assert_eq!(h1.manager.list_books().await.unwrap().len(), 1);
        assert!(h2.manager.list_books().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn with_embedder_pins_the_provider() {
        let harness = TestHarness::builder()
            .with_embedder(Arc::new(MockEmbedder::new(8)))
            .build()
            .unwrap();
        let provider = harness.manager.providers().resolve().await.unwrap().unwrap();
        assert_eq!(provider.model(), "mock-embed");
    }
}
