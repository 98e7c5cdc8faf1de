// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prompt-assembly hooks for a hosting agent runtime.
//!
//! `provide_context` is called before a turn and returns a prompt fragment;
//! `on_turn_end` is called after it and may extract new memories. Neither
//! ever fails: errors are logged and yield an empty result so the
//! conversation is never blocked by the memory layer.

use std::sync::Arc;

use memoria_config::model::ExtractionMode;
use memoria_core::{CompletionAdapter, ConversationMessage, MemoriaError};
use tracing::warn;

use crate::extractor::{ExtractionContext, MemoryExtractor, TriggerExtractor};
use crate::manager::MemoryManager;
use crate::retriever::{MemoryRetriever, RetrieveOptions};
use crate::types::{BookIdentity, MemoryEntry};

/// Retrieval and extraction bound to the book of each identity.
pub struct MemoryProvider {
    manager: Arc<MemoryManager>,
    retriever: MemoryRetriever,
    extractor: Option<MemoryExtractor>,
    trigger_extractor: TriggerExtractor,
}

impl MemoryProvider {
    /// Without a completion backend, extraction uses trigger phrases only.
    pub fn new(manager: Arc<MemoryManager>) -> Result<Self, MemoriaError> {
        let trigger_extractor = TriggerExtractor::new(&manager.extraction_config().triggers)?;
        Ok(Self {
            retriever: MemoryRetriever::new(Arc::clone(&manager)),
            extractor: None,
            trigger_extractor,
            manager,
        })
    }

    pub fn with_completion(
        manager: Arc<MemoryManager>,
        completion: Arc<dyn CompletionAdapter>,
    ) -> Result<Self, MemoriaError> {
        let mut provider = Self::new(Arc::clone(&manager))?;
        provider.extractor = Some(MemoryExtractor::new(manager, completion)?);
        Ok(provider)
    }

    pub fn manager(&self) -> &Arc<MemoryManager> {
        &self.manager
    }

    /// The memory fragment for this identity's book, rendered under the
    /// book's token budget. Empty when nothing is relevant or on error.
    pub async fn provide_context(&self, identity: &BookIdentity, context: &str) -> String {
        match self.try_provide_context(identity, context).await {
            Ok(fragment) => fragment,
            Err(e) => {
                warn!(error = %e, "memory retrieval failed, continuing without memories");
                String::new()
            }
        }
    }

    async fn try_provide_context(
        &self,
        identity: &BookIdentity,
        context: &str,
    ) -> Result<String, MemoriaError> {
        let book = self.manager.get_or_create_memory_book(identity).await?;
        let result = self
            .retriever
            .retrieve_memories_with_vector(&book.id, context, &RetrieveOptions::default())
            .await?;
        Ok(result.to_prompt(book.settings.max_memory_tokens))
    }

    /// Extract memories from the finished turn when extraction is enabled
    /// both globally and for the book. Returns what was stored.
    pub async fn on_turn_end(
        &self,
        identity: &BookIdentity,
        messages: &[ConversationMessage],
    ) -> Vec<MemoryEntry> {
        if self.manager.extraction_config().mode == ExtractionMode::Off || messages.is_empty() {
            return Vec::new();
        }
        match self.try_on_turn_end(identity, messages).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "memory extraction failed");
                Vec::new()
            }
        }
    }

    async fn try_on_turn_end(
        &self,
        identity: &BookIdentity,
        messages: &[ConversationMessage],
    ) -> Result<Vec<MemoryEntry>, MemoriaError> {
        let book = self.manager.get_or_create_memory_book(identity).await?;
        if !book.settings.auto_extract {
            return Ok(Vec::new());
        }

        match &self.extractor {
            Some(extractor) => {
                let context = ExtractionContext {
                    character_name: identity.character_name.clone(),
                    user_name: None,
                };
                extractor.extract_and_store(&book.id, messages, &context).await
            }
            None => {
                self.trigger_extractor
                    .extract_and_store(&self.manager, &book.id, messages)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use memoria_config::model::{EmbeddingBackend, MemoriaConfig};
    use memoria_test_utils::MockCompletion;

    use super::*;
    use crate::types::MemoryBookSettings;

    fn config(dir: &std::path::Path, mode: ExtractionMode) -> MemoriaConfig {
        let mut config = MemoriaConfig::default();
        config.storage.data_dir = dir.to_string_lossy().into_owned();
        config.embedding.backend = EmbeddingBackend::None;
        config.extraction.mode = mode;
        config
    }

    async fn enable_auto_extract(manager: &MemoryManager, identity: &BookIdentity) {
        let book = manager.get_or_create_memory_book(identity).await.unwrap();
        manager
            .update_settings(
                &book.id,
                MemoryBookSettings {
                    auto_extract: true,
                    ..book.settings
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn provide_context_renders_relevant_memories() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(MemoryManager::new(&config(dir.path(), ExtractionMode::Off)));
        let identity = BookIdentity::character("c1", "Aria");
        let book = manager.get_or_create_memory_book(&identity).await.unwrap();
        manager
            .add_memory(
                &book.id,
                MemoryEntry::manual("Sam is afraid of spiders")
                    .with_importance(70)
                    .with_category("fact"),
            )
            .await
            .unwrap();
        let provider = MemoryProvider::new(manager).unwrap();

        let fragment = provider
            .provide_context(&identity, "there's a big spider on the wall")
            .await;
        assert_eq!(fragment, "## Memories\n- [fact] Sam is afraid of spiders");

        let nothing = provider.provide_context(&identity, "talk about cooking").await;
        assert_eq!(nothing, "");
    }

    #[tokio::test]
    async fn provide_context_swallows_errors() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let manager = Arc::new(MemoryManager::new(&config(&blocker, ExtractionMode::Trigger)));
        let provider = MemoryProvider::new(manager).unwrap();
        let identity = BookIdentity::character("c1", "Aria");

        assert_eq!(provider.provide_context(&identity, "hello there").await, "");
        assert!(
            provider
                .on_turn_end(&identity, &[ConversationMessage::user("remember this")])
                .await
                .is_empty()
        );
    }

    #[tokio::test]
    async fn on_turn_end_respects_book_setting() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(MemoryManager::new(&config(dir.path(), ExtractionMode::Trigger)));
        let provider = MemoryProvider::new(Arc::clone(&manager)).unwrap();
        let identity = BookIdentity::session("s-1");
        let messages = [ConversationMessage::user("Remember that my flight is on Monday")];

        assert!(provider.on_turn_end(&identity, &messages).await.is_empty());

        enable_auto_extract(&manager, &identity).await;
        let stored = provider.on_turn_end(&identity, &messages).await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].category.as_deref(), Some("user-stated"));
    }

    #[tokio::test]
    async fn on_turn_end_uses_completion_when_available() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(MemoryManager::new(&config(dir.path(), ExtractionMode::Auto)));
        let identity = BookIdentity::character("c2", "Bram");
        enable_auto_extract(&manager, &identity).await;

        let completion = Arc::new(MockCompletion::new([
            r#"[{"content": "User is learning Portuguese", "importance": 7, "category": "fact"}]"#,
        ]));
        let provider = MemoryProvider::with_completion(manager, completion.clone()).unwrap();

        let stored = provider
            .on_turn_end(&identity, &[ConversationMessage::user("Olá! I'm practising.")])
            .await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "User is learning Portuguese");
        assert!(completion.prompts()[0].contains("Bram"));
    }

    #[tokio::test]
    async fn off_mode_skips_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(MemoryManager::new(&config(dir.path(), ExtractionMode::Off)));
        let identity = BookIdentity::session("s-2");
        enable_auto_extract(&manager, &identity).await;
        let provider = MemoryProvider::new(manager).unwrap();

        let stored = provider
            .on_turn_end(&identity, &[ConversationMessage::user("remember my PIN hint")])
            .await;
        assert!(stored.is_empty());
    }
}
