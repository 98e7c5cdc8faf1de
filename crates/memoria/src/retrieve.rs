// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `memoria retrieve`, `memoria context` and `memoria extract`.

use std::sync::Arc;

use clap::Args;
use memoria_config::model::SortBy;
use memoria_core::{ConversationMessage, MemoriaError};
use memoria_memory::{
    BookIdentity, MemoryEntry, MemoryManager, MemoryProvider, MemoryRetriever, RetrievalResult,
    RetrieveOptions, TriggerExtractor,
};
use serde::Serialize;

use crate::books::require_book;
use crate::output::Output;

#[derive(Args, Debug)]
pub struct RetrieveArgs {
    pub book: String,
    /// Conversation text to match against.
    pub context: String,
    #[arg(long)]
    pub max_results: Option<usize>,
    #[arg(long)]
    pub min_importance: Option<u8>,
    #[arg(long)]
    pub sort_by: Option<SortBy>,
    /// Skip the index and embedding backend entirely.
    #[arg(long)]
    pub offline: bool,
    /// Return every enabled entry instead of keyword matches.
    #[arg(long)]
    pub no_keywords: bool,
    /// Print the rendered prompt fragment instead of a listing.
    #[arg(long)]
    pub prompt: bool,
}

impl RetrieveArgs {
    fn options(&self) -> RetrieveOptions {
        RetrieveOptions {
            max_results: self.max_results,
            min_importance: self.min_importance,
            sort_by: self.sort_by,
            use_keyword_retrieval: self.no_keywords.then_some(false),
        }
    }
}

/// Run `memoria retrieve`.
pub async fn run_retrieve(
    manager: Arc<MemoryManager>,
    out: &Output,
    args: RetrieveArgs,
) -> Result<RetrievalResult, MemoriaError> {
    let book = require_book(&manager, &args.book).await?;
    let retriever = MemoryRetriever::new(manager);
    let options = args.options();
    let result = if args.offline {
        retriever
            .retrieve_memories(&args.book, &args.context, &options)
            .await?
    } else {
        retriever
            .retrieve_memories_with_vector(&args.book, &args.context, &options)
            .await?
    };

    if args.prompt {
        println!("{}", result.to_prompt(book.settings.max_memory_tokens));
    } else if out.json {
        out.print_json(&result)?;
    } else {
        out.heading(&format!("memories for {}", book.name));
        out.field("Method", result.method);
        out.field(
            "Returned",
            format!("{} of {}", result.entries.len(), result.total_candidates),
        );
        println!();
        for entry in &result.entries {
            out.entry(entry);
        }
        println!();
    }
    Ok(result)
}

#[derive(Args, Debug)]
pub struct ContextArgs {
    /// Conversation text to match against.
    pub context: String,
    #[arg(long, required_unless_present = "session")]
    pub character: Option<String>,
    /// Character display name, used when the book is first created.
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub session: Option<String>,
}

impl ContextArgs {
    fn identity(&self) -> BookIdentity {
        BookIdentity {
            character_id: self.character.clone(),
            character_name: self.name.clone(),
            session_key: self.session.clone(),
        }
    }
}

/// Run `memoria context`: what a hosting runtime would inject for this
/// identity. Creates the book if needed.
pub async fn run_context(
    manager: Arc<MemoryManager>,
    out: &Output,
    args: ContextArgs,
) -> Result<String, MemoriaError> {
    let provider = MemoryProvider::new(manager)?;
    let fragment = provider.provide_context(&args.identity(), &args.context).await;
    if out.json {
        out.print_json(&serde_json::json!({ "prompt": fragment }))?;
    } else {
        println!("{fragment}");
    }
    Ok(fragment)
}

#[derive(Args, Debug)]
pub struct ExtractArgs {
    pub book: String,
    /// User messages, oldest first.
    #[arg(required = true)]
    pub messages: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ExtractReport<'a> {
    stored: &'a [MemoryEntry],
}

/// Run `memoria extract`: store every message that contains a configured
/// trigger phrase.
pub async fn run_extract(
    manager: &MemoryManager,
    out: &Output,
    args: ExtractArgs,
) -> Result<Vec<MemoryEntry>, MemoriaError> {
    let extractor = TriggerExtractor::new(&manager.extraction_config().triggers)?;
    let messages: Vec<ConversationMessage> = args
        .messages
        .into_iter()
        .map(ConversationMessage::user)
        .collect();
    let stored = extractor
        .extract_and_store(manager, &args.book, &messages)
        .await?;

    if out.json {
        out.print_json(&ExtractReport { stored: &stored })?;
    } else {
        out.success(&format!("stored {} memories", stored.len()));
        for entry in &stored {
            out.entry(entry);
        }
    }
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use memoria_memory::RetrievalMethod;
    use memoria_test_utils::TestHarness;

    use super::*;

    fn quiet() -> Output {
        Output {
            json: false,
            color: false,
        }
    }

    fn retrieve_args(book: &str, context: &str) -> RetrieveArgs {
        RetrieveArgs {
            book: book.to_string(),
            context: context.to_string(),
            max_results: None,
            min_importance: None,
            sort_by: None,
            offline: false,
            no_keywords: false,
            prompt: false,
        }
    }

    #[tokio::test]
    async fn retrieve_without_backend_uses_keywords() {
        let harness = TestHarness::builder().build().unwrap();
        let manager = Arc::clone(&harness.manager);
        let book = manager.create_memory_book("Kit", None, None).await.unwrap();
        manager
            .add_memory(&book.id, MemoryEntry::manual("Kit plays the cello"))
            .await
            .unwrap();
        manager
            .add_memory(&book.id, MemoryEntry::manual("Kit hates mornings"))
            .await
            .unwrap();

        let result = run_retrieve(manager, &quiet(), retrieve_args(&book.id, "cello practice"))
            .await
            .unwrap();
        assert_eq!(result.method, RetrievalMethod::Keyword);
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].content, "Kit plays the cello");
    }

    #[tokio::test]
    async fn retrieve_unknown_book_fails() {
        let harness = TestHarness::builder().build().unwrap();
        let err = run_retrieve(
            Arc::clone(&harness.manager),
            &quiet(),
            retrieve_args("ghost", "anything"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MemoriaError::NotFound { .. }));
    }

    #[tokio::test]
    async fn extract_stores_trigger_messages_once() {
        let harness = TestHarness::builder().build().unwrap();
        let manager = &harness.manager;
        let book = manager.create_memory_book("Ext", None, None).await.unwrap();
        let args = || ExtractArgs {
            book: book.id.clone(),
            messages: vec![
                "Remember that the wifi password is on the fridge".into(),
                "what's for dinner?".into(),
            ],
        };

        let stored = run_extract(manager, &quiet(), args()).await.unwrap();
        assert_eq!(stored.len(), 1);
        let again = run_extract(manager, &quiet(), args()).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn context_creates_book_and_renders() {
        let harness = TestHarness::builder().build().unwrap();
        let args = ContextArgs {
            context: "hello".into(),
            character: Some("c-9".into()),
            name: Some("Nova".into()),
            session: None,
        };
        let fragment = run_context(Arc::clone(&harness.manager), &quiet(), args)
            .await
            .unwrap();
        assert_eq!(fragment, "");
        let books = harness.manager.list_books().await.unwrap();
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].name, "Nova Memories");
    }
}
