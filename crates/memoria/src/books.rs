// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `memoria book ...` and entry editing commands.

use clap::{Args, Subcommand};
use memoria_config::model::SortBy;
use memoria_core::MemoriaError;
use memoria_memory::{MemoryBook, MemoryBookSettings, MemoryEntry, MemoryEntryPatch, MemoryManager};
use serde::Serialize;

use crate::output::Output;

/// Book management subcommands.
#[derive(Subcommand, Debug)]
pub enum BookCommand {
    /// Create a new memory book.
    Create {
        /// Display name.
        name: String,
        /// Character this book belongs to.
        #[arg(long)]
        character: Option<String>,
        /// Session this book belongs to.
        #[arg(long)]
        session: Option<String>,
    },
    /// List every book.
    List,
    /// Show a book and its entries.
    Show { book: String },
    /// Delete a book and its index.
    Delete { book: String },
    /// Change a book's retrieval settings.
    Configure {
        book: String,
        #[command(flatten)]
        settings: SettingsArgs,
    },
}

#[derive(Args, Debug, Default)]
pub struct SettingsArgs {
    #[arg(long)]
    pub max_memories: Option<usize>,
    #[arg(long)]
    pub max_tokens: Option<usize>,
    #[arg(long)]
    pub keyword_retrieval: Option<bool>,
    #[arg(long)]
    pub auto_extract: Option<bool>,
    #[arg(long)]
    pub min_importance: Option<u8>,
    /// importance, recency or access_count.
    #[arg(long)]
    pub sort_by: Option<SortBy>,
}

impl SettingsArgs {
    fn apply(&self, settings: &mut MemoryBookSettings) {
        if let Some(v) = self.max_memories {
            settings.max_memories_per_request = v;
        }
        if let Some(v) = self.max_tokens {
            settings.max_memory_tokens = v;
        }
        if let Some(v) = self.keyword_retrieval {
            settings.use_keyword_retrieval = v;
        }
        if let Some(v) = self.auto_extract {
            settings.auto_extract = v;
        }
        if let Some(v) = self.min_importance {
            settings.min_importance_for_injection = v.min(100);
        }
        if let Some(v) = self.sort_by {
            settings.sort_by = v;
        }
    }
}

#[derive(Args, Debug)]
pub struct AddArgs {
    pub book: String,
    pub content: String,
    /// 0-100.
    #[arg(long)]
    pub importance: Option<i64>,
    #[arg(long)]
    pub category: Option<String>,
    /// Repeat for several keywords.
    #[arg(long = "keyword")]
    pub keywords: Vec<String>,
    /// Write canonical storage only; run `memoria sync` later.
    #[arg(long)]
    pub no_index: bool,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    pub book: String,
    pub entry: String,
    #[arg(long)]
    pub content: Option<String>,
    #[arg(long)]
    pub importance: Option<i64>,
    #[arg(long, conflicts_with = "clear_category")]
    pub category: Option<String>,
    #[arg(long)]
    pub clear_category: bool,
    /// Replaces all keywords. Repeat for several.
    #[arg(long = "keyword")]
    pub keywords: Option<Vec<String>>,
    #[arg(long, conflicts_with = "disable")]
    pub enable: bool,
    #[arg(long)]
    pub disable: bool,
}

impl UpdateArgs {
    fn patch(&self) -> MemoryEntryPatch {
        let category = if self.clear_category {
            Some(None)
        } else {
            self.category.clone().map(Some)
        };
        let enabled = match (self.enable, self.disable) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        MemoryEntryPatch {
            content: self.content.clone(),
            keywords: self.keywords.clone(),
            importance: self.importance,
            category,
            enabled,
        }
    }
}

#[derive(Debug, Serialize)]
struct BookSummary<'a> {
    id: &'a str,
    name: &'a str,
    character_id: Option<&'a str>,
    session_key: Option<&'a str>,
    entries: usize,
}

impl<'a> From<&'a MemoryBook> for BookSummary<'a> {
    fn from(book: &'a MemoryBook) -> Self {
        Self {
            id: &book.id,
            name: &book.name,
            character_id: book.character_id.as_deref(),
            session_key: book.session_key.as_deref(),
            entries: book.entries.len(),
        }
    }
}

/// Run a `memoria book` subcommand.
pub async fn run_book(
    manager: &MemoryManager,
    out: &Output,
    command: BookCommand,
) -> Result<(), MemoriaError> {
    match command {
        BookCommand::Create {
            name,
            character,
            session,
        } => {
            let book = manager
                .create_memory_book(&name, character.as_deref(), session.as_deref())
                .await?;
            if out.json {
                return out.print_json(&BookSummary::from(&book));
            }
            out.success(&format!("created book {} ({})", book.name, book.id));
        }
        BookCommand::List => {
            let books = manager.list_books().await?;
            if out.json {
                let summaries: Vec<BookSummary<'_>> = books.iter().map(BookSummary::from).collect();
                return out.print_json(&summaries);
            }
            out.heading("memoria books");
            if books.is_empty() {
                println!("    (none)");
            }
            for book in &books {
                println!("    {}  {}  ({} entries)", book.id, book.name, book.entries.len());
            }
            println!();
        }
        BookCommand::Show { book } => {
            let book = require_book(manager, &book).await?;
            if out.json {
                return out.print_json(&book);
            }
            out.heading(&book.name);
            out.field("Id", &book.id);
            if let Some(character) = &book.character_id {
                out.field("Character", character);
            }
            if let Some(session) = &book.session_key {
                out.field("Session", session);
            }
            out.field("Auto extract", book.settings.auto_extract);
            out.field("Sort by", book.settings.sort_by);
            out.field("Min importance", book.settings.min_importance_for_injection);
            out.field("Entries", book.entries.len());
            println!();
            for entry in &book.entries {
                out.entry(entry);
            }
            println!();
        }
        BookCommand::Delete { book } => {
            if !manager.delete_book(&book).await? {
                return Err(book_not_found(&book));
            }
            if out.json {
                return out.print_json(&serde_json::json!({ "deleted": book }));
            }
            out.success(&format!("deleted book {book}"));
        }
        BookCommand::Configure { book, settings } => {
            let current = require_book(manager, &book).await?;
            let mut updated = current.settings.clone();
            settings.apply(&mut updated);
            let saved = manager
                .update_settings(&book, updated)
                .await?
                .ok_or_else(|| book_not_found(&book))?;
            if out.json {
                return out.print_json(&saved.settings);
            }
            out.success(&format!("updated settings for {}", saved.name));
        }
    }
    Ok(())
}

/// Run `memoria add`.
pub async fn run_add(
    manager: &MemoryManager,
    out: &Output,
    args: AddArgs,
) -> Result<MemoryEntry, MemoriaError> {
    let mut entry = MemoryEntry::manual(args.content).with_keywords(args.keywords);
    if let Some(importance) = args.importance {
        entry = entry.with_importance(importance);
    }
    if let Some(category) = args.category {
        entry = entry.with_category(category);
    }

    let entry = if args.no_index {
        manager.add_memory(&args.book, entry).await?
    } else {
        manager.add_memory_with_embedding(&args.book, entry).await?
    };

    if out.json {
        out.print_json(&entry)?;
    } else {
        out.success(&format!("added memory {}", entry.id));
    }
    Ok(entry)
}

/// Run `memoria update`.
pub async fn run_update(
    manager: &MemoryManager,
    out: &Output,
    args: UpdateArgs,
) -> Result<MemoryEntry, MemoriaError> {
    let entry = manager
        .update_memory(&args.book, &args.entry, args.patch())
        .await?
        .ok_or_else(|| MemoriaError::NotFound {
            kind: "memory".into(),
            id: args.entry.clone(),
        })?;

    if out.json {
        out.print_json(&entry)?;
    } else {
        out.success(&format!("updated memory {}", entry.id));
    }
    Ok(entry)
}

/// Run `memoria delete`. The index row goes first.
pub async fn run_delete(
    manager: &MemoryManager,
    out: &Output,
    book: &str,
    entry: &str,
) -> Result<(), MemoriaError> {
    if !manager.delete_memory_with_vector(book, entry).await? {
        return Err(MemoriaError::NotFound {
            kind: "memory".into(),
            id: entry.to_string(),
        });
    }
    if out.json {
        return out.print_json(&serde_json::json!({ "deleted": entry }));
    }
    out.success(&format!("deleted memory {entry}"));
    Ok(())
}

pub(crate) async fn require_book(
    manager: &MemoryManager,
    book_id: &str,
) -> Result<MemoryBook, MemoriaError> {
    manager
        .get_book(book_id)
        .await?
        .ok_or_else(|| book_not_found(book_id))
}

fn book_not_found(book_id: &str) -> MemoriaError {
    MemoriaError::NotFound {
        kind: "book".into(),
        id: book_id.to_string(),
    }
}
