// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `memoria status` and `memoria sync` command implementations.
//!
//! Status reports how far a book's index has caught up with canonical
//! storage. Sync embeds what is missing or stale and prunes orphans.

use colored::Colorize;
use memoria_core::MemoriaError;
use memoria_memory::{IndexStatus, MemoryManager, SyncReport};
use serde::Serialize;

use crate::books::require_book;
use crate::output::Output;

/// Structured status output for `--json` mode.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub book_id: String,
    pub name: String,
    pub entries: usize,
    pub index: IndexStatus,
    pub in_sync: bool,
}

/// Run `memoria status <book>`.
pub async fn run_status(
    manager: &MemoryManager,
    out: &Output,
    book_id: &str,
) -> Result<StatusResponse, MemoriaError> {
    let book = require_book(manager, book_id).await?;
    let index = manager.index_status(book_id).await?;
    let response = StatusResponse {
        in_sync: index.vector_count == book.entries.len(),
        book_id: book.id,
        name: book.name,
        entries: book.entries.len(),
        index,
    };

    if out.json {
        out.print_json(&response)?;
    } else {
        print_status(&response, out);
    }
    Ok(response)
}

fn print_status(status: &StatusResponse, out: &Output) {
    out.heading(&format!("memoria status: {}", status.name));
    out.field("Entries", status.entries);
    out.field("Vectors", status.index.vector_count);
    out.field("Model", status.index.model.as_deref().unwrap_or("-"));
    out.field(
        "Last write",
        status
            .index
            .last_write
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string()),
    );
    out.field(
        "Full-text",
        if status.index.fts_enabled { "fts5" } else { "substring" },
    );

    let state = match (status.in_sync, out.color) {
        (true, true) => format!("{} in sync", "✓".green()),
        (true, false) => "[OK] in sync".to_string(),
        (false, true) => format!("{} {}", "!".yellow(), "needs sync".yellow()),
        (false, false) => "[WARN] needs sync".to_string(),
    };
    out.field("State", state);
    println!();
    if !status.in_sync {
        println!("  Run: memoria sync {}", status.book_id);
        println!();
    }
}

/// Run `memoria sync <book>`.
pub async fn run_sync(
    manager: &MemoryManager,
    out: &Output,
    book_id: &str,
) -> Result<SyncReport, MemoriaError> {
    let report = manager.sync_book(book_id).await?;
    if out.json {
        out.print_json(&report)?;
    } else {
        out.success(&format!(
            "synced {book_id}: {} embedded, {} removed, {} skipped",
            report.embedded, report.removed, report.skipped
        ));
    }
    Ok(report)
}
