// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `memoria doctor` command implementation.
//!
//! Runs diagnostic checks against the data directory, the book files and
//! the embedding backend to identify why retrieval may be degraded.

use std::path::Path;
use std::time::{Duration, Instant};

use colored::Colorize;
use memoria_config::MemoriaConfig;
use memoria_core::{HealthStatus, MemoriaError};
use memoria_memory::MemoryManager;

/// Status of a diagnostic check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckStatus {
    /// Check passed successfully.
    Pass,
    /// Check passed with a warning.
    Warn,
    /// Check failed.
    Fail,
}

/// Result of a single diagnostic check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    /// Human-readable message.
    pub message: String,
    pub duration: Duration,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, message: impl Into<String>, start: Instant) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
            duration: start.elapsed(),
        }
    }
}

/// Run the `memoria doctor` command.
///
/// Runs quick diagnostic checks. With `--deep`, also compares every book's
/// index against canonical storage.
pub async fn run_doctor(
    manager: &MemoryManager,
    config: &MemoriaConfig,
    deep: bool,
    color: bool,
) -> Result<Vec<CheckResult>, MemoriaError> {
    let mut results = vec![
        check_data_dir(Path::new(&config.storage.data_dir)).await,
        check_books(manager, &config.storage.books_dir()).await,
        check_embedding(manager).await,
    ];
    if deep {
        results.push(check_index_sync(manager).await);
    }

    println!();
    println!("  memoria doctor");
    println!("  {}", "-".repeat(50));

    let mut issues = 0;
    for result in &results {
        let duration_ms = result.duration.as_millis();
        let (marker, message) = match (&result.status, color) {
            (CheckStatus::Pass, true) => ("✓".green().to_string(), result.message.clone()),
            (CheckStatus::Pass, false) => ("[OK]  ".to_string(), result.message.clone()),
            (CheckStatus::Warn, true) => ("!".yellow().to_string(), result.message.yellow().to_string()),
            (CheckStatus::Warn, false) => ("[WARN]".to_string(), result.message.clone()),
            (CheckStatus::Fail, true) => ("✗".red().to_string(), result.message.red().to_string()),
            (CheckStatus::Fail, false) => ("[FAIL]".to_string(), result.message.clone()),
        };
        if result.status != CheckStatus::Pass {
            issues += 1;
        }
        println!("    {marker} {:<20} {message} ({duration_ms}ms)", result.name);
    }

    println!();
    if issues > 0 {
        let issue_word = if issues == 1 { "issue" } else { "issues" };
        println!("  {issues} {issue_word} found.");
        if !deep {
            println!("  Run with --deep to compare indexes with book files.");
        }
    } else {
        println!("  All checks passed.");
    }
    println!();

    Ok(results)
}

/// Check the data directory exists (or can be created) and is writable.
async fn check_data_dir(dir: &Path) -> CheckResult {
    let start = Instant::now();
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        return CheckResult::new(
            "Data directory",
            CheckStatus::Fail,
            format!("cannot create {}: {e}", dir.display()),
            start,
        );
    }

    let probe = dir.join(".doctor-probe");
    match tokio::fs::write(&probe, b"ok").await {
        Ok(()) => {
            let _ = tokio::fs::remove_file(&probe).await;
            CheckResult::new("Data directory", CheckStatus::Pass, dir.display().to_string(), start)
        }
        Err(e) => CheckResult::new(
            "Data directory",
            CheckStatus::Fail,
            format!("not writable: {e}"),
            start,
        ),
    }
}

/// Check every book file parses. Unreadable files are skipped by retrieval,
/// so they are reported as a warning.
async fn check_books(manager: &MemoryManager, books_dir: &Path) -> CheckResult {
    let start = Instant::now();
    let books = match manager.list_books().await {
        Ok(books) => books,
        Err(e) => {
            return CheckResult::new("Books", CheckStatus::Fail, format!("cannot list: {e}"), start);
        }
    };

    let files = count_json_files(books_dir).await;
    let entries: usize = books.iter().map(|b| b.entries.len()).sum();
    if files > books.len() {
        CheckResult::new(
            "Books",
            CheckStatus::Warn,
            format!("{} unreadable book file(s) in {}", files - books.len(), books_dir.display()),
            start,
        )
    } else {
        CheckResult::new(
            "Books",
            CheckStatus::Pass,
            format!("{} book(s), {entries} entries", books.len()),
            start,
        )
    }
}

async fn count_json_files(dir: &Path) -> usize {
    let Ok(mut read_dir) = tokio::fs::read_dir(dir).await else {
        return 0;
    };
    let mut count = 0;
    while let Ok(Some(entry)) = read_dir.next_entry().await {
        let path = entry.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if !hidden && path.extension().is_some_and(|ext| ext == "json") {
            count += 1;
        }
    }
    count
}

/// Check an embedding backend resolves and reports healthy.
async fn check_embedding(manager: &MemoryManager) -> CheckResult {
    let start = Instant::now();
    let provider = match manager.providers().resolve().await {
        Ok(Some(provider)) => provider,
        Ok(None) => {
            return CheckResult::new(
                "Embedding backend",
                CheckStatus::Warn,
                "none available (keyword retrieval only)",
                start,
            );
        }
        Err(e) => {
            return CheckResult::new("Embedding backend", CheckStatus::Fail, e.to_string(), start);
        }
    };

    let label = format!("{} ({})", provider.id(), provider.model());
    match provider.health_check().await {
        Ok(HealthStatus::Healthy) => {
            CheckResult::new("Embedding backend", CheckStatus::Pass, label, start)
        }
        Ok(HealthStatus::Degraded(reason)) => CheckResult::new(
            "Embedding backend",
            CheckStatus::Warn,
            format!("{label}: {reason}"),
            start,
        ),
        Ok(HealthStatus::Unhealthy(reason)) => CheckResult::new(
            "Embedding backend",
            CheckStatus::Fail,
            format!("{label}: {reason}"),
            start,
        ),
        Err(e) => CheckResult::new(
            "Embedding backend",
            CheckStatus::Fail,
            format!("{label}: {e}"),
            start,
        ),
    }
}

/// Deep check: books whose index lags canonical storage.
async fn check_index_sync(manager: &MemoryManager) -> CheckResult {
    let start = Instant::now();
    let books = match manager.list_books().await {
        Ok(books) => books,
        Err(e) => {
            return CheckResult::new("Index sync", CheckStatus::Fail, format!("cannot list: {e}"), start);
        }
    };

    let mut stale = Vec::new();
    for book in &books {
        match manager.index_status(&book.id).await {
            Ok(status) if status.vector_count == book.entries.len() => {}
            Ok(_) => stale.push(book.id.clone()),
            Err(e) => {
                return CheckResult::new(
                    "Index sync",
                    CheckStatus::Fail,
                    format!("{}: {e}", book.id),
                    start,
                );
            }
        }
    }

    if stale.is_empty() {
        CheckResult::new("Index sync", CheckStatus::Pass, format!("{} index(es) current", books.len()), start)
    } else {
        CheckResult::new(
            "Index sync",
            CheckStatus::Warn,
            format!("{} book(s) need `memoria sync`: {}", stale.len(), stale.join(", ")),
            start,
        )
    }
}
