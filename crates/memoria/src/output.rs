// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Terminal output shared by every command.
//!
//! `--json` prints one pretty JSON document for scripting. Otherwise output
//! is human-readable, colored only when stdout is a TTY and `--plain` is
//! not given.

use std::io::IsTerminal;

use colored::Colorize;
use memoria_core::MemoriaError;
use memoria_memory::MemoryEntry;
use serde::Serialize;

#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
    pub color: bool,
}

impl Output {
    pub fn new(json: bool, plain: bool) -> Self {
        Self {
            json,
            color: !plain && std::io::stdout().is_terminal(),
        }
    }

    /// Print `value` as pretty JSON.
    pub fn print_json<T: Serialize>(&self, value: &T) -> Result<(), MemoriaError> {
        let text = serde_json::to_string_pretty(value)
            .map_err(|e| MemoriaError::Internal(format!("failed to serialize output: {e}")))?;
        println!("{text}");
        Ok(())
    }

    pub fn heading(&self, title: &str) {
        println!();
        if self.color {
            println!("  {}", title.bold());
        } else {
            println!("  {title}");
        }
        println!("  {}", "-".repeat(50));
    }

    pub fn success(&self, message: &str) {
        if self.color {
            println!("  {} {message}", "✓".green());
        } else {
            println!("  [OK] {message}");
        }
    }

    pub fn field(&self, name: &str, value: impl std::fmt::Display) {
        println!("    {:<18} {value}", format!("{name}:"));
    }

    /// One line per entry: id, importance, optional category, content.
    pub fn entry(&self, entry: &MemoryEntry) {
        let category = entry
            .category
            .as_deref()
            .map(|c| format!("[{c}] "))
            .unwrap_or_default();
        let disabled = if entry.enabled { "" } else { " (disabled)" };
        if self.color {
            println!(
                "    {} {:>3} {}{}{}",
                entry.id.dimmed(),
                entry.importance.to_string().cyan(),
                category.yellow(),
                entry.content,
                disabled.red()
            );
        } else {
            println!(
                "    {} {:>3} {category}{}{disabled}",
                entry.id, entry.importance, entry.content
            );
        }
    }
}

/// Render an error for stderr.
pub fn render_error(err: &MemoriaError, color: bool) -> String {
    if color {
        format!("{} {err}", "error:".red().bold())
    } else {
        format!("error: {err}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_error_has_prefix() {
        let err = MemoriaError::NotFound {
            kind: "book".into(),
            id: "b-1".into(),
        };
        assert_eq!(render_error(&err, false), "error: book not found: b-1");
    }

    #[test]
    fn plain_flag_disables_color() {
        assert!(!Output::new(false, true).color);
    }
}
