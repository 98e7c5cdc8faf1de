// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests for the `memoria` binary.
//!
//! Each test writes a config pointing at its own temp data directory with
//! embeddings disabled, then drives the binary with `--json --plain`.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;

struct Workspace {
    dir: tempfile::TempDir,
    config: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("memoria.toml");
        let data_dir = dir.path().join("data");
        std::fs::write(
            &config,
            format!(
                "[storage]\ndata_dir = {:?}\n\n[embedding]\nbackend = \"none\"\n",
                data_dir.to_string_lossy()
            ),
        )
        .unwrap();
        Self { dir, config }
    }

    fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_memoria"))
            .arg("--config")
            .arg(&self.config)
            .args(["--json", "--plain"])
            .args(args)
            .env("RUST_LOG", "off")
            .output()
            .unwrap()
    }

    fn json(&self, args: &[&str]) -> Value {
        let output = self.run(args);
        assert!(
            output.status.success(),
            "memoria {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).unwrap()
    }
}

fn book_file(data_dir: &Path, id: &str) -> PathBuf {
    data_dir.join("books").join(format!("{id}.json"))
}

// ---- Book lifecycle ----

#[test]
fn test_create_list_delete_book() {
    let ws = Workspace::new();

    let created = ws.json(&["book", "create", "Aria", "--character", "aria"]);
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["name"], "Aria");
    assert!(book_file(&ws.data_dir(), &id).exists());

    let listed = ws.json(&["book", "list"]);
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["character_id"], "aria");

    ws.json(&["book", "delete", &id]);
    assert!(!book_file(&ws.data_dir(), &id).exists());
    assert!(ws.json(&["book", "list"]).as_array().unwrap().is_empty());
}

// ---- Entries and retrieval ----

#[test]
fn test_add_then_retrieve_offline() {
    let ws = Workspace::new();
    let id = ws.json(&["book", "create", "Sam"])["id"]
        .as_str()
        .unwrap()
        .to_string();

    ws.json(&["add", &id, "Sam drinks black coffee", "--importance", "70"]);
    ws.json(&["add", &id, "Sam's birthday is in June", "--category", "fact"]);

    let result = ws.json(&["retrieve", &id, "any coffee left?"]);
    assert_eq!(result["method"], "keyword");
    let entries = result["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["content"], "Sam drinks black coffee");
    assert_eq!(entries[0]["accessCount"], 1);
}

#[test]
fn test_update_and_delete_entry() {
    let ws = Workspace::new();
    let id = ws.json(&["book", "create", "Edits"])["id"]
        .as_str()
        .unwrap()
        .to_string();
    let entry = ws.json(&["add", &id, "lives in Porto"]);
    let entry_id = entry["id"].as_str().unwrap().to_string();

    let updated = ws.json(&["update", &id, &entry_id, "--content", "lives in Lisbon"]);
    assert_eq!(updated["content"], "lives in Lisbon");

    ws.json(&["delete", &id, &entry_id]);
    let missing = ws.run(&["delete", &id, &entry_id]);
    assert!(!missing.status.success());
    assert!(String::from_utf8_lossy(&missing.stderr).contains("memory not found"));
}

// ---- Index commands without a backend ----

#[test]
fn test_sync_and_status_without_backend() {
    let ws = Workspace::new();
    let id = ws.json(&["book", "create", "Idx"])["id"]
        .as_str()
        .unwrap()
        .to_string();
    ws.json(&["add", &id, "plays chess on Sundays"]);

    let report = ws.json(&["sync", &id]);
    assert_eq!(report["embedded"], 0);
    assert_eq!(report["skipped"], 1);

    let status = ws.json(&["status", &id]);
    assert_eq!(status["entries"], 1);
    assert_eq!(status["in_sync"], false);
}

// ---- Errors ----

#[test]
fn test_unknown_book_exits_nonzero() {
    let ws = Workspace::new();
    let output = ws.run(&["retrieve", "no-such-book", "hello"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("book not found: no-such-book"));
}

#[test]
fn test_invalid_config_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("memoria.toml");
    std::fs::write(&config, "[serch]\nmin_score = 0.2\n").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_memoria"))
        .arg("--config")
        .arg(&config)
        .args(["book", "list"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}
