// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./memoria.toml` > `~/.config/memoria/memoria.toml` > `/etc/memoria/memoria.toml`
//! with environment variable overrides via `MEMORIA_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::MemoriaConfig;

/// Sections whose keys may be overridden from the environment.
///
/// Nested tables come first so `embedding_openai_api_key` maps to
/// `embedding.openai.api_key` rather than `embedding.openai_api_key`.
const ENV_SECTIONS: &[(&str, &str)] = &[
    ("embedding_openai_", "embedding.openai."),
    ("embedding_ollama_", "embedding.ollama."),
    ("embedding_local_", "embedding.local."),
    ("agent_", "agent."),
    ("storage_", "storage."),
    ("embedding_", "embedding."),
    ("search_", "search."),
    ("retrieval_", "retrieval."),
    ("extraction_", "extraction."),
];

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/memoria/memoria.toml` (system-wide)
/// 3. `~/.config/memoria/memoria.toml` (user XDG config)
/// 4. `./memoria.toml` (local directory)
/// 5. `MEMORIA_*` environment variables
pub fn load_config() -> Result<MemoriaConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env).
///
/// Used for testing and explicit configuration.
pub fn load_config_from_str(toml_content: &str) -> Result<MemoriaConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(MemoriaConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<MemoriaConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(MemoriaConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used internally for config loading (exposed for diagnostic use).
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(MemoriaConfig::default()))
        .merge(Toml::file("/etc/memoria/memoria.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("memoria/memoria.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("memoria.toml"))
        .merge(env_provider())
}

/// Map a lowercased, prefix-stripped env var name to a dotted config key.
///
/// Uses an explicit section table instead of `Env::split("_")` because key
/// names themselves contain underscores (`dedup_threshold`, `api_key`).
pub fn map_env_key(key: &str) -> String {
    for (prefix, dotted) in ENV_SECTIONS {
        if let Some(rest) = key.strip_prefix(prefix) {
            return format!("{dotted}{rest}");
        }
    }
    key.to_string()
}

fn env_provider() -> Env {
    Env::prefixed("MEMORIA_").map(|key| map_env_key(key.as_str()).into())
}
