// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as weight ranges, compilable trigger patterns, and non-empty paths.

use crate::diagnostic::ConfigError;
use crate::model::{EmbeddingBackend, MemoriaConfig};

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &MemoriaConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    if config.storage.data_dir.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "storage.data_dir must not be empty".to_string(),
        });
    }

    for (name, value) in [
        ("search.vector_weight", config.search.vector_weight),
        ("search.keyword_weight", config.search.keyword_weight),
        ("search.min_score", config.search.min_score),
        ("extraction.dedup_threshold", config.extraction.dedup_threshold),
    ] {
        if !(0.0..=1.0).contains(&value) {
            errors.push(ConfigError::Validation {
                message: format!("{name} must be between 0.0 and 1.0, got {value}"),
            });
        }
    }

    if config.search.vector_weight + config.search.keyword_weight <= 0.0 {
        errors.push(ConfigError::Validation {
            message: "search.vector_weight and search.keyword_weight cannot both be zero"
                .to_string(),
        });
    }

    if config.retrieval.min_importance > 100 {
        errors.push(ConfigError::Validation {
            message: format!(
                "retrieval.min_importance must be at most 100, got {}",
                config.retrieval.min_importance
            ),
        });
    }

    if config.retrieval.max_memories_per_request == 0 {
        errors.push(ConfigError::Validation {
            message: "retrieval.max_memories_per_request must be at least 1".to_string(),
        });
    }

    if config.extraction.recent_turns == 0 {
        errors.push(ConfigError::Validation {
            message: "extraction.recent_turns must be at least 1".to_string(),
        });
    }

    for (i, pattern) in config.extraction.triggers.iter().enumerate() {
        if let Err(e) = regex::RegexBuilder::new(pattern).case_insensitive(true).build() {
            errors.push(ConfigError::Validation {
                message: format!("extraction.triggers[{i}] `{pattern}` is not a valid regex: {e}"),
            });
        }
    }

    if config.embedding.timeout_secs == 0 {
        errors.push(ConfigError::Validation {
            message: "embedding.timeout_secs must be at least 1".to_string(),
        });
    }

    if matches!(
        config.embedding.fallback,
        Some(EmbeddingBackend::Auto) | Some(EmbeddingBackend::None)
    ) {
        errors.push(ConfigError::Validation {
            message: "embedding.fallback must name a concrete backend (local, openai, ollama)"
                .to_string(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
