// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turns figment extraction errors into miette diagnostics.
//!
//! Unknown keys and unknown enum values (`backend = "olama"`) get a
//! Jaro-Winkler suggestion plus a note on what the section configures.
//! Errors that came from a `MEMORIA_*` variable name that variable, since
//! there is no file span to point at.

#![allow(unused_assignments)] // miette's Diagnostic derive generates code triggering this lint

use figment::error::Kind;
use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

/// Minimum Jaro-Winkler similarity score to suggest a correction.
const SUGGESTION_THRESHOLD: f64 = 0.75;

/// What each table of `memoria.toml` controls, keyed by dotted path.
const SECTIONS: &[(&str, &str)] = &[
    ("agent", "process settings such as log_level"),
    ("storage", "where book documents and index databases live"),
    ("embedding", "which backend turns memories into vectors"),
    ("embedding.openai", "the OpenAI-compatible /embeddings endpoint"),
    ("embedding.ollama", "the Ollama server used for embeddings"),
    ("embedding.local", "the on-device MiniLM model"),
    ("search", "how vector and keyword scores are fused"),
    ("retrieval", "defaults for new memory books"),
    ("extraction", "how memories are pulled out of conversation turns"),
];

/// A configuration problem, rendered through miette.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// A key (or a whole table) the config model does not have.
    #[error("unknown key `{key}` in {}", section_label(section))]
    #[diagnostic(
        code(memoria::config::unknown_key),
        help("{}", unknown_key_help(section, suggestion.as_deref(), valid_keys))
    )]
    UnknownKey {
        key: String,
        /// Dotted path of the containing table; empty at the top level.
        section: String,
        suggestion: Option<String>,
        valid_keys: String,
        #[label("not a memoria setting")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// An enum setting (`embedding.backend`, `retrieval.sort_by`,
    /// `extraction.mode`) with a value outside its variants.
    #[error("`{value}` is not a valid value for `{key}`")]
    #[diagnostic(
        code(memoria::config::unknown_value),
        help("{}", unknown_value_help(suggestion.as_deref(), expected, env_var.as_deref()))
    )]
    UnknownValue {
        key: String,
        value: String,
        suggestion: Option<String>,
        expected: String,
        /// Set when the value came from the environment.
        env_var: Option<String>,
        #[label("unrecognized value")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// A value of the wrong type, e.g. a string where a weight is expected.
    #[error("invalid type for `{key}`: found {found}, expected {expected}")]
    #[diagnostic(
        code(memoria::config::invalid_type),
        help("{}", invalid_type_help(key, expected, env_var.as_deref()))
    )]
    InvalidType {
        key: String,
        found: String,
        expected: String,
        env_var: Option<String>,
        #[label("wrong type here")]
        span: Option<SourceSpan>,
        #[source_code]
        src: Option<NamedSource<String>>,
    },

    /// A value that deserialized but fails a semantic check.
    #[error("validation error: {message}")]
    #[diagnostic(code(memoria::config::validation))]
    Validation { message: String },

    #[error("configuration error: {0}")]
    #[diagnostic(code(memoria::config::other))]
    Other(String),
}

fn section_label(section: &str) -> String {
    if section.is_empty() {
        "memoria.toml".to_string()
    } else {
        format!("[{section}]")
    }
}

/// Short description of a table, if it is one of ours.
pub fn section_summary(section: &str) -> Option<&'static str> {
    SECTIONS
        .iter()
        .find(|(name, _)| *name == section)
        .map(|(_, summary)| *summary)
}

fn unknown_key_help(section: &str, suggestion: Option<&str>, valid_keys: &str) -> String {
    let mut help = match suggestion {
        Some(s) => format!("did you mean `{s}`? "),
        None => String::new(),
    };
    match section_summary(section) {
        Some(summary) => help.push_str(&format!("[{section}] configures {summary}; keys: {valid_keys}")),
        None if section.is_empty() => help.push_str(&format!("top-level tables: {valid_keys}")),
        None => help.push_str(&format!("valid keys: {valid_keys}")),
    }
    help
}

fn unknown_value_help(suggestion: Option<&str>, expected: &str, env_var: Option<&str>) -> String {
    let mut help = match suggestion {
        Some(s) => format!("did you mean `{s}`? expected one of: {expected}"),
        None => format!("expected one of: {expected}"),
    };
    if let Some(var) = env_var {
        help.push_str(&format!(" (set via {var})"));
    }
    help
}

fn invalid_type_help(key: &str, expected: &str, env_var: Option<&str>) -> String {
    match env_var {
        Some(var) => format!("{var} overrides `{key}` and must parse as {expected}"),
        None => format!("`{key}` takes {expected}"),
    }
}

/// The `MEMORIA_*` variable that overrides a dotted config key.
pub fn env_var_for(key: &str) -> String {
    format!("MEMORIA_{}", key.replace('.', "_").to_uppercase())
}

/// Convert a `figment::Error` (which may hold several errors) into
/// diagnostics. `toml_sources` pairs a display path with file content and
/// is used to attach source spans.
pub fn figment_to_config_errors(
    err: figment::Error,
    toml_sources: &[(String, String)],
) -> Vec<ConfigError> {
    err.into_iter()
        .map(|error| {
            let path: Vec<String> = error.path.iter().map(|s| s.to_string()).collect();
            let from_env = is_env_error(&error);
            match &error.kind {
                Kind::UnknownField(field, expected) => {
                    let (span, src) = locate(&error, &path, field, toml_sources);
                    ConfigError::UnknownKey {
                        key: field.clone(),
                        section: path.join("."),
                        suggestion: suggest_key(field, expected),
                        valid_keys: expected.join(", "),
                        span,
                        src,
                    }
                }
                Kind::UnknownVariant(value, expected) => {
                    let key = path.join(".");
                    let (span, src) = locate_value(&error, &path, toml_sources);
                    ConfigError::UnknownValue {
                        suggestion: suggest_key(&value.to_lowercase(), expected),
                        value: value.clone(),
                        expected: expected.join(", "),
                        env_var: from_env.then(|| env_var_for(&key)),
                        key,
                        span,
                        src,
                    }
                }
                Kind::InvalidType(actual, expected) => {
                    let key = path.join(".");
                    let (span, src) = locate_value(&error, &path, toml_sources);
                    ConfigError::InvalidType {
                        found: actual.to_string(),
                        expected: expected.clone(),
                        env_var: from_env.then(|| env_var_for(&key)),
                        key,
                        span,
                        src,
                    }
                }
                _ => ConfigError::Other(error.to_string()),
            }
        })
        .collect()
}

fn is_env_error(error: &figment::Error) -> bool {
    error
        .metadata
        .as_ref()
        .is_some_and(|m| m.name.contains("environment"))
}

/// Span for an error whose path ends with the offending key itself.
fn locate_value(
    error: &figment::Error,
    path: &[String],
    toml_sources: &[(String, String)],
) -> (Option<SourceSpan>, Option<NamedSource<String>>) {
    match path.split_last() {
        Some((field, section)) => locate(error, section, field, toml_sources),
        None => (None, None),
    }
}

fn locate(
    error: &figment::Error,
    section: &[String],
    field: &str,
    toml_sources: &[(String, String)],
) -> (Option<SourceSpan>, Option<NamedSource<String>>) {
    let Some((name, content)) = source_for(error, toml_sources) else {
        return (None, None);
    };
    match find_key_offset(content, section, field) {
        Some(offset) => (
            Some(SourceSpan::new(offset.into(), field.len())),
            Some(NamedSource::new(name, content.to_string())),
        ),
        None => (None, None),
    }
}

/// The TOML text an error came from. Inline strings carry no file path, so a
/// lone non-env source is assumed to be it.
fn source_for<'a>(
    error: &figment::Error,
    toml_sources: &'a [(String, String)],
) -> Option<(&'a str, &'a str)> {
    if is_env_error(error) {
        return None;
    }
    let file = error
        .metadata
        .as_ref()
        .and_then(|m| m.source.as_ref())
        .and_then(|s| match s {
            figment::Source::File(path) => Some(path.display().to_string()),
            _ => None,
        });
    let found = match file {
        Some(path) => toml_sources.iter().find(|(p, _)| *p == path),
        None if toml_sources.len() == 1 => toml_sources.first(),
        None => None,
    };
    found.map(|(p, c)| (p.as_str(), c.as_str()))
}

/// Byte offset of `field` inside the `[section]` table of `content`, or in
/// the top-level preamble when `section` is empty. Stops at the next table
/// header.
pub fn find_key_offset(content: &str, section: &[String], field: &str) -> Option<usize> {
    let start = if section.is_empty() {
        0
    } else {
        let header = format!("[{}]", section.join("."));
        content.find(&header).map(|pos| pos + header.len())?
    };

    let mut offset = start;
    for line in content[start..].split_inclusive('\n') {
        let trimmed = line.trim_start();
        if offset > start && trimmed.starts_with('[') {
            break;
        }
        if let Some(after) = trimmed.strip_prefix(field)
            && after.trim_start().starts_with('=')
        {
            return Some(offset + line.len() - trimmed.len());
        }
        offset += line.len();
    }

    if section.is_empty() {
        // An unknown top-level table shows up as `[name]`.
        let header = format!("[{field}]");
        return content.find(&header).map(|pos| pos + 1);
    }
    None
}

/// Closest valid key or value above the similarity threshold.
pub fn suggest_key(unknown: &str, valid_keys: &[&str]) -> Option<String> {
    valid_keys
        .iter()
        .map(|key| (strsim::jaro_winkler(unknown, key), *key))
        .filter(|(score, _)| *score > SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, key)| key.to_string())
}

/// Render diagnostics to stderr with miette's graphical handler.
pub fn render_errors(errors: &[ConfigError]) {
    use miette::GraphicalReportHandler;

    let handler = GraphicalReportHandler::new();
    for error in errors {
        let mut buf = String::new();
        let diagnostic: &dyn Diagnostic = error;
        if handler.render_report(&mut buf, diagnostic).is_ok() {
            eprint!("{buf}");
        } else {
            eprintln!("Error: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_and_validate_str;

    #[test]
    fn suggests_extraction_key() {
        let valid = &["mode", "triggers", "dedup_threshold", "recent_turns"];
        assert_eq!(
            suggest_key("dedup_treshold", valid),
            Some("dedup_threshold".to_string())
        );
        assert_eq!(suggest_key("zzzzzz", valid), None);
    }

    #[test]
    fn every_config_table_has_a_summary() {
        for section in [
            "agent",
            "storage",
            "embedding",
            "embedding.openai",
            "embedding.ollama",
            "embedding.local",
            "search",
            "retrieval",
            "extraction",
        ] {
            assert!(section_summary(section).is_some(), "{section}");
        }
        assert!(section_summary("gateway").is_none());
    }

    #[test]
    fn env_var_names_follow_loader_mapping() {
        assert_eq!(env_var_for("search.min_score"), "MEMORIA_SEARCH_MIN_SCORE");
        assert_eq!(
            env_var_for("embedding.openai.api_key"),
            "MEMORIA_EMBEDDING_OPENAI_API_KEY"
        );
        assert_eq!(
            crate::loader::map_env_key("embedding_openai_api_key"),
            "embedding.openai.api_key"
        );
    }

    #[test]
    fn find_key_offset_in_nested_section() {
        let content = "[embedding]\nbackend = \"openai\"\n\n[embedding.openai]\napi_kye = \"k\"\n";
        let section = vec!["embedding".to_string(), "openai".to_string()];
        let o = find_key_offset(content, &section, "api_kye").unwrap();
        assert_eq!(&content[o..o + 7], "api_kye");
    }

    #[test]
    fn find_key_offset_stops_at_next_section() {
        let content = "[search]\nmin_score = 0.2\n\n[retrieval]\nsort_bi = \"recency\"\n";
        let section = vec!["search".to_string()];
        assert!(find_key_offset(content, &section, "sort_bi").is_none());
    }

    #[test]
    fn find_key_offset_points_at_unknown_table() {
        let content = "[serch]\nmin_score = 0.2\n";
        let o = find_key_offset(content, &[], "serch").unwrap();
        assert_eq!(&content[o..o + 5], "serch");
    }

    #[test]
    fn misspelled_table_suggests_section() {
        let errors = load_and_validate_str("[serch]\nmin_score = 0.2\n").unwrap_err();
        match &errors[0] {
            ConfigError::UnknownKey {
                key,
                section,
                suggestion,
                ..
            } => {
                assert_eq!(key, "serch");
                assert!(section.is_empty());
                assert_eq!(suggestion.as_deref(), Some("search"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn unknown_key_help_describes_section() {
        let help = unknown_key_help("search", Some("min_score"), "vector_weight, min_score");
        assert!(help.starts_with("did you mean `min_score`?"));
        assert!(help.contains("vector and keyword scores"));
        assert_eq!(
            unknown_key_help("", None, "search, retrieval"),
            "top-level tables: search, retrieval"
        );
    }

    #[test]
    fn misspelled_backend_suggests_variant() {
        let errors = load_and_validate_str("[embedding]\nbackend = \"olama\"\n").unwrap_err();
        match &errors[0] {
            ConfigError::UnknownValue {
                key,
                value,
                suggestion,
                expected,
                env_var,
                ..
            } => {
                assert_eq!(key, "embedding.backend");
                assert_eq!(value, "olama");
                assert_eq!(suggestion.as_deref(), Some("ollama"));
                assert!(expected.contains("openai"));
                assert!(env_var.is_none());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn wrong_type_names_key_and_expectation() {
        let errors = load_and_validate_str("[search]\nmin_score = \"high\"\n").unwrap_err();
        match &errors[0] {
            ConfigError::InvalidType { key, .. } => assert_eq!(key, "search.min_score"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            invalid_type_help("search.min_score", "a floating point", Some("MEMORIA_SEARCH_MIN_SCORE")),
            "MEMORIA_SEARCH_MIN_SCORE overrides `search.min_score` and must parse as a floating point"
        );
    }
}
