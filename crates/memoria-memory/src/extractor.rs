// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Memory extraction from conversation turns.
//!
//! [`MemoryExtractor`] asks a completion backend for a JSON array of memory
//! candidates, drops near-duplicates of what the book already holds, and
//! stores the rest. [`TriggerExtractor`] needs no LLM: any message that
//! contains a trigger phrase is remembered verbatim.

use std::collections::HashSet;
use std::sync::Arc;

use memoria_config::model::{ExtractionConfig, ExtractionMode};
use memoria_core::{CompletionAdapter, ConversationMessage, MemoriaError, Role};
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::manager::MemoryManager;
use crate::types::{MemoryEntry, clamp_importance};

/// Categories the extraction prompt offers. Anything else maps to `other`.
pub const EXTRACTION_CATEGORIES: [&str; 6] =
    ["fact", "preference", "relationship", "event", "trait", "other"];

/// Importance assigned by [`TriggerExtractor`].
pub const TRIGGER_IMPORTANCE: i64 = 60;

/// Provenance recorded on LLM-extracted entries.
pub const EXTRACTION_SOURCE: &str = "extraction";

const EXTRACTION_PROMPT: &str = r#"You maintain long-term memory for a roleplay conversation between {user} and {character}.
Read the recent conversation and propose facts worth remembering in future conversations.

For each memory output an object with:
- "content": one standalone sentence
- "keywords": a few lowercase words useful for lookup
- "importance": an integer from 1 (trivial) to 10 (critical)
- "category": one of fact, preference, relationship, event, trait, other

Only include information that is specific and likely to matter later.
If nothing is worth remembering, return [].

Conversation:
{conversation}
Respond with a JSON array only."#;

/// Display names used in the extraction prompt.
#[derive(Debug, Clone, Default)]
pub struct ExtractionContext {
    pub character_name: Option<String>,
    pub user_name: Option<String>,
}

impl ExtractionContext {
    fn character(&self) -> &str {
        self.character_name.as_deref().unwrap_or("Assistant")
    }

    fn user(&self) -> &str {
        self.user_name.as_deref().unwrap_or("User")
    }
}

/// A proposed memory, importance already rescaled to 0-100.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryCandidate {
    pub content: String,
    pub keywords: Vec<String>,
    pub importance: u8,
    pub category: String,
}

impl MemoryCandidate {
    pub fn into_entry(self) -> MemoryEntry {
        MemoryEntry::auto(self.content)
            .with_keywords(self.keywords)
            .with_importance(i64::from(self.importance))
            .with_category(self.category)
            .with_source(EXTRACTION_SOURCE)
    }
}

/// Compiled, case-insensitive trigger patterns.
#[derive(Debug, Clone)]
pub struct TriggerMatcher {
    patterns: Vec<Regex>,
}

impl TriggerMatcher {
    pub fn new(patterns: &[String]) -> Result<Self, MemoriaError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| MemoriaError::Config(format!("invalid trigger pattern `{p}`: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(text))
    }
}

/// Whether extraction should run for this turn under `mode`.
pub fn should_extract(
    mode: ExtractionMode,
    triggers: &TriggerMatcher,
    messages: &[ConversationMessage],
) -> bool {
    match mode {
        ExtractionMode::Off => false,
        ExtractionMode::Auto => !messages.is_empty(),
        ExtractionMode::Trigger => messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .is_some_and(|m| triggers.is_match(&m.content)),
    }
}

/// Build the extraction prompt from the last `recent_turns` messages.
pub fn build_extraction_prompt(
    messages: &[ConversationMessage],
    recent_turns: usize,
    context: &ExtractionContext,
) -> String {
    let start = messages.len().saturating_sub(recent_turns);
    let mut conversation = String::new();
    for msg in &messages[start..] {
        let speaker = match msg.role {
            Role::User => context.user(),
            Role::Assistant => context.character(),
            Role::System => "System",
        };
        conversation.push_str(&format!("{speaker}: {}\n", msg.content));
    }

    EXTRACTION_PROMPT
        .replace("{user}", context.user())
        .replace("{character}", context.character())
        .replace("{conversation}", &conversation)
}

/// Parse candidates from a model response.
///
/// The first well-formed JSON array anywhere in the text is used, so prose
/// and code fences around it are ignored. Malformed output yields no
/// candidates.
pub fn parse_extraction_response(response: &str) -> Vec<MemoryCandidate> {
    let Some(items) = first_json_array(response) else {
        if !response.trim().is_empty() {
            warn!("extraction response contained no JSON array");
            debug!(response, "raw extraction response");
        }
        return Vec::new();
    };
    items.iter().filter_map(candidate_from_value).collect()
}

fn candidate_from_value(value: &Value) -> Option<MemoryCandidate> {
    let content = value.get("content")?.as_str()?.trim();
    if content.is_empty() {
        return None;
    }

    let keywords = value
        .get("keywords")
        .and_then(Value::as_array)
        .map(|ks| {
            ks.iter()
                .filter_map(Value::as_str)
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let raw_importance = match value.get("importance") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .unwrap_or(5.0);
    let importance = clamp_importance((raw_importance * 10.0).round() as i64);

    let category = value
        .get("category")
        .and_then(Value::as_str)
        .map(|c| c.trim().to_lowercase())
        .filter(|c| EXTRACTION_CATEGORIES.contains(&c.as_str()))
        .unwrap_or_else(|| "other".to_string());

    Some(MemoryCandidate {
        content: content.to_string(),
        keywords,
        importance,
        category,
    })
}

/// Find the first balanced `[...]` span that parses as a JSON array.
fn first_json_array(text: &str) -> Option<Vec<Value>> {
    let bytes = text.as_bytes();
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find('[') {
        let start = search_from + offset;
        if let Some(end) = balanced_end(bytes, start)
            && let Ok(items) = serde_json::from_str::<Vec<Value>>(&text[start..=end])
        {
            return Some(items);
        }
        search_from = start + 1;
    }
    None
}

/// Index of the bracket closing the one at `start`, skipping string
/// literals.
fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' | b'{' => depth += 1,
            b']' | b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// LLM-backed extraction with similarity dedup.
pub struct MemoryExtractor {
    manager: Arc<MemoryManager>,
    completion: Arc<dyn CompletionAdapter>,
    config: ExtractionConfig,
    triggers: TriggerMatcher,
}

impl MemoryExtractor {
    /// Uses the manager's extraction settings.
    pub fn new(
        manager: Arc<MemoryManager>,
        completion: Arc<dyn CompletionAdapter>,
    ) -> Result<Self, MemoriaError> {
        let config = manager.extraction_config().clone();
        Self::with_config(manager, completion, config)
    }

    pub fn with_config(
        manager: Arc<MemoryManager>,
        completion: Arc<dyn CompletionAdapter>,
        config: ExtractionConfig,
    ) -> Result<Self, MemoriaError> {
        let triggers = TriggerMatcher::new(&config.triggers)?;
        Ok(Self {
            manager,
            completion,
            config,
            triggers,
        })
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Whether the configured mode calls for extraction on this turn.
    pub fn should_extract(&self, messages: &[ConversationMessage]) -> bool {
        should_extract(self.config.mode, &self.triggers, messages)
    }

    /// One completion call, parsed into candidates. Nothing is stored.
    pub async fn extract_candidates(
        &self,
        messages: &[ConversationMessage],
        context: &ExtractionContext,
    ) -> Result<Vec<MemoryCandidate>, MemoriaError> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        let prompt = build_extraction_prompt(messages, self.config.recent_turns, context);
        let response = self.completion.complete(&prompt).await?;
        let candidates = parse_extraction_response(&response);
        debug!(candidates = candidates.len(), "extraction response parsed");
        Ok(candidates)
    }

    /// Run extraction for a turn if the mode allows it, and store every
    /// candidate that is not a duplicate. Returns the stored entries.
    pub async fn extract_and_store(
        &self,
        book_id: &str,
        messages: &[ConversationMessage],
        context: &ExtractionContext,
    ) -> Result<Vec<MemoryEntry>, MemoriaError> {
        if !self.should_extract(messages) {
            return Ok(Vec::new());
        }
        let candidates = self.extract_candidates(messages, context).await?;
        self.store_candidates(book_id, candidates).await
    }

    /// Dedup and store candidates.
    ///
    /// A candidate is dropped when its content already exists verbatim in
    /// the book, or when its closest indexed neighbour scores at or above
    /// `dedup_threshold`.
    pub async fn store_candidates(
        &self,
        book_id: &str,
        candidates: Vec<MemoryCandidate>,
    ) -> Result<Vec<MemoryEntry>, MemoriaError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let book = self
            .manager
            .get_book(book_id)
            .await?
            .ok_or_else(|| MemoriaError::NotFound {
                kind: "book".into(),
                id: book_id.to_string(),
            })?;
        let mut seen: HashSet<String> = book.entries.iter().map(|e| e.content.clone()).collect();

        let mut stored = Vec::new();
        for candidate in candidates {
            if !seen.insert(candidate.content.clone()) {
                debug!(content = %candidate.content, "skipping exact duplicate");
                continue;
            }
            if self
                .manager
                .is_duplicate(book_id, &candidate.content, self.config.dedup_threshold)
                .await
            {
                debug!(content = %candidate.content, "skipping near-duplicate");
                continue;
            }
            let entry = self
                .manager
                .add_memory_with_embedding(book_id, candidate.into_entry())
                .await?;
            stored.push(entry);
        }

        if !stored.is_empty() {
            info!(book_id, stored = stored.len(), "memories extracted");
        }
        Ok(stored)
    }
}

/// Trigger-phrase extraction without an LLM.
#[derive(Debug, Clone)]
pub struct TriggerExtractor {
    triggers: TriggerMatcher,
}

impl TriggerExtractor {
    pub fn new(patterns: &[String]) -> Result<Self, MemoriaError> {
        Ok(Self {
            triggers: TriggerMatcher::new(patterns)?,
        })
    }

    /// Every user or assistant message containing a trigger becomes an
    /// `auto` entry, unless an entry with the same content and source
    /// already exists.
    pub fn extract(
        &self,
        messages: &[ConversationMessage],
        existing: &[MemoryEntry],
    ) -> Vec<MemoryEntry> {
        let mut known: HashSet<(String, Option<String>)> = existing
            .iter()
            .map(|e| (e.content.clone(), e.source.clone()))
            .collect();

        let mut entries = Vec::new();
        for msg in messages {
            let category = match msg.role {
                Role::User => "user-stated",
                Role::Assistant => "ai-noted",
                Role::System => continue,
            };
            let content = msg.content.trim();
            if content.is_empty() || !self.triggers.is_match(content) {
                continue;
            }
            let source = msg.role.to_string();
            if !known.insert((content.to_string(), Some(source.clone()))) {
                continue;
            }
            entries.push(
                MemoryEntry::auto(content)
                    .with_importance(TRIGGER_IMPORTANCE)
                    .with_category(category)
                    .with_source(source),
            );
        }
        entries
    }

    /// Extract and store into `book_id`. Storage goes through the manager,
    /// so entries are indexed when a provider is available.
    pub async fn extract_and_store(
        &self,
        manager: &MemoryManager,
        book_id: &str,
        messages: &[ConversationMessage],
    ) -> Result<Vec<MemoryEntry>, MemoriaError> {
        let book = manager
            .get_book(book_id)
            .await?
            .ok_or_else(|| MemoriaError::NotFound {
                kind: "book".into(),
                id: book_id.to_string(),
            })?;

        let mut stored = Vec::new();
        for entry in self.extract(messages, &book.entries) {
            stored.push(manager.add_memory_with_embedding(book_id, entry).await?);
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use memoria_config::model::{EmbeddingBackend, MemoriaConfig};
    use memoria_test_utils::{MockCompletion, MockEmbedder};

    use super::*;
    use crate::book_store::BookStore;
    use crate::embedding::{EmbeddingProvider, ProviderRegistry};
    use crate::index::IndexRegistry;

    fn default_triggers() -> TriggerMatcher {
        TriggerMatcher::new(&ExtractionConfig::default().triggers).unwrap()
    }

    fn manager(dir: &std::path::Path, providers: ProviderRegistry) -> Arc<MemoryManager> {
        let mut config = MemoriaConfig::default();
        config.storage.data_dir = dir.to_string_lossy().into_owned();
        config.embedding.backend = EmbeddingBackend::None;
        config.extraction.mode = ExtractionMode::Auto;
        Arc::new(MemoryManager::with_registries(
            BookStore::new(config.storage.books_dir()),
            IndexRegistry::new(config.storage.index_dir()),
            providers,
            &config,
        ))
    }

    #[test]
    fn parse_tolerates_prose_and_fences() {
        let response = r#"Sure! Here is what I found [see below]:
```json
[
  {"content": "User's dog is named Max", "keywords": ["Dog", "max"], "importance": 8, "category": "fact"},
  {"content": "User prefers tea", "importance": "6", "category": "Preference"}
]
```
Let me know if you need more."#;
        let candidates = parse_extraction_response(response);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].content, "User's dog is named Max");
        assert_eq!(candidates[0].keywords, vec!["dog", "max"]);
        assert_eq!(candidates[0].importance, 80);
        assert_eq!(candidates[1].importance, 60);
        assert_eq!(candidates[1].category, "preference");
    }

    #[test]
    fn parse_maps_unknown_category_and_clamps_importance() {
        let response =
            r#"[{"content": "Met at the harbour", "importance": 42, "category": "memory"}]"#;
        let candidates = parse_extraction_response(response);
        assert_eq!(candidates[0].category, "other");
        assert_eq!(candidates[0].importance, 100);
    }

    #[test]
    fn parse_skips_items_without_content() {
        let response = r#"[{"content": "  "}, {"keywords": ["x"]}, "text", {"content": "kept"}]"#;
        let candidates = parse_extraction_response(response);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].content, "kept");
        assert_eq!(candidates[0].importance, 50);
    }

    #[test]
    fn parse_malformed_or_empty_returns_nothing() {
        assert!(parse_extraction_response("I could not find anything.").is_empty());
        assert!(parse_extraction_response("[{\"content\": \"unterminated\"").is_empty());
        assert!(parse_extraction_response("[]").is_empty());
        assert!(parse_extraction_response("").is_empty());
    }

    #[test]
    fn brackets_inside_strings_do_not_confuse_the_scanner() {
        let response = r#"[{"content": "Uses [brackets] and \"quotes\"", "importance": 3}]"#;
        let candidates = parse_extraction_response(response);
        assert_eq!(candidates[0].content, r#"Uses [brackets] and "quotes""#);
        assert_eq!(candidates[0].importance, 30);
    }

    #[test]
    fn prompt_uses_recent_turns_and_names() {
        let messages: Vec<ConversationMessage> = (0..8)
            .map(|i| {
                if i % 2 == 0 {
                    ConversationMessage::user(format!("user line {i}"))
                } else {
                    ConversationMessage::assistant(format!("bot line {i}"))
                }
            })
            .collect();
        let context = ExtractionContext {
            character_name: Some("Aria".into()),
            user_name: Some("Sam".into()),
        };

        let prompt = build_extraction_prompt(&messages, 6, &context);
        assert!(!prompt.contains("user line 0"));
        assert!(!prompt.contains("bot line 1"));
        assert!(prompt.contains("Sam: user line 2"));
        assert!(prompt.contains("Aria: bot line 7"));
        assert!(prompt.contains("between Sam and Aria"));
    }

    #[test]
    fn trigger_mode_checks_latest_user_message() {
        let triggers = default_triggers();
        let remember = vec![
            ConversationMessage::user("Please REMEMBER my cat is Miso"),
            ConversationMessage::assistant("Noted."),
        ];
        let chatter = vec![
            ConversationMessage::user("remember the alamo"),
            ConversationMessage::user("anyway, how are you?"),
        ];
        let chinese = vec![ConversationMessage::user("请记住我喜欢喝茶")];

        assert!(should_extract(ExtractionMode::Trigger, &triggers, &remember));
        assert!(!should_extract(ExtractionMode::Trigger, &triggers, &chatter));
        assert!(should_extract(ExtractionMode::Trigger, &triggers, &chinese));
        assert!(!should_extract(ExtractionMode::Off, &triggers, &remember));
        assert!(should_extract(ExtractionMode::Auto, &triggers, &chatter));
        assert!(!should_extract(ExtractionMode::Auto, &triggers, &[]));
    }

    #[test]
    fn invalid_trigger_is_config_error() {
        assert!(matches!(
            TriggerMatcher::new(&["remember(".to_string()]),
            Err(MemoriaError::Config(_))
        ));
    }

    #[test]
    fn trigger_extractor_tags_by_role_and_dedups() {
        let extractor = TriggerExtractor::new(&ExtractionConfig::default().triggers).unwrap();
        let existing = vec![
            MemoryEntry::auto("Remember I am vegetarian").with_source("user"),
        ];
        let messages = vec![
            ConversationMessage::user("Remember I am vegetarian"),
            ConversationMessage::user("Don't forget my sister visits Friday"),
            ConversationMessage::user("Don't forget my sister visits Friday"),
            ConversationMessage::assistant("I'll keep in mind that you like hiking"),
            ConversationMessage::user("nothing to see here"),
        ];

        let entries = extractor.extract(&messages, &existing);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].content, "Don't forget my sister visits Friday");
        assert_eq!(entries[0].category.as_deref(), Some("user-stated"));
        assert_eq!(entries[0].importance, 60);
        assert_eq!(entries[0].entry_type, crate::types::EntryType::Auto);
        assert_eq!(entries[1].category.as_deref(), Some("ai-noted"));
        assert_eq!(entries[1].source.as_deref(), Some("assistant"));
    }

    #[tokio::test]
    async fn extract_and_store_skips_near_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let providers =
            ProviderRegistry::with_provider(EmbeddingProvider::new(Arc::new(MockEmbedder::new(64))));
        let manager = manager(dir.path(), providers);
        let book = manager.create_memory_book("b", None, None).await.unwrap();
        manager
            .add_memory_with_embedding(&book.id, MemoryEntry::manual("User's cat is named Miso"))
            .await
            .unwrap();

        let completion = Arc::new(MockCompletion::new([r#"[
            {"content": "user's cat is named miso!", "importance": 7, "category": "fact"},
            {"content": "User works night shifts at a bakery", "importance": 6, "category": "fact"}
        ]"#]));
        let extractor = MemoryExtractor::new(Arc::clone(&manager), completion.clone()).unwrap();

        let stored = extractor
            .extract_and_store(
                &book.id,
                &[ConversationMessage::user("I work nights at the bakery")],
                &ExtractionContext::default(),
            )
            .await
            .unwrap();

        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "User works night shifts at a bakery");
        assert_eq!(stored[0].importance, 60);
        assert_eq!(stored[0].source.as_deref(), Some(EXTRACTION_SOURCE));
        assert_eq!(completion.prompts().len(), 1);
        assert_eq!(manager.get_book(&book.id).await.unwrap().unwrap().entries.len(), 2);
    }

    #[tokio::test]
    async fn extraction_without_provider_skips_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), ProviderRegistry::disabled());
        let book = manager.create_memory_book("b", None, None).await.unwrap();
        manager
            .add_memory(&book.id, MemoryEntry::manual("Likes rainy days"))
            .await
            .unwrap();

        let completion = Arc::new(MockCompletion::new([
            r#"[{"content": "Likes rainy days a lot"}, {"content": "Likes rainy days"}]"#,
        ]));
        let extractor = MemoryExtractor::new(Arc::clone(&manager), completion).unwrap();
        let stored = extractor
            .extract_and_store(
                &book.id,
                &[ConversationMessage::user("it's raining again, lovely")],
                &ExtractionContext::default(),
            )
            .await
            .unwrap();

        // Similar wording is kept; only the verbatim copy is dropped.
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "Likes rainy days a lot");
    }

    #[tokio::test]
    async fn off_mode_never_calls_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), ProviderRegistry::disabled());
        let book = manager.create_memory_book("b", None, None).await.unwrap();
        let completion = Arc::new(MockCompletion::new(["[]"]));
        let config = ExtractionConfig {
            mode: ExtractionMode::Off,
            ..ExtractionConfig::default()
        };
        let extractor =
            MemoryExtractor::with_config(manager, completion.clone(), config).unwrap();

        let stored = extractor
            .extract_and_store(
                &book.id,
                &[ConversationMessage::user("remember this please")],
                &ExtractionContext::default(),
            )
            .await
            .unwrap();
        assert!(stored.is_empty());
        assert!(completion.prompts().is_empty());
    }

    #[tokio::test]
    async fn trigger_extractor_stores_through_manager() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), ProviderRegistry::disabled());
        let book = manager.create_memory_book("b", None, None).await.unwrap();
        let extractor = TriggerExtractor::new(&ExtractionConfig::default().triggers).unwrap();
        let messages = [ConversationMessage::user("remember that I hate olives")];

        let first = extractor
            .extract_and_store(&manager, &book.id, &messages)
            .await
            .unwrap();
        let second = extractor
            .extract_and_store(&manager, &book.id, &messages)
            .await
            .unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(manager.get_book(&book.id).await.unwrap().unwrap().entries.len(), 1);
    }
}
