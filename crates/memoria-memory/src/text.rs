// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query tokenization shared by the keyword index and offline retrieval.

use std::collections::HashSet;

/// Tokens with this many characters or fewer are discarded.
const MIN_TOKEN_CHARS: usize = 2;

/// Common English and Chinese function words ignored by keyword extraction.
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "had", "her", "was",
    "one", "our", "out", "has", "him", "his", "how", "its", "may", "new", "now", "old", "see",
    "two", "way", "who", "did", "get", "got", "let", "say", "she", "too", "use", "what", "when",
    "where", "which", "while", "with", "would", "could", "should", "this", "that", "these",
    "those", "there", "their", "them", "then", "than", "they", "been", "being", "have", "does",
    "doing", "from", "into", "about", "over", "under", "again", "just", "also", "some", "such",
    "only", "very", "will", "your", "yours", "more", "most", "other", "each", "both", "here",
    "why", "because", "were", "shall", "must", "might", "我们", "你们", "他们", "她们", "这个",
    "那个", "这些", "那些", "什么", "怎么", "为什么", "因为", "所以", "但是", "而且", "然后",
    "如果", "虽然", "已经", "还是", "就是", "没有", "可以", "一个", "自己", "这样", "那样",
    "的话", "时候",
];

/// True for characters in the CJK unified ideograph blocks, kana and hangul.
pub fn is_cjk(c: char) -> bool {
    matches!(
        c as u32,
        0x3040..=0x30FF
            | 0x3400..=0x4DBF
            | 0x4E00..=0x9FFF
            | 0xAC00..=0xD7AF
            | 0xF900..=0xFAFF
            | 0x20000..=0x2A6DF
    )
}

/// Split text into lowercase word tokens, dropping punctuation and tokens of
/// two characters or fewer.
pub fn tokenize(text: &str) -> Vec<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || is_cjk(c) { c } else { ' ' })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|t| t.chars().count() > MIN_TOKEN_CHARS)
        .map(str::to_string)
        .collect()
}

/// Candidate keywords for offline matching: tokens minus stop words,
/// deduplicated in first-seen order.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let stop: HashSet<&str> = STOP_WORDS.iter().copied().collect();
    let mut seen = HashSet::new();
    tokenize(text)
        .into_iter()
        .filter(|t| !stop.contains(t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// True when `haystack` contains any of `needles`, ignoring case.
pub fn contains_any(haystack: &str, needles: &[String]) -> bool {
    let haystack = haystack.to_lowercase();
    needles.iter().any(|n| haystack.contains(n.as_str()))
}
