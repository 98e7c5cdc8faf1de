// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Weighted score fusion for hybrid search.

use std::collections::HashMap;

use memoria_config::model::SearchConfig;
use serde::Serialize;
use strum::Display;

/// Which search produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Vector,
    Keyword,
    Hybrid,
}

/// An entry id with its relevance score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredMatch {
    pub id: String,
    pub score: f32,
    pub match_type: MatchType,
}

impl ScoredMatch {
    pub fn new(id: impl Into<String>, score: f32, match_type: MatchType) -> Self {
        Self {
            id: id.into(),
            score,
            match_type,
        }
    }
}

/// Weights and threshold for [`fuse_weighted`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HybridOptions {
    pub vector_weight: f32,
    pub keyword_weight: f32,
    /// Applied to the combined score.
    pub min_score: f32,
}

impl Default for HybridOptions {
    fn default() -> Self {
        Self {
            vector_weight: 0.7,
            keyword_weight: 0.3,
            min_score: 0.0,
        }
    }
}

impl From<&SearchConfig> for HybridOptions {
    fn from(config: &SearchConfig) -> Self {
        Self {
            vector_weight: config.vector_weight,
            keyword_weight: config.keyword_weight,
            min_score: config.min_score,
        }
    }
}

/// Merge vector and keyword hits by id.
///
/// Each entry scores `vector * vector_weight + keyword * keyword_weight`,
/// with a missing side contributing nothing. Entries found by both searches
/// are tagged [`MatchType::Hybrid`]. Results below `min_score` are dropped;
/// the rest are sorted by score, descending, and cut to `limit`.
pub fn fuse_weighted(
    vector_hits: &[ScoredMatch],
    keyword_hits: &[ScoredMatch],
    options: &HybridOptions,
    limit: usize,
) -> Vec<ScoredMatch> {
    let mut merged: HashMap<&str, ScoredMatch> = HashMap::new();

    for hit in vector_hits {
        merged.insert(
            hit.id.as_str(),
            ScoredMatch::new(
                hit.id.clone(),
                hit.score * options.vector_weight,
                MatchType::Vector,
            ),
        );
    }

    for hit in keyword_hits {
        let weighted = hit.score * options.keyword_weight;
        merged
            .entry(hit.id.as_str())
            .and_modify(|m| {
                m.score += weighted;
                m.match_type = MatchType::Hybrid;
            })
            .or_insert_with(|| ScoredMatch::new(hit.id.clone(), weighted, MatchType::Keyword));
    }

    let mut results: Vec<ScoredMatch> = merged
        .into_values()
        .filter(|m| m.score >= options.min_score)
        .collect();
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.id.cmp(&b.id))
    });
    results.truncate(limit);
    results
}
