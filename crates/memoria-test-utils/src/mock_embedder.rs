// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding adapters for deterministic testing.
//!
//! `MockEmbedder` hashes each lowercase word into one of `dim` buckets and
//! counts occurrences, so texts sharing vocabulary land close together and
//! texts with the same word set have cosine similarity 1.0.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use memoria_core::{
    EmbeddingAdapter, EmbeddingInput, EmbeddingOutput, HealthStatus, MemoriaError, PluginAdapter,
};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Bag-of-words embedder with a fixed dimensionality.
pub struct MockEmbedder {
    dim: usize,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl MockEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim: dim.max(1),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// While set, `embed` fails as if the backend were unreachable.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `embed` invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = (fnv1a(&token.to_lowercase()) % self.dim as u64) as usize;
            vector[bucket] += 1.0;
        }
        vector
    }
}

fn fnv1a(token: &str) -> u64 {
    token.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

#[async_trait]
impl PluginAdapter for MockEmbedder {
    fn name(&self) -> &str {
        "mock"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    async fn health_check(&self) -> Result<HealthStatus, MemoriaError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl EmbeddingAdapter for MockEmbedder {
    fn model(&self) -> &str {
        "mock-embed"
    }

    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, MemoriaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(MemoriaError::embedding("mock embedder switched off"));
        }
        Ok(EmbeddingOutput {
            embeddings: input.texts.iter().map(|t| self.embed_text(t)).collect(),
            dimensions: self.dim,
        })
    }
}

/// Embedder whose every call fails with the configured message.
pub struct FailingEmbedder {
    message: String,
}

impl FailingEmbedder {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl PluginAdapter for FailingEmbedder {
    fn name(&self) -> &str {
        "failing"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    async fn health_check(&self) -> Result<HealthStatus, MemoriaError> {
        Ok(HealthStatus::Unhealthy(self.message.clone()))
    }
}

#[async_trait]
impl EmbeddingAdapter for FailingEmbedder {
    fn model(&self) -> &str {
        "failing-embed"
    }

    async fn embed(&self, _input: EmbeddingInput) -> Result<EmbeddingOutput, MemoriaError> {
        Err(MemoriaError::embedding(self.message.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        dot / (na * nb)
    }

    #[tokio::test]
    async fn same_words_give_identical_direction() {
        let embedder = MockEmbedder::new(32);
        let out = embedder
            .embed(EmbeddingInput {
                texts: vec!["Coffee, black!".into(), "black coffee".into()],
            })
            .await
            .unwrap();
        assert_eq!(out.dimensions, 32);
        assert!((cosine(&out.embeddings[0], &out.embeddings[1]) - 1.0).abs() < 1e-6);
        assert_eq!(embedder.calls(), 1);
    }

    #[tokio::test]
    async fn empty_text_is_zero_vector() {
        let embedder = MockEmbedder::new(8);
        assert!(embedder.embed_text("  ").iter().all(|v| *v == 0.0));
    }

    #[tokio::test]
    async fn can_be_switched_off_and_on() {
        let embedder = MockEmbedder::new(8);
        let input = || EmbeddingInput {
            texts: vec!["tea".into()],
        };
        embedder.set_failing(true);
        assert!(embedder.embed(input()).await.is_err());
        embedder.set_failing(false);
        assert!(embedder.embed(input()).await.is_ok());
        assert_eq!(embedder.calls(), 2);
    }

    #[tokio::test]
    async fn failing_embedder_errors() {
        let embedder = FailingEmbedder::new("offline");
        let err = embedder
            .embed(EmbeddingInput {
                texts: vec!["x".into()],
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("offline"));
    }
}
