// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ollama `/api/embed` backend.

use std::time::Duration;

use async_trait::async_trait;
use memoria_core::types::{EmbeddingInput, EmbeddingOutput, HealthStatus};
use memoria_core::{EmbeddingAdapter, MemoriaError, PluginAdapter};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

use super::http::{JsonClient, join_url};

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embeds texts through a local or remote Ollama server.
pub struct OllamaEmbedder {
    client: JsonClient,
    url: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, MemoriaError> {
        Ok(Self {
            client: JsonClient::new(HeaderMap::new(), timeout)?,
            url: join_url(base_url, "api/embed"),
            model: model.into(),
        })
    }
}

#[async_trait]
impl PluginAdapter for OllamaEmbedder {
    fn name(&self) -> &str {
        "ollama"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    async fn health_check(&self) -> Result<HealthStatus, MemoriaError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl EmbeddingAdapter for OllamaEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, MemoriaError> {
        if input.texts.is_empty() {
            return Ok(EmbeddingOutput {
                embeddings: Vec::new(),
                dimensions: 0,
            });
        }

        let request = EmbedRequest {
            model: &self.model,
            input: &input.texts,
        };
        let response: EmbedResponse = self.client.post(&self.url, &request).await?;

        if response.embeddings.len() != input.texts.len() {
            return Err(MemoriaError::embedding(format!(
                "Ollama returned {} embeddings for {} inputs",
                response.embeddings.len(),
                input.texts.len()
            )));
        }

        let dimensions = response.embeddings.first().map(Vec::len).unwrap_or(0);
        Ok(EmbeddingOutput {
            embeddings: response.embeddings,
            dimensions,
        })
    }
}
