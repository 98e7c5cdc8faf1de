// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! OpenAI-compatible `/embeddings` backend.

use std::time::Duration;

use async_trait::async_trait;
use memoria_core::types::{EmbeddingInput, EmbeddingOutput, HealthStatus};
use memoria_core::{EmbeddingAdapter, MemoriaError, PluginAdapter};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};

use super::http::{JsonClient, join_url};

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// Embeds texts through any server speaking the OpenAI embeddings API.
pub struct OpenAiEmbedder {
    client: JsonClient,
    url: String,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, MemoriaError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|e| {
                MemoriaError::Config(format!("invalid OpenAI API key header value: {e}"))
            })?,
        );

        Ok(Self {
            client: JsonClient::new(headers, timeout)?,
            url: join_url(base_url, "embeddings"),
            model: model.into(),
        })
    }
}

/// Resolve the API key from config, then `OPENAI_API_KEY`.
pub(crate) fn resolve_api_key(config_key: &Option<String>) -> Result<String, MemoriaError> {
    if let Some(key) = config_key
        && !key.is_empty()
    {
        return Ok(key.clone());
    }

    std::env::var("OPENAI_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| {
            MemoriaError::embedding(
                "OpenAI API key not found. Set embedding.openai.api_key in config or OPENAI_API_KEY environment variable.",
            )
        })
}

#[async_trait]
impl PluginAdapter for OpenAiEmbedder {
    fn name(&self) -> &str {
        "openai"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    async fn health_check(&self) -> Result<HealthStatus, MemoriaError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl EmbeddingAdapter for OpenAiEmbedder {
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

        let request = EmbeddingRequest {
            model: &self.model,
            input: &input.texts,
        };
        let response: EmbeddingResponse = self.client.post(&self.url, &request).await?;

        let embeddings = reorder_by_index(response.data, input.texts.len())?;
        let dimensions = embeddings.first().map(Vec::len).unwrap_or(0);
        Ok(EmbeddingOutput {
            embeddings,
            dimensions,
        })
    }
}

/// The API may return `data[]` in any order; `index` says which input each
/// vector belongs to.
fn reorder_by_index(
    data: Vec<EmbeddingDatum>,
    expected: usize,
) -> Result<Vec<Vec<f32>>, MemoriaError> {
    if data.len() != expected {
        return Err(MemoriaError::embedding(format!(
            "OpenAI returned {} embeddings for {expected} inputs",
            data.len()
        )));
    }

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for datum in data {
        let slot = slots.get_mut(datum.index).ok_or_else(|| {
            MemoriaError::embedding(format!("embedding index {} out of range", datum.index))
        })?;
        *slot = Some(datum.embedding);
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(i, v)| v.ok_or_else(|| MemoriaError::embedding(format!("missing embedding {i}"))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn embedder(server: &MockServer) -> OpenAiEmbedder {
        OpenAiEmbedder::new(
            "sk-test",
            &format!("{}/v1", server.uri()),
            "text-embedding-3-small",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn input(texts: &[&str]) -> EmbeddingInput {
        EmbeddingInput {
            texts: texts.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn reorders_results_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "text-embedding-3-small",
                "input": ["first", "second"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "object": "list",
                "data": [
                    {"object": "embedding", "index": 1, "embedding": [0.0, 1.0]},
                    {"object": "embedding", "index": 0, "embedding": [1.0, 0.0]}
                ],
                "model": "text-embedding-3-small"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let out = embedder(&server)
            .embed(input(&["first", "second"]))
            .await
            .unwrap();
        assert_eq!(out.embeddings, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert_eq!(out.dimensions, 2);
    }

    #[tokio::test]
    async fn retries_once_on_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [0.5, 0.5]}]
            })))
            .mount(&server)
            .await;

        let out = embedder(&server).embed(input(&["hi"])).await.unwrap();
        assert_eq!(out.embeddings.len(), 1);
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let err = embedder(&server).embed(input(&["hi"])).await.unwrap_err();
        assert!(matches!(err, MemoriaError::Embedding { .. }));
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn count_mismatch_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"index": 0, "embedding": [1.0]}]
            })))
            .mount(&server)
            .await;

        let err = embedder(&server)
            .embed(input(&["a", "b"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("1 embeddings for 2 inputs"));
    }

    #[test]
    fn reorder_rejects_out_of_range_index() {
        let data = vec![EmbeddingDatum {
            index: 3,
            embedding: vec![1.0],
        }];
        assert!(reorder_by_index(data, 1).is_err());
    }

    #[test]
    fn config_key_wins_over_environment() {
        assert_eq!(
            resolve_api_key(&Some("sk-config".to_string())).unwrap(),
            "sk-config"
        );
    }
}
