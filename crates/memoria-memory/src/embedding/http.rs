// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared JSON-over-HTTP plumbing for remote embedding backends.

use std::time::Duration;

use memoria_core::MemoriaError;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Delay before the single retry of a transient failure.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// A reqwest client with a fixed timeout and one retry on transient statuses.
#[derive(Debug, Clone)]
pub(crate) struct JsonClient {
    client: reqwest::Client,
    timeout: Duration,
    max_retries: u32,
}

impl JsonClient {
    pub(crate) fn new(headers: HeaderMap, timeout: Duration) -> Result<Self, MemoriaError> {
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| MemoriaError::Embedding {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            timeout,
            max_retries: 1,
        })
    }

    /// POST `body` as JSON to `url` and decode the JSON response.
    ///
    /// On 429, 500, 502 or 503 the request is retried once after one second.
    pub(crate) async fn post<B, R>(&self, url: &str, body: &B) -> Result<R, MemoriaError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                warn!(attempt, url, "retrying embedding request after transient error");
                tokio::time::sleep(RETRY_DELAY).await;
            }

            let response = self
                .client
                .post(url)
                .json(body)
                .send()
                .await
                .map_err(|e| self.request_error(e))?;

            let status = response.status();
            debug!(status = %status, attempt, "embedding response received");

            if status.is_success() {
                let text = response.text().await.map_err(|e| self.request_error(e))?;
                return serde_json::from_str(&text).map_err(|e| MemoriaError::Embedding {
                    message: format!("failed to parse embedding response: {e}"),
                    source: Some(Box::new(e)),
                });
            }

            let body = response.text().await.unwrap_or_default();
            let error = MemoriaError::embedding(format!("embedding API returned {status}: {body}"));

            if is_transient_error(status) && attempt < self.max_retries {
                warn!(status = %status, "transient embedding error, will retry");
                last_error = Some(error);
                continue;
            }
            return Err(error);
        }

        Err(last_error
            .unwrap_or_else(|| MemoriaError::embedding("embedding request failed after retries")))
    }

    fn request_error(&self, e: reqwest::Error) -> MemoriaError {
        if e.is_timeout() {
            return MemoriaError::Timeout {
                duration: self.timeout,
            };
        }
        MemoriaError::Embedding {
            message: format!("HTTP request failed: {e}"),
            source: Some(Box::new(e)),
        }
    }
}

/// Statuses worth one more attempt.
fn is_transient_error(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503)
}

/// Join a base URL and a path without doubling the slash.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_statuses() {
        for code in [429u16, 500, 502, 503] {
            assert!(is_transient_error(StatusCode::from_u16(code).unwrap()));
        }
        for code in [400u16, 401, 404, 422] {
            assert!(!is_transient_error(StatusCode::from_u16(code).unwrap()));
        }
    }

    #[test]
    fn join_url_handles_slashes() {
        assert_eq!(join_url("http://x/v1/", "/embeddings"), "http://x/v1/embeddings");
        assert_eq!(join_url("http://x", "api/embed"), "http://x/api/embed");
    }
}
