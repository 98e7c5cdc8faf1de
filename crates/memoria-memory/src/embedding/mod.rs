// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding providers: backend selection, fallback, and caching.
//!
//! Every backend implements [`EmbeddingAdapter`]. [`EmbeddingProvider`]
//! wraps one adapter and guarantees order-preserving, L2-normalized output.
//! [`ProviderRegistry`] resolves the configured backend once per
//! (backend, model) pair and caches the result.

mod http;
pub mod local;
pub mod ollama;
pub mod openai;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use memoria_config::model::{EmbeddingBackend, EmbeddingConfig, MemoriaConfig};
use memoria_core::types::{EmbeddingInput, HealthStatus};
use memoria_core::{EmbeddingAdapter, MemoriaError};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::model_manager::{DEFAULT_LOCAL_MODEL, ModelManager};
use crate::types::l2_normalize;

pub use local::LocalEmbedder;
pub use ollama::OllamaEmbedder;
pub use openai::OpenAiEmbedder;

/// Order in which `auto` probes backends.
pub const AUTO_ORDER: [EmbeddingBackend; 3] = [
    EmbeddingBackend::Local,
    EmbeddingBackend::OpenAi,
    EmbeddingBackend::Ollama,
];

/// A resolved embedding backend.
#[derive(Clone)]
pub struct EmbeddingProvider {
    id: String,
    adapter: Arc<dyn EmbeddingAdapter>,
}

impl std::fmt::Debug for EmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingProvider")
            .field("id", &self.id)
            .field("model", &self.model())
            .finish()
    }
}

impl EmbeddingProvider {
    /// Wrap an adapter. The provider id is the adapter's name.
    pub fn new(adapter: Arc<dyn EmbeddingAdapter>) -> Self {
        Self {
            id: adapter.name().to_string(),
            adapter,
        }
    }

    /// Backend identifier (`local`, `openai`, `ollama`, ...).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Model tag recorded next to every vector this provider produces.
    pub fn model(&self) -> &str {
        self.adapter.model()
    }

    pub async fn health_check(&self) -> Result<HealthStatus, MemoriaError> {
        self.adapter.health_check().await
    }

    /// Embed one text. Blank text yields an empty vector without a request.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, MemoriaError> {
        let mut out = self.embed_batch(&[text.to_string()]).await?;
        Ok(out.pop().unwrap_or_default())
    }

    /// Embed many texts, preserving input order.
    ///
    /// Blank texts are not sent; their slots hold an empty vector.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemoriaError> {
        let mut results = vec![Vec::new(); texts.len()];
        let (positions, to_send): (Vec<usize>, Vec<String>) = texts
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.trim().is_empty())
            .map(|(i, t)| (i, t.clone()))
            .unzip();

        if to_send.is_empty() {
            return Ok(results);
        }

        debug!(provider = %self.id, count = to_send.len(), "embedding batch");
        let output = self.adapter.embed(EmbeddingInput { texts: to_send }).await?;
        if output.embeddings.len() != positions.len() {
            return Err(MemoriaError::embedding(format!(
                "{} returned {} embeddings for {} texts",
                self.id,
                output.embeddings.len(),
                positions.len()
            )));
        }

        for (pos, vector) in positions.into_iter().zip(output.embeddings) {
            results[pos] = l2_normalize(&vector);
        }
        Ok(results)
    }
}

/// Cache key for resolved providers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderKey {
    pub backend: EmbeddingBackend,
    pub model: Option<String>,
}

/// Resolves and caches embedding providers.
///
/// Resolution results, including "no backend available", are cached until
/// [`ProviderRegistry::reset`]. Construction errors are not cached.
pub struct ProviderRegistry {
    config: EmbeddingConfig,
    models_dir: PathBuf,
    pinned: Option<Arc<EmbeddingProvider>>,
    cache: Mutex<HashMap<ProviderKey, Option<Arc<EmbeddingProvider>>>>,
}

impl ProviderRegistry {
    pub fn new(config: EmbeddingConfig, models_dir: PathBuf) -> Self {
        Self {
            config,
            models_dir,
            pinned: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &MemoriaConfig) -> Self {
        Self::new(config.embedding.clone(), config.storage.models_dir())
    }

    /// A registry that always resolves to `provider`.
    pub fn with_provider(provider: EmbeddingProvider) -> Self {
        let mut registry = Self::disabled();
        registry.pinned = Some(Arc::new(provider));
        registry
    }

    /// A registry that never provides embeddings.
    pub fn disabled() -> Self {
        let config = EmbeddingConfig {
            backend: EmbeddingBackend::None,
            ..EmbeddingConfig::default()
        };
        Self::new(config, PathBuf::new())
    }

    /// The key for the configured backend and model.
    pub fn configured_key(&self) -> ProviderKey {
        ProviderKey {
            backend: self.config.backend,
            model: self.config.model.clone(),
        }
    }

    /// Resolve the configured provider. `Ok(None)` means no backend is
    /// available and callers should use keyword retrieval.
    pub async fn resolve(&self) -> Result<Option<Arc<EmbeddingProvider>>, MemoriaError> {
        if let Some(pinned) = &self.pinned {
            return Ok(Some(Arc::clone(pinned)));
        }
        self.resolve_key(self.configured_key()).await
    }

    /// Resolve a specific backend and model.
    pub async fn resolve_key(
        &self,
        key: ProviderKey,
    ) -> Result<Option<Arc<EmbeddingProvider>>, MemoriaError> {
        let mut cache = self.cache.lock().await;
        if let Some(hit) = cache.get(&key) {
            return Ok(hit.clone());
        }

        let resolved = select_provider(&self.config, &self.models_dir, &key)
            .await?
            .map(Arc::new);
        cache.insert(key, resolved.clone());
        Ok(resolved)
    }

    /// Resolve, turning construction errors into "unavailable" with a warning.
    pub async fn resolve_or_warn(&self) -> Option<Arc<EmbeddingProvider>> {
        match self.resolve().await {
            Ok(provider) => provider,
            Err(e) => {
                warn!(error = %e, "embedding provider unavailable");
                None
            }
        }
    }

    /// Drop every cached resolution.
    pub async fn reset(&self) {
        self.cache.lock().await.clear();
    }

    /// Number of cached resolutions.
    pub async fn cached(&self) -> usize {
        self.cache.lock().await.len()
    }
}

/// Apply the selection table for `key`.
async fn select_provider(
    config: &EmbeddingConfig,
    models_dir: &std::path::Path,
    key: &ProviderKey,
) -> Result<Option<EmbeddingProvider>, MemoriaError> {
    let model = key.model.as_deref();
    match key.backend {
        EmbeddingBackend::None => Ok(None),
        EmbeddingBackend::Auto => {
            for backend in AUTO_ORDER {
                match build_backend(config, models_dir, backend, model, false).await {
                    Ok(provider) => {
                        info!(backend = %backend, model = provider.model(), "embedding provider selected");
                        return Ok(Some(provider));
                    }
                    Err(e) => debug!(backend = %backend, error = %e, "embedding backend not available"),
                }
            }
            warn!("no embedding backend available, retrieval will be keyword-only");
            Ok(None)
        }
        primary => {
            let primary_err = match build_backend(config, models_dir, primary, model, true).await {
                Ok(provider) => {
                    info!(backend = %primary, model = provider.model(), "embedding provider selected");
                    return Ok(Some(provider));
                }
                Err(e) => e,
            };

            let Some(fallback) = config.fallback.filter(|f| {
                *f != primary && !matches!(f, EmbeddingBackend::Auto | EmbeddingBackend::None)
            }) else {
                return Err(primary_err);
            };

            warn!(
                backend = %primary,
                fallback = %fallback,
                error = %primary_err,
                "embedding backend failed, trying fallback"
            );
            match build_backend(config, models_dir, fallback, None, true).await {
                Ok(provider) => Ok(Some(provider)),
                Err(fallback_err) => Err(MemoriaError::Embedding {
                    message: format!(
                        "{primary} embedding backend failed: {primary_err}; fallback {fallback} also failed: {fallback_err}"
                    ),
                    source: Some(Box::new(primary_err)),
                }),
            }
        }
    }
}

/// Construct one backend, or explain why it cannot be constructed.
///
/// `explicit` is false while probing for `auto`; the local model is only
/// downloaded for an explicit selection.
async fn build_backend(
    config: &EmbeddingConfig,
    models_dir: &std::path::Path,
    backend: EmbeddingBackend,
    model: Option<&str>,
    explicit: bool,
) -> Result<EmbeddingProvider, MemoriaError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    let adapter: Arc<dyn EmbeddingAdapter> = match backend {
        EmbeddingBackend::Local => {
            let model = model.unwrap_or(DEFAULT_LOCAL_MODEL);
            let manager = match &config.local.model_dir {
                Some(dir) => ModelManager::new(PathBuf::from(dir)),
                None => ModelManager::in_models_dir(models_dir, model),
            };
            if !manager.is_model_available() {
                let can_download =
                    explicit && config.local.auto_download && model == DEFAULT_LOCAL_MODEL;
                if !can_download {
                    return Err(MemoriaError::embedding(format!(
                        "local model files not found in {}",
                        manager.model_dir().display()
                    )));
                }
                manager.ensure_model().await?;
            }
            Arc::new(LocalEmbedder::new(manager.model_dir().to_path_buf(), model))
        }
        EmbeddingBackend::OpenAi => {
            let api_key = openai::resolve_api_key(&config.openai.api_key)?;
            let model = model.unwrap_or(config.openai.model.as_str());
            Arc::new(OpenAiEmbedder::new(
                &api_key,
                &config.openai.base_url,
                model,
                timeout,
            )?)
        }
        EmbeddingBackend::Ollama => {
            let base_url = config
                .ollama
                .base_url
                .as_deref()
                .filter(|u| !u.is_empty())
                .ok_or_else(|| MemoriaError::embedding("Ollama base_url is not configured"))?;
            let model = model.unwrap_or(config.ollama.model.as_str());
            Arc::new(OllamaEmbedder::new(base_url, model, timeout)?)
        }
        EmbeddingBackend::Auto | EmbeddingBackend::None => {
            return Err(MemoriaError::InvalidInput(format!(
                "{backend} is not a concrete embedding backend"
            )));
        }
    };
    Ok(EmbeddingProvider::new(adapter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoria_test_utils::{FailingEmbedder, MockEmbedder};
    use serial_test::serial;

    fn config_with(backend: EmbeddingBackend) -> EmbeddingConfig {
        EmbeddingConfig {
            backend,
            ..EmbeddingConfig::default()
        }
    }

    /// Hides `OPENAI_API_KEY` for the lifetime of the guard.
    struct OpenAiEnvGuard(Option<String>);

    impl OpenAiEnvGuard {
        fn clear() -> Self {
            let saved = std::env::var("OPENAI_API_KEY").ok();
            unsafe { std::env::remove_var("OPENAI_API_KEY") };
            Self(saved)
        }
    }

    impl Drop for OpenAiEnvGuard {
        fn drop(&mut self) {
            if let Some(key) = &self.0 {
                unsafe { std::env::set_var("OPENAI_API_KEY", key) };
            }
        }
    }

    #[tokio::test]
    async fn embed_batch_preserves_order_and_skips_blank_texts() {
        let mock = Arc::new(MockEmbedder::new(16));
        let provider = EmbeddingProvider::new(mock.clone());
        let texts = vec![
            "coffee beans".to_string(),
            "   ".to_string(),
            "green tea".to_string(),
        ];

        let out = provider.embed_batch(&texts).await.unwrap();
        assert_eq!(out.len(), 3);
        assert!(out[1].is_empty());
        assert_eq!(out[0].len(), 16);
        assert_eq!(out[0], provider.embed_query("coffee beans").await.unwrap());
        assert_eq!(out[2], provider.embed_query("green tea").await.unwrap());
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn embed_batch_normalizes() {
        let provider = EmbeddingProvider::new(Arc::new(MockEmbedder::new(8)));
        let v = provider.embed_query("hello world again").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn blank_query_makes_no_call() {
        let mock = Arc::new(MockEmbedder::new(8));
        let provider = EmbeddingProvider::new(mock.clone());
        assert!(provider.embed_query("  ").await.unwrap().is_empty());
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn adapter_errors_propagate() {
        let provider = EmbeddingProvider::new(Arc::new(FailingEmbedder::new("boom")));
        assert!(provider.embed_query("anything").await.is_err());
    }

    #[tokio::test]
    async fn none_backend_resolves_to_unavailable() {
        let registry = ProviderRegistry::disabled();
        assert!(registry.resolve().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pinned_provider_is_returned() {
        let registry =
            ProviderRegistry::with_provider(EmbeddingProvider::new(Arc::new(MockEmbedder::new(4))));
        let provider = registry.resolve().await.unwrap().unwrap();
        assert_eq!(provider.id(), "mock");
    }

    #[tokio::test]
    #[serial]
    async fn auto_without_any_backend_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ProviderRegistry::new(config_with(EmbeddingBackend::Auto), dir.path().into());
        let _env = OpenAiEnvGuard::clear();
        assert!(registry.resolve().await.unwrap().is_none());
        assert_eq!(registry.cached().await, 1);
    }

    #[tokio::test]
    #[serial]
    async fn auto_prefers_openai_over_ollama() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_with(EmbeddingBackend::Auto);
        config.openai.api_key = Some("sk-test".into());
        config.ollama.base_url = Some("http://localhost:11434".into());
        let registry = ProviderRegistry::new(config, dir.path().into());

        let provider = registry.resolve().await.unwrap().unwrap();
        assert_eq!(provider.id(), "openai");
        assert_eq!(provider.model(), "text-embedding-3-small");
    }

    #[tokio::test]
    async fn auto_picks_local_when_model_files_exist() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().join(DEFAULT_LOCAL_MODEL);
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::write(model_dir.join("model.onnx"), b"x").unwrap();
        std::fs::write(model_dir.join("tokenizer.json"), b"{}").unwrap();

        let registry = ProviderRegistry::new(config_with(EmbeddingBackend::Auto), dir.path().into());
        let provider = registry.resolve().await.unwrap().unwrap();
        assert_eq!(provider.id(), "local");
        assert_eq!(provider.model(), DEFAULT_LOCAL_MODEL);
    }

    #[tokio::test]
    async fn explicit_backend_uses_fallback_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_with(EmbeddingBackend::Local);
        config.fallback = Some(EmbeddingBackend::Ollama);
        config.ollama.base_url = Some("http://localhost:11434".into());
        let registry = ProviderRegistry::new(config, dir.path().into());

        let provider = registry.resolve().await.unwrap().unwrap();
        assert_eq!(provider.id(), "ollama");
        assert_eq!(provider.model(), "nomic-embed-text");
    }

    #[tokio::test]
    async fn explicit_and_fallback_failures_keep_primary_cause() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_with(EmbeddingBackend::Local);
        config.fallback = Some(EmbeddingBackend::Ollama);
        let registry = ProviderRegistry::new(config, dir.path().into());

        let err = registry.resolve().await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("local model files not found"), "{message}");
        assert!(message.contains("Ollama base_url is not configured"), "{message}");
        assert_eq!(registry.cached().await, 0);
    }

    #[tokio::test]
    async fn fallback_equal_to_primary_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_with(EmbeddingBackend::Ollama);
        config.fallback = Some(EmbeddingBackend::Ollama);
        let registry = ProviderRegistry::new(config, dir.path().into());

        let err = registry.resolve().await.unwrap_err();
        assert!(!err.to_string().contains("fallback"));
    }

    #[tokio::test]
    async fn model_override_applies_to_primary_backend() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_with(EmbeddingBackend::Ollama);
        config.model = Some("mxbai-embed-large".into());
        config.ollama.base_url = Some("http://localhost:11434".into());
        let registry = ProviderRegistry::new(config, dir.path().into());

        let provider = registry.resolve().await.unwrap().unwrap();
        assert_eq!(provider.model(), "mxbai-embed-large");
    }

    #[tokio::test]
    async fn resolutions_are_cached_until_reset() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_with(EmbeddingBackend::Ollama);
        config.ollama.base_url = Some("http://localhost:11434".into());
        let registry = ProviderRegistry::new(config, dir.path().into());

        let a = registry.resolve().await.unwrap().unwrap();
        let b = registry.resolve().await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        registry.reset().await;
        assert_eq!(registry.cached().await, 0);
        let c = registry.resolve().await.unwrap().unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
