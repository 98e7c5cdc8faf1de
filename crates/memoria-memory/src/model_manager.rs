// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Download and path resolution for the local ONNX embedding model.
//!
//! Fetches the all-MiniLM-L6-v2 INT8 quantized model from HuggingFace when
//! the local backend is selected with `auto_download` and the files are
//! missing.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use memoria_core::MemoriaError;
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;
use tracing::info;

/// Name of the model this manager knows how to download.
pub const DEFAULT_LOCAL_MODEL: &str = "all-MiniLM-L6-v2";

const MODEL_URL: &str =
    "https://huggingface.co/onnx-community/all-MiniLM-L6-v2-ONNX/resolve/main/onnx/model_quantized.onnx";
const TOKENIZER_URL: &str =
    "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/tokenizer.json";

/// Resolves model file paths in one directory and downloads them once.
pub struct ModelManager {
    model_dir: PathBuf,
    ready: OnceCell<PathBuf>,
}

impl ModelManager {
    pub fn new(model_dir: PathBuf) -> Self {
        Self {
            model_dir,
            ready: OnceCell::new(),
        }
    }

    /// The conventional location under a models root: `<models_dir>/<model>`.
    pub fn in_models_dir(models_dir: &Path, model: &str) -> Self {
        Self::new(models_dir.join(model))
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join("model.onnx")
    }

    pub fn tokenizer_path(&self) -> PathBuf {
        self.model_dir.join("tokenizer.json")
    }

    /// True if both model and tokenizer files exist.
    pub fn is_model_available(&self) -> bool {
        self.model_path().exists() && self.tokenizer_path().exists()
    }

    /// Make sure the model files are on disk, downloading them if needed.
    ///
    /// Concurrent callers share a single download.
    pub async fn ensure_model(&self) -> Result<PathBuf, MemoriaError> {
        self.ready
            .get_or_try_init(|| async {
                if self.is_model_available() {
                    return Ok(self.model_dir.clone());
                }
                self.download().await?;
                Ok(self.model_dir.clone())
            })
            .await
            .cloned()
    }

    async fn download(&self) -> Result<(), MemoriaError> {
        info!(dir = %self.model_dir.display(), "embedding model not found, downloading");

        tokio::fs::create_dir_all(&self.model_dir)
            .await
            .map_err(MemoriaError::storage)?;

        let files = [("model.onnx", MODEL_URL), ("tokenizer.json", TOKENIZER_URL)];
        for (filename, url) in files {
            let dest = self.model_dir.join(filename);
            if dest.exists() {
                continue;
            }

            info!(file = filename, "downloading");
            match download_file(url, &dest).await {
                Ok(size) => info!(file = filename, size, "downloaded"),
                Err(e) => {
                    let _ = tokio::fs::remove_file(&dest).await;
                    return Err(e);
                }
            }
        }

        info!(dir = %self.model_dir.display(), "embedding model ready");
        Ok(())
    }
}

async fn download_file(url: &str, dest: &Path) -> Result<usize, MemoriaError> {
    let response = reqwest::get(url).await.map_err(|e| MemoriaError::Embedding {
        message: format!("failed to download {url}: {e}"),
        source: Some(Box::new(e)),
    })?;

    if !response.status().is_success() {
        return Err(MemoriaError::embedding(format!(
            "download failed with status {}: {url}",
            response.status()
        )));
    }

    let partial = dest.with_extension("part");
    let mut file = tokio::fs::File::create(&partial)
        .await
        .map_err(MemoriaError::storage)?;
    let mut stream = response.bytes_stream();
    let mut size = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(MemoriaError::Embedding {
                    message: format!("failed to read response body from {url}: {e}"),
                    source: Some(Box::new(e)),
                });
            }
        };
        file.write_all(&chunk).await.map_err(MemoriaError::storage)?;
        size += chunk.len();
    }
    file.flush().await.map_err(MemoriaError::storage)?;
    drop(file);

    tokio::fs::rename(&partial, dest)
        .await
        .map_err(MemoriaError::storage)?;
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_under_model_dir() {
        let mgr = ModelManager::in_models_dir(Path::new("/data/models"), DEFAULT_LOCAL_MODEL);
        assert_eq!(
            mgr.model_dir(),
            Path::new("/data/models/all-MiniLM-L6-v2")
        );
        assert_eq!(
            mgr.model_path(),
            PathBuf::from("/data/models/all-MiniLM-L6-v2/model.onnx")
        );
        assert_eq!(
            mgr.tokenizer_path(),
            PathBuf::from("/data/models/all-MiniLM-L6-v2/tokenizer.json")
        );
    }

    #[test]
    fn not_available_when_missing() {
        let mgr = ModelManager::new(PathBuf::from("/nonexistent/path"));
        assert!(!mgr.is_model_available());
    }

    #[tokio::test]
    async fn ensure_model_is_a_no_op_when_files_exist() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.onnx"), b"onnx").unwrap();
        std::fs::write(dir.path().join("tokenizer.json"), b"{}").unwrap();

        let mgr = ModelManager::new(dir.path().to_path_buf());
        assert!(mgr.is_model_available());
        assert_eq!(mgr.ensure_model().await.unwrap(), dir.path());
    }
}
