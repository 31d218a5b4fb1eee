//! `FastEmbed`-based multilingual embedder.
//!
//! Real semantic embeddings via the multilingual-e5-base model (768
//! dimensions), matching the corpus languages (hr/en). Only available when
//! the `fastembed-embeddings` feature is enabled.

use crate::Result;
use crate::embedding::{DEFAULT_BATCH_SIZE, DEFAULT_DIMENSIONS, Embedder, normalize};
use crate::error::RetrievalError;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::OnceLock;

/// Thread-safe singleton for the embedding model.
/// Uses `OnceLock` for lazy initialization on first use.
static EMBEDDING_MODEL: OnceLock<std::sync::Mutex<fastembed::TextEmbedding>> = OnceLock::new();

/// Multilingual `FastEmbed` embedder.
///
/// The model is lazily loaded on first embed call to preserve cold start
/// time. The shared mutex also serves as the concurrency cap toward the
/// GPU/ONNX backend: one in-flight batch per process.
pub struct FastEmbedEmbedder {
    /// Model name recorded in chunk metadata.
    model_name: &'static str,
}

impl FastEmbedEmbedder {
    /// Creates a new `FastEmbed` embedder.
    ///
    /// Note: the model is lazily loaded on first `embed()` call.
    ///
    /// # Errors
    ///
    /// Returns an error if embedder construction fails.
    #[allow(clippy::missing_const_for_fn)]
    pub fn new() -> Result<Self> {
        Ok(Self {
            model_name: "multilingual-e5-base",
        })
    }

    /// Gets or initializes the embedding model (thread-safe).
    fn get_model() -> Result<&'static std::sync::Mutex<fastembed::TextEmbedding>> {
        if let Some(model) = EMBEDDING_MODEL.get() {
            return Ok(model);
        }

        let options = fastembed::InitOptions::new(fastembed::EmbeddingModel::MultilingualE5Base)
            .with_show_download_progress(false);

        let model = fastembed::TextEmbedding::try_new(options).map_err(|e| {
            RetrievalError::EmbeddingFailed(format!("failed to load embedding model: {e}"))
        })?;

        // Store the model, ignoring if another thread beat us to it
        let _ = EMBEDDING_MODEL.set(std::sync::Mutex::new(model));

        EMBEDDING_MODEL.get().ok_or_else(|| {
            RetrievalError::EmbeddingFailed("model initialization race".to_string()).into()
        })
    }

    fn embed_slice(texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let model = Self::get_model()?;
        let mut model = model
            .lock()
            .map_err(|e| RetrievalError::EmbeddingFailed(format!("model lock poisoned: {e}")))?;

        // ONNX runtime can panic on malformed inputs; contain it.
        let result = catch_unwind(AssertUnwindSafe(|| model.embed(texts.to_vec(), None)));

        let mut embeddings = result
            .map_err(|panic_info| {
                let panic_msg = panic_info
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic_info.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                RetrievalError::EmbeddingFailed(format!("onnx runtime panic: {panic_msg}"))
            })?
            .map_err(|e| RetrievalError::EmbeddingFailed(e.to_string()))?;

        for embedding in &mut embeddings {
            normalize(embedding);
        }
        Ok(embeddings)
    }
}

impl Embedder for FastEmbedEmbedder {
    fn dimensions(&self) -> usize {
        DEFAULT_DIMENSIONS
    }

    fn model_name(&self) -> &str {
        self.model_name
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(
                RetrievalError::EmbeddingFailed("cannot embed empty text".to_string()).into(),
            );
        }

        Self::embed_slice(&[text])?.into_iter().next().ok_or_else(|| {
            RetrievalError::EmbeddingFailed("no embedding returned from model".to_string()).into()
        })
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.is_empty()) {
            return Err(
                RetrievalError::EmbeddingFailed("cannot embed empty text".to_string()).into(),
            );
        }

        // Sub-batch to stay within model input limits
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(DEFAULT_BATCH_SIZE) {
            out.extend(Self::embed_slice(batch)?);
        }
        Ok(out)
    }
}
