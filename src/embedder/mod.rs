//! Embedder trait and shared types for text embedding.
//!
//! Two backends implement it: [`hashing::HashingEmbedder`] (deterministic,
//! no model files) and [`onnx::OnnxEmbedder`] (sentence-transformer model
//! through ONNX Runtime).
pub mod download;
pub mod hashing;
pub mod onnx;
pub mod tokenizer;

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::config::{Config, EmbedderBackend};

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("model load failed: {0}")]
    ModelLoadFailed(String),

    #[error("tokenizer error: {0}")]
    TokenizerError(String),

    #[error("expected {expected}-dimensional vectors, model produced {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`. Identical input text must produce identical vectors.
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed multiple text strings into vectors, preserving input order.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;
}

/// Embed `texts` in slices of at most `batch_size`, bounding peak memory.
///
/// Output order matches input order. The first failing slice aborts the
/// whole call.
pub fn embed_in_batches(
    embedder: &dyn Embedder,
    texts: &[&str],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>, EmbedderError> {
    let batch_size = batch_size.max(1);
    let mut vectors = Vec::with_capacity(texts.len());
    for slice in texts.chunks(batch_size) {
        let batch = embedder.embed_batch(slice)?;
        if batch.len() != slice.len() {
            return Err(EmbedderError::InferenceFailed(format!(
                "backend returned {} vectors for {} inputs",
                batch.len(),
                slice.len()
            )));
        }
        for v in &batch {
            if v.len() != embedder.dimensions() {
                return Err(EmbedderError::DimensionMismatch {
                    expected: embedder.dimensions(),
                    actual: v.len(),
                });
            }
        }
        vectors.extend(batch);
    }
    Ok(vectors)
}

/// Build the embedder selected by the configuration.
///
/// The ONNX backend fails with [`EmbedderError::ModelUnavailable`] when the
/// model files are missing; it never downloads implicitly.
pub fn from_config(config: &Config) -> Result<Arc<dyn Embedder>, EmbedderError> {
    match config.model.backend {
        EmbedderBackend::Hashing => {
            info!(
                "Using hashing embedder ({} dimensions)",
                config.model.dimensions
            );
            Ok(Arc::new(hashing::HashingEmbedder::new(
                config.model.dimensions,
            )))
        }
        EmbedderBackend::Onnx => {
            let dir = config.model_dir();
            if !download::all_files_present(&dir) {
                return Err(EmbedderError::ModelUnavailable(format!(
                    "model files missing in {} (run `reviewrag download-model`)",
                    dir.display()
                )));
            }
            let embedder = onnx::OnnxEmbedder::new(&dir, config.model.dimensions)?;
            Ok(Arc::new(embedder))
        }
    }
}
