//! Embedding generation for semantic retrieval.
//!
//! Embeddings are fixed-dimension, L2-normalized vectors, so cosine
//! similarity reduces to the inner product. A deterministic hash-based
//! embedder is always available; the `fastembed-embeddings` feature adds a
//! real multilingual sentence-transformer backend.
//!
//! Model identity travels with each chunk's metadata; re-embedding after a
//! model change is an operator action, never automatic.

mod hash;

#[cfg(feature = "fastembed-embeddings")]
mod fastembed_impl;

pub use hash::HashEmbedder;

#[cfg(feature = "fastembed-embeddings")]
pub use fastembed_impl::FastEmbedEmbedder;

use crate::Result;

/// Default embedding dimensionality (multilingual sentence-transformer).
///
/// This is the authoritative source for embedding dimensions across the
/// codebase; the store and retrieval layers use this constant.
pub const DEFAULT_DIMENSIONS: usize = 768;

/// Default number of texts embedded per model call.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Trait for embedding generators.
///
/// Implementations must be thread-safe (`Send + Sync`); a single client is
/// shared across request threads, and callers cap concurrent batches at
/// [`DEFAULT_BATCH_SIZE`] to bound model memory.
pub trait Embedder: Send + Sync {
    /// Returns the embedding dimensionality.
    fn dimensions(&self) -> usize;

    /// Returns the model identity recorded in chunk metadata.
    fn model_name(&self) -> &str;

    /// Generates a unit-normalized embedding for the given text.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding generation fails.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generates embeddings for multiple texts, in sub-batches of
    /// [`DEFAULT_BATCH_SIZE`].
    ///
    /// The default implementation embeds sequentially; implementations may
    /// override for true batch inference.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding generation fails for any text.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Creates the default embedder for the enabled features.
///
/// # Errors
///
/// Returns an error if embedder initialization fails.
#[cfg(feature = "fastembed-embeddings")]
pub fn create_embedder() -> Result<Box<dyn Embedder>> {
    Ok(Box::new(FastEmbedEmbedder::new()?))
}

/// Creates the default embedder for the enabled features.
///
/// # Errors
///
/// Returns an error if embedder initialization fails (never fails for the
/// hash embedder).
#[cfg(not(feature = "fastembed-embeddings"))]
pub fn create_embedder() -> Result<Box<dyn Embedder>> {
    Ok(Box::new(HashEmbedder::new(DEFAULT_DIMENSIONS)))
}

/// Computes cosine similarity between two vectors.
///
/// Returns a value in [-1, 1]; 0.0 for mismatched lengths or zero vectors.
/// For unit-normalized vectors this equals the dot product.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Scales a vector to unit L2 norm in place. Zero vectors stay zero.
pub fn normalize(vector: &mut [f32]) {
    let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in vector.iter_mut() {
            *value /= magnitude;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 0.0, 0.0];
        let sim = cosine_similarity(&a, &a);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_degenerate() {
        assert!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]).abs() < 1e-6);
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        let magnitude: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-6);

        let mut zero = vec![0.0, 0.0];
        normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn test_create_embedder() {
        let embedder = create_embedder().unwrap();
        assert_eq!(embedder.dimensions(), DEFAULT_DIMENSIONS);
        assert!(!embedder.model_name().is_empty());
    }

    #[test]
    fn test_embed_batch_default_impl() {
        let embedder = create_embedder().unwrap();
        let texts = vec!["upravljanje rizicima", "sigurnosne kontrole", "nadzor"];
        let embeddings = embedder.embed_batch(&texts).unwrap();

        assert_eq!(embeddings.len(), 3);
        for embedding in &embeddings {
            assert_eq!(embedding.len(), embedder.dimensions());
        }
    }

    #[test]
    fn test_embed_batch_empty() {
        let embedder = create_embedder().unwrap();
        let texts: Vec<&str> = vec![];
        assert!(embedder.embed_batch(&texts).unwrap().is_empty());
    }
}
