//! Deterministic hash-based embedder.
//!
//! Produces reproducible pseudo-embeddings from lexical features: word
//! hashes as the primary signal and character bigrams for fuzzy overlap.
//! This is NOT semantic similarity - it clusters texts by shared
//! vocabulary, which is enough for tests and offline operation. Use the
//! fastembed backend for real multilingual embeddings.

use crate::Result;
use crate::embedding::{Embedder, normalize};
use rayon::prelude::*;

/// FNV-1a 64-bit hash. Stable across platforms and releases, which keeps
/// stored pseudo-embeddings comparable over time (`DefaultHasher` gives no
/// such guarantee).
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Hash-based embedder.
///
/// # Examples
///
/// ```
/// use procjena::embedding::{Embedder, HashEmbedder, DEFAULT_DIMENSIONS};
///
/// let embedder = HashEmbedder::new(DEFAULT_DIMENSIONS);
/// let a = embedder.embed("upravljanje rizicima").unwrap();
/// let b = embedder.embed("upravljanje rizicima").unwrap();
/// assert_eq!(a, b); // deterministic
/// ```
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    /// Creates a hash embedder with the given dimensionality.
    #[must_use]
    pub const fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn generate(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];

        // Lowercase, strip punctuation to whitespace
        let normalized: String = text
            .chars()
            .map(|c| {
                if c.is_alphanumeric() {
                    c.to_lowercase().next().unwrap_or(c)
                } else {
                    ' '
                }
            })
            .collect();

        // Word hashing (primary signal)
        for word in normalized.split_whitespace() {
            let hash = fnv1a(word.as_bytes());
            let idx = (hash as usize) % self.dimensions;
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            let magnitude = 1.0 + ((hash >> 24) & 0xFF) as f32 / 255.0;
            embedding[idx] += sign * magnitude;
        }

        // Character bigram hashing (secondary signal for fuzzy overlap;
        // bigrams rather than trigrams keep short Croatian inflections close)
        let chars: Vec<char> = normalized.chars().filter(|c| !c.is_whitespace()).collect();
        for window in chars.windows(2) {
            let bigram: String = window.iter().collect();
            let hash = fnv1a(bigram.as_bytes());
            let idx = (hash as usize) % self.dimensions;
            let sign = if hash & (1 << 62) == 0 { 0.4 } else { -0.4 };
            embedding[idx] += sign;
        }

        normalize(&mut embedding);
        embedding
    }
}

impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "hash-fnv1a"
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.generate(text))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.par_iter().map(|text| self.generate(text)).collect())
    }
}
