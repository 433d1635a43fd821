//! Offline feature-hashing embedder.
//!
//! Each lower-cased word token is hashed with FNV-1a into one of `dimension`
//! buckets; the sign comes from a second hash bit so collisions partly cancel.
//! The result is L2-normalised. Same text, same vector, on every machine.

use async_trait::async_trait;

use crate::embeddings::EmbeddingGenerator;
use crate::error::{Error, Result};

/// Dimension used when none is configured.
pub const DEFAULT_DIMENSION: usize = 384;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

/// Deterministic embedder that needs no network.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    /// Creates an embedder producing `dimension`-long vectors (at least 1).
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Embeds one text synchronously.
    #[must_use]
    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let hash = fnv1a(token.as_bytes());
            #[allow(clippy::cast_possible_truncation)]
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingGenerator for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn generate_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if let Some(i) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(Error::Embedding(format!("input {i} is empty")));
        }
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let embedder = HashEmbedder::new(64);
        assert_eq!(embedder.embed("Rust ownership"), embedder.embed("Rust ownership"));
    }

    #[test]
    fn test_case_and_punctuation_insensitive() {
        let embedder = HashEmbedder::new(64);
        assert_eq!(embedder.embed("Hello, World!"), embedder.embed("hello world"));
    }

    #[test]
    fn test_normalized() {
        let v = HashEmbedder::default().embed("vector databases store embeddings");
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(v.len(), DEFAULT_DIMENSION);
    }

    #[test]
    fn test_different_texts_differ() {
        let embedder = HashEmbedder::new(128);
        assert_ne!(embedder.embed("borrow checker"), embedder.embed("garbage collector"));
    }

    #[tokio::test]
    async fn test_generate_preserves_order() {
        let embedder = HashEmbedder::new(16);
        let texts = vec!["a".to_string(), "b".to_string()];
        let vectors = embedder.generate_embeddings(&texts).await.unwrap();

        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), vectors[1].len());
        assert_eq!(vectors[0], embedder.embed("a"));
        assert_eq!(vectors[1], embedder.embed("b"));
    }

    #[tokio::test]
    async fn test_empty_input_rejected() {
        let embedder = HashEmbedder::new(16);
        let err = embedder
            .generate_embeddings(&["ok".to_string(), "  ".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let vectors = HashEmbedder::new(8).generate_embeddings(&[]).await.unwrap();
        assert!(vectors.is_empty());
    }
}
