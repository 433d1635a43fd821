//! Embedding backends.
//!
//! One backend is chosen from [`EmbeddingType`] when the pipeline is built:
//!
//! - `openai`: `OpenAI` embeddings API or any compatible endpoint
//! - `ollama`: local Ollama server
//! - `hash`: offline feature hashing, deterministic and network-free
//!
//! Every backend returns vectors in input order with a fixed dimension.

pub mod hash;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{EmbeddingType, TransferConfig};
use crate::error::{Error, Result};

pub use hash::HashEmbedder;
pub use ollama::OllamaEmbedder;
pub use openai::OpenAiEmbedder;

/// Turns text into fixed-length vectors.
#[async_trait]
pub trait EmbeddingGenerator: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Length of every produced vector.
    fn dimension(&self) -> usize;

    /// Embeds `texts`, returning one vector per input in the same order.
    async fn generate_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Known output sizes of common models.
#[must_use]
pub fn default_dimension(model: &str) -> Option<usize> {
    match model {
        "text-embedding-ada-002" | "text-embedding-3-small" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        "nomic-embed-text" => Some(768),
        "mxbai-embed-large" => Some(1024),
        "all-minilm" => Some(384),
        _ => None,
    }
}

/// Resolves the dimension for `model`, preferring an explicit setting.
///
/// # Errors
///
/// Returns [`Error::Config`] if the model is unknown and no dimension is set.
pub fn resolve_dimension(model: &str, configured: Option<usize>) -> Result<usize> {
    configured.or_else(|| default_dimension(model)).ok_or_else(|| {
        Error::Config(format!(
            "unknown dimension for embedding model '{model}': set embedding_dimension"
        ))
    })
}

/// Checks a backend response against the request.
///
/// # Errors
///
/// Returns [`Error::Embedding`] on a count or length mismatch.
pub fn check_embeddings(vectors: &[Vec<f32>], expected_count: usize, dimension: usize) -> Result<()> {
    if vectors.len() != expected_count {
        return Err(Error::Embedding(format!(
            "expected {expected_count} embeddings, got {}",
            vectors.len()
        )));
    }
    if let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != dimension) {
        return Err(Error::Embedding(format!(
            "embedding {i} has {} dimensions, expected {dimension}",
            v.len()
        )));
    }
    Ok(())
}

/// Builds the backend selected by `embedding_type`.
///
/// # Errors
///
/// Returns an error if the backend settings are incomplete.
pub fn create_embedding_generator(config: &TransferConfig) -> Result<Arc<dyn EmbeddingGenerator>> {
    let generator: Arc<dyn EmbeddingGenerator> = match config.embedding_type {
        EmbeddingType::OpenAi => Arc::new(OpenAiEmbedder::from_config(config)?),
        EmbeddingType::Ollama => Arc::new(OllamaEmbedder::from_config(config)?),
        EmbeddingType::Hash => Arc::new(HashEmbedder::new(
            config.embedding_dimension.unwrap_or(hash::DEFAULT_DIMENSION),
        )),
    };
    Ok(generator)
}
