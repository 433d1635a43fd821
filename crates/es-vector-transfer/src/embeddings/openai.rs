//! `OpenAI` embeddings backend.
//!
//! Works with any endpoint that speaks the `/embeddings` request shape
//! (Azure deployments, vLLM, LM Studio) through `openai_base_url`.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{Secret, TransferConfig};
use crate::embeddings::{check_embeddings, resolve_dimension, EmbeddingGenerator};
use crate::error::{Error, Result};
use crate::http::{
    create_http_client, error_from_response, handle_transport_error, join_url, validate_url,
    Endpoint,
};

const SERVICE: &str = "OpenAI";

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Client for the `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    base_url: String,
    api_key: Secret,
    model: String,
    dimension: usize,
    max_inputs: usize,
    client: Client,
}

impl OpenAiEmbedder {
    /// Creates the backend from the `openai_*` configuration keys.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the API key is missing, the base URL is
    /// invalid or the model dimension is unknown.
    pub fn from_config(config: &TransferConfig) -> Result<Self> {
        let api_key = config
            .openai_api_key
            .clone()
            .ok_or_else(|| Error::Config("openai_api_key must be set".to_string()))?;
        validate_url(&config.openai_base_url)?;

        Ok(Self {
            base_url: config.openai_base_url.clone(),
            api_key,
            model: config.openai_model.clone(),
            dimension: resolve_dimension(&config.openai_model, config.embedding_dimension)?,
            max_inputs: config.openai_max_inputs.max(1),
            client: create_http_client(config.request_timeout(), false)?,
        })
    }

    async fn embed_chunk(&self, chunk: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: chunk,
        };

        let response = self
            .client
            .post(join_url(&self.base_url, "embeddings"))
            .bearer_auth(self.api_key.expose())
            .json(&request)
            .send()
            .await
            .map_err(|e| handle_transport_error(&e, SERVICE, Endpoint::Embedding))?;

        if !response.status().is_success() {
            return Err(error_from_response(response, SERVICE, Endpoint::Embedding).await);
        }

        let mut body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Failed to parse OpenAI response: {e}")))?;

        body.data.sort_by_key(|d| d.index);
        if body.data.iter().enumerate().any(|(i, d)| d.index != i) {
            return Err(Error::Embedding(
                "OpenAI response indices do not match the request".to_string(),
            ));
        }

        let vectors: Vec<Vec<f32>> = body.data.into_iter().map(|d| d.embedding).collect();
        check_embeddings(&vectors, chunk.len(), self.dimension)?;
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingGenerator for OpenAiEmbedder {
    fn name(&self) -> &str {
        "openai"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn generate_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.max_inputs) {
            debug!("Embedding {} texts with {}", chunk.len(), self.model);
            vectors.extend(self.embed_chunk(chunk).await?);
        }
        Ok(vectors)
    }
}
