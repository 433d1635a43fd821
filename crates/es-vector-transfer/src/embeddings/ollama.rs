//! Ollama embeddings backend (`/api/embed`).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::TransferConfig;
use crate::embeddings::{check_embeddings, resolve_dimension, EmbeddingGenerator};
use crate::error::{Error, Result};
use crate::http::{
    create_http_client, error_from_response, handle_transport_error, join_url, validate_url,
    Endpoint,
};

const SERVICE: &str = "Ollama";

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Client for a local Ollama server.
pub struct OllamaEmbedder {
    host: String,
    model: String,
    dimension: usize,
    client: Client,
}

impl OllamaEmbedder {
    /// Creates the backend from the `ollama_*` configuration keys.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the host is invalid or the model
    /// dimension is unknown.
    pub fn from_config(config: &TransferConfig) -> Result<Self> {
        validate_url(&config.ollama_host)?;
        Ok(Self {
            host: config.ollama_host.clone(),
            model: config.ollama_model.clone(),
            dimension: resolve_dimension(&config.ollama_model, config.embedding_dimension)?,
            client: create_http_client(config.request_timeout(), false)?,
        })
    }
}

#[async_trait]
impl EmbeddingGenerator for OllamaEmbedder {
    fn name(&self) -> &str {
        "ollama"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn generate_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(join_url(&self.host, "api/embed"))
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| handle_transport_error(&e, SERVICE, Endpoint::Embedding))?;

        if !response.status().is_success() {
            return Err(error_from_response(response, SERVICE, Endpoint::Embedding).await);
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Failed to parse Ollama response: {e}")))?;

        check_embeddings(&body.embeddings, texts.len(), self.dimension)?;
        Ok(body.embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(host: &str) -> TransferConfig {
        TransferConfig {
            ollama_host: host.to_string(),
            embedding_dimension: Some(2),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_model_dimension() {
        let cfg = TransferConfig::default();
        let embedder = OllamaEmbedder::from_config(&cfg).unwrap();
        assert_eq!(embedder.dimension(), 768);
    }

    #[tokio::test]
    async fn test_embed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .and(body_partial_json(json!({"model": "nomic-embed-text", "input": ["x", "y"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "nomic-embed-text",
                "embeddings": [[0.5, 0.25], [0.75, 1.0]]
            })))
            .mount(&server)
            .await;

        let embedder = OllamaEmbedder::from_config(&config(&server.uri())).unwrap();
        let vectors = embedder
            .generate_embeddings(&["x".to_string(), "y".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![0.5, 0.25], vec![0.75, 1.0]]);
    }

    #[tokio::test]
    async fn test_count_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"embeddings": [[0.1, 0.2]]})))
            .mount(&server)
            .await;

        let embedder = OllamaEmbedder::from_config(&config(&server.uri())).unwrap();
        let err = embedder
            .generate_embeddings(&["x".to_string(), "y".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }

    #[tokio::test]
    async fn test_model_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .mount(&server)
            .await;

        let embedder = OllamaEmbedder::from_config(&config(&server.uri())).unwrap();
        let err = embedder.generate_embeddings(&["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }
}
