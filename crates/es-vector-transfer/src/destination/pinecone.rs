//! Pinecone writer over the REST data plane.
//!
//! The data-plane host is taken from `pinecone_index_host` or resolved once
//! from the control plane by index name. Upserts are split into chunks of at
//! most [`MAX_UPSERT_CHUNK`] vectors; each chunk is retried on its own and a
//! chunk that still fails only rejects its own items.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::{Secret, TransferConfig};
use crate::destination::{
    validate_items, DestinationWriter, IndexStats, NamespaceStats, QueryMatch, UpsertItem,
    UpsertResult,
};
use crate::error::{Error, Result};
use crate::http::{
    create_http_client, error_from_response, handle_transport_error, join_url, validate_url,
    Endpoint,
};
use crate::retry::{with_retry, RetryConfig};

const SERVICE: &str = "Pinecone";

/// Largest number of vectors sent in one upsert request.
pub const MAX_UPSERT_CHUNK: usize = 100;

const API_VERSION: &str = "2024-07";

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    vectors: Vec<PineconeVector<'a>>,
    namespace: &'a str,
}

#[derive(Debug, Serialize)]
struct PineconeVector<'a> {
    id: &'a str,
    values: &'a [f32],
    #[serde(skip_serializing_if = "Map::is_empty")]
    metadata: &'a Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    #[serde(default)]
    upserted_count: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeStatsResponse {
    #[serde(default)]
    namespaces: BTreeMap<String, NamespaceSummary>,
    #[serde(default)]
    dimension: Option<usize>,
    #[serde(default)]
    total_vector_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceSummary {
    #[serde(default)]
    vector_count: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    namespace: &'a str,
    include_metadata: bool,
    include_values: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<PineconeMatch>,
}

#[derive(Debug, Deserialize)]
struct PineconeMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct IndexDescription {
    host: String,
    #[serde(default)]
    dimension: Option<usize>,
}

/// Writer for one Pinecone index.
pub struct PineconeWriter {
    api_key: Secret,
    index_name: String,
    controller_url: String,
    host: OnceCell<String>,
    dimension: Mutex<Option<usize>>,
    retry: RetryConfig,
    client: Client,
}

impl PineconeWriter {
    /// Creates a writer from the `pinecone_*` configuration keys.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the API key is missing or neither an
    /// index name nor an index host is set.
    pub fn from_config(config: &TransferConfig) -> Result<Self> {
        let api_key = config
            .pinecone_api_key
            .clone()
            .ok_or_else(|| Error::Config("pinecone_api_key must be set".to_string()))?;

        let host = OnceCell::new();
        match config.pinecone_index_host.as_deref().map(str::trim) {
            Some(configured) if !configured.is_empty() => {
                let url = normalize_host(configured);
                validate_url(&url)?;
                host.set(url)
                    .map_err(|_| Error::Internal("index host already set".to_string()))?;
            }
            _ if config.pinecone_index_name.trim().is_empty() => {
                return Err(Error::Config(
                    "pinecone_index_name or pinecone_index_host must be set".to_string(),
                ));
            }
            _ => validate_url(&config.pinecone_controller_url)?,
        }

        Ok(Self {
            api_key,
            index_name: config.pinecone_index_name.trim().to_string(),
            controller_url: config.pinecone_controller_url.clone(),
            host,
            dimension: Mutex::new(None),
            retry: RetryConfig::with_max_retries(config.max_retries),
            client: create_http_client(config.request_timeout(), false)?,
        })
    }

    /// Replaces the retry policy used for every request.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("Api-Key", self.api_key.expose())
            .header("X-Pinecone-API-Version", API_VERSION)
    }

    /// Data-plane URL, looked up from the control plane on first use.
    async fn host(&self) -> Result<&str> {
        let host = self
            .host
            .get_or_try_init(|| async {
                let url = join_url(&self.controller_url, &format!("indexes/{}", self.index_name));
                let description: IndexDescription = with_retry(&self.retry, "describe_index", || {
                    self.send_json(self.client.get(&url))
                })
                .await?;

                if let Some(dimension) = description.dimension {
                    *self.dimension.lock() = Some(dimension);
                }
                let host = normalize_host(&description.host);
                info!("Resolved Pinecone index '{}' to {}", self.index_name, host);
                Ok::<_, Error>(host)
            })
            .await?;
        Ok(host.as_str())
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(&self, req: RequestBuilder) -> Result<T> {
        let response = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| handle_transport_error(&e, SERVICE, Endpoint::Destination))?;

        if !response.status().is_success() {
            let err = error_from_response(response, SERVICE, Endpoint::Destination).await;
            return Err(escalate(err));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Destination(format!("Failed to parse Pinecone response: {e}")))
    }

    async fn post<B: Serialize + ?Sized, T: for<'de> Deserialize<'de>>(
        &self,
        name: &str,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = join_url(self.host().await?, path);
        with_retry(&self.retry, name, || {
            self.send_json(self.client.post(&url).json(body))
        })
        .await
    }

    async fn upsert_chunk(&self, chunk: &[&UpsertItem], namespace: &str) -> Result<usize> {
        let request = UpsertRequest {
            vectors: chunk
                .iter()
                .map(|item| PineconeVector {
                    id: &item.id,
                    values: &item.vector,
                    metadata: &item.metadata,
                })
                .collect(),
            namespace,
        };
        let response: UpsertResponse = self.post("upsert", "vectors/upsert", &request).await?;
        Ok(response.upserted_count)
    }
}

/// Credentials refused by the data plane make the store unusable.
fn escalate(err: Error) -> Error {
    match err {
        Error::Authentication(msg) => Error::DestinationUnavailable(msg),
        other => other,
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

#[async_trait]
impl DestinationWriter for PineconeWriter {
    fn destination_type(&self) -> &'static str {
        "pinecone"
    }

    async fn upsert(&self, items: &[UpsertItem], namespace: &str) -> Result<UpsertResult> {
        let mut result = UpsertResult::default();
        let dimension = *self.dimension.lock();
        let valid = validate_items(items, dimension, &mut result);
        if !result.errors.is_empty() {
            debug!("{} items failed local validation", result.errors.len());
        }

        for chunk in valid.chunks(MAX_UPSERT_CHUNK) {
            match self.upsert_chunk(chunk, namespace).await {
                Ok(upserted) => {
                    let accepted = upserted.min(chunk.len());
                    result.accepted_count += accepted;
                    result.reject_all(
                        chunk[accepted..].iter().map(|item| item.id.as_str()),
                        "not acknowledged by Pinecone",
                    );
                }
                Err(e) if e.is_destination_fatal() => {
                    if result.accepted_count == 0 {
                        return Err(e);
                    }
                    return Err(Error::PartialWrite {
                        accepted: result.accepted_count,
                        source: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!("Pinecone rejected a chunk of {} vectors: {}", chunk.len(), e);
                    result.reject_all(chunk.iter().map(|item| item.id.as_str()), &e.to_string());
                }
            }
        }

        Ok(result)
    }

    async fn index_stats(&self) -> Result<IndexStats> {
        let response: DescribeStatsResponse = self
            .post("describe_index_stats", "describe_index_stats", &json!({}))
            .await?;

        let dimension = response.dimension.filter(|d| *d > 0);
        if dimension.is_some() {
            *self.dimension.lock() = dimension;
        }

        Ok(IndexStats {
            dimension,
            total_vector_count: response.total_vector_count,
            namespaces: response
                .namespaces
                .into_iter()
                .map(|(name, ns)| {
                    (
                        name,
                        NamespaceStats {
                            vector_count: ns.vector_count,
                        },
                    )
                })
                .collect(),
        })
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: &str,
        include_metadata: bool,
    ) -> Result<Vec<QueryMatch>> {
        let request = QueryRequest {
            vector,
            top_k,
            namespace,
            include_metadata,
            include_values: false,
        };
        let response: QueryResponse = self.post("query", "query", &request).await?;

        let mut matches: Vec<QueryMatch> = response
            .matches
            .into_iter()
            .map(|m| QueryMatch {
                id: m.id,
                score: m.score,
                metadata: if include_metadata { m.metadata } else { None },
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        Ok(matches)
    }
}

#[cfg(test)]
#[path = "pinecone_tests.rs"]
mod tests;
