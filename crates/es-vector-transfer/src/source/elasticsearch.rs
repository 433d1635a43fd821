//! Elasticsearch/OpenSearch reader.
//!
//! Documents are paged with `search_after` on a configurable sort field, so
//! every page is one `_search` round trip and no scroll context is left
//! behind on the cluster.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{Secret, TransferConfig};
use crate::error::{Error, Result};
use crate::http::{
    create_http_client, error_from_response, handle_transport_error, join_url, validate_url,
    Endpoint,
};
use crate::source::{Page, Record, SourceReader};

const SERVICE: &str = "Elasticsearch";

/// Search request body.
#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a Value,
    size: usize,
    sort: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    search_after: Option<&'a Value>,
    track_total_hits: bool,
}

/// Search response.
#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: HitsContainer,
}

#[derive(Debug, Deserialize)]
struct HitsContainer {
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source", default)]
    source: Value,
    #[serde(default)]
    sort: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: u64,
}

/// Reader for an Elasticsearch index.
pub struct ElasticsearchReader {
    host: String,
    index: String,
    sort_field: String,
    username: Option<String>,
    password: Option<Secret>,
    api_key: Option<Secret>,
    client: Client,
}

impl ElasticsearchReader {
    /// Creates a reader from the `es_*` configuration keys.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the host is invalid or the index is missing.
    pub fn from_config(config: &TransferConfig) -> Result<Self> {
        validate_url(&config.es_host)?;
        if config.es_index.trim().is_empty() {
            return Err(Error::Config("es_index must be set".to_string()));
        }

        Ok(Self {
            host: config.es_host.clone(),
            index: config.es_index.trim_matches('/').to_string(),
            sort_field: config.es_sort_field.clone(),
            username: config.es_username.clone(),
            password: config.es_password.clone(),
            api_key: config.es_api_key.clone(),
            client: create_http_client(config.request_timeout(), !config.es_verify_certs)?,
        })
    }

    fn search_url(&self) -> String {
        join_url(&self.host, &format!("{}/_search", self.index))
    }

    fn count_url(&self) -> String {
        join_url(&self.host, &format!("{}/_count", self.index))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(api_key) = &self.api_key {
            req.header("Authorization", format!("ApiKey {}", api_key.expose()))
        } else if let Some(user) = &self.username {
            req.basic_auth(user, self.password.as_ref().map(Secret::expose))
        } else {
            req
        }
    }

    async fn post_json<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<reqwest::Response> {
        let response = self
            .authorize(self.client.post(url))
            .json(body)
            .send()
            .await
            .map_err(|e| handle_transport_error(&e, SERVICE, Endpoint::Source))?;

        if !response.status().is_success() {
            return Err(error_from_response(response, SERVICE, Endpoint::Source).await);
        }
        Ok(response)
    }

    fn sort_clause(&self) -> Value {
        let mut clause = serde_json::Map::new();
        clause.insert(self.sort_field.clone(), json!("asc"));
        Value::Object(clause)
    }

    fn effective_query(filter: Option<&Value>) -> Value {
        filter.cloned().unwrap_or_else(|| json!({ "match_all": {} }))
    }
}

#[async_trait]
impl SourceReader for ElasticsearchReader {
    fn source_type(&self) -> &'static str {
        "elasticsearch"
    }

    async fn ping(&self) -> Result<()> {
        let response = self
            .authorize(self.client.get(&self.host))
            .send()
            .await
            .map_err(|e| handle_transport_error(&e, SERVICE, Endpoint::Source))?;

        if !response.status().is_success() {
            return Err(error_from_response(response, SERVICE, Endpoint::Source).await);
        }
        Ok(())
    }

    async fn count(&self, filter: Option<&Value>) -> Result<u64> {
        let body = json!({ "query": Self::effective_query(filter) });
        let response = self.post_json(&self.count_url(), &body).await?;

        let count: CountResponse = response.json().await.map_err(|e| {
            Error::SourceUnavailable(format!("Failed to parse count response: {e}"))
        })?;
        Ok(count.count)
    }

    async fn fetch_page(
        &self,
        filter: Option<&Value>,
        cursor: Option<&Value>,
        page_size: usize,
    ) -> Result<Page> {
        let query = Self::effective_query(filter);
        let body = SearchRequest {
            query: &query,
            size: page_size,
            sort: vec![self.sort_clause()],
            search_after: cursor,
            track_total_hits: false,
        };

        let response = self.post_json(&self.search_url(), &body).await?;
        let search: SearchResponse = response.json().await.map_err(|e| {
            Error::SourceUnavailable(format!("Failed to parse search response: {e}"))
        })?;

        let full_page = search.hits.hits.len() == page_size;
        let mut last_sort = None;
        let records: Vec<Record> = search
            .hits
            .hits
            .into_iter()
            .map(|hit| {
                last_sort = hit.sort;
                Record::new(hit.id, hit.source)
            })
            .collect();

        let next_cursor = if full_page {
            last_sort.map(Value::Array)
        } else {
            None
        };

        Ok(Page {
            records,
            next_cursor,
        })
    }
}

#[cfg(test)]
#[path = "elasticsearch_tests.rs"]
mod tests;
