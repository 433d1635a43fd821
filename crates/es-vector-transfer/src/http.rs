//! HTTP plumbing shared by the Elasticsearch reader, the embedding backends
//! and the Pinecone writer.

use reqwest::Client;
use std::time::Duration;

use crate::error::{Error, Result};

/// Connect timeout for every client.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest response body quoted in an error message.
const MAX_ERROR_BODY: usize = 512;

/// Which side of the transfer a request belongs to; decides the error variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Origin document store.
    Source,
    /// Embedding provider.
    Embedding,
    /// Vector store.
    Destination,
}

/// Creates an HTTP client with the given request timeout.
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialised.
pub fn create_http_client(timeout: Duration, accept_invalid_certs: bool) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT)
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))
}

/// Checks that a URL uses an HTTP scheme.
///
/// # Errors
///
/// Returns [`Error::Config`] for any other scheme.
pub fn validate_url(url: &str) -> Result<()> {
    let has_scheme = url.starts_with("http://") || url.starts_with("https://");
    if !has_scheme || url.len() <= "https://".len() {
        return Err(Error::Config(format!(
            "Invalid URL '{url}': expected http:// or https://"
        )));
    }
    Ok(())
}

/// Joins a base URL and a path without doubling slashes.
#[must_use]
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Maps a non-success status to an error for `endpoint`.
#[must_use]
pub fn handle_http_error(status: u16, body: &str, service: &str, endpoint: Endpoint) -> Error {
    let body = truncate(body);
    match status {
        429 => Error::RateLimit(retry_after_default(endpoint)),
        401 | 403 => Error::Authentication(format!("{service} auth failed ({status}): {body}")),
        _ => {
            let msg = format!("{service} error {status}: {body}");
            match endpoint {
                Endpoint::Source => Error::SourceUnavailable(msg),
                Endpoint::Embedding => Error::Embedding(msg),
                Endpoint::Destination if status == 404 => Error::DestinationUnavailable(msg),
                Endpoint::Destination => Error::Destination(msg),
            }
        }
    }
}

/// Maps a transport failure (no response) to an error for `endpoint`.
#[must_use]
pub fn handle_transport_error(err: &reqwest::Error, service: &str, endpoint: Endpoint) -> Error {
    let kind = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connection error"
    } else if err.is_decode() || err.is_body() {
        "invalid response"
    } else {
        "request error"
    };
    let msg = format!("{service} request failed ({kind}): {err}");
    match endpoint {
        Endpoint::Source => Error::SourceUnavailable(msg),
        Endpoint::Embedding => Error::Embedding(msg),
        Endpoint::Destination => Error::DestinationUnavailable(msg),
    }
}

/// Reads the body of a failed response and converts it into an error.
pub async fn error_from_response(
    response: reqwest::Response,
    service: &str,
    endpoint: Endpoint,
) -> Error {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    handle_http_error(status, &body, service, endpoint)
}

fn retry_after_default(endpoint: Endpoint) -> u64 {
    match endpoint {
        Endpoint::Embedding => 20,
        Endpoint::Source | Endpoint::Destination => 60,
    }
}

fn truncate(body: &str) -> &str {
    if body.len() <= MAX_ERROR_BODY {
        return body;
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("http://localhost:9200").is_ok());
        assert!(validate_url("https://my-index.svc.pinecone.io").is_ok());
        assert!(validate_url("ftp://files.example.com").is_err());
        assert!(validate_url("localhost:9200").is_err());
        assert!(validate_url("https://").is_err());
    }

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("http://localhost:9200/", "/docs/_search"),
            "http://localhost:9200/docs/_search"
        );
        assert_eq!(join_url("https://api.openai.com/v1", "embeddings"), "https://api.openai.com/v1/embeddings");
    }

    #[test]
    fn test_status_mapping_per_endpoint() {
        assert!(matches!(
            handle_http_error(429, "slow down", "Pinecone", Endpoint::Destination),
            Error::RateLimit(60)
        ));
        assert!(matches!(
            handle_http_error(401, "nope", "OpenAI", Endpoint::Embedding),
            Error::Authentication(_)
        ));
        assert!(matches!(
            handle_http_error(500, "boom", "Elasticsearch", Endpoint::Source),
            Error::SourceUnavailable(_)
        ));
        assert!(matches!(
            handle_http_error(400, "bad vector", "Pinecone", Endpoint::Destination),
            Error::Destination(_)
        ));
        assert!(matches!(
            handle_http_error(404, "no index", "Pinecone", Endpoint::Destination),
            Error::DestinationUnavailable(_)
        ));
    }

    #[test]
    fn test_error_body_truncated() {
        let body = "x".repeat(4096);
        let err = handle_http_error(500, &body, "OpenAI", Endpoint::Embedding);
        assert!(err.to_string().len() < 700);
    }

    #[test]
    fn test_create_http_client() {
        let client = create_http_client(Duration::from_secs(5), false).unwrap();
        assert!(client.get("http://example.com").build().is_ok());
    }
}
