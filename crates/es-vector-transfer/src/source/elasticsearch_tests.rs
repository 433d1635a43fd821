//! Tests for the Elasticsearch reader.

use super::*;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(host: &str) -> TransferConfig {
    TransferConfig {
        es_host: host.to_string(),
        es_index: "articles".to_string(),
        ..Default::default()
    }
}

fn hits_body(ids: &[&str]) -> Value {
    let hits: Vec<Value> = ids
        .iter()
        .map(|id| {
            json!({
                "_id": id,
                "_source": { "title": format!("Title {id}"), "status": "published" },
                "sort": [id]
            })
        })
        .collect();
    json!({ "hits": { "hits": hits } })
}

#[test]
fn test_reader_requires_index() {
    let mut config = test_config("http://localhost:9200");
    config.es_index = String::new();
    assert!(matches!(
        ElasticsearchReader::from_config(&config),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_reader_rejects_bad_host() {
    let config = test_config("localhost:9200");
    assert!(ElasticsearchReader::from_config(&config).is_err());
}

#[test]
fn test_build_urls() {
    let reader = ElasticsearchReader::from_config(&test_config("http://localhost:9200/")).unwrap();
    assert_eq!(reader.search_url(), "http://localhost:9200/articles/_search");
    assert_eq!(reader.count_url(), "http://localhost:9200/articles/_count");
}

#[test]
fn test_search_request_serialization() {
    let query = json!({"match_all": {}});
    let req = SearchRequest {
        query: &query,
        size: 50,
        sort: vec![json!({"_id": "asc"})],
        search_after: None,
        track_total_hits: false,
    };
    let body = serde_json::to_value(&req).unwrap();
    assert_eq!(body["size"], 50);
    assert!(body.get("search_after").is_none());
}

#[test]
fn test_search_response_without_source() {
    let json = r#"{"hits":{"hits":[{"_id":"doc1"}]}}"#;
    let response: SearchResponse = serde_json::from_str(json).unwrap();
    assert_eq!(response.hits.hits[0].id, "doc1");
    assert!(response.hits.hits[0].source.is_null());
}

#[tokio::test]
async fn test_fetch_page_and_cursor() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/articles/_search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hits_body(&["a", "b"])))
        .mount(&server)
        .await;

    let reader = ElasticsearchReader::from_config(&test_config(&server.uri())).unwrap();
    let page = reader.fetch_page(None, None, 2).await.unwrap();

    assert_eq!(page.records.len(), 2);
    assert_eq!(page.records[0].id, "a");
    assert_eq!(page.records[1].fields["title"], "Title b");
    assert_eq!(page.next_cursor, Some(json!(["b"])));
}

#[tokio::test]
async fn test_short_page_ends_pagination() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/articles/_search"))
        .and(body_partial_json(json!({ "search_after": ["b"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(hits_body(&["c"])))
        .mount(&server)
        .await;

    let reader = ElasticsearchReader::from_config(&test_config(&server.uri())).unwrap();
    let page = reader.fetch_page(None, Some(&json!(["b"])), 2).await.unwrap();

    assert_eq!(page.records.len(), 1);
    assert!(page.next_cursor.is_none());
}

#[tokio::test]
async fn test_filter_is_forwarded() {
    let server = MockServer::start().await;
    let filter = json!({ "term": { "status": "published" } });
    Mock::given(method("POST"))
        .and(path("/articles/_count"))
        .and(body_partial_json(json!({ "query": filter.clone() })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "count": 120 })))
        .mount(&server)
        .await;

    let reader = ElasticsearchReader::from_config(&test_config(&server.uri())).unwrap();
    assert_eq!(reader.count(Some(&filter)).await.unwrap(), 120);
}

#[tokio::test]
async fn test_api_key_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/articles/_count"))
        .and(header("Authorization", "ApiKey c2VjcmV0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "count": 3 })))
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.es_api_key = Some(Secret::new("c2VjcmV0"));
    let reader = ElasticsearchReader::from_config(&config).unwrap();
    assert_eq!(reader.count(None).await.unwrap(), 3);
}

#[tokio::test]
async fn test_unauthorized_is_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/articles/_search"))
        .respond_with(ResponseTemplate::new(401).set_body_string("missing authentication"))
        .mount(&server)
        .await;

    let reader = ElasticsearchReader::from_config(&test_config(&server.uri())).unwrap();
    let err = reader.fetch_page(None, None, 10).await.unwrap_err();
    assert!(matches!(err, Error::Authentication(_)));
}

#[tokio::test]
async fn test_missing_index_is_source_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/articles/_search"))
        .respond_with(ResponseTemplate::new(404).set_body_string("index_not_found_exception"))
        .mount(&server)
        .await;

    let reader = ElasticsearchReader::from_config(&test_config(&server.uri())).unwrap();
    let err = reader.fetch_page(None, None, 10).await.unwrap_err();
    assert!(matches!(err, Error::SourceUnavailable(_)));
}

#[tokio::test]
async fn test_ping() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "tagline": "You Know, for Search" })))
        .mount(&server)
        .await;

    let reader = ElasticsearchReader::from_config(&test_config(&server.uri())).unwrap();
    assert!(reader.ping().await.is_ok());
}
