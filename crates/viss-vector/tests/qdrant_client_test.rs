//! HTTP-level tests for the Qdrant client.

use serde_json::json;
use viss_core::{point_id_string, Error, VectorPayload, VectorStore};
use viss_vector::{QdrantClient, QdrantConfig};
use wiremock::matchers::{body_json, body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> QdrantClient {
    QdrantClient::new(QdrantConfig::new(server.uri())).unwrap()
}

fn payload(file_id: &str, user_id: i64) -> VectorPayload {
    VectorPayload {
        file_id: file_id.to_string(),
        description: "a cat".to_string(),
        model: "text-embedding-3-small".to_string(),
        user_id,
    }
}

#[tokio::test]
async fn test_init_collection_creates_when_absent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collections/file_vectors"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/collections/file_vectors"))
        .and(body_json(json!({ "vectors": { "size": 1536, "distance": "Cosine" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": true })))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).init_collection(1536).await.unwrap();
}

#[tokio::test]
async fn test_init_collection_is_idempotent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collections/file_vectors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": {} })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/collections/file_vectors"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    client(&server).init_collection(1536).await.unwrap();
}

#[tokio::test]
async fn test_upsert_uses_deterministic_point_id() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/collections/file_vectors/points"))
        .and(body_partial_json(json!({
            "points": [{
                "id": "7fc56270-e7a7-0fa8-1a59-35b72eacbe29",
                "payload": { "file_id": "A", "user_id": 7 }
            }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": { "status": "completed" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .upsert("A", &[0.1, 0.2], &payload("A", 7))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_fetch_missing_point_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!(
            "/collections/file_vectors/points/{}",
            point_id_string("gone")
        )))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let qdrant = client(&server);
    assert!(qdrant.fetch("gone").await.unwrap().is_none());
    assert!(!qdrant.exists("gone").await.unwrap());
}

#[tokio::test]
async fn test_fetch_returns_vector_and_payload() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!(
            "/collections/file_vectors/points/{}",
            point_id_string("P")
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {
                "id": point_id_string("P"),
                "vector": [0.5, 0.5],
                "payload": payload("P", 3)
            }
        })))
        .mount(&server)
        .await;

    let point = client(&server).fetch("P").await.unwrap().unwrap();
    assert_eq!(point.vector, vec![0.5, 0.5]);
    assert_eq!(point.payload.user_id, 3);
}

#[tokio::test]
async fn test_search_sends_user_filter_only_when_set() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/collections/file_vectors/points/search"))
        .and(body_partial_json(json!({
            "limit": 10,
            "score_threshold": 0.5,
            "filter": { "must": [{ "key": "user_id", "match": { "value": 9 } }] }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [
                { "id": "x", "score": 0.6, "payload": payload("low", 9) },
                { "id": "y", "score": 0.9, "payload": payload("high", 9) }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let hits = client(&server)
        .similarity_search(&[1.0, 0.0], 10, 9, 0.5)
        .await
        .unwrap();
    let ids: Vec<_> = hits.iter().map(|h| h.file_id.as_str()).collect();
    assert_eq!(ids, vec!["high", "low"]);
}

#[tokio::test]
async fn test_count_falls_back_to_collection_info() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/collections/file_vectors/points/count"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/collections/file_vectors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": { "points_count": 42 }
        })))
        .mount(&server)
        .await;

    assert_eq!(client(&server).count().await.unwrap(), 42);
}

#[tokio::test]
async fn test_scroll_follows_cursor() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/collections/file_vectors/points/scroll"))
        .and(body_partial_json(json!({ "offset": "cursor-2" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {
                "points": [{ "id": "cursor-2", "payload": payload("b", 1) }],
                "next_page_offset": null
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/collections/file_vectors/points/scroll"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {
                "points": [{ "id": "cursor-1", "payload": payload("a", 1) }],
                "next_page_offset": "cursor-2"
            }
        })))
        .mount(&server)
        .await;

    let qdrant = client(&server);
    let (page, next) = qdrant.scroll_ids(1, None).await.unwrap();
    assert_eq!(page, vec!["a".to_string()]);
    assert_eq!(next.as_deref(), Some("cursor-2"));

    let all = qdrant.scroll_all_ids(10).await.unwrap();
    assert_eq!(all, vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn test_non_2xx_is_vector_store_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/collections/file_vectors/points/delete"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = client(&server).delete("a").await.unwrap_err();
    assert!(matches!(err, Error::VectorStore(_)));
}

#[test]
fn test_empty_url_is_config_error() {
    assert!(matches!(
        QdrantClient::new(QdrantConfig::new("  ")),
        Err(Error::Config(_))
    ));
}
