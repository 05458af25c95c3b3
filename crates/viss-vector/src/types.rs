//! Wire types for the Qdrant REST API.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use viss_core::VectorPayload;

/// Every Qdrant response wraps its body in `result`.
#[derive(Debug, Deserialize)]
pub struct QdrantResponse<T> {
    pub result: T,
}

#[derive(Debug, Serialize)]
pub struct CreateCollectionRequest {
    pub vectors: VectorParams,
}

#[derive(Debug, Serialize)]
pub struct VectorParams {
    pub size: usize,
    pub distance: &'static str,
}

#[derive(Debug, Serialize)]
pub struct UpsertRequest<'a> {
    pub points: Vec<PointStruct<'a>>,
}

#[derive(Debug, Serialize)]
pub struct PointStruct<'a> {
    pub id: String,
    pub vector: &'a [f32],
    pub payload: &'a VectorPayload,
}

/// A point as returned by GET, search, and scroll.
#[derive(Debug, Deserialize)]
pub struct PointRecord {
    pub id: JsonValue,
    #[serde(default)]
    pub vector: Option<Vec<f32>>,
    #[serde(default)]
    pub payload: Option<VectorPayload>,
}

#[derive(Debug, Deserialize)]
pub struct ScoredRecord {
    #[serde(default)]
    pub id: JsonValue,
    pub score: f32,
    #[serde(default)]
    pub payload: Option<VectorPayload>,
}

#[derive(Debug, Serialize)]
pub struct SearchRequest<'a> {
    pub vector: &'a [f32],
    pub limit: usize,
    pub with_payload: bool,
    pub with_vector: bool,
    pub score_threshold: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
pub struct CountResult {
    pub count: u64,
}

/// Subset of `GET /collections/{name}` used for the count fallback.
#[derive(Debug, Deserialize)]
pub struct CollectionInfo {
    #[serde(default)]
    pub points_count: Option<u64>,
    #[serde(default)]
    pub vectors_count: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ScrollRequest {
    pub with_payload: bool,
    pub with_vector: bool,
    pub limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
pub struct ScrollResult {
    pub points: Vec<PointRecord>,
    #[serde(default)]
    pub next_page_offset: Option<JsonValue>,
}

#[derive(Debug, Serialize)]
pub struct DeletePointsRequest {
    pub points: Vec<String>,
}

/// Render a point id (UUID string or integer) as a cursor string.
pub fn id_to_string(id: &JsonValue) -> Option<String> {
    match id {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Inverse of [`id_to_string`].
pub fn string_to_id(s: &str) -> JsonValue {
    s.parse::<u64>()
        .map(JsonValue::from)
        .unwrap_or_else(|_| JsonValue::String(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_search_request_omits_absent_filter() {
        let v = [0.1f32, 0.2];
        let req = SearchRequest {
            vector: &v,
            limit: 5,
            with_payload: true,
            with_vector: false,
            score_threshold: 0.3,
            filter: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("filter").is_none());
        assert_eq!(json["limit"], 5);
    }

    #[test]
    fn test_point_id_cursor_conversion() {
        assert_eq!(id_to_string(&json!("abc")), Some("abc".to_string()));
        assert_eq!(id_to_string(&json!(42)), Some("42".to_string()));
        assert_eq!(string_to_id("42"), json!(42));
        assert_eq!(string_to_id("7fc56270-e7a7-0fa8-1a59-35b72eacbe29"), json!("7fc56270-e7a7-0fa8-1a59-35b72eacbe29"));
    }

    #[test]
    fn test_scroll_result_end() {
        let body = r#"{"points":[],"next_page_offset":null}"#;
        let page: ScrollResult = serde_json::from_str(body).unwrap();
        assert!(page.next_page_offset.is_none());
    }
}
