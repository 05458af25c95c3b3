//! Qdrant REST client.
//!
//! Points are keyed by [`point_id`](viss_core::point_id), the MD5-derived
//! UUID of the file id, and carry a [`VectorPayload`] so search hits can be
//! mapped back to files without a second lookup.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use viss_core::defaults::{COLLECTION_NAME, QDRANT_TIMEOUT_SECS};
use viss_core::{
    point_id_string, Error, Result, ScoredPoint, StoredPoint, VectorPayload, VectorStore,
};

use crate::types::*;

/// Connection settings for [`QdrantClient`].
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    /// Base URL without trailing slash.
    pub url: String,
    pub collection: String,
    pub timeout: Duration,
}

impl QdrantConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into().trim().trim_end_matches('/').to_string(),
            collection: COLLECTION_NAME.to_string(),
            timeout: Duration::from_secs(QDRANT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }
}

/// Qdrant-compatible vector store over HTTP.
#[derive(Clone)]
pub struct QdrantClient {
    client: Client,
    config: QdrantConfig,
}

impl QdrantClient {
    pub fn new(config: QdrantConfig) -> Result<Self> {
        if config.url.is_empty() {
            return Err(Error::Config("vector store URL is not configured".to_string()));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &QdrantConfig {
        &self.config
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!(
            "{}/collections/{}{}",
            self.config.url, self.config.collection, suffix
        )
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response> {
        let mut req = self.client.request(method, url);
        if let Some(body) = body {
            req = req.json(body);
        }
        req.send()
            .await
            .map_err(|e| Error::VectorStore(format!("Request failed: {e}")))
    }

    /// Send and decode `result`, treating every non-2xx as an error.
    async fn call<B, T>(&self, method: Method, url: &str, body: Option<&B>) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(method, url, body).await?;
        decode(response).await
    }

    async fn collection_exists(&self) -> Result<bool> {
        let response = self
            .send::<()>(Method::GET, &self.collection_url(""), None)
            .await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(status_error(response).await),
        }
    }
}

async fn status_error(response: reqwest::Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Error::VectorStore(format!("vector store returned {status}: {body}"))
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(status_error(response).await);
    }
    let parsed: QdrantResponse<T> = response
        .json()
        .await
        .map_err(|e| Error::VectorStore(format!("Failed to parse response: {e}")))?;
    Ok(parsed.result)
}

fn user_filter(user_id: i64) -> Option<serde_json::Value> {
    (user_id != 0).then(|| {
        json!({
            "must": [{ "key": "user_id", "match": { "value": user_id } }]
        })
    })
}

#[async_trait]
impl VectorStore for QdrantClient {
    async fn init_collection(&self, dimension: usize) -> Result<()> {
        if self.collection_exists().await? {
            return Ok(());
        }

        let body = CreateCollectionRequest {
            vectors: VectorParams {
                size: dimension,
                distance: "Cosine",
            },
        };
        let response = self
            .send(Method::PUT, &self.collection_url(""), Some(&body))
            .await?;
        if response.status().is_success() {
            info!(
                subsystem = "vector_store",
                collection = %self.config.collection,
                dimension,
                "Created vector collection"
            );
            return Ok(());
        }

        // Lost a creation race with another process.
        let err = status_error(response).await;
        if self.collection_exists().await? {
            return Ok(());
        }
        Err(err)
    }

    async fn upsert(&self, file_id: &str, vector: &[f32], payload: &VectorPayload) -> Result<()> {
        let body = UpsertRequest {
            points: vec![PointStruct {
                id: point_id_string(file_id),
                vector,
                payload,
            }],
        };
        let _: serde_json::Value = self
            .call(
                Method::PUT,
                &self.collection_url("/points?wait=true"),
                Some(&body),
            )
            .await?;
        debug!(subsystem = "vector_store", file_id, "Upserted point");
        Ok(())
    }

    async fn fetch(&self, file_id: &str) -> Result<Option<StoredPoint>> {
        let url = self.collection_url(&format!(
            "/points/{}?with_vector=true&with_payload=true",
            point_id_string(file_id)
        ));
        let response = self.send::<()>(Method::GET, &url, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let record: PointRecord = decode(response).await?;
        match (record.vector, record.payload) {
            (Some(vector), Some(payload)) => Ok(Some(StoredPoint { vector, payload })),
            _ => Err(Error::VectorStore(format!(
                "point for {file_id} is missing its vector or payload"
            ))),
        }
    }

    async fn exists(&self, file_id: &str) -> Result<bool> {
        let url = self.collection_url(&format!(
            "/points/{}?with_vector=false&with_payload=false",
            point_id_string(file_id)
        ));
        let response = self.send::<()>(Method::GET, &url, None).await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(status_error(response).await),
        }
    }

    async fn delete(&self, file_id: &str) -> Result<()> {
        let body = DeletePointsRequest {
            points: vec![point_id_string(file_id)],
        };
        let _: serde_json::Value = self
            .call(
                Method::POST,
                &self.collection_url("/points/delete?wait=true"),
                Some(&body),
            )
            .await?;
        Ok(())
    }

    async fn similarity_search(
        &self,
        vector: &[f32],
        limit: usize,
        user_id: i64,
        threshold: f32,
    ) -> Result<Vec<ScoredPoint>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let body = SearchRequest {
            vector,
            limit,
            with_payload: true,
            with_vector: false,
            score_threshold: threshold,
            filter: user_filter(user_id),
        };
        let hits: Vec<ScoredRecord> = self
            .call(
                Method::POST,
                &self.collection_url("/points/search"),
                Some(&body),
            )
            .await?;

        let mut points: Vec<ScoredPoint> = hits
            .into_iter()
            .filter(|h| h.score >= threshold)
            .filter_map(|h| {
                h.payload.map(|p| ScoredPoint {
                    file_id: p.file_id,
                    score: h.score,
                })
            })
            .collect();
        points.sort_by(|a, b| b.score.total_cmp(&a.score));
        points.truncate(limit);
        Ok(points)
    }

    async fn count(&self) -> Result<u64> {
        let response = self
            .send(
                Method::POST,
                &self.collection_url("/points/count"),
                Some(&json!({ "exact": true })),
            )
            .await?;

        match response.status() {
            s if s.is_success() => Ok(decode::<CountResult>(response).await?.count),
            StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED => {
                debug!(
                    subsystem = "vector_store",
                    "Count endpoint unsupported, falling back to collection info"
                );
                let info: CollectionInfo = self
                    .call::<(), _>(Method::GET, &self.collection_url(""), None)
                    .await?;
                Ok(info.points_count.or(info.vectors_count).unwrap_or(0))
            }
            _ => Err(status_error(response).await),
        }
    }

    async fn scroll_ids(
        &self,
        limit: usize,
        offset: Option<String>,
    ) -> Result<(Vec<String>, Option<String>)> {
        let body = ScrollRequest {
            with_payload: true,
            with_vector: false,
            limit,
            offset: offset.as_deref().map(string_to_id),
        };
        let page: ScrollResult = self
            .call(
                Method::POST,
                &self.collection_url("/points/scroll"),
                Some(&body),
            )
            .await?;

        let ids = page
            .points
            .into_iter()
            .filter_map(|p| p.payload.map(|payload| payload.file_id))
            .collect();
        let next = page.next_page_offset.as_ref().and_then(id_to_string);
        Ok((ids, next))
    }

    async fn health(&self) -> Result<()> {
        let url = format!("{}/collections", self.config.url);
        let _: serde_json::Value = self.call::<(), _>(Method::GET, &url, None).await?;
        Ok(())
    }
}
