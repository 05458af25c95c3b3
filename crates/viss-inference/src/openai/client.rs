//! Dynamic OpenAI-compatible embedding client.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use viss_core::{ConfigRegistry, EmbeddingProvider, Error, Result, VectorSettings};

use super::error::{to_viss_error, OpenAIErrorCode};
use super::types::*;
use crate::dimension_for_model;
use crate::preprocess::preprocess;

/// Embedding client that re-reads its settings from the registry on every
/// call, so key, endpoint, model, and timeout changes apply immediately.
#[derive(Clone)]
pub struct OpenAIEmbeddingClient {
    client: Client,
    registry: Arc<ConfigRegistry>,
}

impl OpenAIEmbeddingClient {
    pub fn new(registry: Arc<ConfigRegistry>) -> Result<Self> {
        // Per-request timeouts come from the registry.
        let client = Client::builder()
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, registry })
    }

    fn build_request(&self, settings: &VectorSettings, endpoint: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", settings.base_url.trim_end_matches('/'), endpoint);
        self.client
            .post(url)
            .timeout(settings.timeout)
            .header("Authorization", format!("Bearer {}", settings.api_key))
            .header("Content-Type", "application/json")
    }

    /// One HTTP round trip for already-preprocessed, non-empty inputs.
    async fn request_embeddings(
        &self,
        settings: &VectorSettings,
        input: Vec<String>,
    ) -> Result<Vec<Vec<f32>>> {
        let expected = input.len();
        let start = Instant::now();
        let request = EmbeddingRequest {
            model: settings.model.clone(),
            input,
            encoding_format: Some("float".to_string()),
        };

        let response = self
            .build_request(settings, "/embeddings")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Embedding(format!("Request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let (message, error_type) = match serde_json::from_str::<OpenAIErrorResponse>(&body) {
                Ok(parsed) => (parsed.error.message, parsed.error.error_type),
                Err(_) => (body, String::new()),
            };
            let code = OpenAIErrorCode::from_response(status, &error_type);
            warn!(
                subsystem = "embedding",
                status,
                error_code = code.as_str(),
                retryable = code.is_retryable(),
                model = %settings.model,
                "Embedding request rejected"
            );
            return Err(to_viss_error(code, status, &message));
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Embedding(format!("Failed to parse response: {e}")))?;

        let mut data = result.data;
        data.sort_by_key(|d| d.index);
        let vectors: Vec<Vec<f32>> = data.into_iter().map(|d| d.embedding).collect();

        if vectors.len() != expected {
            return Err(Error::Embedding(format!(
                "provider returned {} embeddings for {expected} inputs",
                vectors.len()
            )));
        }
        if vectors.iter().any(|v| v.is_empty()) {
            return Err(Error::Embedding(
                "provider returned an embedding of dimension 0".to_string(),
            ));
        }

        debug!(
            subsystem = "embedding",
            model = %settings.model,
            count = vectors.len(),
            dimension = vectors[0].len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Generated embeddings"
        );
        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let settings = self.registry.settings();
        settings.ensure_provider_ready()?;

        let text = preprocess(text);
        if text.is_empty() {
            return Err(Error::Embedding(
                "text is empty after preprocessing".to_string(),
            ));
        }

        self.request_embeddings(&settings, vec![text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("provider returned no embedding".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let settings = self.registry.settings();
        settings.ensure_provider_ready()?;

        let input: Vec<String> = texts
            .iter()
            .map(|t| preprocess(t))
            .filter(|t| !t.is_empty())
            .collect();
        if input.is_empty() {
            return Ok(Vec::new());
        }
        self.request_embeddings(&settings, input).await
    }

    fn dimension(&self) -> usize {
        dimension_for_model(&self.registry.settings().model)
    }

    fn model(&self) -> String {
        self.registry.settings().model
    }

    fn ensure_ready(&self) -> Result<()> {
        self.registry.settings().ensure_provider_ready()
    }
}
