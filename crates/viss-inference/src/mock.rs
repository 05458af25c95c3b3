//! Mock embedding provider for deterministic testing.
//!
//! Vectors are derived from a hash of the preprocessed text, so equal texts
//! always embed identically. Specific texts can be pinned to chosen vectors
//! to shape similarity in search tests, and failures can be injected.
//!
//! ```rust,ignore
//! let provider = MockEmbeddingProvider::new()
//!     .with_dimension(8)
//!     .with_vector("cat", vec![1.0; 8]);
//! provider.fail_next(2);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use viss_core::{EmbeddingProvider, Error, Result};

use crate::preprocess::preprocess;

#[derive(Debug, Clone)]
struct MockConfig {
    dimension: usize,
    model: String,
    pinned: HashMap<String, Vec<f32>>,
    latency: Duration,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            dimension: 8,
            model: "mock-embedding".to_string(),
            pinned: HashMap::new(),
            latency: Duration::ZERO,
        }
    }
}

/// Mock embedding provider.
#[derive(Clone, Default)]
pub struct MockEmbeddingProvider {
    config: Arc<MockConfig>,
    calls: Arc<AtomicUsize>,
    pending_failures: Arc<AtomicUsize>,
    always_fail: Arc<AtomicBool>,
    unavailable: Arc<AtomicBool>,
    inputs: Arc<Mutex<Vec<String>>>,
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        Arc::make_mut(&mut self.config).dimension = dimension;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).model = model.into();
        self
    }

    /// Return `vector` for texts that preprocess to the same string as `text`.
    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        Arc::make_mut(&mut self.config)
            .pinned
            .insert(preprocess(text), vector);
        self
    }

    /// Simulated latency for every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        Arc::make_mut(&mut self.config).latency = latency;
        self
    }

    /// Fail the next `n` calls with an embedding error.
    pub fn fail_next(&self, n: usize) {
        self.pending_failures.store(n, Ordering::SeqCst);
    }

    /// Fail every call until cleared.
    pub fn set_always_fail(&self, fail: bool) {
        self.always_fail.store(fail, Ordering::SeqCst);
    }

    /// Make `ensure_ready` report a configuration error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of embed calls made, successful or not.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Preprocessed inputs in call order.
    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().map(|v| v.clone()).unwrap_or_default()
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(v) = self.config.pinned.get(text) {
            return v.clone();
        }
        hashed_vector(text, self.config.dimension)
    }

    async fn record_call(&self, text: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut inputs) = self.inputs.lock() {
            inputs.push(text.to_string());
        }
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(Error::Embedding("mock provider failure".to_string()));
        }
        let injected = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::Embedding("mock provider failure".to_string()));
        }
        Ok(())
    }
}

/// Unit-length vector seeded from an FNV-1a hash of `text`.
fn hashed_vector(text: &str, dimension: usize) -> Vec<f32> {
    let mut state: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in text.as_bytes() {
        state ^= u64::from(*byte);
        state = state.wrapping_mul(0x0100_0000_01b3);
    }

    let mut v: Vec<f32> = (0..dimension)
        .map(|_| {
            // xorshift64
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            ((state >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
        })
        .collect();

    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = preprocess(text);
        self.record_call(&text).await?;
        if text.is_empty() {
            return Err(Error::Embedding(
                "text is empty after preprocessing".to_string(),
            ));
        }
        Ok(self.vector_for(&text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let input: Vec<String> = texts
            .iter()
            .map(|t| preprocess(t))
            .filter(|t| !t.is_empty())
            .collect();
        self.record_call(&input.join("\u{1f}")).await?;
        Ok(input.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model(&self) -> String {
        self.config.model.clone()
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Config("embedding API key is not configured".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deterministic_unit_vectors() {
        let provider = MockEmbeddingProvider::new().with_dimension(16);
        let a = provider.embed("a cat").await.unwrap();
        let b = provider.embed("  a cat ").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_pinned_vector() {
        let provider = MockEmbeddingProvider::new().with_vector("dog", vec![1.0, 0.0]);
        assert_eq!(provider.embed("dog").await.unwrap(), vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn test_fail_next() {
        let provider = MockEmbeddingProvider::new();
        provider.fail_next(2);
        assert!(provider.embed("x").await.is_err());
        assert!(provider.embed("x").await.is_err());
        assert!(provider.embed("x").await.is_ok());
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn test_batch_skips_empty_inputs() {
        let provider = MockEmbeddingProvider::new();
        let out = provider
            .embed_batch(&["a".to_string(), "   ".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], provider.embed("a").await.unwrap());
    }

    #[test]
    fn test_unavailable() {
        let provider = MockEmbeddingProvider::new();
        assert!(provider.ensure_ready().is_ok());
        provider.set_unavailable(true);
        assert!(matches!(provider.ensure_ready(), Err(Error::Config(_))));
    }
}
