//! Embedding-model client contract: a request/response oracle mapping text
//! batches to vectors. An empty response signals permanent failure for the
//! whole batch; a `None` entry within a non-empty response stands in for a
//! per-item failure within an otherwise-successful batch.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::warn;

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, batch: &[String]) -> Vec<Option<Vec<f32>>>;
}

/// Thin REST client for an embedding service that accepts `{"input": [...]}`
/// and returns `{"embeddings": [[f32...], null, ...]}`, one entry per input
/// in order. A transport failure or non-2xx response fails the whole batch
/// (empty `Vec` per the trait's contract); a `null` entry fails just that item.
pub struct ReqwestEmbeddingClient {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl ReqwestEmbeddingClient {
    pub fn new(url: String, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("failed to build reqwest client");
        Self { client, url, api_key }
    }
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Option<Vec<f32>>>,
}

#[async_trait]
impl EmbeddingClient for ReqwestEmbeddingClient {
    async fn embed(&self, batch: &[String]) -> Vec<Option<Vec<f32>>> {
        if batch.is_empty() {
            warn!("embed: called with an empty batch");
            return Vec::new();
        }

        let mut req = self.client.post(&self.url).json(&json!({ "input": batch }));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "embed: request failed, failing batch");
                return Vec::new();
            }
        };
        if !resp.status().is_success() {
            warn!(status = %resp.status(), "embed: non-success response, failing batch");
            return Vec::new();
        }
        match resp.json::<EmbedResponse>().await {
            Ok(body) if body.embeddings.len() == batch.len() => body.embeddings,
            Ok(_) => {
                warn!("embed: response length mismatch, failing batch");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "embed: failed to decode response, failing batch");
                Vec::new()
            }
        }
    }
}

/// Default no-op embedder: chunks still flow through chunking, reconciliation
/// and storage, but carry a fixed-dimension zero vector instead of a real
/// embedding. Used when no real embedding backend is configured, and by
/// tests exercising the sync pipeline around it.
#[derive(Debug, Default)]
pub struct NullEmbedder {
    pub dim: usize,
}

#[async_trait]
impl EmbeddingClient for NullEmbedder {
    async fn embed(&self, batch: &[String]) -> Vec<Option<Vec<f32>>> {
        if batch.is_empty() {
            warn!("embed: called with an empty batch");
            return Vec::new();
        }
        batch.iter().map(|_| Some(vec![0.0_f32; self.dim])).collect()
    }
}
