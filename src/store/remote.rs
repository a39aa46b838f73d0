//! Remote vector-service backend: a thin REST client against a Qdrant-shaped
//! HTTP API, one collection per (product, version).

use crate::fingerprint::{hash_to_uuid, namespace_uuid};
use crate::model::Chunk;
use crate::store::{normalize_metadata_segment, StoreBackend};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RemoteStoreConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub product_name: String,
    pub version: String,
    pub vector_dim: usize,
}

pub struct RemoteStore {
    client: Client,
    cfg: RemoteStoreConfig,
}

impl RemoteStore {
    pub fn new(cfg: RemoteStoreConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build reqwest client");
        Self { client, cfg }
    }

    fn collection_name(&self) -> String {
        format!(
            "{}_{}",
            normalize_metadata_segment(&self.cfg.product_name),
            normalize_metadata_segment(&self.cfg.version)
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.cfg.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.cfg.api_key {
            Some(key) => req.header("api-key", key),
            None => req,
        }
    }

    /// Point ids must be UUIDs; derive one from the chunk's own id when it
    /// isn't already UUID-shaped, retaining the original as a payload field.
    fn point_id(chunk_id: &str) -> (String, Option<String>) {
        if Uuid::parse_str(chunk_id).is_ok() {
            (chunk_id.to_string(), None)
        } else {
            (hash_to_uuid(chunk_id), Some(chunk_id.to_string()))
        }
    }

    async fn scroll_non_metadata(&self) -> Result<Vec<Value>, String> {
        let body = json!({
            "filter": { "must_not": [{ "key": "is_metadata", "match": { "value": true } }] },
            "limit": 10_000,
            "with_payload": true,
        });
        let resp = self
            .auth(self.client.post(self.url(&format!(
                "collections/{}/points/scroll",
                self.collection_name()
            ))))
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let json: Value = resp.json().await.map_err(|e| e.to_string())?;
        Ok(json["result"]["points"].as_array().cloned().unwrap_or_default())
    }
}

#[async_trait]
impl StoreBackend for RemoteStore {
    async fn open(&mut self) -> Result<(), String> {
        let body = json!({ "vectors": { "size": self.cfg.vector_dim, "distance": "Cosine" } });
        let resp = self
            .auth(self.client.put(self.url(&format!("collections/{}", self.collection_name()))))
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if resp.status().is_success() {
            return Ok(());
        }
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if text.to_lowercase().contains("already exists") {
            debug!("remote store: collection already exists, continuing");
            return Ok(());
        }
        Err(format!("failed to create collection: {} {}", status, text))
    }

    async fn init_metadata(&mut self) -> Result<(), String> {
        Ok(())
    }

    async fn insert(&self, chunk: &Chunk) -> Result<(), String> {
        let (point_id, original_chunk_id) = Self::point_id(&chunk.chunk_id);
        let vector = chunk
            .embedding
            .clone()
            .unwrap_or_else(|| vec![0.0; self.cfg.vector_dim]);

        let mut payload = json!({
            "product_name": chunk.product_name,
            "version": chunk.version,
            "branch": chunk.branch.clone().unwrap_or_default(),
            "repo": chunk.repo.clone().unwrap_or_default(),
            "heading_hierarchy": chunk.heading_hierarchy,
            "section": chunk.section,
            "content": chunk.content,
            "url": chunk.url,
            "hash": chunk.hash,
            "chunk_index": chunk.chunk_index,
            "total_chunks": chunk.total_chunks,
        });
        if let Some(original) = original_chunk_id {
            payload["original_chunk_id"] = json!(original);
        }

        let body = json!({
            "points": [{ "id": point_id, "vector": vector, "payload": payload }]
        });

        let resp = self
            .auth(self.client.put(self.url(&format!(
                "collections/{}/points?wait=true",
                self.collection_name()
            ))))
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(format!("insert failed: {}", resp.status()))
        }
    }

    async fn get_hashes_by_url(&self, url: &str) -> Result<Vec<String>, String> {
        let points = self.scroll_non_metadata().await?;
        let mut hashes: Vec<String> = points
            .into_iter()
            .filter(|p| p["payload"]["url"].as_str() == Some(url))
            .filter_map(|p| p["payload"]["hash"].as_str().map(|s| s.to_string()))
            .collect();
        hashes.sort();
        Ok(hashes)
    }

    async fn remove_by_url(&self, url: &str) -> Result<(), String> {
        let body = json!({
            "filter": { "must": [{ "key": "url", "match": { "value": url } }] }
        });
        self.auth(self.client.post(self.url(&format!(
            "collections/{}/points/delete",
            self.collection_name()
        ))))
        .json(&body)
        .send()
        .await
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    async fn remove_obsolete_urls(&self, prefix: &str, visited: &HashSet<String>) -> Result<usize, String> {
        let points = self.scroll_non_metadata().await?;
        let mut removed = 0usize;
        let mut to_delete: Vec<String> = Vec::new();
        for p in points {
            if let Some(url) = p["payload"]["url"].as_str() {
                if url.starts_with(prefix) && !visited.contains(url) {
                    to_delete.push(url.to_string());
                }
            }
        }
        to_delete.sort();
        to_delete.dedup();
        for url in to_delete {
            self.remove_by_url(&url).await?;
            removed += 1;
        }
        if removed > 0 {
            info!(prefix, removed, "remote store: removed obsolete urls");
        }
        Ok(removed)
    }

    async fn remove_obsolete_files(
        &self,
        base_path: &str,
        seen: &HashSet<String>,
        url_rewrite: Option<&str>,
    ) -> Result<usize, String> {
        let mut normalized_base = base_path.trim_start_matches("./").to_string();
        if normalized_base.ends_with('/') {
            normalized_base.pop();
        }
        if let Some(rewrite) = url_rewrite {
            let mut rewrite = rewrite.trim_start_matches("./").to_string();
            if rewrite.ends_with('/') {
                rewrite.pop();
            }
            normalized_base = rewrite;
        }

        let points = self.scroll_non_metadata().await?;
        let mut to_delete: Vec<String> = Vec::new();
        for p in points {
            if let Some(url) = p["payload"]["url"].as_str() {
                if url.starts_with(&normalized_base) && !seen.contains(url) {
                    to_delete.push(url.to_string());
                }
            }
        }
        to_delete.sort();
        to_delete.dedup();
        let removed = to_delete.len();
        for url in to_delete {
            self.remove_by_url(&url).await?;
        }
        if removed > 0 {
            warn!(base = normalized_base, removed, "remote store: removed obsolete files");
        }
        Ok(removed)
    }

    async fn get_urls_by_prefix(&self, prefix: &str) -> Result<HashSet<String>, String> {
        let points = self.scroll_non_metadata().await?;
        Ok(points
            .into_iter()
            .filter_map(|p| p["payload"]["url"].as_str().map(|s| s.to_string()))
            .filter(|url| url.starts_with(prefix))
            .collect())
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<String>, String> {
        let id = namespace_uuid(key);
        let resp = self
            .auth(self.client.get(self.url(&format!(
                "collections/{}/points/{}",
                self.collection_name(),
                id
            ))))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let json: Value = resp.json().await.map_err(|e| e.to_string())?;
        Ok(json["result"]["payload"]["value"].as_str().map(|s| s.to_string()))
    }

    async fn set_metadata(&self, key: &str, value: &str, dim: usize) -> Result<(), String> {
        let id = namespace_uuid(key);
        let body = json!({
            "points": [{
                "id": id,
                "vector": vec![0.0_f32; dim],
                "payload": { "is_metadata": true, "key": key, "value": value }
            }]
        });
        let resp = self
            .auth(self.client.put(self.url(&format!(
                "collections/{}/points?wait=true",
                self.collection_name()
            ))))
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(format!("set_metadata failed: {}", resp.status()))
        }
    }
}
