//! Embedded columnar-ish vector-store backend: an in-memory `DashMap` index
//! with bincode snapshot persistence (atomic temp-file + rename), the same
//! durability pattern the teacher's engine snapshots used.

use crate::model::Chunk;
use crate::store::StoreBackend;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize, Deserialize, Default)]
struct PersistedState {
    chunks: Vec<Chunk>,
    metadata: Vec<(String, String)>,
}

pub struct EmbeddedStore {
    chunks: Arc<DashMap<String, Chunk>>,
    metadata: Arc<DashMap<String, String>>,
    snapshot_path: PathBuf,
}

impl EmbeddedStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            chunks: Arc::new(DashMap::new()),
            metadata: Arc::new(DashMap::new()),
            snapshot_path: data_dir.as_ref().join("snapshot.bin"),
        }
    }

    fn temp_snapshot_path(&self) -> PathBuf {
        self.snapshot_path.with_extension("bin.tmp")
    }

    pub fn save_snapshot(&self) -> Result<(), String> {
        if let Some(parent) = self.snapshot_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }

        let state = PersistedState {
            chunks: self.chunks.iter().map(|entry| entry.value().clone()).collect(),
            metadata: self
                .metadata
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        };

        let bytes = bincode::serialize(&state).map_err(|e| e.to_string())?;
        let tmp = self.temp_snapshot_path();
        std::fs::write(&tmp, bytes).map_err(|e| e.to_string())?;
        std::fs::rename(&tmp, &self.snapshot_path).map_err(|e| e.to_string())?;
        debug!(path = %self.snapshot_path.display(), "embedded store: snapshot saved");
        Ok(())
    }

    pub fn load_snapshot(&self) -> Result<(), String> {
        if !self.snapshot_path.exists() {
            info!("embedded store: no existing snapshot, starting fresh");
            return Ok(());
        }
        let bytes = std::fs::read(&self.snapshot_path).map_err(|e| e.to_string())?;
        let state: PersistedState = bincode::deserialize(&bytes).map_err(|e| e.to_string())?;

        self.chunks.clear();
        for chunk in state.chunks {
            self.chunks.insert(chunk.chunk_id.clone(), chunk);
        }
        self.metadata.clear();
        for (k, v) in state.metadata {
            self.metadata.insert(k, v);
        }
        info!(count = self.chunks.len(), "embedded store: snapshot loaded");
        Ok(())
    }
}

#[async_trait]
impl StoreBackend for EmbeddedStore {
    async fn open(&mut self) -> Result<(), String> {
        self.load_snapshot()
    }

    async fn init_metadata(&mut self) -> Result<(), String> {
        Ok(())
    }

    async fn insert(&self, chunk: &Chunk) -> Result<(), String> {
        self.chunks.insert(chunk.chunk_id.clone(), chunk.clone());
        Ok(())
    }

    async fn get_hashes_by_url(&self, url: &str) -> Result<Vec<String>, String> {
        let mut hashes: Vec<String> = self
            .chunks
            .iter()
            .filter(|entry| entry.value().url == url)
            .map(|entry| entry.value().hash.clone())
            .collect();
        hashes.sort();
        Ok(hashes)
    }

    async fn remove_by_url(&self, url: &str) -> Result<(), String> {
        self.chunks.retain(|_, chunk| chunk.url != url);
        Ok(())
    }

    async fn remove_obsolete_urls(&self, prefix: &str, visited: &HashSet<String>) -> Result<usize, String> {
        let before = self.chunks.len();
        self.chunks
            .retain(|_, chunk| !(chunk.url.starts_with(prefix) && !visited.contains(&chunk.url)));
        let removed = before - self.chunks.len();
        if removed > 0 {
            info!(prefix, removed, "embedded store: removed obsolete urls");
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

        let before = self.chunks.len();
        self.chunks.retain(|_, chunk| {
            !(chunk.url.starts_with(&normalized_base) && !seen.contains(&chunk.url))
        });
        let removed = before - self.chunks.len();
        if removed > 0 {
            warn!(base = normalized_base, removed, "embedded store: removed obsolete files");
        }
        Ok(removed)
    }

    async fn get_urls_by_prefix(&self, prefix: &str) -> Result<HashSet<String>, String> {
        Ok(self
            .chunks
            .iter()
            .map(|entry| entry.value().url.clone())
            .filter(|url| url.starts_with(prefix))
            .collect())
    }

    async fn get_metadata(&self, key: &str) -> Result<Option<String>, String> {
        Ok(self.metadata.get(key).map(|v| v.clone()))
    }

    async fn set_metadata(&self, key: &str, value: &str, _dim: usize) -> Result<(), String> {
        self.metadata.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
