//! Vector-store reconciler: one contract, two backends.

pub mod embedded;
pub mod remote;

use crate::cascade::{evaluate_post_fetch, PostFetchDecision};
use crate::model::Chunk;
use async_trait::async_trait;
use std::collections::HashSet;

/// Reserved metadata key prefixes (spec §6 "Metadata keys used by the core").
pub const ETAG_PREFIX: &str = "etag:";
pub const LASTMOD_PREFIX: &str = "lastmod:";
pub const LAST_RUN_DATE_PREFIX: &str = "last_run_date:";
pub const ZENDESK_CURSOR_PREFIX: &str = "zendesk_cursor:";
pub const SYNC_COMPLETE_PREFIX: &str = "sync_complete:";
pub const CODE_SHA_PREFIX: &str = "code_sha:";

pub fn normalize_metadata_segment(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn open(&mut self) -> Result<(), String>;
    async fn init_metadata(&mut self) -> Result<(), String>;

    /// Upsert by `chunk_id`; tolerates duplicate ids idempotently.
    async fn insert(&self, chunk: &Chunk) -> Result<(), String>;

    async fn get_hashes_by_url(&self, url: &str) -> Result<Vec<String>, String>;

    /// Exact-match deletion on the url field (not prefix).
    async fn remove_by_url(&self, url: &str) -> Result<(), String>;

    /// Deletes all chunks whose url starts with `prefix` and is absent from
    /// `visited`. Skips metadata rows. Returns the number removed.
    async fn remove_obsolete_urls(&self, prefix: &str, visited: &HashSet<String>) -> Result<usize, String>;

    /// File-source variant; normalizes `./` prefix and trailing slash in
    /// `url_rewrite` before comparison. Returns the number removed.
    async fn remove_obsolete_files(
        &self,
        base_path: &str,
        seen: &HashSet<String>,
        url_rewrite: Option<&str>,
    ) -> Result<usize, String>;

    async fn get_urls_by_prefix(&self, prefix: &str) -> Result<HashSet<String>, String>;

    async fn get_metadata(&self, key: &str) -> Result<Option<String>, String>;
    async fn set_metadata(&self, key: &str, value: &str, dim: usize) -> Result<(), String>;
}

/// Per-url swap: compares new vs stored hash multisets; if equal, returns
/// without touching the store. Otherwise deletes the url's chunks and
/// inserts the new set. Not transactional; callers must treat a mid-swap
/// crash as retriable (failure-gating in the crawl loop ensures retry).
pub async fn reconcile_url(
    store: &dyn StoreBackend,
    url: &str,
    new_chunks: &[Chunk],
) -> Result<PostFetchDecision, String> {
    let stored_hashes = store.get_hashes_by_url(url).await?;
    let new_hashes: Vec<String> = new_chunks.iter().map(|c| c.hash.clone()).collect();
    let decision = evaluate_post_fetch(&new_hashes, &stored_hashes);

    if decision == PostFetchDecision::FetchAndEmbed {
        store.remove_by_url(url).await?;
        for chunk in new_chunks {
            store.insert(chunk).await?;
        }
    }

    Ok(decision)
}
