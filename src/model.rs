//! Core data types shared by the chunkers, the reconciler and the crawl loop.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub content: String,
    pub hash: String,
    pub url: String,
    pub product_name: String,
    pub version: String,
    pub branch: Option<String>,
    pub repo: Option<String>,
    pub heading_hierarchy: Vec<String>,
    pub section: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub embedding: Option<Vec<f32>>,
}

/// Assigns `chunk_index`/`total_chunks` over an ordered run of chunks that
/// all belong to the same url. Called as the final pass by both chunkers.
pub fn assign_chunk_indices(chunks: &mut [Chunk]) {
    let total = chunks.len();
    for (i, chunk) in chunks.iter_mut().enumerate() {
        chunk.chunk_index = i;
        chunk.total_chunks = total;
    }
}

/// Transient BFS queue entry; exists only for the lifetime of one crawl.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub url: String,
    pub lastmod_hint: Option<String>,
    pub retries_left: u32,
}

/// Outcome of one source's sync: used to decide whether its watermark
/// advances and surfaced to the operator in the run summary.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub source_name: String,
    pub urls_processed: usize,
    pub urls_embedded: usize,
    pub has_failures: bool,
}
