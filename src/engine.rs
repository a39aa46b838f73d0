//! Website crawl loop (spec §4.7): a BFS queue over a url prefix, integrated
//! with the change-detection cascade, ETag/lastmod bookkeeping, 429 retry
//! budgets and browser-session health tracking.
//!
//! The loop is a plain async function, not a struct with hidden state: every
//! shared knob (`visited`, `etag_store`, `lastmod_store`, `known_urls`,
//! `force_full_sync`, the markdown mirror) is passed in by the caller so it
//! can be reused across multiple `crawl_website` invocations for the same
//! source, per spec §9 "module-level state -> scoped constructor args".

use crate::browser::{BrowserDriver, PageError};
use crate::cascade::{
    evaluate_post_fetch, evaluate_pre_fetch, AdaptiveBackoff, CascadeInputs, HeadProber, PostFetchDecision,
    PreFetchDecision,
};
use crate::chunker::markdown::{chunk_markdown, MarkdownChunkConfig};
use crate::config::WEBSITE_MAX_RETRIES_PER_URL;
use crate::embed::EmbeddingClient;
use crate::mirror::MarkdownMirror;
use crate::model::QueueItem;
use crate::sitemap::{lastmod_for, SitemapMap};
use crate::store::{reconcile_url, StoreBackend};
use crate::urlutil;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct CrawlOutputs {
    pub has_network_errors: bool,
    pub not_found_urls: HashSet<String>,
}

pub struct CrawlState<'a> {
    pub visited: &'a mut HashSet<String>,
    pub etag_store: &'a mut HashMap<String, String>,
    pub lastmod_store: &'a mut HashMap<String, String>,
}

pub struct CrawlOptions<'a> {
    pub base_url: &'a str,
    pub known_urls: HashSet<String>,
    pub sitemap: SitemapMap,
    pub force_full_sync: bool,
    pub source_sync_complete: bool,
    pub markdown_mirror: Option<&'a MarkdownMirror>,
    pub max_size_bytes: u64,
}

/// Drives one crawl over `opts.base_url`'s prefix to completion, invoking
/// `process_page` for each page whose content survives change detection.
/// `process_page` chunks and reconciles the page and returns whether the
/// attempt succeeded (spec: ETag/lastmod/visited only advance on success).
pub async fn crawl_website<F, Fut>(
    opts: CrawlOptions<'_>,
    state: &mut CrawlState<'_>,
    browser: &dyn BrowserDriver,
    prober: &dyn HeadProber,
    mut process_page: F,
) -> CrawlOutputs
where
    F: FnMut(String, String) -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let prefix = urlutil::prefix(opts.base_url);
    let mut queue: VecDeque<QueueItem> = VecDeque::new();
    let mut seen_in_queue: HashSet<String> = HashSet::new();
    let mut backoff = AdaptiveBackoff::new();
    let mut out = CrawlOutputs::default();

    let seed = |url: String, lastmod_hint: Option<String>, queue: &mut VecDeque<QueueItem>, seen: &mut HashSet<String>| {
        let normalized = urlutil::normalize(&url);
        if seen.insert(normalized.clone()) {
            queue.push_back(QueueItem {
                url: normalized,
                lastmod_hint,
                retries_left: WEBSITE_MAX_RETRIES_PER_URL,
            });
        }
    };

    seed(opts.base_url.to_string(), lastmod_for(&opts.sitemap, opts.base_url), &mut queue, &mut seen_in_queue);
    for url in &opts.known_urls {
        seed(url.clone(), lastmod_for(&opts.sitemap, url), &mut queue, &mut seen_in_queue);
    }
    for (url, lastmod) in &opts.sitemap {
        seed(url.clone(), lastmod.clone(), &mut queue, &mut seen_in_queue);
    }

    while let Some(mut item) = queue.pop_front() {
        let normalized = urlutil::normalize(&item.url);
        if state.visited.contains(&normalized) {
            continue;
        }
        if !should_process_checked(&normalized) {
            continue;
        }

        let sitemap_lastmod = item.lastmod_hint.clone().or_else(|| lastmod_for(&opts.sitemap, &normalized));
        let markdown_mirror_configured = opts.markdown_mirror.is_some();
        let markdown_mirror_has_url = opts
            .markdown_mirror
            .map(|m| m.has_url(&normalized))
            .unwrap_or(true);

        let inputs = CascadeInputs {
            url: &normalized,
            source_sync_complete: opts.source_sync_complete,
            markdown_mirror_configured,
            markdown_mirror_has_url,
            force_full_sync: opts.force_full_sync,
            sitemap_lastmod: sitemap_lastmod.as_deref(),
            stored_lastmod: state.lastmod_store.get(&normalized).map(|s| s.as_str()),
            stored_etag: state.etag_store.get(&normalized).map(|s| s.as_str()),
        };

        if evaluate_pre_fetch(&inputs, &mut backoff, prober).await == PreFetchDecision::Skip {
            debug!(url = %normalized, "crawl: cascade decided skip");
            state.visited.insert(normalized);
            continue;
        }

        if markdown_mirror_configured {
            if let Ok(head) = prober.head(&normalized).await {
                if head.status == 404 {
                    out.not_found_urls.insert(normalized.clone());
                    state.visited.insert(normalized);
                    continue;
                }
            }
        }

        let fetch_result = browser.process_page(&normalized, opts.max_size_bytes).await;
        let page = match fetch_result {
            Ok(p) => p,
            Err(e) => {
                if let Some(outcome) = handle_page_error(&e, &mut item, &mut queue) {
                    match outcome {
                        PageErrorOutcome::NetworkError => out.has_network_errors = true,
                        PageErrorOutcome::Requeued => {}
                    }
                }
                continue;
            }
        };

        let final_normalized = urlutil::normalize(&page.final_url);

        let Some(content) = page.content else {
            debug!(url = %final_normalized, "crawl: null content, skipping without writing watermarks");
            continue;
        };

        let success = process_page(final_normalized.clone(), content).await;
        if success {
            if let Some(etag) = page.etag {
                state.etag_store.insert(final_normalized.clone(), etag);
            }
            if let Some(lastmod) = sitemap_lastmod.clone() {
                state.lastmod_store.insert(final_normalized.clone(), lastmod);
            }
            state.visited.insert(final_normalized.clone());
        } else {
            warn!(url = %final_normalized, "crawl: processing callback failed, watermarks withheld");
        }

        for link in &page.links {
            let resolved = urlutil::build(link, &final_normalized);
            if resolved.is_empty() || !resolved.starts_with(&prefix) {
                continue;
            }
            let inherited_lastmod = lastmod_for(&opts.sitemap, &resolved).or_else(|| sitemap_lastmod.clone());
            seed(resolved, inherited_lastmod, &mut queue, &mut seen_in_queue);
        }
    }

    out
}

/// `should_process` panics on malformed input (spec: "caller decides"); the
/// crawl loop's decision for an unparseable url is simply to drop it.
fn should_process_checked(url: &str) -> bool {
    if url::Url::parse(url).is_err() {
        return false;
    }
    urlutil::should_process(url)
}

enum PageErrorOutcome {
    NetworkError,
    Requeued,
}

/// Applies spec §4.7/§7 error policy: 429 retries (up to `WEBSITE_MAX_RETRIES_PER_URL`,
/// does not count as a network error), network errors set the flag, protocol
/// errors are logged (browser-session recreation is a no-op for the stateless
/// `ReqwestDriver` default but the branch is preserved for driver fidelity).
fn handle_page_error(e: &PageError, item: &mut QueueItem, queue: &mut VecDeque<QueueItem>) -> Option<PageErrorOutcome> {
    if e.status == Some(429) {
        if item.retries_left > 0 {
            item.retries_left -= 1;
            info!(url = %item.url, retries_left = item.retries_left, "crawl: 429, requeueing");
            queue.push_back(item.clone());
            return Some(PageErrorOutcome::Requeued);
        }
        warn!(url = %item.url, "crawl: 429 retry budget exhausted");
        return None;
    }
    if e.is_protocol_error {
        warn!(url = %item.url, error = %e.message, "crawl: protocol error, browser session needs recreation");
        return None;
    }
    if e.is_network_error {
        warn!(url = %item.url, error = %e.message, "crawl: network error");
        return Some(PageErrorOutcome::NetworkError);
    }
    warn!(url = %item.url, status = ?e.status, error = %e.message, "crawl: per-url failure");
    None
}

/// Chunks fetched Markdown content, reconciles it against the store, and
/// embeds only the chunks that survive layer 4 of the cascade (content-hash
/// equality). Returns whether the attempt succeeded, for watermark gating.
pub async fn process_markdown_page(
    url: &str,
    markdown: &str,
    chunk_cfg: &MarkdownChunkConfig,
    store: &dyn StoreBackend,
    embedder: &dyn EmbeddingClient,
) -> bool {
    let mut chunks = chunk_markdown(markdown, chunk_cfg, url);

    let stored_hashes = match store.get_hashes_by_url(url).await {
        Ok(h) => h,
        Err(e) => {
            warn!(url, error = %e, "process_page: failed to read stored hashes");
            return false;
        }
    };
    let new_hashes: Vec<String> = chunks.iter().map(|c| c.hash.clone()).collect();
    if evaluate_post_fetch(&new_hashes, &stored_hashes) == PostFetchDecision::SkipEmbedding {
        debug!(url, "process_page: content unchanged, skipping embedding");
        return true;
    }

    if !chunks.is_empty() {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = embedder.embed(&texts).await;
        if embeddings.is_empty() {
            warn!(url, "process_page: embedding batch failed permanently");
            return false;
        }
        for (chunk, embedding) in chunks.iter_mut().zip(embeddings) {
            chunk.embedding = embedding;
        }
    }

    match reconcile_url(store, url, &chunks).await {
        Ok(_) => true,
        Err(e) => {
            warn!(url, error = %e, "process_page: reconcile_url failed");
            false
        }
    }
}
