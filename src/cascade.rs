//! Four-layer change-detection cascade: decides, per url, whether a sync can
//! skip work entirely or must fetch (and, later, embed) the page.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of layers 1-3, before any network fetch of the page body happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreFetchDecision {
    Skip,
    Fetch,
}

/// Outcome of layer 4, once new content has been fetched and chunked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostFetchDecision {
    /// Stored and new hash multisets match; no store writes, no re-embedding.
    SkipEmbedding,
    /// Multisets differ; caller must delete the old set and insert the new one.
    FetchAndEmbed,
}

/// Result of a HEAD probe, as returned by a `HeadProber` implementation.
#[derive(Debug, Clone, Default)]
pub struct HeadResult {
    pub status: u16,
    pub etag: Option<String>,
    pub retry_after_ms: Option<u64>,
}

#[async_trait]
pub trait HeadProber: Send + Sync {
    async fn head(&self, url: &str) -> Result<HeadResult, String>;
}

/// Default `HeadProber`: a plain HTTP HEAD via `reqwest`.
pub struct ReqwestHeadProber {
    client: reqwest::Client,
}

impl Default for ReqwestHeadProber {
    fn default() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

#[async_trait]
impl HeadProber for ReqwestHeadProber {
    async fn head(&self, url: &str) -> Result<HeadResult, String> {
        let resp = self.client.head(url).send().await.map_err(|e| e.to_string())?;
        let status = resp.status().as_u16();
        let etag = resp
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let retry_after_ms = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(|s| parse_retry_after_ms(s, 1000));
        Ok(HeadResult { status, etag, retry_after_ms })
    }
}

/// Single per-crawl adaptive delay applied before each HEAD request.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveBackoff {
    delay_ms: u64,
}

impl Default for AdaptiveBackoff {
    fn default() -> Self {
        Self { delay_ms: 0 }
    }
}

impl AdaptiveBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_delay_ms(&self) -> u64 {
        self.delay_ms
    }

    /// Sleeps the current delay; call immediately before issuing a HEAD.
    pub async fn wait(&self) {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
    }

    pub fn on_200(&mut self) {
        self.delay_ms = (self.delay_ms / 2 / 50) * 50;
    }

    pub fn on_429(&mut self) {
        self.delay_ms = (self.delay_ms * 2).max(200).min(5000);
    }
}

/// Parses `Retry-After` either as a numeric seconds value or an HTTP-date.
/// Clamps zero/past values to the 1000ms minimum mandated for website 429s.
pub fn parse_retry_after_ms(header: &str, min_ms: u64) -> u64 {
    if let Ok(seconds) = header.trim().parse::<u64>() {
        return (seconds * 1000).max(min_ms);
    }
    match chrono::DateTime::parse_from_rfc2822(header.trim()) {
        Ok(when) => {
            let now = chrono::Utc::now();
            let delta = when.with_timezone(&chrono::Utc) - now;
            let ms = delta.num_milliseconds();
            if ms <= 0 {
                min_ms
            } else {
                (ms as u64).max(min_ms)
            }
        }
        Err(_) => min_ms,
    }
}

pub struct CascadeInputs<'a> {
    pub url: &'a str,
    /// `None` means "source not previously marked complete" — forces processing.
    pub source_sync_complete: bool,
    /// `None` means no markdown mirror configured for this source.
    pub markdown_mirror_configured: bool,
    pub markdown_mirror_has_url: bool,
    pub force_full_sync: bool,
    pub sitemap_lastmod: Option<&'a str>,
    pub stored_lastmod: Option<&'a str>,
    pub stored_etag: Option<&'a str>,
}

/// Evaluates layers 1-3 and, when required, performs the HEAD probe for
/// layer 3 (including the single 429 retry).
pub async fn evaluate_pre_fetch(
    inputs: &CascadeInputs<'_>,
    backoff: &mut AdaptiveBackoff,
    prober: &dyn HeadProber,
) -> PreFetchDecision {
    let force_processed = inputs.force_full_sync
        || !inputs.source_sync_complete
        || (inputs.markdown_mirror_configured && !inputs.markdown_mirror_has_url);

    if force_processed {
        debug!(url = inputs.url, "cascade: force-processed, skipping layers 2-3");
        return PreFetchDecision::Fetch;
    }

    if let Some(sitemap_lastmod) = inputs.sitemap_lastmod {
        let resolves = inputs.stored_lastmod == Some(sitemap_lastmod);
        debug!(url = inputs.url, sitemap_lastmod, "cascade: layer 2 resolved");
        return if resolves {
            PreFetchDecision::Skip
        } else {
            PreFetchDecision::Fetch
        };
    }

    evaluate_etag_layer(inputs, backoff, prober).await
}

async fn evaluate_etag_layer(
    inputs: &CascadeInputs<'_>,
    backoff: &mut AdaptiveBackoff,
    prober: &dyn HeadProber,
) -> PreFetchDecision {
    backoff.wait().await;
    let first = prober.head(inputs.url).await;

    let result = match first {
        Ok(r) if r.status == 429 => {
            backoff.on_429();
            let retry_ms = r
                .retry_after_ms
                .map(|ms| ms.max(1000))
                .unwrap_or(1000);
            tokio::time::sleep(Duration::from_millis(retry_ms)).await;
            match prober.head(inputs.url).await {
                Ok(second) => second,
                Err(e) => {
                    warn!(url = inputs.url, error = %e, "cascade: HEAD retry failed, falling through");
                    return PreFetchDecision::Fetch;
                }
            }
        }
        Ok(r) => {
            backoff.on_200();
            r
        }
        Err(e) => {
            warn!(url = inputs.url, error = %e, "cascade: HEAD failed, falling through to full processing");
            return PreFetchDecision::Fetch;
        }
    };

    if result.status == 429 {
        // Still 429 after one retry; fall through to full processing.
        return PreFetchDecision::Fetch;
    }

    match (&result.etag, inputs.stored_etag) {
        (Some(fresh), Some(stored)) if fresh == stored => PreFetchDecision::Skip,
        _ => PreFetchDecision::Fetch,
    }
}

/// Layer 4: compares sorted new vs stored content-hash multisets.
pub fn evaluate_post_fetch(new_hashes: &[String], stored_hashes: &[String]) -> PostFetchDecision {
    let mut new_sorted = new_hashes.to_vec();
    let mut stored_sorted = stored_hashes.to_vec();
    new_sorted.sort();
    stored_sorted.sort();

    if new_sorted == stored_sorted {
        PostFetchDecision::SkipEmbedding
    } else {
        PostFetchDecision::FetchAndEmbed
    }
}
