//! Source drivers (spec §4.8): thin orchestrators that each reduce to
//! enumerate items -> produce content -> chunk -> reconcile. `run_sync`
//! iterates a loaded `RootConfig`'s sources in declaration order and
//! aggregates a `SyncReport` per source (SPEC_FULL §2 "sync runner").

use crate::browser::BrowserDriver;
use crate::cascade::{evaluate_post_fetch, parse_retry_after_ms, PostFetchDecision, ReqwestHeadProber};
use crate::chunker::code::{chunk_code, CodeChunkConfig};
use crate::chunker::markdown::{chunk_markdown, MarkdownChunkConfig};
use crate::config::{
    CodeSourceConfig, LocalDirectorySourceConfig, RootConfig, SourceConfig, TicketStreamSourceConfig,
    WebsiteSourceConfig, TICKET_MAX_ATTEMPTS,
};
use crate::embed::EmbeddingClient;
use crate::engine::{crawl_website, process_markdown_page, CrawlOptions, CrawlState};
use crate::mirror::MarkdownMirror;
use crate::model::SyncReport;
use crate::sitemap::{load_sitemap, ReqwestSitemapFetcher};
use crate::store::{
    normalize_metadata_segment, reconcile_url, StoreBackend, CODE_SHA_PREFIX, ETAG_PREFIX, LASTMOD_PREFIX,
    LAST_RUN_DATE_PREFIX, SYNC_COMPLETE_PREFIX, ZENDESK_CURSOR_PREFIX,
};
use crate::urlutil;
use async_trait::async_trait;
use ignore::WalkBuilder;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

/// Runs every configured source in declaration order; a source's own
/// failures never abort the rest of the run (spec §5 "sequentially").
pub async fn run_sync(
    config: &RootConfig,
    store: &dyn StoreBackend,
    embedder: &dyn EmbeddingClient,
    force_full_sync: bool,
    markdown_mirror_root: Option<&Path>,
) -> Vec<SyncReport> {
    let mut reports = Vec::new();
    for source in &config.sources {
        let report = match source {
            SourceConfig::Website(c) => run_website_source(c, store, embedder, force_full_sync, markdown_mirror_root).await,
            SourceConfig::LocalDirectory(c) => run_local_directory_source(c, store, embedder).await,
            SourceConfig::Code(c) => run_code_source(c, store, embedder).await,
            SourceConfig::TicketStream(c) => run_ticket_stream_source(c, store, embedder).await,
        };
        info!(
            source = report.source_name,
            processed = report.urls_processed,
            embedded = report.urls_embedded,
            failed = report.has_failures,
            "run_sync: source complete"
        );
        reports.push(report);
    }
    reports
}

// ---------------------------------------------------------------------
// Website source
// ---------------------------------------------------------------------

async fn run_website_source(
    cfg: &WebsiteSourceConfig,
    store: &dyn StoreBackend,
    embedder: &dyn EmbeddingClient,
    force_full_sync: bool,
    markdown_mirror_root: Option<&Path>,
) -> SyncReport {
    let prefix = urlutil::prefix(&cfg.url);
    let sync_complete_key = format!("{}{}", SYNC_COMPLETE_PREFIX, prefix);
    let source_sync_complete = store
        .get_metadata(&sync_complete_key)
        .await
        .ok()
        .flatten()
        .is_some();

    let sitemap = match &cfg.sitemap_url {
        Some(url) => load_sitemap(url, &ReqwestSitemapFetcher::default()).await,
        None => Default::default(),
    };

    let known_urls = store.get_urls_by_prefix(&prefix).await.unwrap_or_default();

    let mut etag_store = HashMap::new();
    let mut lastmod_store = HashMap::new();
    for url in known_urls.iter() {
        if let Ok(Some(v)) = store.get_metadata(&format!("{}{}", ETAG_PREFIX, url)).await {
            etag_store.insert(url.clone(), v);
        }
        if let Ok(Some(v)) = store.get_metadata(&format!("{}{}", LASTMOD_PREFIX, url)).await {
            lastmod_store.insert(url.clone(), v);
        }
    }
    let mut visited: HashSet<String> = HashSet::new();

    let mirror = markdown_mirror_root.map(MarkdownMirror::new);
    let chunk_cfg = MarkdownChunkConfig {
        product_name: cfg.product_name.clone(),
        version: cfg.version.clone(),
        branch: None,
        repo: None,
        ..Default::default()
    };

    let browser = crate::browser::ReqwestDriver::default();
    let prober = ReqwestHeadProber::default();

    let mut embedded_count = 0usize;
    let opts = CrawlOptions {
        base_url: &cfg.url,
        known_urls,
        sitemap,
        force_full_sync,
        source_sync_complete,
        markdown_mirror: mirror.as_ref(),
        max_size_bytes: cfg.max_size,
    };
    let mut state = CrawlState {
        visited: &mut visited,
        etag_store: &mut etag_store,
        lastmod_store: &mut lastmod_store,
    };

    let outputs = crawl_website(opts, &mut state, &browser, &prober, |url, content| {
        let store = store;
        let embedder = embedder;
        let chunk_cfg = chunk_cfg.clone();
        let mirror = mirror.as_ref();
        async move {
            // The browser driver hands back rendered HTML (spec §1: HTML->Markdown
            // conversion is an external collaborator); PDFs pass through untouched
            // since their text extraction is likewise out of scope.
            let markdown = if urlutil::is_pdf(&url) {
                content
            } else {
                crate::browser::html_to_markdown(&content)
            };
            if let Some(m) = mirror {
                let _ = m.write(&url, &markdown);
            }
            process_markdown_page(&url, &markdown, &chunk_cfg, store, embedder).await
        }
    })
    .await;

    for url in visited.iter() {
        if let Some(etag) = etag_store.get(url) {
            let _ = store.set_metadata(&format!("{}{}", ETAG_PREFIX, url), etag, 0).await;
        }
        if let Some(lastmod) = lastmod_store.get(url) {
            let _ = store.set_metadata(&format!("{}{}", LASTMOD_PREFIX, url), lastmod, 0).await;
        }
        embedded_count += 1;
    }

    if !outputs.has_network_errors {
        if let Ok(removed) = store.remove_obsolete_urls(&prefix, &visited).await {
            if removed > 0 {
                info!(prefix, removed, "website source: pruned obsolete urls");
            }
        }
        if let Some(m) = &mirror {
            for not_found in &outputs.not_found_urls {
                let _ = m.remove(not_found);
            }
        }
        let _ = store.set_metadata(&sync_complete_key, "true", 0).await;
    } else {
        warn!(product = cfg.product_name, "website source: network errors observed, watermark not advanced");
    }

    SyncReport {
        source_name: cfg.product_name.clone(),
        urls_processed: visited.len(),
        urls_embedded: embedded_count,
        has_failures: outputs.has_network_errors,
    }
}

// ---------------------------------------------------------------------
// Local directory / code-tree sources
// ---------------------------------------------------------------------

const DEFAULT_CODE_EXTENSIONS: &[&str] = &[
    "rs", "py", "ts", "tsx", "js", "jsx", "go", "java", "php", "html", "htm", "css", "md",
];

fn language_for_extension(ext: &str) -> &'static str {
    match ext {
        "py" => "python",
        "rs" => "rust",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" => "javascript",
        "go" => "go",
        "html" | "htm" => "html",
        "css" => "css",
        "java" => "java",
        "php" => "php",
        "md" | "markdown" => "markdown",
        other => other,
    }
}

fn extension_of(path: &Path) -> String {
    path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase()
}

/// `allowed_files`/`mtime_cutoff` implement incremental git-diff mode (spec
/// §4.8): when set, they narrow the walk to paths a prior `git diff` named
/// and/or files touched since the last sync, instead of the full tree.
fn walk_files(
    root: &str,
    recursive: bool,
    include: &[String],
    exclude: &[String],
    max_size: u64,
    allowed_files: Option<&[String]>,
    mtime_cutoff: Option<chrono::DateTime<chrono::Utc>>,
) -> Vec<(std::path::PathBuf, String)> {
    let mut out = Vec::new();
    let mut builder = WalkBuilder::new(root);
    builder.hidden(true).git_ignore(true);
    if !recursive {
        builder.max_depth(Some(1));
    }

    for entry in builder.build().flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Ok(meta) = std::fs::metadata(path) else { continue };
        if meta.len() > max_size {
            continue;
        }
        let ext = extension_of(path);
        if !exclude.is_empty() && exclude.iter().any(|e| e.trim_start_matches('.') == ext) {
            continue;
        }
        if !include.is_empty() && !include.iter().any(|e| e.trim_start_matches('.') == ext) {
            continue;
        }
        if let Some(allowed) = allowed_files {
            let rel = relative_url(root, path);
            if !allowed.iter().any(|a| a == &rel) {
                continue;
            }
        }
        if let Some(cutoff) = mtime_cutoff {
            let modified = meta.modified().ok().map(chrono::DateTime::<chrono::Utc>::from);
            if modified.map(|m| m <= cutoff).unwrap_or(false) {
                continue;
            }
        }
        out.push((path.to_path_buf(), ext));
    }
    out
}

fn relative_url(base: &str, path: &Path) -> String {
    let rel = path.strip_prefix(base).unwrap_or(path);
    rel.to_string_lossy().replace('\\', "/")
}

async fn run_local_directory_source(cfg: &LocalDirectorySourceConfig, store: &dyn StoreBackend, embedder: &dyn EmbeddingClient) -> SyncReport {
    let files = walk_files(
        &cfg.path,
        cfg.recursive,
        &cfg.include_extensions,
        &cfg.exclude_extensions,
        cfg.max_size,
        cfg.allowed_files.as_deref(),
        cfg.mtime_cutoff,
    );
    let mut seen = HashSet::new();
    let mut embedded = 0usize;
    let mut failures = false;

    let chunk_cfg = MarkdownChunkConfig {
        product_name: cfg.product_name.clone(),
        version: cfg.version.clone(),
        ..Default::default()
    };

    for (path, _ext) in &files {
        let url = relative_url(&cfg.path, path);
        seen.insert(url.clone());

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "local directory source: unreadable file, skipping");
                failures = true;
                continue;
            }
        };

        let ok = process_markdown_page(&url, &content, &chunk_cfg, store, embedder).await;
        if ok {
            embedded += 1;
        } else {
            failures = true;
        }
    }

    // A restricted `allowed_files` walk only ever sees part of the tree, so
    // obsolete-file pruning against that partial `seen` set would wrongly
    // delete everything outside the diff; only prune on a full walk.
    if cfg.allowed_files.is_none() {
        if let Ok(removed) = store.remove_obsolete_files(&cfg.path, &seen, None).await {
            if removed > 0 {
                info!(path = cfg.path, removed, "local directory source: pruned obsolete files");
            }
        }
    }

    SyncReport {
        source_name: cfg.product_name.clone(),
        urls_processed: seen.len(),
        urls_embedded: embedded,
        has_failures: failures,
    }
}

async fn run_code_source(cfg: &CodeSourceConfig, store: &dyn StoreBackend, embedder: &dyn EmbeddingClient) -> SyncReport {
    let include = if cfg.include_extensions.is_empty() {
        DEFAULT_CODE_EXTENSIONS.iter().map(|s| s.to_string()).collect()
    } else {
        cfg.include_extensions.clone()
    };
    let files = walk_files(
        &cfg.path,
        cfg.recursive,
        &include,
        &cfg.exclude_extensions,
        cfg.max_size,
        cfg.allowed_files.as_deref(),
        cfg.mtime_cutoff,
    );

    let branch = cfg.branch.clone().unwrap_or_else(|| "local".to_string());
    let version = cfg.version.clone().unwrap_or_else(|| branch.clone());
    let code_cfg = CodeChunkConfig {
        product_name: cfg.product_name.clone(),
        version,
        branch: Some(branch.clone()),
        repo: Some(cfg.repo_url_prefix.clone()),
        ..Default::default()
    };

    let mut seen = HashSet::new();
    let mut embedded = 0usize;
    let mut failures = false;

    for (path, ext) in &files {
        let url = relative_url(&cfg.path, path);
        seen.insert(url.clone());

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "code source: unreadable file, skipping");
                failures = true;
                continue;
            }
        };

        let language = language_for_extension(ext);
        let mut chunks = chunk_code(&content, language, &url, &code_cfg);

        let stored_hashes = store.get_hashes_by_url(&url).await.unwrap_or_default();
        let new_hashes: Vec<String> = chunks.iter().map(|c| c.hash.clone()).collect();
        if evaluate_post_fetch(&new_hashes, &stored_hashes) == PostFetchDecision::SkipEmbedding {
            continue;
        }

        if !chunks.is_empty() {
            let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
            let embeddings = embedder.embed(&texts).await;
            if embeddings.is_empty() {
                failures = true;
                continue;
            }
            for (c, e) in chunks.iter_mut().zip(embeddings) {
                c.embedding = e;
            }
        }
        match reconcile_url(store, &url, &chunks).await {
            Ok(_) => embedded += 1,
            Err(_) => failures = true,
        }
    }

    if cfg.allowed_files.is_none() {
        if let Ok(removed) = store.remove_obsolete_files(&cfg.path, &seen, None).await {
            if removed > 0 {
                info!(path = cfg.path, removed, "code source: pruned obsolete files");
            }
        }
    }

    let repo_key = normalize_metadata_segment(&cfg.repo_url_prefix);
    let branch_key = normalize_metadata_segment(&branch);
    if !failures {
        let _ = store
            .set_metadata(&format!("{}{}:{}", CODE_SHA_PREFIX, repo_key, branch_key), "synced", 0)
            .await;
        let _ = store
            .set_metadata(&format!("{}{}", LAST_RUN_DATE_PREFIX, repo_key), "synced", 0)
            .await;
    }

    SyncReport {
        source_name: cfg.product_name.clone(),
        urls_processed: seen.len(),
        urls_embedded: embedded,
        has_failures: failures,
    }
}

// ---------------------------------------------------------------------
// Ticket-stream source
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Ticket {
    pub id: String,
    pub subject: String,
    pub body: String,
    pub status: String,
}

#[derive(Debug, Clone, Default)]
pub struct TicketPage {
    pub tickets: Vec<Ticket>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TicketFetchError {
    pub status: Option<u16>,
    pub retry_after_ms: Option<u64>,
    pub message: String,
}

#[async_trait]
pub trait TicketClient: Send + Sync {
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<TicketPage, TicketFetchError>;
}

/// Default ticket client: a thin `reqwest` GET against `cfg.url`, paginated
/// via a `cursor` query parameter. Out of scope for a real ticket-system
/// integration (the oracle per spec §1); suitable for tests and simple APIs
/// that already speak this shape.
pub struct ReqwestTicketClient {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTicketClient {
    pub fn new(base_url: String) -> Self {
        Self { client: reqwest::Client::new(), base_url }
    }
}

#[derive(serde::Deserialize)]
struct RawTicketPage {
    #[serde(default)]
    tickets: Vec<RawTicket>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(serde::Deserialize)]
struct RawTicket {
    id: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    body: String,
    #[serde(default = "default_status")]
    status: String,
}

fn default_status() -> String {
    "open".to_string()
}

#[async_trait]
impl TicketClient for ReqwestTicketClient {
    async fn fetch_page(&self, cursor: Option<&str>) -> Result<TicketPage, TicketFetchError> {
        let mut req = self.client.get(&self.base_url);
        if let Some(c) = cursor {
            req = req.query(&[("cursor", c)]);
        }
        let resp = req.send().await.map_err(|e| TicketFetchError {
            status: e.status().map(|s| s.as_u16()),
            retry_after_ms: None,
            message: e.to_string(),
        })?;

        if resp.status().as_u16() == 429 {
            let retry_after_ms = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(|s| parse_retry_after_ms(s, 1000));
            return Err(TicketFetchError { status: Some(429), retry_after_ms, message: "rate limited".into() });
        }
        if !resp.status().is_success() {
            return Err(TicketFetchError { status: Some(resp.status().as_u16()), retry_after_ms: None, message: resp.status().to_string() });
        }

        let raw: RawTicketPage = resp.json().await.map_err(|e| TicketFetchError {
            status: None,
            retry_after_ms: None,
            message: e.to_string(),
        })?;
        Ok(TicketPage {
            tickets: raw
                .tickets
                .into_iter()
                .map(|t| Ticket { id: t.id, subject: t.subject, body: t.body, status: t.status })
                .collect(),
            next_cursor: raw.next_cursor,
        })
    }
}

async fn run_ticket_stream_source(cfg: &TicketStreamSourceConfig, store: &dyn StoreBackend, embedder: &dyn EmbeddingClient) -> SyncReport {
    let client = ReqwestTicketClient::new(cfg.url.clone());
    run_ticket_stream_source_with_client(cfg, store, embedder, &client).await
}

/// Split out from `run_ticket_stream_source` so tests can inject a fake
/// `TicketClient` instead of hitting the network.
pub async fn run_ticket_stream_source_with_client(
    cfg: &TicketStreamSourceConfig,
    store: &dyn StoreBackend,
    embedder: &dyn EmbeddingClient,
    client: &dyn TicketClient,
) -> SyncReport {
    let cursor_key = format!("{}{}", ZENDESK_CURSOR_PREFIX, normalize_metadata_segment(&cfg.product_name));
    let mut cursor = store.get_metadata(&cursor_key).await.ok().flatten();

    let chunk_cfg = MarkdownChunkConfig {
        product_name: cfg.product_name.clone(),
        version: cfg.version.clone(),
        ..Default::default()
    };

    let mut processed = 0usize;
    let mut embedded = 0usize;
    let mut failures = false;

    loop {
        let mut attempts_left = TICKET_MAX_ATTEMPTS;
        let page = loop {
            match client.fetch_page(cursor.as_deref()).await {
                Ok(page) => break Some(page),
                Err(e) if e.status == Some(429) => {
                    let wait_ms = e.retry_after_ms.unwrap_or(1000).max(1000);
                    tokio::time::sleep(std::time::Duration::from_millis(wait_ms)).await;
                    continue;
                }
                Err(e) => {
                    attempts_left -= 1;
                    warn!(error = %e.message, attempts_left, "ticket stream source: fetch failed");
                    if attempts_left == 0 {
                        break None;
                    }
                }
            }
        };

        let Some(page) = page else {
            failures = true;
            break;
        };

        for ticket in &page.tickets {
            processed += 1;
            let url = format!("ticket:{}", ticket.id);

            if ticket.status == "deleted" {
                if store.remove_by_url(&url).await.is_err() {
                    failures = true;
                }
                continue;
            }

            let content = format!("# {}\n\n{}", ticket.subject, ticket.body);
            if process_markdown_page(&url, &content, &chunk_cfg, store, embedder).await {
                embedded += 1;
            } else {
                failures = true;
            }
        }

        cursor = page.next_cursor.clone();
        if let Some(c) = &cursor {
            let _ = store.set_metadata(&cursor_key, c, 0).await;
        }
        if cursor.is_none() {
            break;
        }
    }

    SyncReport {
        source_name: cfg.product_name.clone(),
        urls_processed: processed,
        urls_embedded: embedded,
        has_failures: failures,
    }
}
