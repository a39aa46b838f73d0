use async_trait::async_trait;
use ragsync::browser::{BrowserDriver, PageError, PageResult};
use ragsync::cascade::{HeadProber, HeadResult};
use ragsync::chunker::MarkdownChunkConfig;
use ragsync::config::{LocalDirectorySourceConfig, RootConfig, SourceConfig};
use ragsync::embed::NullEmbedder;
use ragsync::engine::{crawl_website, process_markdown_page, CrawlOptions, CrawlState};
use ragsync::mirror::MarkdownMirror;
use ragsync::sitemap::SitemapMap;
use ragsync::sources::run_sync;
use ragsync::store::embedded::EmbeddedStore;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

struct FixedHeadProber {
    status: u16,
    etag: Option<String>,
}

#[async_trait]
impl HeadProber for FixedHeadProber {
    async fn head(&self, _url: &str) -> Result<HeadResult, String> {
        Ok(HeadResult { status: self.status, etag: self.etag.clone(), retry_after_ms: None })
    }
}

struct ScriptedBrowser {
    pages: Mutex<HashMap<String, PageResult>>,
    failures_remaining: Mutex<HashMap<String, u32>>,
}

impl ScriptedBrowser {
    fn new(pages: HashMap<String, PageResult>) -> Self {
        Self { pages: Mutex::new(pages), failures_remaining: Mutex::new(HashMap::new()) }
    }

    fn fail_next(&self, url: &str, times: u32) {
        self.failures_remaining.lock().unwrap().insert(url.to_string(), times);
    }
}

#[async_trait]
impl BrowserDriver for ScriptedBrowser {
    async fn process_page(&self, url: &str, _max_size_bytes: u64) -> Result<PageResult, PageError> {
        let mut remaining = self.failures_remaining.lock().unwrap();
        if let Some(n) = remaining.get_mut(url) {
            if *n > 0 {
                *n -= 1;
                return Err(PageError {
                    status: Some(503),
                    retry_after_ms: None,
                    message: "temporarily unavailable".into(),
                    is_network_error: true,
                    is_protocol_error: false,
                });
            }
        }
        self.pages.lock().unwrap().get(url).cloned().ok_or_else(|| PageError {
            status: Some(404),
            retry_after_ms: None,
            message: "no such page".into(),
            is_network_error: false,
            is_protocol_error: false,
        })
    }
}

fn page(content: &str, links: Vec<&str>, final_url: &str) -> PageResult {
    PageResult { content: Some(content.to_string()), links: links.into_iter().map(|s| s.to_string()).collect(), final_url: final_url.to_string(), etag: None }
}

fn local_cfg(path: &str) -> SourceConfig {
    SourceConfig::LocalDirectory(LocalDirectorySourceConfig {
        product_name: "handbook".into(),
        version: "1.0".into(),
        path: path.to_string(),
        recursive: false,
        include_extensions: vec![],
        exclude_extensions: vec![],
        max_size: 1024 * 1024,
        allowed_files: None,
        mtime_cutoff: None,
        database_config: None,
    })
}

/// First sync embeds every file; an untouched second sync against the same
/// tree re-embeds nothing and prunes nothing.
#[tokio::test]
async fn local_directory_first_and_second_sync_are_stable() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("intro.md"), "# Intro\n\nwords enough here to become a real standalone chunk for the first run, yes indeed").unwrap();

    let config = RootConfig { sources: vec![local_cfg(&dir.path().to_string_lossy())] };
    let store = EmbeddedStore::new(tempfile::tempdir().unwrap().path());
    let embedder = NullEmbedder { dim: 4 };

    let first = run_sync(&config, &store, &embedder, false, None).await;
    assert_eq!(first[0].urls_embedded, 1);
    let hashes_after_first = store.get_hashes_by_url("intro.md").await.unwrap();

    let second = run_sync(&config, &store, &embedder, false, None).await;
    assert_eq!(second[0].urls_embedded, 0);
    let hashes_after_second = store.get_hashes_by_url("intro.md").await.unwrap();
    assert_eq!(hashes_after_first, hashes_after_second);
}

/// A multi-run website crawl: the first run fetches and stores a page, a
/// second run with an unchanged sitemap lastmod skips it entirely, a third
/// run with a bumped lastmod re-fetches and re-embeds it, and a fourth run
/// with matching watermarks again settles into a steady state.
#[tokio::test]
async fn website_multi_sync_tracks_sitemap_lastmod_across_runs() {
    let store = EmbeddedStore::new(tempfile::tempdir().unwrap().path());
    let embedder = NullEmbedder { dim: 4 };
    let chunk_cfg = MarkdownChunkConfig { product_name: "docs".into(), version: "1.0".into(), ..Default::default() };
    let prober = FixedHeadProber { status: 200, etag: None };

    let run = |sitemap_lastmod: &'static str,
               content: &'static str,
               visited: &mut HashSet<String>,
               etag_store: &mut HashMap<String, String>,
               lastmod_store: &mut HashMap<String, String>,
               known_urls: HashSet<String>| {
        let store = &store;
        let embedder = &embedder;
        let chunk_cfg = chunk_cfg.clone();
        let prober = &prober;
        async move {
            let mut pages = HashMap::new();
            pages.insert("https://docs.example.com/".to_string(), page(content, vec![], "https://docs.example.com/"));
            let browser = ScriptedBrowser::new(pages);

            let mut sitemap = SitemapMap::new();
            sitemap.insert("https://docs.example.com/".to_string(), Some(sitemap_lastmod.to_string()));

            let mut state = CrawlState { visited, etag_store, lastmod_store };
            let opts = CrawlOptions {
                base_url: "https://docs.example.com/",
                known_urls,
                sitemap,
                force_full_sync: false,
                source_sync_complete: true,
                markdown_mirror: None,
                max_size_bytes: 20 * 1024 * 1024,
            };
            crawl_website(opts, &mut state, &browser, prober, |url, content| {
                let store = &store;
                let embedder = &embedder;
                let chunk_cfg = chunk_cfg.clone();
                async move { process_markdown_page(&url, &content, &chunk_cfg, store, embedder).await }
            })
            .await
        }
    };

    let mut visited = HashSet::new();
    let mut etag_store = HashMap::new();
    let mut lastmod_store = HashMap::new();

    // Run 1: nothing known yet, page is fetched and stored.
    run("2024-01-01", "# Home\n\nrun one body text long enough to clear the merge threshold for a real chunk, yes indeed plenty", &mut visited, &mut etag_store, &mut lastmod_store, HashSet::new()).await;
    let hashes_1 = store.get_hashes_by_url("https://docs.example.com/").await.unwrap();
    assert!(!hashes_1.is_empty());

    // Run 2: sitemap lastmod unchanged, known_urls now includes the page -> skipped.
    visited.clear();
    let mut known = HashSet::new();
    known.insert("https://docs.example.com/".to_string());
    run("2024-01-01", "# Home\n\nthis body would be different if fetched but the cascade should skip the fetch entirely here", &mut visited, &mut etag_store, &mut lastmod_store, known.clone()).await;
    let hashes_2 = store.get_hashes_by_url("https://docs.example.com/").await.unwrap();
    assert_eq!(hashes_1, hashes_2);

    // Run 3: sitemap lastmod bumped -> re-fetch, content changed -> re-embed.
    visited.clear();
    run("2024-02-01", "# Home\n\nrun three body text is completely different from run one so the hash must change here, yes", &mut visited, &mut etag_store, &mut lastmod_store, known.clone()).await;
    let hashes_3 = store.get_hashes_by_url("https://docs.example.com/").await.unwrap();
    assert_ne!(hashes_1, hashes_3);

    // Run 4: watermarks now match again -> settles, no further change.
    visited.clear();
    run("2024-02-01", "# Home\n\nirrelevant since the lastmod watermark should cause this run to skip the fetch once more", &mut visited, &mut etag_store, &mut lastmod_store, known).await;
    let hashes_4 = store.get_hashes_by_url("https://docs.example.com/").await.unwrap();
    assert_eq!(hashes_3, hashes_4);
}

/// A page that fails transiently is retried within the same crawl and still
/// ends up fetched, stored and visited once the browser recovers.
#[tokio::test]
async fn processing_failure_is_retried_and_eventually_succeeds() {
    let mut pages = HashMap::new();
    pages.insert(
        "https://docs.example.com/flaky".to_string(),
        page("# Flaky\n\nbody text long enough to be a real chunk once the transient failures stop happening here, yes", vec![], "https://docs.example.com/flaky"),
    );
    let browser = ScriptedBrowser::new(pages);
    browser.fail_next("https://docs.example.com/flaky", 2);

    let prober = FixedHeadProber { status: 200, etag: None };
    let store = EmbeddedStore::new(tempfile::tempdir().unwrap().path());
    let embedder = NullEmbedder { dim: 4 };
    let chunk_cfg = MarkdownChunkConfig { product_name: "docs".into(), version: "1.0".into(), ..Default::default() };

    let mut visited = HashSet::new();
    let mut etag_store = HashMap::new();
    let mut lastmod_store = HashMap::new();
    let mut state = CrawlState { visited: &mut visited, etag_store: &mut etag_store, lastmod_store: &mut lastmod_store };

    let mut known_urls = HashSet::new();
    known_urls.insert("https://docs.example.com/flaky".to_string());

    let opts = CrawlOptions {
        base_url: "https://docs.example.com/flaky",
        known_urls,
        sitemap: SitemapMap::new(),
        force_full_sync: false,
        source_sync_complete: false,
        markdown_mirror: None,
        max_size_bytes: 20 * 1024 * 1024,
    };

    let outputs = crawl_website(opts, &mut state, &browser, &prober, |url, content| {
        let store = &store;
        let embedder = &embedder;
        let chunk_cfg = chunk_cfg.clone();
        async move { process_markdown_page(&url, &content, &chunk_cfg, store, embedder).await }
    })
    .await;

    assert!(!outputs.has_network_errors);
    assert!(visited.contains("https://docs.example.com/flaky"));
    assert!(!store.get_hashes_by_url("https://docs.example.com/flaky").await.unwrap().is_empty());
}

/// A repeated run with matching etag watermarks normally skips the page, but
/// `force_full_sync` bypasses that and forces a re-fetch and re-embed.
#[tokio::test]
async fn force_full_sync_bypasses_matching_watermarks_on_a_second_run() {
    let mut pages = HashMap::new();
    pages.insert(
        "https://docs.example.com/".to_string(),
        page("# Home\n\nforced re-fetch body text long enough to clear the merge threshold for a standalone chunk, yes", vec![], "https://docs.example.com/"),
    );
    let browser = ScriptedBrowser::new(pages);
    let prober = FixedHeadProber { status: 200, etag: Some("same-etag".to_string()) };
    let store = EmbeddedStore::new(tempfile::tempdir().unwrap().path());
    let embedder = NullEmbedder { dim: 4 };
    let chunk_cfg = MarkdownChunkConfig { product_name: "docs".into(), version: "1.0".into(), ..Default::default() };

    let mut visited = HashSet::new();
    let mut etag_store = HashMap::new();
    etag_store.insert("https://docs.example.com/".to_string(), "same-etag".to_string());
    let mut lastmod_store = HashMap::new();

    let mut known_urls = HashSet::new();
    known_urls.insert("https://docs.example.com/".to_string());

    {
        let mut state = CrawlState { visited: &mut visited, etag_store: &mut etag_store, lastmod_store: &mut lastmod_store };
        let opts = CrawlOptions {
            base_url: "https://docs.example.com/",
            known_urls: known_urls.clone(),
            sitemap: SitemapMap::new(),
            force_full_sync: false,
            source_sync_complete: true,
            markdown_mirror: None,
            max_size_bytes: 20 * 1024 * 1024,
        };
        crawl_website(opts, &mut state, &browser, &prober, |url, content| {
            let store = &store;
            let embedder = &embedder;
            let chunk_cfg = chunk_cfg.clone();
            async move { process_markdown_page(&url, &content, &chunk_cfg, store, embedder).await }
        })
        .await;
    }
    // matching etag, not forced -> never fetched, store stays empty.
    assert!(store.get_hashes_by_url("https://docs.example.com/").await.unwrap().is_empty());

    visited.clear();
    let mut state = CrawlState { visited: &mut visited, etag_store: &mut etag_store, lastmod_store: &mut lastmod_store };
    let opts = CrawlOptions {
        base_url: "https://docs.example.com/",
        known_urls,
        sitemap: SitemapMap::new(),
        force_full_sync: true,
        source_sync_complete: true,
        markdown_mirror: None,
        max_size_bytes: 20 * 1024 * 1024,
    };
    crawl_website(opts, &mut state, &browser, &prober, |url, content| {
        let store = &store;
        let embedder = &embedder;
        let chunk_cfg = chunk_cfg.clone();
        async move { process_markdown_page(&url, &content, &chunk_cfg, store, embedder).await }
    })
    .await;

    assert!(!store.get_hashes_by_url("https://docs.example.com/").await.unwrap().is_empty());
}

/// A url whose markdown mirror file exists but whose head probe now returns
/// 404 is reported as not-found and its mirror file is expected to be
/// cleaned up by the caller (sources::run_website_source), not by the crawl
/// loop itself, which only surfaces the url.
#[tokio::test]
async fn markdown_mirror_404_is_surfaced_for_cleanup() {
    let browser = ScriptedBrowser::new(HashMap::new());
    let prober = FixedHeadProber { status: 404, etag: None };
    let store = EmbeddedStore::new(tempfile::tempdir().unwrap().path());
    let embedder = NullEmbedder { dim: 4 };
    let chunk_cfg = MarkdownChunkConfig::default();
    let mirror_dir = tempfile::tempdir().unwrap();
    let mirror = MarkdownMirror::new(mirror_dir.path());
    mirror.write("https://docs.example.com/removed", "stale mirrored body").unwrap();
    assert!(mirror.has_url("https://docs.example.com/removed"));

    let mut known_urls = HashSet::new();
    known_urls.insert("https://docs.example.com/removed".to_string());

    let mut visited = HashSet::new();
    let mut etag_store = HashMap::new();
    let mut lastmod_store = HashMap::new();
    let mut state = CrawlState { visited: &mut visited, etag_store: &mut etag_store, lastmod_store: &mut lastmod_store };

    let opts = CrawlOptions {
        base_url: "https://docs.example.com/removed",
        known_urls,
        sitemap: SitemapMap::new(),
        force_full_sync: false,
        source_sync_complete: false,
        markdown_mirror: Some(&mirror),
        max_size_bytes: 20 * 1024 * 1024,
    };

    let outputs = crawl_website(opts, &mut state, &browser, &prober, |url, content| {
        let store = &store;
        let embedder = &embedder;
        let chunk_cfg = chunk_cfg.clone();
        async move { process_markdown_page(&url, &content, &chunk_cfg, store, embedder).await }
    })
    .await;

    assert!(outputs.not_found_urls.contains("https://docs.example.com/removed"));
    mirror.remove("https://docs.example.com/removed").unwrap();
    assert!(!mirror.has_url("https://docs.example.com/removed"));
}
