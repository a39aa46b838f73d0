//! Page-fetch driver contract. The crawl loop depends only on this trait;
//! a real implementation would drive a headless browser for JS-rendered
//! sites, but the default here is a plain HTTP GET, suitable for static
//! documentation sites and for tests.

use async_trait::async_trait;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct PageError {
    pub status: Option<u16>,
    pub retry_after_ms: Option<u64>,
    pub message: String,
    pub is_network_error: bool,
    pub is_protocol_error: bool,
}

#[derive(Debug, Clone)]
pub struct PageResult {
    pub content: Option<String>,
    pub links: Vec<String>,
    pub final_url: String,
    pub etag: Option<String>,
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn process_page(&self, url: &str, max_size_bytes: u64) -> Result<PageResult, PageError>;
}

pub struct ReqwestDriver {
    client: reqwest::Client,
}

impl Default for ReqwestDriver {
    fn default() -> Self {
        let client = reqwest::Client::builder()
            .user_agent("ragsync/0.1 (+docs-sync-bot)")
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build reqwest client");
        Self { client }
    }
}

const LINK_SELECTOR: &str = "a[href]";

#[async_trait]
impl BrowserDriver for ReqwestDriver {
    async fn process_page(&self, url: &str, max_size_bytes: u64) -> Result<PageResult, PageError> {
        let resp = self.client.get(url).send().await.map_err(classify_reqwest_error)?;

        let status = resp.status();
        let final_url = resp.url().to_string();
        let etag = resp
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        if status.as_u16() == 429 {
            let retry_after_ms = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(|s| crate::cascade::parse_retry_after_ms(s, 1000));
            return Err(PageError {
                status: Some(429),
                retry_after_ms,
                message: "rate limited".to_string(),
                is_network_error: false,
                is_protocol_error: false,
            });
        }

        if !status.is_success() {
            return Err(PageError {
                status: Some(status.as_u16()),
                retry_after_ms: None,
                message: format!("http status {}", status),
                is_network_error: false,
                is_protocol_error: false,
            });
        }

        let bytes = resp.bytes().await.map_err(classify_reqwest_error)?;
        if bytes.len() as u64 > max_size_bytes {
            return Ok(PageResult { content: None, links: Vec::new(), final_url, etag });
        }

        let body = String::from_utf8_lossy(&bytes).to_string();
        let links = extract_links(&body, &final_url);

        Ok(PageResult { content: Some(body), links, final_url, etag })
    }
}

fn extract_links(html: &str, base_url: &str) -> Vec<String> {
    let selector = match Selector::parse(LINK_SELECTOR) {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };
    let document = Html::parse_document(html);
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .map(|href| crate::urlutil::build(href, base_url))
        .filter(|resolved| !resolved.is_empty())
        .collect()
}

/// Minimal HTML→Markdown rendering good enough to feed the chunker: headings
/// become `#`-prefixed lines, `<pre><code>` becomes a fenced block, everything
/// else becomes plain paragraph text. The real converter is an external
/// collaborator out of scope for this engine; this stands in for it using
/// the `scraper` parser already on the dependency graph.
pub fn html_to_markdown(html: &str) -> String {
    let document = Html::parse_document(html);
    let body_selector = Selector::parse("body").expect("static selector");
    let root = document.select(&body_selector).next().unwrap_or(document.root_element());

    let mut out = String::new();
    render_node(root, &mut out);
    out.trim().to_string()
}

fn render_node(el: scraper::ElementRef, out: &mut String) {
    let tag = el.value().name();
    if matches!(tag, "script" | "style" | "nav" | "footer") {
        return;
    }

    let (prefix, suffix) = match tag {
        "h1" => ("\n# ", "\n"),
        "h2" => ("\n## ", "\n"),
        "h3" => ("\n### ", "\n"),
        "h4" => ("\n#### ", "\n"),
        "h5" => ("\n##### ", "\n"),
        "h6" => ("\n###### ", "\n"),
        "p" | "div" | "li" => ("\n", "\n"),
        "pre" => ("\n```\n", "\n```\n"),
        _ => ("", ""),
    };

    out.push_str(prefix);
    for child in el.children() {
        match child.value() {
            scraper::node::Node::Text(text) => out.push_str(text),
            scraper::node::Node::Element(_) => {
                if let Some(child_el) = scraper::ElementRef::wrap(child) {
                    render_node(child_el, out);
                }
            }
            _ => {}
        }
    }
    out.push_str(suffix);
}

fn classify_reqwest_error(err: reqwest::Error) -> PageError {
    let message = err.to_string();
    let is_network_error = err.is_timeout()
        || err.is_connect()
        || message.contains("dns")
        || message.contains("connection")
        || message.contains("reset");
    let is_protocol_error = message.contains("Protocol error")
        || message.contains("Connection closed")
        || message.contains("protocolTimeout");

    if !is_network_error {
        warn!(error = %message, "browser driver: request failed");
    }

    PageError {
        status: err.status().map(|s| s.as_u16()),
        retry_after_ms: None,
        message,
        is_network_error,
        is_protocol_error,
    }
}
