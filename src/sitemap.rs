//! Sitemap XML parsing: `<urlset>` and recursive `<sitemapindex>` into an
//! ordered `url -> lastmod?` map.

use indexmap::IndexMap;
use tracing::warn;

pub type SitemapMap = IndexMap<String, Option<String>>;

#[async_trait::async_trait]
pub trait SitemapFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, String>;
}

pub struct ReqwestSitemapFetcher {
    client: reqwest::Client,
}

impl Default for ReqwestSitemapFetcher {
    fn default() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

#[async_trait::async_trait]
impl SitemapFetcher for ReqwestSitemapFetcher {
    async fn fetch(&self, url: &str) -> Result<String, String> {
        let resp = self.client.get(url).send().await.map_err(|e| e.to_string())?;
        resp.text().await.map_err(|e| e.to_string())
    }
}

/// Fetches `sitemap_url` and, recursively, any `<sitemapindex>` entries it
/// references, merging everything into one map. HTTP errors or empty/
/// malformed documents yield an empty map rather than propagating failure —
/// sitemap absence just means the cascade falls back to ETag-only layers.
pub async fn load_sitemap(sitemap_url: &str, fetcher: &dyn SitemapFetcher) -> SitemapMap {
    let mut out = SitemapMap::new();
    load_sitemap_into(sitemap_url, fetcher, &mut out, 0).await;
    out
}

async fn load_sitemap_into(sitemap_url: &str, fetcher: &dyn SitemapFetcher, out: &mut SitemapMap, depth: u8) {
    if depth > 5 {
        warn!(sitemap_url, "sitemap: recursion depth exceeded, stopping");
        return;
    }

    let body = match fetcher.fetch(sitemap_url).await {
        Ok(b) => b,
        Err(e) => {
            warn!(sitemap_url, error = %e, "sitemap: fetch failed, treating as empty");
            return;
        }
    };

    let doc = match roxmltree::Document::parse(&body) {
        Ok(d) => d,
        Err(e) => {
            warn!(sitemap_url, error = %e, "sitemap: parse failed, treating as empty");
            return;
        }
    };

    let root = doc.root_element();
    let local_name = root.tag_name().name();

    if local_name == "sitemapindex" {
        let mut children = Vec::new();
        for sitemap_node in root.children().filter(|n| n.has_tag_name("sitemap")) {
            if let Some(loc) = child_text(sitemap_node, "loc") {
                children.push(loc);
            }
        }
        for child_url in children {
            load_sitemap_into(&child_url, fetcher, out, depth + 1).await;
        }
        return;
    }

    for url_node in root.children().filter(|n| n.has_tag_name("url")) {
        let loc = match child_text(url_node, "loc") {
            Some(loc) => loc,
            None => continue,
        };
        let lastmod = child_text(url_node, "lastmod");
        out.insert(loc, lastmod);
    }
}

fn child_text(node: roxmltree::Node, tag: &str) -> Option<String> {
    node.children()
        .find(|n| n.has_tag_name(tag))
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Finds the lastmod for `url`, inheriting from the closest ancestor-path
/// entry present in the same sitemap when `url` itself has no direct entry.
pub fn lastmod_for(sitemap: &SitemapMap, url: &str) -> Option<String> {
    if let Some(direct) = sitemap.get(url) {
        if direct.is_some() {
            return direct.clone();
        }
    }

    let mut best: Option<&str> = None;
    for (candidate, lastmod) in sitemap {
        if lastmod.is_none() {
            continue;
        }
        if url.starts_with(candidate.as_str()) {
            match best {
                Some(current) if current.len() >= candidate.len() => {}
                _ => best = Some(candidate.as_str()),
            }
        }
    }
    best.and_then(|k| sitemap.get(k).cloned().flatten())
}
