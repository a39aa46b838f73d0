//! Tuning constants and the YAML source-configuration loader.

use regex::Regex;
use serde::Deserialize;
use std::path::Path;

// Chunking budgets.
pub const MAX_CHUNK_TOKENS: usize = 512;
pub const MERGE_THRESHOLD_TOKENS: usize = 64;
pub const CHUNK_OVERLAP_RATIO: f64 = 0.10;
pub const CODE_CHUNK_BUDGET: usize = 512;

// Adaptive HEAD backoff.
pub const HEAD_BACKOFF_STEP_MS: u64 = 50;
pub const HEAD_BACKOFF_MIN_MS: u64 = 200;
pub const HEAD_BACKOFF_MAX_MS: u64 = 5000;
pub const HEAD_RETRY_AFTER_MIN_MS: u64 = 1000;

// Crawl / pagination retry budgets.
pub const WEBSITE_MAX_RETRIES_PER_URL: u32 = 3;
pub const TICKET_MAX_ATTEMPTS: u32 = 3;

// Default source knobs.
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 20 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    Website(WebsiteSourceConfig),
    LocalDirectory(LocalDirectorySourceConfig),
    Code(CodeSourceConfig),
    #[serde(rename = "zendesk")]
    TicketStream(TicketStreamSourceConfig),
}

impl SourceConfig {
    pub fn product_name(&self) -> &str {
        match self {
            SourceConfig::Website(c) => &c.product_name,
            SourceConfig::LocalDirectory(c) => &c.product_name,
            SourceConfig::Code(c) => &c.product_name,
            SourceConfig::TicketStream(c) => &c.product_name,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebsiteSourceConfig {
    pub product_name: String,
    pub version: String,
    pub url: String,
    pub sitemap_url: Option<String>,
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    pub database_config: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalDirectorySourceConfig {
    pub product_name: String,
    pub version: String,
    pub path: String,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub include_extensions: Vec<String>,
    #[serde(default)]
    pub exclude_extensions: Vec<String>,
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    /// Incremental git-diff mode: when set, only paths in this set (relative
    /// to `path`) are walked, e.g. the output of `git diff --name-only`.
    #[serde(default)]
    pub allowed_files: Option<Vec<String>>,
    /// Incremental git-diff mode: when set, files whose mtime is not after
    /// this cutoff are skipped.
    #[serde(default)]
    pub mtime_cutoff: Option<chrono::DateTime<chrono::Utc>>,
    pub database_config: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CodeSourceConfig {
    pub product_name: String,
    #[serde(default)]
    pub version: Option<String>,
    pub repo_url_prefix: String,
    pub path: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub include_extensions: Vec<String>,
    #[serde(default)]
    pub exclude_extensions: Vec<String>,
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    /// Incremental git-diff mode: when set, only paths in this set (relative
    /// to `path`) are walked, e.g. the output of `git diff --name-only`.
    #[serde(default)]
    pub allowed_files: Option<Vec<String>>,
    /// Incremental git-diff mode: when set, files whose mtime is not after
    /// this cutoff are skipped.
    #[serde(default)]
    pub mtime_cutoff: Option<chrono::DateTime<chrono::Utc>>,
    pub database_config: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TicketStreamSourceConfig {
    pub product_name: String,
    pub version: String,
    pub url: String,
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    pub database_config: Option<serde_yaml::Value>,
}

fn default_max_size() -> u64 {
    DEFAULT_MAX_SIZE_BYTES
}

#[derive(Debug, Clone, Deserialize)]
pub struct RootConfig {
    pub sources: Vec<SourceConfig>,
}

/// Loads and validates the sources file: substitutes `${VAR}` from the
/// process environment, then applies the per-source-type defaulting rules
/// (code sources fall back `branch -> "local"`; all other source types
/// require an explicit `version`).
pub fn load_config(path: &Path) -> Result<RootConfig, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| format!("reading {}: {}", path.display(), e))?;
    let substituted = substitute_env_vars(&raw);
    let mut config: RootConfig =
        serde_yaml::from_str(&substituted).map_err(|e| format!("parsing {}: {}", path.display(), e))?;

    for source in &mut config.sources {
        match source {
            SourceConfig::Code(c) => {
                if c.branch.is_none() {
                    c.branch = Some("local".to_string());
                }
                if c.version.is_none() {
                    c.version = c.branch.clone();
                }
            }
            SourceConfig::Website(c) if c.version.trim().is_empty() => {
                return Err(format!("source '{}': missing required field 'version'", c.product_name));
            }
            SourceConfig::LocalDirectory(c) if c.version.trim().is_empty() => {
                return Err(format!("source '{}': missing required field 'version'", c.product_name));
            }
            SourceConfig::TicketStream(c) if c.version.trim().is_empty() => {
                return Err(format!("source '{}': missing required field 'version'", c.product_name));
            }
            _ => {}
        }
    }

    Ok(config)
}

fn substitute_env_vars(input: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex");
    re.replace_all(input, |caps: &regex::Captures| {
        let name = &caps[1];
        std::env::var(name).unwrap_or_default()
    })
    .into_owned()
}
