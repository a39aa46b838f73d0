//! Markdown mirror: an optional plain-text store keeping the latest rendered
//! Markdown per url, separate from the vector store. One `.md` file per url
//! under a configured root, keyed by a url-derived relative path.

use std::path::{Path, PathBuf};
use tracing::debug;

pub struct MarkdownMirror {
    root: PathBuf,
}

impl MarkdownMirror {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    fn relative_path(&self, url: &str) -> PathBuf {
        let normalized = crate::urlutil::normalize(url);
        let safe = normalized
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');
        let safe = if safe.is_empty() { "index".to_string() } else { safe.to_string() };
        self.root.join(format!("{}.md", safe))
    }

    pub fn has_url(&self, url: &str) -> bool {
        self.relative_path(url).is_file()
    }

    pub fn write(&self, url: &str, markdown: &str) -> Result<(), String> {
        let path = self.relative_path(url);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        std::fs::write(&path, markdown).map_err(|e| e.to_string())?;
        debug!(url, path = %path.display(), "markdown mirror: wrote page");
        Ok(())
    }

    pub fn remove(&self, url: &str) -> Result<(), String> {
        let path = self.relative_path(url);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| e.to_string())?;
        }
        Ok(())
    }
}
