use tracing::warn;
use url::Url;

const ASSET_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "svg", "webp", "ico", "bmp", "css", "js", "mjs", "json", "xml",
    "woff", "woff2", "ttf", "eot", "zip", "tar", "gz", "mp4", "mp3", "wav", "mov", "avi",
];

/// Strips query and fragment, preserves trailing slash. Returns the input
/// verbatim when it cannot be parsed as a URL.
pub fn normalize(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.to_string(),
    }
}

/// `origin + pathname`, trailing slash preserved for the bare-origin case.
pub fn prefix(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => format!("{}{}", parsed.origin().ascii_serialization(), parsed.path()),
        Err(_) => url.to_string(),
    }
}

/// Resolves `href` against `base` per RFC 3986. Returns an empty string on
/// failure; callers are expected to log.
pub fn build(href: &str, base: &str) -> String {
    let base = match Url::parse(base) {
        Ok(b) => b,
        Err(e) => {
            warn!("build: invalid base url {}: {}", base, e);
            return String::new();
        }
    };
    match base.join(href) {
        Ok(joined) => joined.to_string(),
        Err(e) => {
            warn!("build: cannot resolve {} against {}: {}", href, base, e);
            String::new()
        }
    }
}

/// Accepts extensionless paths, `.html`, `.htm`, `.pdf` (case-insensitive);
/// rejects common asset extensions.
pub fn should_process(url: &str) -> bool {
    let parsed = Url::parse(url).expect("malformed url passed to should_process");
    let path = parsed.path().to_ascii_lowercase();
    match path.rsplit('.').next() {
        Some(ext) if path.contains('.') && ext.len() <= 5 => {
            if ASSET_EXTENSIONS.contains(&ext) {
                false
            } else {
                matches!(ext, "html" | "htm" | "pdf") || !looks_like_extension(ext)
            }
        }
        _ => true,
    }
}

fn looks_like_extension(ext: &str) -> bool {
    !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Checks the pathname suffix only.
pub fn is_pdf(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => parsed.path().to_ascii_lowercase().ends_with(".pdf"),
        Err(_) => url.to_ascii_lowercase().ends_with(".pdf"),
    }
}

/// Splits on whitespace runs, keeping the separators, so `tokenize(s).concat() == s`.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut current_is_space = false;
    let mut started = false;

    for ch in text.chars() {
        let is_space = ch.is_whitespace();
        if started && is_space != current_is_space {
            tokens.push(std::mem::take(&mut current));
        }
        current.push(ch);
        current_is_space = is_space;
        started = true;
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Number of non-whitespace tokens in `text`; the cheap proxy for
/// embedding-model token budget used throughout chunking.
pub fn token_count(text: &str) -> usize {
    tokenize(text).iter().filter(|t| !t.trim().is_empty()).count()
}
