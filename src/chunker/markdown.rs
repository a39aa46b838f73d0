//! Heading-aware Markdown chunker: hierarchy breadcrumbs, small-section
//! merge under the deepest common ancestor, large-section split with
//! fractional overlap, and a safety valve against unbounded buffering.

use crate::config::{CHUNK_OVERLAP_RATIO, MAX_CHUNK_TOKENS, MERGE_THRESHOLD_TOKENS};
use crate::fingerprint::{hash, hash_to_uuid};
use crate::model::{assign_chunk_indices, Chunk};
use crate::urlutil::{token_count, tokenize};
use regex::Regex;

#[derive(Debug, Clone)]
pub struct MarkdownChunkConfig {
    pub product_name: String,
    pub version: String,
    pub branch: Option<String>,
    pub repo: Option<String>,
    pub max_tokens: usize,
    pub merge_threshold_tokens: usize,
    pub overlap_ratio: f64,
}

impl Default for MarkdownChunkConfig {
    fn default() -> Self {
        Self {
            product_name: String::new(),
            version: String::new(),
            branch: None,
            repo: None,
            max_tokens: MAX_CHUNK_TOKENS,
            merge_threshold_tokens: MERGE_THRESHOLD_TOKENS,
            overlap_ratio: CHUNK_OVERLAP_RATIO,
        }
    }
}

struct PendingMerge {
    sections: Vec<(Vec<String>, String)>,
}

pub fn chunk_markdown(markdown: &str, cfg: &MarkdownChunkConfig, url: &str) -> Vec<Chunk> {
    chunk_markdown_rooted(markdown, cfg, url, &[])
}

/// Same algorithm as `chunk_markdown`, but the heading stack is seeded with
/// `root` (e.g. a file path) which always remains the outermost ancestor —
/// used by the code chunker when delegating `.md` files.
pub fn chunk_markdown_rooted(markdown: &str, cfg: &MarkdownChunkConfig, url: &str, root: &[String]) -> Vec<Chunk> {
    let heading_re = Regex::new(r"^(#{1,6})\s+(.*)$").expect("static regex");
    let trailing_anchor_re = Regex::new(r"\s*\[\]\(#[^)]*\)\s*$").expect("static regex");

    let root_len = root.len();
    let mut heading_stack: Vec<String> = root.to_vec();
    let mut body_lines: Vec<String> = Vec::new();
    let mut pending: Option<PendingMerge> = None;
    let mut raw_sections: Vec<(Vec<String>, String)> = Vec::new();

    for line in markdown.lines() {
        if let Some(caps) = heading_re.captures(line) {
            finalize_body(&mut body_lines, &heading_stack, cfg, &mut pending, &mut raw_sections);

            let level = caps[1].len();
            let text = trailing_anchor_re.replace(caps[2].trim(), "").trim().to_string();
            heading_stack.truncate(root_len + level.saturating_sub(1));
            heading_stack.push(text);
        } else {
            body_lines.push(line.to_string());
            let joined = body_lines.join("\n");
            if token_count(&joined) > cfg.max_tokens {
                // safety valve: flush now, keep accumulating under the same heading.
                finalize_body(&mut body_lines, &heading_stack, cfg, &mut pending, &mut raw_sections);
            }
        }
    }
    finalize_body(&mut body_lines, &heading_stack, cfg, &mut pending, &mut raw_sections);
    flush_pending(&mut pending, &mut raw_sections);

    let mut chunks: Vec<Chunk> = raw_sections
        .into_iter()
        .map(|(hierarchy, body)| build_chunk(hierarchy, body, cfg, url))
        .collect();

    assign_chunk_indices(&mut chunks);
    chunks
}

fn finalize_body(
    body_lines: &mut Vec<String>,
    heading_stack: &[String],
    cfg: &MarkdownChunkConfig,
    pending: &mut Option<PendingMerge>,
    raw_sections: &mut Vec<(Vec<String>, String)>,
) {
    if body_lines.is_empty() {
        return;
    }
    let body = std::mem::take(body_lines).join("\n");
    decide_section(heading_stack.to_vec(), body, cfg, pending, raw_sections);
}

fn decide_section(
    hierarchy: Vec<String>,
    body: String,
    cfg: &MarkdownChunkConfig,
    pending: &mut Option<PendingMerge>,
    raw_sections: &mut Vec<(Vec<String>, String)>,
) {
    let tc = token_count(&body);
    if tc == 0 {
        return;
    }

    if tc < cfg.merge_threshold_tokens {
        match pending {
            Some(p) => p.sections.push((hierarchy, body)),
            None => *pending = Some(PendingMerge { sections: vec![(hierarchy, body)] }),
        }
    } else if tc <= cfg.max_tokens {
        flush_pending(pending, raw_sections);
        raw_sections.push((hierarchy, body));
    } else {
        flush_pending(pending, raw_sections);
        for piece in split_oversized(&body, cfg.max_tokens, cfg.overlap_ratio) {
            raw_sections.push((hierarchy.clone(), piece));
        }
    }
}

fn flush_pending(pending: &mut Option<PendingMerge>, raw_sections: &mut Vec<(Vec<String>, String)>) {
    if let Some(p) = pending.take() {
        if p.sections.is_empty() {
            return;
        }
        let hierarchies: Vec<Vec<String>> = p.sections.iter().map(|(h, _)| h.clone()).collect();
        let common = common_ancestor(&hierarchies);
        let merged_body = p
            .sections
            .into_iter()
            .map(|(_, body)| body)
            .collect::<Vec<_>>()
            .join("\n\n");
        raw_sections.push((common, merged_body));
    }
}

fn common_ancestor(hierarchies: &[Vec<String>]) -> Vec<String> {
    let mut iter = hierarchies.iter();
    let first = match iter.next() {
        Some(h) => h.clone(),
        None => return Vec::new(),
    };
    let mut common = first;
    for h in iter {
        let shared = common.iter().zip(h.iter()).take_while(|(a, b)| a == b).count();
        common.truncate(shared);
    }
    common
}

/// Splits `body` greedily into pieces of at most `max_tokens` word-tokens;
/// every piece after the first is prepended with a trailing ~`overlap_ratio`
/// slice of the previous piece.
fn split_oversized(body: &str, max_tokens: usize, overlap_ratio: f64) -> Vec<String> {
    let toks = tokenize(body);
    let word_positions: Vec<usize> = toks
        .iter()
        .enumerate()
        .filter(|(_, t)| !t.trim().is_empty())
        .map(|(i, _)| i)
        .collect();

    if word_positions.len() <= max_tokens {
        return vec![body.to_string()];
    }

    let mut pieces = Vec::new();
    let mut start_word = 0usize;
    let mut start_tok_idx: Option<usize> = None;

    while start_word < word_positions.len() {
        let end_word = (start_word + max_tokens).min(word_positions.len());
        let range_start = start_tok_idx.unwrap_or(word_positions[start_word]);
        let range_end = word_positions[end_word - 1];
        pieces.push(toks[range_start..=range_end].concat());

        if end_word >= word_positions.len() {
            break;
        }

        let piece_word_count = end_word - start_word;
        let overlap_words = ((piece_word_count as f64) * overlap_ratio).ceil() as usize;
        let overlap_words = overlap_words.clamp(1, piece_word_count);
        let overlap_start_word = end_word - overlap_words;
        start_tok_idx = Some(word_positions[overlap_start_word]);
        start_word = end_word;
    }

    pieces
}

fn build_chunk(hierarchy: Vec<String>, body: String, cfg: &MarkdownChunkConfig, url: &str) -> Chunk {
    let breadcrumb_labels = if hierarchy.is_empty() {
        vec!["Introduction".to_string()]
    } else {
        hierarchy.clone()
    };
    let prefixed = format!("[Topic: {}]\n\n{}", breadcrumb_labels.join(" > "), body);
    let content_hash = hash(&prefixed);
    let section = hierarchy.last().cloned().unwrap_or_else(|| "Introduction".to_string());

    Chunk {
        chunk_id: hash_to_uuid(&content_hash),
        content: prefixed,
        hash: content_hash,
        url: url.to_string(),
        product_name: cfg.product_name.clone(),
        version: cfg.version.clone(),
        branch: cfg.branch.clone(),
        repo: cfg.repo.clone(),
        heading_hierarchy: hierarchy,
        section,
        chunk_index: 0,
        total_chunks: 0,
        embedding: None,
    }
}
