//! AST-guided recursive code chunker with a token-budget merge pass and a
//! pure-token fallback for languages without a grammar or unparseable input.

use crate::config::CODE_CHUNK_BUDGET;
use crate::fingerprint::{hash, hash_to_uuid};
use crate::model::{assign_chunk_indices, Chunk};
use crate::urlutil::{token_count, tokenize};
use tree_sitter::{Node, Parser};

#[derive(Debug, Clone)]
pub struct CodeChunkConfig {
    pub product_name: String,
    pub version: String,
    pub branch: Option<String>,
    pub repo: Option<String>,
    pub budget: usize,
}

impl Default for CodeChunkConfig {
    fn default() -> Self {
        Self {
            product_name: String::new(),
            version: String::new(),
            branch: None,
            repo: None,
            budget: CODE_CHUNK_BUDGET,
        }
    }
}

/// `language` is normalized (hyphens to underscores) before grammar lookup,
/// e.g. `c-sharp` -> `c_sharp`. `file_path` is used for the `[File: ...]`
/// prefix and, for `.md` inputs, as the root of the heading hierarchy
/// delegated to the Markdown chunker.
pub fn chunk_code(source: &str, language: &str, file_path: &str, cfg: &CodeChunkConfig) -> Vec<Chunk> {
    let normalized_path = file_path.replace('\\', "/");

    if normalized_path.to_ascii_lowercase().ends_with(".md") {
        let md_cfg = crate::chunker::markdown::MarkdownChunkConfig {
            product_name: cfg.product_name.clone(),
            version: cfg.version.clone(),
            branch: cfg.branch.clone(),
            repo: cfg.repo.clone(),
            ..Default::default()
        };
        return crate::chunker::markdown::chunk_markdown_rooted(
            source,
            &md_cfg,
            file_path,
            &[normalized_path.clone()],
        );
    }

    let normalized_lang = language.replace('-', "_");
    let bodies = match parse_candidates(source, &normalized_lang, cfg.budget) {
        Some(candidates) => merge_candidates(candidates, cfg.budget),
        None => token_chunk_fallback(source, cfg.budget),
    };

    let mut chunks: Vec<Chunk> = bodies
        .into_iter()
        .map(|body| build_chunk(body, &normalized_path, cfg, file_path))
        .collect();

    assign_chunk_indices(&mut chunks);
    chunks
}

fn build_chunk(body: String, normalized_path: &str, cfg: &CodeChunkConfig, url: &str) -> Chunk {
    let content = format!("[File: {}]\n\n{}", normalized_path, body);
    let content_hash = hash(&content);

    Chunk {
        chunk_id: hash_to_uuid(&content_hash),
        content,
        hash: content_hash,
        url: url.to_string(),
        product_name: cfg.product_name.clone(),
        version: cfg.version.clone(),
        branch: cfg.branch.clone(),
        repo: cfg.repo.clone(),
        heading_hierarchy: vec![normalized_path.to_string()],
        section: normalized_path.to_string(),
        chunk_index: 0,
        total_chunks: 0,
        embedding: None,
    }
}

fn load_language(normalized_lang: &str) -> Option<(tree_sitter::Language, &'static [&'static str])> {
    match normalized_lang {
        "py" | "python" => Some((
            tree_sitter_python::LANGUAGE.into(),
            &["function_definition", "class_definition"],
        )),
        "rs" | "rust" => Some((
            tree_sitter_rust::LANGUAGE.into(),
            &["function_item", "struct_item", "impl_item", "enum_item", "mod_item", "trait_item"],
        )),
        "ts" | "tsx" | "typescript" => Some((
            tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            &[
                "function_declaration",
                "class_declaration",
                "interface_declaration",
                "lexical_declaration",
                "method_definition",
            ],
        )),
        "js" | "jsx" | "javascript" => Some((
            tree_sitter_javascript::LANGUAGE.into(),
            &["function_declaration", "class_declaration", "method_definition"],
        )),
        "go" => Some((
            tree_sitter_go::LANGUAGE.into(),
            &["function_declaration", "method_declaration", "type_declaration"],
        )),
        "html" | "htm" => Some((tree_sitter_html::LANGUAGE.into(), &["element"])),
        "css" => Some((tree_sitter_css::LANGUAGE.into(), &["rule_set"])),
        "java" => Some((
            tree_sitter_java::LANGUAGE.into(),
            &["class_declaration", "method_declaration", "constructor_declaration"],
        )),
        "php" => Some((
            tree_sitter_php::LANGUAGE_PHP.into(),
            &["function_definition", "class_definition", "method_declaration"],
        )),
        _ => None,
    }
}

/// Parses `source` with the grammar for `normalized_lang` and recursively
/// splits its AST into budget-sized candidate chunks. Returns `None` when
/// the language has no known grammar or the source fails to parse.
fn parse_candidates(source: &str, normalized_lang: &str, budget: usize) -> Option<Vec<String>> {
    let (language, _node_kinds) = load_language(normalized_lang)?;
    let mut parser = Parser::new();
    parser.set_language(&language).ok()?;
    let tree = parser.parse(source, None)?;

    let mut candidates = Vec::new();
    collect_candidates(tree.root_node(), source, budget, &mut candidates);
    Some(candidates)
}

fn collect_candidates(node: Node, source: &str, budget: usize, out: &mut Vec<String>) {
    let text = node.utf8_text(source.as_bytes()).unwrap_or("").to_string();

    if token_count(&text) <= budget {
        out.push(text);
        return;
    }

    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();

    if children.is_empty() {
        // Indivisible leaf exceeding budget: emit whole, no data loss.
        out.push(text);
        return;
    }

    for child in children {
        collect_candidates(child, source, budget, out);
    }
}

/// Greedily merges adjacent candidate chunks while their joined token count
/// stays within `budget`; candidates whose trimmed text is empty are dropped.
fn merge_candidates(candidates: Vec<String>, budget: usize) -> Vec<String> {
    let mut merged = Vec::new();
    let mut buffer = String::new();
    let mut buffer_tokens = 0usize;

    for candidate in candidates {
        if candidate.trim().is_empty() {
            continue;
        }
        let candidate_tokens = token_count(&candidate);

        if buffer.is_empty() {
            buffer = candidate;
            buffer_tokens = candidate_tokens;
        } else if buffer_tokens + candidate_tokens <= budget {
            buffer.push('\n');
            buffer.push_str(&candidate);
            buffer_tokens += candidate_tokens;
        } else {
            merged.push(std::mem::take(&mut buffer));
            buffer = candidate;
            buffer_tokens = candidate_tokens;
        }
    }
    if !buffer.is_empty() {
        merged.push(buffer);
    }
    merged
}

/// Splits `source` into budget-sized pieces by whitespace-respecting tokens,
/// with no overlap and no data loss; used when no grammar is available or
/// parsing fails.
fn token_chunk_fallback(source: &str, budget: usize) -> Vec<String> {
    if source.trim().is_empty() {
        return Vec::new();
    }

    let toks = tokenize(source);
    let word_positions: Vec<usize> = toks
        .iter()
        .enumerate()
        .filter(|(_, t)| !t.trim().is_empty())
        .map(|(i, _)| i)
        .collect();

    if word_positions.is_empty() {
        return vec![source.to_string()];
    }
    if word_positions.len() <= budget {
        return vec![source.to_string()];
    }

    let mut pieces = Vec::new();
    let mut start_word = 0usize;
    while start_word < word_positions.len() {
        let end_word = (start_word + budget).min(word_positions.len());
        let range_start = word_positions[start_word];
        let range_end = word_positions[end_word - 1];
        pieces.push(toks[range_start..=range_end].concat());
        start_word = end_word;
    }
    pieces
}
