use ragsync::chunker::{chunk_code, CodeChunkConfig};

fn cfg() -> CodeChunkConfig {
    CodeChunkConfig { product_name: "svc".into(), version: "3.1".into(), ..Default::default() }
}

#[test]
fn rust_source_keeps_functions_whole_when_small() {
    let src = "fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n\nfn sub(a: i32, b: i32) -> i32 {\n    a - b\n}\n";
    let chunks = chunk_code(src, "rust", "src/math.rs", &cfg());
    let joined: String = chunks.iter().map(|c| c.content.as_str()).collect();
    assert!(joined.contains("fn add(a: i32, b: i32) -> i32 {\n    a + b\n}"));
    assert!(joined.contains("fn sub(a: i32, b: i32) -> i32 {\n    a - b\n}"));
}

#[test]
fn python_source_uses_python_grammar_boundaries() {
    let src = "def greet(name):\n    return f\"hello {name}\"\n\n\ndef farewell(name):\n    return f\"bye {name}\"\n";
    let chunks = chunk_code(src, "python", "pkg/greetings.py", &cfg());
    assert!(chunks.iter().any(|c| c.content.contains("def greet")));
    assert!(chunks.iter().any(|c| c.content.contains("def farewell")));
}

#[test]
fn every_chunk_is_prefixed_with_its_file_path() {
    let src = "fn x() {}\n";
    let chunks = chunk_code(src, "rust", "src/lib.rs", &cfg());
    for c in &chunks {
        assert!(c.content.starts_with("[File: src/lib.rs]"));
        assert_eq!(c.section, "src/lib.rs");
    }
}

#[test]
fn large_file_with_no_grammar_falls_back_losslessly_under_token_budget() {
    let src: String = (0..400).map(|i| format!("token{} ", i)).collect();
    let mut config = cfg();
    config.budget = 50;
    let chunks = chunk_code(&src, "cobol", "legacy/prog.cob", &config);
    assert!(chunks.len() > 1);
    let recovered: String = chunks
        .iter()
        .map(|c| c.content.trim_start_matches("[File: legacy/prog.cob]\n\n"))
        .collect();
    assert_eq!(recovered, src);
}

#[test]
fn markdown_extension_delegates_with_file_path_as_hierarchy_root() {
    let src = "# Title\n\nbody text long enough to stand on its own as a full chunk here, yes indeed it is";
    let chunks = chunk_code(src, "ignored-for-md", "docs/readme.md", &cfg());
    assert_eq!(chunks[0].heading_hierarchy[0], "docs/readme.md");
    assert_eq!(chunks[0].product_name, "svc");
}

#[test]
fn chunk_indices_are_contiguous_and_total_is_consistent() {
    let src = "fn a() {}\nfn b() {}\nfn c() {}\n";
    let chunks = chunk_code(src, "rust", "src/a.rs", &cfg());
    for (i, c) in chunks.iter().enumerate() {
        assert_eq!(c.chunk_index, i);
        assert_eq!(c.total_chunks, chunks.len());
    }
}
