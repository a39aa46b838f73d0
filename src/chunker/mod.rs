pub mod code;
pub mod markdown;

pub use code::{chunk_code, CodeChunkConfig};
pub use markdown::{chunk_markdown, chunk_markdown_rooted, MarkdownChunkConfig};
