use clap::Parser;
use ragsync::config;
use ragsync::embed::{EmbeddingClient, NullEmbedder, ReqwestEmbeddingClient};
use ragsync::sources;
use ragsync::store::embedded::EmbeddedStore;
use ragsync::store::StoreBackend;
use std::path::Path;
use tracing::{error, info, Level};

#[derive(Parser, Debug)]
#[command(name = "ragsync")]
#[command(about = "Incremental crawl-and-sync engine for documentation corpora")]
struct Args {
    /// Path to the sources YAML file.
    #[arg(short, long)]
    config: String,

    /// Data directory for the embedded vector-store snapshot.
    #[arg(short, long, default_value = "./data")]
    data_dir: String,

    /// Ignore every watermark and reprocess all known content.
    #[arg(long, default_value_t = false)]
    force_full_sync: bool,

    /// Directory to mirror fetched website pages as plain Markdown.
    #[arg(long)]
    markdown_mirror_dir: Option<String>,

    /// Embedding service endpoint. Omit to run with the no-op embedder.
    #[arg(long)]
    embedding_url: Option<String>,

    /// Bearer token for the embedding service.
    #[arg(long)]
    embedding_api_key: Option<String>,

    /// Vector dimension used by the no-op embedder when no endpoint is set.
    #[arg(long, default_value_t = 1536)]
    embedding_dim: usize,
}

#[tokio::main]
async fn main() -> Result<(), String> {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("ragsync starting");

    let config = config::load_config(Path::new(&args.config))?;
    info!(sources = config.sources.len(), "sources file loaded");

    let mut store = EmbeddedStore::new(&args.data_dir);
    store.open().await?;
    store.init_metadata().await?;

    let embedder: Box<dyn EmbeddingClient> = match &args.embedding_url {
        Some(url) => Box::new(ReqwestEmbeddingClient::new(url.clone(), args.embedding_api_key.clone())),
        None => {
            info!("no embedding_url configured, using the no-op embedder");
            Box::new(NullEmbedder { dim: args.embedding_dim })
        }
    };

    let mirror_root = args.markdown_mirror_dir.as_ref().map(Path::new);

    let reports = sources::run_sync(&config, &store, embedder.as_ref(), args.force_full_sync, mirror_root).await;

    let mut had_failures = false;
    for report in &reports {
        info!(
            source = report.source_name,
            processed = report.urls_processed,
            embedded = report.urls_embedded,
            failed = report.has_failures,
            "source sync complete"
        );
        had_failures |= report.has_failures;
    }

    store.save_snapshot()?;
    info!("embedded store snapshot saved");

    if had_failures {
        error!("one or more sources reported failures during this run");
        std::process::exit(1);
    }
    Ok(())
}
