use std::sync::Arc;

use clap::Parser;
use tagfs::indexer;
use tagfs::metadata::{MetadataStore, SqliteMetadataStore};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(version, about = "Scan directories and register files in the tag metadata store", long_about = None)]
struct Cli {
    /// Directory to scan for existing files. Can be repeated.
    #[arg(long = "scanDir", value_name = "DIR", required = true)]
    scan_dirs: Vec<String>,

    /// Path to the metadata database file
    metadata_file: String,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!("indexer failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let store: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::open(&cli.metadata_file)?);

    // One scanner task per directory, all joined before exit.
    let mut scanners = Vec::with_capacity(cli.scan_dirs.len());
    for dir in cli.scan_dirs {
        let store = store.clone();
        scanners.push(tokio::spawn(async move {
            if let Err(e) = indexer::index_path(&dir, store).await {
                tracing::error!("could not index {}: {}", dir, e);
            }
        }));
    }
    futures::future::join_all(scanners).await;

    Ok(())
}
