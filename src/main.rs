use std::sync::Arc;

use clap::Parser;
use tagfs::{
    fuse::TagfsFuse, metadata::SqliteMetadataStore, ufs::LocalStorage, vfs::TagFilesystem,
};

#[derive(Parser)]
#[command(name = "tagfs")]
#[command(version, about = "Mount a tag-based view of indexed files", long_about = None)]
struct Cli {
    /// Path to the metadata database file
    metadata_file: String,

    /// Directory to mount the tag filesystem on
    mount_point: String,
}

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        tracing::error!("tagfs failed: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let store = Arc::new(SqliteMetadataStore::open(&cli.metadata_file)?);
    let fs = TagFilesystem::new(store, Arc::new(LocalStorage), &cli.mount_point);

    tracing::info!(
        "mounting tag filesystem from {} at {}",
        cli.metadata_file,
        cli.mount_point
    );
    TagfsFuse::new(fs)?.mount(&cli.mount_point)?;

    tracing::info!("unmounted {}", cli.mount_point);
    Ok(())
}
