//! Line server
//!
//! Serves single lines of a static text file over HTTP.
//!
//! ```bash
//! lineserver ./frankenstein.txt --listen 127.0.0.1:8000
//! curl http://127.0.0.1:8000/lines/1435
//! ```

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use lineserver::{
    config::{DEFAULT_DIRECTORY_RECORDS, DEFAULT_STORAGE_BYTES},
    server, Cache, CacheConfig,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "lineserver")]
#[command(about = "Serve single lines of a static text file over HTTP")]
struct Args {
    /// Text file to serve
    file: PathBuf,

    /// Listen address
    #[arg(long, default_value = "127.0.0.1:8000", env = "LINESERVER_LISTEN")]
    listen: SocketAddr,

    /// Maximum amount of line bytes kept in memory
    #[arg(long, default_value_t = DEFAULT_STORAGE_BYTES, env = "LINESERVER_CACHE_BYTES")]
    cache_bytes: usize,

    /// Maximum amount of entries in the line directory
    #[arg(long, default_value_t = DEFAULT_DIRECTORY_RECORDS, env = "LINESERVER_DIRECTORY_RECORDS")]
    directory_records: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lineserver=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    let args = Args::parse();

    info!(file = %args.file.display(), listen = %args.listen, "Starting line server");

    let config = CacheConfig::new(args.cache_bytes).with_directory_records(args.directory_records);
    let cache = Cache::with_config(&args.file, config)
        .await
        .with_context(|| format!("failed to load {}", args.file.display()))?;

    info!(
        file = %cache.path().display(),
        lines = cache.total_lines(),
        budget = cache.storage_byte_budget(),
        "Cache loaded"
    );

    let app = server::router(Arc::new(cache));

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;

    info!(address = %args.listen, "Server listening");

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
