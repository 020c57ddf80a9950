//! Serve a text file on 127.0.0.1:8000 with a custom cache configuration

use std::sync::Arc;

use lineserver::{server, Cache, CacheConfig};

#[tokio::main]
async fn main() {
    // Smaller directory: less memory, longer scans on a miss
    let config = CacheConfig::new(1 << 16).with_directory_records(256);

    let cache = Cache::with_config("<some text file>", config)
        .await
        .unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:8000")
        .await
        .unwrap();

    // GET /lines/{n} now returns line n
    axum::serve(listener, server::router(Arc::new(cache)))
        .await
        .unwrap();
}
