//! Index a text file and read a given line directly

use lineserver::Cache;

#[async_std::main]
async fn main() {
    // Index the file, keeping at most 64 KiB of lines in memory
    let cache = Cache::new("<some text file>", 64 * 1024)
        .await
        .unwrap();

    // Line count is known after indexing without reading the file again
    let line_count = cache.total_lines();

    // Read line 30, the second read is served from memory
    let line_30 = cache.get_line(30).await.unwrap();
    assert_eq!(line_30, cache.get_line(30).await.unwrap());

    let stats = cache.stats().await;
    println!("{} lines, {:?}", line_count, stats);
}
