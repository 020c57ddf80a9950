//!Serve single lines of large, static text files without reading the whole file for each request.
//!
//! A sparse [`Directory`] of line offsets is built once per file, and a [`Cache`] with a fixed
//! byte budget keeps recently requested lines in memory.

/// A bounded line cache with clock eviction
pub mod cache;
pub mod config;
/// A sparse index of line start offsets
pub mod directory;
pub mod error;
/// HTTP transport
pub mod server;

pub use cache::{Cache, CacheStats};
pub use config::CacheConfig;
pub use directory::{Directory, Entry};
pub use error::Error;

use async_trait::async_trait;

pub type Result<T> = std::result::Result<T, error::Error>;

/// A trait defining behavior for reading certain lines by their 1-based line number.
#[async_trait]
pub trait LineStore: Send + Sync {
    /// Should return the raw bytes of `line`, including its terminator.
    async fn get_line(&self, line: usize) -> Result<Vec<u8>>;

    /// Returns the total amount of lines.
    fn total_lines(&self) -> usize;
}

#[async_trait]
impl LineStore for Cache {
    #[inline]
    async fn get_line(&self, line: usize) -> Result<Vec<u8>> {
        Cache::get_line(self, line).await
    }

    #[inline]
    fn total_lines(&self) -> usize {
        Cache::total_lines(self)
    }
}
