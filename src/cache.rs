use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_std::{
    fs,
    io::{prelude::*, BufReader, SeekFrom},
    sync::Mutex,
};
use tracing::{debug, info, trace, warn};

use crate::{
    config::CacheConfig,
    directory::{Directory, Entry},
    error::Error,
    Result,
};

/// A record gets evicted once a sweep ages it beyond this value
pub const AGE_THRESHOLD: u8 = 4;

/// A cached line
#[derive(Debug)]
struct Record {
    line: usize,
    /// Raw line including its terminator
    bytes: Vec<u8>,
    age: u8,
}

impl Record {
    #[inline]
    fn visit_and_age(&mut self) -> u8 {
        self.age = self.age.saturating_add(1);
        self.age
    }
}

/// Cached lines with clock (second chance) eviction.
///
/// Records live in slots which never move, so evicting one record doesn't invalidate the slot
/// indices stored in `index` or the position of `clock`.
#[derive(Debug, Default)]
struct Records {
    /// Maps line number to its slot
    index: HashMap<usize, usize>,
    slots: Vec<Option<Record>>,
    /// Slots freed by evictions, reused by the next inserts
    free: Vec<usize>,
    /// Next slot to visit. Always `< slots.len()` while there are slots
    clock: usize,
    stored_bytes: usize,
}

impl Records {
    /// Returns the bytes of `line` if cached and gives the record a second chance.
    fn touch(&mut self, line: usize) -> Option<&[u8]> {
        let slot = *self.index.get(&line)?;
        let record = self.slots.get_mut(slot)?.as_mut()?;
        record.age = 0;
        Some(&record.bytes)
    }

    fn insert(&mut self, line: usize, bytes: Vec<u8>) {
        self.stored_bytes += bytes.len();
        let record = Some(Record {
            line,
            bytes,
            age: 0,
        });

        // A freed slot is the one the hand just passed, so the new record is visited last
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = record;
                slot
            }
            None => {
                self.slots.push(record);
                self.slots.len() - 1
            }
        };

        self.index.insert(line, slot);
    }

    /// Sweeps the clock hand until exactly one record gets evicted. Returns `None` if there is
    /// nothing left to evict.
    fn evict_one(&mut self) -> Option<Record> {
        if self.index.is_empty() {
            return None;
        }

        loop {
            let slot = self.clock;
            self.clock = (slot + 1) % self.slots.len();

            let expired = match self.slots[slot].as_mut() {
                Some(record) => record.visit_and_age() > AGE_THRESHOLD,
                None => false,
            };

            if expired {
                let record = self.slots[slot].take()?;
                self.index.remove(&record.line);
                self.free.push(slot);
                self.stored_bytes -= record.bytes.len();
                return Some(record);
            }
        }
    }

    #[inline]
    fn len(&self) -> usize {
        self.index.len()
    }
}

/// A buffered handle on the backing file which remembers where it's positioned.
#[derive(Debug)]
struct LineReader {
    inner: BufReader<fs::File>,
    /// Line the reader is currently positioned at the start of
    position: Option<usize>,
}

impl LineReader {
    async fn open(path: &Path) -> Result<LineReader> {
        let file = fs::File::open(path)
            .await
            .map_err(|source| Error::FileNotFound {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            inner: BufReader::new(file),
            position: None,
        })
    }

    /// Reads `line` including its terminator, scanning forward from `anchor`.
    async fn read_line(&mut self, anchor: Entry, line: usize, total_lines: usize) -> Result<Vec<u8>> {
        // We don't need to seek if the reader already sits between the anchor and the requested
        // line, eg. when lines are requested sequentially
        let mut current = match self.position.take() {
            Some(pos) if anchor.line <= pos && pos <= line => pos,
            _ => {
                self.inner.seek(SeekFrom::Start(anchor.offset)).await?;
                anchor.line
            }
        };

        let mut buf = Vec::new();
        while current <= line {
            buf.clear();
            if self.inner.read_until(b'\n', &mut buf).await? == 0 {
                return Err(Error::out_of_range(line, total_lines));
            }
            current += 1;
        }

        self.position = Some(current);
        Ok(buf)
    }
}

#[derive(Debug)]
struct CacheState {
    records: Records,
    reader: LineReader,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// A snapshot of a caches counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Amount of cached lines
    pub records: usize,
    pub stored_bytes: usize,
    pub storage_byte_budget: usize,
    pub hits: u64,
    /// Lines read from the file. Failed reads aren't counted
    pub misses: u64,
    pub evictions: u64,
}

/// A bounded cache of the lines of a single file.
///
/// Misses are resolved through a `Directory`, so reading an uncached line only scans a bounded
/// amount of lines. All lookups, reads and evictions are serialized by a single lock.
#[derive(Debug)]
pub struct Cache {
    path: PathBuf,
    directory: Arc<Directory>,
    storage_byte_budget: usize,
    state: Mutex<CacheState>,
}

impl Cache {
    /// Create a new cache for the file at `path` holding at most `storage_byte_budget` bytes of
    /// lines.
    ///
    /// Returns an error if the file can't be opened or the budget is zero.
    #[inline]
    pub async fn new<P: AsRef<Path>>(path: P, storage_byte_budget: usize) -> Result<Cache> {
        Self::with_config(path, CacheConfig::new(storage_byte_budget)).await
    }

    /// Create a new cache using custom tuning values.
    pub async fn with_config<P: AsRef<Path>>(path: P, config: CacheConfig) -> Result<Cache> {
        config.validate()?;

        let path = path.as_ref();
        let directory = Directory::build(path, config.directory_max_records).await?;

        Self::with_directory(path, Arc::new(directory), config.storage_byte_budget).await
    }

    /// Create a new cache for the file at `path` using an already built `directory`.
    /// Expects the directory to be built from the same file.
    pub async fn with_directory<P: AsRef<Path>>(
        path: P,
        directory: Arc<Directory>,
        storage_byte_budget: usize,
    ) -> Result<Cache> {
        CacheConfig::new(storage_byte_budget).validate()?;

        let path = path.as_ref();
        let reader = LineReader::open(path).await?;

        info!(
            path = %path.display(),
            lines = directory.total_lines(),
            budget = storage_byte_budget,
            "line cache ready"
        );

        Ok(Self {
            path: path.to_path_buf(),
            directory,
            storage_byte_budget,
            state: Mutex::new(CacheState {
                records: Records::default(),
                reader,
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
        })
    }

    /// Returns the raw bytes of `line` (1-based), including its terminator.
    ///
    /// Returns `Error::LineOutOfRange` if the file doesn't have that line.
    pub async fn get_line(&self, line: usize) -> Result<Vec<u8>> {
        let anchor = self.directory.find_offset(line)?;

        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if let Some(bytes) = state.records.touch(line) {
            state.hits += 1;
            trace!(line, "cache hit");
            return Ok(bytes.to_vec());
        }

        let bytes = state
            .reader
            .read_line(anchor, line, self.directory.total_lines())
            .await?;
        state.misses += 1;
        debug!(line, anchor = anchor.line, len = bytes.len(), "cache miss");

        while state.records.stored_bytes + bytes.len() > self.storage_byte_budget {
            match state.records.evict_one() {
                Some(evicted) => {
                    state.evictions += 1;
                    debug!(line = evicted.line, len = evicted.bytes.len(), "evicted line");
                }
                None => {
                    warn!(
                        line,
                        len = bytes.len(),
                        budget = self.storage_byte_budget,
                        "line exceeds the storage budget"
                    );
                    break;
                }
            }
        }

        state.records.insert(line, bytes.clone());
        Ok(bytes)
    }

    /// Returns a snapshot of the caches counters.
    pub async fn stats(&self) -> CacheStats {
        let state = self.state.lock().await;
        CacheStats {
            records: state.records.len(),
            stored_bytes: state.records.stored_bytes,
            storage_byte_budget: self.storage_byte_budget,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }

    /// Returns the total amount of lines in the file.
    #[inline]
    pub fn total_lines(&self) -> usize {
        self.directory.total_lines()
    }

    #[inline]
    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn storage_byte_budget(&self) -> usize {
        self.storage_byte_budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{distributions::Uniform, Rng};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SIMPLE: &str = "./testfiles/simple";

    /// Writes `count` lines of varying length into a temp file
    fn numbered_file(count: usize) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for i in 1..=count {
            writeln!(file, "line {:05} {}", i, "x".repeat(i % 37)).unwrap();
        }
        file.flush().unwrap();
        file
    }

    /// Splits the file into its raw lines, independently of the directory
    fn raw_lines<P: AsRef<std::path::Path>>(path: P) -> Vec<Vec<u8>> {
        std::fs::read(path)
            .unwrap()
            .split_inclusive(|b| *b == b'\n')
            .map(|l| l.to_vec())
            .collect()
    }

    fn assert_consistent(records: &Records) {
        let live: Vec<_> = records.slots.iter().flatten().collect();
        assert_eq!(live.len(), records.index.len());
        assert_eq!(
            records.stored_bytes,
            live.iter().map(|r| r.bytes.len()).sum::<usize>()
        );
        for (line, slot) in &records.index {
            assert_eq!(records.slots[*slot].as_ref().unwrap().line, *line);
        }
        if !records.slots.is_empty() {
            assert!(records.clock < records.slots.len());
        }
    }

    #[test]
    fn test_clock_second_chance() {
        let mut records = Records::default();
        records.insert(1, b"one\n".to_vec());
        records.insert(2, b"two\n".to_vec());
        records.insert(3, b"three\n".to_vec());

        // Everything is equally old, the first record under the hand goes first
        assert_eq!(records.evict_one().unwrap().line, 1);
        assert_eq!(records.clock, 1);
        assert_consistent(&records);

        // Line 2 got accessed so line 3 goes next
        assert!(records.touch(2).is_some());
        assert_eq!(records.evict_one().unwrap().line, 3);
        assert_consistent(&records);

        // Freed slots get reused instead of growing the ring
        records.insert(4, b"four\n".to_vec());
        records.insert(5, b"five\n".to_vec());
        assert_eq!(records.slots.len(), 3);
        assert_eq!(records.len(), 3);
        assert_consistent(&records);

        assert!(records.touch(1).is_none());
        assert!(records.touch(3).is_none());
        assert_eq!(records.touch(4), Some(&b"four\n"[..]));
    }

    #[test]
    fn test_evict_empty() {
        let mut records = Records::default();
        assert!(records.evict_one().is_none());

        records.insert(7, b"seven\n".to_vec());
        assert_eq!(records.evict_one().unwrap().line, 7);
        assert!(records.evict_one().is_none());
        assert_eq!(records.stored_bytes, 0);
        assert_consistent(&records);
    }

    #[async_std::test]
    async fn test_simple_file() {
        let cache = Cache::new(SIMPLE, 1 << 20).await.unwrap();
        let original = raw_lines(SIMPLE);
        assert_eq!(cache.total_lines(), original.len());

        for (i, expected) in original.iter().enumerate() {
            assert_eq!(&cache.get_line(i + 1).await.unwrap(), expected);
        }

        // The last line has no terminator
        assert_eq!(
            cache.get_line(20).await.unwrap(),
            b"the last line has no terminator"
        );
        assert_eq!(cache.get_line(2).await.unwrap(), b"\n");
    }

    #[async_std::test]
    async fn test_end_to_end() {
        let file = numbered_file(10_000);
        let original = raw_lines(file.path());

        let cache = Cache::new(file.path(), 4096).await.unwrap();
        assert_eq!(cache.total_lines(), 10_000);

        assert_eq!(cache.get_line(1).await.unwrap(), original[0]);
        assert!(matches!(
            cache.get_line(10_001).await,
            Err(Error::LineOutOfRange {
                line: 10_001,
                total_lines: 10_000
            })
        ));

        for _ in 0..1000 {
            assert_eq!(cache.get_line(5000).await.unwrap(), original[4999]);
        }

        let stats = cache.stats().await;
        assert_eq!(stats.records, 2);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.hits, 999);
        assert_eq!(stats.evictions, 0);

        let state = cache.state.lock().await;
        assert_eq!(
            state.records.slots.iter().flatten().filter(|r| r.line == 5000).count(),
            1
        );
    }

    #[async_std::test]
    async fn test_budget_invariant() {
        let file = numbered_file(10_000);
        let original = raw_lines(file.path());

        let cache = Cache::new(file.path(), 4096).await.unwrap();

        for line in (1..=10_000).step_by(10) {
            assert_eq!(cache.get_line(line).await.unwrap(), original[line - 1]);

            let stats = cache.stats().await;
            assert!(stats.stored_bytes <= 4096);
        }

        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1000);
        assert!(stats.evictions > 0);
        assert_consistent(&cache.state.lock().await.records);
    }

    #[async_std::test]
    async fn test_random() {
        let file = numbered_file(3000);
        let original = raw_lines(file.path());

        let config = CacheConfig::new(2048).with_directory_records(64);
        let cache = Cache::with_config(file.path(), config).await.unwrap();
        assert_eq!(cache.directory().granularity(), 47);

        let lines: Vec<_> = rand::thread_rng()
            .sample_iter(Uniform::new_inclusive(1, cache.total_lines()))
            .take(cache.total_lines() * 2)
            .collect();

        for line in lines {
            assert_eq!(cache.get_line(line).await.unwrap(), original[line - 1]);
            assert!(cache.stats().await.stored_bytes <= 2048);
        }

        assert_consistent(&cache.state.lock().await.records);
    }

    #[async_std::test]
    async fn test_sequential_and_backwards() {
        let file = numbered_file(500);
        let original = raw_lines(file.path());

        // A single directory entry forces every read to scan from the reader position or line 1
        let config = CacheConfig::new(64).with_directory_records(1);
        let cache = Cache::with_config(file.path(), config).await.unwrap();

        for line in (100..=140).chain(20..=30).chain([499, 1, 500, 250, 251]) {
            assert_eq!(cache.get_line(line).await.unwrap(), original[line - 1]);
        }
    }

    #[async_std::test]
    async fn test_oversized_line() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "short").unwrap();
        writeln!(file, "{}", "y".repeat(200)).unwrap();
        writeln!(file, "tiny").unwrap();
        file.flush().unwrap();

        let cache = Cache::new(file.path(), 64).await.unwrap();

        assert_eq!(cache.get_line(1).await.unwrap(), b"short\n");
        assert_eq!(cache.get_line(2).await.unwrap().len(), 201);

        let stats = cache.stats().await;
        assert_eq!(stats.records, 1);
        assert_eq!(stats.stored_bytes, 201);

        assert_eq!(cache.get_line(3).await.unwrap(), b"tiny\n");
        let stats = cache.stats().await;
        assert_eq!(stats.records, 1);
        assert_eq!(stats.stored_bytes, 5);
    }

    #[async_std::test]
    async fn test_concurrent_readers() {
        let file = numbered_file(2000);
        let original = Arc::new(raw_lines(file.path()));
        let cache = Arc::new(Cache::new(file.path(), 1024).await.unwrap());

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let original = Arc::clone(&original);
                let lines: Vec<usize> = rand::thread_rng()
                    .sample_iter(Uniform::new_inclusive(1, 2000))
                    .take(300)
                    .collect();
                async_std::task::spawn(async move {
                    for line in lines {
                        assert_eq!(cache.get_line(line).await.unwrap(), original[line - 1]);
                    }
                })
            })
            .collect();

        for task in tasks {
            task.await;
        }

        let stats = cache.stats().await;
        assert_eq!(stats.hits + stats.misses, 8 * 300);
        assert!(stats.stored_bytes <= 1024);
        assert_consistent(&cache.state.lock().await.records);
    }

    #[async_std::test]
    async fn test_construction_errors() {
        assert!(matches!(
            Cache::new("./testfiles/simpleBogus", 4096).await,
            Err(Error::FileNotFound { .. })
        ));
        assert!(matches!(
            Cache::new(SIMPLE, 0).await,
            Err(Error::InvalidConfig(_))
        ));

        let config = CacheConfig::new(4096).with_directory_records(0);
        assert!(matches!(
            Cache::with_config(SIMPLE, config).await,
            Err(Error::InvalidConfig(_))
        ));
    }

    #[async_std::test]
    async fn test_shared_directory() {
        let directory = Arc::new(Directory::build(SIMPLE, 4).await.unwrap());

        let a = Cache::with_directory(SIMPLE, Arc::clone(&directory), 128)
            .await
            .unwrap();
        let b = Cache::with_directory(SIMPLE, Arc::clone(&directory), 256)
            .await
            .unwrap();

        assert_eq!(a.get_line(10).await.unwrap(), b.get_line(10).await.unwrap());
        assert!(Arc::ptr_eq(a.directory(), b.directory()));
        assert_eq!(a.path(), std::path::Path::new(SIMPLE));
        assert_eq!(a.storage_byte_budget(), 128);
        assert_eq!(b.stats().await.storage_byte_budget, b.storage_byte_budget());
    }

    #[async_std::test]
    async fn test_file_shorter_than_directory() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "one\ntwo\nthree").unwrap();
        file.flush().unwrap();

        // Directory of a 20 line file used on a 3 line file
        let directory = Arc::new(Directory::build(SIMPLE, 4).await.unwrap());
        let cache = Cache::with_directory(file.path(), directory, 128)
            .await
            .unwrap();

        assert!(matches!(
            cache.get_line(17).await,
            Err(Error::LineOutOfRange { line: 17, .. })
        ));
        let stats = cache.stats().await;
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.records, 0);

        assert_eq!(cache.get_line(1).await.unwrap(), b"one\n");
        assert_eq!(cache.stats().await.misses, 1);
    }
}
