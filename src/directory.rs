use std::path::Path;

use async_std::{
    fs,
    io::{prelude::*, BufReader, SeekFrom},
};
use tracing::info;

use crate::{error::Error, Result};

/// A known line start within the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    /// 1-based line number
    pub line: usize,
    /// Byte position at which `line` begins
    pub offset: u64,
}

/// A sparse line-offset directory.
///
/// Holds the start offset of every `granularity`-th line of a file, so seeking to any line only
/// requires scanning fewer than `granularity` lines from the closest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    /// Strictly increasing by line number. The first entry is always `(1, 0)` unless the file is
    /// empty
    entries: Vec<Entry>,
    total_lines: usize,
    granularity: usize,
}

impl Directory {
    /// Build a new directory for the file at `path` holding at most `max_records` entries.
    ///
    /// Makes two passes over the file: one to count its lines and one to record the offsets.
    pub async fn build<P: AsRef<Path>>(path: P, max_records: usize) -> Result<Directory> {
        if max_records == 0 {
            return Err(zero_records());
        }

        let path = path.as_ref();
        let file = fs::File::open(path)
            .await
            .map_err(|source| Error::FileNotFound {
                path: path.to_path_buf(),
                source,
            })?;

        let directory = Self::build_from_reader(&mut BufReader::new(file), max_records).await?;

        info!(
            path = %path.display(),
            lines = directory.total_lines,
            entries = directory.len(),
            granularity = directory.granularity,
            "built line directory"
        );

        Ok(directory)
    }

    /// Build a new directory for the text within `reader`.
    pub async fn build_from_reader<R>(reader: &mut R, max_records: usize) -> Result<Directory>
    where
        R: BufRead + Seek + Unpin,
    {
        if max_records == 0 {
            return Err(zero_records());
        }

        reader.seek(SeekFrom::Start(0)).await?;

        let mut buff = Vec::with_capacity(1000);

        let mut total_lines: usize = 0;
        loop {
            buff.clear();
            if reader.read_until(b'\n', &mut buff).await? == 0 {
                break;
            }
            total_lines += 1;
        }

        let granularity = total_lines.div_ceil(max_records).max(1);

        reader.seek(SeekFrom::Start(0)).await?;

        let mut entries = Vec::with_capacity(total_lines.div_ceil(granularity));
        let mut curr_offset: u64 = 0;

        for i in 0..total_lines {
            let last_offset = curr_offset;

            buff.clear();
            let n = reader.read_until(b'\n', &mut buff).await?;
            if n == 0 {
                // File got shorter between both passes
                break;
            }

            if i % granularity == 0 {
                entries.push(Entry {
                    line: i + 1,
                    offset: last_offset,
                });
            }

            curr_offset += n as u64;
        }

        Ok(Self {
            entries,
            total_lines,
            granularity,
        })
    }

    /// Returns the closest entry at or before `line`. Scanning forward from the returned offset
    /// reaches `line` after less than `granularity` lines.
    pub fn find_offset(&self, line: usize) -> Result<Entry> {
        if line == 0 || line > self.total_lines {
            return Err(Error::out_of_range(line, self.total_lines));
        }

        let pos = self.entries.partition_point(|entry| entry.line <= line);

        pos.checked_sub(1)
            .and_then(|i| self.entries.get(i))
            .copied()
            .ok_or_else(|| Error::out_of_range(line, self.total_lines))
    }

    /// Returns the total amount of lines in the file.
    #[inline]
    pub fn total_lines(&self) -> usize {
        self.total_lines
    }

    /// Amount of lines between two consecutive entries
    #[inline]
    pub fn granularity(&self) -> usize {
        self.granularity
    }

    /// Returns the amount of entries in the directory.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }
}

fn zero_records() -> Error {
    Error::InvalidConfig("directory needs room for at least one record".into())
}
