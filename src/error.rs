use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The backing file could not be opened
    #[error("failed to open {}: {source}", path.display())]
    FileNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A tuning value was rejected before anything was built
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// On request for a line the file does not have
    #[error("line {line} is out of range, file only has {total_lines} lines")]
    LineOutOfRange { line: usize, total_lines: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    #[inline]
    pub(crate) fn out_of_range(line: usize, total_lines: usize) -> Self {
        Self::LineOutOfRange { line, total_lines }
    }
}
