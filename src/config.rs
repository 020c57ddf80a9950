use crate::{error::Error, Result};

/// Default amount of line bytes a cache may hold (1 MiB)
pub const DEFAULT_STORAGE_BYTES: usize = 1 << 20;

/// Default upper bound for the number of entries in a line directory
pub const DEFAULT_DIRECTORY_RECORDS: usize = 1 << 10;

/// Tuning values of a `Cache`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Hard ceiling for the sum of all cached line lengths in bytes
    pub storage_byte_budget: usize,
    /// Maximum amount of entries the line directory may hold
    pub directory_max_records: usize,
}

impl CacheConfig {
    /// Create a config with the given budget and the default directory size.
    #[inline]
    pub fn new(storage_byte_budget: usize) -> Self {
        Self {
            storage_byte_budget,
            ..Self::default()
        }
    }

    #[inline]
    pub fn with_directory_records(mut self, directory_max_records: usize) -> Self {
        self.directory_max_records = directory_max_records;
        self
    }

    /// Returns an error if any of the values can't be used to build a cache.
    pub fn validate(&self) -> Result<()> {
        if self.storage_byte_budget == 0 {
            return Err(Error::InvalidConfig(
                "storage byte budget must be greater than zero".into(),
            ));
        }

        if self.directory_max_records == 0 {
            return Err(Error::InvalidConfig(
                "directory needs room for at least one record".into(),
            ));
        }

        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            storage_byte_budget: DEFAULT_STORAGE_BYTES,
            directory_max_records: DEFAULT_DIRECTORY_RECORDS,
        }
    }
}
