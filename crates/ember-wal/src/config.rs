//! WAL configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ember_common::constants::{
    DEFAULT_WAL_FLUSH_INTERVAL, DEFAULT_WAL_SEGMENT_NUM, DEFAULT_WAL_SEGMENT_SIZE,
};
use ember_common::error::{EmberError, EmberResult};

/// Name of the single append-only log file inside a store's directory.
pub(crate) const LOG_FILE_NAME: &str = "ember.wal";

/// Configuration for a [`LogStore`](crate::LogStore).
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Directory the store owns; created on open.
    pub dir: PathBuf,
    /// Number of segments in the ring.
    pub segment_num: usize,
    /// Size of each segment's in-memory buffer in bytes.
    pub segment_size: usize,
    /// Upper bound on how long a slow-filling segment may stay in memory
    /// before the I/O worker seals it.
    pub flush_interval: Duration,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/wal"),
            segment_num: DEFAULT_WAL_SEGMENT_NUM,
            segment_size: DEFAULT_WAL_SEGMENT_SIZE,
            flush_interval: DEFAULT_WAL_FLUSH_INTERVAL,
        }
    }
}

impl WalConfig {
    /// Creates a configuration rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Sets the number of ring segments.
    #[must_use]
    pub fn with_segment_num(mut self, num: usize) -> Self {
        self.segment_num = num;
        self
    }

    /// Sets the per-segment buffer size.
    #[must_use]
    pub fn with_segment_size(mut self, size: usize) -> Self {
        self.segment_size = size;
        self
    }

    /// Sets the flush interval.
    #[must_use]
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Path of the log file inside the store directory.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE_NAME)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EmberResult<()> {
        if self.segment_num < 2 {
            return Err(EmberError::invalid_argument(
                "segment_num must be at least 2",
            ));
        }
        if self.segment_size < 64 {
            return Err(EmberError::invalid_argument(
                "segment_size must be at least 64 bytes",
            ));
        }
        Ok(())
    }

    /// Returns the directory as a path.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
