//! System-wide constants and tuning defaults.

use std::time::Duration;

/// Number of delta records a page tolerates before an inline compaction is
/// attempted on the next write.
pub const DELTA_CHAIN_THRESHOLD: usize = 64;

/// Default number of segments in the WAL ring.
pub const DEFAULT_WAL_SEGMENT_NUM: usize = 4;

/// Default size of a single WAL segment in bytes (4 MB).
pub const DEFAULT_WAL_SEGMENT_SIZE: usize = 4 * 1024 * 1024;

/// Default upper bound on how long a slow-filling WAL segment may sit in
/// memory before the I/O worker seals it for flushing.
pub const DEFAULT_WAL_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Maximum key size in bytes (16 KB).
pub const MAX_SORT_KEY_SIZE: usize = 16 * 1024;

/// Maximum row payload size in bytes (1 MB).
pub const MAX_ROW_SIZE: usize = 1024 * 1024;
