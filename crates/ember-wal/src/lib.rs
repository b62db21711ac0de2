//! # ember-wal
//!
//! The segmented, lock-free write-ahead log of EmberDB.
//!
//! A [`LogStore`] owns a ring of fixed-size [`LogSegment`]s. Writers reserve
//! bytes with a single compare-and-swap on a segment's packed control word
//! and fill their reservations concurrently; the last writer out of a sealed
//! segment hands it to a dedicated I/O worker that appends it to the log
//! file and fsyncs. A record is durable once
//! [`LogStore::persistent_lsn`] reaches its end LSN.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod record;
mod segment;
mod store;

pub use config::WalConfig;
pub use record::{TxnLogRecord, TxnLogWriter};
pub use segment::{Admission, LogSegment, SegmentState, WriterGuard};
pub use store::LogStore;
