//! # ember-txn
//!
//! Optimistic concurrency control on top of the EmberDB page engine.
//!
//! A [`TxnManager`] allocates monotone timestamps, shares sub-tables through
//! its [`TableDirectory`], and hands out [`TxnContext`]s. A read-write
//! context buffers writes locally and commits with the four-phase protocol:
//! write intents, acquire a commit timestamp, validate the read set, then
//! finalize every intent with a single timestamp store. Begin, commit, and
//! abort each append one record through the write-ahead log when a store is
//! attached.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod context;
mod manager;

pub use context::{TxnContext, TxnOutcome};
pub use manager::{LockManagerMode, TableDirectory, TxnManager, TxnType};
