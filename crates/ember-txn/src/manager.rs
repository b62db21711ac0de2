//! The transaction manager: timestamp allocation, sub-table sharing, and
//! lock-manager modes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use ember_common::error::EmberResult;
use ember_common::sync::LockTable;
use ember_common::types::TxnTs;
use ember_storage::{Options, SubTable};
use ember_wal::LogStore;

use crate::context::TxnContext;

/// Kind of transaction a context runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnType {
    /// Reads a consistent snapshot; commits without validation.
    ReadOnly,
    /// Buffers writes and validates reads at commit.
    ReadWrite,
}

/// Where advisory locks for write keys live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockManagerMode {
    /// One lock table on the manager covers every sub-table.
    Centralized,
    /// Each sub-table carries its own lock table.
    Decentralized,
    /// No advisory locks: the page's inline intent check arbitrates writers.
    Inlined,
}

/// Shares sub-table handles between contexts so concurrent transactions
/// observe the same pages. Stands in for the buffer-pool directory, which is
/// outside this crate's scope.
pub struct TableDirectory {
    tables: RwLock<HashMap<String, Arc<SubTable>>>,
}

impl TableDirectory {
    fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the sub-table named `table_key`, opening it on first use.
    pub fn get_or_open(&self, table_key: &str, opts: &Options) -> EmberResult<Arc<SubTable>> {
        if let Some(table) = self.tables.read().get(table_key) {
            return Ok(Arc::clone(table));
        }
        let mut tables = self.tables.write();
        if let Some(table) = tables.get(table_key) {
            return Ok(Arc::clone(table));
        }
        let table = SubTable::open(table_key, opts)?;
        tables.insert(table_key.to_string(), Arc::clone(&table));
        Ok(table)
    }

    /// Number of open sub-tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    /// Returns true when no sub-table has been opened.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }
}

/// Allocates timestamps and begins transactions.
///
/// Timestamp allocation is linearizable: read-write begins and commits draw
/// from one atomic counter, so every commit timestamp exceeds every
/// previously issued timestamp. Read-only transactions snapshot the
/// committed watermark instead of consuming a timestamp.
pub struct TxnManager {
    mode: LockManagerMode,
    next_ts: AtomicU64,
    max_committed_ts: AtomicU64,
    directory: TableDirectory,
    lock_table: LockTable,
    log_store: Option<Arc<LogStore>>,
}

impl TxnManager {
    /// Creates a manager with the given lock mode and no log store.
    #[must_use]
    pub fn new(mode: LockManagerMode) -> Self {
        Self {
            mode,
            next_ts: AtomicU64::new(1),
            max_committed_ts: AtomicU64::new(0),
            directory: TableDirectory::new(),
            lock_table: LockTable::new(),
            log_store: None,
        }
    }

    /// Attaches a write-ahead log store; transaction lifecycle records are
    /// appended through it.
    #[must_use]
    pub fn with_log_store(mut self, log_store: Arc<LogStore>) -> Self {
        self.log_store = Some(log_store);
        self
    }

    /// Begins a transaction, appending a begin record for read-write
    /// transactions when a log store is attached.
    pub fn begin(&self, txn_type: TxnType) -> EmberResult<TxnContext<'_>> {
        let read_ts = match txn_type {
            TxnType::ReadWrite => self.alloc_ts(),
            TxnType::ReadOnly => self.max_committed_ts(),
        };
        TxnContext::start(self, txn_type, read_ts)
    }

    /// Issues the next monotone timestamp.
    pub fn alloc_ts(&self) -> TxnTs {
        TxnTs::new(self.next_ts.fetch_add(1, Ordering::AcqRel))
    }

    /// The largest committed timestamp observed so far, which is the
    /// snapshot point for read-only transactions.
    #[must_use]
    pub fn max_committed_ts(&self) -> TxnTs {
        TxnTs::new(self.max_committed_ts.load(Ordering::Acquire))
    }

    pub(crate) fn note_commit(&self, commit_ts: TxnTs) {
        self.max_committed_ts
            .fetch_max(commit_ts.as_u64(), Ordering::AcqRel);
    }

    /// The shared sub-table directory.
    #[must_use]
    pub fn directory(&self) -> &TableDirectory {
        &self.directory
    }

    /// The manager's lock mode.
    #[must_use]
    pub fn mode(&self) -> LockManagerMode {
        self.mode
    }

    pub(crate) fn lock_table(&self) -> &LockTable {
        &self.lock_table
    }

    pub(crate) fn log_store(&self) -> Option<&Arc<LogStore>> {
        self.log_store.as_ref()
    }
}
