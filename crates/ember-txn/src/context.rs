//! The OCC transaction context.
//!
//! A read-write context buffers writes in a local write set and records the
//! version it observed for every real-table read. Commit runs four phases:
//!
//! 1. write every buffered change as an intent at `read_ts | lock-bit`,
//!    undoing written intents if any write is refused;
//! 2. draw a commit timestamp;
//! 3. re-read the read set at the commit timestamp and compare observed
//!    versions;
//! 4. finalize every intent to the commit timestamp with a single store
//!    per key.
//!
//! Advisory locks (when the lock mode uses them) are released on every exit
//! path, and a failed commit leaves no intent behind: each one is flipped to
//! the aborted sentinel.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{info, warn};

use ember_common::error::{EmberError, EmberResult};
use ember_common::types::{Lsn, SortKey, TxnTs};
use ember_storage::{Options, Row, RowView, SubTable};
use ember_wal::TxnLogWriter;

use crate::manager::{LockManagerMode, TxnManager, TxnType};

/// How a transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnOutcome {
    /// Every buffered write is committed at the carried timestamp.
    Committed(TxnTs),
    /// The transaction rolled back; the store is logically unchanged.
    Aborted,
}

impl TxnOutcome {
    /// Returns true for a commit.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }

    /// Returns true for an abort.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

type ItemKey = (String, SortKey);

/// A transaction over the sub-tables of one [`TxnManager`].
pub struct TxnContext<'a> {
    manager: &'a TxnManager,
    txn_type: TxnType,
    read_ts: TxnTs,
    commit_ts: Option<TxnTs>,
    /// Buffered writes, last-writer-wins per key; `None` stages a delete.
    write_set: BTreeMap<ItemKey, Option<Row>>,
    /// Versions observed on real tables; `None` records observed-not-found.
    read_set: HashMap<ItemKey, Option<TxnTs>>,
    /// Advisory lock keys held by this transaction.
    lock_set: HashSet<Bytes>,
    /// Sub-tables this context has touched.
    tables: HashMap<String, Arc<SubTable>>,
    /// High-water mark of this transaction's WAL records.
    lsn: Lsn,
}

impl<'a> TxnContext<'a> {
    pub(crate) fn start(
        manager: &'a TxnManager,
        txn_type: TxnType,
        read_ts: TxnTs,
    ) -> EmberResult<Self> {
        let mut ctx = Self {
            manager,
            txn_type,
            read_ts,
            commit_ts: None,
            write_set: BTreeMap::new(),
            read_set: HashMap::new(),
            lock_set: HashSet::new(),
            tables: HashMap::new(),
            lsn: Lsn::ZERO,
        };
        if txn_type == TxnType::ReadWrite {
            ctx.append_txn_record(|writer| writer.begin(read_ts))?;
        }
        Ok(ctx)
    }

    /// The transaction's read timestamp.
    #[must_use]
    pub fn read_ts(&self) -> TxnTs {
        self.read_ts
    }

    /// The commit timestamp, once one has been drawn.
    #[must_use]
    pub fn commit_ts(&self) -> Option<TxnTs> {
        self.commit_ts
    }

    /// End LSN of this transaction's newest WAL record. Callers wait on the
    /// log store for this LSN before acknowledging a commit as durable.
    #[must_use]
    pub fn lsn(&self) -> Lsn {
        self.lsn
    }

    /// Stages an insert or update of `row` in `table_key`.
    pub fn set_row(&mut self, table_key: &str, row: Row, opts: &Options) -> EmberResult<()> {
        self.check_writable()?;
        let sort_key = row.sort_key(&opts.schema)?;
        self.acquire_lock(table_key, &sort_key, opts)?;
        self.write_set
            .insert((table_key.to_string(), sort_key), Some(row));
        Ok(())
    }

    /// Stages a delete of `sort_key` in `table_key`.
    pub fn delete_row(
        &mut self,
        table_key: &str,
        sort_key: SortKey,
        opts: &Options,
    ) -> EmberResult<()> {
        self.check_writable()?;
        self.acquire_lock(table_key, &sort_key, opts)?;
        self.write_set.insert((table_key.to_string(), sort_key), None);
        Ok(())
    }

    /// Reads `sort_key` from `table_key` at the transaction's snapshot.
    ///
    /// Read-write transactions see their own staged writes first; reads that
    /// reach the real table record the observed version for commit-time
    /// validation.
    pub fn get_row(
        &mut self,
        table_key: &str,
        sort_key: &SortKey,
        opts: &Options,
    ) -> EmberResult<RowView> {
        let table = self.table(table_key, opts)?;
        if self.txn_type == TxnType::ReadOnly {
            return table.get_row(sort_key, self.read_ts, opts);
        }

        let item = (table_key.to_string(), sort_key.clone());
        if let Some(staged) = self.write_set.get(&item) {
            return match staged {
                Some(row) => Ok(RowView {
                    row: row.clone(),
                    ts: self.read_ts,
                }),
                None => Err(EmberError::NotFound),
            };
        }

        match table.get_row(sort_key, self.read_ts, opts) {
            Ok(view) => {
                self.read_set.insert(item, Some(view.ts));
                Ok(view)
            }
            Err(err) if err.is_not_found() => {
                self.read_set.insert(item, None);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Runs the commit protocol, or returns immediately for a read-only
    /// transaction. Advisory locks are released whatever the outcome, and an
    /// abort leaves no intent behind.
    pub fn commit_or_abort(&mut self, opts: &Options) -> EmberResult<TxnOutcome> {
        if self.txn_type == TxnType::ReadOnly {
            return Ok(TxnOutcome::Committed(self.read_ts));
        }

        let outcome = self.run_commit(opts);
        self.release_locks();

        let read_ts = self.read_ts;
        match &outcome {
            Ok(TxnOutcome::Committed(commit_ts)) => {
                let commit_ts = *commit_ts;
                self.append_txn_record(|writer| writer.commit(read_ts, commit_ts))?;
            }
            _ => {
                self.append_txn_record(|writer| writer.abort(read_ts))?;
            }
        }
        outcome
    }

    fn run_commit(&mut self, opts: &Options) -> EmberResult<TxnOutcome> {
        if let Err(err) = self.write_intents(opts) {
            info!(read_ts = %self.read_ts, %err, "failed to write intents");
            return Ok(TxnOutcome::Aborted);
        }

        let commit_ts = self.manager.alloc_ts();
        self.commit_ts = Some(commit_ts);

        match self.validate_reads(commit_ts, opts) {
            Ok(true) => {}
            Ok(false) => {
                info!(
                    read_ts = %self.read_ts,
                    %commit_ts,
                    "read validation failed"
                );
                self.abort_intents(opts);
                return Ok(TxnOutcome::Aborted);
            }
            Err(err) => {
                self.abort_intents(opts);
                return Err(err);
            }
        }

        self.finalize_intents(commit_ts, opts)?;
        self.manager.note_commit(commit_ts);
        Ok(TxnOutcome::Committed(commit_ts))
    }

    /// Phase 1: stage every buffered write as an intent. On refusal, flip
    /// the intents written so far to aborted and bail.
    fn write_intents(&mut self, opts: &Options) -> EmberResult<()> {
        let table_keys: Vec<String> = self
            .write_set
            .keys()
            .map(|(table_key, _)| table_key.clone())
            .collect();
        for table_key in &table_keys {
            self.table(table_key, opts)?;
        }

        let intent_opts = opts
            .clone()
            .with_check_intent_locked(self.manager.mode() == LockManagerMode::Inlined)
            .with_owner_ts(Some(self.read_ts));
        let owner_opts = opts.clone().with_owner_ts(Some(self.read_ts));
        let intent_ts = self.read_ts.with_lock_bit();

        let mut written: Vec<&ItemKey> = Vec::new();
        for (item, value) in &self.write_set {
            let (table_key, sort_key) = item;
            let table = self
                .tables
                .get(table_key)
                .ok_or_else(|| EmberError::internal("table vanished from context cache"))?;
            let result = match value {
                Some(row) => table.set_row(row.clone(), intent_ts, &intent_opts),
                None => table.delete_row(sort_key.clone(), intent_ts, &intent_opts),
            };
            if let Err(err) = result {
                for (undo_table, undo_key) in written.iter().copied() {
                    let table = &self.tables[undo_table];
                    if let Err(undo_err) = table.set_ts(undo_key, TxnTs::ABORTED, &owner_opts) {
                        warn!(%undo_err, "failed to revert intent");
                    }
                }
                return Err(err);
            }
            written.push(item);
        }
        Ok(())
    }

    /// Phase 3: re-read every observed key at the commit timestamp.
    ///
    /// The re-read skips intents, including this transaction's own, so
    /// observations are compared against committed history only.
    fn validate_reads(&self, commit_ts: TxnTs, opts: &Options) -> EmberResult<bool> {
        let read_opts = opts.clone().with_owner_ts(None);
        for (item, expected) in &self.read_set {
            let (table_key, sort_key) = item;
            let table = self.cached_or_open(table_key, opts)?;
            match (expected, table.get_row(sort_key, commit_ts, &read_opts)) {
                (Some(expected_ts), Ok(view)) if view.ts == *expected_ts => {}
                (None, Err(err)) if err.is_not_found() => {}
                (_, Err(err)) if !err.is_not_found() => return Err(err),
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Phase 4: flip every intent to the commit timestamp.
    fn finalize_intents(&self, commit_ts: TxnTs, opts: &Options) -> EmberResult<()> {
        let owner_opts = opts.clone().with_owner_ts(Some(self.read_ts));
        for (table_key, sort_key) in self.write_set.keys() {
            let table = self.cached_or_open(table_key, opts)?;
            table.set_ts(sort_key, commit_ts, &owner_opts)?;
        }
        Ok(())
    }

    /// Abort path: tombstone every intent this transaction wrote.
    fn abort_intents(&self, opts: &Options) {
        let owner_opts = opts.clone().with_owner_ts(Some(self.read_ts));
        for (table_key, sort_key) in self.write_set.keys() {
            let Ok(table) = self.cached_or_open(table_key, opts) else {
                continue;
            };
            if let Err(err) = table.set_ts(sort_key, TxnTs::ABORTED, &owner_opts) {
                warn!(%err, "failed to abort intent");
            }
        }
    }

    fn check_writable(&self) -> EmberResult<()> {
        if self.txn_type == TxnType::ReadOnly {
            return Err(EmberError::invalid_argument(
                "read-only transaction cannot write",
            ));
        }
        Ok(())
    }

    /// Acquires the advisory lock for a write key, according to the lock
    /// mode. Lock keys are `<table_key> '#' <sort-key bytes>`, which is why
    /// `#` is reserved.
    fn acquire_lock(
        &mut self,
        table_key: &str,
        sort_key: &SortKey,
        opts: &Options,
    ) -> EmberResult<()> {
        if self.manager.mode() == LockManagerMode::Inlined {
            return Ok(());
        }
        if table_key.contains('#') {
            return Err(EmberError::invalid_argument(
                "sub-table keys must not contain '#'",
            ));
        }
        let mut key = BytesMut::with_capacity(table_key.len() + 1 + sort_key.len());
        key.put_slice(table_key.as_bytes());
        key.put_u8(b'#');
        key.put_slice(sort_key.as_bytes());
        let lock_key = key.freeze();

        if self.lock_set.contains(&lock_key) {
            return Ok(());
        }
        match self.manager.mode() {
            LockManagerMode::Centralized => {
                self.manager
                    .lock_table()
                    .lock(lock_key.clone(), self.read_ts)?;
            }
            LockManagerMode::Decentralized => {
                let table = self.table(table_key, opts)?;
                table.lock_table().lock(lock_key.clone(), self.read_ts)?;
            }
            LockManagerMode::Inlined => unreachable!("handled above"),
        }
        self.lock_set.insert(lock_key);
        Ok(())
    }

    fn release_locks(&mut self) {
        let locks = std::mem::take(&mut self.lock_set);
        match self.manager.mode() {
            LockManagerMode::Inlined => {}
            LockManagerMode::Centralized => {
                for key in locks {
                    if let Err(err) = self.manager.lock_table().unlock(&key, self.read_ts) {
                        warn!(%err, "failed to release lock");
                    }
                }
            }
            LockManagerMode::Decentralized => {
                for key in locks {
                    let Some(pos) = key.iter().position(|&b| b == b'#') else {
                        continue;
                    };
                    let Ok(table_key) = std::str::from_utf8(&key[..pos]) else {
                        continue;
                    };
                    let Some(table) = self.tables.get(table_key) else {
                        continue;
                    };
                    if let Err(err) = table.lock_table().unlock(&key, self.read_ts) {
                        warn!(%err, "failed to release lock");
                    }
                }
            }
        }
    }

    /// Returns the sub-table, caching the handle on this context.
    fn table(&mut self, table_key: &str, opts: &Options) -> EmberResult<Arc<SubTable>> {
        if let Some(table) = self.tables.get(table_key) {
            return Ok(Arc::clone(table));
        }
        let table = self.manager.directory().get_or_open(table_key, opts)?;
        self.tables.insert(table_key.to_string(), Arc::clone(&table));
        Ok(table)
    }

    /// Like [`Self::table`] but usable from `&self` paths; skips caching
    /// when the handle is not already present.
    fn cached_or_open(&self, table_key: &str, opts: &Options) -> EmberResult<Arc<SubTable>> {
        if let Some(table) = self.tables.get(table_key) {
            return Ok(Arc::clone(table));
        }
        self.manager.directory().get_or_open(table_key, opts)
    }

    /// Appends one batch of transaction records through the WAL, folding the
    /// returned end LSN into this context's durability mark.
    fn append_txn_record(
        &mut self,
        build: impl FnOnce(&mut TxnLogWriter),
    ) -> EmberResult<()> {
        let Some(store) = self.manager.log_store() else {
            return Ok(());
        };
        let mut writer = TxnLogWriter::new();
        build(&mut writer);
        let ranges = store.append_log_record(&writer.into_records())?;
        for range in ranges {
            if range.end > self.lsn {
                self.lsn = range.end;
            }
        }
        Ok(())
    }
}
