//! Sub-tables: named page containers.
//!
//! A sub-table is the unit of sharding the transaction layer addresses. It
//! owns the versioned page for its key range and, for the decentralized lock
//! mode, an advisory lock table scoped to itself.

use std::sync::Arc;

use ember_common::error::{EmberError, EmberResult};
use ember_common::sync::LockTable;
use ember_common::types::{SortKey, TxnTs};

use crate::options::Options;
use crate::page::VersionedPage;
use crate::row::{Row, RowView};

/// A named collection of versioned rows backed by one page.
pub struct SubTable {
    table_key: String,
    page: VersionedPage,
    lock_table: LockTable,
}

impl SubTable {
    /// Opens the sub-table named `table_key`.
    ///
    /// The `#` byte is reserved as the lock-key delimiter and is rejected in
    /// table keys.
    pub fn open(table_key: impl Into<String>, _opts: &Options) -> EmberResult<Arc<Self>> {
        let table_key = table_key.into();
        if table_key.contains('#') {
            return Err(EmberError::invalid_argument(
                "sub-table keys must not contain '#'",
            ));
        }
        Ok(Arc::new(Self {
            table_key,
            page: VersionedPage::new(),
            lock_table: LockTable::new(),
        }))
    }

    /// Returns the sub-table's name.
    #[must_use]
    pub fn table_key(&self) -> &str {
        &self.table_key
    }

    /// Inserts or updates a row at `ts`.
    pub fn set_row(&self, row: Row, ts: TxnTs, opts: &Options) -> EmberResult<()> {
        self.page.set_row(row, ts, opts)
    }

    /// Deletes the row with `sort_key` at `ts`.
    pub fn delete_row(&self, sort_key: SortKey, ts: TxnTs, opts: &Options) -> EmberResult<()> {
        self.page.delete_row(sort_key, ts, opts)
    }

    /// Point lookup at `read_ts`.
    pub fn get_row(
        &self,
        sort_key: &SortKey,
        read_ts: TxnTs,
        opts: &Options,
    ) -> EmberResult<RowView> {
        self.page.get_row(sort_key, read_ts, opts)
    }

    /// Finalizes the caller's intent on `sort_key`.
    pub fn set_ts(&self, sort_key: &SortKey, new_ts: TxnTs, opts: &Options) -> EmberResult<()> {
        self.page.set_ts(sort_key, new_ts, opts)
    }

    /// The sub-table-scoped advisory lock table (decentralized lock mode).
    #[must_use]
    pub fn lock_table(&self) -> &LockTable {
        &self.lock_table
    }

    /// Observational: current delta chain length of the backing page.
    #[must_use]
    pub fn delta_chain_len(&self) -> usize {
        self.page.delta_chain_len()
    }
}
