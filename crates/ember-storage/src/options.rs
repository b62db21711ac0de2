//! Per-operation options for page and sub-table calls.

use std::sync::Arc;

use ember_common::types::TxnTs;

use crate::schema::Schema;

/// Options recognised by page and sub-table operations.
///
/// Carries the schema required for row decode plus the knobs the write and
/// read paths consult. Cloning is cheap; the schema is shared.
#[derive(Clone)]
pub struct Options {
    /// Schema of the rows flowing through the operation.
    pub schema: Arc<Schema>,
    /// Skip inline compaction on the write path.
    pub disable_compaction: bool,
    /// Make foreign intents readable at their masked timestamp (diagnostics).
    pub ignore_lock: bool,
    /// Enforce the inline intent-conflict and write-order checks on writes.
    pub check_intent_locked: bool,
    /// Intents whose timestamp equals `owner_ts | lock-bit` are treated as
    /// owned by the caller.
    pub owner_ts: Option<TxnTs>,
}

impl Options {
    /// Creates default options for the given schema.
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            disable_compaction: false,
            ignore_lock: false,
            check_intent_locked: false,
            owner_ts: None,
        }
    }

    /// Sets whether inline compaction is skipped.
    #[must_use]
    pub fn with_disable_compaction(mut self, disable: bool) -> Self {
        self.disable_compaction = disable;
        self
    }

    /// Sets whether foreign intents are readable.
    #[must_use]
    pub fn with_ignore_lock(mut self, ignore: bool) -> Self {
        self.ignore_lock = ignore;
        self
    }

    /// Sets whether writes run the inline intent checks.
    #[must_use]
    pub fn with_check_intent_locked(mut self, check: bool) -> Self {
        self.check_intent_locked = check;
        self
    }

    /// Sets the timestamp whose intents the caller owns.
    #[must_use]
    pub fn with_owner_ts(mut self, owner_ts: Option<TxnTs>) -> Self {
        self.owner_ts = owner_ts;
        self
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("schema_id", &self.schema.schema_id())
            .field("disable_compaction", &self.disable_compaction)
            .field("ignore_lock", &self.ignore_lock)
            .field("check_intent_locked", &self.check_intent_locked)
            .field("owner_ts", &self.owner_ts)
            .finish()
    }
}
