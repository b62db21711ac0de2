//! Delta records for the versioned page chain.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use ember_common::types::SortKey;

use crate::row::Row;

/// The operation a delta record applies to its sort key.
#[derive(Debug, Clone)]
pub enum DeltaOp {
    /// Insert or update the row.
    Put(Row),
    /// Remove the key.
    Delete,
}

impl DeltaOp {
    /// Returns true for a delete record.
    #[must_use]
    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete)
    }

    /// Returns the row of a put record.
    #[must_use]
    pub fn row(&self) -> Option<&Row> {
        match self {
            Self::Put(row) => Some(row),
            Self::Delete => None,
        }
    }
}

/// One node of the newest-first delta chain.
///
/// The timestamp is atomic because intent finalization rewrites it in place
/// with a single release store while readers walk the chain lock-free.
/// Everything else is immutable once the node is published.
pub(crate) struct DeltaNode {
    pub(crate) sort_key: SortKey,
    pub(crate) ts: AtomicU64,
    pub(crate) op: DeltaOp,
    pub(crate) next: Option<Arc<DeltaNode>>,
}
