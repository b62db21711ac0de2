//! Logical transaction timestamps.
//!
//! A [`TxnTs`] is a 64-bit logical time. Bit 63 is reserved as the intent
//! flag: a version whose timestamp carries the flag is an uncommitted write,
//! visible only to the transaction that owns it. The all-ones value is the
//! aborted sentinel used to tombstone intents whose transaction rolled back.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bit 63: set on versions written as uncommitted intents.
const LOCK_BIT: u64 = 1 << 63;

/// A logical transaction timestamp.
///
/// Timestamps are allocated monotonically by the transaction manager.
/// Committed versions carry a plain value; intents carry the same value with
/// the lock bit set, and finalization rewrites the intent to its commit
/// timestamp (or to [`TxnTs::ABORTED`]).
///
/// # Example
///
/// ```rust
/// use ember_common::types::TxnTs;
///
/// let ts = TxnTs::new(7);
/// let intent = ts.with_lock_bit();
/// assert!(intent.is_intent());
/// assert_eq!(intent.strip_lock_bit(), ts);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TxnTs(u64);

impl TxnTs {
    /// The zero timestamp, below every allocated timestamp.
    pub const ZERO: Self = Self(0);

    /// The largest committed timestamp value.
    pub const MAX: Self = Self(LOCK_BIT - 1);

    /// Sentinel marking a tombstoned intent. Its lock bit is set, so aborted
    /// versions stay invisible to every reader and are dropped by compaction.
    pub const ABORTED: Self = Self(u64::MAX);

    /// Creates a timestamp from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(ts: u64) -> Self {
        Self(ts)
    }

    /// Returns the raw 64-bit value, lock bit included.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true if the lock bit is set.
    #[inline]
    #[must_use]
    pub const fn is_intent(self) -> bool {
        self.0 & LOCK_BIT != 0
    }

    /// Returns true if this is the aborted sentinel.
    #[inline]
    #[must_use]
    pub const fn is_aborted(self) -> bool {
        self.0 == Self::ABORTED.0
    }

    /// Returns this timestamp with the lock bit set.
    #[inline]
    #[must_use]
    pub const fn with_lock_bit(self) -> Self {
        Self(self.0 | LOCK_BIT)
    }

    /// Returns this timestamp with the lock bit cleared.
    #[inline]
    #[must_use]
    pub const fn strip_lock_bit(self) -> Self {
        Self(self.0 & !LOCK_BIT)
    }

    /// Returns the next timestamp value.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Debug for TxnTs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_aborted() {
            write!(f, "TxnTs(ABORTED)")
        } else if self.is_intent() {
            write!(f, "TxnTs({}+intent)", self.strip_lock_bit().0)
        } else {
            write!(f, "TxnTs({})", self.0)
        }
    }
}

impl fmt::Display for TxnTs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_intent() {
            fmt::Debug::fmt(self, f)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<u64> for TxnTs {
    #[inline]
    fn from(ts: u64) -> Self {
        Self::new(ts)
    }
}

impl From<TxnTs> for u64 {
    #[inline]
    fn from(ts: TxnTs) -> Self {
        ts.0
    }
}
