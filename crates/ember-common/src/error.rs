//! The unified EmberDB error surface.
//!
//! Every crate in the workspace reports failures through [`EmberError`] so
//! callers deal with a single status kind: reads signal absence with
//! [`EmberError::NotFound`], the write path surfaces [`EmberError::Conflict`]
//! and [`EmberError::Serialization`], and the log store maps file-system
//! failures to [`EmberError::Io`]. Commit versus abort is an outcome, not an
//! error, and lives with the transaction layer.

use std::io;
use thiserror::Error;

/// Result type for EmberDB operations.
pub type EmberResult<T> = Result<T, EmberError>;

/// Errors produced by the storage and transaction core.
#[derive(Debug, Error)]
pub enum EmberError {
    /// Key absent, or tombstoned at the requested read timestamp.
    #[error("key not found")]
    NotFound,

    /// An uncommitted intent from another transaction blocks this write.
    #[error("write conflict: {reason}")]
    Conflict {
        /// What the writer collided with.
        reason: String,
    },

    /// A write was attempted below an already-committed version.
    #[error("serialization failure: {reason}")]
    Serialization {
        /// Why the write ordering was rejected.
        reason: String,
    },

    /// I/O error from the durable store.
    #[error("i/o error: {source}")]
    Io {
        /// The underlying file-system error.
        #[from]
        source: io::Error,
    },

    /// Persistent state failed validation.
    #[error("corruption: {reason}")]
    Corruption {
        /// What failed to validate.
        reason: String,
    },

    /// The component has been shut down.
    #[error("store is closed")]
    Closed,

    /// A caller-supplied argument was rejected.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Which argument and why.
        reason: String,
    },

    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EmberError {
    /// Creates a conflict error.
    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::Serialization {
            reason: reason.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corruption(reason: impl Into<String>) -> Self {
        Self::Corruption {
            reason: reason.into(),
        }
    }

    /// Creates an invalid-argument error.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }

    /// Returns true if this is [`EmberError::NotFound`].
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Returns true if the caller may retry after backing off.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Serialization { .. })
    }
}
