//! Column values and order-preserving sort keys.
//!
//! A [`SortKey`] is the encoded tuple of a row's leading sort columns. The
//! encoding is order-preserving: comparing two encoded keys byte-wise gives
//! the same result as comparing the underlying tuples column by column.
//! Integers are stored sign-flipped big-endian; strings are appended raw with
//! a NUL terminator (sort-key strings therefore must not contain NUL bytes).

use bytes::{BufMut, Bytes, BytesMut};
use std::cmp::Ordering;
use std::fmt;

/// An owned column value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datum {
    /// 64-bit signed integer.
    Int64(i64),
    /// 32-bit signed integer.
    Int32(i32),
    /// Variable-length byte string.
    String(Bytes),
}

impl Datum {
    /// Creates a string datum from UTF-8 text.
    #[must_use]
    pub fn string(s: &str) -> Self {
        Self::String(Bytes::copy_from_slice(s.as_bytes()))
    }

    /// Appends the order-preserving encoding of this value to `buf`.
    pub fn encode_ordered(&self, buf: &mut BytesMut) {
        match self {
            Datum::Int64(v) => buf.put_slice(&((*v as u64) ^ (1 << 63)).to_be_bytes()),
            Datum::Int32(v) => buf.put_slice(&((*v as u32) ^ (1 << 31)).to_be_bytes()),
            Datum::String(s) => {
                debug_assert!(!s.contains(&0), "sort-key strings must not contain NUL");
                buf.put_slice(s);
                buf.put_u8(0);
            }
        }
    }
}

/// The ordering prefix of a row, encoded so that byte-wise comparison matches
/// tuple comparison.
///
/// # Example
///
/// ```rust
/// use ember_common::types::{Datum, SortKey};
///
/// let a = SortKey::encode(&[Datum::Int64(-1), Datum::Int32(0)]);
/// let b = SortKey::encode(&[Datum::Int64(2), Datum::Int32(0)]);
/// assert!(a < b);
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SortKey(Bytes);

impl SortKey {
    /// Encodes a tuple of datums into a sort key.
    #[must_use]
    pub fn encode(datums: &[Datum]) -> Self {
        let mut buf = BytesMut::new();
        for datum in datums {
            datum.encode_ordered(&mut buf);
        }
        Self(buf.freeze())
    }

    /// Wraps already-encoded key bytes.
    #[inline]
    #[must_use]
    pub const fn from_encoded(bytes: Bytes) -> Self {
        Self(bytes)
    }

    /// Returns the encoded key bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the underlying `Bytes`.
    #[inline]
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Length of the encoded key in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the empty key.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Ord for SortKey {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for SortKey {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SortKey(0x")?;
        for byte in self.0.iter().take(32) {
            write!(f, "{byte:02x}")?;
        }
        if self.0.len() > 32 {
            write!(f, "...")?;
        }
        write!(f, ")")
    }
}
