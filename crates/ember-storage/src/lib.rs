//! # ember-storage
//!
//! The versioned page engine of EmberDB.
//!
//! A [`VersionedPage`] holds the multi-version state of one key range:
//! writers prepend delta records to a newest-first chain, readers walk the
//! chain lock-free filtering by timestamp, and an inline compactor folds a
//! long chain into an immutable sorted base. A [`SubTable`] names a page and
//! forwards row operations to it.
//!
//! Row payloads are opaque bytes decoded through a [`Schema`]; the leading
//! `sort_key_count` columns order rows within a page.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod delta;
mod options;
mod page;
mod row;
mod schema;
mod subtable;

pub use delta::DeltaOp;
pub use options::Options;
pub use page::VersionedPage;
pub use row::{Row, RowView};
pub use schema::{Column, Schema, ValueType};
pub use subtable::SubTable;
