//! Core type definitions.

mod lsn;
mod sort_key;
mod timestamps;

pub use lsn::{Lsn, LsnRange};
pub use sort_key::{Datum, SortKey};
pub use timestamps::TxnTs;
