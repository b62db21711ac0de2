//! # ember-common
//!
//! Common types, errors, and utilities for EmberDB.
//!
//! This crate provides the foundational pieces shared by all EmberDB
//! components:
//!
//! - **Types**: logical timestamps (`TxnTs`), log sequence numbers (`Lsn`),
//!   column values (`Datum`), and order-preserving sort keys (`SortKey`)
//! - **Errors**: the unified [`EmberError`] status surface
//! - **Codec**: length-prefixed byte-string helpers for on-disk records
//! - **Sync**: a counted [`WaitGroup`](sync::WaitGroup) and a keyed advisory
//!   [`LockTable`](sync::LockTable)
//!
//! ## Example
//!
//! ```rust
//! use ember_common::types::{Datum, SortKey, TxnTs};
//! use ember_common::error::EmberResult;
//!
//! fn example() -> EmberResult<()> {
//!     let ts = TxnTs::new(42);
//!     assert!(!ts.is_intent());
//!     let key = SortKey::encode(&[Datum::Int64(7), Datum::Int32(0)]);
//!     assert!(!key.as_bytes().is_empty());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod constants;
pub mod error;
pub mod sync;
pub mod types;

pub use error::{EmberError, EmberResult};
pub use types::{Datum, Lsn, LsnRange, SortKey, TxnTs};
