//! Column schemas.
//!
//! A schema names the columns of a sub-table and fixes how many leading
//! columns form the sort key. Row encoding and projection go through it.

use std::collections::HashMap;

use smallvec::SmallVec;

use ember_common::error::{EmberError, EmberResult};

/// Columns a schema typically holds without spilling to the heap.
const INLINE_COLUMNS: usize = 8;

/// The type of a column value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    /// 64-bit signed integer.
    Int64,
    /// 32-bit signed integer.
    Int32,
    /// Variable-length byte string.
    String,
}

/// A single column definition.
#[derive(Debug, Clone)]
pub struct Column {
    /// Stable column identifier used for projection.
    pub id: u32,
    /// Human-readable name.
    pub name: String,
    /// Value type of the column.
    pub value_type: ValueType,
}

/// An ordered set of columns plus the sort-key prefix length.
#[derive(Debug, Clone)]
pub struct Schema {
    columns: SmallVec<[Column; INLINE_COLUMNS]>,
    schema_id: u32,
    sort_key_count: usize,
    // column id -> positional index
    index: HashMap<u32, usize>,
}

impl Schema {
    /// Builds a schema from its columns.
    ///
    /// Fails when `sort_key_count` exceeds the column count or a column id
    /// repeats.
    pub fn new(
        columns: impl IntoIterator<Item = Column>,
        schema_id: u32,
        sort_key_count: usize,
    ) -> EmberResult<Self> {
        let columns: SmallVec<[Column; INLINE_COLUMNS]> = columns.into_iter().collect();
        if sort_key_count == 0 || sort_key_count > columns.len() {
            return Err(EmberError::invalid_argument(format!(
                "sort_key_count {sort_key_count} out of range for {} columns",
                columns.len()
            )));
        }
        let mut index = HashMap::with_capacity(columns.len());
        for (pos, column) in columns.iter().enumerate() {
            if index.insert(column.id, pos).is_some() {
                return Err(EmberError::invalid_argument(format!(
                    "duplicate column id {}",
                    column.id
                )));
            }
        }
        Ok(Self {
            columns,
            schema_id,
            sort_key_count,
            index,
        })
    }

    /// Returns the schema identifier.
    #[inline]
    #[must_use]
    pub fn schema_id(&self) -> u32 {
        self.schema_id
    }

    /// Number of leading columns that form the sort key.
    #[inline]
    #[must_use]
    pub fn sort_key_count(&self) -> usize {
        self.sort_key_count
    }

    /// Total number of columns.
    #[inline]
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Returns the column at positional `index`.
    #[must_use]
    pub fn column_at(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    /// Looks a column up by its stable id.
    #[must_use]
    pub fn column_by_id(&self, id: u32) -> Option<(usize, &Column)> {
        self.index.get(&id).map(|&pos| (pos, &self.columns[pos]))
    }

    /// Iterates the columns in positional order.
    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter()
    }
}
