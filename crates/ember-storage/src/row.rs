//! Row encoding and read views.
//!
//! A row is an opaque byte payload laid out in schema column order: integers
//! are stored with the same order-preserving encoding the sort key uses, and
//! strings are u32-LE length-prefixed. The sort key is derived by re-encoding
//! the leading `sort_key_count` column values.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use ember_common::codec;
use ember_common::error::{EmberError, EmberResult};
use ember_common::types::{Datum, SortKey, TxnTs};

use crate::schema::{Schema, ValueType};

/// An encoded row payload.
#[derive(Clone, PartialEq, Eq)]
pub struct Row(Bytes);

impl Row {
    /// Serializes a tuple of datums into a row.
    ///
    /// The datums must match the schema's columns in order, type and count.
    pub fn serialize(datums: &[Datum], schema: &Schema) -> EmberResult<Self> {
        if datums.len() != schema.column_count() {
            return Err(EmberError::invalid_argument(format!(
                "expected {} values, got {}",
                schema.column_count(),
                datums.len()
            )));
        }
        let mut buf = BytesMut::new();
        for (datum, column) in datums.iter().zip(schema.columns()) {
            match (datum, column.value_type) {
                (Datum::Int64(v), ValueType::Int64) => {
                    buf.put_slice(&((*v as u64) ^ (1 << 63)).to_be_bytes());
                }
                (Datum::Int32(v), ValueType::Int32) => {
                    buf.put_slice(&((*v as u32) ^ (1 << 31)).to_be_bytes());
                }
                (Datum::String(s), ValueType::String) => {
                    codec::put_len_prefixed(&mut buf, s);
                }
                (datum, expected) => {
                    return Err(EmberError::invalid_argument(format!(
                        "column {} expects {expected:?}, got {datum:?}",
                        column.id
                    )));
                }
            }
        }
        Ok(Self(buf.freeze()))
    }

    /// Wraps already-encoded row bytes.
    #[inline]
    #[must_use]
    pub const fn from_bytes(bytes: Bytes) -> Self {
        Self(bytes)
    }

    /// Returns the raw payload.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Projects the column with the given id.
    pub fn datum(&self, column_id: u32, schema: &Schema) -> EmberResult<Datum> {
        let (target, _) = schema
            .column_by_id(column_id)
            .ok_or_else(|| EmberError::invalid_argument(format!("unknown column {column_id}")))?;
        let mut buf = self.0.clone();
        for (pos, column) in schema.columns().enumerate() {
            let datum = Self::decode_column(&mut buf, column.value_type)?;
            if pos == target {
                return Ok(datum);
            }
        }
        unreachable!("column index validated above")
    }

    /// Derives the row's sort key from its leading sort columns.
    pub fn sort_key(&self, schema: &Schema) -> EmberResult<SortKey> {
        let mut buf = self.0.clone();
        let mut datums = Vec::with_capacity(schema.sort_key_count());
        for column in schema.columns().take(schema.sort_key_count()) {
            datums.push(Self::decode_column(&mut buf, column.value_type)?);
        }
        Ok(SortKey::encode(&datums))
    }

    fn decode_column(buf: &mut Bytes, value_type: ValueType) -> EmberResult<Datum> {
        match value_type {
            ValueType::Int64 => {
                if buf.remaining() < 8 {
                    return Err(EmberError::corruption("truncated int64 column"));
                }
                Ok(Datum::Int64((buf.get_u64() ^ (1 << 63)) as i64))
            }
            ValueType::Int32 => {
                if buf.remaining() < 4 {
                    return Err(EmberError::corruption("truncated int32 column"));
                }
                Ok(Datum::Int32((buf.get_u32() ^ (1 << 31)) as i32))
            }
            ValueType::String => Ok(Datum::String(codec::get_len_prefixed(buf)?)),
        }
    }
}

impl std::fmt::Debug for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Row({} bytes)", self.0.len())
    }
}

/// The result of a point read: the visible row and the timestamp of the
/// version that produced it.
#[derive(Debug, Clone)]
pub struct RowView {
    /// The visible row payload.
    pub row: Row,
    /// Timestamp of the version read (lock bit already stripped).
    pub ts: TxnTs,
}

impl RowView {
    /// Projects a column of the viewed row.
    pub fn datum(&self, column_id: u32, schema: &Schema) -> EmberResult<Datum> {
        self.row.datum(column_id, schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;

    fn test_schema() -> Schema {
        Schema::new(
            vec![
                Column {
                    id: 0,
                    name: "id".into(),
                    value_type: ValueType::Int64,
                },
                Column {
                    id: 1,
                    name: "kind".into(),
                    value_type: ValueType::Int32,
                },
                Column {
                    id: 2,
                    name: "value".into(),
                    value_type: ValueType::String,
                },
            ],
            0,
            2,
        )
        .unwrap()
    }

    #[test]
    fn test_round_trip() {
        let schema = test_schema();
        let row = Row::serialize(
            &[Datum::Int64(-5), Datum::Int32(3), Datum::string("hello")],
            &schema,
        )
        .unwrap();

        assert_eq!(row.datum(0, &schema).unwrap(), Datum::Int64(-5));
        assert_eq!(row.datum(1, &schema).unwrap(), Datum::Int32(3));
        assert_eq!(row.datum(2, &schema).unwrap(), Datum::string("hello"));
        assert!(row.datum(7, &schema).is_err());
    }

    #[test]
    fn test_sort_key_matches_direct_encoding() {
        let schema = test_schema();
        let row = Row::serialize(
            &[Datum::Int64(42), Datum::Int32(-1), Datum::string("x")],
            &schema,
        )
        .unwrap();
        let expected = SortKey::encode(&[Datum::Int64(42), Datum::Int32(-1)]);
        assert_eq!(row.sort_key(&schema).unwrap(), expected);
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let schema = test_schema();
        let result = Row::serialize(
            &[Datum::Int32(1), Datum::Int32(2), Datum::string("x")],
            &schema,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_arity_mismatch_rejected() {
        let schema = test_schema();
        assert!(Row::serialize(&[Datum::Int64(1)], &schema).is_err());
    }
}
