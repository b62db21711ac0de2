//! Transaction log records.
//!
//! The OCC layer persists one record per transaction lifecycle event. Each
//! record is a tag byte followed by its timestamps; the store adds the
//! length prefix when the record is appended.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use ember_common::error::{EmberError, EmberResult};
use ember_common::types::TxnTs;

const TAG_BEGIN: u8 = 1;
const TAG_COMMIT: u8 = 2;
const TAG_ABORT: u8 = 3;

/// A transaction lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnLogRecord {
    /// Transaction started.
    Begin {
        /// The transaction's read timestamp.
        read_ts: TxnTs,
    },
    /// Transaction committed.
    Commit {
        /// The transaction's read timestamp.
        read_ts: TxnTs,
        /// The timestamp its writes committed at.
        commit_ts: TxnTs,
    },
    /// Transaction rolled back.
    Abort {
        /// The transaction's read timestamp.
        read_ts: TxnTs,
    },
}

impl TxnLogRecord {
    /// Encodes the record into its wire form.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(17);
        match self {
            Self::Begin { read_ts } => {
                buf.put_u8(TAG_BEGIN);
                buf.put_u64_le(read_ts.as_u64());
            }
            Self::Commit { read_ts, commit_ts } => {
                buf.put_u8(TAG_COMMIT);
                buf.put_u64_le(read_ts.as_u64());
                buf.put_u64_le(commit_ts.as_u64());
            }
            Self::Abort { read_ts } => {
                buf.put_u8(TAG_ABORT);
                buf.put_u64_le(read_ts.as_u64());
            }
        }
        buf.freeze()
    }

    /// Decodes a record from its wire form.
    pub fn decode(mut buf: impl Buf) -> EmberResult<Self> {
        if buf.remaining() < 9 {
            return Err(EmberError::corruption("truncated txn record"));
        }
        let tag = buf.get_u8();
        let read_ts = TxnTs::new(buf.get_u64_le());
        match tag {
            TAG_BEGIN => Ok(Self::Begin { read_ts }),
            TAG_COMMIT => {
                if buf.remaining() < 8 {
                    return Err(EmberError::corruption("truncated commit record"));
                }
                Ok(Self::Commit {
                    read_ts,
                    commit_ts: TxnTs::new(buf.get_u64_le()),
                })
            }
            TAG_ABORT => Ok(Self::Abort { read_ts }),
            other => Err(EmberError::corruption(format!(
                "unknown txn record tag {other}"
            ))),
        }
    }
}

/// Accumulates encoded records for one `append_log_record` batch.
#[derive(Default)]
pub struct TxnLogWriter {
    records: Vec<Bytes>,
}

impl TxnLogWriter {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a begin record.
    pub fn begin(&mut self, read_ts: TxnTs) {
        self.records.push(TxnLogRecord::Begin { read_ts }.encode());
    }

    /// Stages a commit record.
    pub fn commit(&mut self, read_ts: TxnTs, commit_ts: TxnTs) {
        self.records
            .push(TxnLogRecord::Commit { read_ts, commit_ts }.encode());
    }

    /// Stages an abort record.
    pub fn abort(&mut self, read_ts: TxnTs) {
        self.records.push(TxnLogRecord::Abort { read_ts }.encode());
    }

    /// Returns true when nothing has been staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Consumes the writer, yielding the staged records.
    #[must_use]
    pub fn into_records(self) -> Vec<Bytes> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let records = [
            TxnLogRecord::Begin {
                read_ts: TxnTs::new(10),
            },
            TxnLogRecord::Commit {
                read_ts: TxnTs::new(10),
                commit_ts: TxnTs::new(12),
            },
            TxnLogRecord::Abort {
                read_ts: TxnTs::new(11),
            },
        ];
        for record in records {
            let encoded = record.encode();
            assert_eq!(TxnLogRecord::decode(encoded).unwrap(), record);
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(TxnLogRecord::decode(&[0u8; 2][..]).is_err());
        assert!(TxnLogRecord::decode(&[9u8, 0, 0, 0, 0, 0, 0, 0, 0][..]).is_err());
    }

    #[test]
    fn test_writer_accumulates() {
        let mut writer = TxnLogWriter::new();
        assert!(writer.is_empty());
        writer.begin(TxnTs::new(1));
        writer.commit(TxnTs::new(1), TxnTs::new(2));
        let records = writer.into_records();
        assert_eq!(records.len(), 2);
    }
}
