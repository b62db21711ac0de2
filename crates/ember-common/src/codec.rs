//! Length-prefixed byte-string helpers.
//!
//! The WAL record format and the row encoding both store variable-length
//! fields as a little-endian u32 length followed by the raw bytes. The
//! prefix counts toward a record's LSN footprint.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{EmberError, EmberResult};

/// Bytes of overhead a length-prefixed field adds on top of its payload.
pub const LEN_PREFIX_SIZE: usize = 4;

/// Appends `data` to `buf` with a u32-LE length prefix.
pub fn put_len_prefixed(buf: &mut BytesMut, data: &[u8]) {
    debug_assert!(data.len() <= u32::MAX as usize);
    buf.put_u32_le(data.len() as u32);
    buf.put_slice(data);
}

/// Reads one length-prefixed field from `buf`.
pub fn get_len_prefixed(buf: &mut impl Buf) -> EmberResult<Bytes> {
    if buf.remaining() < LEN_PREFIX_SIZE {
        return Err(EmberError::corruption("truncated length prefix"));
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return Err(EmberError::corruption(format!(
            "field claims {len} bytes, {} remain",
            buf.remaining()
        )));
    }
    Ok(buf.copy_to_bytes(len))
}

/// Total encoded size of a length-prefixed field with `payload_len` bytes.
#[inline]
#[must_use]
pub const fn len_prefixed_size(payload_len: usize) -> usize {
    LEN_PREFIX_SIZE + payload_len
}
