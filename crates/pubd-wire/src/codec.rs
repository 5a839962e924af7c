//! RFC 4251 scalar encoding
//!
//! Only two of the RFC 4251 data types are needed above the transport layer:
//! - `uint32`: 4 bytes, big-endian
//! - `string`: a `uint32` length followed by that many raw bytes
//!
//! Decoders operate on a cursor (`&mut &[u8]`). On success the cursor is
//! advanced past the decoded value. On failure it is left after whatever was
//! consumed safely: a short `uint32` consumes nothing, a `string` whose body is
//! shorter than its length prefix consumes only the prefix.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::WireError;

/// Size of an encoded `uint32`
pub const UINT32_SIZE: usize = 4;

/// Encode an RFC 4251 `uint32`
pub fn encode_uint32(v: u32) -> [u8; UINT32_SIZE] {
    v.to_be_bytes()
}

/// Append an RFC 4251 `uint32` to a buffer
pub fn put_uint32(dst: &mut BytesMut, v: u32) {
    dst.put_u32(v);
}

/// Append an RFC 4251 `string` to a buffer
pub fn put_string(dst: &mut BytesMut, s: &[u8]) -> Result<(), WireError> {
    let len = u32::try_from(s.len()).map_err(|_| WireError::TooLong(s.len()))?;
    dst.reserve(UINT32_SIZE + s.len());
    dst.put_u32(len);
    dst.put_slice(s);
    Ok(())
}

/// Decode an RFC 4251 `uint32`
///
/// Returns `None` and leaves the cursor untouched if fewer than 4 bytes remain.
pub fn decode_uint32(buf: &mut &[u8]) -> Option<u32> {
    if buf.len() < UINT32_SIZE {
        return None;
    }
    Some(buf.get_u32())
}

/// Decode an RFC 4251 `string`
///
/// Returns `None` if the length prefix is incomplete, or if fewer bytes follow
/// it than it announces. The length is compared against what is actually left
/// in the buffer, so a prefix of `0xFFFFFFFF` is simply a short read.
pub fn decode_string<'a>(buf: &mut &'a [u8]) -> Option<&'a [u8]> {
    let len = decode_uint32(buf)?;
    let data: &'a [u8] = buf;
    if (data.len() as u64) < u64::from(len) {
        return None;
    }
    let (value, rest) = data.split_at(len as usize);
    *buf = rest;
    Some(value)
}

/// Decode a payload consisting of a single UTF-8 `string`
///
/// Trailing bytes after the string are ignored, as most request payloads are
/// followed by fields the caller doesn't care about.
pub fn read_utf8_string(payload: &[u8]) -> Result<&str, WireError> {
    let mut buf = payload;
    let value = decode_string(&mut buf).ok_or(WireError::Truncated {
        what: "string",
        available: payload.len(),
    })?;
    Ok(std::str::from_utf8(value)?)
}
