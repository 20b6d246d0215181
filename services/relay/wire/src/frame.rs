//! Length-prefix framing.
//!
//! Every frame on the wire is a 4-byte little-endian length followed by
//! exactly that many payload bytes. A length of zero or one above the
//! ceiling is a protocol violation.

use crate::WireError;
use bytes::{BufMut, Bytes, BytesMut};

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest payload either side accepts (1 MiB)
pub const MAX_PACKET_SIZE: u32 = 1024 * 1024;

/// Encode a payload length as a little-endian prefix
#[inline]
pub fn encode_length(len: u32) -> [u8; LENGTH_PREFIX_SIZE] {
    len.to_le_bytes()
}

/// Decode a little-endian length prefix
#[inline]
pub fn decode_length(prefix: [u8; LENGTH_PREFIX_SIZE]) -> u32 {
    u32::from_le_bytes(prefix)
}

/// Validate a declared frame length against `max`
pub fn check_length(len: u32, max: u32) -> Result<(), WireError> {
    if len == 0 || len > max {
        return Err(WireError::InvalidLength { len, max });
    }
    Ok(())
}

/// Append `[len][payload]` to `buf`
pub fn encode_frame_into(buf: &mut BytesMut, payload: &[u8]) -> Result<(), WireError> {
    let len = u32::try_from(payload.len()).map_err(|_| WireError::Oversize(payload.len()))?;
    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_slice(&encode_length(len));
    buf.put_slice(payload);
    Ok(())
}

/// Encode a payload into a standalone frame
pub fn encode_frame(payload: &[u8]) -> Result<Bytes, WireError> {
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    encode_frame_into(&mut buf, payload)?;
    Ok(buf.freeze())
}
