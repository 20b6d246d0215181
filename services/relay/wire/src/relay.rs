//! Relay server payload helpers.
//!
//! A registration frame carries exactly one mark. A forwarding frame
//! carries the destination mark followed by the payload to deliver; the
//! server strips the mark and sends `[len][payload]` to the destination.

use crate::frame::encode_frame_into;
use crate::mark::{Mark, MARK_SIZE};
use crate::WireError;
use bytes::{Bytes, BytesMut};

/// Build `[8][mark]`
pub fn registration_frame(mark: Mark) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + MARK_SIZE);
    // A mark always fits in a frame.
    let _ = encode_frame_into(&mut buf, mark.as_bytes());
    buf.freeze()
}

/// Build `[8 + len][dest][payload]`
pub fn forward_frame(dest: Mark, payload: &[u8]) -> Result<Bytes, WireError> {
    let mut body = Vec::with_capacity(MARK_SIZE + payload.len());
    body.extend_from_slice(dest.as_bytes());
    body.extend_from_slice(payload);

    let mut buf = BytesMut::with_capacity(4 + body.len());
    encode_frame_into(&mut buf, &body)?;
    Ok(buf.freeze())
}

/// Split a forwarding payload into destination mark and remaining bytes.
///
/// Returns `None` when the payload is shorter than a mark.
pub fn split_forward(frame: &Bytes) -> Option<(Mark, Bytes)> {
    if frame.len() < MARK_SIZE {
        return None;
    }
    let dest = Mark::from_slice(&frame[..MARK_SIZE])?;
    Some((dest, frame.slice(MARK_SIZE..)))
}
