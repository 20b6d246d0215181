//! Streaming reassembly of length-prefixed frames.
//!
//! TCP delivers bytes with arbitrary boundaries. The reassembler buffers
//! whatever has arrived and hands back one complete payload at a time.

use crate::frame::{check_length, decode_length, LENGTH_PREFIX_SIZE};
use crate::WireError;
use bytes::{Buf, Bytes, BytesMut};
use tracing::debug;

/// Per-connection receive buffer that yields whole frames
#[derive(Debug)]
pub struct FrameReassembler {
    buf: BytesMut,
    max_packet_size: u32,
}

impl FrameReassembler {
    /// Create a reassembler enforcing `max_packet_size`
    pub fn new(max_packet_size: u32) -> Self {
        Self {
            buf: BytesMut::new(),
            max_packet_size,
        }
    }

    /// Append freshly received bytes
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Try to pull the next complete payload out of the buffer.
    ///
    /// Returns `Ok(None)` until a whole frame is buffered; call repeatedly
    /// after every [`append`](Self::append) until it does. A declared length
    /// outside `1..=max_packet_size` discards everything buffered and
    /// returns [`WireError::InvalidLength`]; the stream cannot be
    /// resynchronised past a corrupt prefix.
    pub fn try_extract_frame(&mut self) -> Result<Option<Bytes>, WireError> {
        if self.buf.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let len = decode_length([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        if let Err(e) = check_length(len, self.max_packet_size) {
            debug!("Discarding {} buffered bytes: {}", self.buf.len(), e);
            self.buf.clear();
            return Err(e);
        }

        let total = LENGTH_PREFIX_SIZE + len as usize;
        if self.buf.len() < total {
            return Ok(None);
        }

        self.buf.advance(LENGTH_PREFIX_SIZE);
        Ok(Some(self.buf.split_to(len as usize).freeze()))
    }

    /// Number of bytes buffered but not yet returned
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Drop all buffered bytes
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{encode_frame, encode_length, MAX_PACKET_SIZE};
    use proptest::prelude::*;

    fn drain(r: &mut FrameReassembler) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Some(packet) = r.try_extract_frame().unwrap() {
            out.push(packet);
        }
        out
    }

    #[test]
    fn test_partial_header_waits() {
        let mut r = FrameReassembler::new(MAX_PACKET_SIZE);
        r.append(&[5, 0]);
        assert_eq!(r.try_extract_frame().unwrap(), None);
        assert_eq!(r.buffered_len(), 2);
    }

    #[test]
    fn test_partial_payload_waits() {
        let mut r = FrameReassembler::new(MAX_PACKET_SIZE);
        r.append(&[5, 0, 0, 0, b'h', b'e']);
        assert_eq!(r.try_extract_frame().unwrap(), None);
        r.append(b"llo");
        assert_eq!(r.try_extract_frame().unwrap().as_deref(), Some(&b"hello"[..]));
        assert_eq!(r.buffered_len(), 0);
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let mut r = FrameReassembler::new(MAX_PACKET_SIZE);
        let mut wire = Vec::new();
        wire.extend_from_slice(&encode_frame(b"one").unwrap());
        wire.extend_from_slice(&encode_frame(b"two").unwrap());
        wire.extend_from_slice(&encode_length(3));
        r.append(&wire);

        let packets = drain(&mut r);
        assert_eq!(packets, vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]);
        assert_eq!(r.buffered_len(), 4);
    }

    #[test]
    fn test_zero_length_clears_buffer() {
        let mut r = FrameReassembler::new(MAX_PACKET_SIZE);
        r.append(&[0, 0, 0, 0, 1, 2, 3]);
        assert!(matches!(
            r.try_extract_frame(),
            Err(WireError::InvalidLength { len: 0, .. })
        ));
        assert_eq!(r.buffered_len(), 0);
    }

    #[test]
    fn test_oversize_length_clears_buffer() {
        let mut r = FrameReassembler::new(MAX_PACKET_SIZE);
        r.append(&encode_length(MAX_PACKET_SIZE + 1));
        r.append(&[0xAA; 16]);
        assert!(r.try_extract_frame().is_err());
        assert_eq!(r.buffered_len(), 0);

        // The stream is usable again once fresh, well-formed data arrives.
        r.append(&encode_frame(b"ok").unwrap());
        assert_eq!(r.try_extract_frame().unwrap().as_deref(), Some(&b"ok"[..]));
    }

    #[test]
    fn test_custom_ceiling() {
        let mut r = FrameReassembler::new(8);
        r.append(&encode_frame(&[1u8; 8]).unwrap());
        assert!(r.try_extract_frame().unwrap().is_some());
        r.append(&encode_frame(&[1u8; 9]).unwrap());
        assert!(r.try_extract_frame().is_err());
    }

    proptest! {
        #[test]
        fn prop_fragmentation_preserves_packets(
            payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..300), 1..20),
            cuts in prop::collection::vec(1usize..64, 1..200),
        ) {
            let mut wire = Vec::new();
            for p in &payloads {
                wire.extend_from_slice(&encode_frame(p).unwrap());
            }

            let mut r = FrameReassembler::new(MAX_PACKET_SIZE);
            let mut received = Vec::new();
            let mut offset = 0;
            let mut cut = cuts.iter().cycle();
            while offset < wire.len() {
                let step = (*cut.next().unwrap()).min(wire.len() - offset);
                r.append(&wire[offset..offset + step]);
                offset += step;
                while let Some(packet) = r.try_extract_frame().unwrap() {
                    received.push(packet.to_vec());
                }
            }

            prop_assert_eq!(received, payloads);
            prop_assert_eq!(r.buffered_len(), 0);
        }
    }
}
