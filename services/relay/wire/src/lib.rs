//! Wire protocol framing, receive reassembly, and relay marks.
//!
//! This crate provides the low-level wire format shared by the relay
//! connection manager and the relay server: a little-endian length prefix
//! followed by an opaque payload, a streaming reassembler that turns
//! arbitrary TCP read boundaries back into whole packets, and the 8-byte
//! marks the relay server uses to address clients.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | u32 length (LE)      | 1..=MAX_PACKET_SIZE        |
//! +----------------------+----------------------------+
//! | payload              | `length` bytes             |
//! +----------------------+----------------------------+
//! ```
//!
//! Relay server payloads add one more layer:
//!
//! ```text
//! registration:  [len = 8][mark (8B)]
//! forwarding:    [len >= 8][destination mark (8B)][payload]
//! delivery:      [len = payload len][payload]
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod frame;
pub mod mark;
pub mod reassembler;
pub mod relay;

// Re-export main types
pub use error::WireError;
pub use frame::{
    check_length, decode_length, encode_frame, encode_frame_into, encode_length, LENGTH_PREFIX_SIZE,
    MAX_PACKET_SIZE,
};
pub use mark::{Mark, MARK_SIZE};
pub use reassembler::FrameReassembler;
pub use relay::{forward_frame, registration_frame, split_forward};
