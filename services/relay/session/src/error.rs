//! Error taxonomy for the peer API.

use thiserror::Error;

/// Errors returned by the connection manager and the API context
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum P2pError {
    /// Operation issued before `init` or after `shutdown`
    #[error("network not initialized")]
    NotInitialized,

    /// `init` called twice
    #[error("network already initialized")]
    AlreadyInitialized,

    /// Peer handle is the sentinel or unknown
    #[error("invalid peer")]
    InvalidPeer,

    /// Outbound connect failed (bad address, refused or timed out)
    #[error("connection failed")]
    ConnectionFailed,

    /// Peer not connected or hard socket error while sending
    #[error("send failed")]
    SendFailed,

    /// Packet larger than the caller's buffer
    #[error("buffer too small: packet is {needed} bytes, capacity {capacity}")]
    BufferTooSmall {
        /// Size of the queued packet
        needed: u32,
        /// Capacity offered by the caller
        capacity: usize,
    },

    /// Nothing queued for the requested peer
    #[error("no packet available")]
    NoPacket,

    /// Poller or socket could not be created
    #[error("socket error")]
    SocketError,

    /// Argument out of range
    #[error("invalid parameter")]
    InvalidParam,

    /// Listener could not be bound
    #[error("listen failed")]
    ListenFailed,
}

impl P2pError {
    /// Result code for a successful call at the foreign-call boundary
    pub const OK: i32 = 0;

    /// Stable integer code for this error at the foreign-call boundary
    pub fn code(&self) -> i32 {
        match self {
            P2pError::NotInitialized => -1,
            P2pError::AlreadyInitialized => -2,
            P2pError::InvalidPeer => -3,
            P2pError::ConnectionFailed => -4,
            P2pError::SendFailed => -5,
            P2pError::BufferTooSmall { .. } => -6,
            P2pError::NoPacket => -7,
            P2pError::SocketError => -8,
            P2pError::InvalidParam => -9,
            P2pError::ListenFailed => -10,
        }
    }
}

/// Collapse a result into its foreign-call code
pub fn result_code<T>(result: &Result<T, P2pError>) -> i32 {
    match result {
        Ok(_) => P2pError::OK,
        Err(e) => e.code(),
    }
}
