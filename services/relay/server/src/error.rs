//! Relay server error types.

use std::net::SocketAddr;
use thiserror::Error;

/// Errors surfaced by the relay server
#[derive(Error, Debug)]
pub enum ServerError {
    /// Listening socket could not be set up
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind
        addr: SocketAddr,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// Other I/O failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
