//! Relay server settings.

use crate::ServerError;
use relay_wire::MAX_PACKET_SIZE;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default client cap
pub const DEFAULT_MAX_CONNECTIONS: usize = 4;

/// Configuration for a [`RelayServer`](crate::RelayServer)
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address to listen on
    pub listen_addr: SocketAddr,
    /// Maximum simultaneous clients; extra connections are closed on accept
    pub max_connections: usize,
    /// Largest frame accepted from a client
    pub max_packet_size: u32,
    /// Extra attempts after a short write before giving up on a frame
    pub write_retry_attempts: u32,
    /// Pause between write retries
    pub write_retry_delay: Duration,
    /// How often traffic statistics are logged
    pub stats_interval: Duration,
    /// Size of each client's read buffer
    pub read_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_packet_size: MAX_PACKET_SIZE,
            write_retry_attempts: 3,
            write_retry_delay: Duration::from_micros(100),
            stats_interval: Duration::from_secs(1),
            read_buffer_size: 64 * 1024,
        }
    }
}

impl ServerConfig {
    /// Default settings listening on `0.0.0.0:port`
    pub fn with_port(port: u16) -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            ..Self::default()
        }
    }

    /// Reject settings the server cannot run with
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.max_connections == 0 {
            return Err(ServerError::InvalidConfig(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.max_packet_size < 8 || self.max_packet_size > MAX_PACKET_SIZE {
            return Err(ServerError::InvalidConfig(format!(
                "max_packet_size must be within 8..={}",
                MAX_PACKET_SIZE
            )));
        }
        if self.stats_interval.is_zero() {
            return Err(ServerError::InvalidConfig(
                "stats_interval must be non-zero".to_string(),
            ));
        }
        if self.read_buffer_size == 0 {
            return Err(ServerError::InvalidConfig(
                "read_buffer_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
