//! Non-blocking peer connections with framing, queuing and auto-reconnect.
//!
//! This crate provides the embedded side of the relay protocol: a
//! connection manager that keeps several inbound and outbound TCP peers,
//! frames outgoing packets, reassembles incoming ones into per-peer queues,
//! and reconnects dropped peers with capped exponential backoff.
//!
//! ## Features
//!
//! - **Cooperative pump**: one zero-timeout readiness pass per
//!   `process_events` call, no background threads required
//! - **Ordered sends**: partial writes are buffered and flushed in order
//! - **Packet queues**: lock-protected, shareable with consumer threads
//! - **Auto-reconnect**: `min(base * 2^k, max)` backoff per peer
//! - **API context**: [`P2pNetwork`] with stable integer error codes
//!
//! ## Example
//!
//! ```rust,no_run
//! use relay_session::{P2pNetwork, PeerId};
//!
//! # fn example() -> Result<(), relay_session::P2pError> {
//! let mut net = P2pNetwork::new();
//! net.set_connection_callback(|peer, connected| {
//!     println!("{} connected={}", peer, connected);
//! });
//! net.init()?;
//!
//! let peer = net.connect("127.0.0.1", 9000)?;
//! net.set_auto_reconnect(peer, true, 500, 10_000)?;
//! net.send_packet(peer, b"hello")?;
//!
//! loop {
//!     net.run_callbacks();
//!     while let Some((size, from)) = net.is_packet_available(PeerId::ANY) {
//!         let (packet, _) = net.read_packet(from, size as usize)?;
//!         println!("{} bytes from {}", packet.len(), from);
//!     }
//! #   break;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod connection;
pub mod error;
pub mod manager;
pub mod network;
pub mod packet_queue;
pub mod pump;
pub mod socket;

// Re-export main types
pub use backoff::ReconnectPolicy;
pub use connection::{Connection, ConnectionEvent, PeerId};
pub use error::{result_code, P2pError};
pub use manager::{ConnectionCallback, ConnectionManager, ManagerConfig};
pub use network::{P2pNetwork, UserCallback};
pub use packet_queue::PacketQueue;
pub use pump::{EventPump, DEFAULT_PUMP_INTERVAL};
pub use socket::{bind_listener, connect_with_timeout, SocketOptions, LISTEN_BACKLOG};
