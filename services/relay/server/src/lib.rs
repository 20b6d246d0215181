//! Mark-addressed TCP relay.
//!
//! Clients connect, send one 8-byte mark to register, then exchange
//! length-prefixed frames addressed by destination mark:
//!
//! ```text
//! registration:  [len = 8][mark]
//! forward:       [len][dest mark][payload]   ->  delivered as [len'][payload]
//! ```
//!
//! Frames for unknown marks, frames shorter than a mark and empty payloads
//! are dropped and counted. A bad registration, a duplicate mark or an
//! illegal length prefix closes the offending client only.
//!
//! ## Example
//!
//! ```rust,no_run
//! use relay_server::{RelayServer, ServerConfig};
//!
//! # async fn example() -> Result<(), relay_server::ServerError> {
//! let server = RelayServer::bind(ServerConfig::with_port(9000))?;
//! server.run(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! }).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod registry;
pub mod server;
pub mod stats;

// Re-export main types
pub use config::{ServerConfig, DEFAULT_MAX_CONNECTIONS};
pub use error::ServerError;
pub use registry::{ClientId, ClientRegistry, CloseReason, Inbound};
pub use server::{RelayServer, LISTEN_BACKLOG};
pub use stats::{DropReason, PerfReporter, RelayStats, StatsSnapshot};
