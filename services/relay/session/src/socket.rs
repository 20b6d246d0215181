//! Socket option capability and connect/listen helpers.
//!
//! Platform differences in socket configuration live behind
//! [`SocketOptions`]; the helpers below only speak to that trait and to
//! `socket2`'s portable primitives.

use mio::net::{TcpListener, TcpStream};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

/// Backlog handed to `listen(2)`
pub const LISTEN_BACKLOG: i32 = 1024;

/// Per-socket options the manager and server rely on
pub trait SocketOptions {
    /// Switch the socket to non-blocking mode
    fn set_non_blocking(&self) -> io::Result<()>;
    /// Disable Nagle's algorithm
    fn set_no_delay(&self) -> io::Result<()>;
    /// Allow rebinding a port in TIME_WAIT
    fn set_reuse_addr(&self) -> io::Result<()>;
}

impl SocketOptions for Socket {
    fn set_non_blocking(&self) -> io::Result<()> {
        self.set_nonblocking(true)
    }

    fn set_no_delay(&self) -> io::Result<()> {
        self.set_nodelay(true)
    }

    fn set_reuse_addr(&self) -> io::Result<()> {
        self.set_reuse_address(true)
    }
}

/// Connect to `addr`, giving up after `timeout`.
///
/// The returned stream is non-blocking with no-delay set.
pub fn connect_with_timeout(addr: SocketAddr, timeout: Duration) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.connect_timeout(&addr.into(), timeout)?;
    socket.set_non_blocking()?;
    socket.set_no_delay()?;

    let stream: std::net::TcpStream = socket.into();
    Ok(TcpStream::from_std(stream))
}

/// Bind a non-blocking listener on `addr` with address reuse enabled
pub fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_addr()?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    socket.set_non_blocking()?;

    let listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(listener))
}
