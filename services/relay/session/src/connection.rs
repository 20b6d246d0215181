//! Per-peer connection state.

use crate::backoff::ReconnectPolicy;
use crate::packet_queue::PacketQueue;
use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use relay_wire::FrameReassembler;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;
use tracing::{debug, warn};

/// Handle identifying a peer connection within one manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u32);

impl PeerId {
    /// Sentinel meaning "no peer" or "any peer", depending on the call
    pub const ANY: PeerId = PeerId(0);

    /// Whether this is the sentinel value
    pub fn is_any(&self) -> bool {
        *self == Self::ANY
    }

    pub(crate) fn token(&self) -> Token {
        Token(self.0 as usize)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Connection lifecycle notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection was established (connect, accept or reconnect)
    Connected,
    /// A live connection was torn down
    Disconnected,
}

/// What a read pass found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadStatus {
    /// Drained to would-block; connection still usable
    Open,
    /// Peer closed or the read failed
    Closed,
}

/// Everything the manager tracks for a single peer
#[derive(Debug)]
pub struct Connection {
    peer_id: PeerId,
    remote_addr: SocketAddr,
    stream: Option<TcpStream>,
    connected: bool,
    interest: Option<Interest>,
    receive_queue: Arc<PacketQueue>,
    reassembler: FrameReassembler,
    send_buffer: BytesMut,
    reconnect: ReconnectPolicy,
}

impl Connection {
    /// Wrap a freshly established stream
    pub(crate) fn new(
        peer_id: PeerId,
        remote_addr: SocketAddr,
        stream: TcpStream,
        max_packet_size: u32,
    ) -> Self {
        Self {
            peer_id,
            remote_addr,
            stream: Some(stream),
            connected: true,
            interest: None,
            receive_queue: Arc::new(PacketQueue::new()),
            reassembler: FrameReassembler::new(max_packet_size),
            send_buffer: BytesMut::new(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Peer handle
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Address of the remote end (also the reconnect target)
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Whether the connection is currently usable
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether a socket is still attached (live, or flagged but not yet torn down)
    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    /// Inbound packet queue
    pub fn receive_queue(&self) -> &Arc<PacketQueue> {
        &self.receive_queue
    }

    /// Bytes waiting to be written
    pub(crate) fn pending_send_len(&self) -> usize {
        self.send_buffer.len()
    }

    /// Reconnect state
    pub fn reconnect(&self) -> &ReconnectPolicy {
        &self.reconnect
    }

    pub(crate) fn reconnect_mut(&mut self) -> &mut ReconnectPolicy {
        &mut self.reconnect
    }

    pub(crate) fn mark_disconnected(&mut self) {
        self.connected = false;
    }

    /// Attach a new stream after a successful reconnect
    pub(crate) fn attach(&mut self, stream: TcpStream) {
        self.stream = Some(stream);
        self.connected = true;
        self.interest = None;
    }

    /// Close the socket and drop all buffered state
    pub(crate) fn close(&mut self, registry: Option<&Registry>) {
        if let Some(mut stream) = self.stream.take() {
            if let (Some(registry), Some(_)) = (registry, self.interest) {
                if let Err(e) = registry.deregister(&mut stream) {
                    debug!("Failed to deregister {}: {}", self.peer_id, e);
                }
            }
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.connected = false;
        self.interest = None;
        self.receive_queue.clear();
        self.reassembler.clear();
        self.send_buffer.clear();
    }

    /// Register or re-register readiness interest: read always, write only
    /// while outbound bytes are pending
    pub(crate) fn refresh_interest(&mut self, registry: &Registry) -> io::Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };

        let wanted = if self.send_buffer.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };

        match self.interest {
            None => registry.register(stream, self.peer_id.token(), wanted)?,
            Some(current) if current != wanted => {
                registry.reregister(stream, self.peer_id.token(), wanted)?
            }
            Some(_) => return Ok(()),
        }
        self.interest = Some(wanted);
        Ok(())
    }

    /// Queue a complete frame, writing as much as the socket takes right now.
    ///
    /// If earlier bytes are still pending the frame goes behind them so
    /// frames never interleave.
    pub(crate) fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        if !self.send_buffer.is_empty() {
            self.send_buffer.extend_from_slice(frame);
            return Ok(());
        }

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))?;

        let mut written = 0;
        while written < frame.len() {
            match stream.write(&frame[written..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        if written < frame.len() {
            self.send_buffer.extend_from_slice(&frame[written..]);
        }
        Ok(())
    }

    /// Write pending outbound bytes until the buffer empties or the socket
    /// would block
    pub(crate) fn flush(&mut self) -> io::Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };

        while !self.send_buffer.is_empty() {
            match stream.write(&self.send_buffer) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.send_buffer.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Drain the socket into the reassembler, queueing every complete frame
    pub(crate) fn read_available(&mut self, scratch: &mut [u8]) -> ReadStatus {
        let Some(stream) = self.stream.as_mut() else {
            return ReadStatus::Closed;
        };

        loop {
            match stream.read(scratch) {
                Ok(0) => {
                    debug!("{} closed by remote", self.peer_id);
                    return ReadStatus::Closed;
                }
                Ok(n) => {
                    self.reassembler.append(&scratch[..n]);
                    loop {
                        match self.reassembler.try_extract_frame() {
                            Ok(Some(packet)) => self.receive_queue.push(packet),
                            Ok(None) => break,
                            Err(e) => {
                                warn!("Corrupt frame from {}: {}", self.peer_id, e);
                                break;
                            }
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return ReadStatus::Open,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("Read error on {}: {}", self.peer_id, e);
                    return ReadStatus::Closed;
                }
            }
        }
    }
}
