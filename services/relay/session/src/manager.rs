//! Connection manager driving every peer from one cooperative pump.
//!
//! The manager owns all connections, a listener and a readiness poller.
//! Nothing happens in the background: the owner calls
//! [`ConnectionManager::process_events`] repeatedly, and each call performs
//! one zero-timeout readiness pass. Only `connect` and reconnect attempts
//! block, for at most [`ManagerConfig::connect_timeout`].

use crate::connection::{Connection, ConnectionEvent, PeerId, ReadStatus};
use crate::error::P2pError;
use crate::packet_queue::PacketQueue;
use crate::socket::{bind_listener, connect_with_timeout};
use bytes::Bytes;
use mio::net::TcpListener;
use mio::{Events, Poll};
use relay_wire::{encode_frame, MAX_PACKET_SIZE};
use std::collections::BTreeMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Observer invoked on connection lifecycle changes
pub type ConnectionCallback = Box<dyn FnMut(PeerId, ConnectionEvent) + Send>;

/// Tunables for a [`ConnectionManager`]
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Upper bound on a blocking connect or reconnect attempt
    pub connect_timeout: Duration,
    /// Largest payload accepted in either direction
    pub max_packet_size: u32,
    /// Size of the scratch buffer used per `read` call
    pub recv_chunk_size: usize,
    /// Readiness events collected per poll
    pub events_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(2000),
            max_packet_size: MAX_PACKET_SIZE,
            recv_chunk_size: 64 * 1024,
            events_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Readiness {
    peer: PeerId,
    error: bool,
    readable: bool,
    writable: bool,
}

/// Owns every peer connection and the listener
pub struct ConnectionManager {
    config: ManagerConfig,
    poll: Option<Poll>,
    events: Events,
    listener: Option<TcpListener>,
    connections: BTreeMap<PeerId, Connection>,
    pending_remove: Vec<PeerId>,
    next_peer_id: u32,
    recv_buf: Vec<u8>,
    callback: Option<ConnectionCallback>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("initialized", &self.poll.is_some())
            .field("listening", &self.listen_addr())
            .field("connections", &self.connections.len())
            .finish()
    }
}

impl ConnectionManager {
    /// Create an uninitialized manager
    pub fn new(config: ManagerConfig) -> Self {
        let events = Events::with_capacity(config.events_capacity);
        let recv_buf = vec![0u8; config.recv_chunk_size.max(1)];
        Self {
            config,
            poll: None,
            events,
            listener: None,
            connections: BTreeMap::new(),
            pending_remove: Vec::new(),
            next_peer_id: 1,
            recv_buf,
            callback: None,
        }
    }

    /// Manager configuration
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Create the readiness poller. Calling again is a no-op.
    pub fn initialize(&mut self) -> Result<(), P2pError> {
        if self.poll.is_some() {
            return Ok(());
        }
        let poll = Poll::new().map_err(|e| {
            warn!("Failed to create poller: {}", e);
            P2pError::SocketError
        })?;
        self.poll = Some(poll);
        debug!("Connection manager initialized");
        Ok(())
    }

    /// Whether `initialize` has run without a later `shutdown`
    pub fn is_initialized(&self) -> bool {
        self.poll.is_some()
    }

    /// Close the listener and every connection. No callbacks fire.
    pub fn shutdown(&mut self) {
        if self.poll.is_none() {
            return;
        }
        self.listener = None;

        let registry = self.poll.as_ref().map(Poll::registry);
        for conn in self.connections.values_mut() {
            conn.close(registry);
        }
        self.connections.clear();
        self.pending_remove.clear();
        self.poll = None;
        info!("Connection manager shut down");
    }

    /// Install the lifecycle observer, replacing any previous one
    pub fn set_connection_callback<F>(&mut self, callback: F)
    where
        F: FnMut(PeerId, ConnectionEvent) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    /// Remove the lifecycle observer
    pub fn clear_connection_callback(&mut self) {
        self.callback = None;
    }

    /// Start accepting on `0.0.0.0:port`, replacing any existing listener.
    ///
    /// Returns the bound address; port 0 picks an ephemeral port.
    pub fn listen(&mut self, port: u16) -> Result<SocketAddr, P2pError> {
        self.ensure_initialized()?;
        self.listener = None;

        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        let listener = bind_listener(addr).map_err(|e| {
            warn!("Failed to listen on {}: {}", addr, e);
            P2pError::ListenFailed
        })?;
        let bound = listener.local_addr().map_err(|_| P2pError::ListenFailed)?;

        info!("Listening on {}", bound);
        self.listener = Some(listener);
        Ok(bound)
    }

    /// Stop accepting new connections; existing ones are unaffected
    pub fn stop_listen(&mut self) {
        if self.listener.take().is_some() {
            info!("Stopped listening");
        }
    }

    /// Address the listener is bound to
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Connect to an IPv4 peer, blocking for at most the connect timeout
    pub fn connect(&mut self, ip: &str, port: u16) -> Result<PeerId, P2pError> {
        self.ensure_initialized()?;

        let ip: Ipv4Addr = ip.parse().map_err(|_| {
            warn!("Invalid peer address {:?}", ip);
            P2pError::ConnectionFailed
        })?;
        let addr = SocketAddr::from((ip, port));

        let stream = connect_with_timeout(addr, self.config.connect_timeout).map_err(|e| {
            warn!("Failed to connect to {}: {}", addr, e);
            P2pError::ConnectionFailed
        })?;

        let peer = self.allocate_peer_id();
        self.connections
            .insert(peer, Connection::new(peer, addr, stream, self.config.max_packet_size));
        info!("Connected to {} as {}", addr, peer);
        self.notify(peer, ConnectionEvent::Connected);
        Ok(peer)
    }

    /// Arm or disarm auto-reconnect for a peer.
    ///
    /// Disarming a peer that is waiting to reconnect removes it.
    pub fn set_auto_reconnect(
        &mut self,
        peer: PeerId,
        enable: bool,
        base_delay_ms: u32,
        max_delay_ms: u32,
    ) -> Result<(), P2pError> {
        self.ensure_initialized()?;
        let conn = self.connections.get_mut(&peer).ok_or(P2pError::InvalidPeer)?;

        if enable {
            if base_delay_ms == 0 || max_delay_ms < base_delay_ms {
                return Err(P2pError::InvalidParam);
            }
            let policy = conn.reconnect_mut();
            policy.arm(
                Duration::from_millis(base_delay_ms.into()),
                Duration::from_millis(max_delay_ms.into()),
            );
            if !conn.has_stream() {
                conn.reconnect_mut().schedule_initial(Instant::now());
            }
            debug!(
                "Auto-reconnect armed for {} (base {}ms, max {}ms)",
                peer, base_delay_ms, max_delay_ms
            );
        } else {
            conn.reconnect_mut().disarm();
            if !conn.has_stream() {
                self.connections.remove(&peer);
                debug!("Dropped {} while waiting to reconnect", peer);
            }
        }
        Ok(())
    }

    /// Close a peer's socket and drop its buffered data.
    ///
    /// The peer is kept for reconnection if auto-reconnect is armed,
    /// otherwise it is forgotten.
    pub fn disconnect(&mut self, peer: PeerId) -> Result<(), P2pError> {
        self.ensure_initialized()?;
        if !self.connections.contains_key(&peer) {
            return Err(P2pError::InvalidPeer);
        }
        info!("Disconnecting {}", peer);
        self.teardown(peer);
        Ok(())
    }

    /// Frame `data` and send it to `peer`.
    ///
    /// Whatever the socket does not take immediately is buffered and
    /// flushed by later [`process_events`](Self::process_events) calls.
    pub fn send_packet(&mut self, peer: PeerId, data: &[u8]) -> Result<(), P2pError> {
        self.ensure_initialized()?;
        if data.is_empty() || data.len() > self.config.max_packet_size as usize {
            return Err(P2pError::InvalidParam);
        }

        let conn = self.connections.get_mut(&peer).ok_or(P2pError::InvalidPeer)?;
        if !conn.is_connected() {
            return Err(P2pError::SendFailed);
        }

        let frame = encode_frame(data).map_err(|_| P2pError::InvalidParam)?;
        if let Err(e) = conn.send_frame(&frame) {
            warn!("Send to {} failed: {}", peer, e);
            conn.mark_disconnected();
            self.pending_remove.push(peer);
            return Err(P2pError::SendFailed);
        }
        Ok(())
    }

    /// Size and source of the next packet without consuming it.
    ///
    /// With [`PeerId::ANY`] every queue is scanned in ascending peer order.
    pub fn is_packet_available(&self, peer: PeerId) -> Result<Option<(u32, PeerId)>, P2pError> {
        self.ensure_initialized()?;

        if peer.is_any() {
            return Ok(self
                .connections
                .iter()
                .find_map(|(id, conn)| conn.receive_queue().peek_size().map(|size| (size, *id))));
        }

        Ok(self
            .connections
            .get(&peer)
            .and_then(|conn| conn.receive_queue().peek_size())
            .map(|size| (size, peer)))
    }

    /// Pop the next packet for `peer` (or any peer).
    ///
    /// A packet larger than `capacity` is consumed and reported as
    /// [`P2pError::BufferTooSmall`]; check the size first to avoid losing it.
    pub fn read_packet(&mut self, peer: PeerId, capacity: usize) -> Result<(Bytes, PeerId), P2pError> {
        self.ensure_initialized()?;

        let (packet, source) = if peer.is_any() {
            self.connections
                .iter()
                .find_map(|(id, conn)| conn.receive_queue().pop().map(|p| (p, *id)))
                .ok_or(P2pError::NoPacket)?
        } else {
            let conn = self.connections.get(&peer).ok_or(P2pError::InvalidPeer)?;
            let packet = conn.receive_queue().pop().ok_or(P2pError::NoPacket)?;
            (packet, peer)
        };

        if packet.len() > capacity {
            debug!(
                "Dropped {} byte packet from {}: buffer holds {}",
                packet.len(),
                source,
                capacity
            );
            return Err(P2pError::BufferTooSmall {
                needed: packet.len() as u32,
                capacity,
            });
        }
        Ok((packet, source))
    }

    /// Inbound queue of a peer, for draining from another thread
    pub fn receive_queue(&self, peer: PeerId) -> Option<Arc<PacketQueue>> {
        self.connections.get(&peer).map(|c| Arc::clone(c.receive_queue()))
    }

    /// Number of peers tracked, including ones waiting to reconnect
    pub fn peer_count(&self) -> usize {
        self.connections.len()
    }

    /// Up to `max` currently connected peers in ascending order
    pub fn connected_peers(&self, max: usize) -> Vec<PeerId> {
        self.connections
            .iter()
            .filter(|(_, c)| c.is_connected())
            .map(|(id, _)| *id)
            .take(max)
            .collect()
    }

    /// Run one pass of the pump: reconnect, accept, poll, read/write, reconcile.
    ///
    /// Never blocks except for due reconnect attempts, and never fails;
    /// problems become state changes and callback notifications.
    pub fn process_events(&mut self) {
        if self.poll.is_none() {
            return;
        }

        self.attempt_reconnects();
        self.accept_pending();
        self.update_interests();
        for ready in self.poll_ready() {
            self.handle_readiness(ready);
        }
        self.reconcile_disconnected();
    }

    fn ensure_initialized(&self) -> Result<(), P2pError> {
        if self.poll.is_none() {
            return Err(P2pError::NotInitialized);
        }
        Ok(())
    }

    fn allocate_peer_id(&mut self) -> PeerId {
        let id = PeerId(self.next_peer_id);
        self.next_peer_id = self.next_peer_id.wrapping_add(1).max(1);
        id
    }

    fn notify(&mut self, peer: PeerId, event: ConnectionEvent) {
        if let Some(callback) = self.callback.as_mut() {
            callback(peer, event);
        }
    }

    fn attempt_reconnects(&mut self) {
        let now = Instant::now();
        let due: Vec<PeerId> = self
            .connections
            .iter()
            .filter(|(_, c)| !c.has_stream() && c.reconnect().is_due(now))
            .map(|(id, _)| *id)
            .collect();

        for peer in due {
            let Some(conn) = self.connections.get_mut(&peer) else {
                continue;
            };
            let addr = conn.remote_addr();
            match connect_with_timeout(addr, self.config.connect_timeout) {
                Ok(stream) => {
                    conn.attach(stream);
                    conn.reconnect_mut().record_success();
                    info!("Reconnected {} to {}", peer, addr);
                    self.notify(peer, ConnectionEvent::Connected);
                }
                Err(e) => {
                    let attempt = conn.reconnect().attempt();
                    let delay = conn.reconnect_mut().record_failure(Instant::now());
                    debug!(
                        "Reconnect attempt {} for {} failed: {}; retrying in {:?}",
                        attempt + 1,
                        peer,
                        e,
                        delay
                    );
                }
            }
        }
    }

    fn accept_pending(&mut self) {
        loop {
            let Some(listener) = self.listener.as_ref() else {
                return;
            };
            match listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Failed to set no-delay for {}: {}", addr, e);
                    }
                    let peer = self.allocate_peer_id();
                    self.connections
                        .insert(peer, Connection::new(peer, addr, stream, self.config.max_packet_size));
                    info!("Accepted {} as {}", addr, peer);
                    self.notify(peer, ConnectionEvent::Connected);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    return;
                }
            }
        }
    }

    fn update_interests(&mut self) {
        let Some(poll) = self.poll.as_ref() else {
            return;
        };
        let registry = poll.registry();

        for (peer, conn) in self.connections.iter_mut() {
            if !conn.is_connected() {
                continue;
            }
            if let Err(e) = conn.refresh_interest(registry) {
                warn!("Failed to register {}: {}", peer, e);
                conn.mark_disconnected();
                self.pending_remove.push(*peer);
            }
        }
    }

    fn poll_ready(&mut self) -> Vec<Readiness> {
        let Some(poll) = self.poll.as_mut() else {
            return Vec::new();
        };
        if let Err(e) = poll.poll(&mut self.events, Some(Duration::ZERO)) {
            if e.kind() != io::ErrorKind::Interrupted {
                warn!("Poll failed: {}", e);
            }
            return Vec::new();
        }

        self.events
            .iter()
            .map(|event| Readiness {
                peer: PeerId(event.token().0 as u32),
                error: event.is_error(),
                readable: event.is_readable() || event.is_read_closed(),
                writable: event.is_writable(),
            })
            .collect()
    }

    fn handle_readiness(&mut self, ready: Readiness) {
        let peer = ready.peer;
        let Some(conn) = self.connections.get_mut(&peer) else {
            return;
        };
        if !conn.is_connected() {
            return;
        }

        if ready.error {
            debug!("Socket error on {}", peer);
            conn.mark_disconnected();
            self.pending_remove.push(peer);
            return;
        }

        if ready.readable && conn.read_available(&mut self.recv_buf) == ReadStatus::Closed {
            conn.mark_disconnected();
            self.pending_remove.push(peer);
            return;
        }

        if ready.writable {
            if let Err(e) = conn.flush() {
                debug!("Write error on {}: {}", peer, e);
                conn.mark_disconnected();
                self.pending_remove.push(peer);
            }
        }
    }

    fn reconcile_disconnected(&mut self) {
        if self.pending_remove.is_empty() {
            return;
        }
        let mut pending = std::mem::take(&mut self.pending_remove);
        pending.sort_unstable();
        pending.dedup();

        for peer in pending {
            // Skip peers already torn down or reconnected since being flagged.
            let flagged = self
                .connections
                .get(&peer)
                .map_or(false, |c| c.has_stream() && !c.is_connected());
            if flagged {
                self.teardown(peer);
            }
        }
    }

    /// Close the socket, then retain for reconnect or erase.
    /// Fires `Disconnected` once per live socket.
    fn teardown(&mut self, peer: PeerId) {
        let registry = self.poll.as_ref().map(Poll::registry);
        let Some(conn) = self.connections.get_mut(&peer) else {
            return;
        };

        let was_live = conn.has_stream();
        let unsent = conn.pending_send_len();
        if unsent > 0 {
            warn!("{} closed with {} unsent bytes", peer, unsent);
        }
        conn.close(registry);

        if conn.reconnect().is_enabled() {
            conn.reconnect_mut().schedule_initial(Instant::now());
            debug!("{} retained for reconnect", peer);
        } else {
            self.connections.remove(&peer);
        }

        if was_live {
            info!("{} disconnected", peer);
            self.notify(peer, ConnectionEvent::Disconnected);
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
