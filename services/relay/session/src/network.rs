//! Explicit API context for embedding layers.
//!
//! [`P2pNetwork`] is the surface an embedding layer calls into: it owns at
//! most one [`ConnectionManager`], guards every call with initialization
//! checks, and exposes a simplified boolean connection callback that can be
//! installed before or after `init`.

use crate::connection::{ConnectionEvent, PeerId};
use crate::error::P2pError;
use crate::manager::{ConnectionManager, ManagerConfig};
use bytes::Bytes;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;

/// User observer: `(peer, connected)`
pub type UserCallback = Box<dyn FnMut(PeerId, bool) + Send>;

type SharedCallback = Arc<Mutex<Option<UserCallback>>>;

/// Owned handle to the peer network
#[derive(Default)]
pub struct P2pNetwork {
    manager: Option<ConnectionManager>,
    callback: SharedCallback,
}

impl std::fmt::Debug for P2pNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("P2pNetwork")
            .field("manager", &self.manager)
            .field("callback", &self.callback.lock().is_some())
            .finish()
    }
}

impl P2pNetwork {
    /// Create an uninitialized context
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize with default settings
    pub fn init(&mut self) -> Result<(), P2pError> {
        self.init_with_config(ManagerConfig::default())
    }

    /// Initialize with explicit manager settings
    pub fn init_with_config(&mut self, config: ManagerConfig) -> Result<(), P2pError> {
        if self.manager.is_some() {
            return Err(P2pError::AlreadyInitialized);
        }

        let mut manager = ConnectionManager::new(config);
        manager.initialize()?;

        let callback = Arc::clone(&self.callback);
        manager.set_connection_callback(move |peer, event| {
            if let Some(user) = callback.lock().as_mut() {
                user(peer, event == ConnectionEvent::Connected);
            }
        });

        self.manager = Some(manager);
        Ok(())
    }

    /// Tear everything down and forget the user callback
    pub fn shutdown(&mut self) {
        if let Some(mut manager) = self.manager.take() {
            manager.shutdown();
        }
        *self.callback.lock() = None;
    }

    /// Whether `init` succeeded and `shutdown` has not run since
    pub fn is_initialized(&self) -> bool {
        self.manager.as_ref().map_or(false, ConnectionManager::is_initialized)
    }

    /// Start listening on `0.0.0.0:port`
    pub fn listen(&mut self, port: u16) -> Result<SocketAddr, P2pError> {
        self.manager_mut()?.listen(port)
    }

    /// Stop listening; a no-op when not initialized
    pub fn stop_listen(&mut self) {
        if let Ok(manager) = self.manager_mut() {
            manager.stop_listen();
        }
    }

    /// Connect to `ip:port`
    pub fn connect(&mut self, ip: &str, port: u16) -> Result<PeerId, P2pError> {
        let manager = self.manager_mut()?;
        if ip.is_empty() {
            return Err(P2pError::InvalidParam);
        }
        manager.connect(ip, port)
    }

    /// Disconnect a peer; unknown peers and the sentinel are ignored
    pub fn disconnect(&mut self, peer: PeerId) {
        if peer.is_any() {
            return;
        }
        if let Ok(manager) = self.manager_mut() {
            let _ = manager.disconnect(peer);
        }
    }

    /// Arm or disarm auto-reconnect for a peer
    pub fn set_auto_reconnect(
        &mut self,
        peer: PeerId,
        enable: bool,
        base_delay_ms: u32,
        max_delay_ms: u32,
    ) -> Result<(), P2pError> {
        self.manager_mut()?
            .set_auto_reconnect(peer, enable, base_delay_ms, max_delay_ms)
    }

    /// Send one packet to `peer`
    pub fn send_packet(&mut self, peer: PeerId, data: &[u8]) -> Result<(), P2pError> {
        let manager = self.manager_mut()?;
        if peer.is_any() {
            return Err(P2pError::InvalidPeer);
        }
        if data.is_empty() {
            return Err(P2pError::InvalidParam);
        }
        manager.send_packet(peer, data)
    }

    /// Size and source of the next packet, without consuming it
    pub fn is_packet_available(&self, peer: PeerId) -> Option<(u32, PeerId)> {
        self.manager
            .as_ref()
            .and_then(|m| m.is_packet_available(peer).ok())
            .flatten()
    }

    /// Read the next packet if it fits in `capacity`.
    ///
    /// Unlike the manager, an oversized packet stays queued so the caller
    /// can retry with a larger buffer.
    pub fn read_packet(&mut self, peer: PeerId, capacity: usize) -> Result<(Bytes, PeerId), P2pError> {
        let manager = self.manager_mut()?;
        if capacity == 0 {
            return Err(P2pError::InvalidParam);
        }

        let (_, source) = manager
            .is_packet_available(peer)?
            .ok_or(P2pError::NoPacket)?;
        let queue = manager.receive_queue(source).ok_or(P2pError::NoPacket)?;

        // Size check and pop happen under the queue lock, so a consumer
        // draining the same queue cannot swap in a larger packet.
        match queue.pop_fitting(capacity) {
            Ok(Some(packet)) => Ok((packet, source)),
            Ok(None) => Err(P2pError::NoPacket),
            Err(size) => Err(P2pError::BufferTooSmall {
                needed: size as u32,
                capacity,
            }),
        }
    }

    /// Pump network events; callbacks fire from inside this call
    pub fn run_callbacks(&mut self) {
        if let Ok(manager) = self.manager_mut() {
            manager.process_events();
        }
    }

    /// Install the connection observer. May be called before `init`.
    pub fn set_connection_callback<F>(&mut self, callback: F)
    where
        F: FnMut(PeerId, bool) + Send + 'static,
    {
        *self.callback.lock() = Some(Box::new(callback));
    }

    /// Remove the connection observer
    pub fn clear_connection_callback(&mut self) {
        *self.callback.lock() = None;
    }

    /// Peers tracked by the manager; 0 when not initialized
    pub fn peer_count(&self) -> usize {
        self.manager.as_ref().map_or(0, ConnectionManager::peer_count)
    }

    /// Up to `max` connected peers; empty when not initialized
    pub fn connected_peers(&self, max: usize) -> Vec<PeerId> {
        self.manager
            .as_ref()
            .map(|m| m.connected_peers(max))
            .unwrap_or_default()
    }

    /// Direct access to the underlying manager
    pub fn manager(&self) -> Option<&ConnectionManager> {
        self.manager.as_ref()
    }

    fn manager_mut(&mut self) -> Result<&mut ConnectionManager, P2pError> {
        self.manager
            .as_mut()
            .filter(|m| m.is_initialized())
            .ok_or(P2pError::NotInitialized)
    }
}

impl Drop for P2pNetwork {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calls_before_init() {
        let mut net = P2pNetwork::new();
        assert!(!net.is_initialized());
        assert_eq!(net.listen(0), Err(P2pError::NotInitialized));
        assert_eq!(net.connect("127.0.0.1", 1), Err(P2pError::NotInitialized));
        assert_eq!(net.send_packet(PeerId(1), b"x"), Err(P2pError::NotInitialized));
        assert_eq!(net.read_packet(PeerId::ANY, 8), Err(P2pError::NotInitialized));
        assert_eq!(
            net.set_auto_reconnect(PeerId(1), true, 500, 10_000),
            Err(P2pError::NotInitialized)
        );
        assert_eq!(net.is_packet_available(PeerId::ANY), None);
        assert_eq!(net.peer_count(), 0);
        assert!(net.connected_peers(8).is_empty());
        net.disconnect(PeerId(1));
        net.stop_listen();
        net.run_callbacks();
    }

    #[test]
    fn test_double_init() {
        let mut net = P2pNetwork::new();
        net.init().unwrap();
        assert_eq!(net.init(), Err(P2pError::AlreadyInitialized));
        net.shutdown();
        assert!(!net.is_initialized());
        net.init().unwrap();
    }

    #[test]
    fn test_argument_checks() {
        let mut net = P2pNetwork::new();
        net.init().unwrap();
        assert_eq!(net.connect("", 80), Err(P2pError::InvalidParam));
        assert_eq!(net.send_packet(PeerId::ANY, b"x"), Err(P2pError::InvalidPeer));
        assert_eq!(net.send_packet(PeerId(3), b""), Err(P2pError::InvalidParam));
        assert_eq!(net.read_packet(PeerId::ANY, 0), Err(P2pError::InvalidParam));
        assert_eq!(net.read_packet(PeerId::ANY, 8), Err(P2pError::NoPacket));
        assert_eq!(net.read_packet(PeerId(42), 8), Err(P2pError::NoPacket));
    }

    #[test]
    fn test_shutdown_clears_callback() {
        let mut net = P2pNetwork::new();
        net.set_connection_callback(|_, _| {});
        assert!(net.callback.lock().is_some());
        net.shutdown();
        assert!(net.callback.lock().is_none());
    }
}
