//! Relay server: accept loop, per-client readers and frame forwarding.

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::registry::{ClientId, ClientRegistry, Inbound};
use crate::stats::{PerfReporter, RelayStats};
use bytes::Bytes;
use parking_lot::Mutex;
use relay_wire::{encode_length, FrameReassembler, Mark, LENGTH_PREFIX_SIZE};
use std::future::Future;
use std::io::{self, IoSlice};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Listen backlog for the relay socket
pub const LISTEN_BACKLOG: u32 = 1024;

/// Write side of one client plus its close signal
#[derive(Debug)]
pub(crate) struct ClientHandle {
    peer: SocketAddr,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    closed: Notify,
}

impl ClientHandle {
    fn new(peer: SocketAddr, writer: OwnedWriteHalf) -> Self {
        Self {
            peer,
            writer: tokio::sync::Mutex::new(writer),
            closed: Notify::new(),
        }
    }

    /// Ask the client's reader task to stop and release the socket
    fn close(&self) {
        self.closed.notify_one();
    }
}

struct Shared {
    config: ServerConfig,
    registry: Mutex<ClientRegistry<Arc<ClientHandle>>>,
    stats: Arc<RelayStats>,
}

impl Shared {
    fn close_client(&self, id: ClientId) {
        let removed = self.registry.lock().remove(id);
        if let Some(entry) = removed {
            entry.sink.close();
        }
    }
}

/// Mark-addressed relay between TCP clients.
///
/// Each client registers an 8-byte mark with its first frame. Later frames
/// carry a destination mark followed by a payload; the payload is re-framed
/// and written to whichever client owns that mark.
pub struct RelayServer {
    listener: TcpListener,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayServer")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("clients", &self.shared.registry.lock().len())
            .finish()
    }
}

impl RelayServer {
    /// Validate `config` and bind the listening socket.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let addr = config.listen_addr;
        let listener = bind_listener(addr).map_err(|source| ServerError::Bind { addr, source })?;

        info!(
            "Relay listening on {} (max_connections={}, max_packet_size={})",
            listener.local_addr().unwrap_or(addr),
            config.max_connections,
            config.max_packet_size
        );

        let shared = Arc::new(Shared {
            registry: Mutex::new(ClientRegistry::new(config.max_connections)),
            stats: Arc::new(RelayStats::new()),
            config,
        });
        Ok(Self { listener, shared })
    }

    /// Address actually bound
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared traffic counters
    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.shared.stats)
    }

    /// Active settings
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    /// Number of admitted clients
    pub fn client_count(&self) -> usize {
        self.shared.registry.lock().len()
    }

    /// Serve clients until `shutdown` resolves, then close every client and
    /// wait for their tasks to finish.
    pub async fn run<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let RelayServer { listener, shared } = self;
        let mut tasks = JoinSet::new();
        let mut reporter = PerfReporter::new(&shared.stats);

        let mut ticker = tokio::time::interval(shared.config.stats_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, closing relay");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => admit(&shared, &mut tasks, stream, peer),
                    Err(e) => warn!("Accept failed: {}", e),
                },
                _ = ticker.tick() => {
                    reporter.report(&shared.stats);
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("Client task failed: {}", e);
                    }
                }
            }
        }

        drop(listener);
        let remaining = shared.registry.lock().clear();
        for entry in &remaining {
            entry.sink.close();
        }
        drop(remaining);
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Client task failed during shutdown: {}", e);
            }
        }
        reporter.report(&shared.stats);
        info!("Relay stopped");
        Ok(())
    }
}

fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

fn admit(shared: &Arc<Shared>, tasks: &mut JoinSet<()>, stream: TcpStream, peer: SocketAddr) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
    }
    if let Err(e) = socket2::SockRef::from(&stream).set_keepalive(true) {
        warn!("Failed to set SO_KEEPALIVE for {}: {}", peer, e);
    }

    let (reader, writer) = stream.into_split();
    let handle = Arc::new(ClientHandle::new(peer, writer));
    let admitted = shared.registry.lock().admit(Arc::clone(&handle));

    match admitted {
        Some(id) => {
            shared.stats.record_accepted();
            info!("Client {} connected from {}", id, peer);
            tasks.spawn(serve_client(Arc::clone(shared), id, reader, handle));
        }
        None => {
            shared.stats.record_rejected();
            warn!(
                "Rejecting {}: client limit of {} reached",
                peer, shared.config.max_connections
            );
        }
    }
}

async fn serve_client(
    shared: Arc<Shared>,
    id: ClientId,
    mut reader: OwnedReadHalf,
    handle: Arc<ClientHandle>,
) {
    let peer = handle.peer;
    let mut reassembler = FrameReassembler::new(shared.config.max_packet_size);
    let mut buf = vec![0u8; shared.config.read_buffer_size];

    'read: loop {
        let n = tokio::select! {
            _ = handle.closed.notified() => {
                debug!("Client {} ({}) closed by relay", id, peer);
                break 'read;
            }
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    info!("Client {} ({}) disconnected", id, peer);
                    break 'read;
                }
                Ok(n) => n,
                Err(e) => {
                    warn!("Read from client {} ({}) failed: {}", id, peer, e);
                    break 'read;
                }
            },
        };

        shared.stats.record_read(n);
        reassembler.append(&buf[..n]);

        loop {
            match reassembler.try_extract_frame() {
                Ok(Some(frame)) => {
                    shared.stats.record_packet_in();
                    if !dispatch(&shared, id, frame).await {
                        break 'read;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Closing client {} ({}): {}", id, peer, e);
                    break 'read;
                }
            }
        }
    }

    shared.registry.lock().remove(id);
}

/// Act on one frame; `false` means the sender must be closed
async fn dispatch(shared: &Shared, id: ClientId, frame: Bytes) -> bool {
    let outcome = shared.registry.lock().handle_frame(id, frame);
    match outcome {
        Inbound::Registered(mark) => {
            info!("Client {} registered mark {}", id, mark);
            true
        }
        Inbound::Forward {
            dest,
            mark,
            sink,
            payload,
        } => {
            forward(shared, dest, mark, &sink, &payload).await;
            true
        }
        Inbound::Dropped(reason) => {
            shared.stats.record_drop(reason);
            debug!("Dropped frame from client {}: {:?}", id, reason);
            true
        }
        Inbound::Close(reason) => {
            warn!("Closing client {}: {:?}", id, reason);
            false
        }
    }
}

/// Bytes of `header ++ payload` not yet written
fn unwritten<'a>(header: &'a [u8], payload: &'a [u8], written: usize) -> [&'a [u8]; 2] {
    if written < header.len() {
        [&header[written..], payload]
    } else {
        [&[], &payload[written - header.len()..]]
    }
}

async fn forward(shared: &Shared, dest: ClientId, mark: Mark, sink: &ClientHandle, payload: &[u8]) {
    let stats = &shared.stats;
    // Payload already passed the inbound size check, so it fits a u32.
    let header = encode_length(payload.len() as u32);
    let total = LENGTH_PREFIX_SIZE + payload.len();

    let writer = sink.writer.lock().await;
    let mut written = match writer.try_write_vectored(&[IoSlice::new(&header), IoSlice::new(payload)]) {
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
            stats.record_would_block();
            debug!("Client {} ({}) not writable, dropped frame", dest, mark);
            return;
        }
        Err(e) => {
            stats.record_write_error();
            warn!("Write to client {} ({}) failed: {}", dest, mark, e);
            drop(writer);
            shared.close_client(dest);
            return;
        }
    };

    if written < total {
        stats.record_partial_write();
        let mut retries = 0;

        while written < total {
            let [head, tail] = unwritten(&header, payload, written);
            let chunk = if head.is_empty() { tail } else { head };
            match writer.try_write(chunk) {
                Ok(0) => {
                    stats.record_write_error();
                    warn!("Client {} ({}) accepted no bytes, closing", dest, mark);
                    drop(writer);
                    shared.close_client(dest);
                    stats.record_forwarded(written, false);
                    return;
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if retries >= shared.config.write_retry_attempts {
                        stats.record_write_error();
                        warn!(
                            "Gave up on frame to client {} ({}) after {}/{} bytes",
                            dest, mark, written, total
                        );
                        break;
                    }
                    retries += 1;
                    tokio::time::sleep(shared.config.write_retry_delay).await;
                }
                Err(e) => {
                    stats.record_write_error();
                    warn!("Write to client {} ({}) failed: {}", dest, mark, e);
                    drop(writer);
                    shared.close_client(dest);
                    stats.record_forwarded(written, false);
                    return;
                }
            }
        }
    }

    stats.record_forwarded(written, written == total);
}
