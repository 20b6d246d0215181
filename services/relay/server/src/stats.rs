//! Traffic and drop counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Why a registered client's frame was not forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Frame shorter than a mark
    Undersize,
    /// No live client owns the destination mark
    NoTarget,
    /// Destination found but nothing to deliver
    EmptyPayload,
}

/// Process-wide relay counters, updated lock-free
#[derive(Debug, Default)]
pub struct RelayStats {
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    packets_in: AtomicU64,
    packets_out: AtomicU64,
    drop_no_target: AtomicU64,
    drop_undersize: AtomicU64,
    drop_empty_payload: AtomicU64,
    drop_would_block: AtomicU64,
    partial_writes: AtomicU64,
    write_errors: AtomicU64,
    connections_accepted: AtomicU64,
    connections_rejected: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Bytes read from clients
    pub bytes_in: u64,
    /// Bytes written to clients
    pub bytes_out: u64,
    /// Complete frames received
    pub packets_in: u64,
    /// Complete frames delivered
    pub packets_out: u64,
    /// Frames addressed to an unknown mark
    pub drop_no_target: u64,
    /// Frames shorter than a mark
    pub drop_undersize: u64,
    /// Frames with a mark but no payload
    pub drop_empty_payload: u64,
    /// Frames dropped because the destination would block
    pub drop_would_block: u64,
    /// Writes that needed retrying
    pub partial_writes: u64,
    /// Hard write failures and abandoned frames
    pub write_errors: u64,
    /// Connections admitted
    pub connections_accepted: u64,
    /// Connections closed for exceeding the client cap
    pub connections_rejected: u64,
}

impl RelayStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes arrived from a client socket
    pub fn record_read(&self, bytes: usize) {
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// A complete frame was reassembled
    pub fn record_packet_in(&self) {
        self.packets_in.fetch_add(1, Ordering::Relaxed);
    }

    /// Bytes written towards a destination; `complete` when the whole frame went out
    pub fn record_forwarded(&self, bytes: usize, complete: bool) {
        self.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
        if complete {
            self.packets_out.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A frame was dropped before any write
    pub fn record_drop(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::Undersize => &self.drop_undersize,
            DropReason::NoTarget => &self.drop_no_target,
            DropReason::EmptyPayload => &self.drop_empty_payload,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Destination was not writable
    pub fn record_would_block(&self) {
        self.drop_would_block.fetch_add(1, Ordering::Relaxed);
    }

    /// First write of a frame was short
    pub fn record_partial_write(&self) {
        self.partial_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Write failed or a frame was abandoned
    pub fn record_write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// A client was admitted
    pub fn record_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// A client was turned away at the cap
    pub fn record_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            packets_in: self.packets_in.load(Ordering::Relaxed),
            packets_out: self.packets_out.load(Ordering::Relaxed),
            drop_no_target: self.drop_no_target.load(Ordering::Relaxed),
            drop_undersize: self.drop_undersize.load(Ordering::Relaxed),
            drop_empty_payload: self.drop_empty_payload.load(Ordering::Relaxed),
            drop_would_block: self.drop_would_block.load(Ordering::Relaxed),
            partial_writes: self.partial_writes.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    /// Counter growth since `earlier`
    pub fn since(&self, earlier: &StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            bytes_in: self.bytes_in.saturating_sub(earlier.bytes_in),
            bytes_out: self.bytes_out.saturating_sub(earlier.bytes_out),
            packets_in: self.packets_in.saturating_sub(earlier.packets_in),
            packets_out: self.packets_out.saturating_sub(earlier.packets_out),
            drop_no_target: self.drop_no_target.saturating_sub(earlier.drop_no_target),
            drop_undersize: self.drop_undersize.saturating_sub(earlier.drop_undersize),
            drop_empty_payload: self.drop_empty_payload.saturating_sub(earlier.drop_empty_payload),
            drop_would_block: self.drop_would_block.saturating_sub(earlier.drop_would_block),
            partial_writes: self.partial_writes.saturating_sub(earlier.partial_writes),
            write_errors: self.write_errors.saturating_sub(earlier.write_errors),
            connections_accepted: self
                .connections_accepted
                .saturating_sub(earlier.connections_accepted),
            connections_rejected: self
                .connections_rejected
                .saturating_sub(earlier.connections_rejected),
        }
    }

    /// Whether any traffic or drop was recorded
    pub fn has_activity(&self) -> bool {
        *self != StatsSnapshot::default()
    }

    /// Frames dropped for any content reason
    pub fn content_drops(&self) -> u64 {
        self.drop_no_target + self.drop_undersize + self.drop_empty_payload
    }
}

/// Logs per-interval deltas of [`RelayStats`]
#[derive(Debug)]
pub struct PerfReporter {
    last: StatsSnapshot,
    last_at: Instant,
}

impl PerfReporter {
    /// Start measuring from the current counter values
    pub fn new(stats: &RelayStats) -> Self {
        Self {
            last: stats.snapshot(),
            last_at: Instant::now(),
        }
    }

    /// Log the delta since the previous call, if anything happened
    pub fn report(&mut self, stats: &RelayStats) -> StatsSnapshot {
        let now = Instant::now();
        let current = stats.snapshot();
        let delta = current.since(&self.last);
        let secs = now.duration_since(self.last_at).as_secs_f64().max(f64::EPSILON);

        if delta.has_activity() {
            const MIB: f64 = 1024.0 * 1024.0;
            info!(
                "PERF dt={:.2}s in={}B({:.2}MB/s) out={}B({:.2}MB/s) pin={}({:.0}/s) pout={}({:.0}/s) would_block_drop={} partial={} werr={}",
                secs,
                delta.bytes_in,
                delta.bytes_in as f64 / secs / MIB,
                delta.bytes_out,
                delta.bytes_out as f64 / secs / MIB,
                delta.packets_in,
                delta.packets_in as f64 / secs,
                delta.packets_out,
                delta.packets_out as f64 / secs,
                delta.drop_would_block,
                delta.partial_writes,
                delta.write_errors
            );
            if delta.content_drops() > 0 || delta.connections_rejected > 0 {
                info!(
                    "PERF_DROP no_target={} undersize={} empty={} rejected={}",
                    delta.drop_no_target,
                    delta.drop_undersize,
                    delta.drop_empty_payload,
                    delta.connections_rejected
                );
            }
        }

        self.last = current;
        self.last_at = now;
        delta
    }
}
