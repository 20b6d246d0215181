//! Client table and mark routing.
//!
//! The registry decides what each inbound frame means for its sender:
//! registration, forwarding, a silent drop, or grounds to close. It holds
//! no sockets itself, only whatever per-client handle `W` the server uses
//! to write, so its rules can be exercised without any I/O.

use crate::stats::DropReason;
use bytes::Bytes;
use relay_wire::{split_forward, Mark, MARK_SIZE};
use std::collections::HashMap;

/// Server-local client identifier
pub type ClientId = u64;

/// Why a client must be disconnected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// First frame was not exactly one mark
    BadRegistration {
        /// Length of the offending frame
        len: usize,
    },
    /// Mark already owned by another live client
    DuplicateMark(Mark),
    /// Sender is not in the table
    Unknown,
}

/// What to do with one inbound frame
#[derive(Debug)]
pub enum Inbound<W> {
    /// Sender registered under this mark
    Registered(Mark),
    /// Write `payload` to `dest` through `sink`
    Forward {
        /// Destination client
        dest: ClientId,
        /// Destination mark
        mark: Mark,
        /// Handle used to write to the destination
        sink: W,
        /// Bytes to deliver, mark stripped
        payload: Bytes,
    },
    /// Frame discarded; the sender stays connected
    Dropped(DropReason),
    /// Sender must be closed
    Close(CloseReason),
}

/// One admitted client
#[derive(Debug)]
pub struct ClientEntry<W> {
    /// Write handle
    pub sink: W,
    /// Registered mark, once the first frame arrived
    pub mark: Option<Mark>,
}

/// Live clients and the marks they own.
///
/// `clients` and `marks` always change together: a mark is present exactly
/// while the client that registered it is.
#[derive(Debug)]
pub struct ClientRegistry<W> {
    clients: HashMap<ClientId, ClientEntry<W>>,
    marks: HashMap<Mark, ClientId>,
    capacity: usize,
    next_id: ClientId,
}

impl<W: Clone> ClientRegistry<W> {
    /// Create a registry admitting at most `capacity` clients
    pub fn new(capacity: usize) -> Self {
        Self {
            clients: HashMap::with_capacity(capacity),
            marks: HashMap::with_capacity(capacity),
            capacity,
            next_id: 1,
        }
    }

    /// Admit a client, or `None` when the table is full
    pub fn admit(&mut self, sink: W) -> Option<ClientId> {
        if self.is_full() {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.clients.insert(id, ClientEntry { sink, mark: None });
        Some(id)
    }

    /// Remove a client together with its mark
    pub fn remove(&mut self, id: ClientId) -> Option<ClientEntry<W>> {
        let entry = self.clients.remove(&id)?;
        if let Some(mark) = entry.mark {
            if self.marks.get(&mark) == Some(&id) {
                self.marks.remove(&mark);
            }
        }
        Some(entry)
    }

    /// Remove every client
    pub fn clear(&mut self) -> Vec<ClientEntry<W>> {
        self.marks.clear();
        self.clients.drain().map(|(_, entry)| entry).collect()
    }

    /// Classify one complete frame from `from`
    pub fn handle_frame(&mut self, from: ClientId, frame: Bytes) -> Inbound<W> {
        let Some(sender) = self.clients.get_mut(&from) else {
            return Inbound::Close(CloseReason::Unknown);
        };

        if sender.mark.is_none() {
            let Some(mark) = Mark::from_slice(&frame) else {
                return Inbound::Close(CloseReason::BadRegistration { len: frame.len() });
            };
            if self.marks.contains_key(&mark) {
                return Inbound::Close(CloseReason::DuplicateMark(mark));
            }
            sender.mark = Some(mark);
            self.marks.insert(mark, from);
            return Inbound::Registered(mark);
        }

        if frame.len() < MARK_SIZE {
            return Inbound::Dropped(DropReason::Undersize);
        }
        let Some((mark, payload)) = split_forward(&frame) else {
            return Inbound::Dropped(DropReason::Undersize);
        };
        let Some(&dest) = self.marks.get(&mark) else {
            return Inbound::Dropped(DropReason::NoTarget);
        };
        let Some(target) = self.clients.get(&dest) else {
            return Inbound::Dropped(DropReason::NoTarget);
        };
        if payload.is_empty() {
            return Inbound::Dropped(DropReason::EmptyPayload);
        }

        Inbound::Forward {
            dest,
            mark,
            sink: target.sink.clone(),
            payload,
        }
    }

    /// Client currently owning `mark`
    #[cfg(test)]
    pub(crate) fn lookup(&self, mark: &Mark) -> Option<ClientId> {
        self.marks.get(mark).copied()
    }

    /// Mark registered by `id`
    #[cfg(test)]
    pub(crate) fn mark_of(&self, id: ClientId) -> Option<Mark> {
        self.clients.get(&id).and_then(|entry| entry.mark)
    }

    /// Number of admitted clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no clients are admitted
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Whether the client cap is reached
    pub fn is_full(&self) -> bool {
        self.clients.len() >= self.capacity
    }

    /// Number of registered marks
    pub fn mark_count(&self) -> usize {
        self.marks.len()
    }
}
