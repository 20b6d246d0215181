//! Thread-safe FIFO of reassembled packets.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Inbound packets waiting for the caller.
///
/// Filled by the manager's event pump and drained by whoever polls for
/// data, possibly from another thread. Every operation takes the queue's
/// single lock.
#[derive(Debug, Default)]
pub struct PacketQueue {
    packets: Mutex<VecDeque<Bytes>>,
}

impl PacketQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a packet at the tail
    pub fn push(&self, packet: Bytes) {
        self.packets.lock().push_back(packet);
    }

    /// Remove and return the head packet
    pub fn pop(&self) -> Option<Bytes> {
        self.packets.lock().pop_front()
    }

    /// Remove the head packet only if it is at most `max_len` bytes.
    ///
    /// A larger head stays queued and its size is returned as the error.
    pub fn pop_fitting(&self, max_len: usize) -> Result<Option<Bytes>, usize> {
        let mut packets = self.packets.lock();
        match packets.front() {
            None => Ok(None),
            Some(head) if head.len() > max_len => Err(head.len()),
            Some(_) => Ok(packets.pop_front()),
        }
    }

    /// Size of the head packet without removing it
    pub fn peek_size(&self) -> Option<u32> {
        self.packets.lock().front().map(|p| p.len() as u32)
    }

    /// Whether the queue holds no packets
    pub fn is_empty(&self) -> bool {
        self.packets.lock().is_empty()
    }

    /// Number of queued packets
    pub fn len(&self) -> usize {
        self.packets.lock().len()
    }

    /// Drop every queued packet
    pub fn clear(&self) {
        self.packets.lock().clear();
    }

    /// Take every queued packet in order, leaving the queue empty
    pub fn drain(&self) -> Vec<Bytes> {
        self.packets.lock().drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order_and_peek() {
        let q = PacketQueue::new();
        assert!(q.is_empty());
        assert_eq!(q.peek_size(), None);

        q.push(Bytes::from_static(b"first"));
        q.push(Bytes::from_static(b"second!"));
        assert_eq!(q.len(), 2);
        assert_eq!(q.peek_size(), Some(5));
        assert_eq!(q.peek_size(), Some(5));

        assert_eq!(q.pop().as_deref(), Some(&b"first"[..]));
        assert_eq!(q.peek_size(), Some(7));
        assert_eq!(q.pop().as_deref(), Some(&b"second!"[..]));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn test_pop_fitting_keeps_large_head() {
        let q = PacketQueue::new();
        assert_eq!(q.pop_fitting(8), Ok(None));

        q.push(Bytes::from_static(b"0123456789"));
        q.push(Bytes::from_static(b"ab"));
        assert_eq!(q.pop_fitting(8), Err(10));
        assert_eq!(q.len(), 2);

        assert_eq!(q.pop_fitting(10), Ok(Some(Bytes::from_static(b"0123456789"))));
        assert_eq!(q.pop_fitting(2), Ok(Some(Bytes::from_static(b"ab"))));
        assert!(q.is_empty());
    }

    #[test]
    fn test_clear_and_drain() {
        let q = PacketQueue::new();
        for i in 0..4u8 {
            q.push(Bytes::from(vec![i; 3]));
        }
        let drained = q.drain();
        assert_eq!(drained.len(), 4);
        assert_eq!(drained[3][0], 3);
        assert!(q.is_empty());

        q.push(Bytes::from_static(b"x"));
        q.clear();
        assert!(q.is_empty());
    }

    #[test]
    fn test_concurrent_producer_consumer() {
        let q = Arc::new(PacketQueue::new());
        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                for i in 0..1000u32 {
                    q.push(Bytes::copy_from_slice(&i.to_le_bytes()));
                }
            })
        };

        let mut seen = Vec::new();
        while seen.len() < 1000 {
            if let Some(p) = q.pop() {
                seen.push(u32::from_le_bytes([p[0], p[1], p[2], p[3]]));
            } else {
                thread::yield_now();
            }
        }
        producer.join().unwrap();

        assert_eq!(seen, (0..1000).collect::<Vec<_>>());
    }
}
