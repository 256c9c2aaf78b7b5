//! Bounded forwarding queue with loop and duplicate rejection.
//!
//! Packets are held in a fixed array of slots; a new packet takes the first
//! free slot. `peek`/`dequeue` return the lowest priority value (highest TTL),
//! breaking ties by slot order.
//!
//! The seen-cache is keyed on `(sender_id, (sender_id << 32) | ttl)`. That key
//! is coarse: two distinct packets from one sender with equal TTL collide, and
//! the same packet relayed with a lower TTL passes again.

use alloc::vec::Vec;

use crate::collections::ShrinkingHashMap;
use crate::forwarding::priority;
use crate::packet::Packet;
use crate::time::{Duration, Timestamp};
use crate::types::{Error, NodeId, MAX_QUEUE_SIZE, MAX_SEEN_MESSAGES};

/// A queued packet.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub packet: Packet,
    pub received_at: Timestamp,
    /// Lower is more urgent.
    pub priority: u8,
}

/// Dedup record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeenRecord {
    pub sender_id: NodeId,
    pub message_id: u64,
    pub seen_at: Timestamp,
}

/// Lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u32,
    pub dequeued: u32,
    pub duplicates: u32,
    pub loops: u32,
    pub overflows: u32,
}

/// Dedup key for a packet.
pub fn message_id(packet: &Packet) -> u64 {
    ((packet.sender_id() as u64) << 32) | packet.ttl() as u64
}

pub struct ForwardingQueue {
    slots: Vec<Option<QueueEntry>>,
    size: usize,
    seen: ShrinkingHashMap<(NodeId, u64), SeenRecord>,
    stats: QueueStats,
}

impl Default for ForwardingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ForwardingQueue {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_QUEUE_SIZE);
        slots.resize_with(MAX_QUEUE_SIZE, || None);
        Self {
            slots,
            size: 0,
            seen: ShrinkingHashMap::with_max_capacity(MAX_SEEN_MESSAGES),
            stats: QueueStats::default(),
        }
    }

    /// Queue a packet received at `now` for relaying by `local_node_id`.
    ///
    /// Checks run in order: loop, duplicate, overflow. Each rejection bumps
    /// its counter. A full seen-cache skips recording but still queues.
    pub fn enqueue(
        &mut self,
        packet: &Packet,
        local_node_id: NodeId,
        now: Timestamp,
    ) -> Result<(), Error> {
        if packet.is_in_path(local_node_id) {
            self.stats.loops = self.stats.loops.saturating_add(1);
            return Err(Error::LoopDetected);
        }

        let id = message_id(packet);
        let key = (packet.sender_id(), id);
        if self.seen.contains_key(&key) {
            self.stats.duplicates = self.stats.duplicates.saturating_add(1);
            return Err(Error::Duplicate);
        }

        let Some(slot) = self.slots.iter().position(Option::is_none) else {
            self.stats.overflows = self.stats.overflows.saturating_add(1);
            return Err(Error::QueueOverflow);
        };

        self.slots[slot] = Some(QueueEntry {
            packet: packet.clone(),
            received_at: now,
            priority: priority(packet.ttl()),
        });
        self.size += 1;

        if !self.seen.is_full() {
            self.seen.insert(
                key,
                SeenRecord {
                    sender_id: packet.sender_id(),
                    message_id: id,
                    seen_at: now,
                },
            );
        }

        self.stats.enqueued = self.stats.enqueued.saturating_add(1);
        Ok(())
    }

    fn best_slot(&self) -> Option<usize> {
        let mut best: Option<(usize, u8)> = None;
        for (i, entry) in self.slots.iter().enumerate() {
            if let Some(entry) = entry {
                match best {
                    Some((_, p)) if entry.priority >= p => {}
                    _ => best = Some((i, entry.priority)),
                }
            }
        }
        best.map(|(i, _)| i)
    }

    /// Most urgent entry without removing it.
    pub fn peek(&self) -> Option<&QueueEntry> {
        let slot = self.best_slot()?;
        self.slots[slot].as_ref()
    }

    /// Remove and return the most urgent entry.
    pub fn dequeue(&mut self) -> Option<QueueEntry> {
        let slot = self.best_slot()?;
        let entry = self.slots[slot].take()?;
        self.size -= 1;
        self.stats.dequeued = self.stats.dequeued.saturating_add(1);
        Some(entry)
    }

    /// Evict seen records older than `max_age`. Queued packets are untouched.
    pub fn clean_old_entries(&mut self, now: Timestamp, max_age: Duration) -> usize {
        self.seen.retain(|_, rec| now.saturating_sub(rec.seen_at) <= max_age)
    }

    /// Drop all queued packets and seen records. Counters are kept.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.size = 0;
        self.seen.clear();
    }

    pub fn has_seen(&self, sender_id: NodeId, message_id: u64) -> bool {
        self.seen.contains_key(&(sender_id, message_id))
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_full(&self) -> bool {
        self.size >= MAX_QUEUE_SIZE
    }

    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::DiscoveryPacket;

    fn pkt(sender: NodeId, ttl: u8, path: &[NodeId]) -> Packet {
        let mut p = DiscoveryPacket::new(sender);
        p.ttl = ttl;
        for id in path {
            p.add_to_path(*id).unwrap();
        }
        Packet::Discovery(p)
    }

    #[test]
    fn test_loop_rejected() {
        let mut q = ForwardingQueue::new();
        let p = pkt(1, 5, &[1, 2, 7]);
        assert_eq!(q.enqueue(&p, 7, Timestamp::ZERO), Err(Error::LoopDetected));
        assert_eq!(q.stats().loops, 1);
        assert!(q.is_empty());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut q = ForwardingQueue::new();
        let p = pkt(1, 5, &[1]);
        assert!(q.enqueue(&p, 9, Timestamp::ZERO).is_ok());
        assert_eq!(q.enqueue(&p, 9, Timestamp::ZERO), Err(Error::Duplicate));
        assert_eq!(q.stats().duplicates, 1);
        assert!(q.has_seen(1, message_id(&p)));

        // Same sender, different TTL is a different message id.
        assert!(q.enqueue(&pkt(1, 4, &[1, 2]), 9, Timestamp::ZERO).is_ok());
    }

    #[test]
    fn test_overflow_bounded() {
        let mut q = ForwardingQueue::new();
        for sender in 1..=(MAX_QUEUE_SIZE as u32 + 20) {
            let _ = q.enqueue(&pkt(sender, 5, &[sender]), 999, Timestamp::ZERO);
            assert!(q.len() <= MAX_QUEUE_SIZE);
        }
        assert!(q.is_full());
        assert_eq!(q.stats().overflows, 20);
        assert_eq!(q.stats().enqueued, MAX_QUEUE_SIZE as u32);
    }

    #[test]
    fn test_dequeue_highest_ttl_first() {
        let mut q = ForwardingQueue::new();
        for (sender, ttl) in [(1, 2), (2, 5), (3, 10)] {
            q.enqueue(&pkt(sender, ttl, &[sender]), 99, Timestamp::ZERO)
                .unwrap();
        }
        assert_eq!(q.peek().map(|e| e.packet.ttl()), Some(10));
        let order: Vec<u8> = core::iter::from_fn(|| q.dequeue())
            .map(|e| e.packet.ttl())
            .collect();
        assert_eq!(order, [10, 5, 2]);
        assert_eq!(q.stats().dequeued, 3);
        assert!(q.dequeue().is_none());
    }

    #[test]
    fn test_ties_break_by_slot_order() {
        let mut q = ForwardingQueue::new();
        q.enqueue(&pkt(4, 6, &[4]), 99, Timestamp::ZERO).unwrap();
        q.enqueue(&pkt(5, 6, &[5]), 99, Timestamp::ZERO).unwrap();
        assert_eq!(q.dequeue().map(|e| e.packet.sender_id()), Some(4));
        // Slot 0 is now free and the next packet lands there.
        q.enqueue(&pkt(6, 6, &[6]), 99, Timestamp::ZERO).unwrap();
        assert_eq!(q.dequeue().map(|e| e.packet.sender_id()), Some(6));
        assert_eq!(q.dequeue().map(|e| e.packet.sender_id()), Some(5));
    }

    #[test]
    fn test_seen_cache_full_still_enqueues() {
        let mut q = ForwardingQueue::new();
        let mut sender = 1;
        // Fill the seen-cache by cycling packets through the queue.
        while q.seen_len() < MAX_SEEN_MESSAGES {
            q.enqueue(&pkt(sender, 3, &[sender]), 999, Timestamp::ZERO)
                .unwrap();
            q.dequeue();
            sender += 1;
        }
        let p = pkt(sender, 3, &[sender]);
        assert!(q.enqueue(&p, 999, Timestamp::ZERO).is_ok());
        assert_eq!(q.seen_len(), MAX_SEEN_MESSAGES);
        // Not recorded, so the same packet is accepted again.
        assert!(q.enqueue(&p, 999, Timestamp::ZERO).is_ok());
    }

    #[test]
    fn test_clean_old_entries_only_touches_seen() {
        let mut q = ForwardingQueue::new();
        q.enqueue(&pkt(1, 5, &[1]), 9, Timestamp::from_millis(0))
            .unwrap();
        q.enqueue(&pkt(2, 5, &[2]), 9, Timestamp::from_millis(900))
            .unwrap();
        let removed = q.clean_old_entries(Timestamp::from_millis(1000), Duration::from_millis(500));
        assert_eq!(removed, 1);
        assert_eq!(q.seen_len(), 1);
        assert_eq!(q.len(), 2);
        // The evicted id is accepted again.
        assert!(q.enqueue(&pkt(1, 5, &[1]), 9, Timestamp::from_millis(1000)).is_ok());
    }

    #[test]
    fn test_clear_keeps_counters() {
        let mut q = ForwardingQueue::new();
        q.enqueue(&pkt(1, 5, &[1]), 9, Timestamp::ZERO).unwrap();
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.seen_len(), 0);
        assert_eq!(q.stats().enqueued, 1);
        assert!(q.peek().is_none());
    }

    #[test]
    fn test_counters_saturate() {
        let mut q = ForwardingQueue::new();
        q.stats = QueueStats {
            enqueued: u32::MAX,
            dequeued: u32::MAX,
            duplicates: u32::MAX,
            loops: u32::MAX,
            overflows: u32::MAX,
        };
        let p = pkt(1, 5, &[1]);
        q.enqueue(&p, 9, Timestamp::ZERO).unwrap();
        assert_eq!(q.enqueue(&p, 9, Timestamp::ZERO), Err(Error::Duplicate));
        assert_eq!(q.enqueue(&pkt(2, 5, &[9]), 9, Timestamp::ZERO), Err(Error::LoopDetected));
        assert!(q.dequeue().is_some());

        let stats = q.stats();
        assert_eq!(stats.enqueued, u32::MAX);
        assert_eq!(stats.dequeued, u32::MAX);
        assert_eq!(stats.duplicates, u32::MAX);
        assert_eq!(stats.loops, u32::MAX);
    }
}
