//! Event types and priority queue ordering for discrete event simulation.

use std::cmp::Ordering;

use blemesh::{NodeId, Timestamp};

/// Unique sequence number for deterministic event ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Scenario actions that can be scheduled during simulation.
#[derive(Debug, Clone)]
pub enum ScenarioAction {
    /// Partition the network into isolated groups.
    Partition { groups: Vec<Vec<NodeId>> },
    /// Restore every link.
    HealPartition,
    DisableLink { from: NodeId, to: NodeId },
    EnableLink { from: NodeId, to: NodeId },
    SetLossRate { from: NodeId, to: NodeId, rate: f64 },
    /// Power a node down: it ignores ticks and frames.
    DisableNode { node: NodeId },
    EnableNode { node: NodeId },
    /// Record an election snapshot.
    TakeSnapshot,
}

/// Events in the discrete event simulation.
#[derive(Debug, Clone)]
pub enum Event {
    /// An encoded frame arrives at `to`.
    FrameDelivery {
        to: NodeId,
        from: NodeId,
        data: Vec<u8>,
        rssi: i8,
    },
    /// Slot boundary for a node.
    Tick { node: NodeId },
    ScenarioAction(ScenarioAction),
}

/// A scheduled event with timestamp and sequence number for ordering.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub time: Timestamp,
    /// Breaks ties between same-time events in scheduling order.
    pub seq: SequenceNumber,
    pub event: Event,
}

impl ScheduledEvent {
    pub fn new(time: Timestamp, seq: SequenceNumber, event: Event) -> Self {
        Self { time, seq, event }
    }
}

// Reversed ordering so that BinaryHeap (a max-heap) pops the earliest event.
impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BinaryHeap;

    use super::*;

    fn tick_at(ms: u64, seq: u64) -> ScheduledEvent {
        ScheduledEvent::new(
            Timestamp::from_millis(ms),
            SequenceNumber::new(seq),
            Event::Tick { node: 1 },
        )
    }

    #[test]
    fn test_event_ordering() {
        // Earlier time is "greater" in min-heap terms.
        assert!(tick_at(5, 2) > tick_at(10, 1));
    }

    #[test]
    fn test_same_time_sequence_ordering() {
        assert!(tick_at(10, 1) > tick_at(10, 2));
    }

    #[test]
    fn test_heap_pops_in_time_then_seq_order() {
        let mut heap = BinaryHeap::new();
        heap.push(tick_at(20, 0));
        heap.push(tick_at(10, 2));
        heap.push(tick_at(10, 1));
        heap.push(tick_at(15, 3));

        let order: Vec<(u64, u64)> = std::iter::from_fn(|| heap.pop())
            .map(|e| (e.time.as_millis(), e.seq.value()))
            .collect();
        assert_eq!(order, vec![(10, 1), (10, 2), (15, 3), (20, 0)]);
    }
}
