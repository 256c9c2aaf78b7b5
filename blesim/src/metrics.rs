//! Metrics collection for simulation analysis.

use blemesh::{NodeId, NodeState, NodeStats, Timestamp};
use hashbrown::HashMap;

/// Per-node view recorded in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeRecord {
    pub state: NodeState,
    /// `None` when no clusterhead is selected.
    pub clusterhead: Option<NodeId>,
    pub direct_neighbors: usize,
    /// Cycle in which the node last heard another candidate, 0 if never.
    pub last_candidate_heard: u32,
    pub stats: NodeStats,
}

/// Election state of every node at one point in time.
#[derive(Debug, Clone)]
pub struct ElectionSnapshot {
    pub time: Timestamp,
    pub nodes: HashMap<NodeId, NodeRecord>,
}

impl ElectionSnapshot {
    pub fn new(time: Timestamp) -> Self {
        Self {
            time,
            nodes: HashMap::new(),
        }
    }

    pub fn record_node(&mut self, node_id: NodeId, record: NodeRecord) {
        self.nodes.insert(node_id, record);
    }

    pub fn get(&self, node_id: NodeId) -> Option<&NodeRecord> {
        self.nodes.get(&node_id)
    }

    /// Nodes in the Clusterhead state, sorted by id.
    pub fn clusterheads(&self) -> Vec<NodeId> {
        self.with_state(NodeState::Clusterhead)
    }

    /// Nodes in `state`, sorted by id.
    pub fn with_state(&self, state: NodeState) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, r)| r.state == state)
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Selected clusterhead is a node present in this snapshot.
    pub fn has_valid_clusterhead(&self, node_id: NodeId) -> bool {
        self.get(node_id)
            .and_then(|r| r.clusterhead)
            .is_some_and(|ch| self.nodes.contains_key(&ch))
    }

    /// Clusterheads plus nodes with a valid selection.
    pub fn clustered_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|(&id, r)| r.state == NodeState::Clusterhead || self.has_valid_clusterhead(id))
            .count()
    }

    /// Every Member points at a node in this snapshot.
    pub fn members_valid(&self) -> bool {
        self.with_state(NodeState::Member)
            .into_iter()
            .all(|id| self.has_valid_clusterhead(id))
    }

    /// At least one clusterhead, and every node is either one or has one.
    pub fn fully_clustered(&self) -> bool {
        !self.clusterheads().is_empty() && self.clustered_count() == self.nodes.len()
    }
}

/// Simulation metrics collected over time.
#[derive(Debug, Clone, Default)]
pub struct SimMetrics {
    /// Frames put on the air.
    pub frames_sent: u64,
    /// Frame copies lost to link loss.
    pub frames_dropped: u64,
    /// Frame copies handed to a receiver.
    pub frames_delivered: u64,
    /// Delivered frames the receiver could not decode.
    pub decode_errors: u64,
    pub snapshots: Vec<ElectionSnapshot>,
}

impl SimMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_snapshot(&mut self, snapshot: ElectionSnapshot) {
        self.snapshots.push(snapshot);
    }

    /// First snapshot time at which the network was fully clustered.
    pub fn clustering_time(&self) -> Option<Timestamp> {
        self.snapshots
            .iter()
            .find(|s| s.fully_clustered())
            .map(|s| s.time)
    }

    pub fn latest_snapshot(&self) -> Option<&ElectionSnapshot> {
        self.snapshots.last()
    }
}

/// Result of running a simulation.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub end_time: Timestamp,
    pub metrics: SimMetrics,
    /// Ended because no events were left, not because of the time limit.
    pub queue_exhausted: bool,
}

impl SimulationResult {
    /// Clusterheads in the final snapshot.
    pub fn final_clusterheads(&self) -> Vec<NodeId> {
        self.metrics
            .latest_snapshot()
            .map(|s| s.clusterheads())
            .unwrap_or_default()
    }

    pub fn fully_clustered(&self) -> bool {
        self.metrics
            .latest_snapshot()
            .is_some_and(|s| s.fully_clustered())
    }
}
