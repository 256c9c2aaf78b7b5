//! Local node state: role, neighbor table, GPS cache, and counters.
//!
//! `MeshNode` is pure bookkeeping. It never sends anything; the engine reads
//! it to decide what to transmit and writes to it as packets arrive.

use alloc::vec::Vec;

use crate::packet::{candidacy_score, election_hash};
use crate::types::{
    Error, GpsLocation, NodeId, NodeState, EDGE_RSSI_THRESHOLD, INVALID_NODE_ID,
    MAX_CLUSTER_SIZE, MAX_NEIGHBORS, MIN_DIRECT_NEIGHBORS_CANDIDATE, MIN_DIRECT_NEIGHBORS_CORE,
};

/// Reinforcing neighbors required right after hearing another candidate.
const REQUIREMENT_JUST_HEARD: u32 = 6;
/// Requirement one cycle later.
const REQUIREMENT_ONE_CYCLE: u32 = 3;
/// Requirement after two or more silent cycles.
const REQUIREMENT_SETTLED: u32 = 1;

/// One entry in the neighbor table.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub node_id: NodeId,
    pub rssi: i8,
    /// 1 for direct neighbors.
    pub hop_count: u8,
    pub last_seen_cycle: u32,
    pub is_clusterhead: bool,
    pub clusterhead_class: u16,
    pub gps: Option<GpsLocation>,
}

impl Neighbor {
    pub fn is_direct(&self) -> bool {
        self.hop_count == 1
    }
}

/// Message and cycle counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub messages_sent: u32,
    pub messages_received: u32,
    pub messages_forwarded: u32,
    pub messages_dropped: u32,
    pub discovery_cycles: u32,
    /// Refreshed by [`MeshNode::update_statistics`].
    pub avg_rssi: i8,
    /// Refreshed by [`MeshNode::update_statistics`].
    pub direct_connections: u16,
}

#[derive(Debug, Clone)]
pub struct MeshNode {
    node_id: NodeId,
    state: NodeState,
    prev_state: NodeState,
    state_entry_cycle: u32,

    gps: Option<GpsLocation>,
    gps_last_update_cycle: u32,
    /// Cycles a fix stays valid; 0 never expires.
    gps_cache_ttl: u32,

    neighbors: Vec<Neighbor>,

    clusterhead_id: NodeId,
    cluster_class: u16,
    pdsf: u32,
    candidacy_score: f64,
    election_hash: u32,

    noise_level: f64,
    last_candidate_heard_cycle: u32,
    current_cycle: u32,

    stats: NodeStats,
}

impl MeshNode {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            state: NodeState::Init,
            prev_state: NodeState::Init,
            state_entry_cycle: 0,
            gps: None,
            gps_last_update_cycle: 0,
            gps_cache_ttl: 0,
            neighbors: Vec::new(),
            clusterhead_id: INVALID_NODE_ID,
            cluster_class: 0,
            pdsf: 0,
            candidacy_score: 0.0,
            election_hash: election_hash(node_id),
            noise_level: 0.0,
            last_candidate_heard_cycle: 0,
            current_cycle: 0,
            stats: NodeStats::default(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    // --- State ---

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn prev_state(&self) -> NodeState {
        self.prev_state
    }

    pub fn state_entry_cycle(&self) -> u32 {
        self.state_entry_cycle
    }

    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    /// Move to `next` if the transition table allows it.
    pub fn set_state(&mut self, next: NodeState) -> Result<(), Error> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.prev_state = self.state;
        self.state = next;
        self.state_entry_cycle = self.current_cycle;
        Ok(())
    }

    // --- Cycles ---

    pub fn current_cycle(&self) -> u32 {
        self.current_cycle
    }

    pub fn advance_cycle(&mut self) {
        self.current_cycle = self.current_cycle.saturating_add(1);
        self.stats.discovery_cycles = self.stats.discovery_cycles.saturating_add(1);
    }

    // --- GPS ---

    pub fn set_gps(&mut self, location: GpsLocation) {
        self.gps = Some(location);
        self.gps_last_update_cycle = self.current_cycle;
    }

    pub fn clear_gps(&mut self) {
        self.gps = None;
    }

    /// Current fix, regardless of cache age.
    pub fn gps(&self) -> Option<&GpsLocation> {
        self.gps.as_ref()
    }

    pub fn set_gps_cache_ttl(&mut self, ttl_cycles: u32) {
        self.gps_cache_ttl = ttl_cycles;
    }

    /// A fix exists and is younger than the cache TTL (TTL 0 never expires).
    pub fn is_gps_cache_valid(&self) -> bool {
        if self.gps.is_none() {
            return false;
        }
        if self.gps_cache_ttl == 0 {
            return true;
        }
        self.gps_age() < self.gps_cache_ttl
    }

    /// Force the cached fix to expire. No-op when the cache never expires.
    pub fn invalidate_gps_cache(&mut self) {
        if self.gps_cache_ttl == 0 {
            return;
        }
        self.gps_last_update_cycle = self.current_cycle.saturating_sub(self.gps_cache_ttl);
        self.gps = None;
    }

    /// Cycles since the last fix.
    pub fn gps_age(&self) -> u32 {
        self.current_cycle.saturating_sub(self.gps_last_update_cycle)
    }

    // --- Neighbors ---

    pub fn neighbors(&self) -> &[Neighbor] {
        &self.neighbors
    }

    pub fn neighbor_count(&self) -> usize {
        self.neighbors.len()
    }

    pub fn find_neighbor(&self, id: NodeId) -> Option<&Neighbor> {
        self.neighbors.iter().find(|n| n.node_id == id)
    }

    /// Insert or refresh a neighbor. New entries are refused when the table is full.
    pub fn add_neighbor(&mut self, id: NodeId, rssi: i8, hop_count: u8) -> Result<(), Error> {
        let cycle = self.current_cycle;
        if let Some(existing) = self.neighbors.iter_mut().find(|n| n.node_id == id) {
            existing.rssi = rssi;
            existing.hop_count = hop_count;
            existing.last_seen_cycle = cycle;
            return Ok(());
        }
        if self.neighbors.len() >= MAX_NEIGHBORS {
            return Err(Error::CapacityExceeded);
        }
        self.neighbors.push(Neighbor {
            node_id: id,
            rssi,
            hop_count,
            last_seen_cycle: cycle,
            is_clusterhead: false,
            clusterhead_class: 0,
            gps: None,
        });
        Ok(())
    }

    /// Attach a position to a known neighbor. Returns false if unknown.
    pub fn update_neighbor_gps(&mut self, id: NodeId, location: GpsLocation) -> bool {
        match self.neighbors.iter_mut().find(|n| n.node_id == id) {
            Some(n) => {
                n.gps = Some(location);
                true
            }
            None => false,
        }
    }

    /// Flag a known neighbor as a clusterhead of `class`.
    pub fn mark_neighbor_clusterhead(&mut self, id: NodeId, class: u16) -> bool {
        match self.neighbors.iter_mut().find(|n| n.node_id == id) {
            Some(n) => {
                n.is_clusterhead = true;
                n.clusterhead_class = class;
                true
            }
            None => false,
        }
    }

    pub fn count_direct_neighbors(&self) -> usize {
        self.neighbors.iter().filter(|n| n.is_direct()).count()
    }

    /// Integer mean RSSI over all neighbors, 0 when the table is empty.
    pub fn average_rssi(&self) -> i8 {
        if self.neighbors.is_empty() {
            return 0;
        }
        let sum: i32 = self.neighbors.iter().map(|n| n.rssi as i32).sum();
        (sum / self.neighbors.len() as i32) as i8
    }

    /// Drop neighbors not seen for more than `max_age` cycles. Returns the count removed.
    pub fn prune_stale_neighbors(&mut self, max_age: u32) -> usize {
        let cycle = self.current_cycle;
        let before = self.neighbors.len();
        self.neighbors
            .retain(|n| cycle.saturating_sub(n.last_seen_cycle) <= max_age);
        before - self.neighbors.len()
    }

    // --- Role decisions ---

    /// Poorly connected: under 3 direct neighbors or weak average signal.
    pub fn should_become_edge(&self) -> bool {
        self.count_direct_neighbors() < MIN_DIRECT_NEIGHBORS_CORE
            || self.average_rssi() < EDGE_RSSI_THRESHOLD
    }

    /// Well connected, room left in the table, and acceptable signal.
    fn meets_candidate_baseline(&self) -> bool {
        self.count_direct_neighbors() >= MIN_DIRECT_NEIGHBORS_CANDIDATE
            && self.neighbors.len() < MAX_NEIGHBORS
            && self.average_rssi() >= EDGE_RSSI_THRESHOLD
    }

    /// Reinforcing neighbors currently required: 6 right after hearing a
    /// candidate, 3 one cycle later, then 1.
    pub fn candidacy_requirement(&self) -> u32 {
        match self
            .current_cycle
            .saturating_sub(self.last_candidate_heard_cycle)
        {
            0 => REQUIREMENT_JUST_HEARD,
            1 => REQUIREMENT_ONE_CYCLE,
            _ => REQUIREMENT_SETTLED,
        }
    }

    /// Baseline checks plus the decaying requirement.
    ///
    /// The direct-neighbor share of a full cluster, discounted by noise, must
    /// reach `requirement^2 / (MAX_CLUSTER_SIZE / 2)`.
    pub fn should_become_candidate(&self) -> bool {
        if !self.meets_candidate_baseline() {
            return false;
        }
        let cluster = MAX_CLUSTER_SIZE as f64;
        let direct = self.count_direct_neighbors() as f64;
        let ratio = (direct / cluster) / (1.0 + self.noise_level);
        let requirement = self.candidacy_requirement() as f64;
        let threshold = (requirement * requirement) / (0.5 * cluster);
        ratio >= threshold
    }

    /// Score from the current direct-neighbor count.
    pub fn calculate_candidacy_score(&self, noise_level: f64) -> f64 {
        candidacy_score(self.count_direct_neighbors() as u32, noise_level)
    }

    pub fn mark_candidate_heard(&mut self) {
        self.last_candidate_heard_cycle = self.current_cycle;
    }

    pub fn last_candidate_heard_cycle(&self) -> u32 {
        self.last_candidate_heard_cycle
    }

    pub fn noise_level(&self) -> f64 {
        self.noise_level
    }

    pub fn set_noise_level(&mut self, noise_level: f64) {
        self.noise_level = noise_level;
    }

    // --- Cluster alignment ---

    pub fn clusterhead_id(&self) -> NodeId {
        self.clusterhead_id
    }

    pub fn has_clusterhead(&self) -> bool {
        self.clusterhead_id != INVALID_NODE_ID
    }

    pub fn cluster_class(&self) -> u16 {
        self.cluster_class
    }

    pub fn set_clusterhead(&mut self, id: NodeId, class: u16) {
        self.clusterhead_id = id;
        self.cluster_class = class;
    }

    pub fn clear_clusterhead(&mut self) {
        self.clusterhead_id = INVALID_NODE_ID;
        self.cluster_class = 0;
    }

    pub fn pdsf(&self) -> u32 {
        self.pdsf
    }

    pub fn set_pdsf(&mut self, pdsf: u32) {
        self.pdsf = pdsf;
    }

    pub fn candidacy_score(&self) -> f64 {
        self.candidacy_score
    }

    pub fn set_candidacy_score(&mut self, score: f64) {
        self.candidacy_score = score;
    }

    pub fn election_hash(&self) -> u32 {
        self.election_hash
    }

    // --- Statistics ---

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn update_statistics(&mut self) {
        self.stats.avg_rssi = self.average_rssi();
        self.stats.direct_connections = self.count_direct_neighbors() as u16;
    }

    pub fn inc_sent(&mut self) {
        self.stats.messages_sent = self.stats.messages_sent.saturating_add(1);
    }

    pub fn inc_received(&mut self) {
        self.stats.messages_received = self.stats.messages_received.saturating_add(1);
    }

    pub fn inc_forwarded(&mut self) {
        self.stats.messages_forwarded = self.stats.messages_forwarded.saturating_add(1);
    }

    pub fn inc_dropped(&mut self) {
        self.stats.messages_dropped = self.stats.messages_dropped.saturating_add(1);
    }

    /// Back to a freshly constructed node with the same id.
    pub fn reset(&mut self) {
        *self = MeshNode::new(self.node_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_node() {
        let node = MeshNode::new(42);
        assert_eq!(node.node_id(), 42);
        assert_eq!(node.state(), NodeState::Init);
        assert_eq!(node.prev_state(), NodeState::Init);
        assert!(node.gps().is_none());
        assert_eq!(node.clusterhead_id(), INVALID_NODE_ID);
        assert_eq!(node.pdsf(), 0);
        assert_ne!(node.election_hash(), 0);
        assert_eq!(node.stats(), &NodeStats::default());
    }

    #[test]
    fn test_state_transitions_record_history() {
        let mut node = MeshNode::new(1);
        node.advance_cycle();
        assert!(node.set_state(NodeState::Discovery).is_ok());
        assert_eq!(node.prev_state(), NodeState::Init);
        assert_eq!(node.state_entry_cycle(), 1);

        node.advance_cycle();
        assert!(node.set_state(NodeState::Edge).is_ok());
        assert!(node.set_state(NodeState::CandidateClusterhead).is_ok());
        assert!(node.set_state(NodeState::Clusterhead).is_ok());
        assert_eq!(node.prev_state(), NodeState::CandidateClusterhead);
        assert_eq!(node.state_entry_cycle(), 2);
    }

    #[test]
    fn test_invalid_transition_leaves_state() {
        let mut node = MeshNode::new(1);
        assert_eq!(
            node.set_state(NodeState::Clusterhead),
            Err(Error::InvalidTransition {
                from: NodeState::Init,
                to: NodeState::Clusterhead
            })
        );
        assert_eq!(node.state(), NodeState::Init);

        node.set_state(NodeState::Discovery).unwrap();
        assert!(node.set_state(NodeState::Clusterhead).is_err());
        assert_eq!(node.state(), NodeState::Discovery);
    }

    #[test]
    fn test_gps_cache() {
        let mut node = MeshNode::new(1);
        assert!(!node.is_gps_cache_valid());

        node.set_gps(GpsLocation::new(10.5, 20.3, 5.0));
        assert!(node.is_gps_cache_valid());
        node.advance_cycle();
        node.advance_cycle();
        // TTL 0 never expires.
        assert!(node.is_gps_cache_valid());

        node.set_gps_cache_ttl(3);
        assert_eq!(node.gps_age(), 2);
        assert!(node.is_gps_cache_valid());
        node.advance_cycle();
        assert!(!node.is_gps_cache_valid());

        node.set_gps(GpsLocation::new(1.0, 1.0, 1.0));
        assert!(node.is_gps_cache_valid());
        node.invalidate_gps_cache();
        assert!(!node.is_gps_cache_valid());
        assert!(node.gps().is_none());
    }

    #[test]
    fn test_invalidate_without_ttl_is_noop() {
        let mut node = MeshNode::new(1);
        node.set_gps(GpsLocation::new(1.0, 2.0, 3.0));
        node.invalidate_gps_cache();
        assert!(node.is_gps_cache_valid());
        node.clear_gps();
        assert!(!node.is_gps_cache_valid());
    }

    #[test]
    fn test_add_and_update_neighbor() {
        let mut node = MeshNode::new(1);
        node.add_neighbor(100, -50, 1).unwrap();
        node.add_neighbor(200, -60, 2).unwrap();
        assert_eq!(node.neighbor_count(), 2);

        node.advance_cycle();
        node.add_neighbor(100, -45, 1).unwrap();
        let n = node.find_neighbor(100).unwrap();
        assert_eq!(n.rssi, -45);
        assert_eq!(n.last_seen_cycle, 1);
        assert_eq!(node.neighbor_count(), 2);

        assert!(node.update_neighbor_gps(100, GpsLocation::new(15.0, 25.0, 3.0)));
        assert!(!node.update_neighbor_gps(999, GpsLocation::default()));
        assert_eq!(
            node.find_neighbor(100).and_then(|n| n.gps),
            Some(GpsLocation::new(15.0, 25.0, 3.0))
        );
    }

    #[test]
    fn test_neighbor_table_full() {
        let mut node = MeshNode::new(1);
        for id in 0..MAX_NEIGHBORS as u32 {
            node.add_neighbor(id + 10, -50, 1).unwrap();
        }
        assert_eq!(node.add_neighbor(5000, -50, 1), Err(Error::CapacityExceeded));
        // Existing entries still update.
        assert!(node.add_neighbor(10, -40, 1).is_ok());
    }

    #[test]
    fn test_direct_count_and_average() {
        let mut node = MeshNode::new(1);
        node.add_neighbor(100, -40, 1).unwrap();
        node.add_neighbor(101, -50, 1).unwrap();
        node.add_neighbor(102, -60, 1).unwrap();
        node.add_neighbor(200, -70, 2).unwrap();
        assert_eq!(node.count_direct_neighbors(), 3);
        // (-40 - 50 - 60 - 70) / 4 = -55
        assert_eq!(node.average_rssi(), -55);
        assert_eq!(MeshNode::new(2).average_rssi(), 0);

        node.update_statistics();
        assert_eq!(node.stats().direct_connections, 3);
        assert_eq!(node.stats().avg_rssi, -55);
    }

    #[test]
    fn test_prune_stale_neighbors() {
        let mut node = MeshNode::new(1);
        node.add_neighbor(100, -50, 1).unwrap();
        node.add_neighbor(101, -55, 1).unwrap();
        node.add_neighbor(102, -60, 1).unwrap();
        for _ in 0..5 {
            node.advance_cycle();
        }
        node.add_neighbor(100, -50, 1).unwrap();
        for _ in 0..5 {
            node.advance_cycle();
        }
        let removed = node.prune_stale_neighbors(5);
        assert_eq!(removed, 2);
        assert_eq!(node.neighbor_count(), 1);
        assert!(node.find_neighbor(100).is_some());
    }

    #[test]
    fn test_should_become_edge() {
        let mut node = MeshNode::new(1);
        node.add_neighbor(100, -50, 1).unwrap();
        node.add_neighbor(101, -55, 1).unwrap();
        assert!(node.should_become_edge());
        node.add_neighbor(102, -60, 1).unwrap();
        node.add_neighbor(103, -65, 1).unwrap();
        assert!(!node.should_become_edge());

        let mut faint = MeshNode::new(2);
        for id in 0..4 {
            faint.add_neighbor(id + 10, -90, 1).unwrap();
        }
        assert!(faint.should_become_edge());
    }

    #[test]
    fn test_candidacy_requirement_decays() {
        let mut node = MeshNode::new(50);
        node.set_noise_level(0.0);
        node.add_neighbor(100, -50, 1).unwrap();
        node.add_neighbor(101, -55, 1).unwrap();
        assert!(!node.should_become_candidate());

        node.add_neighbor(102, -55, 1).unwrap();
        node.add_neighbor(103, -60, 1).unwrap();
        node.add_neighbor(104, -60, 1).unwrap();
        assert_eq!(node.candidacy_requirement(), 6);
        assert!(!node.should_become_candidate());

        node.advance_cycle();
        assert_eq!(node.candidacy_requirement(), 3);
        assert!(!node.should_become_candidate());

        node.advance_cycle();
        assert_eq!(node.candidacy_requirement(), 1);
        assert!(node.should_become_candidate());

        node.mark_candidate_heard();
        assert!(!node.should_become_candidate());

        node.advance_cycle();
        node.advance_cycle();
        node.set_noise_level(50.0);
        assert!(!node.should_become_candidate());

        node.set_noise_level(0.0);
        assert!(node.should_become_candidate());
    }

    #[test]
    fn test_candidacy_score_from_neighbors() {
        let mut node = MeshNode::new(60);
        for i in 0..5 {
            node.add_neighbor(100 + i, -50, 1).unwrap();
        }
        let score = node.calculate_candidacy_score(0.0);
        assert!((score - (5.0 + 5.0 / 150.0)).abs() < 1e-9);
    }

    #[test]
    fn test_counters_and_reset() {
        let mut node = MeshNode::new(7);
        node.inc_sent();
        node.inc_received();
        node.inc_received();
        node.inc_forwarded();
        node.inc_dropped();
        node.advance_cycle();
        assert_eq!(node.stats().messages_sent, 1);
        assert_eq!(node.stats().messages_received, 2);
        assert_eq!(node.stats().messages_forwarded, 1);
        assert_eq!(node.stats().messages_dropped, 1);
        assert_eq!(node.stats().discovery_cycles, 1);

        node.set_clusterhead(9, 2);
        assert!(node.has_clusterhead());
        node.reset();
        assert_eq!(node.node_id(), 7);
        assert!(!node.has_clusterhead());
        assert_eq!(node.current_cycle(), 0);
    }

    #[test]
    fn test_counters_saturate() {
        let mut node = MeshNode::new(8);
        node.stats.messages_sent = u32::MAX;
        node.stats.messages_received = u32::MAX;
        node.stats.messages_forwarded = u32::MAX;
        node.stats.messages_dropped = u32::MAX;
        node.stats.discovery_cycles = u32::MAX;
        node.current_cycle = u32::MAX;

        node.inc_sent();
        node.inc_received();
        node.inc_forwarded();
        node.inc_dropped();
        node.advance_cycle();

        assert_eq!(node.stats().messages_sent, u32::MAX);
        assert_eq!(node.stats().messages_received, u32::MAX);
        assert_eq!(node.stats().messages_forwarded, u32::MAX);
        assert_eq!(node.stats().messages_dropped, u32::MAX);
        assert_eq!(node.stats().discovery_cycles, u32::MAX);
        assert_eq!(node.current_cycle(), u32::MAX);
    }
}
