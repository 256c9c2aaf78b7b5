//! Discrete event simulator for blemesh engines.

use std::collections::BinaryHeap;

use blemesh::{ConfigError, Duration, EngineConfig, NodeId, Timestamp};
use hashbrown::HashMap;

use crate::event::{Event, ScenarioAction, ScheduledEvent, SequenceNumber};
use crate::metrics::{ElectionSnapshot, NodeRecord, SimMetrics, SimulationResult};
use crate::node::SimNode;
use crate::topology::Topology;

/// Discrete event simulator for blemesh networks.
pub struct Simulator {
    nodes: HashMap<NodeId, SimNode>,
    topology: Topology,
    /// Template for new nodes. The node id and seeds are filled in per node.
    engine_config: EngineConfig,
    seed: u64,
    current_time: Timestamp,
    event_queue: BinaryHeap<ScheduledEvent>,
    metrics: SimMetrics,
    next_seq: u64,
    /// RNG state for link loss.
    rng_state: u64,
    snapshot_interval: Option<Duration>,
    next_snapshot: Option<Timestamp>,
}

impl Simulator {
    pub fn new(seed: u64) -> Self {
        Self {
            nodes: HashMap::new(),
            topology: Topology::new(),
            engine_config: EngineConfig::default(),
            seed,
            current_time: Timestamp::ZERO,
            event_queue: BinaryHeap::new(),
            metrics: SimMetrics::new(),
            next_seq: 0,
            rng_state: seed,
            snapshot_interval: None,
            next_snapshot: None,
        }
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Engine settings shared by every node added afterwards.
    pub fn with_engine_config(mut self, config: EngineConfig) -> Self {
        self.engine_config = config;
        self
    }

    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self.next_snapshot = Some(self.current_time + interval);
        self
    }

    /// Add a node and schedule its first tick now.
    ///
    /// Nodes added at the same instant run their phases in lockstep. A node
    /// with a topology position gets it as its GPS fix.
    pub fn add_node(&mut self, node_id: NodeId) -> Result<NodeId, ConfigError> {
        let mut config = self.engine_config.clone();
        config.node_id = node_id;
        let mut node = SimNode::new(config, self.seed, self.current_time)?;
        if let Some((x, y)) = self.topology.position(node_id) {
            node.set_position(x, y);
        }
        self.nodes.insert(node_id, node);
        self.schedule(self.current_time, Event::Tick { node: node_id });
        Ok(node_id)
    }

    pub fn node(&self, id: NodeId) -> Option<&SimNode> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SimNode> {
        self.nodes.get_mut(&id)
    }

    /// All node ids, sorted.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn topology_mut(&mut self) -> &mut Topology {
        &mut self.topology
    }

    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    pub fn schedule(&mut self, time: Timestamp, event: Event) {
        let seq = SequenceNumber::new(self.next_seq);
        self.next_seq += 1;
        self.event_queue.push(ScheduledEvent::new(time, seq, event));
    }

    pub fn schedule_action(&mut self, time: Timestamp, action: ScenarioAction) {
        self.schedule(time, Event::ScenarioAction(action));
    }

    /// Run until `end_time`, then take a final snapshot.
    pub fn run_until(&mut self, end_time: Timestamp) -> SimulationResult {
        while self
            .event_queue
            .peek()
            .is_some_and(|event| event.time <= end_time)
        {
            let Some(event) = self.event_queue.pop() else {
                break;
            };
            self.advance_time(event.time);
            self.process_event(event.event);
            self.maybe_take_snapshot();
        }

        self.advance_time(end_time);
        self.take_snapshot();

        SimulationResult {
            end_time: self.current_time,
            metrics: self.metrics.clone(),
            queue_exhausted: self.event_queue.is_empty(),
        }
    }

    pub fn run_for(&mut self, duration: Duration) -> SimulationResult {
        self.run_until(self.current_time + duration)
    }

    fn advance_time(&mut self, time: Timestamp) {
        if time > self.current_time {
            self.current_time = time;
        }
    }

    fn process_event(&mut self, event: Event) {
        match event {
            Event::FrameDelivery {
                to,
                data,
                rssi,
                from: _,
            } => self.deliver_frame(to, &data, rssi),
            Event::Tick { node } => self.fire_tick(node),
            Event::ScenarioAction(action) => self.execute_action(action),
        }
    }

    fn deliver_frame(&mut self, to: NodeId, data: &[u8], rssi: i8) {
        let now = self.current_time;
        let Some(node) = self.nodes.get_mut(&to) else {
            return;
        };
        let counter = match node.handle_frame(data, rssi, now) {
            Ok(_) => &mut self.metrics.frames_delivered,
            Err(_) => &mut self.metrics.decode_errors,
        };
        *counter = counter.saturating_add(1);
        self.collect_outgoing(to);
    }

    fn fire_tick(&mut self, node_id: NodeId) {
        let now = self.current_time;
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        node.handle_tick(now);
        // The next slot length depends on the phase the tick left us in.
        let next = now + node.slot_duration();

        self.collect_outgoing(node_id);
        self.schedule(next, Event::Tick { node: node_id });
    }

    fn collect_outgoing(&mut self, sender: NodeId) {
        let frames = match self.nodes.get(&sender) {
            Some(node) => node.take_outgoing(),
            None => return,
        };
        for frame in frames {
            self.route_frame(sender, frame);
        }
    }

    /// Broadcast a frame to every node with an active link to `sender`.
    fn route_frame(&mut self, sender: NodeId, data: Vec<u8>) {
        self.metrics.frames_sent = self.metrics.frames_sent.saturating_add(1);

        let now = self.current_time;
        let mut deliveries = Vec::new();
        for neighbor in self.topology.neighbors(sender) {
            let Some(link) = self.topology.get_link(sender, neighbor) else {
                continue;
            };
            let (loss_rate, delay, rssi) = (link.loss_rate, link.delay, link.rssi);
            if loss_rate > 0.0 && self.random_f64() < loss_rate {
                self.metrics.frames_dropped = self.metrics.frames_dropped.saturating_add(1);
                continue;
            }
            deliveries.push((neighbor, delay, rssi));
        }

        for (neighbor, delay, rssi) in deliveries {
            self.schedule(
                now + delay,
                Event::FrameDelivery {
                    to: neighbor,
                    from: sender,
                    data: data.clone(),
                    rssi,
                },
            );
        }
    }

    fn execute_action(&mut self, action: ScenarioAction) {
        match action {
            ScenarioAction::Partition { groups } => self.topology.partition(&groups),
            ScenarioAction::HealPartition => self.topology.heal(),
            ScenarioAction::DisableLink { from, to } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.active = false;
                }
            }
            ScenarioAction::EnableLink { from, to } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.active = true;
                }
            }
            ScenarioAction::SetLossRate { from, to, rate } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.loss_rate = rate.clamp(0.0, 1.0);
                }
            }
            ScenarioAction::DisableNode { node } => {
                if let Some(n) = self.nodes.get_mut(&node) {
                    n.inner_mut().disable();
                }
            }
            ScenarioAction::EnableNode { node } => {
                if let Some(n) = self.nodes.get_mut(&node) {
                    n.inner_mut().enable();
                }
            }
            ScenarioAction::TakeSnapshot => self.take_snapshot(),
        }
    }

    fn maybe_take_snapshot(&mut self) {
        let Some(next) = self.next_snapshot else {
            return;
        };
        if self.current_time >= next {
            self.take_snapshot();
            if let Some(interval) = self.snapshot_interval {
                self.next_snapshot = Some(next + interval);
            }
        }
    }

    /// Record every node's election state.
    pub fn take_snapshot(&mut self) {
        let mut snapshot = ElectionSnapshot::new(self.current_time);
        for (&node_id, node) in &self.nodes {
            let snap = node.snapshot();
            snapshot.record_node(
                node_id,
                NodeRecord {
                    state: snap.state,
                    clusterhead: node.clusterhead_id(),
                    direct_neighbors: snap.direct_neighbors,
                    last_candidate_heard: node.inner().node().last_candidate_heard_cycle(),
                    stats: snap.stats,
                },
            );
        }
        self.metrics.add_snapshot(snapshot);
    }

    /// Uniform draw in `[0, 1]` for link loss.
    fn random_f64(&mut self) -> f64 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        (self.rng_state as f64) / (u64::MAX as f64)
    }
}
