//! Scenario builder for setting up and running simulations.

use blemesh::config::SMALL_PHASES;
use blemesh::{ConfigError, Duration, EngineConfig, NodeId, PhaseProfile, Timestamp};

use crate::event::ScenarioAction;
use crate::metrics::SimulationResult;
use crate::sim::Simulator;
use crate::topology::Topology;

/// Type of topology to generate.
#[derive(Debug, Clone)]
enum TopologyType {
    FullyConnected,
    /// Each node hears only its neighbors in id order.
    Line,
    /// First node is the hub.
    Star,
    /// Nodes scattered over a square field, linked within radio range.
    RandomGeometric { side: f64, range: f64 },
    Custom(Topology),
}

/// Builder for simulation scenarios.
///
/// Nodes get ids `1..=num_nodes`. Actions that name nodes take zero-based
/// indices into that list.
pub struct ScenarioBuilder {
    num_nodes: usize,
    seed: u64,
    topology_type: TopologyType,
    loss_rate: f64,
    delay: Duration,
    slot_duration_ms: u32,
    initial_ttl: Option<u8>,
    phases: PhaseProfile,
    actions: Vec<(Timestamp, ScenarioAction)>,
    snapshot_interval: Option<Duration>,
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ScenarioBuilder {
    /// A fully connected scenario with short phases and 50 ms slots.
    pub fn new(num_nodes: usize) -> Self {
        Self {
            num_nodes,
            seed: 42,
            topology_type: TopologyType::FullyConnected,
            loss_rate: 0.0,
            delay: Duration::from_millis(1),
            slot_duration_ms: 50,
            initial_ttl: None,
            phases: SMALL_PHASES,
            actions: Vec::new(),
            snapshot_interval: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Use a custom topology. Its node ids must be `1..=num_nodes`.
    pub fn topology(mut self, topo: Topology) -> Self {
        self.topology_type = TopologyType::Custom(topo);
        self
    }

    pub fn fully_connected(mut self) -> Self {
        self.topology_type = TopologyType::FullyConnected;
        self
    }

    pub fn line_topology(mut self) -> Self {
        self.topology_type = TopologyType::Line;
        self
    }

    pub fn star_topology(mut self) -> Self {
        self.topology_type = TopologyType::Star;
        self
    }

    /// Scatter nodes over a `side` x `side` metre field with radio `range`.
    ///
    /// Nodes also get their position as a GPS fix.
    pub fn random_geometric(mut self, side: f64, range: f64) -> Self {
        self.topology_type = TopologyType::RandomGeometric { side, range };
        self
    }

    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_slot_duration_ms(mut self, ms: u32) -> Self {
        self.slot_duration_ms = ms;
        self
    }

    pub fn with_initial_ttl(mut self, ttl: u8) -> Self {
        self.initial_ttl = Some(ttl);
        self
    }

    pub fn with_phases(mut self, phases: PhaseProfile) -> Self {
        self.phases = phases;
        self
    }

    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self
    }

    /// Partition the network at `time` into groups of node indices.
    pub fn partition_at(mut self, time: Timestamp, groups: Vec<Vec<usize>>) -> Self {
        let groups = groups
            .into_iter()
            .map(|g| g.into_iter().map(node_id_for_index).collect())
            .collect();
        self.actions
            .push((time, ScenarioAction::Partition { groups }));
        self
    }

    pub fn heal_at(mut self, time: Timestamp) -> Self {
        self.actions.push((time, ScenarioAction::HealPartition));
        self
    }

    pub fn snapshot_at(mut self, time: Timestamp) -> Self {
        self.actions.push((time, ScenarioAction::TakeSnapshot));
        self
    }

    /// Power down the node at `index` at `time`.
    pub fn disable_node_at(mut self, time: Timestamp, index: usize) -> Self {
        self.actions.push((
            time,
            ScenarioAction::DisableNode {
                node: node_id_for_index(index),
            },
        ));
        self
    }

    pub fn enable_node_at(mut self, time: Timestamp, index: usize) -> Self {
        self.actions.push((
            time,
            ScenarioAction::EnableNode {
                node: node_id_for_index(index),
            },
        ));
        self
    }

    fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default()
            .with_slot_duration_ms(self.slot_duration_ms)
            .with_phases(self.phases);
        if let Some(ttl) = self.initial_ttl {
            config = config.with_initial_ttl(ttl);
        }
        config
    }

    /// Build the simulator with all nodes and topology.
    pub fn build(self) -> Result<(Simulator, Vec<NodeId>), ConfigError> {
        let config = self.engine_config();
        let node_ids: Vec<NodeId> = (0..self.num_nodes).map(node_id_for_index).collect();

        let mut topo = match self.topology_type {
            TopologyType::FullyConnected => Topology::fully_connected(&node_ids),
            TopologyType::Line => Topology::line(&node_ids),
            TopologyType::Star => Topology::star(&node_ids),
            TopologyType::RandomGeometric { side, range } => {
                Topology::random_geometric(&node_ids, self.seed, side, range)
            }
            TopologyType::Custom(t) => t,
        };
        if self.loss_rate > 0.0 {
            topo.set_global_loss_rate(self.loss_rate);
        }
        topo.set_global_delay(self.delay);

        // Topology goes in before the nodes so they pick up their positions.
        let mut sim = Simulator::new(self.seed)
            .with_topology(topo)
            .with_engine_config(config);
        if let Some(interval) = self.snapshot_interval {
            sim = sim.with_snapshot_interval(interval);
        }

        for &id in &node_ids {
            sim.add_node(id)?;
        }
        for (time, action) in self.actions {
            sim.schedule_action(time, action);
        }

        Ok((sim, node_ids))
    }

    /// Build and run the simulation for `duration`.
    pub fn run_for(self, duration: Duration) -> Result<SimulationResult, ConfigError> {
        let (mut sim, _) = self.build()?;
        Ok(sim.run_for(duration))
    }

    pub fn run_until(self, time: Timestamp) -> Result<SimulationResult, ConfigError> {
        let (mut sim, _) = self.build()?;
        Ok(sim.run_until(time))
    }
}

fn node_id_for_index(index: usize) -> NodeId {
    index as NodeId + 1
}

/// `num_nodes` fully connected nodes.
pub fn simple_scenario(num_nodes: usize) -> ScenarioBuilder {
    ScenarioBuilder::new(num_nodes).fully_connected()
}

/// `num_nodes` scattered over a 200 m field with 120 m radio range.
pub fn field_scenario(num_nodes: usize) -> ScenarioBuilder {
    ScenarioBuilder::new(num_nodes).random_geometric(200.0, 120.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_builder_basic() {
        let (sim, nodes) = ScenarioBuilder::new(3)
            .with_seed(123)
            .fully_connected()
            .build()
            .unwrap();

        assert_eq!(nodes, vec![1, 2, 3]);
        assert_eq!(sim.node_ids(), vec![1, 2, 3]);
    }

    #[test]
    fn test_scenario_run_for() {
        let result = simple_scenario(2)
            .run_for(Duration::from_secs(1))
            .unwrap();

        assert!(result.end_time >= Timestamp::from_secs(1));
        assert!(!result.metrics.snapshots.is_empty());
    }

    #[test]
    fn test_scenario_with_loss() {
        let (sim, nodes) = ScenarioBuilder::new(2)
            .fully_connected()
            .with_loss_rate(0.5)
            .build()
            .unwrap();

        let link = sim.topology().get_link(nodes[0], nodes[1]).unwrap();
        assert_eq!(link.loss_rate, 0.5);
    }

    #[test]
    fn test_invalid_slot_duration_rejected() {
        let result = ScenarioBuilder::new(2).with_slot_duration_ms(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_field_scenario_places_nodes() {
        let (sim, nodes) = field_scenario(5).build().unwrap();
        for &id in &nodes {
            let (x, y) = sim.topology().position(id).unwrap();
            assert!((0.0..=200.0).contains(&x));
            assert!((0.0..=200.0).contains(&y));
            assert!(sim.node(id).unwrap().inner().node().gps().is_some());
        }
    }

    #[test]
    fn test_scenario_partition() {
        let (mut sim, nodes) = ScenarioBuilder::new(4)
            .fully_connected()
            .partition_at(Timestamp::from_millis(500), vec![vec![0, 1], vec![2, 3]])
            .build()
            .unwrap();

        assert!(sim.topology().is_connected(nodes[0], nodes[2]));

        sim.run_for(Duration::from_secs(1));

        assert!(!sim.topology().is_connected(nodes[0], nodes[2]));
        assert!(sim.topology().is_connected(nodes[0], nodes[1]));
        assert!(sim.topology().is_connected(nodes[2], nodes[3]));
    }

    #[test]
    fn test_partition_then_heal() {
        let (mut sim, nodes) = ScenarioBuilder::new(2)
            .partition_at(Timestamp::from_millis(200), vec![vec![0], vec![1]])
            .heal_at(Timestamp::from_millis(400))
            .build()
            .unwrap();
        sim.run_for(Duration::from_secs(1));
        assert!(sim.topology().is_connected(nodes[0], nodes[1]));
    }
}
