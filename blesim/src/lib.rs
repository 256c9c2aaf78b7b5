//! blesim - Discrete event simulator for blemesh discovery engines.
//!
//! Runs many [`blemesh::Engine`]s in one process against a simulated radio
//! topology, without real-time delays and with deterministic ordering.
//!
//! # Features
//!
//! - **Discrete event simulation**: slot ticks and frame deliveries on one clock
//! - **Configurable topology**: fully connected, line, star, random field, or custom
//! - **Link properties**: RSSI, frame loss, delay per link
//! - **Scenario builder**: scheduled partitions, healing, node power-downs
//! - **Metrics collection**: election snapshots, frame counts, clustering time
//!
//! # Example
//!
//! ```
//! use blesim::{simple_scenario, Duration};
//!
//! let result = simple_scenario(6)
//!     .with_seed(42)
//!     .run_for(Duration::from_secs(10))
//!     .unwrap();
//!
//! assert_eq!(result.final_clusterheads(), vec![1]);
//! ```
//!
//! # Architecture
//!
//! The simulator keeps a priority queue of events ordered by (time, sequence
//! number). The main loop:
//! 1. Pop next event from queue
//! 2. Advance simulation time
//! 3. Process event (tick a node or hand it a frame)
//! 4. Collect encoded frames from the node's send hook
//! 5. Route through topology, schedule deliveries
//!
//! Nodes are driven through `Engine::tick` and `Engine::receive_frame` rather
//! than the async `Engine::run` loop.

pub mod event;
pub mod metrics;
pub mod node;
pub mod scenario;
pub mod sim;
pub mod topology;

pub use blemesh::{Duration, NodeId, Timestamp};
pub use event::{Event, ScenarioAction, ScheduledEvent};
pub use metrics::{ElectionSnapshot, NodeRecord, SimMetrics, SimulationResult};
pub use node::SimNode;
pub use scenario::{field_scenario, simple_scenario, ScenarioBuilder};
pub use sim::Simulator;
pub use topology::{Link, Topology};
