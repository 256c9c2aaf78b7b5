#![forbid(unsafe_code)]
//! blemesh - Neighbor discovery and clusterhead election for BLE meshes
//!
//! A protocol core for self-organizing Bluetooth Low Energy meshes: nodes
//! measure how crowded the air is, learn their neighbors, relay each other's
//! beacons in a slotted cycle, and elect clusterheads from the best-connected
//! nodes.
//!
//! This crate is `no_std` but **requires the `alloc` crate**. Tables and
//! queues use heap-allocated collections with compile-time capacity limits
//! (see [`types`] for the constants).
//!
//! # Key Properties
//!
//! - Every round runs a Noisy phase (crowding measurement), a Neighbor phase
//!   (randomized beaconing) and one 4-slot Discovery cycle
//! - Relaying is gated by TTL, crowding-scaled probability and GPS proximity
//! - Loops and duplicates are rejected before queueing
//! - Election announcements carry a PDSF estimate of cluster size and stop
//!   spreading once it saturates
//! - Role changes follow a fixed transition table
//! - All randomness comes from per-engine seeded generators
//!
//! # Example (basic usage)
//!
//! ```
//! use blemesh::config::SMALL_PHASES;
//! use blemesh::traits::test_impls::RecordingSink;
//! use blemesh::{Engine, EngineConfig, EngineHooks, NodeState, Phase, Timestamp};
//!
//! let sink = RecordingSink::new();
//! let config = EngineConfig::new(7).with_phases(SMALL_PHASES);
//! let mut engine = Engine::new(config, EngineHooks::new(sink.hook())).unwrap();
//!
//! assert_eq!(engine.phase(), Phase::Noisy);
//! assert_eq!(engine.node().state(), NodeState::Init);
//!
//! // Drive one full round by hand.
//! let mut now = 0;
//! while engine.cycle_count() == 0 {
//!     engine.tick(Timestamp::from_millis(now));
//!     now += engine.current_slot_duration().as_millis();
//! }
//! assert_eq!(engine.node().state(), NodeState::Discovery);
//! assert!(!sink.is_empty());
//! ```
//!
//! # Example (integration pattern)
//!
//! ```text
//! use blemesh::{Engine, EngineConfig, EngineHooks, Transport, Clock};
//!
//! // Implement Transport and Clock for your platform...
//!
//! // let hooks = EngineHooks::new(move |packet| radio.advertise(&packet.encode_to_vec()));
//! // let mut engine = Engine::new(EngineConfig::new(node_id), hooks)?;
//!
//! // Spawn the engine's run loop
//! // spawn(async move {
//! //     engine.run(&transport, &clock).await;
//! // });
//! ```
//!
//! # Module Structure
//!
//! - [`types`] - Node ids, roles, errors, protocol constants
//! - [`packet`] - Discovery and election packets, PDSF arithmetic
//! - [`wire`] - Wire format serialization
//! - [`traits`] - Transport, Clock, Random traits
//! - [`node`] - Per-node role, neighbor table and statistics
//! - [`cycle`] - 4-slot discovery cycle scheduler
//! - [`timing`] - Listen/broadcast slot generators
//! - [`forwarding`] - Relay policy and crowding estimation
//! - [`queue`] - Priority forwarding queue with duplicate and loop rejection
//! - [`election`] - Connectivity metrics and crowding measurement
//! - [`engine`] - Phase machine tying everything together
//! - [`config`] - Runtime engine configuration
//! - [`time`] - Timestamp and Duration types

#![no_std]

// Prevent test/debug features from being used in release builds.
#[cfg(all(feature = "test-support", not(test), not(debug_assertions)))]
compile_error!(
    "The `test-support` feature must not be enabled in release builds. \
     It includes mock transports and scripted random sources."
);

#[cfg(all(feature = "debug", not(test), not(debug_assertions)))]
compile_error!(
    "The `debug` feature must not be enabled in release builds. \
     It adds protocol tracing overhead intended only for development and simulation."
);

extern crate alloc;

#[macro_use]
pub mod debug;

pub mod collections;
pub mod config;
pub mod cycle;
pub mod election;
pub mod engine;
pub mod forwarding;
pub mod node;
pub mod packet;
pub mod queue;
pub mod time;
pub mod timing;
pub mod traits;
pub mod types;
pub mod wire;

// Re-export main types at crate root
pub use config::{ConfigError, EngineConfig, PhaseProfile};
pub use election::{ConnectivityMetrics, ElectionState};
pub use engine::{Engine, EngineHooks, NodeSnapshot, Phase, Reception};
pub use node::{MeshNode, Neighbor, NodeStats};
pub use packet::{DiscoveryPacket, ElectionData, ElectionPacket, Packet};
pub use time::{Duration, Timestamp};
pub use traits::{Clock, Random, Received, Transport};
pub use types::{Error, GpsLocation, LogLevel, NodeId, NodeState};
pub use wire::{Decode, DecodeError, Encode, EncodeError};

// Re-export constants
pub use types::{
    DEFAULT_TTL, INVALID_NODE_ID, MAX_CLUSTER_SIZE, MAX_ELECTION_ROUNDS, MAX_NEIGHBORS,
    MAX_PATH_LENGTH, MAX_QUEUE_SIZE, MSG_DISCOVERY, MSG_ELECTION, MSG_RENOUNCEMENT,
};

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;
    use crate::config::SMALL_PHASES;
    use crate::traits::test_impls::RecordingSink;

    fn engine(id: NodeId) -> (Engine, RecordingSink) {
        let sink = RecordingSink::new();
        let config = EngineConfig::new(id)
            .with_slot_duration_ms(50)
            .with_phases(SMALL_PHASES);
        let engine = Engine::new(config, EngineHooks::new(sink.hook())).unwrap();
        (engine, sink)
    }

    #[test]
    fn test_engine_creation() {
        let (engine, sink) = engine(1);
        assert_eq!(engine.node_id(), 1);
        assert_eq!(engine.phase(), Phase::Noisy);
        assert_eq!(engine.node().state(), NodeState::Init);
        assert!(engine.queue().is_empty());
        assert!(sink.is_empty());
    }

    /// Two engines wired back to back through the wire codec.
    #[test]
    fn test_two_engines_hear_each_other() {
        let (mut a, sink_a) = engine(1);
        let (mut b, sink_b) = engine(2);

        let mut now = 0u64;
        for _ in 0..200 {
            let at = Timestamp::from_millis(now);
            a.tick(at);
            b.tick(at);
            let from_a: Vec<Vec<u8>> = sink_a.take().iter().map(|p| p.encode_to_vec()).collect();
            let from_b: Vec<Vec<u8>> = sink_b.take().iter().map(|p| p.encode_to_vec()).collect();
            for frame in &from_a {
                b.receive_frame(frame, -55, at).unwrap();
            }
            for frame in &from_b {
                a.receive_frame(frame, -55, at).unwrap();
            }
            // Both run the same phase lengths, so they stay aligned.
            assert_eq!(a.phase(), b.phase());
            now += a.current_slot_duration().as_millis();
        }

        assert!(a.node().find_neighbor(2).is_some_and(|n| n.is_direct()));
        assert!(b.node().find_neighbor(1).is_some_and(|n| n.is_direct()));
        assert!(a.cycle_count() >= 5);
        assert_eq!(a.node().state(), NodeState::Edge);
    }

    #[test]
    fn test_own_packets_ignored() {
        let (mut a, sink) = engine(1);
        while a.phase() != Phase::Discovery {
            a.tick(Timestamp::ZERO);
        }
        a.tick(Timestamp::ZERO);
        let own = sink.take();
        let last = own.last().unwrap();
        assert_eq!(last.sender_id(), 1);
        assert_eq!(
            a.receive_packet(last, -40, Timestamp::ZERO),
            Reception::Rejected(Error::LoopDetected)
        );
        assert_eq!(a.node().neighbor_count(), 0);
    }
}
