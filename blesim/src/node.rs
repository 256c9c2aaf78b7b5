//! SimNode wrapper for simulated blemesh engines.

use std::cell::RefCell;
use std::rc::Rc;

use blemesh::debug::DebugEvent;
use blemesh::{
    ConfigError, DecodeError, Duration, Encode, Engine, EngineConfig, EngineHooks, LogLevel,
    NodeId, NodeSnapshot, NodeState, Reception, Timestamp, INVALID_NODE_ID,
};
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Frames the engine handed to its send hook, already encoded.
type Outbox = Rc<RefCell<Vec<Vec<u8>>>>;
type LogBuffer = Rc<RefCell<Vec<(LogLevel, String)>>>;

/// Derive per-node (timing, forwarding) seeds from the simulation seed.
///
/// Distinct nodes get distinct, reproducible RNG streams.
pub fn node_seeds(sim_seed: u64, node_id: NodeId) -> (u32, u32) {
    let h = xxh3_64_with_seed(&node_id.to_le_bytes(), sim_seed);
    let timing = (h as u32).max(1);
    let forwarding = ((h >> 32) as u32).max(1);
    (timing, forwarding)
}

/// Wrapper around a blemesh [`Engine`] for simulation.
pub struct SimNode {
    inner: Engine,
    outbox: Outbox,
    logs: LogBuffer,
    /// When the node was added.
    pub created_at: Timestamp,
}

impl SimNode {
    /// Build a node from `config`, replacing its seeds with ones derived from
    /// `sim_seed` and the node id.
    pub fn new(config: EngineConfig, sim_seed: u64, created_at: Timestamp) -> Result<Self, ConfigError> {
        let (timing_seed, forwarding_seed) = node_seeds(sim_seed, config.node_id);
        let config = config
            .with_timing_seed(timing_seed)
            .with_forwarding_seed(forwarding_seed);

        let outbox: Outbox = Rc::default();
        let logs: LogBuffer = Rc::default();
        let sent = Rc::clone(&outbox);
        let log_sink = Rc::clone(&logs);
        let hooks = EngineHooks::new(move |packet| sent.borrow_mut().push(packet.encode_to_vec()))
            .with_log(move |level, msg: &str| log_sink.borrow_mut().push((level, msg.to_owned())));

        let inner = Engine::new(config, hooks)?;
        Ok(Self {
            inner,
            outbox,
            logs,
            created_at,
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.inner.node_id()
    }

    pub fn inner(&self) -> &Engine {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut Engine {
        &mut self.inner
    }

    pub fn state(&self) -> NodeState {
        self.inner.node().state()
    }

    pub fn is_clusterhead(&self) -> bool {
        self.state() == NodeState::Clusterhead
    }

    /// Selected clusterhead, if any.
    pub fn clusterhead_id(&self) -> Option<NodeId> {
        let id = self.inner.node().clusterhead_id();
        (id != INVALID_NODE_ID).then_some(id)
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        self.inner.snapshot()
    }

    /// Time until this node's next tick.
    pub fn slot_duration(&self) -> Duration {
        self.inner.current_slot_duration()
    }

    /// Place the node at `(x, y)` metres.
    pub fn set_position(&mut self, x: f64, y: f64) {
        self.inner.set_gps(x, y, 0.0, true);
    }

    pub fn handle_tick(&mut self, now: Timestamp) {
        self.inner.tick(now);
    }

    /// Decode and process a frame.
    pub fn handle_frame(
        &mut self,
        data: &[u8],
        rssi: i8,
        now: Timestamp,
    ) -> Result<Reception, DecodeError> {
        self.inner.receive_frame(data, rssi, now)
    }

    /// Drain frames sent since the last call.
    pub fn take_outgoing(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.outbox.borrow_mut())
    }

    /// Drain log lines emitted since the last call.
    pub fn take_logs(&self) -> Vec<(LogLevel, String)> {
        std::mem::take(&mut *self.logs.borrow_mut())
    }

    /// Take all debug events from the engine's debug channel.
    pub fn take_debug_events(&self) -> Vec<DebugEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.inner.debug_channel().try_receive() {
            events.push(event);
        }
        events
    }
}
