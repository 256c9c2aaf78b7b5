//! Debug events for protocol tracing.
//!
//! With the `debug` feature, the engine pushes [`DebugEvent`]s into a bounded
//! channel that test harnesses and the simulator drain. Without it,
//! `emit_debug!` expands to nothing and the event expression is never built.

use embassy_sync::channel::Channel;

use crate::engine::Phase;
use crate::time::Timestamp;
use crate::traits::ChannelMutex;
use crate::types::{NodeId, NodeState};

/// Capacity of the debug event channel. Events are dropped when it is full.
pub const DEBUG_CHANNEL_SIZE: usize = 64;

/// Debug event channel type.
pub type DebugChannel = Channel<ChannelMutex, DebugEvent, DEBUG_CHANNEL_SIZE>;

/// Why an incoming packet was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Loop,
    Duplicate,
    Overflow,
}

/// Why a dequeued packet was not relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The forwarding policy declined (crowding draw or proximity).
    Policy,
    TtlExhausted,
    /// Election announcement already covers a full cluster.
    PdsfSaturated,
    PathFull,
}

/// Debug events emitted by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum DebugEvent {
    /// Engine entered a new phase.
    PhaseChanged {
        timestamp: Timestamp,
        from: Phase,
        to: Phase,
    },
    /// Node role changed.
    StateChanged {
        cycle: u32,
        from: NodeState,
        to: NodeState,
    },
    /// Incoming packet accepted for relaying.
    PacketEnqueued {
        sender: NodeId,
        ttl: u8,
        msg_type: u8,
    },
    PacketRejected {
        sender: NodeId,
        reason: RejectReason,
    },
    PacketForwarded {
        sender: NodeId,
        ttl: u8,
        msg_type: u8,
    },
    PacketDropped {
        sender: NodeId,
        reason: DropReason,
    },
    /// Own election announcement sent.
    ElectionSent {
        cycle: u32,
        direct_connections: u32,
        pdsf: u32,
        rounds_left: u8,
    },
    /// Lost a candidate conflict to `winner`.
    ElectionLost {
        winner: NodeId,
        own_direct: u32,
        winner_direct: u32,
    },
    /// Picked (or switched to) `clusterhead`.
    ClusterheadSelected {
        clusterhead: NodeId,
        hops: u8,
        direct_connections: u32,
    },
    RenouncementSent { cycle: u32, rounds_left: u8 },
    /// Discovery cycle finished.
    CycleCompleted {
        cycle: u32,
        state: NodeState,
        neighbors: usize,
        direct: usize,
        crowding: f64,
    },
}

/// Push an event into the owner's debug channel.
///
/// `$owner` must expose `debug_channel() -> &DebugChannel`.
#[cfg(feature = "debug")]
macro_rules! emit_debug {
    ($owner:expr, $event:expr) => {{
        let _ = $owner.debug_channel().try_send($event);
    }};
}

#[cfg(not(feature = "debug"))]
macro_rules! emit_debug {
    ($owner:expr, $event:expr) => {{}};
}
