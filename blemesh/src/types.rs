//! Core types and constants for the blemesh protocol.

use core::fmt;

/// 32-bit node identifier. Zero is reserved as "unassigned".
pub type NodeId = u32;

/// Reserved "no node" identifier.
pub const INVALID_NODE_ID: NodeId = 0;

// Packet bounds
pub const MAX_PATH_LENGTH: usize = 50;
pub const MAX_PDSF_HISTORY: usize = 50;
pub const DEFAULT_TTL: u8 = 10;
/// Target cluster size. Election packets stop spreading once PDSF reaches it.
pub const MAX_CLUSTER_SIZE: u32 = 150;

// Node bounds
pub const MAX_NEIGHBORS: usize = 150;
pub const EDGE_RSSI_THRESHOLD: i8 = -85;
pub const MIN_DIRECT_NEIGHBORS_CORE: usize = 3;
pub const MIN_DIRECT_NEIGHBORS_CANDIDATE: usize = 5;

// Forwarding queue bounds
pub const MAX_QUEUE_SIZE: usize = 100;
pub const MAX_SEEN_MESSAGES: usize = 200;

// Election
pub const MAX_ELECTION_ROUNDS: u8 = 3;
pub const RSSI_WINDOW_SIZE: usize = 100;

// Message types (first wire byte)
pub const MSG_DISCOVERY: u8 = 0;
pub const MSG_ELECTION: u8 = 1;
pub const MSG_RENOUNCEMENT: u8 = 2;

/// 3D position carried in packets and held by nodes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GpsLocation {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl GpsLocation {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance in 3D.
    pub fn distance(&self, other: &GpsLocation) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        libm::sqrt(dx * dx + dy * dy + dz * dz)
    }

    /// The origin doubles as "no fix" in neighbor samples.
    pub fn is_origin(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }
}

/// Node role in the clustering state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NodeState {
    #[default]
    Init,
    Discovery,
    Edge,
    CandidateClusterhead,
    Clusterhead,
    Member,
}

impl NodeState {
    /// Whether `self -> next` is a legal transition. Self-transitions always are.
    pub fn can_transition_to(self, next: NodeState) -> bool {
        use NodeState::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Init, Discovery)
                | (Discovery, Edge)
                | (Discovery, CandidateClusterhead)
                | (Edge, CandidateClusterhead)
                | (Edge, Member)
                | (CandidateClusterhead, Clusterhead)
                | (CandidateClusterhead, Member)
                | (CandidateClusterhead, Edge)
                | (Clusterhead, CandidateClusterhead)
                | (Member, CandidateClusterhead)
                | (Member, Edge)
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            NodeState::Init => "INIT",
            NodeState::Discovery => "DISCOVERY",
            NodeState::Edge => "EDGE",
            NodeState::CandidateClusterhead => "CANDIDATE",
            NodeState::Clusterhead => "CLUSTERHEAD",
            NodeState::Member => "MEMBER",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Severity passed to the host log hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Error type for protocol operations.
///
/// None of these are fatal. Callers count them and carry on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// Requested state change is not in the transition table.
    InvalidTransition { from: NodeState, to: NodeState },
    /// Local node already appears in the packet path.
    LoopDetected,
    /// Message id already in the seen-cache.
    Duplicate,
    /// Forwarding queue is full.
    QueueOverflow,
    /// TTL reached zero.
    TtlExhausted,
    /// Bounded collection is full.
    CapacityExceeded,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidTransition { from, to } => {
                write!(f, "invalid state transition {} -> {}", from, to)
            }
            Error::LoopDetected => write!(f, "loop detected"),
            Error::Duplicate => write!(f, "duplicate message"),
            Error::QueueOverflow => write!(f, "forwarding queue full"),
            Error::TtlExhausted => write!(f, "ttl exhausted"),
            Error::CapacityExceeded => write!(f, "capacity exceeded"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_transitions_from_init() {
        use NodeState::*;
        assert!(Init.can_transition_to(Discovery));
        assert!(Init.can_transition_to(Init));
        for next in [Edge, CandidateClusterhead, Clusterhead, Member] {
            assert!(!Init.can_transition_to(next), "Init -> {:?}", next);
        }
    }

    #[test]
    fn test_transition_table() {
        use NodeState::*;
        assert!(Discovery.can_transition_to(Edge));
        assert!(Discovery.can_transition_to(CandidateClusterhead));
        assert!(!Discovery.can_transition_to(Member));
        assert!(Edge.can_transition_to(Member));
        assert!(!Edge.can_transition_to(Discovery));
        assert!(CandidateClusterhead.can_transition_to(Clusterhead));
        assert!(CandidateClusterhead.can_transition_to(Edge));
        assert!(Clusterhead.can_transition_to(CandidateClusterhead));
        assert!(!Clusterhead.can_transition_to(Member));
        assert!(Member.can_transition_to(Edge));
        assert!(!Member.can_transition_to(Discovery));
    }

    #[test]
    fn test_gps_distance() {
        let a = GpsLocation::new(0.0, 0.0, 0.0);
        let b = GpsLocation::new(3.0, 4.0, 12.0);
        assert!((a.distance(&b) - 13.0).abs() < 1e-9);
        assert!(a.is_origin());
        assert!(!b.is_origin());
    }

    #[test]
    fn test_error_display() {
        let err = Error::InvalidTransition {
            from: NodeState::Init,
            to: NodeState::Clusterhead,
        };
        assert_eq!(err.to_string(), "invalid state transition INIT -> CLUSTERHEAD");
        assert_eq!(Error::QueueOverflow.to_string(), "forwarding queue full");
    }
}
