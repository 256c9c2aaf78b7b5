//! Discovery and election packets.
//!
//! A [`DiscoveryPacket`] is the beacon every node originates once per cycle
//! and neighbors relay. An [`ElectionPacket`] is the same beacon extended with
//! a candidate's announcement: its direct-connection count, the running PDSF
//! estimate ("predicted devices reached so far") and a candidacy score.
//!
//! [`Packet`] is the tagged union the queue, forwarding policy and engine
//! operate on. The byte layout lives in [`crate::wire`].

use crate::collections::BoundedVec;
use crate::types::{
    Error, GpsLocation, NodeId, DEFAULT_TTL, MAX_CLUSTER_SIZE, MAX_PATH_LENGTH, MAX_PDSF_HISTORY,
    MSG_DISCOVERY, MSG_ELECTION, MSG_RENOUNCEMENT,
};

/// Ordered list of relaying nodes, originator first.
pub type Path = BoundedVec<NodeId, MAX_PATH_LENGTH>;

/// Unique-connection count contributed by each hop.
pub type PdsfHistory = BoundedVec<u32, MAX_PDSF_HISTORY>;

/// Discovery beacon.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryPacket {
    pub sender_id: NodeId,
    pub ttl: u8,
    pub path: Path,
    pub gps: Option<GpsLocation>,
    pub is_clusterhead_message: bool,
}

impl DiscoveryPacket {
    /// Fresh beacon with the default TTL and an empty path.
    pub fn new(sender_id: NodeId) -> Self {
        Self {
            sender_id,
            ttl: DEFAULT_TTL,
            path: Path::new(),
            gps: None,
            is_clusterhead_message: false,
        }
    }

    /// Decrement TTL. Returns false (and leaves 0) when already exhausted.
    pub fn decrement_ttl(&mut self) -> bool {
        if self.ttl == 0 {
            return false;
        }
        self.ttl -= 1;
        true
    }

    pub fn add_to_path(&mut self, node_id: NodeId) -> Result<(), Error> {
        self.path.try_push(node_id)
    }

    pub fn is_in_path(&self, node_id: NodeId) -> bool {
        self.path.contains(&node_id)
    }

    /// Hops travelled so far.
    pub fn hop_count(&self) -> usize {
        self.path.len()
    }

    /// Node that put this packet on the air: last path entry, else the sender.
    pub fn last_hop(&self) -> NodeId {
        self.path.last().copied().unwrap_or(self.sender_id)
    }

    pub fn set_gps(&mut self, location: GpsLocation) {
        self.gps = Some(location);
    }

    pub fn clear_gps(&mut self) {
        self.gps = None;
    }
}

/// Candidate announcement payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ElectionData {
    pub class_id: u16,
    pub direct_connections: u32,
    pub pdsf: u32,
    pub pdsf_history: PdsfHistory,
    pub score: f64,
    pub hash: u32,
    pub is_renouncement: bool,
}

/// Discovery beacon carrying an election payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ElectionPacket {
    pub base: DiscoveryPacket,
    pub election: ElectionData,
}

impl ElectionPacket {
    pub fn new(base: DiscoveryPacket, election: ElectionData) -> Self {
        Self { base, election }
    }

    /// Renouncement: zeroed election payload with the renouncement flag set.
    pub fn renouncement(base: DiscoveryPacket) -> Self {
        Self {
            base,
            election: ElectionData {
                is_renouncement: true,
                ..ElectionData::default()
            },
        }
    }

    /// Fold one hop into the PDSF estimate.
    ///
    /// Returns the new PDSF. When the history is full the PDSF is left as is.
    pub fn update_pdsf(&mut self, direct_connections: u32, already_reached: u32) -> u32 {
        let unique = direct_connections - already_reached.min(direct_connections);
        if self.election.pdsf_history.try_push(unique).is_err() {
            return self.election.pdsf;
        }
        self.election.pdsf = pdsf_step(self.election.pdsf, unique);
        self.election.pdsf
    }

    /// The announcement has covered a full cluster and should stop spreading.
    pub fn pdsf_saturated(&self) -> bool {
        self.election.pdsf >= MAX_CLUSTER_SIZE
    }
}

/// `baseline + baseline * unique`, saturating, where a zero PDSF counts as 1.
pub fn pdsf_step(previous: u32, unique: u32) -> u32 {
    let baseline = if previous == 0 { 1u64 } else { previous as u64 };
    let next = baseline + baseline * unique as u64;
    next.min(u32::MAX as u64) as u32
}

/// Connectivity plus a noise-discounted density bonus.
pub fn candidacy_score(direct_connections: u32, noise_level: f64) -> f64 {
    let base = direct_connections as f64;
    let density = direct_connections as f64 / MAX_CLUSTER_SIZE as f64;
    base + density * (1.0 / (noise_level + 1.0))
}

/// FNV-1a over the id bytes, least significant first. Used for FDMA/TDMA slotting.
pub fn election_hash(node_id: NodeId) -> u32 {
    let mut hash: u32 = 2_166_136_261;
    for byte in node_id.to_le_bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}

/// Any packet the engine moves around.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Discovery(DiscoveryPacket),
    Election(ElectionPacket),
}

impl Packet {
    /// Upgrade a beacon into an election announcement.
    pub fn upgrade(base: DiscoveryPacket, election: ElectionData) -> Self {
        Packet::Election(ElectionPacket::new(base, election))
    }

    pub fn base(&self) -> &DiscoveryPacket {
        match self {
            Packet::Discovery(p) => p,
            Packet::Election(p) => &p.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut DiscoveryPacket {
        match self {
            Packet::Discovery(p) => p,
            Packet::Election(p) => &mut p.base,
        }
    }

    pub fn election(&self) -> Option<&ElectionData> {
        match self {
            Packet::Discovery(_) => None,
            Packet::Election(p) => Some(&p.election),
        }
    }

    /// Wire message type byte.
    pub fn message_type(&self) -> u8 {
        match self {
            Packet::Discovery(_) => MSG_DISCOVERY,
            Packet::Election(p) if p.election.is_renouncement => MSG_RENOUNCEMENT,
            Packet::Election(_) => MSG_ELECTION,
        }
    }

    pub fn is_renouncement(&self) -> bool {
        self.election().is_some_and(|e| e.is_renouncement)
    }

    pub fn sender_id(&self) -> NodeId {
        self.base().sender_id
    }

    pub fn ttl(&self) -> u8 {
        self.base().ttl
    }

    pub fn decrement_ttl(&mut self) -> bool {
        self.base_mut().decrement_ttl()
    }

    pub fn is_in_path(&self, node_id: NodeId) -> bool {
        self.base().is_in_path(node_id)
    }

    pub fn add_to_path(&mut self, node_id: NodeId) -> Result<(), Error> {
        self.base_mut().add_to_path(node_id)
    }
}

impl From<DiscoveryPacket> for Packet {
    fn from(p: DiscoveryPacket) -> Self {
        Packet::Discovery(p)
    }
}

impl From<ElectionPacket> for Packet {
    fn from(p: ElectionPacket) -> Self {
        Packet::Election(p)
    }
}
