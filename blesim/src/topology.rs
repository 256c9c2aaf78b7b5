//! Radio topology: who hears whom, and how loudly.

use blemesh::{Duration, NodeId};
use hashbrown::HashMap;

/// RSSI at zero distance in the geometric model.
pub const RSSI_AT_ORIGIN: f64 = -40.0;
/// Metres per dB of path loss in the geometric model.
pub const METRES_PER_DB: f64 = 5.0;
/// RSSI for links in the non-geometric topologies.
pub const DEFAULT_LINK_RSSI: i8 = -60;

/// Properties of a radio link between two nodes.
#[derive(Debug, Clone)]
pub struct Link {
    /// Signal strength in dBm, the same in both directions.
    pub rssi: i8,
    /// Frame loss rate (0.0 to 1.0).
    pub loss_rate: f64,
    /// Propagation delay.
    pub delay: Duration,
    /// Whether the link is currently active.
    pub active: bool,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            rssi: DEFAULT_LINK_RSSI,
            loss_rate: 0.0,
            delay: Duration::from_millis(1),
            active: true,
        }
    }
}

impl Link {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rssi(mut self, rssi: i8) -> Self {
        self.rssi = rssi;
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

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// RSSI for a link of `distance` metres: `-40 - d/5`, clamped to `i8`.
pub fn rssi_for_distance(distance: f64) -> i8 {
    let rssi = RSSI_AT_ORIGIN - distance / METRES_PER_DB;
    rssi.round().clamp(i8::MIN as f64, i8::MAX as f64) as i8
}

/// Network topology: bidirectional links plus optional node positions.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    links: HashMap<(NodeId, NodeId), Link>,
    positions: HashMap<NodeId, (f64, f64)>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every node hears every other node.
    pub fn fully_connected(nodes: &[NodeId]) -> Self {
        let mut topo = Self::new();
        for (i, &a) in nodes.iter().enumerate() {
            for &b in nodes.iter().skip(i + 1) {
                topo.add_link(a, b, Link::default());
            }
        }
        topo
    }

    /// Each node hears only its immediate predecessor and successor.
    pub fn line(nodes: &[NodeId]) -> Self {
        let mut topo = Self::new();
        for window in nodes.windows(2) {
            topo.add_link(window[0], window[1], Link::default());
        }
        topo
    }

    /// First node is the hub. Spokes only hear the hub.
    pub fn star(nodes: &[NodeId]) -> Self {
        let mut topo = Self::new();
        let Some((&hub, spokes)) = nodes.split_first() else {
            return topo;
        };
        for &spoke in spokes {
            topo.add_link(hub, spoke, Link::default());
        }
        topo
    }

    /// Nodes scattered over a `side` x `side` metre field.
    ///
    /// Positions come from a seeded LCG. Nodes within `range` metres are
    /// linked with RSSI from [`rssi_for_distance`]. A disconnected result is
    /// patched with the shortest missing links.
    pub fn random_geometric(nodes: &[NodeId], seed: u64, side: f64, range: f64) -> Self {
        let mut topo = Self::new();
        let positions = generate_positions(nodes.len(), seed, side);
        for (&node, &pos) in nodes.iter().zip(&positions) {
            topo.positions.insert(node, pos);
        }
        if nodes.len() <= 1 {
            return topo;
        }

        let mut all_edges: Vec<(usize, usize, f64)> = Vec::new();
        for i in 0..nodes.len() {
            for j in (i + 1)..nodes.len() {
                let dist = distance(positions[i], positions[j]);
                all_edges.push((i, j, dist));
                if dist <= range {
                    topo.add_link(
                        nodes[i],
                        nodes[j],
                        Link::default().with_rssi(rssi_for_distance(dist)),
                    );
                }
            }
        }

        ensure_connectivity(&mut topo, nodes, &mut all_edges);
        topo
    }

    /// Add (or replace) a bidirectional link.
    pub fn add_link(&mut self, a: NodeId, b: NodeId, link: Link) {
        self.links.insert(Self::canonical_pair(a, b), link);
    }

    pub fn get_link(&self, a: NodeId, b: NodeId) -> Option<&Link> {
        self.links.get(&Self::canonical_pair(a, b))
    }

    pub fn get_link_mut(&mut self, a: NodeId, b: NodeId) -> Option<&mut Link> {
        self.links.get_mut(&Self::canonical_pair(a, b))
    }

    /// Link exists and is active.
    pub fn is_connected(&self, a: NodeId, b: NodeId) -> bool {
        self.get_link(a, b).is_some_and(|link| link.active)
    }

    /// Nodes reachable from `node` over active links, sorted by id.
    pub fn neighbors(&self, node: NodeId) -> Vec<NodeId> {
        let mut result: Vec<NodeId> = self
            .links
            .iter()
            .filter(|(_, link)| link.active)
            .filter_map(|(&(a, b), _)| {
                if a == node {
                    Some(b)
                } else if b == node {
                    Some(a)
                } else {
                    None
                }
            })
            .collect();
        result.sort_unstable();
        result
    }

    /// Position in metres, if the topology is geometric.
    pub fn position(&self, node: NodeId) -> Option<(f64, f64)> {
        self.positions.get(&node).copied()
    }

    pub fn set_position(&mut self, node: NodeId, x: f64, y: f64) {
        self.positions.insert(node, (x, y));
    }

    /// Disable all links crossing between partition groups.
    pub fn partition(&mut self, groups: &[Vec<NodeId>]) {
        for (&(a, b), link) in self.links.iter_mut() {
            let a_group = groups.iter().position(|g| g.contains(&a));
            let b_group = groups.iter().position(|g| g.contains(&b));
            if a_group != b_group {
                link.active = false;
            }
        }
    }

    /// Re-enable all links.
    pub fn heal(&mut self) {
        for link in self.links.values_mut() {
            link.active = true;
        }
    }

    pub fn set_global_loss_rate(&mut self, rate: f64) {
        let rate = rate.clamp(0.0, 1.0);
        for link in self.links.values_mut() {
            link.loss_rate = rate;
        }
    }

    pub fn set_global_delay(&mut self, delay: Duration) {
        for link in self.links.values_mut() {
            link.delay = delay;
        }
    }

    fn canonical_pair(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }
}

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    (dx * dx + dy * dy).sqrt()
}

/// Deterministic positions in a `side` x `side` square.
fn generate_positions(count: usize, seed: u64, side: f64) -> Vec<(f64, f64)> {
    let mut positions = Vec::with_capacity(count);
    let mut state = seed;

    for _ in 0..count {
        // glibc LCG parameters
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        let x = ((state >> 16) & 0x7FFF) as f64 / 32767.0;

        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        let y = ((state >> 16) & 0x7FFF) as f64 / 32767.0;

        positions.push((x * side, y * side));
    }

    positions
}

/// Add the shortest missing links until the graph is connected (Kruskal).
fn ensure_connectivity(topo: &mut Topology, nodes: &[NodeId], edges: &mut [(usize, usize, f64)]) {
    if nodes.len() <= 1 {
        return;
    }

    edges.sort_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(core::cmp::Ordering::Equal));

    let mut parent: Vec<usize> = (0..nodes.len()).collect();
    let mut rank: Vec<usize> = vec![0; nodes.len()];

    fn find(parent: &mut [usize], mut x: usize) -> usize {
        let mut root = x;
        while parent[root] != root {
            root = parent[root];
        }
        while parent[x] != root {
            let next = parent[x];
            parent[x] = root;
            x = next;
        }
        root
    }

    fn union(parent: &mut [usize], rank: &mut [usize], x: usize, y: usize) -> bool {
        let px = find(parent, x);
        let py = find(parent, y);
        if px == py {
            return false;
        }
        match rank[px].cmp(&rank[py]) {
            core::cmp::Ordering::Less => parent[px] = py,
            core::cmp::Ordering::Greater => parent[py] = px,
            core::cmp::Ordering::Equal => {
                parent[py] = px;
                rank[px] += 1;
            }
        }
        true
    }

    let mut components = nodes.len();
    for &(i, j, _) in edges.iter() {
        if topo.is_connected(nodes[i], nodes[j]) && union(&mut parent, &mut rank, i, j) {
            components -= 1;
        }
    }

    for &(i, j, dist) in edges.iter() {
        if components == 1 {
            return;
        }
        if !topo.is_connected(nodes[i], nodes[j]) && union(&mut parent, &mut rank, i, j) {
            topo.add_link(
                nodes[i],
                nodes[j],
                Link::default().with_rssi(rssi_for_distance(dist)),
            );
            components -= 1;
        }
    }
}
