//! Election-side view of the neighborhood.
//!
//! Tracks every heard neighbor with its position and signal, measures RSSI
//! crowding over a bounded sample window, and derives the connectivity
//! metrics published once per discovery cycle.

use crate::collections::ShrinkingHashMap;
use crate::forwarding::crowding_factor_from_rssi;
use crate::time::{Duration, Timestamp};
use crate::types::{GpsLocation, NodeId, EDGE_RSSI_THRESHOLD, MAX_NEIGHBORS, RSSI_WINDOW_SIZE};

pub const DEFAULT_MIN_NEIGHBORS: u32 = 10;
pub const DEFAULT_MIN_CN_RATIO: f64 = 5.0;
pub const DEFAULT_MIN_GEO_DISTRIBUTION: f64 = 0.3;

/// Standard deviation (in position units) that maps to a distribution of 1.0.
const GEO_SPREAD_SCALE: f64 = 100.0;

/// Neighbor as seen by the election logic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElectionNeighbor {
    pub node_id: NodeId,
    /// Origin means no position known.
    pub location: GpsLocation,
    pub rssi: i8,
    pub message_count: u32,
    pub last_seen: Timestamp,
    pub is_direct: bool,
}

/// Snapshot handed to the metrics hook.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConnectivityMetrics {
    pub direct_connections: u32,
    pub total_neighbors: u32,
    pub crowding_factor: f64,
    /// `direct / (1 + crowding)`.
    pub connection_noise_ratio: f64,
    pub geographic_distribution: f64,
    pub forwarding_success_rate: f64,
    pub messages_forwarded: u32,
    pub messages_received: u32,
}

/// Fixed-size ring of RSSI samples. Overwrites the oldest when full.
#[derive(Debug, Clone)]
struct RssiWindow {
    samples: [i8; RSSI_WINDOW_SIZE],
    head: usize,
    len: usize,
}

impl RssiWindow {
    const fn new() -> Self {
        Self {
            samples: [0; RSSI_WINDOW_SIZE],
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, rssi: i8) {
        let tail = (self.head + self.len) % RSSI_WINDOW_SIZE;
        self.samples[tail] = rssi;
        if self.len < RSSI_WINDOW_SIZE {
            self.len += 1;
        } else {
            self.head = (self.head + 1) % RSSI_WINDOW_SIZE;
        }
    }

    fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Live samples, not in arrival order. Writes start at index 0, so the
    /// first `len` entries are always the live ones.
    fn as_slice(&self) -> &[i8] {
        &self.samples[..self.len]
    }
}

pub struct ElectionState {
    neighbors: ShrinkingHashMap<NodeId, ElectionNeighbor>,
    direct_threshold: i8,

    window: RssiWindow,
    measuring: bool,
    last_crowding_factor: f64,

    metrics: ConnectivityMetrics,

    min_neighbors: u32,
    min_cn_ratio: f64,
    min_geo_distribution: f64,
}

impl Default for ElectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ElectionState {
    pub fn new() -> Self {
        Self {
            neighbors: ShrinkingHashMap::with_max_capacity(MAX_NEIGHBORS),
            direct_threshold: EDGE_RSSI_THRESHOLD,
            window: RssiWindow::new(),
            measuring: false,
            last_crowding_factor: 0.0,
            metrics: ConnectivityMetrics::default(),
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
            min_cn_ratio: DEFAULT_MIN_CN_RATIO,
            min_geo_distribution: DEFAULT_MIN_GEO_DISTRIBUTION,
        }
    }

    // --- Neighbor database ---

    /// Record a message from `node_id`. A missing location keeps the last one.
    ///
    /// New neighbors are ignored once the database holds `MAX_NEIGHBORS`.
    pub fn update_neighbor(
        &mut self,
        node_id: NodeId,
        location: Option<GpsLocation>,
        rssi: i8,
        now: Timestamp,
    ) {
        let is_direct = rssi >= self.direct_threshold;
        if let Some(n) = self.neighbors.get_mut(&node_id) {
            if let Some(loc) = location {
                n.location = loc;
            }
            n.rssi = rssi;
            n.message_count = n.message_count.saturating_add(1);
            n.last_seen = now;
            n.is_direct = is_direct;
            return;
        }
        if self.neighbors.is_full() {
            return;
        }
        self.neighbors.insert(
            node_id,
            ElectionNeighbor {
                node_id,
                location: location.unwrap_or_default(),
                rssi,
                message_count: 1,
                last_seen: now,
                is_direct,
            },
        );
    }

    pub fn get_neighbor(&self, node_id: NodeId) -> Option<&ElectionNeighbor> {
        self.neighbors.get(&node_id)
    }

    pub fn neighbor_count(&self) -> usize {
        self.neighbors.len()
    }

    pub fn count_direct_connections(&self) -> u32 {
        self.neighbors.values().filter(|n| n.is_direct).count() as u32
    }

    /// Drop neighbors not heard within `timeout`. Returns the count removed.
    pub fn clean_old_neighbors(&mut self, now: Timestamp, timeout: Duration) -> usize {
        self.neighbors
            .retain(|_, n| now.saturating_sub(n.last_seen) <= timeout)
    }

    pub fn set_direct_threshold(&mut self, rssi: i8) {
        self.direct_threshold = rssi;
    }

    // --- Crowding window ---

    /// Clear the sample ring and start recording.
    pub fn begin_crowding_measurement(&mut self) {
        self.window.clear();
        self.measuring = true;
    }

    pub fn is_measuring_crowding(&self) -> bool {
        self.measuring
    }

    /// Record a sample. Ignored unless a measurement is active.
    pub fn add_rssi_sample(&mut self, rssi: i8) {
        if self.measuring {
            self.window.push(rssi);
        }
    }

    /// Crowding from the samples so far, or the last stored factor if none.
    pub fn calculate_crowding(&self) -> f64 {
        if self.window.is_empty() {
            return self.last_crowding_factor;
        }
        crowding_factor_from_rssi(self.window.as_slice())
    }

    /// Close the window and store the resulting factor.
    pub fn end_crowding_measurement(&mut self) -> f64 {
        let factor = self.calculate_crowding();
        self.last_crowding_factor = factor;
        self.metrics.crowding_factor = factor;
        self.measuring = false;
        self.window.clear();
        factor
    }

    pub fn last_crowding_factor(&self) -> f64 {
        self.last_crowding_factor
    }

    // --- Metrics ---

    /// Spread of neighbor positions, normalized to `[0, 1]`.
    ///
    /// Neighbors at the origin are treated as having no position. Fewer than
    /// two positioned neighbors gives 0.
    pub fn geographic_distribution(&self) -> f64 {
        let positioned = || {
            self.neighbors
                .values()
                .filter(|n| !n.location.is_origin())
                .map(|n| n.location)
        };
        let count = positioned().count();
        if count < 2 {
            return 0.0;
        }

        let n = count as f64;
        let (sx, sy, sz) = positioned().fold((0.0, 0.0, 0.0), |(x, y, z), l| {
            (x + l.x, y + l.y, z + l.z)
        });
        let centroid = GpsLocation::new(sx / n, sy / n, sz / n);

        let variance = positioned()
            .map(|l| {
                let d = l.distance(&centroid);
                d * d
            })
            .sum::<f64>()
            / n;

        (libm::sqrt(variance) / GEO_SPREAD_SCALE).min(1.0)
    }

    /// Recompute all connectivity metrics from current state.
    pub fn update_metrics(&mut self) -> &ConnectivityMetrics {
        let direct = self.count_direct_connections();
        let crowding = self.calculate_crowding();
        let geo = self.geographic_distribution();

        let m = &mut self.metrics;
        m.direct_connections = direct;
        m.total_neighbors = self.neighbors.len() as u32;
        m.crowding_factor = crowding;
        m.connection_noise_ratio = direct as f64 / (1.0 + crowding);
        m.geographic_distribution = geo;
        m.forwarding_success_rate = if m.messages_received > 0 {
            m.messages_forwarded as f64 / m.messages_received as f64
        } else {
            0.0
        };
        &self.metrics
    }

    pub fn metrics(&self) -> &ConnectivityMetrics {
        &self.metrics
    }

    pub fn record_forwarded(&mut self) {
        self.metrics.messages_forwarded = self.metrics.messages_forwarded.saturating_add(1);
    }

    pub fn record_received(&mut self) {
        self.metrics.messages_received = self.metrics.messages_received.saturating_add(1);
    }

    // --- Candidacy thresholds ---

    pub fn set_thresholds(&mut self, min_neighbors: u32, min_cn_ratio: f64, min_geo: f64) {
        self.min_neighbors = min_neighbors;
        self.min_cn_ratio = min_cn_ratio;
        self.min_geo_distribution = min_geo;
    }

    pub fn thresholds(&self) -> (u32, f64, f64) {
        (self.min_neighbors, self.min_cn_ratio, self.min_geo_distribution)
    }

    /// Advisory check of the last computed metrics against the thresholds.
    ///
    /// Role changes are decided by the node; this only reports.
    pub fn meets_candidacy_thresholds(&self) -> bool {
        let m = &self.metrics;
        m.direct_connections >= self.min_neighbors
            && m.connection_noise_ratio >= self.min_cn_ratio
            && m.geographic_distribution >= self.min_geo_distribution
    }

    /// Forget neighbors, samples and metrics. Thresholds are kept.
    pub fn reset(&mut self) {
        self.neighbors.clear();
        self.window.clear();
        self.measuring = false;
        self.last_crowding_factor = 0.0;
        self.metrics = ConnectivityMetrics::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn test_update_neighbor_upserts() {
        let mut e = ElectionState::new();
        e.update_neighbor(5, Some(GpsLocation::new(1.0, 2.0, 0.0)), -60, at(10));
        e.update_neighbor(5, None, -70, at(20));
        let n = e.get_neighbor(5).unwrap();
        assert_eq!(n.message_count, 2);
        assert_eq!(n.rssi, -70);
        assert_eq!(n.last_seen, at(20));
        assert_eq!(n.location, GpsLocation::new(1.0, 2.0, 0.0));
        assert!(n.is_direct);
        assert_eq!(e.neighbor_count(), 1);
    }

    #[test]
    fn test_direct_threshold() {
        let mut e = ElectionState::new();
        e.update_neighbor(1, None, -85, at(0));
        e.update_neighbor(2, None, -86, at(0));
        assert_eq!(e.count_direct_connections(), 1);
        assert!(!e.get_neighbor(2).unwrap().is_direct);
    }

    #[test]
    fn test_neighbor_capacity() {
        let mut e = ElectionState::new();
        for id in 1..=(MAX_NEIGHBORS as u32 + 5) {
            e.update_neighbor(id, None, -50, at(0));
        }
        assert_eq!(e.neighbor_count(), MAX_NEIGHBORS);
    }

    #[test]
    fn test_samples_ignored_outside_window() {
        let mut e = ElectionState::new();
        e.add_rssi_sample(-40);
        assert_eq!(e.calculate_crowding(), 0.0);

        e.begin_crowding_measurement();
        assert!(e.is_measuring_crowding());
        e.add_rssi_sample(-65);
        assert!((e.calculate_crowding() - 0.5).abs() < 1e-9);

        let factor = e.end_crowding_measurement();
        assert!((factor - 0.5).abs() < 1e-9);
        assert!(!e.is_measuring_crowding());
        // Empty window falls back to the stored factor.
        assert!((e.calculate_crowding() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut e = ElectionState::new();
        e.begin_crowding_measurement();
        for _ in 0..RSSI_WINDOW_SIZE {
            e.add_rssi_sample(-90);
        }
        assert_eq!(e.calculate_crowding(), 0.0);
        for _ in 0..RSSI_WINDOW_SIZE {
            e.add_rssi_sample(-40);
        }
        assert_eq!(e.calculate_crowding(), 1.0);
    }

    #[test]
    fn test_geographic_distribution() {
        let mut e = ElectionState::new();
        e.update_neighbor(1, Some(GpsLocation::new(10.0, 0.0, 0.0)), -50, at(0));
        assert_eq!(e.geographic_distribution(), 0.0);

        // Origin counts as no position.
        e.update_neighbor(2, Some(GpsLocation::new(0.0, 0.0, 0.0)), -50, at(0));
        assert_eq!(e.geographic_distribution(), 0.0);

        e.update_neighbor(3, Some(GpsLocation::new(30.0, 0.0, 0.0)), -50, at(0));
        // Centroid 20, distances 10 and 10, std-dev 10.
        assert!((e.geographic_distribution() - 0.1).abs() < 1e-9);

        e.update_neighbor(4, Some(GpsLocation::new(1000.0, 0.0, 0.0)), -50, at(0));
        assert_eq!(e.geographic_distribution(), 1.0);
    }

    #[test]
    fn test_update_metrics() {
        let mut e = ElectionState::new();
        e.begin_crowding_measurement();
        e.add_rssi_sample(-65);
        e.end_crowding_measurement();
        for id in 1..=4 {
            e.update_neighbor(id, None, -50, at(0));
        }
        e.update_neighbor(9, None, -95, at(0));
        e.record_received();
        e.record_received();
        e.record_forwarded();

        let m = *e.update_metrics();
        assert_eq!(m.direct_connections, 4);
        assert_eq!(m.total_neighbors, 5);
        assert!((m.crowding_factor - 0.5).abs() < 1e-9);
        assert!((m.connection_noise_ratio - 4.0 / 1.5).abs() < 1e-9);
        assert!((m.forwarding_success_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_candidacy_thresholds() {
        let mut e = ElectionState::new();
        assert_eq!(e.thresholds(), (10, 5.0, 0.3));
        for id in 1..=3 {
            let loc = GpsLocation::new(id as f64 * 40.0, 1.0, 0.0);
            e.update_neighbor(id, Some(loc), -50, at(0));
        }
        e.update_metrics();
        assert!(!e.meets_candidacy_thresholds());

        e.set_thresholds(3, 2.0, 0.2);
        assert!(e.meets_candidacy_thresholds());
    }

    #[test]
    fn test_clean_old_neighbors() {
        let mut e = ElectionState::new();
        e.update_neighbor(1, None, -50, at(0));
        e.update_neighbor(2, None, -50, at(500));
        e.update_neighbor(3, None, -50, at(900));
        let removed = e.clean_old_neighbors(at(1000), Duration::from_millis(500));
        assert_eq!(removed, 1);
        assert!(e.get_neighbor(1).is_none());
        assert!(e.get_neighbor(2).is_some());
    }

    #[test]
    fn test_reset_keeps_thresholds() {
        let mut e = ElectionState::new();
        e.set_thresholds(1, 1.0, 0.0);
        e.update_neighbor(1, None, -50, at(0));
        e.record_received();
        e.reset();
        assert_eq!(e.neighbor_count(), 0);
        assert_eq!(e.metrics().messages_received, 0);
        assert_eq!(e.thresholds(), (1, 1.0, 0.0));
    }
}
