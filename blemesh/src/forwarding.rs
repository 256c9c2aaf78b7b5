//! Forwarding decision: TTL, crowding, then GPS proximity.
//!
//! A relay that hears many strong neighbors forwards with lower probability,
//! down to `2 / direct_neighbors` when the air is saturated. A relay standing
//! right next to the previous hop adds no coverage, so packets are only
//! forwarded when the relay is farther than the proximity threshold from the
//! position the packet carries.

use crate::packet::DiscoveryPacket;
use crate::traits::Random;
use crate::types::GpsLocation;

/// Crowding at or below this always forwards.
pub const CROWDING_LOW: f64 = 0.1;
/// Crowding at or above this forwards with the base probability.
pub const CROWDING_HIGH: f64 = 0.9;
/// Mean RSSI mapped to zero crowding.
pub const RSSI_QUIET_DBM: f64 = -90.0;
/// Mean RSSI mapped to full crowding.
pub const RSSI_CROWDED_DBM: f64 = -40.0;
/// Noise level reported for fully crowded air.
pub const NOISE_LEVEL_SATURATED: f64 = 2.0;

const XORSHIFT_DEFAULT_STATE: u32 = 0x6d2b_79f5;

/// xorshift32 generator for forwarding draws.
#[derive(Debug, Clone)]
pub struct Xorshift32 {
    state: u32,
}

impl Xorshift32 {
    /// Seed 0 selects the default state (xorshift cannot leave zero).
    pub fn new(seed: u32) -> Self {
        let mut rng = Self {
            state: XORSHIFT_DEFAULT_STATE,
        };
        rng.reseed(seed);
        rng
    }
}

impl Default for Xorshift32 {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Random for Xorshift32 {
    fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    fn reseed(&mut self, seed: u32) {
        self.state = if seed == 0 {
            XORSHIFT_DEFAULT_STATE
        } else {
            seed
        };
    }
}

/// Probability of forwarding at a given crowding level.
pub fn forward_probability(crowding: f64, direct_neighbors: usize) -> f64 {
    let crowding = crowding.clamp(0.0, 1.0);
    let base = (2.0 / direct_neighbors.max(1) as f64).min(1.0);
    if crowding <= CROWDING_LOW {
        1.0
    } else if crowding >= CROWDING_HIGH {
        base
    } else {
        let t = (crowding - CROWDING_LOW) / (CROWDING_HIGH - CROWDING_LOW);
        1.0 + t * (base - 1.0)
    }
}

/// One draw against [`forward_probability`].
pub fn should_forward_crowding<R: Random>(
    crowding: f64,
    direct_neighbors: usize,
    rng: &mut R,
) -> bool {
    let probability = forward_probability(crowding, direct_neighbors);
    rng.next_unit() < probability
}

/// Forward only if strictly farther than `threshold` from the carried position.
pub fn should_forward_proximity(
    current: &GpsLocation,
    carried: &GpsLocation,
    threshold: f64,
) -> bool {
    current.distance(carried) > threshold
}

/// Full forwarding check, short-circuiting in order: TTL, crowding, proximity.
///
/// The proximity check is skipped when either side lacks a position.
pub fn should_forward<R: Random>(
    packet: &DiscoveryPacket,
    current_gps: Option<&GpsLocation>,
    crowding: f64,
    proximity_threshold: f64,
    direct_neighbors: usize,
    rng: &mut R,
) -> bool {
    if packet.ttl == 0 {
        return false;
    }
    if !should_forward_crowding(crowding, direct_neighbors, rng) {
        return false;
    }
    if let (Some(current), Some(carried)) = (current_gps, packet.gps.as_ref()) {
        if !should_forward_proximity(current, carried, proximity_threshold) {
            return false;
        }
    }
    true
}

/// Queue priority: lower is more urgent, so fresher packets go first.
pub fn priority(ttl: u8) -> u8 {
    if ttl == 0 {
        return u8::MAX;
    }
    u8::MAX - ttl
}

/// Map mean RSSI onto `[0, 1]` crowding. No samples means no crowding.
pub fn crowding_factor_from_rssi(samples: &[i8]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| s as f64).sum();
    let mean = sum / samples.len() as f64;
    if mean >= RSSI_CROWDED_DBM {
        return 1.0;
    }
    if mean <= RSSI_QUIET_DBM {
        return 0.0;
    }
    (mean - RSSI_QUIET_DBM) / (RSSI_CROWDED_DBM - RSSI_QUIET_DBM)
}

/// Candidacy noise level for a measured crowding factor.
///
/// Saturated air maps to [`NOISE_LEVEL_SATURATED`], which is enough to keep a
/// node with the minimum five direct neighbors from standing.
pub fn noise_level_from_crowding(crowding: f64) -> f64 {
    crowding.clamp(0.0, 1.0) * NOISE_LEVEL_SATURATED
}
