//! Runtime configuration for a discovery engine.
//!
//! `EngineConfig` carries everything an engine needs besides its hooks: the
//! node id, slot timing for each phase, forwarding parameters and RNG seeds.
//! Protocol capacities (queue size, neighbor table, path length) are
//! compile-time constants in [`crate::types`].
//!
//! # Phase Timing
//!
//! Each round runs three phases back to back:
//!
//! | Phase | Slots | Slot length | Default round share |
//! |-------|------:|------------:|--------------------:|
//! | Noisy | `noise_slot_count` | `noise_slot_duration_ms` | 10 x 200 ms |
//! | Neighbor | `neighbor_slot_count` | `neighbor_slot_duration_ms` | 200 x 10 ms |
//! | Discovery | 4 | `slot_duration_ms` | 4 x 100 ms |
//!
//! # Example
//!
//! ```
//! use blemesh::config::{EngineConfig, SMALL_PHASES};
//!
//! let config = EngineConfig::new(7)
//!     .with_slot_duration_ms(50)
//!     .with_initial_ttl(6)
//!     .with_phases(SMALL_PHASES);
//! assert!(config.validate().is_ok());
//! assert_eq!(config.noise_slot_count, 4);
//! ```

use core::fmt;

use crate::types::{NodeId, DEFAULT_TTL, INVALID_NODE_ID};

pub const DEFAULT_SLOT_DURATION_MS: u32 = 100;
pub const DEFAULT_PROXIMITY_THRESHOLD: f64 = 10.0;
pub const DEFAULT_NOISE_SLOT_COUNT: u32 = 10;
pub const DEFAULT_NOISE_SLOT_DURATION_MS: u32 = 200;
pub const DEFAULT_NEIGHBOR_SLOT_COUNT: u32 = 200;
pub const DEFAULT_NEIGHBOR_SLOT_DURATION_MS: u32 = 10;
pub const DEFAULT_NEIGHBOR_TIMEOUT_CYCLES: u32 = 3;
pub const DEFAULT_TIMING_SEED: u32 = 12345;

/// Slot counts and lengths for the two pre-discovery phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseProfile {
    pub noise_slot_count: u32,
    pub noise_slot_duration_ms: u32,
    pub neighbor_slot_count: u32,
    pub neighbor_slot_duration_ms: u32,
}

/// Protocol default phase lengths.
pub const DEFAULT_PHASES: PhaseProfile = PhaseProfile {
    noise_slot_count: DEFAULT_NOISE_SLOT_COUNT,
    noise_slot_duration_ms: DEFAULT_NOISE_SLOT_DURATION_MS,
    neighbor_slot_count: DEFAULT_NEIGHBOR_SLOT_COUNT,
    neighbor_slot_duration_ms: DEFAULT_NEIGHBOR_SLOT_DURATION_MS,
};

/// Compact phases for tests and simulation.
pub const SMALL_PHASES: PhaseProfile = PhaseProfile {
    noise_slot_count: 4,
    noise_slot_duration_ms: 50,
    neighbor_slot_count: 8,
    neighbor_slot_duration_ms: 10,
};

/// Engine construction errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Node id 0 is reserved.
    InvalidNodeId,
    /// No `send` hook was supplied.
    MissingSendHook,
    ZeroSlotDuration,
    ZeroSlotCount,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidNodeId => write!(f, "node id 0 is reserved"),
            ConfigError::MissingSendHook => write!(f, "send hook is required"),
            ConfigError::ZeroSlotDuration => write!(f, "slot duration must be non-zero"),
            ConfigError::ZeroSlotCount => write!(f, "phase slot count must be non-zero"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub node_id: NodeId,
    /// Discovery-cycle slot length.
    pub slot_duration_ms: u32,
    /// TTL stamped on own packets.
    pub initial_ttl: u8,
    /// Minimum distance from the previous hop before relaying.
    pub proximity_threshold: f64,
    pub noise_slot_count: u32,
    pub noise_slot_duration_ms: u32,
    pub neighbor_slot_count: u32,
    pub neighbor_slot_duration_ms: u32,
    /// Neighbors unheard for this many cycles are pruned.
    pub neighbor_timeout_cycles: u32,
    /// Seed for the listen/broadcast generators.
    pub timing_seed: u32,
    /// Seed for forwarding draws. 0 selects the generator default.
    pub forwarding_seed: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_id: INVALID_NODE_ID,
            slot_duration_ms: DEFAULT_SLOT_DURATION_MS,
            initial_ttl: DEFAULT_TTL,
            proximity_threshold: DEFAULT_PROXIMITY_THRESHOLD,
            noise_slot_count: DEFAULT_NOISE_SLOT_COUNT,
            noise_slot_duration_ms: DEFAULT_NOISE_SLOT_DURATION_MS,
            neighbor_slot_count: DEFAULT_NEIGHBOR_SLOT_COUNT,
            neighbor_slot_duration_ms: DEFAULT_NEIGHBOR_SLOT_DURATION_MS,
            neighbor_timeout_cycles: DEFAULT_NEIGHBOR_TIMEOUT_CYCLES,
            timing_seed: DEFAULT_TIMING_SEED,
            forwarding_seed: 0,
        }
    }
}

impl EngineConfig {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            ..Self::default()
        }
    }

    pub fn with_slot_duration_ms(mut self, ms: u32) -> Self {
        self.slot_duration_ms = ms;
        self
    }

    pub fn with_initial_ttl(mut self, ttl: u8) -> Self {
        self.initial_ttl = ttl;
        self
    }

    pub fn with_proximity_threshold(mut self, threshold: f64) -> Self {
        self.proximity_threshold = threshold;
        self
    }

    pub fn with_phases(mut self, phases: PhaseProfile) -> Self {
        self.noise_slot_count = phases.noise_slot_count;
        self.noise_slot_duration_ms = phases.noise_slot_duration_ms;
        self.neighbor_slot_count = phases.neighbor_slot_count;
        self.neighbor_slot_duration_ms = phases.neighbor_slot_duration_ms;
        self
    }

    pub fn with_neighbor_timeout_cycles(mut self, cycles: u32) -> Self {
        self.neighbor_timeout_cycles = cycles;
        self
    }

    pub fn with_timing_seed(mut self, seed: u32) -> Self {
        self.timing_seed = seed;
        self
    }

    pub fn with_forwarding_seed(mut self, seed: u32) -> Self {
        self.forwarding_seed = seed;
        self
    }

    pub fn phases(&self) -> PhaseProfile {
        PhaseProfile {
            noise_slot_count: self.noise_slot_count,
            noise_slot_duration_ms: self.noise_slot_duration_ms,
            neighbor_slot_count: self.neighbor_slot_count,
            neighbor_slot_duration_ms: self.neighbor_slot_duration_ms,
        }
    }

    /// Check everything except the hooks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id == INVALID_NODE_ID {
            return Err(ConfigError::InvalidNodeId);
        }
        if self.slot_duration_ms == 0
            || self.noise_slot_duration_ms == 0
            || self.neighbor_slot_duration_ms == 0
        {
            return Err(ConfigError::ZeroSlotDuration);
        }
        if self.noise_slot_count == 0 || self.neighbor_slot_count == 0 {
            return Err(ConfigError::ZeroSlotCount);
        }
        Ok(())
    }
}
