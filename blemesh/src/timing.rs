//! Stochastic listen/broadcast slot generator.
//!
//! Each slot is either a listen slot or a broadcast slot, decided by one draw
//! from a per-instance LCG. Two schedules exist:
//!
//! - **Noisy**: a plain Bernoulli draw against the listen ratio. Used while
//!   sampling ambient RSSI at the start of every round.
//! - **Stochastic**: the neighbor-discovery profile. The number of broadcast
//!   slots per wrap is capped by a budget derived from measured crowding, and
//!   the listen ratio follows from that budget.
//!
//! Retry bookkeeping (`record_success`/`record_failure`) is kept alongside so
//! callers can back off after repeated failed transmissions.

use crate::traits::Random;

/// Upper bound on slots per schedule.
pub const MAX_SLOTS: u32 = 10;
pub const DEFAULT_LISTEN_RATIO: f64 = 0.8;
pub const MAX_RETRIES: u32 = 3;
pub const DEFAULT_SEED: u32 = 12345;

pub const NOISE_DEFAULT_SLOTS: u32 = 10;
pub const NOISE_LISTEN_RATIO: f64 = 0.8;
pub const NEIGHBOR_DEFAULT_SLOTS: u32 = 10;
pub const NEIGHBOR_LISTEN_RATIO: f64 = 0.9;
pub const NEIGHBOR_MIN_TX_SLOTS: u32 = 1;
pub const NEIGHBOR_MAX_TX_SLOTS: u32 = 3;

const LCG_A: u32 = 1_664_525;
const LCG_C: u32 = 1_013_904_223;

/// Numerical Recipes LCG: `seed = A * seed + C` (mod 2^32).
#[derive(Debug, Clone)]
pub struct Lcg {
    state: u32,
}

impl Lcg {
    pub const fn new(seed: u32) -> Self {
        Self { state: seed }
    }
}

impl Default for Lcg {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

impl Random for Lcg {
    fn next_u32(&mut self) -> u32 {
        self.state = LCG_A.wrapping_mul(self.state).wrapping_add(LCG_C);
        self.state
    }

    fn reseed(&mut self, seed: u32) {
        self.state = seed;
    }
}

/// Which slot profile a generator follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleType {
    Noisy,
    Stochastic,
}

/// Per-schedule listen/broadcast generator.
#[derive(Debug, Clone)]
pub struct BroadcastTiming {
    schedule: ScheduleType,
    num_slots: u32,
    slot_duration_ms: u32,
    listen_ratio: f64,
    crowding_factor: f64,

    current_slot: u32,
    is_broadcast_slot: bool,
    broadcasts_this_cycle: u32,
    max_broadcast_slots: u32,
    rng: Lcg,

    max_retries: u32,
    retry_count: u32,
    message_sent: bool,

    broadcast_attempts: u32,
    total_broadcast_slots: u32,
    total_listen_slots: u32,
    successful_broadcasts: u32,
    failed_broadcasts: u32,
}

fn clamp_unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// Broadcast budget for the neighbor profile: more crowding, fewer slots.
fn neighbor_tx_slots(crowding: f64) -> u32 {
    let crowding = clamp_unit(crowding);
    let range = (NEIGHBOR_MAX_TX_SLOTS - NEIGHBOR_MIN_TX_SLOTS) as f64;
    let value = NEIGHBOR_MIN_TX_SLOTS as f64 + (1.0 - crowding) * range;
    (libm::ceil(value) as u32).clamp(NEIGHBOR_MIN_TX_SLOTS, NEIGHBOR_MAX_TX_SLOTS)
}

impl BroadcastTiming {
    /// Create a generator. `None` for slots or ratio selects the schedule default.
    ///
    /// A ratio outside `[0, 1]` falls back to 0.8, zero slots to the noisy
    /// default, and anything above [`MAX_SLOTS`] is capped.
    pub fn new(
        schedule: ScheduleType,
        num_slots: Option<u32>,
        slot_duration_ms: u32,
        listen_ratio: Option<f64>,
    ) -> Self {
        let (default_slots, default_ratio) = match schedule {
            ScheduleType::Noisy => (NOISE_DEFAULT_SLOTS, NOISE_LISTEN_RATIO),
            ScheduleType::Stochastic => (NEIGHBOR_DEFAULT_SLOTS, NEIGHBOR_LISTEN_RATIO),
        };

        let mut ratio = listen_ratio.unwrap_or(default_ratio);
        if !(0.0..=1.0).contains(&ratio) {
            ratio = DEFAULT_LISTEN_RATIO;
        }
        let mut slots = num_slots.unwrap_or(default_slots);
        if slots == 0 {
            slots = NOISE_DEFAULT_SLOTS;
        }
        slots = slots.min(MAX_SLOTS);

        let mut timing = Self {
            schedule,
            num_slots: slots,
            slot_duration_ms,
            listen_ratio: ratio,
            crowding_factor: 0.5,
            current_slot: 0,
            is_broadcast_slot: false,
            broadcasts_this_cycle: 0,
            max_broadcast_slots: MAX_SLOTS,
            rng: Lcg::default(),
            max_retries: MAX_RETRIES,
            retry_count: 0,
            message_sent: false,
            broadcast_attempts: 0,
            total_broadcast_slots: 0,
            total_listen_slots: 0,
            successful_broadcasts: 0,
            failed_broadcasts: 0,
        };
        timing.apply_neighbor_profile();
        timing
    }

    /// Noisy-phase generator with default slots and ratio.
    pub fn noisy(slot_duration_ms: u32) -> Self {
        Self::new(ScheduleType::Noisy, None, slot_duration_ms, None)
    }

    /// Neighbor-phase generator with default slots and ratio.
    pub fn stochastic(slot_duration_ms: u32) -> Self {
        Self::new(ScheduleType::Stochastic, None, slot_duration_ms, None)
    }

    fn apply_neighbor_profile(&mut self) {
        if self.schedule != ScheduleType::Stochastic {
            return;
        }
        self.num_slots = self.num_slots.clamp(NEIGHBOR_DEFAULT_SLOTS, MAX_SLOTS);
        let tx_slots = neighbor_tx_slots(self.crowding_factor);
        self.max_broadcast_slots = tx_slots;
        self.listen_ratio = clamp_unit(1.0 - tx_slots as f64 / self.num_slots as f64);
    }

    pub fn set_seed(&mut self, seed: u32) {
        self.rng.reseed(seed);
    }

    /// Advance to the next slot and decide its role. Returns true for broadcast.
    pub fn advance_slot(&mut self) -> bool {
        self.current_slot = (self.current_slot + 1) % self.num_slots;
        if self.current_slot == 0 {
            self.broadcasts_this_cycle = 0;
        }

        let draw = self.rng.next_unit();
        let forced_listen = self.schedule == ScheduleType::Stochastic
            && self.broadcasts_this_cycle >= self.max_broadcast_slots;

        if forced_listen || draw < self.listen_ratio {
            self.is_broadcast_slot = false;
            self.total_listen_slots = self.total_listen_slots.saturating_add(1);
        } else {
            self.is_broadcast_slot = true;
            self.total_broadcast_slots = self.total_broadcast_slots.saturating_add(1);
            self.broadcast_attempts = self.broadcast_attempts.saturating_add(1);
            if self.schedule == ScheduleType::Stochastic {
                self.broadcasts_this_cycle += 1;
            }
        }
        self.is_broadcast_slot
    }

    pub fn should_broadcast(&self) -> bool {
        self.is_broadcast_slot
    }

    pub fn should_listen(&self) -> bool {
        !self.is_broadcast_slot
    }

    pub fn record_success(&mut self) {
        self.successful_broadcasts = self.successful_broadcasts.saturating_add(1);
        self.message_sent = true;
        self.retry_count = 0;
    }

    /// Count a failed transmission. Returns true while another retry is allowed;
    /// after the last one the counter resets and this returns false.
    pub fn record_failure(&mut self) -> bool {
        self.failed_broadcasts = self.failed_broadcasts.saturating_add(1);
        self.retry_count += 1;
        if self.retry_count < self.max_retries {
            return true;
        }
        self.retry_count = 0;
        false
    }

    pub fn reset_retry(&mut self) {
        self.retry_count = 0;
        self.message_sent = false;
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.successful_broadcasts + self.failed_broadcasts;
        if total == 0 {
            return 0.0;
        }
        self.successful_broadcasts as f64 / total as f64
    }

    /// Observed share of listen slots so far.
    pub fn actual_listen_ratio(&self) -> f64 {
        let total = self.total_listen_slots + self.total_broadcast_slots;
        if total == 0 {
            return 0.0;
        }
        self.total_listen_slots as f64 / total as f64
    }

    /// Feed measured crowding. Stochastic schedules recompute their budget.
    pub fn set_crowding(&mut self, crowding: f64) {
        self.crowding_factor = clamp_unit(crowding);
        if self.schedule == ScheduleType::Stochastic {
            self.apply_neighbor_profile();
            self.broadcasts_this_cycle = 0;
        }
    }

    pub fn schedule(&self) -> ScheduleType {
        self.schedule
    }

    pub fn current_slot(&self) -> u32 {
        self.current_slot
    }

    pub fn num_slots(&self) -> u32 {
        self.num_slots
    }

    pub fn slot_duration_ms(&self) -> u32 {
        self.slot_duration_ms
    }

    pub fn listen_ratio(&self) -> f64 {
        self.listen_ratio
    }

    pub fn crowding_factor(&self) -> f64 {
        self.crowding_factor
    }

    pub fn max_broadcast_slots(&self) -> u32 {
        self.max_broadcast_slots
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn message_sent(&self) -> bool {
        self.message_sent
    }

    pub fn broadcast_attempts(&self) -> u32 {
        self.broadcast_attempts
    }

    pub fn total_listen_slots(&self) -> u32 {
        self.total_listen_slots
    }

    pub fn total_broadcast_slots(&self) -> u32 {
        self.total_broadcast_slots
    }
}
