//! Four-slot discovery cycle.
//!
//! Slot 0 carries the node's own message; slots 1-3 forward queued packets.
//! The cycle does not keep time itself. The owner calls [`DiscoveryCycle::execute_slot`]
//! and [`DiscoveryCycle::advance_slot`] once per slot period.
//!
//! Handlers are plain function pointers over a caller-chosen context `C`, so
//! the owner can pass itself (or a disjoint part of itself) without the cycle
//! holding references.

use crate::time::Duration;

/// Slots per cycle.
pub const NUM_SLOTS: usize = 4;
/// Default slot length.
pub const DEFAULT_SLOT_DURATION: Duration = Duration::from_millis(100);

pub const SLOT_OWN_MESSAGE: u8 = 0;
pub const SLOT_FORWARD_1: u8 = 1;
pub const SLOT_FORWARD_2: u8 = 2;
pub const SLOT_FORWARD_3: u8 = 3;

/// Per-slot handler, called with the slot number.
pub type SlotHandler<C> = fn(&mut C, u8);
/// Cycle-complete handler, called with the new cycle count.
pub type CycleCompleteHandler<C> = fn(&mut C, u32);

/// What a slot is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotType {
    OwnMessage,
    Forwarding,
}

impl SlotType {
    pub fn of(slot: u8) -> SlotType {
        if slot == SLOT_OWN_MESSAGE {
            SlotType::OwnMessage
        } else {
            SlotType::Forwarding
        }
    }
}

pub fn is_valid_slot(slot: u8) -> bool {
    (slot as usize) < NUM_SLOTS
}

pub fn is_forwarding_slot(slot: u8) -> bool {
    (SLOT_FORWARD_1..=SLOT_FORWARD_3).contains(&slot)
}

/// Human-readable slot label.
pub fn slot_name(slot: u8) -> &'static str {
    match slot {
        SLOT_OWN_MESSAGE => "own-message",
        SLOT_FORWARD_1 => "forward-1",
        SLOT_FORWARD_2 => "forward-2",
        SLOT_FORWARD_3 => "forward-3",
        _ => "invalid",
    }
}

/// Discovery cycle state machine: idle, or running at slot 0..3.
pub struct DiscoveryCycle<C> {
    running: bool,
    current_slot: u8,
    slot_duration: Duration,
    cycle_count: u32,
    slot_handlers: [Option<SlotHandler<C>>; NUM_SLOTS],
    on_complete: Option<CycleCompleteHandler<C>>,
}

impl<C> Default for DiscoveryCycle<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> DiscoveryCycle<C> {
    pub fn new() -> Self {
        Self {
            running: false,
            current_slot: 0,
            slot_duration: DEFAULT_SLOT_DURATION,
            cycle_count: 0,
            slot_handlers: [None; NUM_SLOTS],
            on_complete: None,
        }
    }

    /// Change the slot length. Refused while running.
    pub fn set_slot_duration(&mut self, duration: Duration) -> bool {
        if self.running {
            return false;
        }
        self.slot_duration = duration;
        true
    }

    pub fn slot_duration(&self) -> Duration {
        self.slot_duration
    }

    pub fn cycle_duration(&self) -> Duration {
        self.slot_duration * NUM_SLOTS as u64
    }

    /// Offset of `slot` from the start of a cycle. Zero for invalid slots.
    pub fn slot_offset(&self, slot: u8) -> Duration {
        if !is_valid_slot(slot) {
            return Duration::ZERO;
        }
        self.slot_duration * slot as u64
    }

    /// Register a handler for `slot`. Returns false for an invalid slot.
    pub fn set_slot_handler(&mut self, slot: u8, handler: SlotHandler<C>) -> bool {
        if !is_valid_slot(slot) {
            return false;
        }
        self.slot_handlers[slot as usize] = Some(handler);
        true
    }

    pub fn set_complete_handler(&mut self, handler: CycleCompleteHandler<C>) {
        self.on_complete = Some(handler);
    }

    /// Start at slot 0. Returns false if already running.
    pub fn start(&mut self) -> bool {
        if self.running {
            return false;
        }
        self.running = true;
        self.current_slot = 0;
        true
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn current_slot(&self) -> u8 {
        self.current_slot
    }

    pub fn cycle_count(&self) -> u32 {
        self.cycle_count
    }

    pub fn reset_cycle_count(&mut self) {
        self.cycle_count = 0;
    }

    /// Run the current slot's handler, if running and one is registered.
    pub fn execute_slot(&self, ctx: &mut C) {
        if !self.running {
            return;
        }
        let slot = self.current_slot;
        if let Some(handler) = self.slot_handlers[slot as usize] {
            handler(ctx, slot);
        }
    }

    /// Move to the next slot. Wrapping to 0 completes a cycle and fires the
    /// complete handler before any slot-0 work. Returns the new slot.
    pub fn advance_slot(&mut self, ctx: &mut C) -> u8 {
        if !self.running {
            return 0;
        }
        self.current_slot += 1;
        if self.current_slot as usize >= NUM_SLOTS {
            self.current_slot = 0;
            self.cycle_count = self.cycle_count.wrapping_add(1);
            if let Some(handler) = self.on_complete {
                handler(ctx, self.cycle_count);
            }
        }
        self.current_slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    #[derive(Default)]
    struct Trace {
        slots: Vec<u8>,
        completed: Vec<u32>,
    }

    fn record_slot(t: &mut Trace, slot: u8) {
        t.slots.push(slot);
    }

    fn record_complete(t: &mut Trace, count: u32) {
        t.completed.push(count);
    }

    fn traced_cycle() -> DiscoveryCycle<Trace> {
        let mut cycle = DiscoveryCycle::new();
        for slot in 0..NUM_SLOTS as u8 {
            assert!(cycle.set_slot_handler(slot, record_slot));
        }
        cycle.set_complete_handler(record_complete);
        cycle
    }

    #[test]
    fn test_start_stop() {
        let mut cycle: DiscoveryCycle<Trace> = DiscoveryCycle::new();
        assert!(!cycle.is_running());
        assert!(cycle.start());
        assert!(!cycle.start());
        cycle.stop();
        cycle.stop();
        assert!(!cycle.is_running());
    }

    #[test]
    fn test_full_cycle_runs_all_slots_then_completes() {
        let mut cycle = traced_cycle();
        let mut trace = Trace::default();
        cycle.start();
        for _ in 0..NUM_SLOTS {
            cycle.execute_slot(&mut trace);
            cycle.advance_slot(&mut trace);
        }
        assert_eq!(trace.slots, [0, 1, 2, 3]);
        assert_eq!(trace.completed, [1]);
        assert_eq!(cycle.current_slot(), 0);
        assert_eq!(cycle.cycle_count(), 1);
    }

    #[test]
    fn test_idle_cycle_does_nothing() {
        let mut cycle = traced_cycle();
        let mut trace = Trace::default();
        cycle.execute_slot(&mut trace);
        assert_eq!(cycle.advance_slot(&mut trace), 0);
        assert!(trace.slots.is_empty());
        assert_eq!(cycle.cycle_count(), 0);
    }

    #[test]
    fn test_missing_handler_is_noop() {
        let mut cycle: DiscoveryCycle<Trace> = DiscoveryCycle::new();
        cycle.set_slot_handler(SLOT_OWN_MESSAGE, record_slot);
        let mut trace = Trace::default();
        cycle.start();
        for _ in 0..NUM_SLOTS {
            cycle.execute_slot(&mut trace);
            cycle.advance_slot(&mut trace);
        }
        assert_eq!(trace.slots, [0]);
        assert_eq!(cycle.cycle_count(), 1);
    }

    #[test]
    fn test_restart_resets_slot() {
        let mut cycle = traced_cycle();
        let mut trace = Trace::default();
        cycle.start();
        cycle.advance_slot(&mut trace);
        cycle.advance_slot(&mut trace);
        cycle.stop();
        assert!(cycle.start());
        assert_eq!(cycle.current_slot(), 0);
    }

    #[test]
    fn test_slot_duration_locked_while_running() {
        let mut cycle: DiscoveryCycle<Trace> = DiscoveryCycle::new();
        assert_eq!(cycle.slot_duration(), DEFAULT_SLOT_DURATION);
        assert!(cycle.set_slot_duration(Duration::from_millis(50)));
        cycle.start();
        assert!(!cycle.set_slot_duration(Duration::from_millis(10)));
        assert_eq!(cycle.cycle_duration().as_millis(), 200);
        assert_eq!(cycle.slot_offset(3).as_millis(), 150);
        assert_eq!(cycle.slot_offset(9), Duration::ZERO);
    }

    #[test]
    fn test_slot_classification() {
        assert_eq!(SlotType::of(0), SlotType::OwnMessage);
        assert_eq!(SlotType::of(2), SlotType::Forwarding);
        assert!(is_forwarding_slot(3));
        assert!(!is_forwarding_slot(0));
        assert!(!is_valid_slot(4));
        assert_eq!(slot_name(1), "forward-1");
        let mut cycle: DiscoveryCycle<Trace> = DiscoveryCycle::new();
        assert!(!cycle.set_slot_handler(4, record_slot));
    }
}
