//! Core traits for radio, time, and randomness abstraction.
//!
//! These traits allow the engine to be used with different:
//! - Radio front ends (BLE controller, simulation)
//! - Time sources (real hardware time, simulated time)
//! - Random number generators (per-engine PRNGs, scripted test draws)

use alloc::vec::Vec;
use core::future::Future;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::time::Timestamp;

/// Queue size for the incoming frame channel.
pub(crate) const TRANSPORT_QUEUE_SIZE: usize = 8;

/// Mutex type used for channels.
pub(crate) type ChannelMutex = CriticalSectionRawMutex;

/// A frame heard on the air.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    /// Raw frame bytes.
    pub data: Vec<u8>,
    /// Received signal strength in dBm.
    pub rssi: i8,
}

impl Received {
    pub fn new(data: Vec<u8>, rssi: i8) -> Self {
        Self { data, rssi }
    }
}

/// Incoming frame channel type.
pub type TransportInChannel = Channel<ChannelMutex, Received, TRANSPORT_QUEUE_SIZE>;

/// Radio abstraction for the async driver.
///
/// Outgoing packets leave through the engine's `send` hook, so a transport
/// only needs to surface what it hears.
///
/// # Interrupt Safety
///
/// The channel uses `CriticalSectionRawMutex`, so a radio RX interrupt can
/// call `incoming().try_send(frame)` directly.
pub trait Transport {
    /// Channel for incoming frames.
    ///
    /// - Radio ISR calls `incoming().try_send(frame)` when a frame is received
    /// - Simulator calls `incoming().try_send(frame)` to deliver frames
    /// - Engine calls `incoming().receive().await` to receive
    fn incoming(&self) -> &TransportInChannel;
}

/// Time source trait for real or simulated time.
///
/// # Example (testing with MockClock)
///
/// ```
/// use blemesh::traits::test_impls::MockClock;
/// use blemesh::{Clock, Duration, Timestamp};
///
/// let clock = MockClock::new();
/// assert_eq!(clock.now(), Timestamp::ZERO);
///
/// clock.advance(Duration::from_millis(250));
/// assert_eq!(clock.now().as_millis(), 250);
/// ```
pub trait Clock {
    /// Future type returned by sleep_until.
    type SleepFuture<'a>: Future<Output = ()>
    where
        Self: 'a;

    /// Get the current timestamp.
    fn now(&self) -> Timestamp;

    /// Sleep until the given timestamp.
    fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_>;
}

/// Random number source.
///
/// Every engine owns its generators; nothing is global. Used for:
/// - Listen/broadcast slot draws
/// - Crowding-gated forwarding draws
pub trait Random {
    /// Next raw 32-bit value.
    fn next_u32(&mut self) -> u32;

    /// Uniform draw in `[0, 1]`, computed as `next_u32 / u32::MAX`.
    fn next_unit(&mut self) -> f64 {
        self.next_u32() as f64 / u32::MAX as f64
    }

    /// Restart the sequence from `seed`.
    fn reseed(&mut self, seed: u32);
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_impls {
    //! Mock implementations of traits for unit testing and doc tests.
    //!
    //! Available when running tests or with the `test-support` feature enabled.

    use alloc::boxed::Box;
    use alloc::rc::Rc;
    use core::cell::{Cell, RefCell};
    use core::future::{ready, Ready};

    use super::*;
    use crate::packet::Packet;

    /// Mock transport: frames are injected by the test.
    pub struct MockTransport {
        incoming: TransportInChannel,
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self {
                incoming: Channel::new(),
            }
        }
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Inject a frame as if it was received (for testing).
        pub fn inject_rx(&self, data: Vec<u8>, rssi: i8) {
            let _ = self.incoming.try_send(Received::new(data, rssi));
        }
    }

    impl Transport for MockTransport {
        fn incoming(&self) -> &TransportInChannel {
            &self.incoming
        }
    }

    /// Mock clock for testing (synchronous, time advances manually).
    pub struct MockClock {
        current: Cell<Timestamp>,
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self {
                current: Cell::new(Timestamp::ZERO),
            }
        }
    }

    impl MockClock {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn at(time: Timestamp) -> Self {
            Self {
                current: Cell::new(time),
            }
        }

        /// Jump to the given timestamp.
        pub fn set(&self, time: Timestamp) {
            self.current.set(time);
        }

        /// Advance time by the given duration.
        pub fn advance(&self, duration: crate::time::Duration) {
            self.current.set(self.current.get() + duration);
        }
    }

    impl Clock for MockClock {
        type SleepFuture<'a> = Ready<()>;

        fn now(&self) -> Timestamp {
            self.current.get()
        }

        fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_> {
            // Sleeping jumps straight to the deadline.
            if time > self.current.get() {
                self.current.set(time);
            }
            ready(())
        }
    }

    /// Mock random for testing (deterministic LCG).
    pub struct MockRandom {
        pub state: u64,
    }

    impl Default for MockRandom {
        fn default() -> Self {
            Self { state: 12345 }
        }
    }

    impl MockRandom {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_seed(seed: u64) -> Self {
            Self { state: seed }
        }
    }

    impl Random for MockRandom {
        fn next_u32(&mut self) -> u32 {
            self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
            (self.state >> 32) as u32
        }

        fn reseed(&mut self, seed: u32) {
            self.state = seed as u64;
        }
    }

    /// Replays scripted unit draws, repeating the last one when exhausted.
    pub struct SequenceRandom {
        draws: Vec<f64>,
        next: usize,
    }

    impl SequenceRandom {
        pub fn new(draws: Vec<f64>) -> Self {
            Self { draws, next: 0 }
        }

        /// Always draws `value`.
        pub fn constant(value: f64) -> Self {
            Self::new(alloc::vec![value])
        }
    }

    impl Random for SequenceRandom {
        fn next_u32(&mut self) -> u32 {
            (self.next_unit() * u32::MAX as f64) as u32
        }

        fn next_unit(&mut self) -> f64 {
            let idx = self.next.min(self.draws.len().saturating_sub(1));
            self.next += 1;
            self.draws.get(idx).copied().unwrap_or(0.0)
        }

        fn reseed(&mut self, _seed: u32) {
            self.next = 0;
        }
    }

    /// Shared outbox for an engine's `send` hook.
    #[derive(Clone, Default)]
    pub struct RecordingSink {
        sent: Rc<RefCell<Vec<Packet>>>,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        /// A send hook that appends every packet to this sink.
        pub fn hook(&self) -> Box<dyn FnMut(&Packet)> {
            let sent = Rc::clone(&self.sent);
            Box::new(move |p: &Packet| sent.borrow_mut().push(p.clone()))
        }

        /// Drain everything sent so far.
        pub fn take(&self) -> Vec<Packet> {
            core::mem::take(&mut *self.sent.borrow_mut())
        }

        pub fn len(&self) -> usize {
            self.sent.borrow().len()
        }

        pub fn is_empty(&self) -> bool {
            self.sent.borrow().is_empty()
        }
    }
}
