//! Time types for the blemesh engine.
//!
//! The engine never reads a clock on its own. Every entry point takes the
//! current time explicitly, which keeps simulation runs deterministic.

use core::ops::{Add, AddAssign, Mul, Sub};

/// Engine timestamp in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Zero timestamp (engine start).
    pub const ZERO: Timestamp = Timestamp(0);

    /// Maximum timestamp.
    pub const MAX: Timestamp = Timestamp(u64::MAX);

    /// Create a timestamp from milliseconds.
    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Timestamp(ms)
    }

    /// Create a timestamp from seconds.
    #[inline]
    pub const fn from_secs(secs: u64) -> Self {
        Timestamp(secs.saturating_mul(1000))
    }

    /// Get the timestamp as milliseconds.
    #[inline]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Saturating addition of a duration.
    #[inline]
    pub const fn saturating_add(self, duration: Duration) -> Self {
        Timestamp(self.0.saturating_add(duration.0))
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future.
    #[inline]
    pub const fn saturating_sub(self, earlier: Timestamp) -> Duration {
        Duration(self.0.saturating_sub(earlier.0))
    }

    /// Checked subtraction of another timestamp.
    #[inline]
    pub const fn checked_sub(self, other: Timestamp) -> Option<Duration> {
        match self.0.checked_sub(other.0) {
            Some(d) => Some(Duration(d)),
            None => None,
        }
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    #[inline]
    fn add(self, rhs: Duration) -> Timestamp {
        self.saturating_add(rhs)
    }
}

impl AddAssign<Duration> for Timestamp {
    #[inline]
    fn add_assign(&mut self, rhs: Duration) {
        *self = self.saturating_add(rhs);
    }
}

impl Sub for Timestamp {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: Timestamp) -> Duration {
        self.saturating_sub(rhs)
    }
}

/// Duration in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(u64);

impl Duration {
    /// Zero duration.
    pub const ZERO: Duration = Duration(0);

    /// Create a duration from milliseconds.
    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Duration(ms)
    }

    /// Create a duration from seconds.
    #[inline]
    pub const fn from_secs(secs: u64) -> Self {
        Duration(secs.saturating_mul(1000))
    }

    /// Get the duration as milliseconds.
    #[inline]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Saturating addition.
    #[inline]
    pub const fn saturating_add(self, other: Duration) -> Self {
        Duration(self.0.saturating_add(other.0))
    }

    /// Saturating multiplication, e.g. slot duration times slot count.
    #[inline]
    pub const fn saturating_mul(self, n: u64) -> Self {
        Duration(self.0.saturating_mul(n))
    }
}

impl Add for Duration {
    type Output = Duration;

    #[inline]
    fn add(self, rhs: Duration) -> Duration {
        self.saturating_add(rhs)
    }
}

impl Mul<u64> for Duration {
    type Output = Duration;

    #[inline]
    fn mul(self, rhs: u64) -> Duration {
        self.saturating_mul(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_creation() {
        assert_eq!(Timestamp::from_millis(1500).as_millis(), 1500);
        assert_eq!(Timestamp::from_secs(2).as_millis(), 2000);
        assert_eq!(Timestamp::default(), Timestamp::ZERO);
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let t = Timestamp::from_millis(1000);
        let later = t + Duration::from_millis(400);
        assert_eq!(later.as_millis(), 1400);
        assert_eq!((later - t).as_millis(), 400);

        let mut moving = t;
        moving += Duration::from_secs(1);
        assert_eq!(moving.as_millis(), 2000);
    }

    #[test]
    fn test_saturating_operations() {
        let early = Timestamp::from_millis(10);
        let late = Timestamp::from_millis(50);
        // Elapsed time never goes negative.
        assert_eq!(early.saturating_sub(late), Duration::ZERO);
        assert_eq!(early - late, Duration::ZERO);
        assert_eq!(early.checked_sub(late), None);
        assert_eq!(late.checked_sub(early), Some(Duration::from_millis(40)));

        assert_eq!(Timestamp::MAX + Duration::from_millis(1), Timestamp::MAX);
    }

    #[test]
    fn test_slot_multiplication() {
        let slot = Duration::from_millis(100);
        assert_eq!((slot * 4).as_millis(), 400);
        assert_eq!(slot.saturating_mul(3).as_millis(), 300);
        assert_eq!(
            Duration::from_millis(u64::MAX).saturating_mul(2).as_millis(),
            u64::MAX
        );
    }

    #[test]
    fn test_ordering() {
        assert!(Timestamp::from_millis(1) < Timestamp::from_millis(2));
        assert!(Duration::from_millis(5) > Duration::ZERO);
    }
}
