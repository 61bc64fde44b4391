//! Monotonic time source
//!
//! Drivers that busy-poll hardware need a millisecond clock that never goes
//! backwards. Boards back this with their timer driver (e.g. `embassy_time`),
//! tests back it with a simulated counter.

/// Monotonic millisecond clock
pub trait Clock {
    /// Milliseconds since an arbitrary, fixed origin
    fn now_ms(&self) -> u64;
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

/// A timeout budget anchored at a point in time
///
/// # Example
///
/// ```
/// use hal_abstractions::Deadline;
///
/// let deadline = Deadline::new(1_000, 250);
/// assert!(!deadline.expired(1_249));
/// assert!(deadline.expired(1_250));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    start_ms: u64,
    budget_ms: u64,
}

impl Deadline {
    /// Create a deadline `budget_ms` after `start_ms`
    pub const fn new(start_ms: u64, budget_ms: u32) -> Self {
        Self {
            start_ms,
            budget_ms: budget_ms as u64,
        }
    }

    /// Start a deadline at the clock's current time
    pub fn starting_now<C: Clock + ?Sized>(clock: &C, budget_ms: u32) -> Self {
        Self::new(clock.now_ms(), budget_ms)
    }

    /// Milliseconds elapsed since the deadline was started
    pub fn elapsed(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.start_ms)
    }

    /// True once at least the full budget has elapsed
    pub fn expired(&self, now_ms: u64) -> bool {
        self.elapsed(now_ms) >= self.budget_ms
    }

    /// Milliseconds left before expiry (zero once expired)
    pub fn remaining(&self, now_ms: u64) -> u64 {
        self.budget_ms.saturating_sub(self.elapsed(now_ms))
    }
}
