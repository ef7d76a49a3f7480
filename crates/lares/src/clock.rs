use core::cell::Cell;
use core::fmt;
use core::ops::Add;
use core::sync::atomic::{AtomicU32, Ordering};
use core::time::Duration;

/// A point in time, in milliseconds since boot.
///
/// The millisecond counter is 64 bits wide, so it never wraps during the
/// lifetime of a device.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant(u64);

impl Instant {
    /// The boot instant.
    pub const ZERO: Self = Self(0);

    /// Creates an [`Instant`] from milliseconds since boot.
    #[must_use]
    #[inline]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the milliseconds since boot.
    #[must_use]
    #[inline]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Returns the time elapsed from `earlier` to `self`.
    ///
    /// Saturates to zero when `earlier` is later than `self`.
    #[must_use]
    #[inline]
    pub const fn duration_since(self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }

    /// Whether at least `period` elapsed since `earlier`.
    #[must_use]
    #[inline]
    pub fn has_elapsed(self, earlier: Self, period: Duration) -> bool {
        self.duration_since(earlier) >= period
    }
}

impl Add<Duration> for Instant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        let millis = u64::try_from(rhs.as_millis()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(millis))
    }
}

impl fmt::Display for Instant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// A monotonic time source.
pub trait Clock {
    /// Returns the current time.
    fn now(&self) -> Instant;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// A clock advanced by hand.
///
/// Useful for tests and simulations, where time must move
/// deterministically.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    /// Creates a [`ManualClock`] at the boot instant.
    #[must_use]
    #[inline]
    pub const fn new() -> Self {
        Self { now: Cell::new(0) }
    }

    /// Moves the clock forward.
    #[inline]
    pub fn advance(&self, by: Duration) {
        self.now.set((Instant(self.now.get()) + by).0);
    }

    /// Sets the clock to an absolute instant.
    #[inline]
    pub fn set(&self, at: Instant) {
        self.now.set(at.0);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        Instant(self.now.get())
    }
}

/// Timer ticks counted since they were last serviced.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct PendingTicks {
    /// Pending slow timer ticks.
    pub slow: u32,
    /// Pending fast timer ticks.
    pub fast: u32,
}

impl PendingTicks {
    /// Whether no tick is pending.
    #[must_use]
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.slow == 0 && self.fast == 0
    }
}

/// Tick counters shared with timer interrupts.
///
/// Interrupt handlers only increment the counters. The control loop takes
/// them and runs the timer hooks, so element code never runs in interrupt
/// context.
///
/// ```
/// use lares::clock::TimerTicks;
///
/// static TICKS: TimerTicks = TimerTicks::new();
///
/// // Inside the hardware timer interrupts.
/// TICKS.signal_fast();
/// TICKS.signal_fast();
/// TICKS.signal_slow();
///
/// // Inside the control loop.
/// let pending = TICKS.take();
/// assert_eq!(pending.fast, 2);
/// assert_eq!(pending.slow, 1);
/// assert!(TICKS.take().is_empty());
/// ```
#[derive(Debug, Default)]
pub struct TimerTicks {
    slow: AtomicU32,
    fast: AtomicU32,
}

impl TimerTicks {
    /// Creates [`TimerTicks`] with no pending tick.
    #[must_use]
    #[inline]
    pub const fn new() -> Self {
        Self {
            slow: AtomicU32::new(0),
            fast: AtomicU32::new(0),
        }
    }

    /// Marks a slow timer tick as pending.
    #[inline]
    pub fn signal_slow(&self) {
        let _ = self.slow.fetch_add(1, Ordering::Release);
    }

    /// Marks a fast timer tick as pending.
    #[inline]
    pub fn signal_fast(&self) {
        let _ = self.fast.fetch_add(1, Ordering::Release);
    }

    /// Takes every pending tick, resetting the counters.
    #[must_use]
    #[inline]
    pub fn take(&self) -> PendingTicks {
        PendingTicks {
            slow: self.slow.swap(0, Ordering::Acquire),
            fast: self.fast.swap(0, Ordering::Acquire),
        }
    }
}

/// Derives fixed-rate ticks from a [`Clock`].
#[derive(Debug, Clone)]
pub struct Periodic {
    period: Duration,
    next: Option<Instant>,
}

impl Periodic {
    /// Creates a [`Periodic`] ticker.
    ///
    /// The first tick is due one `period` after the first poll.
    #[must_use]
    #[inline]
    pub const fn new(period: Duration) -> Self {
        Self { period, next: None }
    }

    /// Returns the ticker period.
    #[must_use]
    #[inline]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Returns how many ticks became due at `now`.
    pub fn poll(&mut self, now: Instant) -> u32 {
        let Some(next) = self.next else {
            self.next = Some(now + self.period);
            return 0;
        };

        if now < next {
            return 0;
        }

        let period = u64::try_from(self.period.as_millis())
            .unwrap_or(u64::MAX)
            .max(1);
        let late = now.as_millis() - next.as_millis();
        let due = late / period + 1;
        self.next = Some(Instant(next.as_millis() + due * period));
        u32::try_from(due).unwrap_or(u32::MAX)
    }
}
