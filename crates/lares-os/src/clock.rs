use lares::clock::{Clock, Instant};

/// A [`Clock`] counting the milliseconds elapsed since its creation.
///
/// It reads the `tokio` clock, which follows the system monotonic clock
/// and can be paused in tests.
#[derive(Debug, Clone, Copy)]
pub struct StdClock {
    start: tokio::time::Instant,
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl StdClock {
    /// Creates a [`StdClock`] starting at zero.
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self {
            start: tokio::time::Instant::now(),
        }
    }
}

impl Clock for StdClock {
    fn now(&self) -> Instant {
        let elapsed = self.start.elapsed().as_millis();
        Instant::from_millis(u64::try_from(elapsed).unwrap_or(u64::MAX))
    }
}
