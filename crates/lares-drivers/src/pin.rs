use core::convert::Infallible;
use core::time::Duration;

use embedded_hal::digital::{ErrorType, InputPin, OutputPin, PinState};

use lares::clock::Instant;

/// The electrical level at which a pin is active.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum ActiveLevel {
    /// Active when high.
    #[default]
    High,
    /// Active when low, as with most relay boards.
    Low,
}

impl ActiveLevel {
    /// Returns the pin state for a logical state.
    #[must_use]
    #[inline]
    pub const fn pin_state(self, active: bool) -> PinState {
        match (self, active) {
            (Self::High, true) | (Self::Low, false) => PinState::High,
            _ => PinState::Low,
        }
    }

    /// Returns the logical state for a sampled level.
    #[must_use]
    #[inline]
    pub const fn is_active(self, high: bool) -> bool {
        match self {
            Self::High => high,
            Self::Low => !high,
        }
    }

    /// Drives an output to a logical state.
    ///
    /// # Errors
    ///
    /// Forwards the pin error.
    #[inline]
    pub fn drive<P: OutputPin>(self, pin: &mut P, active: bool) -> Result<(), P::Error> {
        pin.set_state(self.pin_state(active))
    }

    /// Samples the logical state of an input.
    ///
    /// # Errors
    ///
    /// Forwards the pin error.
    #[inline]
    pub fn sample<P: InputPin>(self, pin: &mut P) -> Result<bool, P::Error> {
        pin.is_high().map(|high| self.is_active(high))
    }
}

/// An input that is not wired, always reading low.
#[derive(Debug, Copy, Clone, Default)]
pub struct Unconnected;

impl ErrorType for Unconnected {
    type Error = Infallible;
}

impl InputPin for Unconnected {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(false)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// A time based debouncer.
///
/// A new level is accepted once it has been sampled without interruption
/// for the hold time.
#[derive(Debug, Copy, Clone)]
pub struct Debouncer {
    stable: bool,
    candidate: bool,
    since: Instant,
    hold: Duration,
}

impl Debouncer {
    /// Creates a [`Debouncer`] starting from `initial`.
    #[must_use]
    #[inline]
    pub const fn new(initial: bool, hold: Duration) -> Self {
        Self {
            stable: initial,
            candidate: initial,
            since: Instant::ZERO,
            hold,
        }
    }

    /// Returns the accepted level.
    #[must_use]
    #[inline]
    pub const fn stable(&self) -> bool {
        self.stable
    }

    /// Sets the hold time.
    #[inline]
    pub fn set_hold(&mut self, hold: Duration) {
        self.hold = hold;
    }

    /// Forces the accepted level, discarding any candidate.
    #[inline]
    pub fn reset(&mut self, level: bool) {
        self.stable = level;
        self.candidate = level;
    }

    /// Feeds a sample taken at `now`.
    ///
    /// Returns the new level when it has just been accepted.
    pub fn update(&mut self, now: Instant, level: bool) -> Option<bool> {
        if level == self.stable {
            self.candidate = level;
            return None;
        }

        if level != self.candidate {
            self.candidate = level;
            self.since = now;
        }

        if now.duration_since(self.since) >= self.hold {
            self.stable = level;
            return Some(level);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use embedded_hal::digital::{InputPin, PinState};
    use embedded_hal_mock::eh1::digital::{Mock as PinMock, State, Transaction as PinTransaction};

    use lares::clock::Instant;

    use super::{ActiveLevel, Debouncer, Unconnected};

    #[test]
    fn test_active_levels() {
        assert_eq!(ActiveLevel::High.pin_state(true), PinState::High);
        assert_eq!(ActiveLevel::Low.pin_state(true), PinState::Low);
        assert_eq!(ActiveLevel::Low.pin_state(false), PinState::High);
        assert!(ActiveLevel::Low.is_active(false));
        assert!(!ActiveLevel::High.is_active(false));
    }

    #[test]
    fn test_drive_and_sample() {
        let expectations = [
            PinTransaction::set(State::Low),
            PinTransaction::set(State::High),
            PinTransaction::get(State::Low),
        ];
        let mut pin = PinMock::new(&expectations);

        ActiveLevel::Low.drive(&mut pin, true).unwrap();
        ActiveLevel::Low.drive(&mut pin, false).unwrap();
        assert!(ActiveLevel::Low.sample(&mut pin).unwrap());

        pin.done();
    }

    #[test]
    fn test_unconnected() {
        assert!(!Unconnected.is_high().unwrap());
        assert!(Unconnected.is_low().unwrap());
    }

    #[test]
    fn test_debouncer_filters_glitches() {
        let mut debouncer = Debouncer::new(false, Duration::from_millis(30));
        let at = Instant::from_millis;

        assert_eq!(debouncer.update(at(0), true), None);
        assert_eq!(debouncer.update(at(10), false), None);
        assert_eq!(debouncer.update(at(20), true), None);
        assert_eq!(debouncer.update(at(40), true), None);
        assert_eq!(debouncer.update(at(50), true), Some(true));
        assert_eq!(debouncer.update(at(60), true), None);
        assert!(debouncer.stable());
    }

    #[test]
    fn test_debouncer_without_hold() {
        let mut debouncer = Debouncer::new(true, Duration::ZERO);
        assert_eq!(debouncer.update(Instant::from_millis(5), false), Some(false));
        assert_eq!(debouncer.update(Instant::from_millis(6), false), None);
    }
}
