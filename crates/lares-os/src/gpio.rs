use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use embedded_hal::digital::{ErrorType, InputPin, OutputPin, StatefulOutputPin};

use tracing::debug;

/// An output pin kept in memory.
///
/// Clones share the same level, so a clone kept by the application
/// observes what an element drives.
#[derive(Debug, Clone)]
pub struct VirtualPin {
    name: &'static str,
    level: Arc<AtomicBool>,
}

impl VirtualPin {
    /// Creates a low [`VirtualPin`].
    #[must_use]
    #[inline]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            level: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns the pin name.
    #[must_use]
    #[inline]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the pin is high.
    #[must_use]
    #[inline]
    pub fn is_high(&self) -> bool {
        self.level.load(Ordering::Acquire)
    }

    /// Returns an input reading the level of this pin, as if the two were
    /// wired together.
    #[must_use]
    #[inline]
    pub fn loopback(&self) -> VirtualInput {
        VirtualInput {
            name: self.name,
            level: Arc::clone(&self.level),
        }
    }

    fn drive(&self, high: bool) {
        if self.level.swap(high, Ordering::AcqRel) != high {
            debug!(pin = self.name, high, "Output changed");
        }
    }
}

impl ErrorType for VirtualPin {
    type Error = Infallible;
}

impl OutputPin for VirtualPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.drive(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.drive(true);
        Ok(())
    }
}

impl StatefulOutputPin for VirtualPin {
    fn is_set_high(&mut self) -> Result<bool, Self::Error> {
        Ok(VirtualPin::is_high(self))
    }

    fn is_set_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!VirtualPin::is_high(self))
    }
}

/// An input pin kept in memory.
///
/// The level is set by the application, for instance to simulate a
/// button or a meter.
#[derive(Debug, Clone)]
pub struct VirtualInput {
    name: &'static str,
    level: Arc<AtomicBool>,
}

impl VirtualInput {
    /// Creates a low [`VirtualInput`].
    #[must_use]
    #[inline]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            level: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns the pin name.
    #[must_use]
    #[inline]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Sets the level read by the pin and its clones.
    #[inline]
    pub fn set(&self, high: bool) {
        self.level.store(high, Ordering::Release);
    }

    fn level(&self) -> bool {
        self.level.load(Ordering::Acquire)
    }
}

impl ErrorType for VirtualInput {
    type Error = Infallible;
}

impl InputPin for VirtualInput {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.level())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.level())
    }
}
