//! # Status LED
//!
//! An element blinking an LED according to the device status.
//!
//! Without an override, the indication follows the connection state:
//!
//! | State                       | Indication                  | On/off (ms) |
//! |-----------------------------|-----------------------------|-------------|
//! | disconnected                | [`Indication::NetworkConnecting`] | 2000/2000 |
//! | connecting, connected       | [`Indication::ServerConnecting`]  | 500/500   |
//! | registered                  | [`Indication::Ready`]             | steady    |
//!
//! Other parts of the firmware raise [`Indication::ConfigMode`] or
//! [`Indication::Problem`] through a shared [`StatusSignal`].
//!
//! The `led` configuration key selects the [`LedMode`].

use core::sync::atomic::{AtomicU8, Ordering};
use core::time::Duration;

use embedded_hal::digital::OutputPin;
use log::{debug, warn};

use lares::clock::Instant;
use lares::config::ConfigSource;
use lares::element::{Context, Element, TimerInterest, TimerSubscriber};
use lares::error::HookStatus;
use lares::gateway::ConnectionState;

use crate::pin::ActiveLevel;

/// Configuration key of the LED mode.
pub const MODE_KEY: &str = "led";

/// What the LED shows.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Indication {
    /// Looking for the network.
    NetworkConnecting = 1,
    /// Connecting to the gateway server.
    ServerConnecting,
    /// Registered with the gateway.
    Ready,
    /// The device is in configuration mode.
    ConfigMode,
    /// Something needs attention.
    Problem,
}

/// A blink pattern.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// Always on.
    Steady,
    /// On and off for the given times.
    Blink {
        /// Time spent on.
        on: Duration,
        /// Time spent off.
        off: Duration,
    },
}

impl Indication {
    const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::NetworkConnecting),
            2 => Some(Self::ServerConnecting),
            3 => Some(Self::Ready),
            4 => Some(Self::ConfigMode),
            5 => Some(Self::Problem),
            _ => None,
        }
    }

    const fn from_connection(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Disconnected => Self::NetworkConnecting,
            ConnectionState::Connecting | ConnectionState::Connected => Self::ServerConnecting,
            ConnectionState::Registered => Self::Ready,
        }
    }

    /// Returns the blink pattern of the indication.
    #[must_use]
    pub const fn pattern(self) -> Pattern {
        const fn blink(on: u64, off: u64) -> Pattern {
            Pattern::Blink {
                on: Duration::from_millis(on),
                off: Duration::from_millis(off),
            }
        }

        match self {
            Self::NetworkConnecting => blink(2000, 2000),
            Self::ServerConnecting => blink(500, 500),
            Self::Ready => Pattern::Steady,
            Self::ConfigMode => blink(100, 100),
            Self::Problem => blink(300, 100),
        }
    }
}

/// How the LED behaves once the device is registered.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum LedMode {
    /// Steady on while registered.
    #[default]
    OnWhenConnected,
    /// Off while registered.
    OffWhenConnected,
    /// Always off.
    AlwaysOff,
}

impl LedMode {
    const fn from_config(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::OnWhenConnected),
            1 => Some(Self::OffWhenConnected),
            2 => Some(Self::AlwaysOff),
            _ => None,
        }
    }
}

/// An indication override shared with the rest of the firmware.
///
/// It is a plain atomic, so it can be raised from any context, interrupt
/// handlers included.
#[derive(Debug, Default)]
pub struct StatusSignal(AtomicU8);

impl StatusSignal {
    /// Creates a [`StatusSignal`] without override.
    #[must_use]
    #[inline]
    pub const fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    /// Shows `indication` until [`StatusSignal::clear`] is called.
    #[inline]
    pub fn raise(&self, indication: Indication) {
        self.0.store(indication as u8, Ordering::Relaxed);
    }

    /// Goes back to the connection state indication.
    #[inline]
    pub fn clear(&self) {
        self.0.store(0, Ordering::Relaxed);
    }

    /// Returns the current override.
    #[must_use]
    #[inline]
    pub fn get(&self) -> Option<Indication> {
        Indication::from_u8(self.0.load(Ordering::Relaxed))
    }
}

struct Phase {
    indication: Indication,
    lit: bool,
    since: Instant,
}

/// The status LED element.
pub struct StatusLed<P: OutputPin> {
    pin: P,
    level: ActiveLevel,
    mode: LedMode,
    signal: Option<&'static StatusSignal>,
    phase: Option<Phase>,
    driven: Option<bool>,
}

impl<P: OutputPin> StatusLed<P> {
    /// Creates a [`StatusLed`] lit when `pin` is high.
    #[must_use]
    pub const fn new(pin: P) -> Self {
        Self {
            pin,
            level: ActiveLevel::High,
            mode: LedMode::OnWhenConnected,
            signal: None,
            phase: None,
            driven: None,
        }
    }

    /// Sets the active level of the output.
    #[must_use]
    pub const fn with_level(mut self, level: ActiveLevel) -> Self {
        self.level = level;
        self
    }

    /// Sets the LED mode.
    ///
    /// The `led` configuration key takes precedence.
    #[must_use]
    pub const fn with_mode(mut self, mode: LedMode) -> Self {
        self.mode = mode;
        self
    }

    /// Follows the overrides raised on `signal`.
    #[must_use]
    pub const fn with_signal(mut self, signal: &'static StatusSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Returns the current indication, if the LED has been driven yet.
    #[must_use]
    pub fn indication(&self) -> Option<Indication> {
        self.phase.as_ref().map(|phase| phase.indication)
    }

    fn lit_for(&mut self, now: Instant, indication: Indication) -> bool {
        let phase = match &mut self.phase {
            Some(phase) if phase.indication == indication => phase,
            phase => {
                debug!("Status LED: {indication:?}");
                phase.insert(Phase {
                    indication,
                    lit: true,
                    since: now,
                })
            }
        };

        if let Pattern::Blink { on, off } = indication.pattern() {
            let hold = if phase.lit { on } else { off };
            if now.duration_since(phase.since) >= hold {
                phase.lit = !phase.lit;
                phase.since = now;
            }
        } else {
            phase.lit = true;
        }

        phase.lit
    }

    fn drive(&mut self, lit: bool) {
        if self.driven == Some(lit) {
            return;
        }

        match self.level.drive(&mut self.pin, lit) {
            Ok(()) => self.driven = Some(lit),
            Err(e) => {
                // Warn once, then retry silently on every tick.
                if self.driven.take().is_some() {
                    warn!("Status LED not driven: {e:?}");
                }
            }
        }
    }
}

impl<P: OutputPin> TimerSubscriber for StatusLed<P> {
    fn interest(&self) -> TimerInterest {
        TimerInterest::FAST
    }

    fn on_fast_timer(&mut self, ctx: &mut Context<'_>) {
        let indication = self
            .signal
            .and_then(StatusSignal::get)
            .unwrap_or_else(|| Indication::from_connection(ctx.connection()));

        let lit = self.lit_for(ctx.now(), indication);
        let lit = match self.mode {
            LedMode::AlwaysOff => false,
            LedMode::OffWhenConnected if indication == Indication::Ready => false,
            _ => lit,
        };

        self.drive(lit);
    }
}

impl<P: OutputPin + 'static> Element for StatusLed<P> {
    fn name(&self) -> &'static str {
        "status-led"
    }

    fn on_init(&mut self, _ctx: &mut Context<'_>) -> HookStatus {
        match self.level.drive(&mut self.pin, false) {
            Ok(()) => {
                self.driven = Some(false);
                HookStatus::Ok
            }
            Err(e) => {
                warn!("Status LED not driven: {e:?}");
                HookStatus::Degraded
            }
        }
    }

    fn on_load_config(&mut self, config: &dyn ConfigSource) -> HookStatus {
        let Some(value) = config.get_int(MODE_KEY) else {
            return HookStatus::Ok;
        };

        match LedMode::from_config(value) {
            Some(mode) => {
                self.mode = mode;
                HookStatus::Ok
            }
            None => {
                warn!("Status LED: invalid mode {value}");
                HookStatus::Degraded
            }
        }
    }

    lares::capabilities!(timer_subscriber);
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use embedded_hal_mock::eh1::digital::{Mock as PinMock, State, Transaction as PinTransaction};

    use lares::element::Element;
    use lares::gateway::ConnectionState;

    use crate::tests::{TestPin, register, run_for, runtime};

    use super::{Indication, LedMode, StatusLed, StatusSignal};

    const TICK: Duration = Duration::from_millis(10);

    #[test]
    fn test_blinks_while_disconnected() {
        let pin = TestPin::default();
        let mut runtime = runtime();
        let _ = register(&mut runtime, StatusLed::new(pin.clone()));
        runtime.boot().unwrap();
        runtime.tick();

        run_for(&mut runtime, TICK * 10, TICK);
        assert!(pin.is_set());
        run_for(&mut runtime, Duration::from_secs(2), TICK);
        assert!(!pin.is_set());
        run_for(&mut runtime, Duration::from_secs(2), TICK);
        assert!(pin.is_set());
    }

    #[test]
    fn test_follows_connection_state() {
        let pin = TestPin::default();
        let mut runtime = runtime();
        let _ = register(&mut runtime, StatusLed::new(pin.clone()));
        runtime.boot().unwrap();
        runtime.tick();

        // Server connecting: 500 ms on, 500 ms off.
        runtime.set_connection_state(ConnectionState::Connecting);
        run_for(&mut runtime, TICK * 10, TICK);
        assert!(pin.is_set());
        run_for(&mut runtime, TICK * 50, TICK);
        assert!(!pin.is_set());

        runtime.set_connection_state(ConnectionState::Registered);
        run_for(&mut runtime, Duration::from_secs(5), TICK);
        assert!(pin.is_set());
    }

    #[test]
    fn test_modes() {
        let pin = TestPin::default();
        let mut runtime = runtime();
        let _ = register(&mut runtime, StatusLed::new(pin.clone()));
        runtime.boot().unwrap();
        runtime.tick();

        assert!(runtime.update_config("led", 1_i64).unwrap());
        runtime.set_connection_state(ConnectionState::Registered);
        run_for(&mut runtime, TICK * 10, TICK);
        assert!(!pin.is_set());

        // Still blinking while not registered.
        runtime.set_connection_state(ConnectionState::Disconnected);
        run_for(&mut runtime, TICK * 10, TICK);
        assert!(pin.is_set());

        assert!(runtime.update_config("led", 2_i64).unwrap());
        run_for(&mut runtime, TICK * 10, TICK);
        assert!(!pin.is_set());
    }

    #[test]
    fn test_signal_overrides_connection_state() {
        static SIGNAL: StatusSignal = StatusSignal::new();

        let pin = TestPin::default();
        let mut runtime = runtime();
        let _ = register(&mut runtime, StatusLed::new(pin.clone()).with_signal(&SIGNAL));
        runtime.boot().unwrap();
        runtime.set_connection_state(ConnectionState::Registered);
        runtime.tick();

        SIGNAL.raise(Indication::Problem);
        run_for(&mut runtime, TICK * 10, TICK);
        assert!(pin.is_set());
        run_for(&mut runtime, TICK * 30, TICK);
        assert!(!pin.is_set());
        run_for(&mut runtime, TICK * 10, TICK);
        assert!(pin.is_set());

        SIGNAL.clear();
        assert_eq!(SIGNAL.get(), None);
        run_for(&mut runtime, Duration::from_secs(1), TICK);
        assert!(pin.is_set());
    }

    #[test]
    fn test_drives_only_on_change() {
        let expectations = [
            PinTransaction::set(State::Low),
            PinTransaction::set(State::High),
        ];
        let mut pin = PinMock::new(&expectations);

        let mut runtime = runtime();
        let _ = register(
            &mut runtime,
            StatusLed::new(pin.clone()).with_mode(LedMode::OnWhenConnected),
        );
        runtime.boot().unwrap();
        runtime.set_connection_state(ConnectionState::Registered);
        runtime.tick();
        run_for(&mut runtime, Duration::from_secs(1), TICK);

        pin.done();
    }

    #[test]
    fn test_invalid_mode_is_ignored() {
        let mut led = StatusLed::new(TestPin::default());
        let mut config = lares::config::ConfigStore::new();
        assert!(config.set("led", 7_i64).unwrap());

        assert!(led.on_load_config(&config).is_degraded());
        assert_eq!(led.mode, LedMode::OnWhenConnected);
    }
}
