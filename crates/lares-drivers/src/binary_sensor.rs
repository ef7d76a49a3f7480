//! # Binary sensor
//!
//! An element reading a two-state input, such as a flood, door or window
//! sensor, exposed as a [`ChannelType::BinarySensor`] channel.
//!
//! The input is sampled on the fast timer and debounced. A failing input
//! raises [`ChannelFlags::SENSOR_FAILURE`] until it can be read again.
//!
//! A sensor can drive other elements of the same device without the
//! gateway: each [`Edge`] binding emits its [`ActionCommand`] whenever the
//! debounced state changes that way.
//!
//! ```ignore
//! let button = BinarySensor::new(pin)
//!     .with_binding(Edge::Rising, ActionCommand::new(1, Action::Toggle));
//! ```

use core::time::Duration;

use embedded_hal::digital::InputPin;
use heapless::Vec;
use log::{debug, warn};

use lares::action::ActionCommand;
use lares::channel::{Channel, ChannelFlags, ChannelType};
use lares::config::{ConfigSource, channel_key};
use lares::element::{ChannelOwner, Context, Element, TimerInterest, TimerSubscriber};
use lares::error::HookStatus;

use crate::pin::{ActiveLevel, Debouncer};

/// Default time a new level must hold before it is accepted.
pub const DEBOUNCE: Duration = Duration::from_millis(50);

/// Maximum number of edge bindings of a sensor.
pub const MAX_BINDINGS: usize = 4;

/// A debounced state change.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Edge {
    /// The sensor became active.
    Rising,
    /// The sensor became inactive.
    Falling,
    /// Any change.
    Both,
}

impl Edge {
    const fn matches(self, active: bool) -> bool {
        match self {
            Self::Rising => active,
            Self::Falling => !active,
            Self::Both => true,
        }
    }
}

/// The binary sensor element.
pub struct BinarySensor<I: InputPin> {
    input: I,
    level: ActiveLevel,
    channel: [Channel; 1],
    debouncer: Debouncer,
    bindings: Vec<(Edge, ActionCommand), MAX_BINDINGS>,
}

impl<I: InputPin> BinarySensor<I> {
    /// Creates a [`BinarySensor`] active when `input` is high.
    #[must_use]
    pub const fn new(input: I) -> Self {
        Self {
            input,
            level: ActiveLevel::High,
            channel: [Channel::new(ChannelType::BinarySensor)],
            debouncer: Debouncer::new(false, DEBOUNCE),
            bindings: Vec::new(),
        }
    }

    /// Sets the active level of the input.
    #[must_use]
    pub const fn with_level(mut self, level: ActiveLevel) -> Self {
        self.level = level;
        self
    }

    /// Sets the debounce time.
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debouncer.set_hold(debounce);
        self
    }

    /// Emits `command` on every `edge` of the debounced state.
    ///
    /// Bindings beyond [`MAX_BINDINGS`] are dropped.
    #[must_use]
    pub fn with_binding(mut self, edge: Edge, command: ActionCommand) -> Self {
        if self.bindings.push((edge, command)).is_err() {
            warn!("binary sensor: binding to {} dropped", command.channel);
        }
        self
    }

    /// Whether the sensor is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.debouncer.stable()
    }

    fn sample(&mut self) -> Option<bool> {
        let channel = &mut self.channel[0];
        match self.level.sample(&mut self.input) {
            Ok(active) => {
                if channel.clear_flag(ChannelFlags::SENSOR_FAILURE) {
                    debug!("{channel}: input readable again");
                }
                Some(active)
            }
            Err(e) => {
                if channel.set_flag(ChannelFlags::SENSOR_FAILURE) {
                    warn!("{channel}: input not readable: {e:?}");
                }
                None
            }
        }
    }
}

impl<I: InputPin> ChannelOwner for BinarySensor<I> {
    fn channels(&self) -> &[Channel] {
        &self.channel
    }

    fn channels_mut(&mut self) -> &mut [Channel] {
        &mut self.channel
    }
}

impl<I: InputPin> TimerSubscriber for BinarySensor<I> {
    fn interest(&self) -> TimerInterest {
        TimerInterest::FAST
    }

    fn on_fast_timer(&mut self, ctx: &mut Context<'_>) {
        let Some(active) = self.sample() else {
            return;
        };

        if let Some(active) = self.debouncer.update(ctx.now(), active) {
            let channel = &mut self.channel[0];
            let _ = channel.set_bool(active);
            debug!("{channel}: {}", if active { "active" } else { "inactive" });

            let bound = self.bindings.iter().filter(|(edge, _)| edge.matches(active));
            for (_, command) in bound {
                let _ = ctx.emit(*command);
            }
        }
    }
}

impl<I: InputPin + 'static> Element for BinarySensor<I> {
    fn name(&self) -> &'static str {
        "binary-sensor"
    }

    fn on_init(&mut self, _ctx: &mut Context<'_>) -> HookStatus {
        match self.sample() {
            Some(active) => {
                self.debouncer.reset(active);
                let _ = self.channel[0].set_bool(active);
                HookStatus::Ok
            }
            None => HookStatus::Degraded,
        }
    }

    fn on_load_config(&mut self, config: &dyn ConfigSource) -> HookStatus {
        let Some(number) = self.channel[0].number() else {
            return HookStatus::Ok;
        };

        if let Some(debounce) = config.get_millis(&channel_key(number, "debounce")) {
            self.debouncer.set_hold(debounce);
        }

        if let Some(inverted) = config.get_bool(&channel_key(number, "invert")) {
            self.level = if inverted {
                ActiveLevel::Low
            } else {
                ActiveLevel::High
            };
        }

        HookStatus::Ok
    }

    lares::capabilities!(channel_owner, timer_subscriber);
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use lares::action::{Action, ActionCommand};
    use lares::channel::{ChannelFlags, ChannelValue};
    use lares::error::HookStatus;

    use crate::pin::ActiveLevel;
    use crate::tests::{TestPin, register, run_for, runtime};

    use super::{BinarySensor, Edge, MAX_BINDINGS};

    const TICK: Duration = Duration::from_millis(10);

    #[test]
    fn test_initial_state_without_debounce() {
        let input = TestPin::default();
        input.set(true);

        let mut runtime = runtime();
        let _ = register(&mut runtime, BinarySensor::new(input));
        runtime.boot().unwrap();

        assert_eq!(runtime.channel(0).unwrap().value(), ChannelValue::Bool(true));
    }

    #[test]
    fn test_glitches_are_filtered() {
        let input = TestPin::default();
        let mut runtime = runtime();
        let _ = register(&mut runtime, BinarySensor::new(input.clone()));
        runtime.boot().unwrap();
        runtime.tick();

        input.set(true);
        run_for(&mut runtime, TICK * 3, TICK);
        input.set(false);
        run_for(&mut runtime, TICK * 10, TICK);
        assert_eq!(runtime.channel(0).unwrap().value(), ChannelValue::Bool(false));

        input.set(true);
        run_for(&mut runtime, TICK * 10, TICK);
        assert_eq!(runtime.channel(0).unwrap().value(), ChannelValue::Bool(true));
    }

    #[test]
    fn test_inverted_from_config() {
        let input = TestPin::default();
        let mut runtime = runtime();
        let _ = register(
            &mut runtime,
            BinarySensor::new(input.clone()).with_level(ActiveLevel::High),
        );
        runtime.boot().unwrap();
        runtime.tick();

        assert!(runtime.update_config("0_invert", true).unwrap());
        run_for(&mut runtime, TICK * 10, TICK);
        assert_eq!(runtime.channel(0).unwrap().value(), ChannelValue::Bool(true));
    }

    #[test]
    fn test_input_failure() {
        let input = TestPin::default();
        input.break_pin(true);

        let mut runtime = runtime();
        let id = register(&mut runtime, BinarySensor::new(input.clone()));
        runtime.boot().unwrap();
        assert_eq!(runtime.status(id), Some(HookStatus::Degraded));
        assert!(runtime.channel(0).unwrap().has_flags(ChannelFlags::SENSOR_FAILURE));

        input.break_pin(false);
        run_for(&mut runtime, TICK * 3, TICK);
        assert!(!runtime.channel(0).unwrap().has_flags(ChannelFlags::SENSOR_FAILURE));
    }

    #[test]
    fn test_edge_matching() {
        assert!(Edge::Rising.matches(true));
        assert!(!Edge::Rising.matches(false));
        assert!(Edge::Falling.matches(false));
        assert!(!Edge::Falling.matches(true));
        assert!(Edge::Both.matches(true) && Edge::Both.matches(false));
    }

    #[test]
    fn test_bindings_are_bounded() {
        let command = ActionCommand::new(1, Action::Toggle);
        let mut sensor = BinarySensor::new(TestPin::default());
        for _ in 0..MAX_BINDINGS + 2 {
            sensor = sensor.with_binding(Edge::Both, command);
        }
        assert_eq!(sensor.bindings.len(), MAX_BINDINGS);
    }
}
