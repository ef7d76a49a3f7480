//! # Thermostat
//!
//! An element switching a heating or cooling output around a set point,
//! exposed as a [`ChannelType::Thermostat`] channel whose value tells
//! whether the thermostat is enabled.
//!
//! The temperature comes from the channel of another element, usually a
//! [thermometer](crate::thermometer), read from the channel snapshot on
//! every slow timer tick. While heating, the output switches on below the
//! set point minus the hysteresis and off above the set point plus the
//! hysteresis. Cooling works the other way around.
//!
//! Without a valid temperature the output is switched off and
//! [`ChannelFlags::THERMOMETER_ERROR`] is raised.
//!
//! Temperatures are in hundredths of a degree Celsius. The `<n>_hyst`,
//! `<n>_min` and `<n>_max` configuration keys set the hysteresis and the
//! allowed set point range.

use core::time::Duration;

use embedded_hal::digital::OutputPin;
use log::{debug, info, warn};

use lares::action::{Action, ActionHandler, Rejection};
use lares::channel::{
    Channel, ChannelFlags, ChannelNumber, ChannelType, TEMPERATURE_NOT_AVAILABLE,
};
use lares::config::{ConfigSource, channel_key};
use lares::element::{ChannelOwner, Context, Element, TimerInterest, TimerSubscriber};
use lares::error::HookStatus;
use lares::state::{StateReader, StateWriter};

use crate::pin::ActiveLevel;

/// Default set point.
pub const SET_POINT: i16 = 2100;

/// Default hysteresis.
pub const HYSTERESIS: i16 = 50;

/// Default lowest set point.
pub const MIN_SET_POINT: i16 = 500;

/// Default highest set point.
pub const MAX_SET_POINT: i16 = 3000;

/// Delay between a setting change and the state save it requests.
pub const SAVE_DELAY: Duration = Duration::from_secs(5);

/// Operating mode.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum Mode {
    /// The output stays off.
    #[default]
    Off,
    /// The output heats.
    Heat,
    /// The output cools.
    Cool,
}

impl Mode {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::Heat => 1,
            Self::Cool => 2,
        }
    }

    const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Off),
            1 => Some(Self::Heat),
            2 => Some(Self::Cool),
            _ => None,
        }
    }
}

/// The thermostat element.
pub struct Thermostat<P: OutputPin> {
    output: P,
    level: ActiveLevel,
    source: ChannelNumber,
    channel: [Channel; 1],
    mode: Mode,
    last_mode: Mode,
    set_point: i16,
    hysteresis: i16,
    range: (i16, i16),
    active: bool,
}

impl<P: OutputPin> Thermostat<P> {
    /// Creates a heating [`Thermostat`] reading the temperature of the
    /// `source` channel.
    ///
    /// It starts off.
    #[must_use]
    pub const fn new(output: P, source: ChannelNumber) -> Self {
        Self {
            output,
            level: ActiveLevel::High,
            source,
            channel: [Channel::new(ChannelType::Thermostat)],
            mode: Mode::Off,
            last_mode: Mode::Heat,
            set_point: SET_POINT,
            hysteresis: HYSTERESIS,
            range: (MIN_SET_POINT, MAX_SET_POINT),
            active: false,
        }
    }

    /// Sets the active level of the output.
    #[must_use]
    pub const fn with_output_level(mut self, level: ActiveLevel) -> Self {
        self.level = level;
        self
    }

    /// Sets the initial mode.
    ///
    /// A saved mode takes precedence.
    #[must_use]
    pub const fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        if !matches!(mode, Mode::Off) {
            self.last_mode = mode;
        }
        self
    }

    /// Sets the initial set point.
    #[must_use]
    pub const fn with_set_point(mut self, set_point: i16) -> Self {
        self.set_point = set_point;
        self
    }

    /// Returns the operating mode.
    #[must_use]
    #[inline]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Returns the set point.
    #[must_use]
    #[inline]
    pub const fn set_point(&self) -> i16 {
        self.set_point
    }

    fn set_mode(&mut self, mode: Mode) {
        if mode != Mode::Off {
            self.last_mode = mode;
        }
        if self.mode != mode {
            info!("{}: mode {:?}", self.channel[0], mode);
            self.mode = mode;
        }
        let _ = self.channel[0].set_bool(mode != Mode::Off);
    }

    fn switch(&mut self, active: bool) -> Result<(), P::Error> {
        self.level.drive(&mut self.output, active)?;
        if self.active != active {
            debug!(
                "{}: output {}",
                self.channel[0],
                if active { "on" } else { "off" }
            );
        }
        self.active = active;

        let channel = &mut self.channel[0];
        let _ = channel.set_flags(ChannelFlags::HEATING, active && self.mode == Mode::Heat);
        let _ = channel.set_flags(ChannelFlags::COOLING, active && self.mode == Mode::Cool);
        Ok(())
    }

    fn regulate(&mut self, temperature: Option<f64>) -> Result<(), P::Error> {
        let Some(temperature) = temperature.filter(|&t| t > TEMPERATURE_NOT_AVAILABLE) else {
            if self.channel[0].set_flag(ChannelFlags::THERMOMETER_ERROR) {
                warn!(
                    "{}: no temperature on channel {}",
                    self.channel[0], self.source
                );
            }
            return self.switch(false);
        };
        let _ = self.channel[0].clear_flag(ChannelFlags::THERMOMETER_ERROR);

        // Hundredths of a degree.
        let temperature = (temperature * 100.0) as i32;
        let low = i32::from(self.set_point) - i32::from(self.hysteresis);
        let high = i32::from(self.set_point) + i32::from(self.hysteresis);

        let active = match self.mode {
            Mode::Off => false,
            Mode::Heat if temperature < low => true,
            Mode::Heat if temperature > high => false,
            Mode::Cool if temperature > high => true,
            Mode::Cool if temperature < low => false,
            Mode::Heat | Mode::Cool => self.active,
        };

        self.switch(active)
    }

    fn clamp(&self, set_point: i16) -> i16 {
        set_point.clamp(self.range.0, self.range.1)
    }
}

impl<P: OutputPin> ChannelOwner for Thermostat<P> {
    fn channels(&self) -> &[Channel] {
        &self.channel
    }

    fn channels_mut(&mut self) -> &mut [Channel] {
        &mut self.channel
    }
}

impl<P: OutputPin> ActionHandler for Thermostat<P> {
    fn handle_action(
        &mut self,
        _index: usize,
        action: Action,
        ctx: &mut Context<'_>,
    ) -> Result<(), Rejection> {
        match action {
            Action::TurnOn => self.set_mode(self.last_mode),
            Action::TurnOff => self.set_mode(Mode::Off),
            Action::Toggle if self.mode == Mode::Off => self.set_mode(self.last_mode),
            Action::Toggle => self.set_mode(Mode::Off),
            Action::SetTemperature(set_point) => {
                self.set_point = self.clamp(set_point);
                debug!("{}: set point {}", self.channel[0], self.set_point);
            }
            _ => return Err(Rejection::Unsupported),
        }

        // Mode changes take effect right away, set points on the next
        // regulation.
        if self.mode == Mode::Off && self.active && self.switch(false).is_err() {
            return Err(Rejection::Blocked);
        }

        ctx.request_save(SAVE_DELAY);
        Ok(())
    }
}

impl<P: OutputPin> TimerSubscriber for Thermostat<P> {
    fn interest(&self) -> TimerInterest {
        TimerInterest::SLOW
    }

    fn on_timer(&mut self, ctx: &mut Context<'_>) {
        let temperature = ctx
            .channels()
            .value(self.source)
            .and_then(|value| value.as_double());

        if let Err(e) = self.regulate(temperature) {
            warn!("{}: output not driven: {e:?}", self.channel[0]);
        }
    }
}

impl<P: OutputPin + 'static> Element for Thermostat<P> {
    fn name(&self) -> &'static str {
        "thermostat"
    }

    fn on_init(&mut self, _ctx: &mut Context<'_>) -> HookStatus {
        let _ = self.channel[0].set_bool(self.mode != Mode::Off);
        match self.switch(false) {
            Ok(()) => HookStatus::Ok,
            Err(e) => {
                warn!("{}: output not driven: {e:?}", self.channel[0]);
                HookStatus::Degraded
            }
        }
    }

    fn on_load_config(&mut self, config: &dyn ConfigSource) -> HookStatus {
        let Some(number) = self.channel[0].number() else {
            return HookStatus::Ok;
        };

        let setting = |key| {
            config
                .get_int(&channel_key(number, key))
                .map(|value| i16::try_from(value).ok())
        };

        let mut status = HookStatus::Ok;

        match setting("hyst") {
            Some(Some(hysteresis)) if hysteresis >= 0 => self.hysteresis = hysteresis,
            Some(_) => {
                warn!("{}: invalid hysteresis", self.channel[0]);
                status = HookStatus::Degraded;
            }
            None => {}
        }

        let min = setting("min");
        let max = setting("max");
        match (
            min.unwrap_or(Some(self.range.0)),
            max.unwrap_or(Some(self.range.1)),
        ) {
            (Some(min), Some(max)) if min <= max => {
                self.range = (min, max);
                self.set_point = self.clamp(self.set_point);
            }
            _ => {
                warn!("{}: invalid set point range", self.channel[0]);
                status = HookStatus::Degraded;
            }
        }

        status
    }

    fn on_load_state(&mut self, state: &mut StateReader<'_>) -> HookStatus {
        let (Some(mode), Some(last_mode), Some(set_point)) = (state.u8(), state.u8(), state.i16())
        else {
            return HookStatus::Ok;
        };

        if let (Some(mode), Some(last_mode)) = (Mode::from_u8(mode), Mode::from_u8(last_mode)) {
            self.last_mode = last_mode;
            self.set_mode(mode);
        }
        self.set_point = self.clamp(set_point);

        HookStatus::Ok
    }

    fn on_save_state(&self, state: &mut StateWriter<'_>) {
        state.put_u8(self.mode.as_u8());
        state.put_u8(self.last_mode.as_u8());
        state.put_i16(self.set_point);
    }

    lares::capabilities!(channel_owner, action_handler, timer_subscriber);
}
