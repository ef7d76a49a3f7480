//! # Valve
//!
//! An element driving a motorized water or gas valve, exposed as a
//! [`ChannelType::Valve`] channel whose value is the opening percentage.
//!
//! The valve watches a list of flood sensors, read from the channel
//! snapshot. When any of them reports water while the valve is open, the
//! valve closes and raises [`ChannelFlags::FLOODING`]. Opening is refused
//! while a sensor still reports water. The flag stays raised until the next
//! successful open command, and the valve never reopens on its own.
//!
//! An optional feedback input reports whether the valve is actually open.
//! When the feedback disagrees with the last command, and no command was
//! issued recently, the valve was operated by hand:
//! [`ChannelFlags::MANUALLY_CLOSED`] follows the sensed position.

use core::time::Duration;

use embedded_hal::digital::{InputPin, OutputPin};
use log::{info, warn};

use lares::action::{Action, ActionHandler, Rejection};
use lares::channel::{Channel, ChannelFlags, ChannelNumber, ChannelSnapshot, ChannelType};
use lares::clock::{Instant, Periodic};
use lares::config::{ConfigSource, ConfigValue, channel_key};
use lares::element::{ChannelOwner, Context, Element};
use lares::error::HookStatus;
use lares::state::{StateReader, StateWriter};

use crate::pin::{ActiveLevel, Unconnected};

/// Default interval between two feedback readings.
pub const FEEDBACK_INTERVAL: Duration = Duration::from_millis(200);

/// Default interval between two flood checks.
pub const FLOOD_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Default time after a command during which the feedback is ignored.
pub const MANUAL_IGNORE: Duration = Duration::from_secs(30);

/// Delay between a valve change and the state save it requests.
pub const SAVE_DELAY: Duration = Duration::from_secs(5);

/// Maximum number of flood sensors watched by a valve.
pub const MAX_FLOOD_SENSORS: usize = 8;

// Flags restored from the saved state.
const PERSISTED_FLAGS: ChannelFlags = ChannelFlags::FLOODING.union(ChannelFlags::MANUALLY_CLOSED);

/// The valve element.
pub struct Valve<O, F = Unconnected>
where
    O: OutputPin,
    F: InputPin,
{
    output: O,
    level: ActiveLevel,
    feedback: Option<(F, ActiveLevel)>,
    channel: [Channel; 1],
    flood_sensors: heapless::Vec<ChannelNumber, MAX_FLOOD_SENSORS>,
    flood_timer: Periodic,
    feedback_timer: Periodic,
    manual_ignore: Duration,
    last_command: Option<Instant>,
}

impl<O: OutputPin> Valve<O> {
    /// Creates a [`Valve`] opened by driving `output` high.
    #[must_use]
    pub const fn new(output: O) -> Self {
        Self {
            output,
            level: ActiveLevel::High,
            feedback: None,
            channel: [Channel::new(ChannelType::Valve)],
            flood_sensors: heapless::Vec::new(),
            flood_timer: Periodic::new(FLOOD_CHECK_INTERVAL),
            feedback_timer: Periodic::new(FEEDBACK_INTERVAL),
            manual_ignore: MANUAL_IGNORE,
            last_command: None,
        }
    }

    /// Adds a feedback input, active when the valve is open.
    #[must_use]
    pub fn with_feedback<G: InputPin>(self, input: G, level: ActiveLevel) -> Valve<O, G> {
        Valve {
            output: self.output,
            level: self.level,
            feedback: Some((input, level)),
            channel: self.channel,
            flood_sensors: self.flood_sensors,
            flood_timer: self.flood_timer,
            feedback_timer: self.feedback_timer,
            manual_ignore: self.manual_ignore,
            last_command: self.last_command,
        }
    }
}

impl<O, F> Valve<O, F>
where
    O: OutputPin,
    F: InputPin,
{
    /// Sets the level opening the valve.
    #[must_use]
    pub const fn with_output_level(mut self, level: ActiveLevel) -> Self {
        self.level = level;
        self
    }

    /// Adds a flood sensor channel.
    ///
    /// Sensors beyond [`MAX_FLOOD_SENSORS`] are ignored.
    #[must_use]
    pub fn with_flood_sensor(mut self, channel: ChannelNumber) -> Self {
        if self.flood_sensors.push(channel).is_err() {
            warn!("valve: flood sensor {channel} ignored, too many sensors");
        }
        self
    }

    /// Sets the feedback and flood check intervals.
    #[must_use]
    pub const fn with_intervals(mut self, feedback: Duration, flood_check: Duration) -> Self {
        self.feedback_timer = Periodic::new(feedback);
        self.flood_timer = Periodic::new(flood_check);
        self
    }

    /// Sets the time after a command during which the feedback is ignored.
    #[must_use]
    pub const fn with_manual_ignore(mut self, ignore: Duration) -> Self {
        self.manual_ignore = ignore;
        self
    }

    /// Whether the valve is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.channel[0].value().as_percentage().unwrap_or_default() > 0
    }

    /// Whether a flood is detected.
    #[must_use]
    pub fn is_flooded(&self) -> bool {
        self.channel[0].has_flags(ChannelFlags::FLOODING)
    }

    fn set_open(&mut self, open: bool) -> Result<(), Rejection> {
        let channel = &mut self.channel[0];

        if let Err(e) = self.level.drive(&mut self.output, open) {
            warn!("{channel}: output not switched: {e:?}");
            return Err(Rejection::Blocked);
        }

        if channel.set_percentage(if open { 100 } else { 0 }) {
            info!("{channel}: {}", if open { "opened" } else { "closed" });
        }

        Ok(())
    }

    fn command(&mut self, open: bool, ctx: &Context<'_>) -> Result<(), Rejection> {
        if open && self.flood_detected(ctx.channels()) {
            warn!("{}: not opened, flooding detected", self.channel[0]);
            return Err(Rejection::Blocked);
        }

        self.set_open(open)?;
        let channel = &mut self.channel[0];
        let _ = channel.clear_flag(ChannelFlags::MANUALLY_CLOSED);
        if open && channel.clear_flag(ChannelFlags::FLOODING) {
            info!("{channel}: flooding alarm cleared");
        }
        self.last_command = Some(ctx.now());
        Ok(())
    }

    fn flood_detected(&self, snapshot: &ChannelSnapshot) -> bool {
        self.flood_sensors
            .iter()
            .any(|&sensor| snapshot.value(sensor).and_then(|value| value.as_bool()) == Some(true))
    }

    // The alarm is latched: it is raised when a flood closes an open valve
    // and cleared by the next open command only.
    fn check_flood(&mut self, snapshot: &ChannelSnapshot) -> bool {
        if !self.is_open() || !self.flood_detected(snapshot) {
            return false;
        }

        warn!("{}: flooding detected, closing", self.channel[0]);
        // Raised even when the output fails, the next check retries.
        let _ = self.set_open(false);
        let _ = self.channel[0].set_flags(ChannelFlags::FLOODING, true);
        true
    }

    fn check_feedback(&mut self, now: Instant) -> bool {
        if self
            .last_command
            .is_some_and(|at| !now.has_elapsed(at, self.manual_ignore))
        {
            return false;
        }

        let Some((input, level)) = self.feedback.as_mut() else {
            return false;
        };

        let sensed_open = match level.sample(input) {
            Ok(open) => open,
            Err(e) => {
                warn!("{}: feedback not readable: {e:?}", self.channel[0]);
                return false;
            }
        };

        if sensed_open == self.is_open() {
            return false;
        }

        let channel = &mut self.channel[0];
        info!(
            "{channel}: {} by hand",
            if sensed_open { "opened" } else { "closed" }
        );
        let _ = channel.set_flags(ChannelFlags::MANUALLY_CLOSED, !sensed_open);
        let _ = channel.set_percentage(if sensed_open { 100 } else { 0 });
        // Follow the hand operated position.
        let _ = self.level.drive(&mut self.output, sensed_open);
        true
    }

    fn load_flood_sensors(&mut self, value: &ConfigValue) -> bool {
        let mut sensors = heapless::Vec::new();

        let valid = match value {
            ConfigValue::Text(list) => list
                .split(',')
                .filter(|item| !item.trim().is_empty())
                .all(|item| {
                    item.trim()
                        .parse::<ChannelNumber>()
                        .is_ok_and(|sensor| sensors.push(sensor).is_ok())
                }),
            ConfigValue::Blob(list) => list.iter().all(|&sensor| sensors.push(sensor).is_ok()),
            ConfigValue::Int(sensor) => ChannelNumber::try_from(*sensor)
                .is_ok_and(|sensor| sensors.push(sensor).is_ok()),
            _ => false,
        };

        if valid {
            self.flood_sensors = sensors;
        }
        valid
    }
}

impl<O, F> ChannelOwner for Valve<O, F>
where
    O: OutputPin,
    F: InputPin,
{
    fn channels(&self) -> &[Channel] {
        &self.channel
    }

    fn channels_mut(&mut self) -> &mut [Channel] {
        &mut self.channel
    }
}

impl<O, F> ActionHandler for Valve<O, F>
where
    O: OutputPin,
    F: InputPin,
{
    fn handle_action(
        &mut self,
        _index: usize,
        action: Action,
        ctx: &mut Context<'_>,
    ) -> Result<(), Rejection> {
        match action {
            Action::Open => self.command(true, ctx)?,
            Action::Close => self.command(false, ctx)?,
            Action::Toggle => self.command(!self.is_open(), ctx)?,
            _ => return Err(Rejection::Unsupported),
        }

        ctx.request_save(SAVE_DELAY);
        Ok(())
    }
}

impl<O, F> Element for Valve<O, F>
where
    O: OutputPin + 'static,
    F: InputPin + 'static,
{
    fn name(&self) -> &'static str {
        "valve"
    }

    fn on_init(&mut self, ctx: &mut Context<'_>) -> HookStatus {
        self.last_command = Some(ctx.now());

        match self.set_open(false) {
            Ok(()) => HookStatus::Ok,
            Err(_) => HookStatus::Degraded,
        }
    }

    fn on_load_config(&mut self, config: &dyn ConfigSource) -> HookStatus {
        let Some(number) = self.channel[0].number() else {
            return HookStatus::Ok;
        };

        match config.get(&channel_key(number, "flood")) {
            Some(value) if !self.load_flood_sensors(value) => {
                warn!("{}: invalid flood sensor list", self.channel[0]);
                HookStatus::Degraded
            }
            _ => HookStatus::Ok,
        }
    }

    fn on_load_state(&mut self, state: &mut StateReader<'_>) -> HookStatus {
        let (Some(open), Some(bits)) = (state.bool(), state.u32()) else {
            return HookStatus::Ok;
        };

        let flags = ChannelFlags::from_bits_truncate(bits) & PERSISTED_FLAGS;
        let _ = self.channel[0].set_flags(flags, true);

        if open && !flags.contains(ChannelFlags::FLOODING) && self.set_open(true).is_err() {
            return HookStatus::Degraded;
        }

        HookStatus::Ok
    }

    fn iterate_always(&mut self, ctx: &mut Context<'_>) {
        let now = ctx.now();
        let mut changed = false;

        if self.flood_timer.poll(now) > 0 {
            changed |= self.check_flood(ctx.channels());
        }

        if self.feedback.is_some() && self.feedback_timer.poll(now) > 0 {
            changed |= self.check_feedback(now);
        }

        if changed {
            ctx.request_save(SAVE_DELAY);
        }
    }

    fn on_save_state(&self, state: &mut StateWriter<'_>) {
        state.put_bool(self.is_open());
        state.put_u32((self.channel[0].flags() & PERSISTED_FLAGS).bits());
    }

    lares::capabilities!(channel_owner, action_handler);
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use embedded_hal_mock::eh1::digital::{Mock as PinMock, State, Transaction as PinTransaction};

    use lares::action::{Action, ActionCommand, Rejection};
    use lares::channel::{ChannelFlags, ChannelValue};
    use lares::error::HookStatus;

    use crate::pin::ActiveLevel;
    use crate::tests::{TestPin, power_cycle, register, run_for, runtime, runtime_on};

    use super::Valve;

    const TICK: Duration = Duration::from_millis(50);

    #[test]
    fn test_open_and_close() {
        let expectations = [
            PinTransaction::set(State::Low),
            PinTransaction::set(State::High),
            PinTransaction::set(State::Low),
            PinTransaction::set(State::High),
        ];
        let mut pin = PinMock::new(&expectations);

        let mut runtime = runtime();
        let _ = register(&mut runtime, Valve::new(pin.clone()));
        runtime.boot().unwrap();

        runtime
            .handle_action(ActionCommand::new(0, Action::Open))
            .unwrap();
        assert_eq!(
            runtime.channel(0).unwrap().value(),
            ChannelValue::Percentage(100)
        );
        runtime
            .handle_action(ActionCommand::new(0, Action::Close))
            .unwrap();
        runtime
            .handle_action(ActionCommand::new(0, Action::Toggle))
            .unwrap();
        assert_eq!(
            runtime.handle_action(ActionCommand::new(0, Action::Stop)),
            Err(Rejection::Unsupported)
        );

        pin.done();
    }

    #[test]
    fn test_manual_operation_follows_feedback() {
        let output = TestPin::default();
        let feedback = TestPin::default();

        let mut runtime = runtime();
        let _ = register(
            &mut runtime,
            Valve::new(output.clone())
                .with_feedback(feedback.clone(), ActiveLevel::High)
                .with_manual_ignore(Duration::from_secs(2)),
        );
        runtime.boot().unwrap();

        runtime
            .handle_action(ActionCommand::new(0, Action::Open))
            .unwrap();

        // The motor has not reached the position yet, the feedback is
        // ignored.
        run_for(&mut runtime, Duration::from_secs(1), TICK);
        assert!(output.is_set());
        feedback.set(true);

        // Closed by hand.
        run_for(&mut runtime, Duration::from_secs(3), TICK);
        feedback.set(false);
        run_for(&mut runtime, Duration::from_millis(500), TICK);

        let channel = runtime.channel(0).unwrap();
        assert!(channel.has_flags(ChannelFlags::MANUALLY_CLOSED));
        assert_eq!(channel.value(), ChannelValue::Percentage(0));
        assert!(!output.is_set());

        // Opened by hand again.
        feedback.set(true);
        run_for(&mut runtime, Duration::from_millis(500), TICK);
        let channel = runtime.channel(0).unwrap();
        assert!(!channel.has_flags(ChannelFlags::MANUALLY_CLOSED));
        assert_eq!(channel.value(), ChannelValue::Percentage(100));
    }

    #[cfg(feature = "binary_sensor")]
    #[test]
    fn test_flood_sensors_from_config() {
        let sensor = TestPin::default();
        let output = TestPin::default();

        let mut runtime = runtime();
        let _ = register(&mut runtime, crate::binary_sensor::BinarySensor::new(sensor.clone()));
        let valve = register(&mut runtime, Valve::new(output.clone()));
        runtime.boot().unwrap();

        assert!(runtime.update_config("1_flood", "0").unwrap());
        runtime
            .handle_action(ActionCommand::new(1, Action::Open))
            .unwrap();

        sensor.set(true);
        run_for(&mut runtime, Duration::from_secs(2), TICK);
        assert!(!output.is_set());
        assert!(runtime.channel(1).unwrap().has_flags(ChannelFlags::FLOODING));

        assert!(runtime.update_config("1_flood", "0,x").unwrap());
        assert_eq!(runtime.status(valve), Some(HookStatus::Degraded));
    }

    #[cfg(feature = "binary_sensor")]
    #[test]
    fn test_flood_alarm_is_latched_until_opened() {
        let sensor = TestPin::default();
        let output = TestPin::default();

        let mut runtime = runtime();
        let _ = register(&mut runtime, crate::binary_sensor::BinarySensor::new(sensor.clone()));
        let _ = register(&mut runtime, Valve::new(output.clone()).with_flood_sensor(0));
        runtime.boot().unwrap();

        // A closed valve does not raise the alarm.
        sensor.set(true);
        run_for(&mut runtime, Duration::from_secs(2), TICK);
        assert!(!runtime.channel(1).unwrap().has_flags(ChannelFlags::FLOODING));
        assert_eq!(
            runtime.handle_action(ActionCommand::new(1, Action::Open)),
            Err(Rejection::Blocked)
        );
        assert!(!output.is_set());

        sensor.set(false);
        run_for(&mut runtime, Duration::from_secs(2), TICK);
        runtime
            .handle_action(ActionCommand::new(1, Action::Open))
            .unwrap();

        sensor.set(true);
        run_for(&mut runtime, Duration::from_secs(2), TICK);
        assert!(!output.is_set());
        assert!(runtime.channel(1).unwrap().has_flags(ChannelFlags::FLOODING));

        // Dry again, the alarm stays until the next open command.
        sensor.set(false);
        run_for(&mut runtime, Duration::from_secs(2), TICK);
        assert!(runtime.channel(1).unwrap().has_flags(ChannelFlags::FLOODING));
        runtime
            .handle_action(ActionCommand::new(1, Action::Close))
            .unwrap();
        assert!(runtime.channel(1).unwrap().has_flags(ChannelFlags::FLOODING));
        runtime
            .handle_action(ActionCommand::new(1, Action::Open))
            .unwrap();
        assert!(output.is_set());
        assert!(!runtime.channel(1).unwrap().has_flags(ChannelFlags::FLOODING));
    }

    #[test]
    fn test_open_state_survives_restart() {
        let mut runtime = runtime();
        let _ = register(&mut runtime, Valve::new(TestPin::default()));
        runtime.boot().unwrap();
        runtime
            .handle_action(ActionCommand::new(0, Action::Open))
            .unwrap();
        let _ = runtime.save_state().unwrap();
        let storage = power_cycle(&mut runtime);

        let output = TestPin::default();
        let mut runtime = runtime_on(storage);
        let _ = register(&mut runtime, Valve::new(output.clone()));
        runtime.boot().unwrap();
        assert!(output.is_set());
        assert_eq!(
            runtime.channel(0).unwrap().value(),
            ChannelValue::Percentage(100)
        );
    }
}
