//! # Roller shutter
//!
//! An element driving a roller shutter or blind motor through an up and a
//! down output, exposed as a [`ChannelType::RollerShutter`] channel.
//!
//! The channel value is the closing percentage, `0` being fully open. The
//! position is tracked from the travel time, so it is only known once the
//! opening and closing times are configured through the `<n>_open_ms` and
//! `<n>_close_ms` keys and a calibration run reached an end stop. Until
//! then the value is unknown and [`ChannelFlags::CALIBRATION_LOST`] is set.
//! Any run starting from an unknown position calibrates the shutter.
//!
//! Without travel times the motor runs for [`MAX_UNTIMED_RUN`] at most.
//!
//! A run towards the fully open or fully closed position keeps the motor
//! on for an end margin, a share of the travel time, once the estimated
//! position reaches the end, so the shutter always hits its end stop.
//!
//! The motor is advanced on the fast timer. It never gets both outputs at
//! once, and changing direction always goes through a stop lasting the
//! reverse pause.

use core::time::Duration;

use embedded_hal::digital::OutputPin;
use log::{debug, info, warn};

use lares::action::{Action, ActionHandler, Rejection};
use lares::channel::{Channel, ChannelFlags, ChannelType, ChannelValue};
use lares::clock::Instant;
use lares::config::{ConfigSource, channel_key};
use lares::element::{ChannelOwner, Context, Element, TimerInterest, TimerSubscriber};
use lares::error::HookStatus;
use lares::state::{StateReader, StateWriter};

use crate::pin::ActiveLevel;

/// Fully open position.
pub const OPEN: u16 = 0;

/// Fully closed position, in hundredths of a percent.
pub const CLOSED: u16 = 10_000;

/// Default stop time before the motor changes direction.
pub const REVERSE_PAUSE: Duration = Duration::from_millis(500);

/// Default end margin, in percent of the travel time.
pub const END_MARGIN_PERCENT: u32 = 10;

/// Longest run when no travel time is configured.
pub const MAX_UNTIMED_RUN: Duration = Duration::from_secs(60);

/// Delay between a stop and the state save it requests.
pub const SAVE_DELAY: Duration = Duration::from_secs(5);

const UNKNOWN_POSITION: u16 = u16::MAX;

/// Motor direction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    /// Towards the open end stop.
    Up,
    /// Towards the closed end stop.
    Down,
}

impl Direction {
    const fn end(self) -> u16 {
        match self {
            Self::Up => OPEN,
            Self::Down => CLOSED,
        }
    }

    const fn towards(from: u16, to: u16) -> Self {
        if to < from { Self::Up } else { Self::Down }
    }

    const fn as_u8(direction: Option<Self>) -> u8 {
        match direction {
            None => 0,
            Some(Self::Up) => 1,
            Some(Self::Down) => 2,
        }
    }

    const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Up),
            2 => Some(Self::Down),
            _ => None,
        }
    }
}

/// Motor state machine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Motion {
    /// The motor is off.
    Idle,
    /// The motor runs up.
    Opening {
        /// When the run started.
        since: Instant,
        /// Position at the start, unknown for a calibration or untimed run.
        from: Option<u16>,
    },
    /// The motor runs down.
    Closing {
        /// When the run started.
        since: Instant,
        /// Position at the start, unknown for a calibration or untimed run.
        from: Option<u16>,
    },
    /// The motor was just stopped.
    Stopping {
        /// End of the pause.
        until: Instant,
        /// Run to start after the pause.
        next: Option<Direction>,
    },
}

/// The roller shutter element.
pub struct RollerShutter<P: OutputPin> {
    up: P,
    down: P,
    level: ActiveLevel,
    channel: [Channel; 1],
    open_time: Option<Duration>,
    close_time: Option<Duration>,
    reverse_pause: Duration,
    end_margin: u32,
    overrun_until: Option<Instant>,
    position: Option<u16>,
    target: Option<u16>,
    motion: Motion,
    calibrating: bool,
    last_direction: Option<Direction>,
}

impl<P: OutputPin> RollerShutter<P> {
    /// Creates a [`RollerShutter`] from its up and down outputs.
    #[must_use]
    pub const fn new(up: P, down: P) -> Self {
        Self {
            up,
            down,
            level: ActiveLevel::High,
            channel: [Channel::new(ChannelType::RollerShutter)],
            open_time: None,
            close_time: None,
            reverse_pause: REVERSE_PAUSE,
            end_margin: END_MARGIN_PERCENT,
            overrun_until: None,
            position: None,
            target: None,
            motion: Motion::Idle,
            calibrating: false,
            last_direction: None,
        }
    }

    /// Sets the active level of both outputs.
    #[must_use]
    pub const fn with_output_level(mut self, level: ActiveLevel) -> Self {
        self.level = level;
        self
    }

    /// Sets the stop time before a direction change.
    #[must_use]
    pub const fn with_reverse_pause(mut self, pause: Duration) -> Self {
        self.reverse_pause = pause;
        self
    }

    /// Sets the end margin, in percent of the travel time.
    #[must_use]
    pub const fn with_end_margin(mut self, percent: u32) -> Self {
        self.end_margin = percent;
        self
    }

    /// Returns the motor state.
    #[must_use]
    #[inline]
    pub const fn motion(&self) -> Motion {
        self.motion
    }

    /// Returns the last settled position, if known.
    #[must_use]
    #[inline]
    pub const fn position(&self) -> Option<u16> {
        self.position
    }

    fn travel_time(&self, direction: Direction) -> Option<Duration> {
        self.open_time
            .zip(self.close_time)
            .map(|(open, close)| match direction {
                Direction::Up => open,
                Direction::Down => close,
            })
    }

    fn margin(&self, travel: Duration) -> Duration {
        travel * self.end_margin / 100
    }

    fn is_moving(&self) -> bool {
        matches!(self.motion, Motion::Opening { .. } | Motion::Closing { .. })
    }

    fn position_at(&self, now: Instant) -> Option<u16> {
        let (direction, since, from) = match self.motion {
            Motion::Opening { since, from } => (Direction::Up, since, from),
            Motion::Closing { since, from } => (Direction::Down, since, from),
            Motion::Idle | Motion::Stopping { .. } => return self.position,
        };

        let from = from?;
        let travel = self.travel_time(direction)?;
        let travelled = travelled(now.duration_since(since), travel);

        Some(match direction {
            Direction::Up => from.saturating_sub(travelled),
            Direction::Down => from.saturating_add(travelled).min(CLOSED),
        })
    }

    fn refresh_channel(&mut self, position: Option<u16>) {
        let timed = self.open_time.is_some() && self.close_time.is_some();
        let channel = &mut self.channel[0];

        let _ = match position {
            Some(position) => {
                channel.set_percentage(u8::try_from(position / 100).unwrap_or(u8::MAX))
            }
            None => channel.set_value(ChannelValue::Unknown),
        };
        let _ = channel.set_flags(
            ChannelFlags::CALIBRATION_LOST,
            timed && self.position.is_none() && !self.calibrating,
        );
        let _ = channel.set_flags(ChannelFlags::CALIBRATION_IN_PROGRESS, self.calibrating);
    }

    // The inactive output is switched off first.
    fn drive(&mut self, direction: Option<Direction>) -> Result<(), P::Error> {
        if direction == Some(Direction::Up) {
            self.level.drive(&mut self.down, false)?;
            self.level.drive(&mut self.up, true)
        } else {
            self.level.drive(&mut self.up, false)?;
            self.level.drive(&mut self.down, direction == Some(Direction::Down))
        }
    }

    fn start(&mut self, direction: Direction, now: Instant) -> Result<(), P::Error> {
        let from = self.position;
        if from.is_none() && self.travel_time(direction).is_some() {
            info!("{}: calibrating", self.channel[0]);
            self.calibrating = true;
        }

        self.overrun_until = None;
        self.motion = match direction {
            Direction::Up => Motion::Opening { since: now, from },
            Direction::Down => Motion::Closing { since: now, from },
        };
        self.last_direction = Some(direction);
        self.refresh_channel(from);

        self.drive(Some(direction))?;
        let _ = self.channel[0].clear_flag(ChannelFlags::MOTOR_PROBLEM);
        debug!("{}: moving {direction:?}", self.channel[0]);
        Ok(())
    }

    // Callers settle the position before halting.
    fn halt(
        &mut self,
        now: Instant,
        next: Option<Direction>,
        ctx: &mut Context<'_>,
    ) -> Result<(), P::Error> {
        self.overrun_until = None;
        self.motion = Motion::Stopping {
            until: now + self.reverse_pause,
            next,
        };
        self.refresh_channel(self.position);
        ctx.request_save(SAVE_DELAY);
        self.drive(None)
    }

    fn stop(&mut self, now: Instant, ctx: &mut Context<'_>) -> Result<(), P::Error> {
        self.target = None;
        match self.motion {
            Motion::Opening { .. } | Motion::Closing { .. } => {
                self.position = self.position_at(now);
                if self.calibrating {
                    self.calibrating = false;
                    info!("{}: calibration interrupted", self.channel[0]);
                }
                self.halt(now, None, ctx)
            }
            Motion::Stopping { until, .. } => {
                self.motion = Motion::Stopping { until, next: None };
                Ok(())
            }
            Motion::Idle => Ok(()),
        }
    }

    fn move_to(
        &mut self,
        target: u16,
        now: Instant,
        ctx: &mut Context<'_>,
    ) -> Result<(), P::Error> {
        let direction = match self.position_at(now) {
            Some(position) if position == target && !self.is_moving() => return Ok(()),
            Some(position) => Direction::towards(position, target),
            None if target == CLOSED => Direction::Down,
            None => Direction::Up,
        };

        self.target = Some(target);
        match self.motion {
            Motion::Opening { .. } if direction == Direction::Up => Ok(()),
            Motion::Closing { .. } if direction == Direction::Down => Ok(()),
            Motion::Opening { .. } | Motion::Closing { .. } => {
                self.position = self.position_at(now);
                self.calibrating = false;
                self.halt(now, Some(direction), ctx)
            }
            Motion::Stopping { until, .. } => {
                self.motion = Motion::Stopping {
                    until,
                    next: Some(direction),
                };
                Ok(())
            }
            Motion::Idle => self.start(direction, now),
        }
    }

    fn advance(&mut self, now: Instant, ctx: &mut Context<'_>) -> Result<(), P::Error> {
        let (direction, since, from) = match self.motion {
            Motion::Idle => return Ok(()),
            Motion::Stopping { until, next } => {
                if now < until {
                    return Ok(());
                }
                self.motion = Motion::Idle;
                return match next {
                    Some(direction) => self.start(direction, now),
                    None => Ok(()),
                };
            }
            Motion::Opening { since, from } => (Direction::Up, since, from),
            Motion::Closing { since, from } => (Direction::Down, since, from),
        };

        let elapsed = now.duration_since(since);
        let Some(travel) = self.travel_time(direction) else {
            if elapsed >= MAX_UNTIMED_RUN {
                return self.halt(now, None, ctx);
            }
            return Ok(());
        };

        if from.is_none() {
            // Calibration run, up to the end stop with a margin.
            if elapsed < travel + self.margin(travel) {
                return Ok(());
            }

            let end = direction.end();
            self.position = Some(end);
            self.calibrating = false;
            info!("{}: calibrated", self.channel[0]);

            let next = self
                .target
                .filter(|&target| target != end)
                .map(|target| Direction::towards(end, target));
            return self.halt(now, next, ctx);
        }

        if let Some(until) = self.overrun_until {
            if now < until {
                return Ok(());
            }
            self.target = None;
            return self.halt(now, None, ctx);
        }

        let Some(position) = self.position_at(now) else {
            return Ok(());
        };
        let target = self.target.unwrap_or(direction.end());
        let reached = match direction {
            Direction::Up => position <= target,
            Direction::Down => position >= target,
        };

        if !reached {
            self.refresh_channel(Some(position));
            return Ok(());
        }

        self.position = Some(target);
        self.target = None;

        if target == direction.end() {
            let margin = self.margin(travel);
            debug!("{}: end reached, running for {margin:?} more", self.channel[0]);
            self.overrun_until = Some(now + margin);
            self.refresh_channel(Some(target));
            Ok(())
        } else {
            self.halt(now, None, ctx)
        }
    }

    fn motor_problem(&mut self, e: &P::Error) {
        if self.channel[0].set_flag(ChannelFlags::MOTOR_PROBLEM) {
            warn!("{}: motor not driven: {e:?}", self.channel[0]);
        }
        self.motion = Motion::Idle;
        self.overrun_until = None;
        self.calibrating = false;
        let _ = self.drive(None);
        self.refresh_channel(self.position);
    }
}

fn travelled(elapsed: Duration, travel: Duration) -> u16 {
    let travel = u64::try_from(travel.as_millis()).unwrap_or(u64::MAX).max(1);
    let elapsed = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    let travelled = elapsed.saturating_mul(u64::from(CLOSED)) / travel;
    u16::try_from(travelled.min(u64::from(CLOSED))).unwrap_or(CLOSED)
}

fn as_millis(time: Option<Duration>) -> u32 {
    time.map_or(0, |time| u32::try_from(time.as_millis()).unwrap_or(u32::MAX))
}

impl<P: OutputPin> ChannelOwner for RollerShutter<P> {
    fn channels(&self) -> &[Channel] {
        &self.channel
    }

    fn channels_mut(&mut self) -> &mut [Channel] {
        &mut self.channel
    }
}

impl<P: OutputPin> ActionHandler for RollerShutter<P> {
    fn handle_action(
        &mut self,
        _index: usize,
        action: Action,
        ctx: &mut Context<'_>,
    ) -> Result<(), Rejection> {
        let now = ctx.now();
        let moving = self.is_moving();

        let result = match action {
            Action::Open => self.move_to(OPEN, now, ctx),
            Action::Close => self.move_to(CLOSED, now, ctx),
            Action::Stop => self.stop(now, ctx),
            Action::OpenOrStop | Action::CloseOrStop | Action::StepByStep if moving => {
                self.stop(now, ctx)
            }
            Action::OpenOrStop => self.move_to(OPEN, now, ctx),
            Action::CloseOrStop => self.move_to(CLOSED, now, ctx),
            Action::StepByStep => match self.last_direction {
                Some(Direction::Up) => self.move_to(CLOSED, now, ctx),
                _ => self.move_to(OPEN, now, ctx),
            },
            Action::MoveToPosition(percent) => {
                if percent > 100 || self.travel_time(Direction::Up).is_none() {
                    return Err(Rejection::Unsupported);
                }
                self.move_to(u16::from(percent) * 100, now, ctx)
            }
            Action::Calibrate => {
                if self.travel_time(Direction::Up).is_none() {
                    return Err(Rejection::Unsupported);
                }
                let _ = self.stop(now, ctx);
                self.position = None;
                self.move_to(OPEN, now, ctx)
            }
            _ => return Err(Rejection::Unsupported),
        };

        result.map_err(|e| {
            self.motor_problem(&e);
            Rejection::Blocked
        })
    }
}

impl<P: OutputPin> TimerSubscriber for RollerShutter<P> {
    fn interest(&self) -> TimerInterest {
        TimerInterest::FAST
    }

    fn on_fast_timer(&mut self, ctx: &mut Context<'_>) {
        if let Err(e) = self.advance(ctx.now(), ctx) {
            self.motor_problem(&e);
        }
    }
}

impl<P: OutputPin + 'static> Element for RollerShutter<P> {
    fn name(&self) -> &'static str {
        "roller-shutter"
    }

    fn on_init(&mut self, _ctx: &mut Context<'_>) -> HookStatus {
        match self.drive(None) {
            Ok(()) => HookStatus::Ok,
            Err(e) => {
                warn!("{}: motor not driven: {e:?}", self.channel[0]);
                let _ = self.channel[0].set_flag(ChannelFlags::MOTOR_PROBLEM);
                HookStatus::Degraded
            }
        }
    }

    fn on_load_config(&mut self, config: &dyn ConfigSource) -> HookStatus {
        let Some(number) = self.channel[0].number() else {
            return HookStatus::Ok;
        };

        let open = config
            .get_millis(&channel_key(number, "open_ms"))
            .filter(|time| !time.is_zero());
        let close = config
            .get_millis(&channel_key(number, "close_ms"))
            .filter(|time| !time.is_zero());

        if (open, close) != (self.open_time, self.close_time) {
            if self.position.take().is_some() {
                info!("{}: travel times changed, calibration lost", self.channel[0]);
            }
            self.open_time = open;
            self.close_time = close;
        }

        self.refresh_channel(self.position);
        HookStatus::Ok
    }

    fn on_load_state(&mut self, state: &mut StateReader<'_>) -> HookStatus {
        let (Some(position), Some(direction), Some(open), Some(close)) =
            (state.u16(), state.u8(), state.u32(), state.u32())
        else {
            return HookStatus::Ok;
        };

        self.last_direction = Direction::from_u8(direction);

        // A position measured with other travel times is meaningless.
        if position <= CLOSED
            && open == as_millis(self.open_time)
            && close == as_millis(self.close_time)
            && self.travel_time(Direction::Up).is_some()
        {
            self.position = Some(position);
        }

        self.refresh_channel(self.position);
        HookStatus::Ok
    }

    fn on_save_state(&self, state: &mut StateWriter<'_>) {
        state.put_u16(self.position.unwrap_or(UNKNOWN_POSITION));
        state.put_u8(Direction::as_u8(self.last_direction));
        state.put_u32(as_millis(self.open_time));
        state.put_u32(as_millis(self.close_time));
    }

    fn on_soft_reset(&mut self, ctx: &mut Context<'_>) {
        if let Err(e) = self.stop(ctx.now(), ctx) {
            self.motor_problem(&e);
        }
    }

    lares::capabilities!(channel_owner, action_handler, timer_subscriber);
}

#[cfg(test)]
mod tests {
    use core::time::Duration;

    use embedded_hal_mock::eh1::digital::{Mock as PinMock, State, Transaction as PinTransaction};

    use lares::action::{Action, ActionCommand, Rejection};
    use lares::channel::{ChannelFlags, ChannelValue};

    use crate::tests::{TestPin, TestRuntime, power_cycle, register, run_for, runtime, runtime_on};

    use super::RollerShutter;

    const TICK: Duration = Duration::from_millis(10);

    fn command(runtime: &mut TestRuntime, action: Action) -> Result<(), Rejection> {
        runtime.handle_action(ActionCommand::new(0, action))
    }

    fn value(runtime: &TestRuntime) -> ChannelValue {
        runtime.channel(0).unwrap().value()
    }

    // A shutter taking 10 s each way.
    fn timed(runtime: &mut TestRuntime) -> (TestPin, TestPin) {
        let up = TestPin::default();
        let down = TestPin::default();
        let _ = register(runtime, RollerShutter::new(up.clone(), down.clone()));
        let _ = runtime.update_config("0_open_ms", 10_000_i64).unwrap();
        let _ = runtime.update_config("0_close_ms", 10_000_i64).unwrap();
        runtime.boot().unwrap();
        runtime.tick();
        (up, down)
    }

    // Closes the shutter to calibrate it.
    fn calibrated(runtime: &mut TestRuntime) -> (TestPin, TestPin) {
        let (up, down) = timed(runtime);
        command(runtime, Action::Close).unwrap();
        run_for(runtime, Duration::from_secs(12), TICK);
        assert_eq!(value(runtime), ChannelValue::Percentage(100));
        (up, down)
    }

    #[test]
    fn test_calibration() {
        let mut runtime = runtime();
        let (up, down) = timed(&mut runtime);
        assert_eq!(value(&runtime), ChannelValue::Unknown);
        assert!(
            runtime
                .channel(0)
                .unwrap()
                .has_flags(ChannelFlags::CALIBRATION_LOST)
        );

        command(&mut runtime, Action::Close).unwrap();
        run_for(&mut runtime, Duration::from_secs(1), TICK);
        assert!(down.is_set());
        assert!(!up.is_set());
        let channel = runtime.channel(0).unwrap();
        assert!(channel.has_flags(ChannelFlags::CALIBRATION_IN_PROGRESS));
        assert!(!channel.has_flags(ChannelFlags::CALIBRATION_LOST));

        // The full travel time plus the margin.
        run_for(&mut runtime, Duration::from_secs(10), TICK);
        assert!(!down.is_set());
        let channel = runtime.channel(0).unwrap();
        assert_eq!(channel.value(), ChannelValue::Percentage(100));
        assert!(!channel.has_flags(ChannelFlags::CALIBRATION_IN_PROGRESS));
        assert!(!channel.has_flags(ChannelFlags::CALIBRATION_LOST));
    }

    #[test]
    fn test_move_to_position() {
        let mut runtime = runtime();
        let (up, down) = calibrated(&mut runtime);

        command(&mut runtime, Action::MoveToPosition(50)).unwrap();
        run_for(&mut runtime, Duration::from_secs(3), TICK);
        assert!(up.is_set());
        assert!(!down.is_set());
        assert_eq!(value(&runtime), ChannelValue::Percentage(70));

        run_for(&mut runtime, Duration::from_secs(3), TICK);
        assert!(!up.is_set());
        assert_eq!(value(&runtime), ChannelValue::Percentage(50));

        assert_eq!(
            command(&mut runtime, Action::MoveToPosition(101)),
            Err(Rejection::Unsupported)
        );
    }

    #[test]
    fn test_move_to_position_while_uncalibrated() {
        let mut runtime = runtime();
        let (up, down) = timed(&mut runtime);

        // Calibration at the open end stop first, then down to the target.
        command(&mut runtime, Action::MoveToPosition(30)).unwrap();
        run_for(&mut runtime, Duration::from_secs(11), TICK);
        assert_eq!(value(&runtime), ChannelValue::Percentage(0));

        run_for(&mut runtime, Duration::from_secs(4), TICK);
        assert!(!up.is_set());
        assert!(!down.is_set());
        assert_eq!(value(&runtime), ChannelValue::Percentage(30));
    }

    #[test]
    fn test_reversal_goes_through_a_stop() {
        let mut runtime = runtime();
        let (up, down) = calibrated(&mut runtime);

        command(&mut runtime, Action::Open).unwrap();
        run_for(&mut runtime, Duration::from_secs(2), TICK);
        assert!(up.is_set());

        command(&mut runtime, Action::Close).unwrap();
        assert!(!up.is_set());
        assert!(!down.is_set());
        assert_eq!(value(&runtime), ChannelValue::Percentage(80));

        run_for(&mut runtime, TICK * 40, TICK);
        assert!(!down.is_set());
        run_for(&mut runtime, TICK * 20, TICK);
        assert!(down.is_set());

        run_for(&mut runtime, Duration::from_secs(3), TICK);
        assert!(!down.is_set());
        assert_eq!(value(&runtime), ChannelValue::Percentage(100));
    }

    #[test]
    fn test_stop() {
        let mut runtime = runtime();
        let (up, _) = calibrated(&mut runtime);

        command(&mut runtime, Action::OpenOrStop).unwrap();
        run_for(&mut runtime, Duration::from_secs(1), TICK);
        assert!(up.is_set());

        command(&mut runtime, Action::OpenOrStop).unwrap();
        assert!(!up.is_set());
        run_for(&mut runtime, Duration::from_secs(2), TICK);
        assert!(!up.is_set());
        assert_eq!(value(&runtime), ChannelValue::Percentage(90));
    }

    #[test]
    fn test_step_by_step() {
        let mut runtime = runtime();
        let (up, down) = calibrated(&mut runtime);
        run_for(&mut runtime, Duration::from_secs(1), TICK);

        // Open, stop, close, stop.
        command(&mut runtime, Action::StepByStep).unwrap();
        run_for(&mut runtime, Duration::from_secs(1), TICK);
        assert!(up.is_set());

        command(&mut runtime, Action::StepByStep).unwrap();
        run_for(&mut runtime, Duration::from_secs(1), TICK);
        assert!(!up.is_set());
        assert!(!down.is_set());

        command(&mut runtime, Action::StepByStep).unwrap();
        run_for(&mut runtime, Duration::from_secs(1), TICK);
        assert!(down.is_set());

        command(&mut runtime, Action::StepByStep).unwrap();
        assert!(!down.is_set());
    }

    #[test]
    fn test_end_stop_margin() {
        let mut runtime = runtime();
        let (up, down) = calibrated(&mut runtime);

        // The estimate reaches the open end after 10 s, the motor keeps
        // running for 10% of the travel time.
        command(&mut runtime, Action::Open).unwrap();
        run_for(&mut runtime, Duration::from_millis(10_500), TICK);
        assert_eq!(value(&runtime), ChannelValue::Percentage(0));
        assert!(up.is_set());

        run_for(&mut runtime, Duration::from_millis(600), TICK);
        assert!(!up.is_set());
        assert_eq!(value(&runtime), ChannelValue::Percentage(0));

        // Intermediate positions have no margin.
        command(&mut runtime, Action::MoveToPosition(20)).unwrap();
        run_for(&mut runtime, Duration::from_millis(2_500), TICK);
        assert_eq!(value(&runtime), ChannelValue::Percentage(20));
        assert!(!down.is_set());
    }

    #[test]
    fn test_untimed_runs() {
        let up = TestPin::default();
        let down = TestPin::default();
        let mut runtime = runtime();
        let _ = register(&mut runtime, RollerShutter::new(up.clone(), down.clone()));
        runtime.boot().unwrap();
        runtime.tick();

        assert_eq!(
            command(&mut runtime, Action::Calibrate),
            Err(Rejection::Unsupported)
        );

        command(&mut runtime, Action::Close).unwrap();
        run_for(&mut runtime, Duration::from_secs(30), Duration::from_millis(100));
        assert!(down.is_set());
        let channel = runtime.channel(0).unwrap();
        assert_eq!(channel.value(), ChannelValue::Unknown);
        assert!(!channel.has_flags(ChannelFlags::CALIBRATION_LOST));

        run_for(&mut runtime, Duration::from_secs(31), Duration::from_millis(100));
        assert!(!down.is_set());
    }

    #[test]
    fn test_position_survives_restart() {
        let mut runtime = runtime();
        let _ = calibrated(&mut runtime);
        command(&mut runtime, Action::MoveToPosition(40)).unwrap();
        run_for(&mut runtime, Duration::from_secs(15), Duration::from_millis(100));
        let storage = power_cycle(&mut runtime);

        let mut runtime = runtime_on(storage);
        let _ = timed(&mut runtime);
        assert_eq!(value(&runtime), ChannelValue::Percentage(40));
        assert!(
            !runtime
                .channel(0)
                .unwrap()
                .has_flags(ChannelFlags::CALIBRATION_LOST)
        );

        // New travel times invalidate the position.
        assert!(runtime.update_config("0_open_ms", 12_000_i64).unwrap());
        assert_eq!(value(&runtime), ChannelValue::Unknown);
        assert!(
            runtime
                .channel(0)
                .unwrap()
                .has_flags(ChannelFlags::CALIBRATION_LOST)
        );
    }

    #[test]
    fn test_never_drives_both_outputs() {
        let up_expectations = [
            // Boot.
            PinTransaction::set(State::Low),
            // Open.
            PinTransaction::set(State::High),
            // Close: stop, then down after the pause.
            PinTransaction::set(State::Low),
            PinTransaction::set(State::Low),
        ];
        let down_expectations = [
            PinTransaction::set(State::Low),
            PinTransaction::set(State::Low),
            PinTransaction::set(State::Low),
            PinTransaction::set(State::High),
        ];
        let mut up = PinMock::new(&up_expectations);
        let mut down = PinMock::new(&down_expectations);

        let mut runtime = runtime();
        let _ = register(&mut runtime, RollerShutter::new(up.clone(), down.clone()));
        runtime.boot().unwrap();
        runtime.tick();

        command(&mut runtime, Action::Open).unwrap();
        run_for(&mut runtime, TICK * 10, TICK);
        command(&mut runtime, Action::Close).unwrap();
        assert_eq!(value(&runtime), ChannelValue::Unknown);
        run_for(&mut runtime, TICK * 60, TICK);

        up.done();
        down.done();
    }
}
