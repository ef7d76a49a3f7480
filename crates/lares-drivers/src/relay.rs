//! # Relay
//!
//! An element switching one or more outputs, each exposed as a
//! [`ChannelType::Relay`] channel.
//!
//! Every output supports an optional countdown: [`Action::TurnOnFor`]
//! switches the output on and turns it off again once the countdown
//! expires. The remaining countdown is part of the saved state, so it
//! resumes after a restart.
//!
//! The output state after a restart depends on the `<n>_init`
//! configuration key of each channel:
//! - `0`: off
//! - `1`: on
//! - `2`: the state saved before the restart (default)

use alloc::vec::Vec;

use core::time::Duration;

use embedded_hal::digital::OutputPin;
use log::{debug, info, warn};

use lares::action::{Action, ActionHandler, Rejection};
use lares::channel::{Channel, ChannelFlags, ChannelType};
use lares::clock::Instant;
use lares::config::{ConfigSource, channel_key};
use lares::element::{ChannelOwner, Context, Element};
use lares::error::HookStatus;
use lares::state::{StateReader, StateWriter};

use crate::pin::ActiveLevel;

/// Delay between an output change and the state save it requests.
pub const SAVE_DELAY: Duration = Duration::from_secs(5);

/// Output state applied at boot.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum InitMode {
    /// The output starts off.
    Off,
    /// The output starts on.
    On,
    /// The output starts in its saved state.
    #[default]
    Restore,
}

impl InitMode {
    const fn from_config(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Off),
            1 => Some(Self::On),
            2 => Some(Self::Restore),
            _ => None,
        }
    }
}

struct Output<P> {
    pin: P,
    level: ActiveLevel,
    init: InitMode,
    countdown: Option<Duration>,
}

/// The relay element.
pub struct Relay<P: OutputPin> {
    outputs: Vec<Output<P>>,
    channels: Vec<Channel>,
    last_tick: Option<Instant>,
}

impl<P: OutputPin> Default for Relay<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: OutputPin> Relay<P> {
    /// Creates a [`Relay`] without outputs.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            outputs: Vec::new(),
            channels: Vec::new(),
            last_tick: None,
        }
    }

    /// Adds an output, active when high.
    #[must_use]
    pub fn with_output(self, pin: P) -> Self {
        self.with_output_level(pin, ActiveLevel::High)
    }

    /// Adds an output with the given active level.
    #[must_use]
    pub fn with_output_level(mut self, pin: P, level: ActiveLevel) -> Self {
        self.outputs.push(Output {
            pin,
            level,
            init: InitMode::default(),
            countdown: None,
        });
        self.channels.push(Channel::new(ChannelType::Relay));
        self
    }

    /// Whether the output at `index` is on.
    #[must_use]
    pub fn is_on(&self, index: usize) -> bool {
        self.channels
            .get(index)
            .and_then(|channel| channel.value().as_bool())
            .unwrap_or_default()
    }

    fn switch(&mut self, index: usize, on: bool, countdown: Option<Duration>) -> Result<(), Rejection> {
        let output = &mut self.outputs[index];
        let channel = &mut self.channels[index];

        if let Err(e) = output.level.drive(&mut output.pin, on) {
            warn!("{channel}: output not switched: {e:?}");
            return Err(Rejection::Blocked);
        }

        output.countdown = if on { countdown } else { None };
        let _ = channel.set_flags(ChannelFlags::COUNTDOWN, output.countdown.is_some());
        if channel.set_bool(on) {
            debug!("{channel}: turned {}", if on { "on" } else { "off" });
        }

        Ok(())
    }

    fn run_countdowns(&mut self, elapsed: Duration) -> bool {
        let mut expired = false;

        for index in 0..self.outputs.len() {
            let Some(remaining) = self.outputs[index].countdown else {
                continue;
            };

            match remaining.checked_sub(elapsed) {
                Some(remaining) if !remaining.is_zero() => {
                    self.outputs[index].countdown = Some(remaining);
                }
                _ => {
                    info!("{}: countdown expired", self.channels[index]);
                    // A failing output keeps its countdown and is retried.
                    if self.switch(index, false, None).is_ok() {
                        expired = true;
                    }
                }
            }
        }

        expired
    }
}

impl<P: OutputPin> ChannelOwner for Relay<P> {
    fn channels(&self) -> &[Channel] {
        &self.channels
    }

    fn channels_mut(&mut self) -> &mut [Channel] {
        &mut self.channels
    }
}

impl<P: OutputPin> ActionHandler for Relay<P> {
    fn handle_action(
        &mut self,
        index: usize,
        action: Action,
        ctx: &mut Context<'_>,
    ) -> Result<(), Rejection> {
        match action {
            Action::TurnOn => self.switch(index, true, None)?,
            Action::TurnOff => self.switch(index, false, None)?,
            Action::Toggle => self.switch(index, !self.is_on(index), None)?,
            Action::TurnOnFor(duration) if !duration.is_zero() => {
                self.switch(index, true, Some(duration))?;
            }
            _ => return Err(Rejection::Unsupported),
        }

        ctx.request_save(SAVE_DELAY);
        Ok(())
    }
}

impl<P: OutputPin + 'static> Element for Relay<P> {
    fn name(&self) -> &'static str {
        "relay"
    }

    fn on_init(&mut self, _ctx: &mut Context<'_>) -> HookStatus {
        let mut status = HookStatus::Ok;

        for (output, channel) in self.outputs.iter_mut().zip(&self.channels) {
            if let Err(e) = output.level.drive(&mut output.pin, false) {
                warn!("{channel}: output not available: {e:?}");
                status = HookStatus::Degraded;
            }
        }

        status
    }

    fn on_load_config(&mut self, config: &dyn ConfigSource) -> HookStatus {
        let mut status = HookStatus::Ok;

        for (output, channel) in self.outputs.iter_mut().zip(&self.channels) {
            let Some(number) = channel.number() else {
                continue;
            };

            let Some(value) = config.get_int(&channel_key(number, "init")) else {
                continue;
            };

            match InitMode::from_config(value) {
                Some(init) => output.init = init,
                None => {
                    warn!("{channel}: invalid init mode {value}");
                    status = HookStatus::Degraded;
                }
            }
        }

        status
    }

    fn on_load_state(&mut self, state: &mut StateReader<'_>) -> HookStatus {
        let mut status = HookStatus::Ok;

        for index in 0..self.outputs.len() {
            let saved = state.bool().zip(state.u32());

            let (on, countdown) = match (self.outputs[index].init, saved) {
                (InitMode::Off, _) => (false, None),
                (InitMode::On, _) => (true, None),
                (InitMode::Restore, Some((on, millis))) => {
                    let countdown = (millis > 0).then(|| Duration::from_millis(u64::from(millis)));
                    (on, countdown)
                }
                (InitMode::Restore, None) => (false, None),
            };

            if on && self.switch(index, true, countdown).is_err() {
                status = HookStatus::Degraded;
            }
        }

        status
    }

    fn iterate_always(&mut self, ctx: &mut Context<'_>) {
        let now = ctx.now();
        let elapsed = self
            .last_tick
            .map_or(Duration::ZERO, |last| now.duration_since(last));
        self.last_tick = Some(now);

        if self.run_countdowns(elapsed) {
            ctx.request_save(SAVE_DELAY);
        }
    }

    fn on_save_state(&self, state: &mut StateWriter<'_>) {
        for (output, channel) in self.outputs.iter().zip(&self.channels) {
            let millis = output
                .countdown
                .map_or(0, |countdown| u32::try_from(countdown.as_millis()).unwrap_or(u32::MAX));
            state.put_bool(channel.value().as_bool().unwrap_or_default());
            state.put_u32(millis);
        }
    }

    lares::capabilities!(channel_owner, action_handler);
}
