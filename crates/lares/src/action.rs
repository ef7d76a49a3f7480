use core::fmt;
use core::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::channel::ChannelNumber;
use crate::element::{ChannelOwner, Context};

/// A command applied to a channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// Switches an output on.
    TurnOn,
    /// Switches an output off.
    TurnOff,
    /// Inverts an output.
    Toggle,
    /// Switches an output on for the given time.
    TurnOnFor(Duration),
    /// Opens a valve or a roller shutter.
    Open,
    /// Closes a valve or a roller shutter.
    Close,
    /// Stops a moving roller shutter.
    Stop,
    /// Opens a roller shutter, or stops it when it is moving.
    OpenOrStop,
    /// Closes a roller shutter, or stops it when it is moving.
    CloseOrStop,
    /// Cycles a roller shutter through open, stop, close and stop.
    StepByStep,
    /// Moves a roller shutter to the given closing percentage.
    MoveToPosition(u8),
    /// Starts a roller shutter calibration run.
    Calibrate,
    /// Sets a thermostat target, in hundredths of a degree Celsius.
    SetTemperature(i16),
    /// Resets a counter.
    Reset,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TurnOn => "turn-on".fmt(f),
            Self::TurnOff => "turn-off".fmt(f),
            Self::Toggle => "toggle".fmt(f),
            Self::TurnOnFor(duration) => write!(f, "turn-on-for({}ms)", duration.as_millis()),
            Self::Open => "open".fmt(f),
            Self::Close => "close".fmt(f),
            Self::Stop => "stop".fmt(f),
            Self::OpenOrStop => "open-or-stop".fmt(f),
            Self::CloseOrStop => "close-or-stop".fmt(f),
            Self::StepByStep => "step-by-step".fmt(f),
            Self::MoveToPosition(position) => write!(f, "move-to-position({position})"),
            Self::Calibrate => "calibrate".fmt(f),
            Self::SetTemperature(temperature) => write!(f, "set-temperature({temperature})"),
            Self::Reset => "reset".fmt(f),
        }
    }
}

/// An action addressed to a channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCommand {
    /// Target channel number.
    pub channel: ChannelNumber,
    /// Action to apply.
    pub action: Action,
}

impl ActionCommand {
    /// Creates an [`ActionCommand`].
    #[must_use]
    #[inline]
    pub const fn new(channel: ChannelNumber, action: Action) -> Self {
        Self { channel, action }
    }
}

/// Why a command was rejected.
///
/// A rejected command leaves every channel untouched.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rejection {
    /// No element owns the target channel, or the targeted element does
    /// not.
    UnknownChannel,
    /// The channel does not support the action.
    Unsupported,
    /// The action is refused in the current state, for example opening a
    /// valve while flooding is detected.
    Blocked,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownChannel => "unknown channel",
            Self::Unsupported => "unsupported action",
            Self::Blocked => "action blocked",
        }
        .fmt(f)
    }
}

/// An element that accepts actions on its channels.
pub trait ActionHandler: ChannelOwner {
    /// Applies an action to the channel at `index` in
    /// [`ChannelOwner::channels`].
    ///
    /// The index is always valid when called through [`dispatch`].
    ///
    /// # Errors
    ///
    /// Rejects actions the channel does not support or that the current
    /// state forbids, without modifying any channel.
    fn handle_action(
        &mut self,
        index: usize,
        action: Action,
        ctx: &mut Context<'_>,
    ) -> Result<(), Rejection>;
}

/// Validates a command against the channels of `handler` and applies it.
///
/// # Errors
///
/// Rejects commands for channels `handler` does not own, and forwards the
/// rejections of the handler.
pub fn dispatch(
    handler: &mut dyn ActionHandler,
    command: ActionCommand,
    ctx: &mut Context<'_>,
) -> Result<(), Rejection> {
    let Some(index) = handler.local_index(command.channel) else {
        warn!(
            "Action `{}` rejected: channel {} is not owned by the target",
            command.action, command.channel
        );
        return Err(Rejection::UnknownChannel);
    };

    match handler.handle_action(index, command.action, ctx) {
        Ok(()) => {
            debug!("Action `{}` applied to channel {}", command.action, command.channel);
            Ok(())
        }
        Err(rejection) => {
            warn!(
                "Action `{}` on channel {} rejected: {rejection}",
                command.action, command.channel
            );
            Err(rejection)
        }
    }
}
