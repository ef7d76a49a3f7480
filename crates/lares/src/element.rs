use core::fmt;
use core::time::Duration;

use bitflags::bitflags;
use log::warn;

use crate::action::{ActionCommand, ActionHandler};
use crate::channel::{Channel, ChannelSnapshot};
use crate::clock::Instant;
use crate::config::{ConfigChange, ConfigSource};
use crate::error::HookStatus;
use crate::gateway::{ConnectionState, Publisher};
use crate::state::{StateReader, StateWriter};

/// Identity of a registered element, its index in the registry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElementId(pub(crate) usize);

impl ElementId {
    /// Returns the registry index.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the runtime does after an element ran
/// [`Element::iterate_connected`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Nothing was sent, the next element runs in the same tick.
    Continue,
    /// The element used the connection, the remaining elements run
    /// starting from the next tick.
    Yield,
}

/// Maximum number of local actions a single hook call can emit.
pub const MAX_EMITTED_ACTIONS: usize = 8;

/// The environment of a lifecycle hook.
#[derive(Debug)]
pub struct Context<'a> {
    now: Instant,
    connection: ConnectionState,
    channels: &'a ChannelSnapshot,
    save_request: Option<Duration>,
    emitted: heapless::Vec<ActionCommand, MAX_EMITTED_ACTIONS>,
}

impl<'a> Context<'a> {
    /// Creates a [`Context`].
    #[must_use]
    #[inline]
    pub const fn new(
        now: Instant,
        connection: ConnectionState,
        channels: &'a ChannelSnapshot,
    ) -> Self {
        Self {
            now,
            connection,
            channels,
            save_request: None,
            emitted: heapless::Vec::new(),
        }
    }

    /// Returns the current time.
    #[must_use]
    #[inline]
    pub const fn now(&self) -> Instant {
        self.now
    }

    /// Returns the connection state.
    #[must_use]
    #[inline]
    pub const fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Returns the channel states committed at the end of the previous
    /// tick.
    #[must_use]
    #[inline]
    pub const fn channels(&self) -> &ChannelSnapshot {
        self.channels
    }

    /// Asks for the operational state to be saved within `after`.
    ///
    /// Several requests keep the earliest deadline.
    pub fn request_save(&mut self, after: Duration) {
        self.save_request = Some(self.save_request.map_or(after, |current| current.min(after)));
    }

    /// Takes the pending save request.
    #[must_use]
    #[inline]
    pub fn take_save_request(&mut self) -> Option<Duration> {
        self.save_request.take()
    }

    /// Emits a local action.
    ///
    /// Once the running phase completes, the runtime routes the command to
    /// the element owning the target channel, exactly like a command coming
    /// from the gateway. Returns `false` when the hook already emitted
    /// [`MAX_EMITTED_ACTIONS`] actions, in which case the command is
    /// dropped.
    pub fn emit(&mut self, command: ActionCommand) -> bool {
        if self.emitted.push(command).is_err() {
            warn!(
                "Action `{}` for channel {} dropped, too many actions",
                command.action, command.channel
            );
            return false;
        }
        true
    }

    /// Takes the emitted actions.
    #[must_use]
    #[inline]
    pub fn take_emitted(&mut self) -> heapless::Vec<ActionCommand, MAX_EMITTED_ACTIONS> {
        core::mem::take(&mut self.emitted)
    }
}

bitflags! {
    /// The timers an element wants to be called on.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct TimerInterest: u8 {
        /// The slow timer, on the order of a second.
        const SLOW = 1 << 0;
        /// The fast timer, well below a hundred milliseconds.
        const FAST = 1 << 1;
    }
}

/// An element that owns channels.
pub trait ChannelOwner {
    /// Returns the owned channels, in local index order.
    fn channels(&self) -> &[Channel];

    /// Returns the owned channels for mutation.
    fn channels_mut(&mut self) -> &mut [Channel];

    /// Returns the local index of the channel with the given number.
    fn local_index(&self, number: crate::channel::ChannelNumber) -> Option<usize> {
        self.channels()
            .iter()
            .position(|channel| channel.number() == Some(number))
    }
}

/// An element driven by the fixed-rate timers.
///
/// Timer hooks run from the control loop, never from interrupt context.
pub trait TimerSubscriber {
    /// Returns the timers the element is interested in.
    ///
    /// Queried once, at boot.
    fn interest(&self) -> TimerInterest;

    /// Called on every slow timer tick.
    fn on_timer(&mut self, _ctx: &mut Context<'_>) {}

    /// Called on every fast timer tick.
    fn on_fast_timer(&mut self, _ctx: &mut Context<'_>) {}
}

/// The lifecycle contract of every registered component.
///
/// Every hook has a default implementation, so an element implements only
/// what it needs. Hooks must return quickly and never block: multi-step
/// hardware sequences are state machines advanced over successive ticks.
///
/// At boot the runtime calls [`Element::on_init`], [`Element::on_load_config`]
/// and [`Element::on_load_state`], in this order, on every element in
/// registration order.
///
/// Optional capabilities are exposed through the `as_*` methods, usually
/// generated with the [`capabilities!`](crate::capabilities) macro.
pub trait Element {
    /// Returns a short name used in logs.
    fn name(&self) -> &'static str;

    /// Identifies the layout of the saved state.
    ///
    /// A record saved under another tag is never handed to
    /// [`Element::on_load_state`]. Elements changing their state layout
    /// return a new tag, such as `"relay.v2"`.
    fn state_tag(&self) -> &'static str {
        self.name()
    }

    /// Brings the element to a valid default state.
    ///
    /// Absent or faulty hardware is reported as
    /// [`HookStatus::Degraded`].
    fn on_init(&mut self, _ctx: &mut Context<'_>) -> HookStatus {
        HookStatus::Ok
    }

    /// Applies the configuration.
    ///
    /// Invalid values are ignored or clamped, keeping the previous valid
    /// setting.
    fn on_load_config(&mut self, _config: &dyn ConfigSource) -> HookStatus {
        HookStatus::Ok
    }

    /// Restores the operational state saved by [`Element::on_save_state`].
    ///
    /// The reader is empty when no valid record exists, or when the record
    /// was saved by an element with another [`Element::state_tag`]. The
    /// element then keeps its defaults.
    fn on_load_state(&mut self, _state: &mut StateReader<'_>) -> HookStatus {
        HookStatus::Ok
    }

    /// Called after every successful registration with the gateway.
    ///
    /// By default every owned channel is marked for publication, so the
    /// current state is announced again.
    fn on_registered(&mut self) {
        if let Some(owner) = self.as_channel_owner_mut() {
            for channel in owner.channels_mut() {
                channel.request_publish();
            }
        }
    }

    /// Called on every tick, regardless of the connection state.
    fn iterate_always(&mut self, _ctx: &mut Context<'_>) {}

    /// Called on every tick while the gateway connection is up.
    ///
    /// By default every pending owned channel is published.
    fn iterate_connected(&mut self, publisher: &mut dyn Publisher) -> Flow {
        match self.as_channel_owner_mut() {
            Some(owner) => publish_pending(owner.channels_mut(), publisher),
            None => Flow::Continue,
        }
    }

    /// Serializes the operational state.
    ///
    /// It must only read the element, so calling it twice in a row writes
    /// the same data.
    fn on_save_state(&self, _state: &mut StateWriter<'_>) {}

    /// Called when the configuration changed out of band.
    ///
    /// By default the configuration is applied again.
    fn on_device_config_change(
        &mut self,
        _change: &ConfigChange,
        config: &dyn ConfigSource,
    ) -> HookStatus {
        self.on_load_config(config)
    }

    /// Called before an intentional restart, right before the final save.
    fn on_soft_reset(&mut self, _ctx: &mut Context<'_>) {}

    /// Returns the element as a [`ChannelOwner`].
    fn as_channel_owner(&self) -> Option<&dyn ChannelOwner> {
        None
    }

    /// Returns the element as a mutable [`ChannelOwner`].
    fn as_channel_owner_mut(&mut self) -> Option<&mut dyn ChannelOwner> {
        None
    }

    /// Returns the element as an [`ActionHandler`].
    fn as_action_handler(&mut self) -> Option<&mut dyn ActionHandler> {
        None
    }

    /// Returns the element as a [`TimerSubscriber`].
    fn as_timer_subscriber(&mut self) -> Option<&mut dyn TimerSubscriber> {
        None
    }
}

/// Publishes every pending channel.
///
/// Returns [`Flow::Yield`] when something was published or the publisher
/// refused an update. A refused channel stays pending and is published
/// again later.
pub fn publish_pending(channels: &mut [Channel], publisher: &mut dyn Publisher) -> Flow {
    let mut flow = Flow::Continue;

    for channel in channels.iter_mut().filter(|channel| channel.is_pending()) {
        let Some(update) = channel.state() else {
            continue;
        };

        if let Err(e) = publisher.publish(&update) {
            warn!("{channel}: update not published: {e}");
            return Flow::Yield;
        }

        channel.mark_published();
        flow = Flow::Yield;
    }

    flow
}

/// Implements the capability accessors of [`Element`].
///
/// Use it inside an `impl Element` block, listing the capabilities the
/// type implements among `channel_owner`, `action_handler` and
/// `timer_subscriber`.
///
/// ```
/// use lares::channel::{Channel, ChannelType};
/// use lares::element::{ChannelOwner, Element};
///
/// struct Beacon {
///     channels: [Channel; 1],
/// }
///
/// impl ChannelOwner for Beacon {
///     fn channels(&self) -> &[Channel] {
///         &self.channels
///     }
///
///     fn channels_mut(&mut self) -> &mut [Channel] {
///         &mut self.channels
///     }
/// }
///
/// impl Element for Beacon {
///     fn name(&self) -> &'static str {
///         "beacon"
///     }
///
///     lares::capabilities!(channel_owner);
/// }
///
/// let mut beacon = Beacon {
///     channels: [Channel::new(ChannelType::BinarySensor)],
/// };
/// assert!(beacon.as_channel_owner().is_some());
/// assert!(beacon.as_action_handler().is_none());
/// ```
#[macro_export]
macro_rules! capabilities {
    ($($capability:ident),+ $(,)?) => {
        $($crate::capabilities!(@ $capability);)+
    };
    (@ channel_owner) => {
        fn as_channel_owner(&self) -> Option<&dyn $crate::element::ChannelOwner> {
            Some(self)
        }

        fn as_channel_owner_mut(&mut self) -> Option<&mut dyn $crate::element::ChannelOwner> {
            Some(self)
        }
    };
    (@ action_handler) => {
        fn as_action_handler(&mut self) -> Option<&mut dyn $crate::action::ActionHandler> {
            Some(self)
        }
    };
    (@ timer_subscriber) => {
        fn as_timer_subscriber(&mut self) -> Option<&mut dyn $crate::element::TimerSubscriber> {
            Some(self)
        }
    };
}
