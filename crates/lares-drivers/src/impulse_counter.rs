//! # Impulse counter
//!
//! An element counting the impulses of an electricity, water or gas meter
//! on an input pin, exposed as a [`ChannelType::ImpulseCounter`] channel.
//!
//! The input is sampled on the fast timer. An impulse is counted on each
//! debounced edge of the configured polarity. The counter is part of the
//! saved state and is cleared by [`Action::Reset`].

use core::time::Duration;

use embedded_hal::digital::InputPin;
use log::{info, warn};

use lares::action::{Action, ActionHandler, Rejection};
use lares::channel::{Channel, ChannelFlags, ChannelType};
use lares::config::{ConfigSource, channel_key};
use lares::element::{ChannelOwner, Context, Element, TimerInterest, TimerSubscriber};
use lares::error::HookStatus;
use lares::state::{StateReader, StateWriter};

use crate::pin::{ActiveLevel, Debouncer};

/// Default time a new level must hold before an edge is accepted.
pub const DEBOUNCE: Duration = Duration::from_millis(20);

/// Default delay between a counted impulse and the state save it requests.
pub const SAVE_DELAY: Duration = Duration::from_secs(60);

/// The edge counted as an impulse.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum Edge {
    /// The input becomes active.
    #[default]
    Rising,
    /// The input becomes inactive.
    Falling,
}

/// The impulse counter element.
pub struct ImpulseCounter<I: InputPin> {
    input: I,
    level: ActiveLevel,
    edge: Edge,
    channel: [Channel; 1],
    debouncer: Debouncer,
    count: u64,
    save_delay: Duration,
}

impl<I: InputPin> ImpulseCounter<I> {
    /// Creates an [`ImpulseCounter`] counting rising edges of `input`.
    #[must_use]
    pub const fn new(input: I) -> Self {
        Self {
            input,
            level: ActiveLevel::High,
            edge: Edge::Rising,
            channel: [Channel::new(ChannelType::ImpulseCounter)],
            debouncer: Debouncer::new(false, DEBOUNCE),
            count: 0,
            save_delay: SAVE_DELAY,
        }
    }

    /// Sets the active level of the input.
    #[must_use]
    pub const fn with_level(mut self, level: ActiveLevel) -> Self {
        self.level = level;
        self
    }

    /// Sets the counted edge.
    #[must_use]
    pub const fn with_edge(mut self, edge: Edge) -> Self {
        self.edge = edge;
        self
    }

    /// Sets the debounce time.
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debouncer.set_hold(debounce);
        self
    }

    /// Sets the delay between a counted impulse and the state save.
    #[must_use]
    pub const fn with_save_delay(mut self, delay: Duration) -> Self {
        self.save_delay = delay;
        self
    }

    /// Returns the number of counted impulses.
    #[must_use]
    #[inline]
    pub const fn count(&self) -> u64 {
        self.count
    }

    fn set_count(&mut self, count: u64) {
        self.count = count;
        let _ = self.channel[0].set_counter(count);
    }
}

impl<I: InputPin> ChannelOwner for ImpulseCounter<I> {
    fn channels(&self) -> &[Channel] {
        &self.channel
    }

    fn channels_mut(&mut self) -> &mut [Channel] {
        &mut self.channel
    }
}

impl<I: InputPin> ActionHandler for ImpulseCounter<I> {
    fn handle_action(
        &mut self,
        _index: usize,
        action: Action,
        ctx: &mut Context<'_>,
    ) -> Result<(), Rejection> {
        match action {
            Action::Reset => {
                info!("{}: reset after {} impulses", self.channel[0], self.count);
                self.set_count(0);
                ctx.request_save(Duration::ZERO);
                Ok(())
            }
            _ => Err(Rejection::Unsupported),
        }
    }
}

impl<I: InputPin> TimerSubscriber for ImpulseCounter<I> {
    fn interest(&self) -> TimerInterest {
        TimerInterest::FAST
    }

    fn on_fast_timer(&mut self, ctx: &mut Context<'_>) {
        let active = match self.level.sample(&mut self.input) {
            Ok(active) => {
                let _ = self.channel[0].clear_flag(ChannelFlags::SENSOR_FAILURE);
                active
            }
            Err(e) => {
                if self.channel[0].set_flag(ChannelFlags::SENSOR_FAILURE) {
                    warn!("{}: input not readable: {e:?}", self.channel[0]);
                }
                return;
            }
        };

        let Some(active) = self.debouncer.update(ctx.now(), active) else {
            return;
        };

        let counted = match self.edge {
            Edge::Rising => active,
            Edge::Falling => !active,
        };

        if counted {
            self.set_count(self.count.wrapping_add(1));
            ctx.request_save(self.save_delay);
        }
    }
}

impl<I: InputPin + 'static> Element for ImpulseCounter<I> {
    fn name(&self) -> &'static str {
        "impulse-counter"
    }

    fn on_init(&mut self, _ctx: &mut Context<'_>) -> HookStatus {
        match self.level.sample(&mut self.input) {
            Ok(active) => {
                self.debouncer.reset(active);
                HookStatus::Ok
            }
            Err(e) => {
                warn!("{}: input not readable: {e:?}", self.channel[0]);
                let _ = self.channel[0].set_flag(ChannelFlags::SENSOR_FAILURE);
                HookStatus::Degraded
            }
        }
    }

    fn on_load_config(&mut self, config: &dyn ConfigSource) -> HookStatus {
        let Some(number) = self.channel[0].number() else {
            return HookStatus::Ok;
        };

        if let Some(debounce) = config.get_millis(&channel_key(number, "debounce")) {
            self.debouncer.set_hold(debounce);
        }

        match config.get_int(&channel_key(number, "edge")) {
            Some(0) => self.edge = Edge::Rising,
            Some(1) => self.edge = Edge::Falling,
            Some(value) => {
                warn!("{}: invalid edge {value}", self.channel[0]);
                return HookStatus::Degraded;
            }
            None => {}
        }

        HookStatus::Ok
    }

    fn on_load_state(&mut self, state: &mut StateReader<'_>) -> HookStatus {
        if let Some(count) = state.u64() {
            self.set_count(count);
        }
        HookStatus::Ok
    }

    fn on_save_state(&self, state: &mut StateWriter<'_>) {
        state.put_u64(self.count);
    }

    lares::capabilities!(channel_owner, action_handler, timer_subscriber);
}
