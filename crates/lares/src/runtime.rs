use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec::Vec;

use core::fmt::Write;
use core::time::Duration;

use log::{debug, error, info, warn};

use crate::action::{self, ActionCommand, Rejection};
use crate::channel::{Channel, ChannelNumber, ChannelSnapshot};
use crate::clock::{Clock, Instant, PendingTicks, Periodic};
use crate::config::{ConfigChange, ConfigStore, ConfigValue};
use crate::element::{Context, Element, ElementId, Flow, TimerInterest};
use crate::error::{Error, ErrorKind, HookStatus};
use crate::gateway::{ConnectionState, Publisher};
use crate::state::{
    MAX_SECTION_LEN, MAX_STATE_LEN, SectionBuffer, StateBuffer, StateReader, StateWriter,
    decode_section, encode_section,
};
use crate::storage::{StateStore, Storage};

/// Maximum number of local actions routed in a row, chained actions
/// included. The remaining ones are dropped.
pub const MAX_LOCAL_ACTIONS: usize = 32;

/// How timer ticks reach the runtime.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TimerMode {
    /// The runtime derives timer ticks from its [`Clock`] on every tick.
    Internal,
    /// Hardware timers count ticks in a
    /// [`TimerTicks`](crate::clock::TimerTicks), and the control loop hands
    /// them over with [`Runtime::service_timers`].
    External,
}

/// Runtime parameters.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Interval between two periodic state saves.
    pub save_period: Duration,
    /// Delay between a configuration update and its write to storage.
    pub config_commit_delay: Duration,
    /// Period of the slow timer.
    pub slow_timer_period: Duration,
    /// Period of the fast timer.
    pub fast_timer_period: Duration,
    /// Source of timer ticks.
    pub timer_mode: TimerMode,
    /// Maximum number of late timer ticks replayed at once, per timer.
    pub max_timer_catch_up: u32,
    /// Maximum length of a persisted record, configuration included.
    pub max_record_len: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeConfig {
    /// Creates a [`RuntimeConfig`] with the default parameters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            save_period: Duration::from_secs(30),
            config_commit_delay: Duration::from_secs(5),
            slow_timer_period: Duration::from_secs(1),
            fast_timer_period: Duration::from_millis(10),
            timer_mode: TimerMode::Internal,
            max_timer_catch_up: 8,
            max_record_len: 1024,
        }
    }

    /// Sets the interval between two periodic state saves.
    #[must_use]
    pub const fn with_save_period(mut self, period: Duration) -> Self {
        self.save_period = period;
        self
    }

    /// Sets the delay before a configuration update is written.
    #[must_use]
    pub const fn with_config_commit_delay(mut self, delay: Duration) -> Self {
        self.config_commit_delay = delay;
        self
    }

    /// Sets the timer periods.
    #[must_use]
    pub const fn with_timer_periods(mut self, slow: Duration, fast: Duration) -> Self {
        self.slow_timer_period = slow;
        self.fast_timer_period = fast;
        self
    }

    /// Sets the source of timer ticks.
    #[must_use]
    pub const fn with_timer_mode(mut self, mode: TimerMode) -> Self {
        self.timer_mode = mode;
        self
    }

    /// Sets the maximum number of late timer ticks replayed at once.
    #[must_use]
    pub const fn with_max_timer_catch_up(mut self, ticks: u32) -> Self {
        self.max_timer_catch_up = ticks;
        self
    }
}

struct Entry {
    element: Box<dyn Element>,
    status: HookStatus,
}

impl Entry {
    fn report(&mut self, id: ElementId, hook: &str, status: HookStatus) {
        if status.is_degraded() && !self.status.is_degraded() {
            warn!("{} {id}: degraded during {hook}", self.element.name());
        }
        self.status = self.status.and(status);
    }
}

/// The element registry and cooperative scheduler.
///
/// Elements are registered during boot configuration, then
/// [`Runtime::boot`] freezes the registry and the control loop calls
/// [`Runtime::tick`] as often as it can. Within a tick elements are always
/// visited in registration order.
pub struct Runtime<S, P, C> {
    config: RuntimeConfig,
    storage: S,
    publisher: P,
    clock: C,
    entries: Vec<Entry>,
    owners: Vec<ElementId>,
    slow_subscribers: Vec<usize>,
    fast_subscribers: Vec<usize>,
    snapshot: ChannelSnapshot,
    device_config: ConfigStore,
    records: StateStore,
    state_buf: StateBuffer,
    section_buf: SectionBuffer,
    load_buf: Vec<u8>,
    local_actions: VecDeque<ActionCommand>,
    connection: ConnectionState,
    cursor: usize,
    booted: bool,
    slow_timer: Periodic,
    fast_timer: Periodic,
    last_save: Instant,
    save_at: Option<Instant>,
}

impl<S, P, C> Runtime<S, P, C>
where
    S: Storage,
    P: Publisher,
    C: Clock,
{
    /// Creates a [`Runtime`] with an empty registry.
    #[must_use]
    pub fn new(storage: S, publisher: P, clock: C, config: RuntimeConfig) -> Self {
        let records = StateStore::new(config.max_record_len);
        let slow_timer = Periodic::new(config.slow_timer_period);
        let fast_timer = Periodic::new(config.fast_timer_period);

        Self {
            config,
            storage,
            publisher,
            clock,
            entries: Vec::new(),
            owners: Vec::new(),
            slow_subscribers: Vec::new(),
            fast_subscribers: Vec::new(),
            snapshot: ChannelSnapshot::default(),
            device_config: ConfigStore::new(),
            records,
            state_buf: StateBuffer::new(),
            section_buf: SectionBuffer::new(),
            load_buf: alloc::vec![0; MAX_SECTION_LEN],
            local_actions: VecDeque::new(),
            connection: ConnectionState::Disconnected,
            cursor: 0,
            booted: false,
            slow_timer,
            fast_timer,
            last_save: Instant::ZERO,
            save_at: None,
        }
    }

    /// Registers an element and numbers its channels.
    ///
    /// Channel numbers follow registration order, starting from zero.
    ///
    /// # Errors
    ///
    /// Fails after [`Runtime::boot`], or when the channel numbers are
    /// exhausted.
    pub fn register(&mut self, mut element: Box<dyn Element>) -> Result<ElementId, Error> {
        if self.booted {
            return Err(Error::new(
                ErrorKind::RegistryFrozen,
                alloc::format!("`{}` registered after boot", element.name()),
            ));
        }

        let id = ElementId(self.entries.len());

        if let Some(owner) = element.as_channel_owner_mut() {
            let first = self.owners.len();
            let count = owner.channels().len();
            if first + count > usize::from(ChannelNumber::MAX) + 1 {
                return Err(Error::new(
                    ErrorKind::BufferOverflow,
                    "no channel number left",
                ));
            }

            for (offset, channel) in owner.channels_mut().iter_mut().enumerate() {
                // Bounded by the check above.
                channel.assign_number((first + offset) as ChannelNumber);
                self.owners.push(id);
            }
        }

        debug!("{} registered as {id}", element.name());
        self.entries.push(Entry {
            element,
            status: HookStatus::Ok,
        });

        Ok(id)
    }

    /// Freezes the registry and runs the boot sequence.
    ///
    /// The stored configuration is loaded, then every element runs
    /// [`Element::on_init`], then every element runs
    /// [`Element::on_load_config`], then every element runs
    /// [`Element::on_load_state`]. Missing or corrupted records, and records
    /// saved under another [`Element::state_tag`], only make elements fall
    /// back to their defaults.
    ///
    /// # Errors
    ///
    /// Fails when the runtime already booted.
    pub fn boot(&mut self) -> Result<(), Error> {
        if self.booted {
            return Err(Error::new(ErrorKind::RegistryFrozen, "runtime already booted"));
        }
        self.booted = true;

        let now = self.clock.now();

        // Values set before boot override the stored ones.
        let early = core::mem::take(&mut self.device_config);
        self.device_config = ConfigStore::load(&mut self.storage, &mut self.records);
        if !self.device_config.merge(&early).is_empty() {
            self.device_config
                .schedule_commit(now, self.config.config_commit_delay);
        }

        self.snapshot = ChannelSnapshot::with_capacity(self.owners.len());

        for (index, entry) in self.entries.iter_mut().enumerate() {
            if let Some(subscriber) = entry.element.as_timer_subscriber() {
                let interest = subscriber.interest();
                if interest.contains(TimerInterest::SLOW) {
                    self.slow_subscribers.push(index);
                }
                if interest.contains(TimerInterest::FAST) {
                    self.fast_subscribers.push(index);
                }
            }
        }

        let mut save_request = None;
        for (index, entry) in self.entries.iter_mut().enumerate() {
            let mut ctx = Context::new(now, self.connection, &self.snapshot);
            let status = entry.element.on_init(&mut ctx);
            entry.report(ElementId(index), "init", status);
            save_request = earliest(save_request, ctx.take_save_request());
            self.local_actions.extend(ctx.take_emitted());
        }

        for (index, entry) in self.entries.iter_mut().enumerate() {
            let status = entry.element.on_load_config(&self.device_config);
            entry.report(ElementId(index), "configuration load", status);
        }

        for index in 0..self.entries.len() {
            let key = state_key(index);
            let restored = match self.records.load(&mut self.storage, &key, &mut self.load_buf) {
                Ok(restored) => restored,
                Err(e) => {
                    warn!("State of element #{index} not readable: {e}");
                    None
                }
            };

            let entry = &mut self.entries[index];
            let tag = entry.element.state_tag();
            let section = restored.map(|len| &self.load_buf[..len]);

            let mut reader = match section.map(|section| decode_section(tag, section)) {
                Some(Some(state)) => StateReader::new(state),
                Some(None) => {
                    warn!(
                        "{} #{index}: saved state does not match `{tag}`, using defaults",
                        entry.element.name()
                    );
                    StateReader::empty()
                }
                None => StateReader::empty(),
            };

            let status = entry.element.on_load_state(&mut reader);
            entry.report(ElementId(index), "state load", status);
        }

        self.last_save = now;
        if let Some(after) = save_request {
            self.schedule_save_at(now + after);
        }
        self.run_local_actions();
        self.refresh_snapshot();

        info!(
            "Runtime booted with {} elements and {} channels",
            self.entries.len(),
            self.owners.len()
        );

        Ok(())
    }

    /// Runs one pass of the control loop.
    ///
    /// Commits a due configuration write, runs the timer hooks in
    /// [`TimerMode::Internal`], runs [`Element::iterate_always`] on every
    /// element, saves the state when due, runs
    /// [`Element::iterate_connected`] while the connection is up, and
    /// finally commits the channel snapshot read by the next tick.
    pub fn tick(&mut self) {
        if !self.booted {
            return;
        }

        let now = self.clock.now();

        if let Err(e) =
            self.device_config
                .commit_if_due(now, &mut self.storage, &mut self.records)
        {
            error!("Configuration not saved, retrying later: {e}");
            self.device_config
                .postpone_commit(now + self.config.save_period);
        }

        if self.config.timer_mode == TimerMode::Internal {
            let pending = PendingTicks {
                slow: self.slow_timer.poll(now),
                fast: self.fast_timer.poll(now),
            };
            self.run_timers(now, pending);
        }

        let mut save_request = None;
        for entry in &mut self.entries {
            let mut ctx = Context::new(now, self.connection, &self.snapshot);
            entry.element.iterate_always(&mut ctx);
            save_request = earliest(save_request, ctx.take_save_request());
            self.local_actions.extend(ctx.take_emitted());
        }
        if let Some(after) = save_request {
            self.schedule_save_at(now + after);
        }
        self.run_local_actions();

        if self.is_save_due(now) {
            let _ = self.save_all(now);
        }

        if self.connection.is_online() {
            self.iterate_connected();
        }

        self.refresh_snapshot();
    }

    /// Runs the timer hooks for ticks counted by hardware timers.
    ///
    /// At most [`RuntimeConfig::max_timer_catch_up`] ticks per timer are
    /// replayed, the others are dropped.
    pub fn service_timers(&mut self, pending: PendingTicks) {
        if !self.booted || pending.is_empty() {
            return;
        }
        let now = self.clock.now();
        self.run_timers(now, pending);
    }

    fn run_timers(&mut self, now: Instant, pending: PendingTicks) {
        let slow = self.clamp_ticks(pending.slow, "slow");
        let fast = self.clamp_ticks(pending.fast, "fast");

        let mut save_request = None;

        for _ in 0..fast {
            for &index in &self.fast_subscribers {
                if let Some(subscriber) = self.entries[index].element.as_timer_subscriber() {
                    let mut ctx = Context::new(now, self.connection, &self.snapshot);
                    subscriber.on_fast_timer(&mut ctx);
                    save_request = earliest(save_request, ctx.take_save_request());
                    self.local_actions.extend(ctx.take_emitted());
                }
            }
        }

        for _ in 0..slow {
            for &index in &self.slow_subscribers {
                if let Some(subscriber) = self.entries[index].element.as_timer_subscriber() {
                    let mut ctx = Context::new(now, self.connection, &self.snapshot);
                    subscriber.on_timer(&mut ctx);
                    save_request = earliest(save_request, ctx.take_save_request());
                    self.local_actions.extend(ctx.take_emitted());
                }
            }
        }

        if let Some(after) = save_request {
            self.schedule_save_at(now + after);
        }
        self.run_local_actions();
    }

    fn clamp_ticks(&self, ticks: u32, timer: &str) -> u32 {
        if ticks > self.config.max_timer_catch_up {
            debug!(
                "Dropping {} late {timer} timer ticks",
                ticks - self.config.max_timer_catch_up
            );
        }
        ticks.min(self.config.max_timer_catch_up)
    }

    // Visits the elements starting from the cursor. The first element
    // that uses the connection ends the pass, and the next tick resumes
    // from its successor.
    fn iterate_connected(&mut self) {
        let count = self.entries.len();
        let mut index = self.cursor;

        while index < count {
            let flow = self.entries[index]
                .element
                .iterate_connected(&mut self.publisher);
            index += 1;

            if flow == Flow::Yield {
                self.cursor = if index >= count { 0 } else { index };
                return;
            }
        }

        self.cursor = 0;
    }

    fn refresh_snapshot(&mut self) {
        for entry in &self.entries {
            if let Some(owner) = entry.element.as_channel_owner() {
                for channel in owner.channels() {
                    self.snapshot.commit(channel);
                }
            }
        }
    }

    /// Updates the connection state.
    ///
    /// Every element runs [`Element::on_registered`] on each transition
    /// into [`ConnectionState::Registered`].
    pub fn set_connection_state(&mut self, state: ConnectionState) {
        if state == self.connection {
            return;
        }

        info!("Connection state: {} -> {state}", self.connection);
        self.connection = state;

        if !state.is_online() {
            self.cursor = 0;
        }

        if state == ConnectionState::Registered {
            for entry in &mut self.entries {
                entry.element.on_registered();
            }
        }
    }

    /// Routes a command to the element owning the target channel.
    ///
    /// # Errors
    ///
    /// Rejects every command before [`Runtime::boot`], commands for unknown
    /// channels, and forwards the rejections of the owning element.
    pub fn handle_action(&mut self, command: ActionCommand) -> Result<(), Rejection> {
        self.check_booted(&command)?;
        let result = self.route(command);
        self.run_local_actions();
        result
    }

    fn route(&mut self, command: ActionCommand) -> Result<(), Rejection> {
        let Some(&owner) = self.owners.get(usize::from(command.channel)) else {
            warn!(
                "Action `{}` rejected: no channel {}",
                command.action, command.channel
            );
            return Err(Rejection::UnknownChannel);
        };
        self.dispatch(owner, command)
    }

    /// Sends a command to a specific element.
    ///
    /// # Errors
    ///
    /// Rejects every command before [`Runtime::boot`], commands for
    /// channels the element does not own, commands for elements that do not
    /// handle actions, and forwards the rejections of the element.
    pub fn dispatch_to(&mut self, id: ElementId, command: ActionCommand) -> Result<(), Rejection> {
        self.check_booted(&command)?;
        let result = self.dispatch(id, command);
        self.run_local_actions();
        result
    }

    fn dispatch(&mut self, id: ElementId, command: ActionCommand) -> Result<(), Rejection> {
        let now = self.clock.now();

        let Some(entry) = self.entries.get_mut(id.0) else {
            return Err(Rejection::UnknownChannel);
        };

        let Some(handler) = entry.element.as_action_handler() else {
            warn!(
                "Action `{}` rejected: element {id} takes no action",
                command.action
            );
            return Err(Rejection::Unsupported);
        };

        let mut ctx = Context::new(now, self.connection, &self.snapshot);
        let result = action::dispatch(handler, command, &mut ctx);
        let save_request = ctx.take_save_request();
        self.local_actions.extend(ctx.take_emitted());

        if let Some(after) = save_request {
            self.schedule_save_at(now + after);
        }

        result
    }

    // Routes the actions emitted by the elements, and the ones they emit
    // in turn, in emission order.
    fn run_local_actions(&mut self) {
        let mut routed = 0;

        while let Some(command) = self.local_actions.pop_front() {
            if routed == MAX_LOCAL_ACTIONS {
                warn!(
                    "Dropping {} local actions, too many chained actions",
                    self.local_actions.len() + 1
                );
                self.local_actions.clear();
                return;
            }
            routed += 1;

            debug!(
                "Local action `{}` for channel {}",
                command.action, command.channel
            );
            if let Err(rejection) = self.route(command) {
                debug!(
                    "Local action `{}` for channel {} rejected: {rejection}",
                    command.action, command.channel
                );
            }
        }
    }

    fn check_booted(&self, command: &ActionCommand) -> Result<(), Rejection> {
        if self.booted {
            return Ok(());
        }
        warn!("Action `{}` rejected: runtime not booted", command.action);
        Err(Rejection::Blocked)
    }

    /// Stores a configuration value and notifies the elements.
    ///
    /// Returns whether the value changed. A changed value is written to
    /// storage after [`RuntimeConfig::config_commit_delay`]. Values set
    /// before boot override the stored configuration.
    ///
    /// # Errors
    ///
    /// Fails when the key is invalid.
    pub fn update_config(
        &mut self,
        key: &str,
        value: impl Into<ConfigValue>,
    ) -> Result<bool, Error> {
        if !self.device_config.set(key, value)? {
            return Ok(false);
        }

        let change = ConfigChange::from_keys([key]);
        self.config_changed(&change);
        Ok(true)
    }

    /// Merges a whole configuration and notifies the elements.
    ///
    /// Returns the changed keys.
    pub fn apply_config(&mut self, config: &ConfigStore) -> ConfigChange {
        let change = self.device_config.merge(config);
        if !change.is_empty() {
            self.config_changed(&change);
        }
        change
    }

    fn config_changed(&mut self, change: &ConfigChange) {
        let now = self.clock.now();
        self.device_config
            .schedule_commit(now, self.config.config_commit_delay);

        if !self.booted {
            return;
        }

        for (index, entry) in self.entries.iter_mut().enumerate() {
            let status = entry
                .element
                .on_device_config_change(change, &self.device_config);
            entry.report(ElementId(index), "configuration change", status);
        }
    }

    /// Brings the next state save forward to `delay` from now.
    pub fn schedule_save(&mut self, delay: Duration) {
        let now = self.clock.now();
        self.schedule_save_at(now + delay);
    }

    fn schedule_save_at(&mut self, at: Instant) {
        self.save_at = Some(self.save_at.map_or(at, |scheduled| scheduled.min(at)));
    }

    fn is_save_due(&self, now: Instant) -> bool {
        now.has_elapsed(self.last_save, self.config.save_period)
            || self.save_at.is_some_and(|at| now >= at)
    }

    /// Saves the state of every element right away.
    ///
    /// Returns the number of records written: unchanged records are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns the first failure, after every element was attempted.
    /// Failed records keep their previous version and are saved again on
    /// the next cycle.
    pub fn save_state(&mut self) -> Result<usize, Error> {
        let now = self.clock.now();
        self.save_all(now)
    }

    fn save_all(&mut self, now: Instant) -> Result<usize, Error> {
        let mut written = 0;
        let mut failure = None;

        for (index, entry) in self.entries.iter().enumerate() {
            let mut writer = StateWriter::new(&mut self.state_buf);
            entry.element.on_save_state(&mut writer);

            if writer.overflowed() {
                error!(
                    "{} #{index}: state exceeds {MAX_STATE_LEN} bytes, not saved",
                    entry.element.name()
                );
                continue;
            }

            // Stateless elements have no record.
            if writer.as_bytes().is_empty() {
                continue;
            }

            if !encode_section(
                entry.element.state_tag(),
                self.state_buf.as_slice(),
                &mut self.section_buf,
            ) {
                continue;
            }

            let key = state_key(index);
            match self
                .records
                .save(&mut self.storage, &key, self.section_buf.as_slice())
            {
                Ok(true) => written += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("{} #{index}: state not saved: {e}", entry.element.name());
                    let _ = failure.get_or_insert(e);
                }
            }
        }

        self.last_save = now;
        self.save_at = None;

        if written > 0 {
            debug!("Saved {written} state records");
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    /// Prepares the device for an intentional restart.
    ///
    /// Every element runs [`Element::on_soft_reset`], then the state is
    /// saved and the configuration written.
    ///
    /// # Errors
    ///
    /// Returns the first storage failure.
    pub fn soft_reset(&mut self) -> Result<(), Error> {
        let now = self.clock.now();
        info!("Soft reset requested");

        for entry in &mut self.entries {
            let mut ctx = Context::new(now, self.connection, &self.snapshot);
            entry.element.on_soft_reset(&mut ctx);
            self.local_actions.extend(ctx.take_emitted());
        }
        self.run_local_actions();

        let saved = self.save_all(now);
        let committed = if self.device_config.is_dirty() {
            self.device_config
                .commit(&mut self.storage, &mut self.records)
                .map(|_| ())
        } else {
            Ok(())
        };

        saved.map(|_| ()).and(committed)
    }

    /// Returns the connection state.
    #[must_use]
    #[inline]
    pub const fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Whether [`Runtime::boot`] ran.
    #[must_use]
    #[inline]
    pub const fn is_booted(&self) -> bool {
        self.booted
    }

    /// Returns the number of registered elements.
    #[must_use]
    #[inline]
    pub fn element_count(&self) -> usize {
        self.entries.len()
    }

    /// Returns the number of registered channels.
    #[must_use]
    #[inline]
    pub fn channel_count(&self) -> usize {
        self.owners.len()
    }

    /// Returns a registered element.
    #[must_use]
    pub fn element(&self, id: ElementId) -> Option<&dyn Element> {
        self.entries.get(id.0).map(|entry| entry.element.as_ref())
    }

    /// Returns the element owning a channel.
    #[must_use]
    #[inline]
    pub fn owner(&self, channel: ChannelNumber) -> Option<ElementId> {
        self.owners.get(usize::from(channel)).copied()
    }

    /// Returns a channel by number.
    #[must_use]
    pub fn channel(&self, number: ChannelNumber) -> Option<&Channel> {
        let owner = self.element(self.owner(number)?)?.as_channel_owner()?;
        let index = owner.local_index(number)?;
        owner.channels().get(index)
    }

    /// Returns the worst status an element reported.
    #[must_use]
    pub fn status(&self, id: ElementId) -> Option<HookStatus> {
        self.entries.get(id.0).map(|entry| entry.status)
    }

    /// Returns the elements running degraded.
    pub fn degraded(&self) -> impl Iterator<Item = ElementId> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.status.is_degraded())
            .map(|(index, _)| ElementId(index))
    }

    /// Whether some channel has an update waiting to be published.
    #[must_use]
    pub fn is_any_update_pending(&self) -> bool {
        self.entries
            .iter()
            .filter_map(|entry| entry.element.as_channel_owner())
            .flat_map(|owner| owner.channels())
            .any(Channel::is_pending)
    }

    /// Returns the channel states committed by the last tick.
    #[must_use]
    #[inline]
    pub const fn snapshot(&self) -> &ChannelSnapshot {
        &self.snapshot
    }

    /// Returns the device configuration.
    #[must_use]
    #[inline]
    pub const fn device_config(&self) -> &ConfigStore {
        &self.device_config
    }

    /// Returns the runtime parameters.
    #[must_use]
    #[inline]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Returns the publisher.
    #[must_use]
    #[inline]
    pub const fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Returns the publisher for mutation.
    #[must_use]
    #[inline]
    pub fn publisher_mut(&mut self) -> &mut P {
        &mut self.publisher
    }

    /// Returns the clock.
    #[must_use]
    #[inline]
    pub const fn clock(&self) -> &C {
        &self.clock
    }

    /// Returns the storage.
    #[must_use]
    #[inline]
    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }
}

fn state_key(index: usize) -> heapless::String<16> {
    let mut key = heapless::String::new();
    let _ = write!(key, "state_{index}");
    key
}

fn earliest(current: Option<Duration>, request: Option<Duration>) -> Option<Duration> {
    match (current, request) {
        (Some(current), Some(request)) => Some(current.min(request)),
        (current, request) => current.or(request),
    }
}
