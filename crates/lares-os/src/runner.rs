use std::future::pending;
use std::pin::pin;
use std::time::Duration;

use lares::clock::{Clock, TimerTicks};
use lares::gateway::{ConnectionState, Publisher};
use lares::runtime::{Runtime, TimerMode};
use lares::storage::Storage;

use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};

use tracing::{debug, error, info, warn};

use crate::config::ConfigFile;
use crate::error::Result;
use crate::gateway::ActionRequest;

/// Default period of the control loop.
pub const TICK_PERIOD: Duration = Duration::from_millis(5);

/// Default period between two checks of the configuration file.
pub const CONFIG_POLL_PERIOD: Duration = Duration::from_secs(1);

async fn next_connection_state(
    connection: &mut Option<watch::Receiver<ConnectionState>>,
) -> Option<ConnectionState> {
    match connection {
        Some(receiver) => match receiver.changed().await {
            Ok(()) => Some(*receiver.borrow_and_update()),
            Err(_) => None,
        },
        None => pending().await,
    }
}

async fn next_action(
    actions: &mut Option<mpsc::Receiver<ActionRequest>>,
) -> Option<ActionRequest> {
    match actions {
        Some(receiver) => receiver.recv().await,
        None => pending().await,
    }
}

/// Completes when the process receives a termination request (`Ctrl-C`).
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Termination requested"),
        Err(e) => {
            error!("Unable to listen for termination requests: {e}");
            pending::<()>().await;
        }
    }
}

/// Drives a [`Runtime`] on a `tokio` executor.
///
/// A single task ticks the runtime, counts timer ticks, forwards
/// connection state changes and inbound actions, and applies the
/// configuration file, so element hooks never run concurrently.
///
/// In [`TimerMode::External`] the runner counts the slow and fast timer
/// ticks itself and hands them to the runtime before every loop tick. In
/// [`TimerMode::Internal`] the runtime derives them from its clock.
pub struct Runner<S, P, C> {
    runtime: Runtime<S, P, C>,
    ticks: TimerTicks,
    tick_period: Duration,
    connection: Option<watch::Receiver<ConnectionState>>,
    actions: Option<mpsc::Receiver<ActionRequest>>,
    config_file: Option<ConfigFile>,
    config_poll_period: Duration,
}

impl<S, P, C> Runner<S, P, C>
where
    S: Storage,
    P: Publisher,
    C: Clock,
{
    /// Creates a [`Runner`] for a runtime whose elements are registered.
    #[must_use]
    pub fn new(runtime: Runtime<S, P, C>) -> Self {
        Self {
            runtime,
            ticks: TimerTicks::new(),
            tick_period: TICK_PERIOD,
            connection: None,
            actions: None,
            config_file: None,
            config_poll_period: CONFIG_POLL_PERIOD,
        }
    }

    /// Sets the period of the control loop.
    #[must_use]
    pub const fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    /// Follows the connection state published by the transport.
    #[must_use]
    pub fn with_connection(mut self, connection: watch::Receiver<ConnectionState>) -> Self {
        self.connection = Some(connection);
        self
    }

    /// Serves the actions received by the transport.
    #[must_use]
    pub fn with_actions(mut self, actions: mpsc::Receiver<ActionRequest>) -> Self {
        self.actions = Some(actions);
        self
    }

    /// Applies a configuration file at boot and whenever it changes.
    #[must_use]
    pub fn with_config_file(mut self, file: ConfigFile) -> Self {
        self.config_file = Some(file);
        self
    }

    /// Sets the period between two checks of the configuration file.
    #[must_use]
    pub const fn with_config_poll_period(mut self, period: Duration) -> Self {
        self.config_poll_period = period;
        self
    }

    /// Returns the runtime.
    #[must_use]
    #[inline]
    pub const fn runtime(&self) -> &Runtime<S, P, C> {
        &self.runtime
    }

    /// Returns the runtime mutably.
    #[inline]
    pub fn runtime_mut(&mut self) -> &mut Runtime<S, P, C> {
        &mut self.runtime
    }

    /// Consumes the runner, returning the runtime.
    #[must_use]
    #[inline]
    pub fn into_runtime(self) -> Runtime<S, P, C> {
        self.runtime
    }

    /// Boots the runtime when needed, then runs the control loop until
    /// `shutdown` completes.
    ///
    /// On shutdown the runtime goes through a soft reset, so the state of
    /// every element and the configuration are written.
    ///
    /// # Errors
    ///
    /// Fails when the runtime cannot boot, or when the final state or
    /// configuration write fails.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) -> Result<()> {
        if !self.runtime.is_booted() {
            self.poll_config_file();
            self.runtime.boot()?;
        }

        // The transport may have moved on before the loop started.
        if let Some(receiver) = self.connection.as_mut() {
            let state = *receiver.borrow_and_update();
            self.runtime.set_connection_state(state);
        }

        let external = self.runtime.config().timer_mode == TimerMode::External;
        let start = Instant::now();

        let mut tick = time::interval(self.tick_period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let slow_period = self.runtime.config().slow_timer_period;
        let fast_period = self.runtime.config().fast_timer_period;
        let mut slow = time::interval_at(start + slow_period, slow_period);
        let mut fast = time::interval_at(start + fast_period, fast_period);

        let mut config_poll =
            time::interval_at(start + self.config_poll_period, self.config_poll_period);
        config_poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut shutdown = pin!(shutdown);

        info!("Control loop started");

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = tick.tick() => {
                    self.runtime.service_timers(self.ticks.take());
                    self.runtime.tick();
                }
                _ = slow.tick(), if external => self.ticks.signal_slow(),
                _ = fast.tick(), if external => self.ticks.signal_fast(),
                state = next_connection_state(&mut self.connection) => match state {
                    Some(state) => self.runtime.set_connection_state(state),
                    None => {
                        warn!("Transport gone, going offline");
                        self.connection = None;
                        self.runtime.set_connection_state(ConnectionState::Disconnected);
                    }
                },
                request = next_action(&mut self.actions) => match request {
                    Some(request) => self.handle_action(request),
                    None => {
                        debug!("No more inbound actions");
                        self.actions = None;
                    }
                },
                _ = config_poll.tick(), if self.config_file.is_some() => self.poll_config_file(),
            }
        }

        info!("Control loop stopped, saving");
        self.runtime.soft_reset()?;

        Ok(())
    }

    fn handle_action(&mut self, request: ActionRequest) {
        let command = request.command;
        debug!(
            channel = command.channel,
            "Action `{}` received", command.action
        );
        let outcome = self.runtime.handle_action(command);
        request.respond(outcome);
    }

    fn poll_config_file(&mut self) {
        let Some(file) = self.config_file.as_mut() else {
            return;
        };

        match file.poll() {
            Ok(Some(config)) => {
                let change = self.runtime.apply_config(&config);
                if !change.is_empty() {
                    info!(
                        "{} configuration values changed by {}",
                        change.keys().count(),
                        file.path().display()
                    );
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Ignoring {}: {e}", file.path().display()),
        }
    }
}
