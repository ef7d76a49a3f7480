//! A simulated node with a relay, a status LED and an energy meter impulse
//! counter, all wired to virtual pins.
//!
//! A transport task connects after a few seconds, prints every channel
//! update as JSON and toggles the relay from time to time, while the
//! meter input pulses once per second. Stop it with `Ctrl-C`: the state is
//! saved and restored by the next run.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use lares::action::{Action, ActionCommand};
use lares::channel::ChannelState;
use lares::gateway::ConnectionState;
use lares::runtime::{Runtime, RuntimeConfig};

use lares_drivers::impulse_counter::ImpulseCounter;
use lares_drivers::relay::Relay;
use lares_drivers::status_led::StatusLed;

use lares_os::clock::StdClock;
use lares_os::config::ConfigFile;
use lares_os::error::Result;
use lares_os::gateway::{ActionRequest, QueueGateway};
use lares_os::gpio::{VirtualInput, VirtualPin};
use lares_os::logging;
use lares_os::runner::{Runner, shutdown_signal};
use lares_os::storage::FileStorage;

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep};

use tracing::{Level, info, warn};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory holding the saved state and configuration.
    #[arg(long, default_value = "lares-state")]
    state_dir: PathBuf,

    /// JSON configuration file, applied at boot and whenever it changes.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print debug messages.
    #[arg(short, long)]
    verbose: bool,
}

async fn transport(
    connection: watch::Sender<ConnectionState>,
    actions: mpsc::Sender<ActionRequest>,
    mut updates: mpsc::Receiver<ChannelState>,
) -> Result<()> {
    for state in [
        ConnectionState::Connecting,
        ConnectionState::Connected,
        ConnectionState::Registered,
    ] {
        sleep(Duration::from_secs(2)).await;
        if connection.send(state).is_err() {
            return Ok(());
        }
    }

    let mut toggle = interval(Duration::from_secs(10));
    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(update) = update else {
                    return Ok(());
                };
                info!("Channel update: {}", serde_json::to_string(&update)?);
            }
            _ = toggle.tick() => {
                let (request, outcome) =
                    ActionRequest::with_reply(ActionCommand::new(0, Action::Toggle));
                if actions.send(request).await.is_err() {
                    return Ok(());
                }
                if let Ok(Err(rejection)) = outcome.await {
                    warn!("Toggle rejected: {rejection}");
                }
            }
        }
    }
}

async fn meter(input: VirtualInput) {
    loop {
        sleep(Duration::from_millis(500)).await;
        input.set(true);
        sleep(Duration::from_millis(500)).await;
        input.set(false);
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    })?;

    let storage = FileStorage::open(&cli.state_dir)?;
    let (gateway, updates) = QueueGateway::new();
    let mut runtime = Runtime::new(storage, gateway, StdClock::new(), RuntimeConfig::new());

    let meter_input = VirtualInput::new("meter");
    let _ = runtime.register(Box::new(Relay::new().with_output(VirtualPin::new("relay"))))?;
    let _ = runtime.register(Box::new(ImpulseCounter::new(meter_input.clone())))?;
    let _ = runtime.register(Box::new(StatusLed::new(VirtualPin::new("led"))))?;

    let (connection, connection_receiver) = watch::channel(ConnectionState::Disconnected);
    let (actions, action_receiver) = mpsc::channel(8);

    let mut runner = Runner::new(runtime)
        .with_connection(connection_receiver)
        .with_actions(action_receiver);
    if let Some(path) = cli.config {
        runner = runner.with_config_file(ConfigFile::new(path));
    }

    let transport_task = tokio::spawn(transport(connection, actions, updates));
    let meter_task = tokio::spawn(meter(meter_input));

    runner.run(shutdown_signal()).await?;

    meter_task.abort();
    transport_task.abort();

    Ok(())
}
