use tracing::Level;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::{Error, Result};

/// Installs a terminal logger printing events up to `level`.
///
/// Records of the `log` facade, used by the runtime and the drivers, are
/// printed by the same logger.
///
/// # Errors
///
/// Fails when a logger is already installed.
pub fn init(level: Level) -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .finish()
        .try_init()
        .map_err(|_| Error::Logger)
}
