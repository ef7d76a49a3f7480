use core::fmt;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelState;
use crate::error::Error;

/// State of the connection with the remote gateway.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    /// No transport is available.
    #[default]
    Disconnected,
    /// The transport is being set up.
    Connecting,
    /// The transport is up and the handshake is in progress.
    Connected,
    /// The handshake completed and channel updates are accepted.
    Registered,
}

impl ConnectionState {
    /// Whether channel updates can be exchanged.
    #[must_use]
    #[inline]
    pub const fn is_online(self) -> bool {
        matches!(self, Self::Connected | Self::Registered)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Registered => "registered",
        }
        .fmt(f)
    }
}

/// Outbound side of the remote gateway.
///
/// The wire encoding belongs to the implementation. A publication must not
/// block: an implementation that cannot accept the update right away
/// returns an error and the channel stays pending.
pub trait Publisher {
    /// Publishes a channel update.
    ///
    /// # Errors
    ///
    /// Fails when the update cannot be accepted.
    fn publish(&mut self, update: &ChannelState) -> Result<(), Error>;
}

impl<P: Publisher + ?Sized> Publisher for &mut P {
    fn publish(&mut self, update: &ChannelState) -> Result<(), Error> {
        (**self).publish(update)
    }
}
