//! The `lares-os` library crate runs [`lares`] devices on operating
//! systems, for development, simulation and gateways hosting local
//! elements.
//!
//! It provides the host side collaborators of the runtime:
//!
//! - [`FileStorage`](storage::FileStorage), storing every record in its
//!   own file and replacing files atomically
//! - [`ConfigFile`](config::ConfigFile), a JSON configuration file watched
//!   for changes
//! - [`StdClock`](clock::StdClock), a monotonic clock
//! - [`QueueGateway`](gateway::QueueGateway), handing channel updates to
//!   an asynchronous transport task
//! - [`VirtualPin`](gpio::VirtualPin) and
//!   [`VirtualInput`](gpio::VirtualInput), in-memory digital pins for
//!   running drivers without hardware
//!
//! The [`Runner`](runner::Runner) drives the control loop on a `tokio`
//! executor. Timers, connection state changes, inbound actions and
//! configuration changes are all served from a single task, so elements
//! still run one at a time.
//!
//! [`lares`]: https://crates.io/crates/lares

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// A monotonic clock.
pub mod clock;
/// Configuration file.
pub mod config;
/// Error management.
pub mod error;
/// Channel updates towards a transport task and inbound actions.
pub mod gateway;
/// In-memory digital pins.
pub mod gpio;
/// Logging setup.
pub mod logging;
/// The control loop.
pub mod runner;
/// File backed storage.
pub mod storage;
