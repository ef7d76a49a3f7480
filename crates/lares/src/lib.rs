//! The element runtime of a connected embedded device.
//!
//! A device is a set of elements, the hardware-facing components such as
//! relays, valves, roller shutters and sensors, driven by a single
//! cooperative control loop. This crate provides APIs to:
//!
//! - Describe elements through the [`Element`](element::Element) lifecycle
//!   contract and its optional capabilities: owning channels, accepting
//!   actions and reacting to timers.
//! - Model channels, the remotely visible endpoints of an element, with
//!   their value, their flags and their pending publication.
//! - Register elements into a [`Runtime`](runtime::Runtime) that boots
//!   them, iterates them in registration order, publishes their changes
//!   while a gateway connection is up, and routes inbound actions.
//! - Persist the operational state of every element and the device
//!   configuration through a [`Storage`](storage::Storage) backend with
//!   double-buffered, checksummed records that survive a power loss during
//!   a write.
//!
//! Hardware access, transports and storage media belong to the platform.
//! The runtime only sees them through the [`Clock`](clock::Clock),
//! [`Storage`](storage::Storage) and [`Publisher`](gateway::Publisher)
//! traits.
//!
//! This crate can be compiled for both `std` and `no_std` environments.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![no_std]

extern crate alloc;

/// Inbound actions and their dispatch.
pub mod action;
/// Channels, their values and their flags.
pub mod channel;
/// Monotonic time and timer ticks.
pub mod clock;
/// Device configuration.
pub mod config;
/// The element lifecycle contract.
pub mod element;
/// Error types.
pub mod error;
/// The boundary with the remote gateway.
pub mod gateway;
/// The element registry and the control loop.
pub mod runtime;
/// Encoding of the element operational state.
pub mod state;
/// Persistent records on a storage backend.
pub mod storage;

#[cfg(test)]
pub(crate) fn serialize<T: serde::Serialize>(value: T) -> serde_json::Value {
    serde_json::to_value(value).unwrap()
}

#[cfg(test)]
pub(crate) fn deserialize<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> T {
    serde_json::from_value(value).unwrap()
}
