//! `lares-drivers` is a library crate that provides architecture-agnostic
//! [`lares`] elements for relays, valves, roller shutters and sensors.
//!
//! All elements drive their hardware through the [`embedded-hal`] traits
//! only, ensuring compatibility with any platform that supports these
//! abstractions. Every element is enabled by a cargo feature of the same
//! name.
//!
//! Hooks never block: timed sequences, such as a roller shutter reversing
//! direction, are state machines advanced by the runtime ticks and
//! timers.
//!
//! [`lares`]: https://crates.io/crates/lares
//! [`embedded-hal`]: https://crates.io/crates/embedded-hal

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![no_std]

extern crate alloc;

/// Pin levels, debouncing and unconnected inputs.
pub mod pin;

/// The binary sensor element.
#[cfg(feature = "binary_sensor")]
pub mod binary_sensor;

/// The impulse counter element.
#[cfg(feature = "impulse_counter")]
pub mod impulse_counter;

/// The relay element.
#[cfg(feature = "relay")]
pub mod relay;

/// The roller shutter element.
#[cfg(feature = "roller_shutter")]
pub mod roller_shutter;

/// The status LED element.
#[cfg(feature = "status_led")]
pub mod status_led;

/// The thermometer element.
#[cfg(feature = "thermometer")]
pub mod thermometer;

/// The thermostat element.
#[cfg(feature = "thermostat")]
pub mod thermostat;

/// The valve element.
#[cfg(feature = "valve")]
pub mod valve;

#[cfg(test)]
mod tests;
