//! # Thermometer
//!
//! An element reporting the readings of a temperature sensor, optionally
//! paired with a humidity sensor.
//!
//! The sensor protocol is hidden behind [`TemperatureSource`], so any bus
//! driver can feed the element. The sensor is read at boot and then every
//! refresh interval.
//!
//! A failed read reports [`TEMPERATURE_NOT_AVAILABLE`] and raises
//! [`ChannelFlags::SENSOR_FAILURE`].
//!
//! Readings are corrected by the `corr_<n>` and `hcorr_<n>` configuration
//! keys, in tenths of a degree and tenths of a percent.

use core::fmt::{Debug, Write};
use core::time::Duration;

use log::{debug, warn};

use lares::channel::{
    Channel, ChannelFlags, ChannelNumber, ChannelType, HUMIDITY_NOT_AVAILABLE,
    TEMPERATURE_NOT_AVAILABLE,
};
use lares::clock::Periodic;
use lares::config::{ConfigKey, ConfigSource};
use lares::element::{ChannelOwner, Context, Element};
use lares::error::HookStatus;

/// Default time between two reads.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// A measurement.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Reading {
    /// Temperature in degrees Celsius.
    pub temperature: f64,
    /// Relative humidity in percent, for sensors measuring it.
    pub humidity: Option<f64>,
}

impl Reading {
    /// Creates a temperature only [`Reading`].
    #[must_use]
    #[inline]
    pub const fn temperature(temperature: f64) -> Self {
        Self {
            temperature,
            humidity: None,
        }
    }

    /// Creates a temperature and humidity [`Reading`].
    #[must_use]
    #[inline]
    pub const fn with_humidity(temperature: f64, humidity: f64) -> Self {
        Self {
            temperature,
            humidity: Some(humidity),
        }
    }
}

/// A temperature sensor.
///
/// A read must not block for long: sensors needing a conversion time are
/// expected to start it on one read and collect it on the next.
pub trait TemperatureSource {
    /// Sensor error.
    type Error: Debug;

    /// Reads the sensor.
    ///
    /// # Errors
    ///
    /// Fails when the sensor does not respond or the data is invalid.
    fn read(&mut self) -> Result<Reading, Self::Error>;
}

/// The thermometer element.
pub struct Thermometer<S: TemperatureSource> {
    source: S,
    channel: [Channel; 1],
    refresh: Periodic,
    last: Option<Reading>,
}

impl<S: TemperatureSource> Thermometer<S> {
    /// Creates a [`Thermometer`] reporting temperature only.
    #[must_use]
    pub const fn new(source: S) -> Self {
        Self::with_kind(source, ChannelType::Thermometer)
    }

    /// Creates a [`Thermometer`] reporting temperature and humidity.
    #[must_use]
    pub const fn hygrometer(source: S) -> Self {
        Self::with_kind(source, ChannelType::ThermHygrometer)
    }

    const fn with_kind(source: S, kind: ChannelType) -> Self {
        Self {
            source,
            channel: [Channel::new(kind)],
            refresh: Periodic::new(REFRESH_INTERVAL),
            last: None,
        }
    }

    /// Sets the time between two reads.
    #[must_use]
    pub const fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh = Periodic::new(interval);
        self
    }

    /// Returns the last valid reading, before correction.
    #[must_use]
    #[inline]
    pub const fn last_reading(&self) -> Option<Reading> {
        self.last
    }

    fn read(&mut self) -> bool {
        match self.source.read() {
            Ok(reading) => {
                self.last = Some(reading);
                self.report(reading);
                if self.channel[0].clear_flag(ChannelFlags::SENSOR_FAILURE) {
                    debug!("{}: sensor back", self.channel[0]);
                }
                true
            }
            Err(e) => {
                self.last = None;
                self.report(Reading::with_humidity(
                    TEMPERATURE_NOT_AVAILABLE,
                    HUMIDITY_NOT_AVAILABLE,
                ));
                if self.channel[0].set_flag(ChannelFlags::SENSOR_FAILURE) {
                    warn!("{}: sensor not readable: {e:?}", self.channel[0]);
                }
                false
            }
        }
    }

    fn report(&mut self, reading: Reading) {
        let channel = &mut self.channel[0];
        let _ = match channel.kind() {
            ChannelType::ThermHygrometer => channel.set_temp_humidity(
                reading.temperature,
                reading.humidity.unwrap_or(HUMIDITY_NOT_AVAILABLE),
            ),
            _ => channel.set_double(reading.temperature),
        };
    }
}

fn correction_key(prefix: &str, number: ChannelNumber) -> ConfigKey {
    let mut key = ConfigKey::new();
    let _ = write!(key, "{prefix}_{number}");
    key
}

impl<S: TemperatureSource> ChannelOwner for Thermometer<S> {
    fn channels(&self) -> &[Channel] {
        &self.channel
    }

    fn channels_mut(&mut self) -> &mut [Channel] {
        &mut self.channel
    }
}

impl<S: TemperatureSource + 'static> Element for Thermometer<S> {
    fn name(&self) -> &'static str {
        "thermometer"
    }

    fn on_init(&mut self, _ctx: &mut Context<'_>) -> HookStatus {
        if self.read() {
            HookStatus::Ok
        } else {
            HookStatus::Degraded
        }
    }

    fn on_load_config(&mut self, config: &dyn ConfigSource) -> HookStatus {
        let Some(number) = self.channel[0].number() else {
            return HookStatus::Ok;
        };

        let correction = config
            .get_float(&correction_key("corr", number))
            .unwrap_or_default();
        self.channel[0].set_correction(correction / 10.0);

        let correction = config
            .get_float(&correction_key("hcorr", number))
            .unwrap_or_default();
        self.channel[0].set_humidity_correction(correction / 10.0);

        // Apply the new corrections without waiting for the next read.
        if let Some(reading) = self.last {
            self.report(reading);
        }

        HookStatus::Ok
    }

    fn iterate_always(&mut self, ctx: &mut Context<'_>) {
        if self.refresh.poll(ctx.now()) > 0 {
            let _ = self.read();
        }
    }

    lares::capabilities!(channel_owner);
}
