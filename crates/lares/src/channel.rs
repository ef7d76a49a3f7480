use alloc::vec::Vec;

use core::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Temperature reported when no valid reading is available.
pub const TEMPERATURE_NOT_AVAILABLE: f64 = -275.0;

/// Humidity reported when no valid reading is available.
pub const HUMIDITY_NOT_AVAILABLE: f64 = -1.0;

/// Channel number, assigned at registration in registration order.
pub type ChannelNumber = u8;

/// Channel types.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelType {
    /// An on/off output.
    Relay,
    /// A two-state input, such as a flood or door sensor.
    BinarySensor,
    /// A temperature reading.
    Thermometer,
    /// A temperature and humidity reading.
    ThermHygrometer,
    /// A water or gas valve.
    Valve,
    /// A roller shutter or blind.
    RollerShutter,
    /// An impulse counter, such as an electricity or water meter.
    ImpulseCounter,
    /// A heating or cooling controller.
    Thermostat,
    /// A generic numeric value.
    GeneralPurpose,
}

impl ChannelType {
    /// Returns the value a channel of this type starts with.
    #[must_use]
    pub const fn default_value(self) -> ChannelValue {
        match self {
            Self::Relay | Self::BinarySensor | Self::Thermostat => ChannelValue::Bool(false),
            Self::Thermometer => ChannelValue::Double(TEMPERATURE_NOT_AVAILABLE),
            Self::ThermHygrometer => ChannelValue::TempHumidity {
                temperature: TEMPERATURE_NOT_AVAILABLE,
                humidity: HUMIDITY_NOT_AVAILABLE,
            },
            Self::Valve => ChannelValue::Percentage(0),
            Self::ImpulseCounter => ChannelValue::Counter(0),
            Self::RollerShutter | Self::GeneralPurpose => ChannelValue::Unknown,
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relay => "relay",
            Self::BinarySensor => "binary-sensor",
            Self::Thermometer => "thermometer",
            Self::ThermHygrometer => "therm-hygrometer",
            Self::Valve => "valve",
            Self::RollerShutter => "roller-shutter",
            Self::ImpulseCounter => "impulse-counter",
            Self::Thermostat => "thermostat",
            Self::GeneralPurpose => "general-purpose",
        }
        .fmt(f)
    }
}

/// Current value of a channel.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelValue {
    /// No value is known yet.
    Unknown,
    /// A boolean state.
    Bool(bool),
    /// A signed integer.
    Integer(i64),
    /// A floating point measurement.
    Double(f64),
    /// A temperature and humidity pair.
    TempHumidity {
        /// Temperature in degrees Celsius.
        temperature: f64,
        /// Relative humidity in percent.
        humidity: f64,
    },
    /// A level in percent, from 0 to 100.
    Percentage(u8),
    /// A monotonic counter.
    Counter(u64),
}

impl ChannelValue {
    /// Returns the boolean state, if any.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the measurement, if any.
    ///
    /// For a temperature and humidity pair, the temperature is returned.
    #[must_use]
    pub const fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(value) => Some(*value),
            Self::TempHumidity { temperature, .. } => Some(*temperature),
            _ => None,
        }
    }

    /// Returns the percentage, if any.
    #[must_use]
    pub const fn as_percentage(&self) -> Option<u8> {
        match self {
            Self::Percentage(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the counter, if any.
    #[must_use]
    pub const fn as_counter(&self) -> Option<u64> {
        match self {
            Self::Counter(value) => Some(*value),
            _ => None,
        }
    }
}

bitflags! {
    /// Channel status flags.
    #[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ChannelFlags: u32 {
        /// A flood sensor reports water.
        const FLOODING = 1 << 0;
        /// The valve was closed by hand.
        const MANUALLY_CLOSED = 1 << 1;
        /// The motor does not respond.
        const MOTOR_PROBLEM = 1 << 2;
        /// The valve or shutter is open.
        const OPEN = 1 << 3;
        /// The shutter position is not calibrated.
        const CALIBRATION_LOST = 1 << 4;
        /// A calibration run is in progress.
        const CALIBRATION_IN_PROGRESS = 1 << 5;
        /// The thermostat output is heating.
        const HEATING = 1 << 6;
        /// The thermostat output is cooling.
        const COOLING = 1 << 7;
        /// The thermostat has no valid temperature.
        const THERMOMETER_ERROR = 1 << 8;
        /// A relay countdown is running.
        const COUNTDOWN = 1 << 9;
        /// The sensor behind the channel does not respond.
        const SENSOR_FAILURE = 1 << 10;
    }
}

/// A copy of a channel value and flags at a given time.
///
/// Channel updates handed to the gateway and the per-tick channel snapshot
/// share this representation.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelState {
    /// Channel number.
    pub number: ChannelNumber,
    /// Channel type.
    pub kind: ChannelType,
    /// Channel value.
    pub value: ChannelValue,
    /// Channel flags.
    pub flags: ChannelFlags,
}

/// A typed value and flags endpoint owned by an element.
///
/// Only the owning element mutates a channel. Every setter marks the
/// channel as pending when, and only when, the value or the flags actually
/// change, so a steady state is published once per transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    number: Option<ChannelNumber>,
    kind: ChannelType,
    value: ChannelValue,
    flags: ChannelFlags,
    pending: bool,
    correction: f64,
    humidity_correction: f64,
}

impl Channel {
    /// Creates a [`Channel`] holding the default value of its type.
    #[must_use]
    #[inline]
    pub const fn new(kind: ChannelType) -> Self {
        Self {
            number: None,
            kind,
            value: kind.default_value(),
            flags: ChannelFlags::empty(),
            pending: false,
            correction: 0.0,
            humidity_correction: 0.0,
        }
    }

    /// Returns the channel number, if the channel is registered.
    #[must_use]
    #[inline]
    pub const fn number(&self) -> Option<ChannelNumber> {
        self.number
    }

    pub(crate) fn assign_number(&mut self, number: ChannelNumber) {
        self.number = Some(number);
    }

    /// Returns the channel type.
    #[must_use]
    #[inline]
    pub const fn kind(&self) -> ChannelType {
        self.kind
    }

    /// Returns the current value.
    #[must_use]
    #[inline]
    pub const fn value(&self) -> ChannelValue {
        self.value
    }

    /// Returns the current flags.
    #[must_use]
    #[inline]
    pub const fn flags(&self) -> ChannelFlags {
        self.flags
    }

    /// Whether the given flags are all set.
    #[must_use]
    #[inline]
    pub const fn has_flags(&self, flags: ChannelFlags) -> bool {
        self.flags.contains(flags)
    }

    /// Sets a new value.
    ///
    /// Returns whether the value changed.
    pub fn set_value(&mut self, value: ChannelValue) -> bool {
        if self.value == value {
            return false;
        }
        self.value = value;
        self.pending = true;
        true
    }

    /// Sets a boolean state.
    #[inline]
    pub fn set_bool(&mut self, value: bool) -> bool {
        self.set_value(ChannelValue::Bool(value))
    }

    /// Sets a percentage, clamped to 100.
    #[inline]
    pub fn set_percentage(&mut self, value: u8) -> bool {
        self.set_value(ChannelValue::Percentage(value.min(100)))
    }

    /// Sets a counter.
    #[inline]
    pub fn set_counter(&mut self, value: u64) -> bool {
        self.set_value(ChannelValue::Counter(value))
    }

    /// Sets a measurement, applying the channel correction.
    ///
    /// A value that is not a number, or the
    /// [`TEMPERATURE_NOT_AVAILABLE`] sentinel, is stored as the sentinel
    /// without correction.
    pub fn set_double(&mut self, value: f64) -> bool {
        let value = if is_available_temperature(value) {
            value + self.correction
        } else {
            TEMPERATURE_NOT_AVAILABLE
        };
        self.set_value(ChannelValue::Double(value))
    }

    /// Sets a temperature and humidity pair, applying both corrections.
    pub fn set_temp_humidity(&mut self, temperature: f64, humidity: f64) -> bool {
        let temperature = if is_available_temperature(temperature) {
            temperature + self.correction
        } else {
            TEMPERATURE_NOT_AVAILABLE
        };
        let humidity = if humidity.is_nan() || humidity < 0.0 {
            HUMIDITY_NOT_AVAILABLE
        } else {
            (humidity + self.humidity_correction).clamp(0.0, 100.0)
        };
        self.set_value(ChannelValue::TempHumidity {
            temperature,
            humidity,
        })
    }

    /// Sets the correction added to every measurement.
    #[inline]
    pub fn set_correction(&mut self, correction: f64) {
        self.correction = correction;
    }

    /// Sets the correction added to every humidity reading.
    #[inline]
    pub fn set_humidity_correction(&mut self, correction: f64) {
        self.humidity_correction = correction;
    }

    /// Returns the measurement correction.
    #[must_use]
    #[inline]
    pub const fn correction(&self) -> f64 {
        self.correction
    }

    /// Sets or clears flags.
    ///
    /// Returns whether the flags changed.
    pub fn set_flags(&mut self, flags: ChannelFlags, enabled: bool) -> bool {
        let previous = self.flags;
        self.flags.set(flags, enabled);
        if previous == self.flags {
            return false;
        }
        self.pending = true;
        true
    }

    /// Sets flags, returning whether they changed.
    #[inline]
    pub fn set_flag(&mut self, flags: ChannelFlags) -> bool {
        self.set_flags(flags, true)
    }

    /// Clears flags, returning whether they changed.
    #[inline]
    pub fn clear_flag(&mut self, flags: ChannelFlags) -> bool {
        self.set_flags(flags, false)
    }

    /// Whether the channel has an update waiting to be published.
    #[must_use]
    #[inline]
    pub const fn is_pending(&self) -> bool {
        self.pending
    }

    /// Marks the channel for publication even though nothing changed.
    #[inline]
    pub fn request_publish(&mut self) {
        self.pending = true;
    }

    pub(crate) fn mark_published(&mut self) {
        self.pending = false;
    }

    /// Returns a copy of the channel state, if the channel is registered.
    #[must_use]
    pub fn state(&self) -> Option<ChannelState> {
        self.number.map(|number| ChannelState {
            number,
            kind: self.kind,
            value: self.value,
            flags: self.flags,
        })
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.number {
            Some(number) => write!(f, "{}[{number}]", self.kind),
            None => write!(f, "{}[-]", self.kind),
        }
    }
}

fn is_available_temperature(value: f64) -> bool {
    !value.is_nan() && value > TEMPERATURE_NOT_AVAILABLE
}

/// Committed channel states from the previous tick.
///
/// Elements read sibling channels only through the snapshot, never through
/// the siblings themselves.
#[derive(Debug, Default)]
pub struct ChannelSnapshot {
    states: Vec<Option<ChannelState>>,
}

impl ChannelSnapshot {
    /// Creates an empty [`ChannelSnapshot`] with room for `channels`
    /// channels.
    #[must_use]
    pub fn with_capacity(channels: usize) -> Self {
        let mut states = Vec::with_capacity(channels);
        states.resize(channels, None);
        Self { states }
    }

    /// Returns the committed state of a channel.
    #[must_use]
    #[inline]
    pub fn get(&self, number: ChannelNumber) -> Option<&ChannelState> {
        self.states.get(usize::from(number)).and_then(Option::as_ref)
    }

    /// Returns the committed value of a channel.
    #[must_use]
    #[inline]
    pub fn value(&self, number: ChannelNumber) -> Option<ChannelValue> {
        self.get(number).map(|state| state.value)
    }

    /// Returns the number of channels tracked by the snapshot.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether the snapshot tracks no channel.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Stores the current state of a channel.
    ///
    /// Unregistered channels and numbers outside the snapshot are ignored.
    pub fn commit(&mut self, channel: &Channel) {
        if let Some(state) = channel.state()
            && let Some(slot) = self.states.get_mut(usize::from(state.number))
        {
            *slot = Some(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{deserialize, serialize};

    use super::{
        Channel, ChannelFlags, ChannelSnapshot, ChannelState, ChannelType, ChannelValue,
        HUMIDITY_NOT_AVAILABLE, TEMPERATURE_NOT_AVAILABLE,
    };

    #[test]
    fn test_default_values() {
        assert_eq!(Channel::new(ChannelType::Relay).value(), ChannelValue::Bool(false));
        assert_eq!(
            Channel::new(ChannelType::Thermometer).value(),
            ChannelValue::Double(TEMPERATURE_NOT_AVAILABLE)
        );
        assert_eq!(
            Channel::new(ChannelType::RollerShutter).value(),
            ChannelValue::Unknown
        );
        assert_eq!(
            Channel::new(ChannelType::ImpulseCounter).value(),
            ChannelValue::Counter(0)
        );
    }

    #[test]
    fn test_set_value_marks_pending_only_on_change() {
        let mut channel = Channel::new(ChannelType::Relay);
        assert!(!channel.is_pending());

        assert!(!channel.set_bool(false));
        assert!(!channel.is_pending());

        assert!(channel.set_bool(true));
        assert!(channel.is_pending());

        channel.mark_published();
        assert!(!channel.set_bool(true));
        assert!(!channel.is_pending());
    }

    #[test]
    fn test_flags_mark_pending_only_on_transition() {
        let mut channel = Channel::new(ChannelType::Valve);

        assert!(channel.set_flag(ChannelFlags::FLOODING));
        assert!(channel.is_pending());
        channel.mark_published();

        assert!(!channel.set_flag(ChannelFlags::FLOODING));
        assert!(!channel.is_pending());

        assert!(channel.has_flags(ChannelFlags::FLOODING));
        assert!(!channel.has_flags(ChannelFlags::FLOODING | ChannelFlags::OPEN));

        assert!(channel.clear_flag(ChannelFlags::FLOODING));
        assert!(channel.is_pending());
        assert!(channel.flags().is_empty());
    }

    #[test]
    fn test_corrections() {
        let mut channel = Channel::new(ChannelType::ThermHygrometer);
        channel.set_correction(-1.5);
        channel.set_humidity_correction(5.0);

        assert!(channel.set_temp_humidity(21.5, 97.0));
        assert_eq!(
            channel.value(),
            ChannelValue::TempHumidity {
                temperature: 20.0,
                humidity: 100.0,
            }
        );

        // Sentinels are never corrected.
        assert!(channel.set_temp_humidity(f64::NAN, -3.0));
        assert_eq!(
            channel.value(),
            ChannelValue::TempHumidity {
                temperature: TEMPERATURE_NOT_AVAILABLE,
                humidity: HUMIDITY_NOT_AVAILABLE,
            }
        );

        // A missing reading is stable, so it is published once.
        channel.mark_published();
        assert!(!channel.set_temp_humidity(f64::NAN, f64::NAN));
    }

    #[test]
    fn test_percentage_is_clamped() {
        let mut channel = Channel::new(ChannelType::Valve);
        assert!(channel.set_percentage(250));
        assert_eq!(channel.value().as_percentage(), Some(100));
    }

    #[test]
    fn test_snapshot() {
        let mut relay = Channel::new(ChannelType::Relay);
        let unregistered = Channel::new(ChannelType::Relay);
        relay.assign_number(1);
        let _ = relay.set_bool(true);

        let mut snapshot = ChannelSnapshot::with_capacity(2);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.value(1), None);

        snapshot.commit(&relay);
        snapshot.commit(&unregistered);

        assert_eq!(snapshot.value(1), Some(ChannelValue::Bool(true)));
        assert_eq!(snapshot.get(0), None);
        assert_eq!(snapshot.get(7), None);
    }

    #[test]
    fn test_channel_state_serde() {
        let state = ChannelState {
            number: 3,
            kind: ChannelType::Valve,
            value: ChannelValue::Percentage(100),
            flags: ChannelFlags::OPEN,
        };

        let value = serialize(state);
        assert_eq!(
            value,
            serde_json::json!({
                "number": 3,
                "kind": "valve",
                "value": { "percentage": 100 },
                "flags": "OPEN",
            })
        );
        assert_eq!(deserialize::<ChannelState>(value), state);
    }
}
