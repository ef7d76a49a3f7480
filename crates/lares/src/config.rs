use alloc::string::String;
use alloc::vec::Vec;

use core::fmt::Write;
use core::time::Duration;

use hashbrown::DefaultHashBuilder;
use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::channel::ChannelNumber;
use crate::clock::Instant;
use crate::error::{Error, ErrorKind};
use crate::storage::{MAX_KEY_LEN, StateStore, Storage};

/// Storage key of the persisted configuration.
pub const CONFIG_RECORD_KEY: &str = "config";

/// A key built by [`channel_key`].
pub type ConfigKey = heapless::String<MAX_KEY_LEN>;

/// Builds the configuration key of a channel setting.
///
/// Keys look like `3_init`. A key that would exceed [`MAX_KEY_LEN`] is
/// truncated and then simply never found.
#[must_use]
pub fn channel_key(channel: ChannelNumber, key: &str) -> ConfigKey {
    let mut config_key = ConfigKey::new();
    let _ = write!(config_key, "{channel}_{key}");
    config_key
}

/// A configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A floating point number.
    Float(f64),
    /// A string.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ConfigValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::Text(String::from(value))
    }
}

/// Read access to the device configuration.
///
/// Typed getters return `None` both for missing keys and for values of an
/// unexpected type, so an element keeps its previous setting in either
/// case.
pub trait ConfigSource {
    /// Returns the value stored under `key`.
    fn get(&self, key: &str) -> Option<&ConfigValue>;

    /// Returns a boolean value.
    ///
    /// Integers are accepted, zero being `false`.
    fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            ConfigValue::Bool(value) => Some(*value),
            ConfigValue::Int(value) => Some(*value != 0),
            _ => None,
        }
    }

    /// Returns an integer value.
    fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            ConfigValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns a floating point value.
    ///
    /// Integers are converted.
    fn get_float(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            ConfigValue::Float(value) => Some(*value),
            ConfigValue::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// Returns a string value.
    fn get_text(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            ConfigValue::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Returns a duration expressed in milliseconds.
    ///
    /// Negative values are rejected.
    fn get_millis(&self, key: &str) -> Option<Duration> {
        self.get_int(key)
            .and_then(|millis| u64::try_from(millis).ok())
            .map(Duration::from_millis)
    }
}

/// The set of configuration keys changed by an update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigChange {
    keys: Vec<String>,
}

impl ConfigChange {
    /// Creates an empty [`ConfigChange`].
    #[must_use]
    #[inline]
    pub const fn new() -> Self {
        Self { keys: Vec::new() }
    }

    /// Creates a [`ConfigChange`] from a list of keys.
    #[must_use]
    pub fn from_keys<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        let mut change = Self::new();
        for key in keys {
            change.push(key);
        }
        change
    }

    pub(crate) fn push(&mut self, key: &str) {
        if !self.contains(key) {
            self.keys.push(String::from(key));
        }
    }

    /// Whether no key changed.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Whether `key` changed.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.keys.iter().any(|changed| changed == key)
    }

    /// Whether any setting of `channel` changed.
    #[must_use]
    pub fn affects_channel(&self, channel: ChannelNumber) -> bool {
        let prefix = channel_key(channel, "");
        self.keys.iter().any(|key| key.starts_with(prefix.as_str()))
    }

    /// Returns an iterator over the changed keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }
}

/// The device configuration, kept in memory.
///
/// Keys keep their insertion order. Updates mark the store dirty, and a
/// delayed commit writes the whole store to [`Storage`] as one JSON
/// record, so a burst of updates costs a single write.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
    values: IndexMap<String, ConfigValue, DefaultHashBuilder>,
    commit_at: Option<Instant>,
}

impl ConfigSource for ConfigStore {
    fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }
}

impl ConfigStore {
    /// Creates an empty [`ConfigStore`].
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a [`ConfigStore`] from a JSON object.
    ///
    /// # Errors
    ///
    /// Fails when the input is not a JSON object of valid values or
    /// contains an invalid key.
    pub fn from_json(json: &[u8]) -> Result<Self, Error> {
        let values: IndexMap<String, ConfigValue, DefaultHashBuilder> =
            serde_json::from_slice(json).map_err(|e| {
                Error::new(
                    ErrorKind::InvalidConfig,
                    alloc::format!("malformed configuration: {e}"),
                )
            })?;

        for key in values.keys() {
            check_key(key)?;
        }

        Ok(Self {
            values,
            commit_at: None,
        })
    }

    /// Serializes the store as a JSON object.
    ///
    /// # Errors
    ///
    /// Fails when a value cannot be represented in JSON.
    pub fn to_json(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(&self.values).map_err(|e| {
            Error::new(
                ErrorKind::InvalidConfig,
                alloc::format!("unserializable configuration: {e}"),
            )
        })
    }

    /// Loads the store persisted in `storage`.
    ///
    /// A missing or unreadable record yields an empty store.
    pub fn load<S: Storage>(storage: &mut S, records: &mut StateStore) -> Self {
        let mut buf = alloc::vec![0; records.max_payload()];

        let len = match records.load(storage, CONFIG_RECORD_KEY, &mut buf) {
            Ok(Some(len)) => len,
            Ok(None) => {
                info!("No stored configuration, using defaults");
                return Self::new();
            }
            Err(e) => {
                warn!("Impossible to read the configuration: {e}");
                return Self::new();
            }
        };

        match Self::from_json(&buf[..len]) {
            Ok(config) => {
                debug!("Loaded {} configuration values", config.len());
                config
            }
            Err(e) => {
                warn!("Discarding stored configuration: {e}");
                Self::new()
            }
        }
    }

    /// Returns the number of values.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the store holds no value.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns an iterator over keys and values, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.values.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Sets a value.
    ///
    /// Returns whether the stored value changed.
    ///
    /// # Errors
    ///
    /// Fails when the key is empty or longer than [`MAX_KEY_LEN`].
    pub fn set(&mut self, key: &str, value: impl Into<ConfigValue>) -> Result<bool, Error> {
        check_key(key)?;
        let value = value.into();

        if self.values.get(key) == Some(&value) {
            return Ok(false);
        }

        let _ = self.values.insert(String::from(key), value);
        Ok(true)
    }

    /// Removes a value, returning whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.values.shift_remove(key).is_some()
    }

    /// Copies every value of `other` into the store.
    ///
    /// Returns the keys whose value changed.
    pub fn merge(&mut self, other: &Self) -> ConfigChange {
        let mut change = ConfigChange::new();
        for (key, value) in other.iter() {
            // Keys of `other` are already validated.
            if let Ok(true) = self.set(key, value.clone()) {
                change.push(key);
            }
        }
        change
    }

    /// Schedules a commit `delay` after `now`.
    ///
    /// An already scheduled commit is not postponed.
    pub fn schedule_commit(&mut self, now: Instant, delay: Duration) {
        let at = now + delay;
        self.commit_at = Some(self.commit_at.map_or(at, |scheduled| scheduled.min(at)));
    }

    /// Moves a scheduled commit to `at`, usually after a failed write.
    pub fn postpone_commit(&mut self, at: Instant) {
        if self.commit_at.is_some() {
            self.commit_at = Some(at);
        }
    }

    /// Whether a commit is scheduled.
    #[must_use]
    #[inline]
    pub const fn is_dirty(&self) -> bool {
        self.commit_at.is_some()
    }

    /// Writes the store to `storage` when the scheduled commit is due.
    ///
    /// Returns whether the storage was written.
    ///
    /// # Errors
    ///
    /// Fails when the store cannot be serialized or written. The commit
    /// stays scheduled and is retried on the next call.
    pub fn commit_if_due<S: Storage>(
        &mut self,
        now: Instant,
        storage: &mut S,
        records: &mut StateStore,
    ) -> Result<bool, Error> {
        match self.commit_at {
            Some(at) if now >= at => self.commit(storage, records),
            _ => Ok(false),
        }
    }

    /// Writes the store to `storage` right away.
    ///
    /// Returns whether the storage was written.
    ///
    /// # Errors
    ///
    /// Fails when the store cannot be serialized or written.
    pub fn commit<S: Storage>(
        &mut self,
        storage: &mut S,
        records: &mut StateStore,
    ) -> Result<bool, Error> {
        let json = self.to_json()?;
        let written = records.save(storage, CONFIG_RECORD_KEY, &json)?;
        self.commit_at = None;
        Ok(written)
    }
}

fn check_key(key: &str) -> Result<(), Error> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(Error::new(
            ErrorKind::InvalidKey,
            alloc::format!("`{key}` is not a valid configuration key"),
        ));
    }
    Ok(())
}
