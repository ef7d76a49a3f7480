use alloc::borrow::Cow;

use core::fmt;

/// All possible error kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The storage backend failed to read or write a record.
    Storage,
    /// A persisted record is malformed or its checksum does not match.
    StateCorrupted,
    /// A configuration key is empty or too long.
    InvalidKey,
    /// A configuration value cannot be parsed or has the wrong type.
    InvalidConfig,
    /// The element registry no longer accepts registrations.
    RegistryFrozen,
    /// A channel update could not be handed to the gateway.
    Publish,
    /// A bounded buffer has no room left.
    BufferOverflow,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::Storage => "Storage",
            Self::StateCorrupted => "Corrupted State",
            Self::InvalidKey => "Invalid Key",
            Self::InvalidConfig => "Invalid Configuration",
            Self::RegistryFrozen => "Registry Frozen",
            Self::Publish => "Publish",
            Self::BufferOverflow => "Buffer Overflow",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.description().fmt(f)
    }
}

/// A runtime error.
///
/// Contains an [`ErrorKind`] and a description of what went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    info: Cow<'static, str>,
}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and a description.
    #[must_use]
    #[inline]
    pub fn new(kind: ErrorKind, info: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            info: info.into(),
        }
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    #[inline]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error description.
    #[must_use]
    #[inline]
    pub fn info(&self) -> &str {
        &self.info
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.info)
    }
}

impl core::error::Error for Error {}

/// The outcome of a lifecycle hook.
///
/// A hook never aborts the runtime. An element that cannot reach its
/// hardware, or that receives unusable configuration, reports
/// [`HookStatus::Degraded`] and keeps running with safe defaults.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum HookStatus {
    /// The hook completed normally.
    #[default]
    Ok,
    /// The element continues in a degraded mode.
    Degraded,
}

impl HookStatus {
    /// Whether the element is degraded.
    #[must_use]
    #[inline]
    pub const fn is_degraded(self) -> bool {
        matches!(self, Self::Degraded)
    }

    /// Combines two statuses, keeping the worst one.
    #[must_use]
    #[inline]
    pub fn and(self, other: Self) -> Self {
        self.max(other)
    }
}

impl fmt::Display for HookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => "ok",
            Self::Degraded => "degraded",
        }
        .fmt(f)
    }
}
