/// All `lares-os` errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A JSON document could not be parsed or written.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// The runtime reported an error.
    #[error("runtime error: {0}")]
    Runtime(#[from] lares::error::Error),
    /// The logger was already installed.
    #[error("logger already installed")]
    Logger,
}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
