use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use lares::config::ConfigStore;

use tracing::{debug, info};

use crate::error::Result;

/// A device configuration kept in a JSON file.
///
/// The file holds a single JSON object mapping configuration keys to
/// booleans, numbers or strings:
///
/// ```json
/// {
///     "0_init": 2,
///     "1_open_ms": 21000,
///     "led": 1
/// }
/// ```
///
/// The file is read again only when its modification time changes, and
/// reported only when its content changes.
#[derive(Debug)]
pub struct ConfigFile {
    path: PathBuf,
    modified: Option<SystemTime>,
    content: Option<Vec<u8>>,
}

impl ConfigFile {
    /// Creates a [`ConfigFile`] for `path`.
    ///
    /// The file may not exist yet.
    #[must_use]
    #[inline]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            modified: None,
            content: None,
        }
    }

    /// Returns the file path.
    #[must_use]
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the configuration when the file changed since the last
    /// poll.
    ///
    /// A missing file is not an error and yields no configuration.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or does not contain a valid
    /// configuration. An invalid file is read again once modified.
    pub fn poll(&mut self) -> Result<Option<ConfigStore>> {
        let modified = match fs::metadata(&self.path) {
            Ok(metadata) => metadata.modified().ok(),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if self.content.take().is_some() {
                    info!("Configuration file {} removed", self.path.display());
                }
                self.modified = None;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if modified.is_some() && modified == self.modified {
            return Ok(None);
        }

        let content = fs::read(&self.path)?;
        self.modified = modified;
        if self.content.as_ref() == Some(&content) {
            return Ok(None);
        }

        let config = ConfigStore::from_json(&content)?;
        debug!("Read {} values from {}", config.len(), self.path.display());
        self.content = Some(content);

        Ok(Some(config))
    }
}
