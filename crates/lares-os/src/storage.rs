use std::fs::{self, File};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};

use lares::error::{Error as RuntimeError, ErrorKind};
use lares::storage::Storage;

use tracing::{debug, warn};

use crate::error::Result;

const TEMP_SUFFIX: &str = ".tmp";

fn storage_error(key: &str, operation: &str, e: &std::io::Error) -> RuntimeError {
    RuntimeError::new(ErrorKind::Storage, format!("{operation} of `{key}` failed: {e}"))
}

/// A [`Storage`] keeping every value in its own file.
///
/// A value is first written to a temporary file, flushed to disk and then
/// renamed over the previous one, so a crash leaves either the old or the
/// new value behind.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Opens a [`FileStorage`] in `dir`, creating the directory if needed.
    ///
    /// Temporary files left by an interrupted write are removed.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be created or listed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();

        fs::create_dir_all(&dir)?;

        for entry in fs::read_dir(&dir)?.flatten() {
            let path = entry.path();
            if path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(TEMP_SUFFIX))
            {
                debug!("Removing interrupted write {}", path.display());
                if let Err(e) = fs::remove_file(&path) {
                    warn!("Unable to remove {}: {e}", path.display());
                }
            }
        }

        Ok(Self { dir })
    }

    /// Returns the storage directory.
    #[must_use]
    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> std::result::Result<PathBuf, RuntimeError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && !key.ends_with(TEMP_SUFFIX)
            && key
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'));

        if valid {
            Ok(self.dir.join(key))
        } else {
            Err(RuntimeError::new(
                ErrorKind::InvalidKey,
                format!("`{key}` is not a valid file name"),
            ))
        }
    }
}

impl Storage for FileStorage {
    fn read(
        &mut self,
        key: &str,
        buf: &mut [u8],
    ) -> std::result::Result<Option<usize>, RuntimeError> {
        let path = self.path(key)?;

        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_error(key, "read", &e)),
        };

        let Some(dest) = buf.get_mut(..data.len()) else {
            return Err(RuntimeError::new(
                ErrorKind::BufferOverflow,
                format!("`{key}` holds {} bytes, {} available", data.len(), buf.len()),
            ));
        };
        dest.copy_from_slice(&data);

        Ok(Some(data.len()))
    }

    fn write(&mut self, key: &str, data: &[u8]) -> std::result::Result<(), RuntimeError> {
        let path = self.path(key)?;
        let temp = self.dir.join(format!("{key}{TEMP_SUFFIX}"));

        let written = File::create(&temp).and_then(|mut file| {
            file.write_all(data)?;
            file.sync_all()
        });

        if let Err(e) = written.and_then(|()| fs::rename(&temp, &path)) {
            let _ = fs::remove_file(&temp);
            return Err(storage_error(key, "write", &e));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use lares::error::ErrorKind;
    use lares::storage::{StateStore, Storage};

    use super::FileStorage;

    #[test]
    fn test_read_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FileStorage::open(dir.path()).unwrap();
        let mut buf = [0; 16];

        assert_eq!(storage.read("state_0.a", &mut buf).unwrap(), None);

        storage.write("state_0.a", b"first").unwrap();
        storage.write("state_0.a", b"second").unwrap();
        assert_eq!(storage.read("state_0.a", &mut buf).unwrap(), Some(6));
        assert_eq!(&buf[..6], b"second");

        let files: Vec<_> = fs::read_dir(dir.path()).unwrap().flatten().collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_small_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FileStorage::open(dir.path()).unwrap();
        storage.write("config.a", b"0123456789").unwrap();

        let mut buf = [0; 4];
        let error = storage.read("config.a", &mut buf).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::BufferOverflow);
    }

    #[test]
    fn test_invalid_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = FileStorage::open(dir.path()).unwrap();

        for key in ["", "../escape", ".hidden", "a/b", "state.tmp"] {
            let error = storage.write(key, b"data").unwrap_err();
            assert_eq!(error.kind(), ErrorKind::InvalidKey, "key {key:?}");
        }
    }

    #[test]
    fn test_interrupted_write_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.a.tmp"), b"partial").unwrap();
        fs::write(dir.path().join("config.a"), b"complete").unwrap();

        let mut storage = FileStorage::open(dir.path()).unwrap();
        assert!(!dir.path().join("config.a.tmp").exists());

        let mut buf = [0; 16];
        assert_eq!(storage.read("config.a", &mut buf).unwrap(), Some(8));
        assert_eq!(&buf[..8], b"complete");
    }

    #[test]
    fn test_not_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, b"").unwrap();

        assert!(FileStorage::open(&file).is_err());
    }

    #[test]
    fn test_records_survive_reopening() {
        let dir = tempfile::tempdir().unwrap();

        let mut storage = FileStorage::open(dir.path()).unwrap();
        let mut records = StateStore::new(32);
        assert!(records.save(&mut storage, "state_0", b"relay").unwrap());

        let mut storage = FileStorage::open(dir.path()).unwrap();
        let mut records = StateStore::new(32);
        let mut buf = [0; 32];
        assert_eq!(
            records.load(&mut storage, "state_0", &mut buf).unwrap(),
            Some(5)
        );
        assert_eq!(&buf[..5], b"relay");
    }
}
