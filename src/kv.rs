//! Key-value persistence media
//!
//! The record store persists two independent text blobs (the salt and the
//! record collection). [`KeyValueStore`] is the seam between the store and
//! whatever medium holds those blobs.

use crate::error::{ErrorCategory, ErrorKind, OfflineError, Result};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// A string-keyed blob store where every `set` replaces the whole value.
pub trait KeyValueStore {
    /// Read the value stored under `key`, or `None` if absent.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace the value stored under `key`.
    ///
    /// Implementations must make the replacement atomic: a reader sees
    /// either the old value or the new value, never a mix.
    fn set(&mut self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Removing an absent key is not an error.
    fn remove(&mut self, key: &str) -> Result<()>;

    /// Returns true if the medium can currently be read and written.
    fn probe(&self) -> bool;
}

/// Volatile store backed by a `HashMap`.
#[derive(Debug, Default, Clone)]
pub struct MemoryKeyValueStore {
    entries: HashMap<String, String>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn probe(&self) -> bool {
        true
    }
}

/// Directory-backed store: key `k` lives in file `k.json`.
///
/// Values are written to a tempfile in the same directory, flushed,
/// fsync()ed, restricted to mode 0o600 on Unix, and then renamed over the
/// target. Either the old file or the new file exists, never a partial one.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    /// Opens (and creates if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        create_private_dir(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(persistence_error(
                format!("failed to read from {}", path.display()),
                e,
            )),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let mut temp_file = tempfile::Builder::new()
            .prefix(".cyclecare-tmp")
            .tempfile_in(&self.dir)
            .map_err(|e| persistence_error("failed to create tempfile", e))?;

        temp_file
            .write_all(value.as_bytes())
            .map_err(|e| persistence_error("failed to write to tempfile", e))?;
        // Flush and fsync() such that the rename later, if it succeeds, will
        // always point to a valid file.
        temp_file
            .flush()
            .map_err(|e| persistence_error("failed to flush tempfile", e))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| persistence_error("failed to sync file prior to rename", e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = temp_file
                .as_file()
                .metadata()
                .map_err(|e| persistence_error("failed to get tempfile metadata", e))?
                .permissions();
            perms.set_mode(0o600);
            temp_file
                .as_file()
                .set_permissions(perms)
                .map_err(|e| persistence_error("failed to set tempfile permissions", e))?;
        }

        temp_file.persist(&path).map_err(|e| {
            persistence_error(
                format!("failed to rename to target file {}", path.display()),
                e.error,
            )
        })?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(persistence_error(
                format!("failed to remove {}", path.display()),
                e,
            )),
        }
    }

    fn probe(&self) -> bool {
        if create_private_dir(&self.dir).is_err() {
            return false;
        }
        tempfile::Builder::new()
            .prefix(".cyclecare-probe")
            .tempfile_in(&self.dir)
            .is_ok()
    }
}

fn create_private_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| {
        persistence_error(format!("failed to create directory {}", dir.display()), e)
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(dir)
            .map_err(|e| persistence_error(format!("failed to stat {}", dir.display()), e))?
            .permissions()
            .mode();
        if mode & 0o077 != 0 {
            fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).map_err(|e| {
                persistence_error(
                    format!("failed to restrict permissions on {}", dir.display()),
                    e,
                )
            })?;
        }
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(OfflineError::with_kind(
            ErrorCategory::User,
            ErrorKind::Persistence,
            format!("invalid storage key {:?}", key),
        ))
    }
}

fn persistence_error(msg: impl Into<String>, err: io::Error) -> OfflineError {
    let category = if err.kind() == io::ErrorKind::PermissionDenied {
        ErrorCategory::User
    } else {
        ErrorCategory::Internal
    };
    OfflineError::with_kind_and_source(category, ErrorKind::Persistence, msg, err)
}
