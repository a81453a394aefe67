//! Store configuration and data directory resolution

use crate::cipher::KdfParams;
use crate::error::{ErrorCategory, ErrorKind, OfflineError, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "cyclecare";
pub const APP_NAME: &str = "offline";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "CYCLECARE_DATA_DIR";

/// Capacity ceiling reported by `get_storage_usage`, matching the usual
/// 5 MiB browser localStorage quota.
pub const DEFAULT_QUOTA_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub quota_bytes: u64,
    pub kdf: KdfParams,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            quota_bytes: DEFAULT_QUOTA_BYTES,
            kdf: KdfParams::default(),
        }
    }
}

/// Platform data directory for the file-backed store.
pub fn default_data_dir() -> Result<PathBuf> {
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME).ok_or_else(|| {
        OfflineError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::OfflineUnavailable,
            "cannot determine data directory",
        )
    })?;
    Ok(dirs.data_dir().to_path_buf())
}

/// Explicit directory if given, otherwise the platform default.
pub fn resolve_data_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(dir) => Ok(dir),
        None => default_data_dir(),
    }
}
