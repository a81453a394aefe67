//! Decrypted backup export
//!
//! An export is every readable record, decrypted, wrapped with a format
//! version and the export time. Failures here carry [`ErrorKind::Export`] so
//! callers can tell them apart from store failures.

use crate::error::{ErrorCategory, ErrorKind, OfflineError, Result};
use crate::kv::KeyValueStore;
use crate::record::OfflineRecord;
use crate::store::OfflineStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

pub const EXPORT_FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub version: String,
    pub export_date: DateTime<Utc>,
    pub data: Vec<OfflineRecord>,
    /// Records that could not be decrypted and are missing from `data`.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub skipped: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl ExportBundle {
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            OfflineError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Export,
                "failed to serialize export",
                e,
            )
        })
    }

    /// Suggested file name, e.g. `cyclecare-backup-2024-03-01.json`.
    pub fn backup_file_name(&self) -> String {
        format!("cyclecare-backup-{}.json", self.export_date.format("%Y-%m-%d"))
    }

    /// Write the pretty-printed bundle to `path` with owner-only permissions.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = self.to_json_pretty()?;
        write_file_secure(path, json.as_bytes())
    }
}

/// Export every readable record as of now.
pub fn export_records<S: KeyValueStore>(store: &OfflineStore<S>) -> Result<ExportBundle> {
    export_records_at(store, Utc::now())
}

pub fn export_records_at<S: KeyValueStore>(
    store: &OfflineStore<S>,
    export_date: DateTime<Utc>,
) -> Result<ExportBundle> {
    let decrypted = store
        .get_decrypted_records()
        .map_err(|e| e.rekind(ErrorKind::Export, "failed to read records for export"))?;

    let skipped = decrypted.failed_count();
    if skipped > 0 {
        warn!(skipped, "export is missing records that failed to decrypt");
    }
    debug!(records = decrypted.records.len(), "built export bundle");

    Ok(ExportBundle {
        version: EXPORT_FORMAT_VERSION.to_string(),
        export_date,
        data: decrypted.records,
        skipped,
    })
}

/// Write file with secure permissions (0o600 on Unix)
fn write_file_secure(path: &Path, contents: &[u8]) -> Result<()> {
    let open_error = |e: std::io::Error| {
        OfflineError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::Export,
            format!("failed to open {}", path.display()),
            e,
        )
    };

    #[cfg(unix)]
    let mut file = {
        use std::fs::OpenOptions;
        use std::os::unix::fs::OpenOptionsExt;

        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .map_err(open_error)?
    };

    #[cfg(not(unix))]
    let mut file = std::fs::File::create(path).map_err(open_error)?;

    file.write_all(contents).map_err(|e| {
        OfflineError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Export,
            format!("failed to write {}", path.display()),
            e,
        )
    })?;
    Ok(())
}
