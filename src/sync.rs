//! Pushing unsynced records to a remote side
//!
//! The remote protocol is not part of this crate. A [`SyncTransport`]
//! receives decrypted unsynced records and reports which ids the remote
//! acknowledged; only those are marked synced.

use crate::error::{ErrorKind, Result};
use crate::kv::KeyValueStore;
use crate::record::OfflineRecord;
use crate::store::OfflineStore;
use tracing::{debug, info};

pub trait SyncTransport {
    /// Send `records` and return the ids the remote side acknowledged.
    fn push(&mut self, records: &[OfflineRecord]) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Records handed to the transport.
    pub pushed: usize,
    /// Records newly marked synced.
    pub acknowledged: usize,
    /// Unsynced records that could not be decrypted and were not pushed.
    pub skipped: usize,
}

/// Push every unsynced record and mark the acknowledged ones synced.
pub fn sync_pending<S, T>(store: &mut OfflineStore<S>, transport: &mut T) -> Result<SyncReport>
where
    S: KeyValueStore,
    T: SyncTransport + ?Sized,
{
    let pending = store.get_unsynced_records()?;
    let mut report = SyncReport {
        skipped: pending.failed_count(),
        ..SyncReport::default()
    };

    if pending.records.is_empty() {
        debug!(skipped = report.skipped, "nothing to sync");
        return Ok(report);
    }

    report.pushed = pending.records.len();
    let acked = transport
        .push(&pending.records)
        .map_err(|e| e.rekind(ErrorKind::Sync, "failed to push records to remote"))?;

    // Only ids we actually sent may be marked.
    let acked: Vec<&str> = acked
        .iter()
        .map(String::as_str)
        .filter(|id| pending.records.iter().any(|r| r.id == *id))
        .collect();
    report.acknowledged = store.mark_synced(&acked)?;

    info!(
        pushed = report.pushed,
        acknowledged = report.acknowledged,
        skipped = report.skipped,
        "sync pass finished"
    );
    Ok(report)
}
