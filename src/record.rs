//! Offline record types and their persisted JSON shape

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which feature produced a record. Opaque to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    Cycle,
    Symptom,
    Nutrition,
    Remedy,
    Emergency,
}

impl RecordType {
    pub const ALL: [RecordType; 5] = [
        RecordType::Cycle,
        RecordType::Symptom,
        RecordType::Nutrition,
        RecordType::Remedy,
        RecordType::Emergency,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Cycle => "cycle",
            RecordType::Symptom => "symptom",
            RecordType::Nutrition => "nutrition",
            RecordType::Remedy => "remedy",
            RecordType::Emergency => "emergency",
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        RecordType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown record type {:?} (expected one of cycle, symptom, nutrition, remedy, emergency)",
                    s
                )
            })
    }
}

/// One persisted unit of offline data.
///
/// When `encrypted` is true, `data` holds an [`Envelope`] rather than the
/// caller's payload. On input to `store_record`, `encrypted` is a request:
/// the store replaces `data` with the envelope before persisting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub encrypted: bool,
    pub synced: bool,
}

impl OfflineRecord {
    /// A new unsynced record that will be encrypted when stored.
    pub fn new(id: impl Into<String>, record_type: RecordType, data: Value) -> Self {
        Self {
            id: id.into(),
            record_type,
            data,
            timestamp: Utc::now(),
            encrypted: true,
            synced: false,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Store the payload as-is instead of encrypting it.
    pub fn plaintext(mut self) -> Self {
        self.encrypted = false;
        self
    }
}

/// On-disk form of an encrypted payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// base64 ciphertext, including the authentication tag
    pub ciphertext: String,
    pub nonce: Vec<u8>,
}
