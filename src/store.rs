//! Encrypted offline record store
//!
//! An [`OfflineStore`] owns a key-value medium, the current session key,
//! and its configuration. The whole record collection is stored as one
//! JSON array under [`RECORDS_KEY`] and rewritten on every mutation; the
//! salt is stored separately under [`SALT_KEY`].
//!
//! Mutations take `&mut self`, which serializes writers sharing one
//! instance. Two instances (or two processes) over the same medium are not
//! coordinated: the last whole-collection write wins.

use crate::cipher::{self, NONCE_LEN, SALT_LEN, Salt, SessionKey};
use crate::config::StoreConfig;
use crate::encoding::{bytes_to_text, text_to_bytes};
use crate::error::{ErrorCategory, ErrorKind, OfflineError, Result};
use crate::kv::KeyValueStore;
use crate::record::{Envelope, OfflineRecord};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Medium key holding the JSON array of records.
pub const RECORDS_KEY: &str = "cyclecare_offline_data";

/// Medium key holding the salt as a JSON array of 16 integers.
pub const SALT_KEY: &str = "cyclecare_salt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageUsage {
    /// Bytes taken by the serialized record collection.
    pub used: u64,
    /// Capacity ceiling the collection is measured against.
    pub available: u64,
}

/// A record left out of a decrypted read, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub id: String,
    pub kind: ErrorKind,
    pub reason: String,
}

/// Result of a decrypted read: the readable records plus the ones skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecryptedRecords {
    pub records: Vec<OfflineRecord>,
    pub failures: Vec<RecordFailure>,
}

impl DecryptedRecords {
    pub fn failed_count(&self) -> usize {
        self.failures.len()
    }

    /// True if every stored record in scope was returned.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct OfflineStore<S: KeyValueStore> {
    medium: S,
    key: Option<SessionKey>,
    config: StoreConfig,
}

impl<S: KeyValueStore> OfflineStore<S> {
    pub fn new(medium: S) -> Self {
        Self::with_config(medium, StoreConfig::default())
    }

    pub fn with_config(medium: S, config: StoreConfig) -> Self {
        Self {
            medium,
            key: None,
            config,
        }
    }

    pub fn medium(&self) -> &S {
        &self.medium
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns true if both the medium and the OS crypto primitives work.
    pub fn is_available(&self) -> bool {
        self.medium.probe() && cipher::crypto_available()
    }

    /// Refuses offline mode when [`is_available`](Self::is_available) is false.
    pub fn ensure_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(OfflineError::with_kind(
                ErrorCategory::User,
                ErrorKind::OfflineUnavailable,
                "offline mode is not available: secure storage or cryptography is missing",
            ))
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.key.is_some()
    }

    /// Set up the session key, creating the salt on first use.
    ///
    /// With a password the key is derived from it and the persisted salt, so
    /// a later session using the same password can read today's records.
    /// Without one a random key is generated; records encrypted under it
    /// cannot be read once this store is dropped.
    ///
    /// Calling this again replaces the session key. An empty password fails
    /// with `KeyDerivation` and leaves the current key in place.
    pub fn initialize_encryption(&mut self, password: Option<&str>) -> Result<()> {
        if let Some(password) = password {
            cipher::check_password(password)?;
        }

        let salt = match self.load_salt() {
            Ok(Some(salt)) => salt,
            Ok(None) => {
                let salt = cipher::generate_salt().map_err(init_error)?;
                self.save_salt(&salt).map_err(init_error)?;
                debug!("created new salt");
                salt
            }
            Err(e) => return Err(init_error(e)),
        };

        let (key, key_source) = match password {
            Some(password) => (
                cipher::derive_key_with_params(password, &salt, &self.config.kdf)?,
                "password",
            ),
            None => (cipher::generate_random_key().map_err(init_error)?, "random"),
        };
        self.key = Some(key);

        info!(key_source, "offline encryption initialized");
        Ok(())
    }

    /// Insert or replace the record with `record.id`.
    ///
    /// If `record.encrypted` is set, `data` is serialized, encrypted under
    /// the session key and replaced by an [`Envelope`] before persisting.
    pub fn store_record(&mut self, mut record: OfflineRecord) -> Result<()> {
        let key = self.session_key()?;

        if record.encrypted {
            let plaintext = serde_json::to_string(&record.data).map_err(|e| {
                OfflineError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::Serialization,
                    format!("failed to serialize payload of record {}", record.id),
                    e,
                )
            })?;
            let (ciphertext, nonce) = cipher::encrypt(&plaintext, key)?;
            let envelope = Envelope {
                ciphertext: bytes_to_text(&ciphertext),
                nonce: nonce.to_vec(),
            };
            record.data = serde_json::to_value(envelope).map_err(|e| {
                OfflineError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::Serialization,
                    "failed to serialize envelope",
                    e,
                )
            })?;
        }

        let mut records = self.get_raw_records()?;
        let before = records.len();
        records.retain(|existing| existing.id != record.id);
        let replaced = records.len() != before;

        debug!(
            id = %record.id,
            record_type = %record.record_type,
            encrypted = record.encrypted,
            replaced,
            "storing offline record"
        );
        records.push(record);
        self.save_records(&records)
    }

    /// The persisted collection exactly as stored.
    pub fn get_raw_records(&self) -> Result<Vec<OfflineRecord>> {
        let Some(blob) = self.medium.get(RECORDS_KEY)? else {
            return Ok(Vec::new());
        };
        serde_json::from_str(&blob).map_err(|e| {
            OfflineError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::CorruptStore,
                "stored record collection is not valid",
                e,
            )
        })
    }

    /// Every record with encrypted payloads decrypted.
    ///
    /// Returned copies have `encrypted` cleared; the stored flag is not
    /// touched. A record that cannot be decrypted is left out and listed in
    /// `failures` instead of failing the whole read.
    pub fn get_decrypted_records(&self) -> Result<DecryptedRecords> {
        let raw = self.get_raw_records()?;
        Ok(self.decrypt_all(raw))
    }

    /// Like [`get_decrypted_records`](Self::get_decrypted_records),
    /// restricted to records not yet acknowledged by a sync.
    pub fn get_unsynced_records(&self) -> Result<DecryptedRecords> {
        let raw = self
            .get_raw_records()?
            .into_iter()
            .filter(|record| !record.synced)
            .collect();
        Ok(self.decrypt_all(raw))
    }

    /// Flag the records with the given ids as synced.
    ///
    /// Unknown ids are ignored. Returns how many records changed state.
    pub fn mark_synced<I: AsRef<str>>(&mut self, ids: &[I]) -> Result<usize> {
        let wanted: HashSet<&str> = ids.iter().map(AsRef::as_ref).collect();
        let mut records = self.get_raw_records()?;

        let mut changed = 0;
        for record in records.iter_mut() {
            if !record.synced && wanted.contains(record.id.as_str()) {
                record.synced = true;
                changed += 1;
            }
        }

        debug!(requested = wanted.len(), changed, "marking records synced");
        if changed > 0 {
            self.save_records(&records)?;
        }
        Ok(changed)
    }

    /// Remove the record collection and the salt, and forget the session key.
    pub fn clear_all(&mut self) -> Result<()> {
        self.medium.remove(RECORDS_KEY)?;
        self.medium.remove(SALT_KEY)?;
        self.key = None;
        info!("offline data cleared");
        Ok(())
    }

    pub fn get_storage_usage(&self) -> Result<StorageUsage> {
        let used = self
            .medium
            .get(RECORDS_KEY)?
            .map(|blob| blob.len() as u64)
            .unwrap_or(0);
        Ok(StorageUsage {
            used,
            available: self.config.quota_bytes,
        })
    }

    fn session_key(&self) -> Result<&SessionKey> {
        self.key.as_ref().ok_or_else(|| {
            OfflineError::with_kind(
                ErrorCategory::User,
                ErrorKind::NotInitialized,
                "encryption is not initialized; call initialize_encryption first",
            )
        })
    }

    fn decrypt_all(&self, raw: Vec<OfflineRecord>) -> DecryptedRecords {
        let mut result = DecryptedRecords::default();
        for mut record in raw {
            if !record.encrypted {
                result.records.push(record);
                continue;
            }
            match self.open_envelope(&record.data) {
                Ok(data) => {
                    record.data = data;
                    record.encrypted = false;
                    result.records.push(record);
                }
                Err(e) => {
                    warn!(id = %record.id, error = %e, "skipping record that failed to decrypt");
                    result.failures.push(RecordFailure {
                        id: record.id,
                        kind: e.kind.unwrap_or(ErrorKind::InternalInvariant),
                        reason: e.to_string(),
                    });
                }
            }
        }
        debug!(
            returned = result.records.len(),
            failed = result.failures.len(),
            "decrypted offline records"
        );
        result
    }

    fn open_envelope(&self, data: &Value) -> Result<Value> {
        let key = self.session_key()?;
        let envelope = Envelope::deserialize_from(data)?;
        let ciphertext = text_to_bytes(&envelope.ciphertext)?;
        let plaintext = cipher::decrypt(&ciphertext, key, &envelope.nonce)?;
        serde_json::from_str(&plaintext).map_err(|e| {
            OfflineError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Serialization,
                "decrypted payload is not valid JSON",
                e,
            )
        })
    }

    fn load_salt(&self) -> Result<Option<Salt>> {
        let Some(blob) = self.medium.get(SALT_KEY)? else {
            return Ok(None);
        };
        let bytes: Vec<u8> = serde_json::from_str(&blob).map_err(|e| {
            OfflineError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::CorruptStore,
                "stored salt is not valid",
                e,
            )
        })?;
        let salt: Salt = bytes.try_into().map_err(|bytes: Vec<u8>| {
            OfflineError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::CorruptStore,
                format!("stored salt has {} bytes, expected {}", bytes.len(), SALT_LEN),
            )
        })?;
        Ok(Some(salt))
    }

    fn save_salt(&mut self, salt: &Salt) -> Result<()> {
        let blob = serde_json::to_string(&salt.to_vec()).map_err(|e| {
            OfflineError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Serialization,
                "failed to serialize salt",
                e,
            )
        })?;
        self.medium.set(SALT_KEY, &blob)
    }

    fn save_records(&mut self, records: &[OfflineRecord]) -> Result<()> {
        let blob = serde_json::to_string(records).map_err(|e| {
            OfflineError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Serialization,
                "failed to serialize record collection",
                e,
            )
        })?;
        self.medium.set(RECORDS_KEY, &blob)
    }
}

impl Envelope {
    fn deserialize_from(data: &Value) -> Result<Self> {
        let envelope: Envelope = serde_json::from_value(data.clone()).map_err(|e| {
            OfflineError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::CorruptStore,
                "encrypted record does not hold a ciphertext envelope",
                e,
            )
        })?;
        if envelope.nonce.len() != NONCE_LEN {
            return Err(OfflineError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::Decryption,
                format!(
                    "envelope nonce has {} bytes, expected {}",
                    envelope.nonce.len(),
                    NONCE_LEN
                ),
            ));
        }
        Ok(envelope)
    }
}

fn init_error(err: OfflineError) -> OfflineError {
    err.rekind(ErrorKind::EncryptionInit, "failed to initialize encryption")
}
