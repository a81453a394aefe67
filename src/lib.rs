//! Encrypted offline storage for CycleCare
//!
//! Records produced while offline are encrypted with AES-256-GCM under a
//! session key (derived from the user's password with scrypt, or random),
//! persisted as one JSON collection in a key-value medium, and tracked as
//! synced or unsynced until a remote pass acknowledges them.

pub mod cipher;
pub mod config;
pub mod encoding;
pub mod error;
pub mod export;
pub mod kv;
pub mod passphrase;
pub mod record;
pub mod store;
pub mod sync;

pub use error::{ErrorCategory, ErrorKind, OfflineError, Result};
pub use kv::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use record::{OfflineRecord, RecordType};
pub use store::{DecryptedRecords, OfflineStore, RecordFailure, StorageUsage};
