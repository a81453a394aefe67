//! End-to-end store behavior over the file-backed medium

use cyclecare_offline::cipher;
use cyclecare_offline::encoding::{bytes_to_text, text_to_bytes};
use cyclecare_offline::store::SALT_KEY;
use cyclecare_offline::{
    ErrorKind, FileKeyValueStore, KeyValueStore, OfflineRecord, OfflineStore, RecordType,
};
use serde_json::json;
use tempfile::TempDir;

fn open_store(dir: &TempDir) -> OfflineStore<FileKeyValueStore> {
    OfflineStore::new(FileKeyValueStore::open(dir.path()).unwrap())
}

#[test]
fn test_password_session_survives_restart() {
    let temp_dir = TempDir::new().unwrap();

    let mut store = open_store(&temp_dir);
    store.initialize_encryption(Some("p@ss")).unwrap();
    store
        .store_record(OfflineRecord::new("c1", RecordType::Cycle, json!({"length": 28})))
        .unwrap();

    let first = store.get_decrypted_records().unwrap();
    assert_eq!(first.records.len(), 1);
    assert_eq!(first.records[0].data, json!({"length": 28}));
    assert!(!first.records[0].encrypted);
    drop(store);

    // Fresh session, same password, same persisted salt.
    let mut store = open_store(&temp_dir);
    store.initialize_encryption(Some("p@ss")).unwrap();
    let second = store.get_decrypted_records().unwrap();
    assert!(second.is_complete());
    assert_eq!(second.records[0].data, json!({"length": 28}));

    // Different password: the record is reported, not garbage-decoded.
    let mut store = open_store(&temp_dir);
    store.initialize_encryption(Some("wrong")).unwrap();
    let third = store.get_decrypted_records().unwrap();
    assert!(third.records.is_empty());
    assert_eq!(third.failed_count(), 1);
    assert_eq!(third.failures[0].id, "c1");
    assert_eq!(third.failures[0].kind, ErrorKind::Decryption);
}

#[test]
fn test_random_key_data_lost_after_restart() {
    let temp_dir = TempDir::new().unwrap();

    let mut store = open_store(&temp_dir);
    store.initialize_encryption(None).unwrap();
    store
        .store_record(OfflineRecord::new("e1", RecordType::Emergency, json!({"blood": "O+"})))
        .unwrap();
    assert_eq!(store.get_decrypted_records().unwrap().records.len(), 1);
    drop(store);

    let mut store = open_store(&temp_dir);
    store.initialize_encryption(None).unwrap();
    let result = store.get_decrypted_records().unwrap();
    assert!(result.records.is_empty());
    assert_eq!(result.failed_count(), 1);
    // Still present on disk.
    assert_eq!(store.get_raw_records().unwrap().len(), 1);
}

#[test]
fn test_sync_partition() {
    let temp_dir = TempDir::new().unwrap();
    let mut store = open_store(&temp_dir);
    store.initialize_encryption(None).unwrap();

    store
        .store_record(OfflineRecord::new("n1", RecordType::Nutrition, json!({"water_l": 1.5})))
        .unwrap();
    let unsynced = store.get_unsynced_records().unwrap().records;
    assert_eq!(unsynced.len(), 1);
    assert_eq!(unsynced[0].id, "n1");

    store.mark_synced(&["n1"]).unwrap();
    assert!(store.get_unsynced_records().unwrap().records.is_empty());

    let raw = store.get_raw_records().unwrap();
    assert_eq!(raw.len(), 1);
    assert!(raw[0].synced);
    assert!(raw[0].encrypted);
}

#[test]
fn test_upsert_keeps_one_record_per_id() {
    let temp_dir = TempDir::new().unwrap();
    let mut store = open_store(&temp_dir);
    store.initialize_encryption(None).unwrap();

    store
        .store_record(OfflineRecord::new("r1", RecordType::Remedy, json!({"dose": 1})))
        .unwrap();
    store
        .store_record(OfflineRecord::new("r1", RecordType::Remedy, json!({"dose": 2})))
        .unwrap();

    let raw = store.get_raw_records().unwrap();
    assert_eq!(raw.iter().filter(|r| r.id == "r1").count(), 1);
    let decrypted = store.get_decrypted_records().unwrap();
    assert_eq!(decrypted.records[0].data, json!({"dose": 2}));
}

#[test]
fn test_partial_failure_tolerance() {
    let temp_dir = TempDir::new().unwrap();
    let mut store = open_store(&temp_dir);
    store.initialize_encryption(Some("p@ss")).unwrap();
    for (i, id) in ["a", "b", "c", "d"].iter().enumerate() {
        store
            .store_record(OfflineRecord::new(*id, RecordType::Symptom, json!({"n": i})))
            .unwrap();
    }

    // Truncate one nonce and flip a ciphertext byte in another, on disk.
    let mut medium = FileKeyValueStore::open(temp_dir.path()).unwrap();
    let mut raw = store.get_raw_records().unwrap();
    raw[0].data["nonce"] = json!([0, 1, 2, 3, 4, 5]);
    let ct = raw[2].data["ciphertext"].as_str().unwrap().to_string();
    let mut bytes = text_to_bytes(&ct).unwrap();
    bytes[0] ^= 0x80;
    raw[2].data["ciphertext"] = json!(bytes_to_text(&bytes));
    medium
        .set(
            cyclecare_offline::store::RECORDS_KEY,
            &serde_json::to_string(&raw).unwrap(),
        )
        .unwrap();

    let result = store.get_decrypted_records().unwrap();
    let ids: Vec<_> = result.records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["b", "d"]);
    let failed: Vec<_> = result.failures.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(failed, vec!["a", "c"]);
    assert!(result.failures.iter().all(|f| f.kind == ErrorKind::Decryption));
}

#[test]
fn test_wipe_completeness() {
    let temp_dir = TempDir::new().unwrap();
    let mut store = open_store(&temp_dir);
    store.initialize_encryption(Some("p@ss")).unwrap();
    store
        .store_record(OfflineRecord::new("c1", RecordType::Cycle, json!({"length": 30})))
        .unwrap();
    let old_salt = store.medium().get(SALT_KEY).unwrap().unwrap();

    store.clear_all().unwrap();
    assert!(store.get_raw_records().unwrap().is_empty());
    assert_eq!(store.get_storage_usage().unwrap().used, 0);
    assert!(store.is_available());

    let err = store
        .store_record(OfflineRecord::new("c2", RecordType::Cycle, json!(1)))
        .expect_err("key must be gone after wipe");
    assert_eq!(err.kind, Some(ErrorKind::NotInitialized));

    store.initialize_encryption(Some("p@ss")).unwrap();
    let new_salt = store.medium().get(SALT_KEY).unwrap().unwrap();
    assert_ne!(old_salt, new_salt);
}

#[test]
fn test_salt_blob_format() {
    let temp_dir = TempDir::new().unwrap();
    let mut store = open_store(&temp_dir);
    store.initialize_encryption(None).unwrap();

    let blob = std::fs::read_to_string(temp_dir.path().join("cyclecare_salt.json")).unwrap();
    let salt: Vec<u8> = serde_json::from_str(&blob).unwrap();
    assert_eq!(salt.len(), cipher::SALT_LEN);
}

#[test]
fn test_reads_collection_written_by_other_client() {
    let temp_dir = TempDir::new().unwrap();
    let mut medium = FileKeyValueStore::open(temp_dir.path()).unwrap();

    // Salt and key derived out of band, record written as the web client would.
    let salt = [9u8; cipher::SALT_LEN];
    medium
        .set(SALT_KEY, &serde_json::to_string(&salt.to_vec()).unwrap())
        .unwrap();
    let key = cipher::derive_key_from_password("p@ss", &salt).unwrap();
    let (ciphertext, nonce) = cipher::encrypt("{\"mood\":\"calme\"}", &key).unwrap();
    let collection = json!([{
        "id": "s9",
        "type": "symptom",
        "data": {"ciphertext": bytes_to_text(&ciphertext), "nonce": nonce.to_vec()},
        "timestamp": "2024-05-02T10:00:00.000Z",
        "encrypted": true,
        "synced": false
    }]);
    medium
        .set(
            cyclecare_offline::store::RECORDS_KEY,
            &collection.to_string(),
        )
        .unwrap();

    let mut store = OfflineStore::new(medium);
    store.initialize_encryption(Some("p@ss")).unwrap();
    let result = store.get_unsynced_records().unwrap();
    assert!(result.is_complete());
    assert_eq!(result.records[0].data, json!({"mood": "calme"}));
}
