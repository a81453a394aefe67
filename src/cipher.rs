//! Key handling and authenticated encryption for offline records
//!
//! This module provides the stateless primitives the record store builds on:
//! - scrypt for deriving a session key from a password and a stored salt
//! - AES-256-GCM for authenticated encryption of record payloads
//!
//! Every call to [`encrypt`] draws a fresh 12-byte nonce from the OS RNG.
//! The ciphertext returned includes the 16-byte GCM tag.

use crate::error::{ErrorCategory, ErrorKind, OfflineError, Result};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use scrypt::{Params, scrypt};
use zeroize::Zeroizing;

/// Length of salt in bytes
pub const SALT_LEN: usize = 16;

/// Length of nonce in bytes
pub const NONCE_LEN: usize = 12;

/// Length of session key in bytes
pub const KEY_LEN: usize = 32;

/// Per-installation salt for password-based key derivation.
pub type Salt = [u8; SALT_LEN];

/// scrypt cost parameters.
///
/// The defaults (N = 2^15, r = 8, p = 1) cost more than 100 000 rounds of
/// PBKDF2-HMAC-SHA256. Weaker settings are rejected by [`KdfParams::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    log_n: u8,
    r: u32,
    p: u32,
}

impl KdfParams {
    /// scrypt log2(N) parameter (CPU/memory cost)
    pub const DEFAULT_LOG_N: u8 = 15;

    /// scrypt r parameter (block size)
    pub const DEFAULT_R: u32 = 8;

    /// scrypt p parameter (parallelization)
    pub const DEFAULT_P: u32 = 1;

    pub fn new(log_n: u8, r: u32, p: u32) -> Result<Self> {
        if log_n < Self::DEFAULT_LOG_N || r < Self::DEFAULT_R || p < Self::DEFAULT_P {
            return Err(OfflineError::with_kind(
                ErrorCategory::User,
                ErrorKind::KeyDerivation,
                format!(
                    "scrypt parameters (log_n={}, r={}, p={}) are weaker than the minimum (log_n={}, r={}, p={})",
                    log_n,
                    r,
                    p,
                    Self::DEFAULT_LOG_N,
                    Self::DEFAULT_R,
                    Self::DEFAULT_P
                ),
            ));
        }
        Ok(Self { log_n, r, p })
    }

    pub fn log_n(&self) -> u8 {
        self.log_n
    }

    pub fn r(&self) -> u32 {
        self.r
    }

    pub fn p(&self) -> u32 {
        self.p
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            log_n: Self::DEFAULT_LOG_N,
            r: Self::DEFAULT_R,
            p: Self::DEFAULT_P,
        }
    }
}

/// A 256-bit symmetric key held only in memory.
///
/// A key is never persisted. One derived from a password can be recreated
/// from the same password and salt; a randomly generated key cannot, so data
/// encrypted under it is unrecoverable once the key is dropped. That loss is
/// accepted behavior of password-less offline mode.
#[derive(Clone)]
pub struct SessionKey(Zeroizing<[u8; KEY_LEN]>);

impl SessionKey {
    fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.0[..]).map_err(|_| {
            OfflineError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::InternalInvariant,
                "session key has invalid length",
            )
        })
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        self.0[..] == other.0[..]
    }
}

impl Eq for SessionKey {}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Fill `buf` from the OS RNG, reporting failure as `CryptoUnavailable`.
fn fill_random(buf: &mut [u8]) -> Result<()> {
    OsRng.try_fill_bytes(buf).map_err(|e| {
        OfflineError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::CryptoUnavailable,
            "secure random source unavailable",
            e,
        )
    })
}

/// Returns true if the OS RNG can be read.
pub fn crypto_available() -> bool {
    let mut probe = [0u8; 1];
    fill_random(&mut probe).is_ok()
}

/// Generate a fresh random session key
pub fn generate_random_key() -> Result<SessionKey> {
    let mut key = [0u8; KEY_LEN];
    fill_random(&mut key)?;
    Ok(SessionKey::from_bytes(key))
}

/// Generate a fresh random salt
pub fn generate_salt() -> Result<Salt> {
    let mut salt = [0u8; SALT_LEN];
    fill_random(&mut salt)?;
    Ok(salt)
}

/// Reject passwords no key may be derived from
pub fn check_password(password: &str) -> Result<()> {
    if password.is_empty() {
        return Err(OfflineError::with_kind(
            ErrorCategory::User,
            ErrorKind::KeyDerivation,
            "password must not be empty",
        ));
    }
    Ok(())
}

/// Derive a session key from a password and salt using scrypt with default costs
pub fn derive_key_from_password(password: &str, salt: &[u8]) -> Result<SessionKey> {
    derive_key_with_params(password, salt, &KdfParams::default())
}

/// Derive a session key from a password and salt using scrypt
pub fn derive_key_with_params(password: &str, salt: &[u8], kdf: &KdfParams) -> Result<SessionKey> {
    check_password(password)?;
    if salt.len() != SALT_LEN {
        return Err(OfflineError::with_kind(
            ErrorCategory::User,
            ErrorKind::KeyDerivation,
            format!("salt must be {} bytes, got {}", SALT_LEN, salt.len()),
        ));
    }

    let params = Params::new(kdf.log_n, kdf.r, kdf.p, KEY_LEN).map_err(|e| {
        OfflineError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::KeyDerivation,
            format!("failed to create scrypt params: {}", e),
        )
    })?;

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    scrypt(password.as_bytes(), salt, &params, &mut key[..]).map_err(|e| {
        OfflineError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::KeyDerivation,
            format!("scrypt key derivation failed: {}", e),
        )
    })?;

    Ok(SessionKey(key))
}

/// Encrypt plaintext under `key` with a fresh random nonce
///
/// Returns the ciphertext (with tag) and the nonce that was used.
pub fn encrypt(plaintext: &str, key: &SessionKey) -> Result<(Vec<u8>, [u8; NONCE_LEN])> {
    let mut nonce = [0u8; NONCE_LEN];
    fill_random(&mut nonce)?;

    let ciphertext = encrypt_with_nonce(plaintext, key, &nonce)?;
    Ok((ciphertext, nonce))
}

/// Encrypt plaintext under `key` with a caller-provided nonce
///
/// This function is ONLY for testing purposes to generate deterministic output.
/// NEVER use this in production - always use `encrypt()` which generates a random nonce.
pub(crate) fn encrypt_with_nonce(
    plaintext: &str,
    key: &SessionKey,
    nonce: &[u8; NONCE_LEN],
) -> Result<Vec<u8>> {
    let cipher = key.cipher()?;
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext.as_bytes())
        .map_err(|_| encryption_failed(plaintext.len()))
}

// AES-GCM only refuses plaintexts over its length limit.
fn encryption_failed(len: usize) -> OfflineError {
    OfflineError::with_kind(
        ErrorCategory::Internal,
        ErrorKind::InternalInvariant,
        format!("AES-GCM refused a {} byte plaintext", len),
    )
}

/// Decrypt ciphertext produced by [`encrypt`]
pub fn decrypt(ciphertext: &[u8], key: &SessionKey, nonce: &[u8]) -> Result<String> {
    if nonce.len() != NONCE_LEN {
        return Err(OfflineError::with_kind(
            ErrorCategory::User,
            ErrorKind::Decryption,
            format!("nonce must be {} bytes, got {}", NONCE_LEN, nonce.len()),
        ));
    }

    let cipher = key.cipher()?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| {
            OfflineError::with_kind(
                ErrorCategory::User,
                ErrorKind::Decryption,
                "corrupt input, tampered-with data, or wrong key",
            )
        })?;

    String::from_utf8(plaintext).map_err(|e| {
        OfflineError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Decryption,
            "decrypted payload is not valid UTF-8",
            e,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_salt(byte: u8) -> Salt {
        [byte; SALT_LEN]
    }

    #[test]
    fn test_roundtrip_random_key() {
        let key = generate_random_key().unwrap();
        let (ciphertext, nonce) = encrypt("{\"length\":28}", &key).unwrap();
        let decrypted = decrypt(&ciphertext, &key, &nonce).unwrap();
        assert_eq!(decrypted, "{\"length\":28}");
    }

    #[test]
    fn test_empty_plaintext() {
        let key = generate_random_key().unwrap();
        let (ciphertext, nonce) = encrypt("", &key).unwrap();
        // Only the GCM tag remains.
        assert_eq!(ciphertext.len(), 16);
        assert_eq!(decrypt(&ciphertext, &key, &nonce).unwrap(), "");
    }

    #[test]
    fn test_unicode_plaintext() {
        let key = generate_random_key().unwrap();
        let plaintext = "règles douloureuses, fatigue 😴";
        let (ciphertext, nonce) = encrypt(plaintext, &key).unwrap();
        assert_eq!(decrypt(&ciphertext, &key, &nonce).unwrap(), plaintext);
    }

    #[test]
    fn test_nonce_unique_per_call() {
        let key = generate_random_key().unwrap();
        let (ct1, nonce1) = encrypt("same", &key).unwrap();
        let (ct2, nonce2) = encrypt("same", &key).unwrap();
        assert_ne!(nonce1, nonce2);
        assert_ne!(ct1, ct2);
    }

    #[test]
    fn test_deterministic_with_fixed_nonce() {
        let key = derive_key_from_password("test", &fixed_salt(1)).unwrap();
        let nonce = [2u8; NONCE_LEN];
        let ct1 = encrypt_with_nonce("hello world", &key, &nonce).unwrap();
        let ct2 = encrypt_with_nonce("hello world", &key, &nonce).unwrap();
        assert_eq!(ct1, ct2);
        assert_eq!(decrypt(&ct1, &key, &nonce).unwrap(), "hello world");
    }

    #[test]
    fn test_wrong_key_rejected() {
        let k1 = generate_random_key().unwrap();
        let k2 = generate_random_key().unwrap();
        let (ciphertext, nonce) = encrypt("secret", &k1).unwrap();
        let err = decrypt(&ciphertext, &k2, &nonce).expect_err("expected authentication failure");
        assert_eq!(err.kind, Some(ErrorKind::Decryption));
    }

    #[test]
    fn test_wrong_nonce_rejected() {
        let key = generate_random_key().unwrap();
        let (ciphertext, mut nonce) = encrypt("secret", &key).unwrap();
        nonce[0] ^= 0x01;
        let err = decrypt(&ciphertext, &key, &nonce).expect_err("expected authentication failure");
        assert_eq!(err.kind, Some(ErrorKind::Decryption));
    }

    #[test]
    fn test_truncated_nonce_rejected() {
        let key = generate_random_key().unwrap();
        let (ciphertext, nonce) = encrypt("secret", &key).unwrap();
        let err = decrypt(&ciphertext, &key, &nonce[..8]).expect_err("expected nonce error");
        assert_eq!(err.kind, Some(ErrorKind::Decryption));
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let key = generate_random_key().unwrap();
        let (mut ciphertext, nonce) = encrypt("secret", &key).unwrap();
        ciphertext[0] ^= 0xFF;
        let err = decrypt(&ciphertext, &key, &nonce).expect_err("expected authentication failure");
        assert_eq!(err.kind, Some(ErrorKind::Decryption));
    }

    #[test]
    fn test_derivation_deterministic() {
        let k1 = derive_key_from_password("p@ss", &fixed_salt(7)).unwrap();
        let k2 = derive_key_from_password("p@ss", &fixed_salt(7)).unwrap();
        assert_eq!(k1, k2);

        let (ciphertext, nonce) = encrypt("cross", &k1).unwrap();
        assert_eq!(decrypt(&ciphertext, &k2, &nonce).unwrap(), "cross");
    }

    #[test]
    fn test_derivation_depends_on_salt() {
        let k1 = derive_key_from_password("p@ss", &fixed_salt(7)).unwrap();
        let k2 = derive_key_from_password("p@ss", &fixed_salt(8)).unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_derivation_rejects_empty_password() {
        let err = derive_key_from_password("", &fixed_salt(1)).expect_err("expected error");
        assert_eq!(err.kind, Some(ErrorKind::KeyDerivation));
        assert_eq!(err.category, ErrorCategory::User);
    }

    #[test]
    fn test_derivation_rejects_bad_salt_length() {
        let err = derive_key_from_password("p@ss", &[0u8; 8]).expect_err("expected error");
        assert_eq!(err.kind, Some(ErrorKind::KeyDerivation));
    }

    #[test]
    fn test_weak_kdf_params_rejected() {
        let err = KdfParams::new(10, 8, 1).expect_err("expected error");
        assert_eq!(err.kind, Some(ErrorKind::KeyDerivation));
        let msg = err.to_string();
        assert!(msg.contains("(log_n=10, r=8, p=1) are weaker"), "{}", msg);
        assert!(msg.contains("minimum (log_n=15, r=8, p=1)"), "{}", msg);
        assert!(KdfParams::new(16, 8, 1).is_ok());
    }

    #[test]
    fn test_encryption_failure_is_not_crypto_unavailable() {
        let err = encryption_failed(usize::MAX);
        assert_eq!(err.kind, Some(ErrorKind::InternalInvariant));
        assert_eq!(err.category, ErrorCategory::Internal);
    }

    #[test]
    fn test_check_password() {
        assert!(check_password("p@ss").is_ok());
        let err = check_password("").expect_err("expected error");
        assert_eq!(err.kind, Some(ErrorKind::KeyDerivation));
    }

    #[test]
    fn test_salts_differ() {
        assert_ne!(generate_salt().unwrap(), generate_salt().unwrap());
    }

    #[test]
    fn test_debug_hides_key_material() {
        let key = generate_random_key().unwrap();
        assert_eq!(format!("{:?}", key), "SessionKey(..)");
    }
}
