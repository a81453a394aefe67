//! Text encoding for binary data
//!
//! Ciphertext lives inside the JSON record collection, so it is stored as
//! standard (padded) base64. Decoding is strict: whitespace, URL-safe
//! characters, and missing padding are all rejected.

use crate::error::{ErrorCategory, ErrorKind, OfflineError, Result};
use base64::{Engine, engine::general_purpose::STANDARD};

/// Encode bytes as base64 text
pub fn bytes_to_text(buffer: &[u8]) -> String {
    STANDARD.encode(buffer)
}

/// Decode base64 text back into bytes
pub fn text_to_bytes(text: &str) -> Result<Vec<u8>> {
    STANDARD.decode(text).map_err(|e| {
        OfflineError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::EncodingInvalid,
            format!("base64 decoding failed: {}", e),
            e,
        )
    })
}
