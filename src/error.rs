use std::error::Error as StdError;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Any failure that cannot be confidently attributed to any other error
    /// category in this enum.
    ///
    /// In particular this means that use of Internal is never a guarantee
    /// the error is not, for example, caused by a bad password - merely that
    /// it cannot be confidently determined by the code.
    Internal,

    /// The caller provided invalid input or requested an operation that is
    /// unsupported or impossible to complete in the current state.
    User,
}

/// Fine-grained condition flags for consumers that want to branch on error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The host has no usable secure random source or cipher primitive.
    CryptoUnavailable,
    /// Password-based key derivation rejected its input (empty password,
    /// wrong salt length, or unsupported parameters).
    KeyDerivation,
    /// Setting up the session key failed, including first-time salt creation.
    EncryptionInit,
    /// Authentication failed due to a wrong key, tampering, or corruption.
    Decryption,
    /// The key-value medium failed to read, write, or remove a blob.
    Persistence,
    /// A write was attempted before `initialize_encryption`.
    NotInitialized,
    /// A persisted blob (record collection or salt) could not be parsed.
    CorruptStore,
    /// Text that should hold base64 data did not decode.
    EncodingInvalid,
    /// A record payload could not be serialized or deserialized as JSON.
    Serialization,
    /// Offline mode was requested but storage or crypto is unavailable.
    OfflineUnavailable,
    /// Building or writing an export bundle failed.
    Export,
    /// Pushing records to the remote side failed.
    Sync,
    /// Password could not be obtained from the configured reader.
    PassphraseUnavailable,
    /// Interaction with stdin/stdout or other non-storage I/O failed.
    Io,
    /// Unexpected state reached within the store logic.
    InternalInvariant,
}

#[derive(Debug, Error)]
#[error("{msg}")]
pub struct OfflineError {
    /// Broad error category, always provided.
    pub category: ErrorCategory,
    /// Optional specific condition tag for consumers that need to
    /// branch their behavior. Any code consuming errors MUST handle
    /// the absence of a defined kind.
    pub kind: Option<ErrorKind>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    msg: String,
}

impl OfflineError {
    /// Creates a new error with a required category and display message.
    pub fn new(category: ErrorCategory, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: None,
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that also tags the failure with a kind.
    pub fn with_kind(category: ErrorCategory, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: None,
            msg: msg.into(),
        }
    }

    /// Creates a new error that carries both a kind tag and the originating source error.
    pub fn with_kind_and_source(
        category: ErrorCategory,
        kind: ErrorKind,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: Some(Box::new(source)),
            msg: msg.into(),
        }
    }

    /// The user-facing message carried by the error.
    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Wraps the current error with a higher-level message while preserving the original as source.
    pub fn with_context(self, msg: impl Into<String>) -> Self {
        let category = self.category;
        let kind = self.kind;
        Self {
            category,
            kind,
            source: Some(Box::new(self)),
            msg: msg.into(),
        }
    }

    /// Like `with_context`, but re-tags the wrapper with `kind`.
    ///
    /// Used where a layer reports its own condition (for example
    /// `EncryptionInit`) while the lower-level kind stays reachable
    /// through `root_kind`.
    pub fn rekind(self, kind: ErrorKind, msg: impl Into<String>) -> Self {
        let category = self.category;
        Self {
            category,
            kind: Some(kind),
            source: Some(Box::new(self)),
            msg: msg.into(),
        }
    }

    /// The kind of the innermost `OfflineError` in the source chain.
    pub fn root_kind(&self) -> Option<ErrorKind> {
        let mut kind = self.kind;
        let mut current = StdError::source(self);
        while let Some(err) = current {
            if let Some(inner) = err.downcast_ref::<OfflineError>() {
                if inner.kind.is_some() {
                    kind = inner.kind;
                }
            }
            current = err.source();
        }
        kind
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, OfflineError>;
