//! Error Types
//!
//! Every fallible store operation returns [`StoreError`]. Expected conditions
//! (a missing key, an expired key) are ordinary variants, not panics, and a
//! compare-and-swap mismatch is not an error at all: it is `Ok(false)`.

use std::io;
use thiserror::Error;

/// Errors returned by the store engine and its codecs.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key has no current version (never set, deleted, or swept).
    #[error("key not found: {0}")]
    NotFound(String),

    /// The key exists but its liveness window has passed.
    #[error("key expired: {0}")]
    Expired(String),

    /// The requested version index is out of range for an existing key.
    #[error("version {index} not found for key {key} ({versions} versions)")]
    VersionNotFound {
        key: String,
        index: usize,
        versions: usize,
    },

    /// Authenticated decryption rejected the ciphertext.
    ///
    /// Either the key is wrong or the data was corrupted or tampered with.
    #[error("decryption failed: wrong key or corrupted data")]
    DecryptionFailed,

    /// Sealing the snapshot failed.
    #[error("encryption failed")]
    Encryption,

    /// The encryption key is not a valid AES key length.
    #[error("invalid encryption key length: {0} bytes (expected 16, 24 or 32)")]
    InvalidKeyLength(usize),

    /// The snapshot file is not valid base64.
    #[error("invalid snapshot envelope: {0}")]
    Envelope(#[from] base64::DecodeError),

    /// The zlib stream could not be produced or inflated.
    #[error("compression error: {0}")]
    Compression(#[source] io::Error),

    /// Malformed JSON on load, or a marshal failure on save.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File I/O failed for a reason other than "file does not exist".
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Returns true for the "key is not servable" family of errors.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_) | StoreError::VersionNotFound { .. })
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
