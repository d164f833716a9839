//! Authenticated Encryption
//!
//! Snapshots are sealed with AES-GCM. The AES variant follows the key length
//! (16, 24 or 32 bytes select AES-128, AES-192 or AES-256), and every sealed
//! buffer is self-contained:
//!
//! ```text
//! ┌──────────────┬─────────────────────────────┬──────────────┐
//! │ nonce (12 B) │ ciphertext (len(plaintext)) │ tag (16 B)   │
//! └──────────────┴─────────────────────────────┴──────────────┘
//! ```
//!
//! A fresh random nonce is drawn for every seal, so sealing the same
//! plaintext twice gives different output.

use crate::error::{StoreError, StoreResult};
#[allow(deprecated)]
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{aes::Aes192, Aes128Gcm, Aes256Gcm, AesGcm};
use std::fmt;

/// Size of the nonce prepended to every sealed buffer.
pub const NONCE_LEN: usize = 12;

/// Size of the GCM authentication tag.
pub const TAG_LEN: usize = 16;

type Aes192Gcm = AesGcm<Aes192, U12>;

/// The secret a store seals its snapshots with.
///
/// An empty key means "store snapshots unencrypted".
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EncryptionKey(Vec<u8>);

impl EncryptionKey {
    /// A key that disables encryption.
    pub fn none() -> Self {
        Self(Vec::new())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Checks that the key is empty or a valid AES key length.
    pub fn validate(&self) -> StoreResult<()> {
        match self.0.len() {
            0 | 16 | 24 | 32 => Ok(()),
            len => Err(StoreError::InvalidKeyLength(len)),
        }
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material
        write!(f, "EncryptionKey({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for EncryptionKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for EncryptionKey {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for EncryptionKey {
    fn from(bytes: &[u8; N]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<&str> for EncryptionKey {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

/// An AES-GCM instance sized to the key.
enum Cipher {
    Aes128(Aes128Gcm),
    Aes192(Aes192Gcm),
    Aes256(Aes256Gcm),
}

impl Cipher {
    fn new(key: &EncryptionKey) -> StoreResult<Self> {
        let bytes = key.as_bytes();
        let invalid = |_| StoreError::InvalidKeyLength(bytes.len());
        match bytes.len() {
            16 => Aes128Gcm::new_from_slice(bytes).map(Cipher::Aes128).map_err(invalid),
            24 => Aes192Gcm::new_from_slice(bytes).map(Cipher::Aes192).map_err(invalid),
            32 => Aes256Gcm::new_from_slice(bytes).map(Cipher::Aes256).map_err(invalid),
            len => Err(StoreError::InvalidKeyLength(len)),
        }
    }

    fn seal(&self, nonce: &GenericArray<u8, U12>, plaintext: &[u8]) -> Option<Vec<u8>> {
        match self {
            Cipher::Aes128(c) => c.encrypt(nonce, plaintext).ok(),
            Cipher::Aes192(c) => c.encrypt(nonce, plaintext).ok(),
            Cipher::Aes256(c) => c.encrypt(nonce, plaintext).ok(),
        }
    }

    fn open(&self, nonce: &GenericArray<u8, U12>, ciphertext: &[u8]) -> Option<Vec<u8>> {
        match self {
            Cipher::Aes128(c) => c.decrypt(nonce, ciphertext).ok(),
            Cipher::Aes192(c) => c.decrypt(nonce, ciphertext).ok(),
            Cipher::Aes256(c) => c.decrypt(nonce, ciphertext).ok(),
        }
    }
}

/// Seals `plaintext` under `key`, returning `nonce || ciphertext || tag`.
pub fn encrypt(plaintext: &[u8], key: &EncryptionKey) -> StoreResult<Vec<u8>> {
    let cipher = Cipher::new(key)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let sealed = cipher
        .seal(&nonce, plaintext)
        .ok_or(StoreError::Encryption)?;

    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Opens a buffer produced by [`encrypt`].
///
/// Any failure to authenticate, including an empty or wrongly sized key and
/// input too short to hold a nonce and tag, is reported as
/// [`StoreError::DecryptionFailed`].
pub fn decrypt(sealed: &[u8], key: &EncryptionKey) -> StoreResult<Vec<u8>> {
    let cipher = Cipher::new(key).map_err(|_| StoreError::DecryptionFailed)?;

    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(StoreError::DecryptionFailed);
    }

    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    #[allow(deprecated)]
    let nonce = GenericArray::from_slice(nonce);
    cipher
        .open(nonce, ciphertext)
        .ok_or(StoreError::DecryptionFailed)
}
