//! Encryption Key Rotation
//!
//! Re-seals the snapshot under a new key. The whole procedure runs under the
//! store's write lock, after expired keys have been evicted:
//!
//! 1. seal the in-memory map under the current key
//! 2. open that buffer again with the current key, recovering the
//!    compressed plaintext
//! 3. switch to the new key
//! 4. seal the plaintext under the new key
//! 5. decode the result through the regular load path and install it
//! 6. write the new envelope to disk
//!
//! Any failure after step 3 restores the previous key, and the file on disk
//! is only replaced at step 6.

use crate::codec::{encryption, snapshot, EncryptionKey};
use crate::error::{StoreError, StoreResult};
use crate::storage::engine::{State, Store};
use std::sync::atomic::Ordering;
use tracing::{info, warn};

impl Store {
    /// Replaces the snapshot encryption key.
    ///
    /// Fails with `InvalidKeyLength` if `new_key` is empty or not 16, 24 or
    /// 32 bytes, and with `DecryptionFailed` if the store is not encrypted or
    /// its current key cannot open what it seals. On failure the previous key
    /// stays in effect and the snapshot file is untouched.
    pub async fn rotate_encryption_key(
        &self,
        new_key: impl Into<EncryptionKey>,
    ) -> StoreResult<()> {
        let new_key = new_key.into();
        if new_key.is_empty() {
            return Err(StoreError::InvalidKeyLength(0));
        }
        new_key.validate()?;

        let mut state = self.write_state().await?;
        let old_key = state.key.clone();
        self.purge_locked(&mut state).await;

        let sealed = snapshot::pack(&state.data, &old_key)?;
        let packed = encryption::decrypt(&sealed, &old_key).map_err(|err| {
            warn!(error = %err, "Current key cannot open the snapshot, rotation aborted");
            err
        })?;

        state.key = new_key;
        match self.reseal(&mut state, &packed).await {
            Ok(()) => {
                self.counters.rotations.fetch_add(1, Ordering::Relaxed);
                info!(keys = state.data.len(), "Encryption key rotated");
                Ok(())
            }
            Err(err) => {
                state.key = old_key;
                warn!(error = %err, "Key rotation failed, previous key restored");
                Err(err)
            }
        }
    }

    async fn reseal(&self, state: &mut State, packed: &[u8]) -> StoreResult<()> {
        let sealed = encryption::encrypt(packed, &state.key)?;
        let envelope = snapshot::encode_envelope(&sealed);

        let reopened = snapshot::unpack(&snapshot::decode_envelope(envelope.as_bytes())?, &state.key)?;
        state.install(reopened);

        snapshot::write_file(&self.path, envelope.as_bytes()).await?;
        state.dirty = false;
        Ok(())
    }
}
