//! Snapshot Codecs
//!
//! The layers a snapshot passes through on its way to disk, leaves first:
//!
//! - `compression`: zlib wrap/unwrap of a byte buffer
//! - `encryption`: AES-GCM sealing with an embedded nonce
//! - `snapshot`: JSON body, legacy-shape upgrades, base64 envelope and
//!   atomic file replacement
//!
//! Every function takes its key explicitly; there is no process-wide key.

pub mod compression;
pub mod encryption;
pub mod snapshot;

pub use encryption::EncryptionKey;
pub use snapshot::{Snapshot, SnapshotFormat, VersionMap};
