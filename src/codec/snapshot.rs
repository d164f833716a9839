//! Snapshot Persistence Codec
//!
//! A snapshot is the whole versioned map written to one file:
//!
//! ```text
//! save:  map ─json─> bytes ─zlib─> packed ─AES-GCM (if keyed)─> sealed ─base64─> file
//! load:  file ─base64─> sealed ─AES-GCM─> packed ─zlib─> bytes ─json─> map
//! ```
//!
//! The JSON body maps each key to its versions, oldest first:
//!
//! ```json
//! {"name": [{"Value": "Jane", "Timestamp": "2024-05-01T10:00:00.123456789Z"}]}
//! ```
//!
//! Two older shapes are still accepted on load and upgraded in memory:
//! one `{"Value", "Expiration"}` record per key, and the oldest flat
//! `{"key": value}` map.
//!
//! Files are replaced atomically: the new contents go to `<path>.tmp`, are
//! synced, and then renamed over `<path>`.

use crate::codec::{compression, encryption, EncryptionKey};
use crate::error::{StoreError, StoreResult};
use crate::storage::Version;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Datelike, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Every key's version history, oldest first.
pub type VersionMap = HashMap<String, Vec<Version>>;

/// The on-disk shape a snapshot was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    /// `{key: [{Value, Timestamp}, ...]}`
    Versioned,
    /// `{key: {Value, Expiration}}`
    LegacyRecord,
    /// `{key: value}`
    LegacyFlat,
}

/// A decoded snapshot.
#[derive(Debug)]
pub struct Snapshot {
    pub data: VersionMap,
    /// Expiry instants carried by legacy record files.
    pub expirations: HashMap<String, DateTime<Utc>>,
    pub format: SnapshotFormat,
}

#[derive(Deserialize)]
struct LegacyRecord {
    #[serde(rename = "Value")]
    value: Value,
    #[serde(rename = "Expiration", default)]
    expiration: Option<DateTime<Utc>>,
}

/// Serializes, compresses and (with a non-empty key) encrypts `data`.
pub fn pack(data: &VersionMap, key: &EncryptionKey) -> StoreResult<Vec<u8>> {
    let json = serde_json::to_vec(data)?;
    let packed = compression::compress(&json)?;

    if key.is_empty() {
        return Ok(packed);
    }
    encryption::encrypt(&packed, key)
}

/// Reverses [`pack`].
pub fn unpack(sealed: &[u8], key: &EncryptionKey) -> StoreResult<Snapshot> {
    let json = if key.is_empty() {
        compression::decompress(sealed)?
    } else {
        compression::decompress(&encryption::decrypt(sealed, key)?)?
    };
    parse(&json)
}

/// Wraps sealed bytes in the printable file envelope.
pub fn encode_envelope(sealed: &[u8]) -> String {
    BASE64.encode(sealed)
}

/// Strips the printable file envelope.
pub fn decode_envelope(text: &[u8]) -> StoreResult<Vec<u8>> {
    Ok(BASE64.decode(text.trim_ascii())?)
}

/// Parses a snapshot body, detecting which on-disk shape it uses.
///
/// A body is versioned when every value is an array of objects. A flat file
/// whose values happen to be arrays of scalars (`{"tags": ["a", "b"]}`) is
/// upgraded like any other flat file.
pub fn parse(json: &[u8]) -> StoreResult<Snapshot> {
    let root: HashMap<String, Value> = serde_json::from_slice(json)?;

    let is_version_list =
        |v: &Value| v.as_array().is_some_and(|items| items.iter().all(Value::is_object));

    if root.values().all(is_version_list) {
        let data = root
            .into_iter()
            .map(|(key, versions)| Ok((key, serde_json::from_value(versions)?)))
            .collect::<StoreResult<VersionMap>>()?;
        return Ok(Snapshot {
            data,
            expirations: HashMap::new(),
            format: SnapshotFormat::Versioned,
        });
    }

    let upgraded_at = Utc::now();
    let is_record = |v: &Value| v.as_object().is_some_and(|o| o.contains_key("Value"));

    if root.values().all(is_record) {
        let mut data = VersionMap::with_capacity(root.len());
        let mut expirations = HashMap::new();
        for (key, record) in root {
            let record: LegacyRecord = serde_json::from_value(record)?;
            // Go's zero time (year 1) means "no expiry"
            if let Some(expiration) = record.expiration.filter(|e| e.year() > 1) {
                expirations.insert(key.clone(), expiration);
            }
            data.insert(key, vec![Version::new(payload(record.value), upgraded_at)]);
        }
        return Ok(Snapshot {
            data,
            expirations,
            format: SnapshotFormat::LegacyRecord,
        });
    }

    let data = root
        .into_iter()
        .map(|(key, value)| (key, vec![Version::new(payload(value), upgraded_at)]))
        .collect();
    Ok(Snapshot {
        data,
        expirations: HashMap::new(),
        format: SnapshotFormat::LegacyFlat,
    })
}

/// Legacy values were untyped; keep strings as-is and anything else as JSON text.
fn payload(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Reads the snapshot file. A missing file is `Ok(None)`.
pub async fn read_file(path: &Path) -> StoreResult<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(StoreError::Io(err)),
    }
}

/// Atomically replaces the file at `path` with `contents`.
pub async fn write_file(path: &Path, contents: &[u8]) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let tmp_path = temp_path(path);
    let mut tmp_file = fs::File::create(&tmp_path).await?;
    tmp_file.write_all(contents).await?;
    tmp_file.sync_all().await?;
    drop(tmp_file);
    fs::rename(&tmp_path, path).await?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
