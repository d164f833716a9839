//! Zlib Compression
//!
//! Snapshots are compressed with zlib (RFC 1950) so files written by other
//! zlib producers of the same format remain readable.

use crate::error::{StoreError, StoreResult};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Compresses `data` into a complete zlib stream.
pub fn compress(data: &[u8]) -> StoreResult<Vec<u8>> {
    // Pre-size for the common case of JSON shrinking well
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data).map_err(StoreError::Compression)?;
    encoder.finish().map_err(StoreError::Compression)
}

/// Inflates a complete zlib stream.
///
/// Truncated or corrupted input fails with [`StoreError::Compression`].
pub fn decompress(data: &[u8]) -> StoreResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 4);
    decoder
        .read_to_end(&mut out)
        .map_err(StoreError::Compression)?;
    Ok(out)
}
