//! Gzip detection and transparent decompression.
//!
//! SVF material payloads (and occasionally whole pack files) arrive
//! gzip-compressed. Detection is by magic bytes, not file name.

use std::io::Read;

use flate2::read::GzDecoder;

use crate::util::Result;

/// Check for the gzip magic bytes `1F 8B`.
pub fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

/// Decompress `data` if it is gzip-compressed, otherwise return it as-is.
pub fn maybe_gunzip(data: Vec<u8>) -> Result<Vec<u8>> {
    if !is_gzip(&data) {
        return Ok(data);
    }
    let mut decoder = GzDecoder::new(data.as_slice());
    let mut out = Vec::with_capacity(data.len() * 4);
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
