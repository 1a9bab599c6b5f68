//! SVF2 hash-list parser.
//!
//! A view references its shared geometry and material assets by content
//! hash. The hash list is a flat binary table: `hashSize:u16` (must be a
//! multiple of 4), `version:u16`, `count:u16`, then `count` fixed-size hash
//! records. The header occupies record slot 0, so record `i` starts at byte
//! `i * hashSize` with `i` counted from 1.

use crate::util::{ByteCursor, Error, Result};

/// Decode a hash list into lowercase hex strings, in record order.
pub fn parse_hashes(data: &[u8]) -> Result<Vec<String>> {
    let mut cur = ByteCursor::new(data);
    let hash_size = cur.u16()? as usize;
    if hash_size == 0 || hash_size % 4 != 0 {
        return Err(Error::invalid(format!("hash size {} not a multiple of 4", hash_size)));
    }
    let _version = cur.u16()?;
    let count = cur.u16()? as usize;

    let mut hashes = Vec::with_capacity(count);
    for i in 1..=count {
        cur.seek(i * hash_size)?;
        let record = cur.bytes(hash_size)?;
        hashes.push(hex_encode(record));
    }
    Ok(hashes)
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}
