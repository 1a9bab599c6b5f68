//! Generic SVF pack-file container.
//!
//! A pack file holds multiple typed, versioned entries (fragments, geometry
//! metadata, or mesh payloads). The layout is: a short header (container
//! type string plus an i32 format version), the entry payloads, and a
//! trailing index — the last 8 bytes hold the offsets of the entries table
//! and the type table. Each entry payload begins with a u32 reference into
//! the shared type table.

use crate::scene::Transform;
use crate::util::compression::maybe_gunzip;
use crate::util::{ByteCursor, Error, Result};

/// Resolved type descriptor of a pack-file entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryType {
    /// Entry class, e.g. `Autodesk.CloudPlatform.Geometry`.
    pub class: String,
    /// Concrete entry type, e.g. `Autodesk.CloudPlatform.OpenCTM`.
    pub type_name: String,
    /// Entry format version, gating layout differences between releases.
    pub version: u32,
}

/// Parsed pack-file container. Owns the (decompressed) byte buffer; entry
/// payloads are decoded in place through borrowed cursors, never copied out.
pub struct PackFile {
    data: Vec<u8>,
    type_name: String,
    version: i32,
    types: Vec<EntryType>,
    entries: Vec<u32>,
}

impl PackFile {
    /// Parse a pack-file buffer, transparently gunzipping if needed.
    pub fn parse(bytes: Vec<u8>) -> Result<Self> {
        let data = maybe_gunzip(bytes)?;
        let mut cur = ByteCursor::new(&data);

        let type_name = cur.var_string()?;
        let version = cur.i32()?;

        if data.len() < 8 {
            return Err(Error::UnexpectedEof(data.len()));
        }
        cur.seek(data.len() - 8)?;
        let entries_offset = cur.u32()? as usize;
        let types_offset = cur.u32()? as usize;

        cur.seek(entries_offset)?;
        let entry_count = cur.varint()? as usize;
        let mut entries = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            entries.push(cur.u32()?);
        }
        // Offsets must be strictly increasing; overlapping entries mean a
        // corrupt index.
        for pair in entries.windows(2) {
            if pair[1] <= pair[0] {
                return Err(Error::invalid("pack-file entry offsets not increasing"));
            }
        }

        cur.seek(types_offset)?;
        let type_count = cur.varint()? as usize;
        let mut types = Vec::with_capacity(type_count);
        for _ in 0..type_count {
            types.push(EntryType {
                class: cur.var_string()?,
                type_name: cur.var_string()?,
                version: cur.varint()?,
            });
        }

        Ok(Self { data, type_name, version, types, entries })
    }

    /// Container type string from the header.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Container format version from the header.
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Number of entries in the index.
    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    /// Position a cursor at the payload of entry `index` and resolve its
    /// type descriptor.
    ///
    /// `index` must be in `[0, num_entries())`; out of range is a caller
    /// bug, reported as [`Error::EntryOutOfBounds`].
    pub fn seek_entry(&self, index: usize) -> Result<(&EntryType, ByteCursor<'_>)> {
        let Some(&offset) = self.entries.get(index) else {
            return Err(Error::EntryOutOfBounds { index, count: self.entries.len() });
        };
        let mut cur = ByteCursor::new(&self.data);
        cur.seek(offset as usize)?;
        let type_id = cur.u32()? as usize;
        let entry_type = self
            .types
            .get(type_id)
            .ok_or_else(|| Error::invalid(format!("entry {} references unknown type {}", index, type_id)))?;
        Ok((entry_type, cur))
    }
}

/// Transform kind tags as stored on the wire.
const XFORM_TRANSLATION: u32 = 0;
const XFORM_ROTATION_TRANSLATION: u32 = 1;
const XFORM_UNIFORM_SCALE: u32 = 2;
const XFORM_AFFINE_MATRIX: u32 = 3;

/// Read a fragment transform record.
///
/// Returns `None` for unknown kind tags; the fragment then has no
/// transform, matching how viewers treat unrecognized kinds.
pub fn read_transform(cur: &mut ByteCursor<'_>) -> Result<Option<Transform>> {
    let kind = cur.u32()?;
    match kind {
        XFORM_TRANSLATION => Ok(Some(Transform::translation(cur.vec3()?))),
        XFORM_ROTATION_TRANSLATION => {
            let rotation = cur.quat()?;
            let translation = cur.vec3()?;
            Ok(Some(Transform::Decomposed {
                translation,
                rotation,
                scale: glam::Vec3::ONE,
            }))
        }
        XFORM_UNIFORM_SCALE => {
            let scale = cur.f32()?;
            let rotation = cur.quat()?;
            let translation = cur.vec3()?;
            Ok(Some(Transform::Decomposed {
                translation,
                rotation,
                scale: glam::Vec3::splat(scale),
            }))
        }
        XFORM_AFFINE_MATRIX => {
            let mut m = [0.0f32; 9];
            for value in &mut m {
                *value = cur.f32()?;
            }
            let translation = cur.vec3()?;
            Ok(Some(Transform::from_mat3_translation(m, translation)))
        }
        _ => Ok(None),
    }
}
