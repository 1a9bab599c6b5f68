//! SVF2 fragment list decoder.
//!
//! The list is a flat record array: a stride-sized header (byte stride and
//! format version in the first four bytes), then one record per stride up
//! to end-of-buffer. Records mix u32 and f32 words at fixed word offsets.

use crate::scene::Transform;
use crate::util::{ByteCursor, Error, Result};

/// One decoded SVF2 fragment.
#[derive(Clone, Debug)]
pub struct OtgFragment {
    /// 1-based geometry id; 0 means no geometry.
    pub geometry_id: u32,
    /// Material index, already shifted down from the 1-based wire value.
    pub material_id: Option<u32>,
    pub db_id: u32,
    pub flags: u32,
    pub transform: Transform,
}

/// Minimum stride covering the four u32 words and ten transform floats.
const MIN_STRIDE: usize = 14 * 4;

/// Decode an SVF2 fragment list. `offset` is the per-view origin added to
/// every fragment translation.
pub fn parse_fragments(data: &[u8], offset: glam::Vec3) -> Result<Vec<OtgFragment>> {
    let mut cur = ByteCursor::new(data);
    let byte_stride = cur.u16()? as usize;
    let _version = cur.u16()?;
    if byte_stride % 4 != 0 {
        return Err(Error::invalid("fragment stride must be a multiple of 4"));
    }
    if byte_stride < MIN_STRIDE {
        return Err(Error::invalid(format!("fragment stride {} too small", byte_stride)));
    }

    let mut fragments = Vec::with_capacity(data.len() / byte_stride);
    // The header occupies one full stride; records follow back to back.
    let mut record_start = byte_stride;
    while record_start + byte_stride <= data.len() {
        cur.seek(record_start)?;
        let geometry_id = cur.u32()?;
        let material_id = cur.u32()?.checked_sub(1);
        let db_id = cur.u32()?;
        let flags = cur.u32()?;
        let translation = cur.vec3()? + offset;
        let rotation = cur.quat()?;
        let scale = cur.vec3()?;
        fragments.push(OtgFragment {
            geometry_id,
            material_id,
            db_id,
            flags,
            transform: Transform::Decomposed { translation, rotation, scale },
        });
        record_start += byte_stride;
    }
    Ok(fragments)
}
