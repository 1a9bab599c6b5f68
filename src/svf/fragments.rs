//! SVF fragment list decoder.
//!
//! Fragments are the scene-graph instances: one transform plus references
//! to a geometry, a material, and a stable database id.

use crate::scene::Transform;
use crate::svf::pack::{read_transform, PackFile};
use crate::util::{Error, Result};

/// One decoded fragment record.
#[derive(Clone, Debug)]
pub struct Fragment {
    pub visible: bool,
    pub material_id: u32,
    pub geometry_id: u32,
    pub db_id: u32,
    pub transform: Option<Transform>,
    /// World-ish bounds: min xyz then max xyz.
    pub bbox: [f32; 6],
}

/// Decode all fragments from a fragment pack file.
pub fn parse_fragments(bytes: Vec<u8>) -> Result<Vec<Fragment>> {
    let pack = PackFile::parse(bytes)?;
    let mut fragments = Vec::with_capacity(pack.num_entries());
    for i in 0..pack.num_entries() {
        fragments.push(parse_fragment(&pack, i)?);
    }
    Ok(fragments)
}

fn parse_fragment(pack: &PackFile, index: usize) -> Result<Fragment> {
    let (entry_type, mut cur) = pack.seek_entry(index)?;
    if entry_type.version <= 4 {
        return Err(Error::UnsupportedVersion {
            what: "fragment entry",
            version: entry_type.version as i32,
        });
    }

    let flags = cur.u8()?;
    let visible = flags & 0x01 != 0;
    let material_id = cur.varint()?;
    let geometry_id = cur.varint()?;
    let transform = read_transform(&mut cur)?;

    // Stored bounds are local; newer versions offset them by the
    // fragment's own translation to approximate world placement.
    let offset = if entry_type.version > 3 {
        transform
            .as_ref()
            .map(Transform::translation_component)
            .unwrap_or(glam::Vec3::ZERO)
    } else {
        glam::Vec3::ZERO
    };
    let offset = [offset.x, offset.y, offset.z];
    let mut bbox = [0.0f32; 6];
    for (i, value) in bbox.iter_mut().enumerate() {
        *value = cur.f32()? + offset[i % 3];
    }

    let db_id = cur.varint()?;

    Ok(Fragment { visible, material_id, geometry_id, db_id, transform, bbox })
}
