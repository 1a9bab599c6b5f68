//! SVF geometry metadata decoder.
//!
//! Each record points a fragment's geometry id at a concrete mesh: the
//! `(pack_id, entity_id)` pair addresses one entry inside one mesh pack.

use crate::svf::pack::PackFile;
use crate::util::{Error, Result};

/// Primitive kind of the referenced geometry.
pub const FRAG_TYPE_MESH: u8 = 0;

/// One geometry metadata record.
#[derive(Clone, Debug)]
pub struct GeometryMetadata {
    pub frag_type: u8,
    pub prim_count: u16,
    /// Mesh pack number the geometry lives in.
    pub pack_id: u32,
    /// Entry index inside that pack.
    pub entity_id: u32,
}

/// Decode all geometry metadata records from a geometry pack file.
pub fn parse_geometries(bytes: Vec<u8>) -> Result<Vec<GeometryMetadata>> {
    let pack = PackFile::parse(bytes)?;
    let mut geometries = Vec::with_capacity(pack.num_entries());
    for i in 0..pack.num_entries() {
        geometries.push(parse_geometry(&pack, i)?);
    }
    Ok(geometries)
}

fn parse_geometry(pack: &PackFile, index: usize) -> Result<GeometryMetadata> {
    let (entry_type, mut cur) = pack.seek_entry(index)?;
    if entry_type.version < 3 {
        return Err(Error::UnsupportedVersion {
            what: "geometry metadata entry",
            version: entry_type.version as i32,
        });
    }

    let frag_type = cur.u8()?;
    // Legacy object-space bbox, unused.
    cur.skip(24)?;
    let prim_count = cur.u16()?;

    // The pack id is a decimal string; some producers append a ".pf"
    // suffix that must be stripped before parsing.
    let pack_ref = cur.var_string()?;
    let pack_ref = pack_ref.strip_suffix(".pf").unwrap_or(&pack_ref);
    let pack_id = pack_ref
        .parse::<u32>()
        .map_err(|_| Error::invalid(format!("bad mesh pack reference: {:?}", pack_ref)))?;

    let entity_id = cur.varint()?;

    Ok(GeometryMetadata { frag_type, prim_count, pack_id, entity_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svf::pack::tests::PackBuilder;
    use crate::util::cursor::write_varint;

    fn geometry_payload(frag_type: u8, prim_count: u16, pack_ref: &str, entity_id: u32) -> Vec<u8> {
        let mut buf = vec![frag_type];
        buf.extend_from_slice(&[0u8; 24]); // legacy bbox
        buf.extend_from_slice(&prim_count.to_le_bytes());
        write_varint(&mut buf, pack_ref.len() as u32);
        buf.extend_from_slice(pack_ref.as_bytes());
        write_varint(&mut buf, entity_id);
        buf
    }

    #[test]
    fn test_parse_geometry_metadata() {
        let mut builder = PackBuilder::new("GeometryMetadataList", 1);
        let tid = builder.add_type("Autodesk.CloudPlatform.GeometryMetadata", "GeometryMetadata", 3);
        builder.add_entry(tid, &geometry_payload(FRAG_TYPE_MESH, 12, "7", 3));
        builder.add_entry(tid, &geometry_payload(FRAG_TYPE_MESH, 1, "15.pf", 0));

        let geometries = parse_geometries(builder.finish()).unwrap();
        assert_eq!(geometries.len(), 2);
        assert_eq!(geometries[0].pack_id, 7);
        assert_eq!(geometries[0].entity_id, 3);
        assert_eq!(geometries[0].prim_count, 12);
        // ".pf" suffix is stripped.
        assert_eq!(geometries[1].pack_id, 15);
    }

    #[test]
    fn test_old_version_rejected() {
        let mut builder = PackBuilder::new("GeometryMetadataList", 1);
        let tid = builder.add_type("Autodesk.CloudPlatform.GeometryMetadata", "GeometryMetadata", 2);
        builder.add_entry(tid, &geometry_payload(0, 0, "0", 0));
        assert!(parse_geometries(builder.finish()).is_err());
    }
}
