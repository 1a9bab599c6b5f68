//! SVF mesh pack decoder.
//!
//! A mesh pack holds OpenCTM meshes plus optional line and point sets.
//! Only the uncompressed OpenCTM "RAW" method is supported; compressed
//! methods (MG1/MG2) yield a per-entry unsupported result and never abort
//! the rest of the pack.

use smallvec::SmallVec;
use tracing::warn;

use crate::svf::pack::PackFile;
use crate::util::{ByteCursor, Error, Result};

/// Entry type names inside a mesh pack.
pub const TYPE_OPENCTM: &str = "Autodesk.CloudPlatform.OpenCTM";
pub const TYPE_LINES: &str = "Autodesk.CloudPlatform.Lines";
pub const TYPE_POINTS: &str = "Autodesk.CloudPlatform.Points";

const OCTM_SUPPORTED_VERSION: i32 = 5;
const OCTM_FLAG_NORMALS: i32 = 0x01;

/// One UV set with its source map name and file reference.
#[derive(Clone, Debug)]
pub struct UvChannel {
    pub name: String,
    pub file: String,
    /// Two floats per vertex; V is already flipped to glTF orientation.
    pub uvs: Vec<f32>,
}

/// Decoded triangle mesh.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub comment: String,
    /// Three indices per triangle.
    pub indices: Vec<u16>,
    /// Three floats per vertex.
    pub vertices: Vec<f32>,
    pub normals: Option<Vec<f32>>,
    /// RGBA, four floats per vertex.
    pub colors: Option<Vec<f32>>,
    pub uv_channels: SmallVec<[UvChannel; 2]>,
    /// Position bounds accumulated while reading vertices.
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Mesh {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / 3
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Decoded line set.
#[derive(Clone, Debug, Default)]
pub struct LineSet {
    pub line_width: f32,
    pub vertices: Vec<f32>,
    /// RGB, three floats per vertex.
    pub colors: Option<Vec<f32>>,
    /// Two indices per segment.
    pub indices: Vec<u16>,
}

/// Decoded point set.
#[derive(Clone, Debug, Default)]
pub struct PointSet {
    pub point_size: f32,
    pub vertices: Vec<f32>,
    pub colors: Option<Vec<f32>>,
}

/// One mesh pack entry.
#[derive(Clone, Debug)]
pub enum Primitive {
    Mesh(Mesh),
    Lines(LineSet),
    Points(PointSet),
}

/// Decode every entry of a mesh pack.
///
/// Unsupported entries (compressed OpenCTM methods, unknown entry types)
/// decode to `None`; container-level failures propagate.
pub fn parse_mesh_pack(bytes: Vec<u8>) -> Result<Vec<Option<Primitive>>> {
    let pack = PackFile::parse(bytes)?;
    let mut primitives = Vec::with_capacity(pack.num_entries());
    for i in 0..pack.num_entries() {
        let (entry_type, mut cur) = pack.seek_entry(i)?;
        let decoded = match entry_type.type_name.as_str() {
            TYPE_OPENCTM => {
                if entry_type.version < 1 {
                    return Err(Error::UnsupportedVersion {
                        what: "OpenCTM entry",
                        version: entry_type.version as i32,
                    });
                }
                parse_octm(&mut cur).map(Primitive::Mesh)
            }
            TYPE_LINES => parse_lines(&mut cur, entry_type.version).map(Primitive::Lines),
            TYPE_POINTS => parse_points(&mut cur, entry_type.version).map(Primitive::Points),
            other => Err(Error::unsupported(format!("mesh pack entry type {:?}", other))),
        };
        match decoded {
            Ok(primitive) => primitives.push(Some(primitive)),
            Err(err) if err.is_recoverable() => {
                warn!(entry = i, error = %err, "skipping mesh pack entry");
                primitives.push(None);
            }
            Err(err) => return Err(err),
        }
    }
    Ok(primitives)
}

fn expect_tag(cur: &mut ByteCursor<'_>, tag: &str) -> Result<()> {
    let found = cur.string(4)?;
    if found != tag {
        return Err(Error::invalid(format!("expected {:?} section, found {:?}", tag, found)));
    }
    Ok(())
}

fn parse_octm(cur: &mut ByteCursor<'_>) -> Result<Mesh> {
    let magic = cur.string(4)?;
    if magic != "OCTM" {
        return Err(Error::InvalidMagic { format: "OpenCTM" });
    }
    let version = cur.i32()?;
    if version != OCTM_SUPPORTED_VERSION {
        return Err(Error::UnsupportedVersion { what: "OpenCTM", version });
    }
    let method = cur.string(3)?;
    cur.u8()?; // trailing NUL of the method fourcc
    match method.as_str() {
        "RAW" => parse_octm_raw(cur),
        other => Err(Error::unsupported(format!("OpenCTM method {:?}", other))),
    }
}

fn parse_octm_raw(cur: &mut ByteCursor<'_>) -> Result<Mesh> {
    let vcount = cur.i32()?.max(0) as usize;
    let tcount = cur.i32()?.max(0) as usize;
    let uvcount = cur.i32()?.max(0) as usize;
    let attr_count = cur.i32()?.max(0) as usize;
    let flags = cur.i32()?;
    let comment = cur.var_string()?;

    let mut mesh = Mesh { comment, ..Default::default() };

    // Indices are stored as u32 on disk but must fit u16; this is a
    // constraint of the source format, not of this reader.
    expect_tag(cur, "INDX")?;
    mesh.indices = Vec::with_capacity(tcount * 3);
    for _ in 0..tcount * 3 {
        mesh.indices.push(cur.u32()? as u16);
    }

    expect_tag(cur, "VERT")?;
    mesh.vertices = Vec::with_capacity(vcount * 3);
    let mut min = [f32::INFINITY; 3];
    let mut max = [f32::NEG_INFINITY; 3];
    for _ in 0..vcount {
        for axis in 0..3 {
            let value = cur.f32()?;
            min[axis] = min[axis].min(value);
            max[axis] = max[axis].max(value);
            mesh.vertices.push(value);
        }
    }
    mesh.min = min;
    mesh.max = max;

    if flags & OCTM_FLAG_NORMALS != 0 {
        expect_tag(cur, "NORM")?;
        let mut normals = Vec::with_capacity(vcount * 3);
        for _ in 0..vcount {
            let mut x = cur.f32()?;
            let mut y = cur.f32()?;
            let mut z = cur.f32()?;
            let dot = x * x + y * y + z * z;
            if dot != 1.0 {
                let len = dot.sqrt();
                if len > 0.0 {
                    x /= len;
                    y /= len;
                    z /= len;
                }
            }
            normals.push(x);
            normals.push(y);
            normals.push(z);
        }
        mesh.normals = Some(normals);
    }

    for _ in 0..uvcount {
        expect_tag(cur, "TEXC")?;
        let name = cur.var_string()?;
        let file = cur.var_string()?;
        let mut uvs = Vec::with_capacity(vcount * 2);
        for _ in 0..vcount {
            uvs.push(cur.f32()?);
            // V is stored bottom-up; flip to glTF orientation.
            uvs.push(1.0 - cur.f32()?);
        }
        mesh.uv_channels.push(UvChannel { name, file, uvs });
    }

    for _ in 0..attr_count {
        expect_tag(cur, "ATTR")?;
        let name = cur.var_string()?;
        if name == "Color" {
            let mut colors = Vec::with_capacity(vcount * 4);
            for _ in 0..vcount * 4 {
                colors.push(cur.f32()?);
            }
            mesh.colors = Some(colors);
        } else {
            // Unknown attribute payloads occupy vcount*4 bytes.
            cur.skip(vcount * 4)?;
        }
    }

    Ok(mesh)
}

fn parse_lines(cur: &mut ByteCursor<'_>, version: u32) -> Result<LineSet> {
    if version < 2 {
        return Err(Error::UnsupportedVersion { what: "Lines entry", version: version as i32 });
    }
    let vertex_count = cur.u16()? as usize;
    let index_count = cur.u16()? as usize;
    let _bounds_count = cur.u16()?;
    let line_width = if version > 2 { cur.f32()? } else { 1.0 };
    let has_colors = cur.u8()? != 0;

    let mut set = LineSet { line_width, ..Default::default() };
    set.vertices = Vec::with_capacity(vertex_count * 3);
    for _ in 0..vertex_count * 3 {
        set.vertices.push(cur.f32()?);
    }
    if has_colors {
        let mut colors = Vec::with_capacity(vertex_count * 3);
        for _ in 0..vertex_count * 3 {
            colors.push(cur.f32()?);
        }
        set.colors = Some(colors);
    }
    set.indices = Vec::with_capacity(index_count);
    for _ in 0..index_count {
        set.indices.push(cur.u16()?);
    }
    Ok(set)
}

fn parse_points(cur: &mut ByteCursor<'_>, version: u32) -> Result<PointSet> {
    if version < 2 {
        return Err(Error::UnsupportedVersion { what: "Points entry", version: version as i32 });
    }
    let vertex_count = cur.u16()? as usize;
    let _index_count = cur.u16()?;
    let _bounds_count = cur.u16()?;
    let point_size = if version > 2 { cur.f32()? } else { 1.0 };
    let has_colors = cur.u8()? != 0;

    let mut set = PointSet { point_size, ..Default::default() };
    set.vertices = Vec::with_capacity(vertex_count * 3);
    for _ in 0..vertex_count * 3 {
        set.vertices.push(cur.f32()?);
    }
    if has_colors {
        let mut colors = Vec::with_capacity(vertex_count * 3);
        for _ in 0..vertex_count * 3 {
            colors.push(cur.f32()?);
        }
        set.colors = Some(colors);
    }
    Ok(set)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::svf::pack::tests::PackBuilder;
    use crate::util::cursor::write_varint;

    /// Serialize an OpenCTM RAW payload for one triangle mesh.
    pub(crate) fn octm_raw_payload(
        vertices: &[f32],
        indices: &[u32],
        normals: Option<&[f32]>,
        uvs: Option<&[f32]>,
    ) -> Vec<u8> {
        let vcount = (vertices.len() / 3) as i32;
        let tcount = (indices.len() / 3) as i32;
        let uvcount = if uvs.is_some() { 1 } else { 0 };
        let flags: i32 = if normals.is_some() { 1 } else { 0 };

        let mut buf = Vec::new();
        buf.extend_from_slice(b"OCTM");
        buf.extend_from_slice(&5i32.to_le_bytes());
        buf.extend_from_slice(b"RAW\0");
        for v in [vcount, tcount, uvcount, 0, flags] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        write_varint(&mut buf, 0); // empty comment

        buf.extend_from_slice(b"INDX");
        for &i in indices {
            buf.extend_from_slice(&i.to_le_bytes());
        }
        buf.extend_from_slice(b"VERT");
        for &v in vertices {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(normals) = normals {
            buf.extend_from_slice(b"NORM");
            for &n in normals {
                buf.extend_from_slice(&n.to_le_bytes());
            }
        }
        if let Some(uvs) = uvs {
            buf.extend_from_slice(b"TEXC");
            write_varint(&mut buf, 3);
            buf.extend_from_slice(b"map");
            write_varint(&mut buf, 0); // no file
            for &uv in uvs {
                buf.extend_from_slice(&uv.to_le_bytes());
            }
        }
        buf
    }

    pub(crate) const TRIANGLE_VERTICES: [f32; 9] =
        [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    pub(crate) const TRIANGLE_NORMALS: [f32; 9] =
        [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0];

    /// Build a complete one-triangle mesh pack.
    pub(crate) fn triangle_pack() -> Vec<u8> {
        let mut builder = PackBuilder::new("MeshPack", 1);
        let tid = builder.add_type("Autodesk.CloudPlatform.Geometry", TYPE_OPENCTM, 1);
        builder.add_entry(
            tid,
            &octm_raw_payload(&TRIANGLE_VERTICES, &[0, 1, 2], Some(&TRIANGLE_NORMALS), None),
        );
        builder.finish()
    }

    #[test]
    fn test_parse_raw_mesh() {
        let primitives = parse_mesh_pack(triangle_pack()).unwrap();
        assert_eq!(primitives.len(), 1);
        let Some(Primitive::Mesh(mesh)) = &primitives[0] else {
            panic!("expected a mesh");
        };
        assert_eq!(mesh.vertex_count(), 3);
        assert_eq!(mesh.triangle_count(), 1);
        assert_eq!(mesh.indices, vec![0, 1, 2]);
        assert_eq!(mesh.min, [0.0, 0.0, 0.0]);
        assert_eq!(mesh.max, [1.0, 1.0, 0.0]);
        assert!(mesh.normals.is_some());
        assert!(mesh.uv_channels.is_empty());
    }

    #[test]
    fn test_normals_renormalized() {
        let doubled: Vec<f32> = TRIANGLE_NORMALS.iter().map(|n| n * 2.0).collect();
        let mut builder = PackBuilder::new("MeshPack", 1);
        let tid = builder.add_type("Autodesk.CloudPlatform.Geometry", TYPE_OPENCTM, 1);
        builder.add_entry(
            tid,
            &octm_raw_payload(&TRIANGLE_VERTICES, &[0, 1, 2], Some(&doubled), None),
        );
        let primitives = parse_mesh_pack(builder.finish()).unwrap();
        let Some(Primitive::Mesh(mesh)) = &primitives[0] else { panic!() };
        let normals = mesh.normals.as_ref().unwrap();
        for chunk in normals.chunks_exact(3) {
            let len = (chunk[0] * chunk[0] + chunk[1] * chunk[1] + chunk[2] * chunk[2]).sqrt();
            assert!((len - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_uv_v_flip() {
        let uvs = [0.25f32, 0.25, 0.5, 0.5, 0.75, 0.75];
        let mut builder = PackBuilder::new("MeshPack", 1);
        let tid = builder.add_type("Autodesk.CloudPlatform.Geometry", TYPE_OPENCTM, 1);
        builder.add_entry(tid, &octm_raw_payload(&TRIANGLE_VERTICES, &[0, 1, 2], None, Some(&uvs)));
        let primitives = parse_mesh_pack(builder.finish()).unwrap();
        let Some(Primitive::Mesh(mesh)) = &primitives[0] else { panic!() };
        let channel = &mesh.uv_channels[0];
        assert_eq!(channel.uvs, vec![0.25, 0.75, 0.5, 0.5, 0.75, 0.25]);
    }

    #[test]
    fn test_mg2_entry_skipped_without_corrupting_pack() {
        let mut mg2 = Vec::new();
        mg2.extend_from_slice(b"OCTM");
        mg2.extend_from_slice(&5i32.to_le_bytes());
        mg2.extend_from_slice(b"MG2\0");

        let mut builder = PackBuilder::new("MeshPack", 1);
        let tid = builder.add_type("Autodesk.CloudPlatform.Geometry", TYPE_OPENCTM, 1);
        builder.add_entry(tid, &mg2);
        builder.add_entry(
            tid,
            &octm_raw_payload(&TRIANGLE_VERTICES, &[0, 1, 2], None, None),
        );

        let primitives = parse_mesh_pack(builder.finish()).unwrap();
        assert_eq!(primitives.len(), 2);
        assert!(primitives[0].is_none());
        assert!(matches!(primitives[1], Some(Primitive::Mesh(_))));
    }

    #[test]
    fn test_parse_lines() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&2u16.to_le_bytes()); // vertices
        payload.extend_from_slice(&2u16.to_le_bytes()); // indices
        payload.extend_from_slice(&0u16.to_le_bytes()); // bounds
        payload.extend_from_slice(&2.5f32.to_le_bytes()); // line width (version 3)
        payload.push(0); // no colors
        for v in [0.0f32, 0.0, 0.0, 1.0, 1.0, 1.0] {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        for i in [0u16, 1] {
            payload.extend_from_slice(&i.to_le_bytes());
        }

        let mut builder = PackBuilder::new("MeshPack", 1);
        let tid = builder.add_type("Autodesk.CloudPlatform.Geometry", TYPE_LINES, 3);
        builder.add_entry(tid, &payload);
        let primitives = parse_mesh_pack(builder.finish()).unwrap();
        let Some(Primitive::Lines(lines)) = &primitives[0] else { panic!() };
        assert_eq!(lines.line_width, 2.5);
        assert_eq!(lines.indices, vec![0, 1]);
        assert_eq!(lines.vertices.len(), 6);
        assert!(lines.colors.is_none());
    }

    #[test]
    fn test_lines_default_width_for_v2() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1u16.to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes());
        payload.push(0);
        for v in [0.0f32, 0.0, 0.0] {
            payload.extend_from_slice(&v.to_le_bytes());
        }

        let mut builder = PackBuilder::new("MeshPack", 1);
        let tid = builder.add_type("Autodesk.CloudPlatform.Geometry", TYPE_LINES, 2);
        builder.add_entry(tid, &payload);
        let primitives = parse_mesh_pack(builder.finish()).unwrap();
        let Some(Primitive::Lines(lines)) = &primitives[0] else { panic!() };
        assert_eq!(lines.line_width, 1.0);
    }
}
