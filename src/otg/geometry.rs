//! SVF2 geometry buffer decoder.
//!
//! A geometry asset is a single flat buffer: an `OTG0` header, a table of
//! interleaved-buffer offsets, an attribute descriptor table, then the raw
//! buffer data. Indices are delta-coded on the wire and normals use a
//! two-component trigonometric encoding; both must be decoded before the
//! arrays are usable.

use crate::util::{ByteCursor, Error, Result};

/// Primitive topology of a geometry buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeometryKind {
    Triangles,
    Lines,
    Points,
    WideLines,
}

/// Vertex attribute semantics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeType {
    Index,
    IndexEdges,
    Position,
    Normal,
    TextureUv,
    Color,
    DbId,
    Unknown(u8),
}

impl AttributeType {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Index,
            1 => Self::IndexEdges,
            2 => Self::Position,
            3 => Self::Normal,
            4 => Self::TextureUv,
            5 => Self::Color,
            6 => Self::DbId,
            other => Self::Unknown(other),
        }
    }
}

/// Component types referenced by attribute descriptors.
pub mod component {
    pub const BYTE: u8 = 0;
    pub const SHORT: u8 = 1;
    pub const UBYTE: u8 = 2;
    pub const USHORT: u8 = 3;
    pub const BYTE_NORM: u8 = 4;
    pub const SHORT_NORM: u8 = 5;
    pub const UBYTE_NORM: u8 = 6;
    pub const USHORT_NORM: u8 = 7;
    pub const FLOAT: u8 = 8;
    pub const INT: u8 = 9;
    pub const UINT: u8 = 10;
}

/// One 5-byte attribute descriptor.
#[derive(Clone, Copy, Debug)]
pub struct Attribute {
    pub attribute_type: AttributeType,
    /// Components per item (low nibble of the packed byte).
    pub item_size: u8,
    /// Component type (high nibble of the packed byte).
    pub component_type: u8,
    /// Byte offset of the first item inside its buffer.
    pub item_offset: u8,
    /// Byte stride between consecutive items.
    pub item_stride: u8,
    pub buffer_id: u8,
}

/// Parsed SVF2 geometry buffer. Owns the raw bytes; accessor methods decode
/// typed arrays on demand.
pub struct OtgGeometry {
    kind: GeometryKind,
    data: Vec<u8>,
    /// Byte ranges of the interleaved buffers inside `data`.
    buffer_ranges: Vec<(usize, usize)>,
    attributes: Vec<Attribute>,
}

impl OtgGeometry {
    pub fn parse(data: Vec<u8>) -> Result<Self> {
        let mut cur = ByteCursor::new(&data);
        let magic = cur.bytes(4)?;
        if magic != b"OTG0" {
            return Err(Error::InvalidMagic { format: "OTG geometry" });
        }
        let flags = cur.u16()?;
        let kind = match flags & 0x03 {
            0 => GeometryKind::Triangles,
            1 => GeometryKind::Lines,
            2 => GeometryKind::Points,
            _ => GeometryKind::WideLines,
        };
        let buffer_count = cur.u8()? as usize;
        let attribute_count = cur.u8()? as usize;
        if buffer_count == 0 {
            return Err(Error::invalid("geometry buffer without buffers"));
        }

        // Buffer 0 implicitly starts at offset 0.
        let mut offsets = Vec::with_capacity(buffer_count);
        offsets.push(0usize);
        for _ in 1..buffer_count {
            offsets.push(cur.u32()? as usize);
        }

        let mut attributes = Vec::with_capacity(attribute_count);
        for _ in 0..attribute_count {
            let attribute_type = AttributeType::from_u8(cur.u8()?);
            let packed = cur.u8()?;
            attributes.push(Attribute {
                attribute_type,
                item_size: packed & 0x0f,
                component_type: packed >> 4,
                item_offset: cur.u8()?,
                item_stride: cur.u8()?,
                buffer_id: cur.u8()?,
            });
        }

        // Raw data starts at the first 4-byte-aligned offset past the table.
        let data_start = (cur.tell() + 3) & !3;
        if data_start > data.len() {
            return Err(Error::UnexpectedEof(data_start));
        }

        let mut buffer_ranges = Vec::with_capacity(buffer_count);
        for (i, &offset) in offsets.iter().enumerate() {
            let start = data_start + offset;
            let end = match offsets.get(i + 1) {
                Some(&next) => data_start + next,
                None => data.len(),
            };
            if start > end || end > data.len() {
                return Err(Error::invalid("geometry buffer offsets out of range"));
            }
            buffer_ranges.push((start, end));
        }

        Ok(Self { kind, data, buffer_ranges, attributes })
    }

    pub fn kind(&self) -> GeometryKind {
        self.kind
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    fn attribute(&self, wanted: AttributeType) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.attribute_type == wanted)
    }

    fn buffer(&self, id: u8) -> Result<&[u8]> {
        let (start, end) = *self
            .buffer_ranges
            .get(id as usize)
            .ok_or_else(|| Error::invalid(format!("attribute references buffer {}", id)))?;
        Ok(&self.data[start..end])
    }

    /// Index array with the wire delta coding reversed.
    pub fn indices(&self) -> Result<Vec<u16>> {
        let attr = self
            .attribute(AttributeType::Index)
            .ok_or_else(|| Error::invalid("geometry has no index attribute"))?;
        let buf = self.buffer(attr.buffer_id)?;
        let stride = (attr.item_stride as usize).max(2);
        let mut indices = Vec::new();
        let mut pos = attr.item_offset as usize;
        while pos + 2 <= buf.len() {
            indices.push(u16::from_le_bytes([buf[pos], buf[pos + 1]]));
            pos += stride;
        }
        match self.kind {
            GeometryKind::Triangles => delta_decode_triangles(&mut indices),
            GeometryKind::Lines | GeometryKind::WideLines => delta_decode_lines(&mut indices),
            GeometryKind::Points => {}
        }
        Ok(indices)
    }

    fn float_attribute(&self, wanted: AttributeType) -> Result<Option<Vec<f32>>> {
        let Some(attr) = self.attribute(wanted) else {
            return Ok(None);
        };
        let buf = self.buffer(attr.buffer_id)?;
        let item_size = attr.item_size as usize;
        let item_bytes = item_size * 4;
        let stride = (attr.item_stride as usize).max(item_bytes);
        let mut values = Vec::new();
        let mut pos = attr.item_offset as usize;
        while pos + item_bytes <= buf.len() {
            for c in 0..item_size {
                let at = pos + c * 4;
                values.push(f32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]));
            }
            pos += stride;
        }
        Ok(Some(values))
    }

    /// Vertex positions, three floats per vertex.
    pub fn positions(&self) -> Result<Vec<f32>> {
        self.float_attribute(AttributeType::Position)?
            .ok_or_else(|| Error::invalid("geometry has no position attribute"))
    }

    /// First UV set, two floats per vertex.
    pub fn uvs(&self) -> Result<Option<Vec<f32>>> {
        self.float_attribute(AttributeType::TextureUv)
    }

    /// Per-vertex colors.
    pub fn colors(&self) -> Result<Option<Vec<f32>>> {
        self.float_attribute(AttributeType::Color)
    }

    /// Vertex normals decoded from the two-component encoding, three
    /// floats per vertex.
    pub fn normals(&self) -> Result<Option<Vec<f32>>> {
        let Some(attr) = self.attribute(AttributeType::Normal) else {
            return Ok(None);
        };
        let buf = self.buffer(attr.buffer_id)?;
        let stride = (attr.item_stride as usize).max(4);
        let mut normals = Vec::new();
        let mut pos = attr.item_offset as usize;
        while pos + 4 <= buf.len() {
            let x = u16::from_le_bytes([buf[pos], buf[pos + 1]]) as f32 / 65535.0;
            let y = u16::from_le_bytes([buf[pos + 2], buf[pos + 3]]) as f32 / 65535.0;
            normals.extend_from_slice(&decode_normal(x, y));
            pos += stride;
        }
        Ok(Some(normals))
    }
}

/// Decode one normal from its packed representation, both components
/// already normalized to `[0, 1]`.
pub fn decode_normal(enc_x: f32, enc_y: f32) -> [f32; 3] {
    let ang_x = enc_x * 2.0 - 1.0;
    let ang_y = enc_y * 2.0 - 1.0;
    let (sin_theta, cos_theta) = (ang_x * std::f32::consts::PI).sin_cos();
    let sin_phi = (1.0 - ang_y * ang_y).max(0.0).sqrt();
    [cos_theta * sin_phi, sin_theta * sin_phi, ang_y]
}

/// Reverse the 3-wide delta coding of a triangle index buffer: the first
/// index of each triangle is a delta from the previous triangle's first,
/// the second and third are deltas from their own first.
pub fn delta_decode_triangles(ib: &mut [u16]) {
    if ib.len() < 3 {
        return;
    }
    ib[1] = ib[1].wrapping_add(ib[0]);
    ib[2] = ib[2].wrapping_add(ib[0]);
    let mut i = 3;
    while i + 2 < ib.len() {
        ib[i] = ib[i].wrapping_add(ib[i - 3]);
        ib[i + 1] = ib[i + 1].wrapping_add(ib[i]);
        ib[i + 2] = ib[i + 2].wrapping_add(ib[i]);
        i += 3;
    }
}

/// 2-wide analogue of [`delta_decode_triangles`] for line segments.
pub fn delta_decode_lines(ib: &mut [u16]) {
    if ib.len() < 2 {
        return;
    }
    ib[1] = ib[1].wrapping_add(ib[0]);
    let mut i = 2;
    while i + 1 < ib.len() {
        ib[i] = ib[i].wrapping_add(ib[i - 2]);
        ib[i + 1] = ib[i + 1].wrapping_add(ib[i]);
        i += 2;
    }
}
