//! Format-agnostic intermediate scene model.
//!
//! Both container generations decode into views over this contract, so the
//! glTF writer is written once and never branches on the source format.
//!
//! Geometry ids are 1-based across the facade: id 0 means "no geometry" and
//! always resolves to [`Geometry::Empty`], as do out-of-range ids. The SVF
//! adapter shifts its 0-based ids up by one to match.

pub mod otg;
pub mod svf;

use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::svf::materials::PhongMaterial;

pub use otg::OtgScene;
pub use svf::SvfScene;

/// Node transform, either decomposed TRS or a full 4x4 matrix.
///
/// The two variants are mutually exclusive downstream: a matrix node never
/// also carries translation/rotation/scale fields in the output manifest.
#[derive(Clone, Debug, PartialEq)]
pub enum Transform {
    Decomposed {
        translation: glam::Vec3,
        rotation: glam::Quat,
        scale: glam::Vec3,
    },
    /// Column-major 4x4 matrix.
    Matrix { elements: [f32; 16] },
}

impl Transform {
    /// Identity transform in decomposed form.
    pub fn identity() -> Self {
        Self::Decomposed {
            translation: glam::Vec3::ZERO,
            rotation: glam::Quat::IDENTITY,
            scale: glam::Vec3::ONE,
        }
    }

    /// Translation-only transform.
    pub fn translation(t: glam::Vec3) -> Self {
        Self::Decomposed {
            translation: t,
            rotation: glam::Quat::IDENTITY,
            scale: glam::Vec3::ONE,
        }
    }

    /// Build a matrix transform from a row-major 3x3 block and a
    /// translation injected into the fourth column.
    pub fn from_mat3_translation(m: [f32; 9], t: glam::Vec3) -> Self {
        Self::Matrix {
            elements: [
                m[0], m[3], m[6], 0.0, //
                m[1], m[4], m[7], 0.0, //
                m[2], m[5], m[8], 0.0, //
                t.x, t.y, t.z, 1.0,
            ],
        }
    }

    /// Translation component, extracted from either representation.
    pub fn translation_component(&self) -> glam::Vec3 {
        match self {
            Self::Decomposed { translation, .. } => *translation,
            Self::Matrix { elements } => glam::vec3(elements[12], elements[13], elements[14]),
        }
    }
}

/// One scene-graph instance: a transform plus geometry/material references
/// and a stable object id.
#[derive(Clone, Debug)]
pub struct Node {
    /// Stable object/database id.
    pub db_id: u32,
    /// 1-based geometry id; 0 means no geometry.
    pub geometry: u32,
    /// Material index into the scene's material list.
    pub material: Option<u32>,
    pub transform: Option<Transform>,
}

/// Borrowed triangle-mesh view. Arrays are owned by the scene adapter.
#[derive(Clone, Debug)]
pub struct MeshView<'a> {
    /// Triangle indices, three per triangle.
    pub indices: &'a [u16],
    /// Vertex positions, three floats per vertex.
    pub vertices: &'a [f32],
    pub normals: Option<&'a [f32]>,
    /// Per-vertex colors with `color_stride` floats per vertex.
    pub colors: Option<&'a [f32]>,
    pub color_stride: usize,
    /// UV sets, two floats per vertex each. The writer consumes the first.
    pub uv_channels: SmallVec<[&'a [f32]; 2]>,
    /// Position bounds carried over from decode time.
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl MeshView<'_> {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / 3
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Borrowed polyline view.
#[derive(Clone, Debug)]
pub struct LinesView<'a> {
    /// Segment indices, two per segment.
    pub indices: &'a [u16],
    pub vertices: &'a [f32],
    pub colors: Option<&'a [f32]>,
}

/// Borrowed point-cloud view.
#[derive(Clone, Debug)]
pub struct PointsView<'a> {
    pub vertices: &'a [f32],
    pub colors: Option<&'a [f32]>,
}

/// Tagged geometry variant returned by [`SceneView::geometry`].
#[derive(Clone, Debug)]
pub enum Geometry<'a> {
    /// No geometry behind this id. Legitimate for id 0.
    Empty,
    Mesh(MeshView<'a>),
    Lines(LinesView<'a>),
    Points(PointsView<'a>),
}

/// Physically-based material handed to the writer.
///
/// Always concrete: an absent backing material maps to [`Self::default`],
/// never to a null.
#[derive(Clone, Debug, PartialEq)]
pub struct PhysicalMaterial {
    /// RGBA base color, components in 0..1.
    pub base_color: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    pub opacity: f32,
    pub uv_scale: [f32; 2],
    /// Source-relative URI of the diffuse texture, if any.
    pub diffuse_texture: Option<String>,
}

impl Default for PhysicalMaterial {
    /// Flat gray, non-metal, roughness 0.5, opaque.
    fn default() -> Self {
        Self {
            base_color: [0.25, 0.25, 0.25, 1.0],
            metallic: 0.0,
            roughness: 0.5,
            opacity: 1.0,
            uv_scale: [1.0, 1.0],
            diffuse_texture: None,
        }
    }
}

impl PhysicalMaterial {
    /// Convert a decoded Phong record to the physical parametrization.
    ///
    /// Glossiness maps to roughness via `sqrt(2 / (2 + glossiness))`; the
    /// metal flag collapses to a binary metallic factor.
    pub fn from_phong(phong: &PhongMaterial) -> Self {
        let map = phong.maps.diffuse.as_ref();
        Self {
            base_color: phong.diffuse,
            metallic: if phong.metal { 1.0 } else { 0.0 },
            roughness: (2.0 / (2.0 + phong.glossiness)).sqrt(),
            opacity: phong.opacity,
            uv_scale: map.map(|m| m.scale).unwrap_or([1.0, 1.0]),
            diffuse_texture: map.map(|m| m.uri.clone()),
        }
    }
}

/// Scene-level metadata exposed to the writer.
#[derive(Clone, Debug, Default)]
pub struct SceneMetadata {
    pub name: String,
    /// Combined world-space bounds of the scene, when known.
    pub world_bounds: Option<([f32; 3], [f32; 3])>,
    /// Free-form source metadata passed through to manifest extras.
    pub extras: BTreeMap<String, serde_json::Value>,
}

/// Read-only scene contract bridging decoders and the glTF writer.
pub trait SceneView {
    fn node_count(&self) -> usize;

    /// Node at `index`. Contract: `index < node_count()`.
    fn node(&self, index: usize) -> Node;

    /// Number of addressable geometry ids, including the empty id 0.
    fn geometry_count(&self) -> usize;

    /// Geometry behind a 1-based id. Id 0 and out-of-range ids resolve to
    /// [`Geometry::Empty`].
    fn geometry(&self, id: u32) -> Geometry<'_>;

    fn material_count(&self) -> usize;

    /// Material at `index`; out-of-range or absent backing records yield
    /// the default material.
    fn material(&self, index: usize) -> PhysicalMaterial;

    /// Raw bytes of an image referenced by a material, if available.
    fn image(&self, uri: &str) -> Option<&[u8]>;

    fn metadata(&self) -> &SceneMetadata;
}
