//! SVF scene adapter.
//!
//! Owns the decoded fragment, geometry-metadata, mesh-pack and material
//! records for one view and exposes them through [`SceneView`] without
//! copying. Geometry resolution goes fragment → metadata → `(pack,
//! entity)` → mesh.

use std::collections::HashMap;

use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::resolve::{CancellationToken, Resolver};
use crate::scene::{
    Geometry, LinesView, MeshView, Node, PhysicalMaterial, PointsView, SceneMetadata, SceneView,
};
use crate::svf::{
    parse_fragments, parse_geometries, parse_materials, parse_mesh_pack, Fragment,
    GeometryMetadata, PhongMaterial, Primitive,
};
use crate::util::Result;

/// Lowercase a source image URI and unify its separators. Keys into the
/// image store and output paths both use this form.
pub fn normalize_uri(uri: &str) -> String {
    uri.to_lowercase().replace('\\', "/")
}

/// URIs of the assets making up one SVF view, as discovered by the outer
/// manifest (out of scope here).
#[derive(Clone, Debug, Default)]
pub struct SvfAssets {
    pub name: String,
    pub fragments: String,
    pub geometries: String,
    /// `(pack id, uri)` pairs for every referenced mesh pack.
    pub mesh_packs: Vec<(u32, String)>,
    pub materials: String,
    /// Source-relative image URIs referenced by materials.
    pub images: Vec<String>,
}

/// Decoded SVF view implementing the scene contract.
pub struct SvfScene {
    fragments: Vec<Fragment>,
    geometries: Vec<GeometryMetadata>,
    mesh_packs: HashMap<u32, Vec<Option<Primitive>>>,
    materials: Vec<Option<PhongMaterial>>,
    images: HashMap<String, Vec<u8>>,
    metadata: SceneMetadata,
}

impl SvfScene {
    /// Fetch and decode every asset of a view.
    ///
    /// Independent assets are each pulled through the resolver with a
    /// cancellation checkpoint in between; a missing image degrades to a
    /// warning while any malformed container aborts the load.
    pub fn load<R: Resolver>(
        resolver: &R,
        assets: &SvfAssets,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        cancel.checkpoint()?;
        let fragments = parse_fragments(resolver.resolve(&assets.fragments)?)?;

        cancel.checkpoint()?;
        let geometries = parse_geometries(resolver.resolve(&assets.geometries)?)?;

        let mut mesh_packs = HashMap::with_capacity(assets.mesh_packs.len());
        for (pack_id, uri) in &assets.mesh_packs {
            cancel.checkpoint()?;
            mesh_packs.insert(*pack_id, parse_mesh_pack(resolver.resolve(uri)?)?);
        }

        cancel.checkpoint()?;
        let materials = parse_materials(resolver.resolve(&assets.materials)?)?;

        let mut images = HashMap::with_capacity(assets.images.len());
        for uri in &assets.images {
            cancel.checkpoint()?;
            match resolver.resolve(uri) {
                Ok(bytes) => {
                    images.insert(normalize_uri(uri), bytes);
                }
                Err(err) => warn!(uri, error = %err, "image not resolvable, skipping"),
            }
        }

        let metadata = SceneMetadata {
            name: assets.name.clone(),
            world_bounds: combined_bounds(&fragments),
            ..Default::default()
        };
        debug!(
            fragments = fragments.len(),
            geometries = geometries.len(),
            materials = materials.len(),
            "loaded SVF view"
        );

        Ok(Self { fragments, geometries, mesh_packs, materials, images, metadata })
    }

    /// Build a scene from already-decoded records (synthetic scenes, tests).
    pub fn from_parts(
        fragments: Vec<Fragment>,
        geometries: Vec<GeometryMetadata>,
        mesh_packs: HashMap<u32, Vec<Option<Primitive>>>,
        materials: Vec<Option<PhongMaterial>>,
        images: HashMap<String, Vec<u8>>,
        metadata: SceneMetadata,
    ) -> Self {
        Self { fragments, geometries, mesh_packs, materials, images, metadata }
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }
}

/// Union of the per-fragment bounds, when any fragment carries them.
fn combined_bounds(fragments: &[Fragment]) -> Option<([f32; 3], [f32; 3])> {
    if fragments.is_empty() {
        return None;
    }
    let mut min = [f32::INFINITY; 3];
    let mut max = [f32::NEG_INFINITY; 3];
    for fragment in fragments {
        for axis in 0..3 {
            min[axis] = min[axis].min(fragment.bbox[axis]);
            max[axis] = max[axis].max(fragment.bbox[axis + 3]);
        }
    }
    if min.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some((min, max))
}

impl SceneView for SvfScene {
    fn node_count(&self) -> usize {
        self.fragments.len()
    }

    fn node(&self, index: usize) -> Node {
        let fragment = &self.fragments[index];
        Node {
            db_id: fragment.db_id,
            // Facade ids are 1-based; SVF geometry ids are 0-based.
            geometry: fragment.geometry_id + 1,
            material: Some(fragment.material_id),
            transform: fragment.transform.clone(),
        }
    }

    fn geometry_count(&self) -> usize {
        self.geometries.len() + 1
    }

    fn geometry(&self, id: u32) -> Geometry<'_> {
        let Some(index) = id.checked_sub(1) else {
            return Geometry::Empty;
        };
        let Some(meta) = self.geometries.get(index as usize) else {
            return Geometry::Empty;
        };
        let Some(primitive) = self
            .mesh_packs
            .get(&meta.pack_id)
            .and_then(|pack| pack.get(meta.entity_id as usize))
            .and_then(Option::as_ref)
        else {
            return Geometry::Empty;
        };
        match primitive {
            Primitive::Mesh(mesh) => Geometry::Mesh(MeshView {
                indices: &mesh.indices,
                vertices: &mesh.vertices,
                normals: mesh.normals.as_deref(),
                colors: mesh.colors.as_deref(),
                color_stride: 4,
                uv_channels: mesh
                    .uv_channels
                    .iter()
                    .map(|channel| channel.uvs.as_slice())
                    .collect::<SmallVec<_>>(),
                min: mesh.min,
                max: mesh.max,
            }),
            Primitive::Lines(lines) => Geometry::Lines(LinesView {
                indices: &lines.indices,
                vertices: &lines.vertices,
                colors: lines.colors.as_deref(),
            }),
            Primitive::Points(points) => Geometry::Points(PointsView {
                vertices: &points.vertices,
                colors: points.colors.as_deref(),
            }),
        }
    }

    fn material_count(&self) -> usize {
        self.materials.len()
    }

    fn material(&self, index: usize) -> PhysicalMaterial {
        self.materials
            .get(index)
            .and_then(Option::as_ref)
            .map(PhysicalMaterial::from_phong)
            .unwrap_or_default()
    }

    fn image(&self, uri: &str) -> Option<&[u8]> {
        self.images.get(&normalize_uri(uri)).map(Vec::as_slice)
    }

    fn metadata(&self) -> &SceneMetadata {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svf::meshes::tests::triangle_pack;
    use crate::svf::parse_mesh_pack;

    fn test_scene() -> SvfScene {
        let mesh_packs =
            HashMap::from([(0u32, parse_mesh_pack(triangle_pack()).unwrap())]);
        let fragments = vec![Fragment {
            visible: true,
            material_id: 0,
            geometry_id: 0,
            db_id: 1,
            transform: None,
            bbox: [0.0; 6],
        }];
        let geometries = vec![GeometryMetadata {
            frag_type: 0,
            prim_count: 1,
            pack_id: 0,
            entity_id: 0,
        }];
        SvfScene::from_parts(
            fragments,
            geometries,
            mesh_packs,
            vec![None],
            HashMap::new(),
            SceneMetadata::default(),
        )
    }

    #[test]
    fn test_geometry_ids_are_one_based() {
        let scene = test_scene();
        assert_eq!(scene.geometry_count(), 2);
        assert!(matches!(scene.geometry(0), Geometry::Empty));
        assert!(matches!(scene.geometry(1), Geometry::Mesh(_)));
        assert!(matches!(scene.geometry(99), Geometry::Empty));

        // Nodes reference shifted ids.
        assert_eq!(scene.node(0).geometry, 1);
    }

    #[test]
    fn test_absent_material_yields_default() {
        let scene = test_scene();
        assert_eq!(scene.material(0), PhysicalMaterial::default());
        assert_eq!(scene.material(42), PhysicalMaterial::default());
    }

    #[test]
    fn test_image_lookup_normalizes() {
        let mut images = HashMap::new();
        images.insert("textures/wood.png".to_string(), vec![1, 2, 3]);
        let scene = SvfScene::from_parts(
            Vec::new(),
            Vec::new(),
            HashMap::new(),
            Vec::new(),
            images,
            SceneMetadata::default(),
        );
        assert!(scene.image("Textures\\Wood.PNG").is_some());
        assert!(scene.image("other.png").is_none());
    }
}
