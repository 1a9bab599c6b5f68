//! SVF2 scene adapter.
//!
//! Shared geometry and material assets are addressed by content hash and
//! fetched in batches (one outstanding batch per connection). Geometry is
//! decoded eagerly at load time — delta-coded indices and packed normals
//! are only usable once expanded — and the facade borrows the decoded
//! arrays.

use std::collections::HashMap;

use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::otg::geometry::GeometryKind;
use crate::otg::{parse_fragments, parse_hashes, parse_material, OtgFragment, OtgGeometry};
use crate::resolve::{CancellationToken, Resolver, SharedAssetClient};
use crate::scene::svf::normalize_uri;
use crate::scene::{
    Geometry, LinesView, MeshView, Node, PhysicalMaterial, PointsView, SceneMetadata, SceneView,
};
use crate::svf::PhongMaterial;
use crate::util::Result;

/// URIs and addressing scheme of one SVF2 view.
#[derive(Clone, Debug, Default)]
pub struct OtgAssets {
    pub name: String,
    pub fragments: String,
    /// Hash-list asset enumerating referenced geometries.
    pub geometry_hashes: String,
    /// Hash-list asset enumerating referenced materials.
    pub material_hashes: String,
    /// Prefix a geometry hash is appended to, forming its URI.
    pub geometry_prefix: String,
    pub material_prefix: String,
    pub images: Vec<String>,
    /// Per-view origin added to fragment translations.
    pub offset: [f32; 3],
}

/// Geometry arrays expanded from one OTG buffer.
struct DecodedGeometry {
    kind: GeometryKind,
    indices: Vec<u16>,
    vertices: Vec<f32>,
    normals: Option<Vec<f32>>,
    colors: Option<Vec<f32>>,
    uvs: Option<Vec<f32>>,
    min: [f32; 3],
    max: [f32; 3],
}

/// Decoded SVF2 view implementing the scene contract.
pub struct OtgScene {
    fragments: Vec<OtgFragment>,
    /// Slot `i` holds the geometry with 1-based id `i + 1`.
    geometries: Vec<Option<DecodedGeometry>>,
    materials: Vec<Option<PhongMaterial>>,
    images: HashMap<String, Vec<u8>>,
    metadata: SceneMetadata,
}

impl OtgScene {
    /// Fetch and decode every asset of a view.
    pub fn load<R: Resolver>(
        resolver: &R,
        assets: &OtgAssets,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        cancel.checkpoint()?;
        let fragment_bytes = resolver.resolve(&assets.fragments)?;
        let fragments = parse_fragments(&fragment_bytes, glam::Vec3::from(assets.offset))?;

        let client = SharedAssetClient::new(resolver);

        cancel.checkpoint()?;
        let geometry_hashes = parse_hashes(&resolver.resolve(&assets.geometry_hashes)?)?;
        let geometry_uris: Vec<String> = geometry_hashes
            .iter()
            .map(|hash| format!("{}{}", assets.geometry_prefix, hash))
            .collect();
        let mut geometries = Vec::with_capacity(geometry_uris.len());
        {
            let batch = client.request_batch(&geometry_uris)?;
            for (i, response) in batch.enumerate() {
                cancel.checkpoint()?;
                match response.and_then(decode_geometry) {
                    Ok(decoded) => geometries.push(Some(decoded)),
                    Err(err) if err.is_recoverable() => {
                        warn!(hash = %geometry_hashes[i], error = %err, "skipping geometry");
                        geometries.push(None);
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        cancel.checkpoint()?;
        let material_hashes = parse_hashes(&resolver.resolve(&assets.material_hashes)?)?;
        let material_uris: Vec<String> = material_hashes
            .iter()
            .map(|hash| format!("{}{}", assets.material_prefix, hash))
            .collect();
        let mut materials = Vec::with_capacity(material_uris.len());
        {
            let batch = client.request_batch(&material_uris)?;
            for (i, response) in batch.enumerate() {
                cancel.checkpoint()?;
                match response.and_then(parse_material) {
                    Ok(material) => materials.push(material),
                    Err(err) => {
                        warn!(hash = %material_hashes[i], error = %err, "skipping material");
                        materials.push(None);
                    }
                }
            }
        }

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

        debug!(
            fragments = fragments.len(),
            geometries = geometries.len(),
            materials = materials.len(),
            "loaded SVF2 view"
        );

        Ok(Self {
            fragments,
            geometries,
            materials,
            images,
            metadata: SceneMetadata { name: assets.name.clone(), ..Default::default() },
        })
    }
}

/// Expand an OTG geometry buffer into usable arrays.
fn decode_geometry(bytes: Vec<u8>) -> Result<DecodedGeometry> {
    let geometry = OtgGeometry::parse(bytes)?;
    let kind = geometry.kind();
    let indices = geometry.indices()?;
    let vertices = geometry.positions()?;
    let normals = geometry.normals()?;
    let colors = geometry.colors()?;
    let uvs = geometry.uvs()?;

    let mut min = [f32::INFINITY; 3];
    let mut max = [f32::NEG_INFINITY; 3];
    for vertex in vertices.chunks_exact(3) {
        for axis in 0..3 {
            min[axis] = min[axis].min(vertex[axis]);
            max[axis] = max[axis].max(vertex[axis]);
        }
    }
    if vertices.is_empty() {
        min = [0.0; 3];
        max = [0.0; 3];
    }

    Ok(DecodedGeometry { kind, indices, vertices, normals, colors, uvs, min, max })
}

impl SceneView for OtgScene {
    fn node_count(&self) -> usize {
        self.fragments.len()
    }

    fn node(&self, index: usize) -> Node {
        let fragment = &self.fragments[index];
        Node {
            db_id: fragment.db_id,
            geometry: fragment.geometry_id,
            material: fragment.material_id,
            transform: Some(fragment.transform.clone()),
        }
    }

    fn geometry_count(&self) -> usize {
        self.geometries.len() + 1
    }

    fn geometry(&self, id: u32) -> Geometry<'_> {
        let Some(index) = id.checked_sub(1) else {
            return Geometry::Empty;
        };
        let Some(decoded) = self.geometries.get(index as usize).and_then(Option::as_ref) else {
            return Geometry::Empty;
        };
        match decoded.kind {
            GeometryKind::Triangles => Geometry::Mesh(MeshView {
                indices: &decoded.indices,
                vertices: &decoded.vertices,
                normals: decoded.normals.as_deref(),
                colors: decoded.colors.as_deref(),
                color_stride: 4,
                uv_channels: decoded
                    .uvs
                    .as_deref()
                    .into_iter()
                    .collect::<SmallVec<_>>(),
                min: decoded.min,
                max: decoded.max,
            }),
            GeometryKind::Lines | GeometryKind::WideLines => Geometry::Lines(LinesView {
                indices: &decoded.indices,
                vertices: &decoded.vertices,
                colors: decoded.colors.as_deref(),
            }),
            GeometryKind::Points => Geometry::Points(PointsView {
                vertices: &decoded.vertices,
                colors: decoded.colors.as_deref(),
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
    use crate::otg::fragments::tests::{fragment_list, fragment_record};
    use crate::otg::geometry::tests::build_geometry;
    use crate::util::Error;

    /// In-memory resolver serving a fixed URI → bytes map.
    struct MapResolver(HashMap<String, Vec<u8>>);

    impl Resolver for MapResolver {
        fn resolve(&self, uri: &str) -> Result<Vec<u8>> {
            self.0
                .get(uri)
                .cloned()
                .ok_or_else(|| Error::MissingAsset(uri.to_string()))
        }
    }

    fn hash_list(records: &[&[u8]]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&4u16.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&(records.len() as u16).to_le_bytes());
        buf.resize(4, 0);
        for record in records {
            buf.extend_from_slice(record);
        }
        buf
    }

    #[test]
    fn test_load_and_resolve_geometry() {
        // One triangle geometry addressed by hash 0xaabbccdd.
        let geometry = build_geometry(
            0,
            &[0, 1, 1], // delta-coded 0,1,2
            &[0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            None,
        );
        let assets = OtgAssets {
            name: "view".into(),
            fragments: "fragments.fl".into(),
            geometry_hashes: "geometry.hl".into(),
            material_hashes: "materials.hl".into(),
            geometry_prefix: "g/".into(),
            material_prefix: "m/".into(),
            images: Vec::new(),
            offset: [0.0; 3],
        };
        let phong = br#"{ "materials": { "0": { "definition": "SimplePhong" } } }"#;
        let resolver = MapResolver(HashMap::from([
            (
                "fragments.fl".to_string(),
                fragment_list(&[fragment_record(1, 1, 7, [0.0; 3])]),
            ),
            ("geometry.hl".to_string(), hash_list(&[&[0xaa, 0xbb, 0xcc, 0xdd]])),
            ("materials.hl".to_string(), hash_list(&[&[0x01, 0x02, 0x03, 0x04]])),
            ("g/aabbccdd".to_string(), geometry),
            ("m/01020304".to_string(), phong.to_vec()),
        ]));

        let cancel = CancellationToken::new();
        let scene = OtgScene::load(&resolver, &assets, &cancel).unwrap();

        assert_eq!(scene.node_count(), 1);
        let node = scene.node(0);
        assert_eq!(node.db_id, 7);
        assert_eq!(node.geometry, 1);
        assert_eq!(node.material, Some(0));

        let Geometry::Mesh(mesh) = scene.geometry(1) else {
            panic!("expected mesh geometry");
        };
        assert_eq!(mesh.indices, &[0, 1, 2]);
        assert_eq!(mesh.vertex_count(), 3);

        // Id 0 is a legitimate "no geometry" reference.
        assert!(matches!(scene.geometry(0), Geometry::Empty));
        assert_eq!(scene.material(0), PhysicalMaterial::default());
    }

    #[test]
    fn test_missing_geometry_degrades() {
        let assets = OtgAssets {
            fragments: "fragments.fl".into(),
            geometry_hashes: "geometry.hl".into(),
            material_hashes: "materials.hl".into(),
            geometry_prefix: "g/".into(),
            material_prefix: "m/".into(),
            ..Default::default()
        };
        let resolver = MapResolver(HashMap::from([
            ("fragments.fl".to_string(), fragment_list(&[])),
            ("geometry.hl".to_string(), hash_list(&[&[0u8; 4]])),
            ("materials.hl".to_string(), hash_list(&[])),
        ]));

        let cancel = CancellationToken::new();
        let scene = OtgScene::load(&resolver, &assets, &cancel).unwrap();
        // Unresolvable geometry leaves an empty slot, not an error.
        assert!(matches!(scene.geometry(1), Geometry::Empty));
    }

    #[test]
    fn test_cancellation_stops_load() {
        let assets = OtgAssets {
            fragments: "fragments.fl".into(),
            ..Default::default()
        };
        let resolver = MapResolver(HashMap::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            OtgScene::load(&resolver, &assets, &cancel),
            Err(Error::Cancelled)
        ));
    }
}
