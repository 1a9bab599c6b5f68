//! Streaming glTF writer.
//!
//! Consumes scenes through the [`SceneView`] contract and assembles a glTF
//! manifest while spilling binary payloads to size-capped buffer files.
//! The writer is a small state machine: open → writing (repeatable
//! `write` calls, each appending one glTF scene) → closed. `close` flushes
//! the open buffer stream, serializes `output.gltf`, and is terminal —
//! writing afterwards is a protocol violation.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::{debug, warn};

use crate::gltf::schema::{self, Gltf};
use crate::scene::svf::normalize_uri;
use crate::scene::{
    Geometry, LinesView, MeshView, Node as SceneNode, PhysicalMaterial, PointsView, SceneView,
    Transform,
};
use crate::util::hash::hash128_parts;
use crate::util::{Error, Result};

/// Default cap on a single `.bin` buffer file.
pub const DEFAULT_MAX_BUFFER_SIZE: u64 = 5 * 1024 * 1024;

/// Output options recognized by the writer.
#[derive(Clone, Debug)]
pub struct WriterOptions {
    /// Bytes per `.bin` file before a new buffer is started.
    pub max_buffer_size: u64,
    /// Drop triangle meshes entirely.
    pub ignore_mesh_geometry: bool,
    /// Drop line geometry entirely.
    pub ignore_line_geometry: bool,
    /// Drop point geometry entirely.
    pub ignore_point_geometry: bool,
    /// Collapse identical mesh content into shared mesh entries.
    pub deduplicate: bool,
    /// Omit UV accessors when the fragment's material has no texture.
    pub skip_unused_uvs: bool,
    /// Re-center the scene so its bounds sit at the origin.
    pub center: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            ignore_mesh_geometry: false,
            ignore_line_geometry: false,
            ignore_point_geometry: false,
            deduplicate: false,
            skip_unused_uvs: false,
            center: false,
        }
    }
}

/// Customization hooks for node and mesh creation.
///
/// Every hook defaults to the base behavior; implementors override only
/// what they need (custom vertex attributes, spatial filtering, an
/// alternative dedup hash).
pub trait WriterHooks {
    /// Adjust a node after the base mapping, before it joins the manifest.
    fn on_create_node(&mut self, source: &SceneNode, node: &mut schema::Node) {
        let _ = (source, node);
    }

    /// Adjust a triangle mesh after the base mapping.
    fn on_create_mesh(&mut self, mesh: &MeshView<'_>, out: &mut schema::Mesh) {
        let _ = (mesh, out);
    }

    /// Adjust a line mesh after the base mapping.
    fn on_create_lines(&mut self, lines: &LinesView<'_>, out: &mut schema::Mesh) {
        let _ = (lines, out);
    }

    /// Replace the dedup content hash. `None` keeps the default.
    fn on_mesh_hash(&mut self, mesh: &MeshView<'_>) -> Option<(u64, u64)> {
        let _ = mesh;
        None
    }
}

/// The pass-through hook set.
#[derive(Default)]
pub struct DefaultHooks;

impl WriterHooks for DefaultHooks {}

/// Called with the finished manifest and the resource directory after the
/// manifest is serialized (binary packaging, mesh re-compression).
pub type PostProcessor = Box<dyn FnOnce(&Gltf, &Path) -> Result<()>>;

/// Dedup cache key: content hash plus a cheap pre-filter tuple.
///
/// The hash covers vertex, index, UV and normal bytes only; comments,
/// custom attributes and decode-time bounds are deliberately excluded —
/// they do not affect rendered geometry, so two meshes differing only
/// there collapse into one entry.
#[derive(Hash, PartialEq, Eq)]
struct MeshFingerprint {
    hash: (u64, u64),
    vertex_count: usize,
    triangle_count: usize,
    uv_count: usize,
    has_normals: bool,
}

/// Buffered output stream for one `.bin` file.
struct BufferStream {
    writer: BufWriter<File>,
    pos: u64,
}

impl BufferStream {
    fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self { writer: BufWriter::with_capacity(1024 * 1024, file), pos: 0 })
    }

    #[inline]
    fn pos(&self) -> u64 {
        self.pos
    }

    fn write_u16(&mut self, value: u16) -> Result<()> {
        self.writer.write_u16::<LittleEndian>(value)?;
        self.pos += 2;
        Ok(())
    }

    fn write_f32(&mut self, value: f32) -> Result<()> {
        self.writer.write_f32::<LittleEndian>(value)?;
        self.pos += 4;
        Ok(())
    }

    /// Pad with zero bytes up to the next 4-byte boundary.
    fn pad4(&mut self) -> Result<()> {
        while self.pos % 4 != 0 {
            self.writer.write_u8(0)?;
            self.pos += 1;
        }
        Ok(())
    }

    fn finish(mut self) -> Result<u64> {
        self.writer.flush()?;
        Ok(self.pos)
    }
}

/// Streaming glTF writer. One instance accumulates one manifest.
pub struct GltfWriter {
    out_dir: PathBuf,
    options: WriterOptions,
    hooks: Box<dyn WriterHooks>,
    manifest: Gltf,
    stream: Option<BufferStream>,
    mesh_cache: HashMap<MeshFingerprint, usize>,
    /// Normalized image URI → texture index.
    texture_cache: HashMap<String, usize>,
    default_material: Option<usize>,
    post_processor: Option<PostProcessor>,
    closed: bool,
}

impl GltfWriter {
    /// Create a writer emitting into `out_dir` (created if missing).
    pub fn new(out_dir: impl Into<PathBuf>, options: WriterOptions) -> Result<Self> {
        Self::with_hooks(out_dir, options, Box::new(DefaultHooks))
    }

    /// Create a writer with custom node/mesh hooks.
    pub fn with_hooks(
        out_dir: impl Into<PathBuf>,
        options: WriterOptions,
        hooks: Box<dyn WriterHooks>,
    ) -> Result<Self> {
        let out_dir = out_dir.into();
        std::fs::create_dir_all(&out_dir)?;
        Ok(Self {
            out_dir,
            options,
            hooks,
            manifest: Gltf::new(concat!("svf2gltf v", env!("CARGO_PKG_VERSION"))),
            stream: None,
            mesh_cache: HashMap::new(),
            texture_cache: HashMap::new(),
            default_material: None,
            post_processor: None,
            closed: false,
        })
    }

    /// Install a post-processor invoked by [`Self::close`] once the
    /// manifest is finished.
    pub fn set_post_processor(&mut self, post: PostProcessor) {
        self.post_processor = Some(post);
    }

    /// Manifest accumulated so far.
    pub fn manifest(&self) -> &Gltf {
        &self.manifest
    }

    /// Append one scene to the manifest.
    pub fn write(&mut self, scene: &dyn SceneView) -> Result<()> {
        if self.closed {
            return Err(Error::WriterClosed);
        }

        let material_base = self.manifest.materials.len();
        for i in 0..scene.material_count() {
            let material = scene.material(i);
            let entry = self.create_material(&material, scene)?;
            self.manifest.materials.push(entry);
        }

        let mut scene_nodes = Vec::new();
        for i in 0..scene.node_count() {
            let source = scene.node(i);
            if let Some((index, renderable)) = self.create_node(&source, scene, material_base)? {
                if renderable {
                    scene_nodes.push(index);
                }
            }
        }

        let nodes = if self.options.center {
            self.center_nodes(scene, scene_nodes)
        } else {
            scene_nodes
        };

        let name = scene.metadata().name.clone();
        self.manifest.scenes.push(schema::Scene {
            name: (!name.is_empty()).then_some(name),
            nodes,
        });
        if self.manifest.scene.is_none() {
            self.manifest.scene = Some(0);
        }
        Ok(())
    }

    /// Flush buffers, serialize the manifest and run the post-processor.
    /// Returns the manifest path. Terminal: the writer accepts no further
    /// scenes afterwards.
    pub fn close(&mut self) -> Result<PathBuf> {
        if self.closed {
            return Err(Error::WriterClosed);
        }
        self.closed = true;
        self.finish_buffer()?;

        let path = self.out_dir.join("output.gltf");
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer(&mut writer, &self.manifest)?;
        writer.flush()?;

        if let Some(post) = self.post_processor.take() {
            post(&self.manifest, &self.out_dir)?;
        }
        debug!(path = %path.display(), "manifest written");
        Ok(path)
    }

    // -- nodes ------------------------------------------------------------

    /// Map one scene node. Returns the manifest node index and whether the
    /// node carries renderable geometry (and thus joins the scene's node
    /// list). Nodes with nothing behind their geometry reference are not
    /// retained at all.
    fn create_node(
        &mut self,
        source: &SceneNode,
        scene: &dyn SceneView,
        material_base: usize,
    ) -> Result<Option<(usize, bool)>> {
        let mut node = schema::Node {
            name: Some(source.db_id.to_string()),
            ..Default::default()
        };
        match &source.transform {
            Some(Transform::Decomposed { translation, rotation, scale }) => {
                node.translation = Some((*translation).into());
                node.rotation = Some((*rotation).into());
                node.scale = Some((*scale).into());
            }
            // A matrix node must not also carry decomposed fields.
            Some(Transform::Matrix { elements }) => node.matrix = Some(*elements),
            None => {}
        }

        let material_slot = source
            .material
            .map(|m| m as usize)
            .filter(|&m| m < scene.material_count());
        let material_index = match material_slot {
            Some(slot) => material_base + slot,
            None => self.default_material_index(),
        };
        let material = material_slot
            .map(|slot| scene.material(slot))
            .unwrap_or_default();
        let output_uvs = !self.options.skip_unused_uvs || material.diffuse_texture.is_some();

        let mut skipped_by_config = false;
        let mesh_index = match scene.geometry(source.geometry) {
            Geometry::Empty => {
                warn!(db_id = source.db_id, geometry = source.geometry, "no mesh for fragment");
                return Ok(None);
            }
            Geometry::Mesh(mesh) => {
                if self.options.ignore_mesh_geometry {
                    skipped_by_config = true;
                    None
                } else {
                    Some(self.create_mesh(&mesh, material_index, output_uvs)?)
                }
            }
            Geometry::Lines(lines) => {
                if self.options.ignore_line_geometry {
                    skipped_by_config = true;
                    None
                } else {
                    Some(self.create_lines(&lines, material_index)?)
                }
            }
            Geometry::Points(points) => {
                if self.options.ignore_point_geometry {
                    skipped_by_config = true;
                    None
                } else {
                    Some(self.create_points(&points, material_index)?)
                }
            }
        };
        if mesh_index.is_none() && !skipped_by_config {
            return Ok(None);
        }
        node.mesh = mesh_index;

        self.hooks.on_create_node(source, &mut node);
        let index = self.manifest.nodes.len();
        self.manifest.nodes.push(node);
        Ok(Some((index, mesh_index.is_some())))
    }

    /// Wrap the scene's nodes under a root that moves the combined bounds
    /// to the origin. Without known bounds the nodes pass through.
    fn center_nodes(&mut self, scene: &dyn SceneView, nodes: Vec<usize>) -> Vec<usize> {
        let Some((min, max)) = scene.metadata().world_bounds else {
            return nodes;
        };
        let translation = [
            -(min[0] + max[0]) / 2.0,
            -(min[1] + max[1]) / 2.0,
            -(min[2] + max[2]) / 2.0,
        ];
        let root = schema::Node {
            translation: Some(translation),
            children: nodes,
            ..Default::default()
        };
        let index = self.manifest.nodes.len();
        self.manifest.nodes.push(root);
        vec![index]
    }

    // -- geometry ---------------------------------------------------------

    fn mesh_fingerprint(&mut self, mesh: &MeshView<'_>) -> MeshFingerprint {
        let hash = self.hooks.on_mesh_hash(mesh).unwrap_or_else(|| {
            let mut parts: Vec<&[u8]> = Vec::with_capacity(3 + mesh.uv_channels.len());
            parts.push(bytemuck::cast_slice(mesh.vertices));
            parts.push(bytemuck::cast_slice(mesh.indices));
            for uvs in &mesh.uv_channels {
                parts.push(bytemuck::cast_slice(uvs));
            }
            if let Some(normals) = mesh.normals {
                parts.push(bytemuck::cast_slice(normals));
            }
            hash128_parts(&parts, 0)
        });
        MeshFingerprint {
            hash,
            vertex_count: mesh.vertex_count(),
            triangle_count: mesh.triangle_count(),
            uv_count: mesh.uv_channels.len(),
            has_normals: mesh.normals.is_some(),
        }
    }

    fn create_mesh(
        &mut self,
        mesh: &MeshView<'_>,
        material_index: usize,
        output_uvs: bool,
    ) -> Result<usize> {
        if self.options.deduplicate {
            let fingerprint = self.mesh_fingerprint(mesh);
            if let Some(&index) = self.mesh_cache.get(&fingerprint) {
                debug!(mesh = index, "reusing deduplicated mesh");
                // The shared mesh takes the current fragment's material;
                // dedup assumes one consistent material per content hash.
                for primitive in &mut self.manifest.meshes[index].primitives {
                    primitive.material = Some(material_index);
                }
                return Ok(index);
            }
            let index = self.encode_mesh(mesh, material_index, output_uvs)?;
            self.mesh_cache.insert(fingerprint, index);
            return Ok(index);
        }
        self.encode_mesh(mesh, material_index, output_uvs)
    }

    fn encode_mesh(
        &mut self,
        mesh: &MeshView<'_>,
        material_index: usize,
        output_uvs: bool,
    ) -> Result<usize> {
        let uvs = if output_uvs { mesh.uv_channels.first().copied() } else { None };

        let index_bytes = pad4_len(mesh.indices.len() as u64 * 2);
        let vertex_bytes = mesh.vertices.len() as u64 * 4;
        let normal_bytes = mesh.normals.map_or(0, |n| n.len() as u64 * 4);
        let uv_bytes = uvs.map_or(0, |u| u.len() as u64 * 4);
        self.prepare_buffer(index_bytes + vertex_bytes + normal_bytes + uv_bytes)?;

        let indices = self.write_index_block(mesh.indices)?;
        let position = self.write_float_block(
            mesh.vertices,
            "VEC3",
            Some(mesh.min.to_vec()),
            Some(mesh.max.to_vec()),
        )?;

        let mut primitive = schema::Primitive {
            indices: Some(indices),
            material: Some(material_index),
            mode: None, // triangles are the glTF default
            ..Default::default()
        };
        primitive.attributes.insert("POSITION".to_string(), position);
        if let Some(normals) = mesh.normals {
            let accessor = self.write_float_block(normals, "VEC3", None, None)?;
            primitive.attributes.insert("NORMAL".to_string(), accessor);
        }
        if let Some(uvs) = uvs {
            let accessor = self.write_float_block(uvs, "VEC2", None, None)?;
            primitive.attributes.insert("TEXCOORD_0".to_string(), accessor);
        }

        let mut out = schema::Mesh { primitives: vec![primitive] };
        self.hooks.on_create_mesh(mesh, &mut out);
        let index = self.manifest.meshes.len();
        self.manifest.meshes.push(out);
        Ok(index)
    }

    fn create_lines(&mut self, lines: &LinesView<'_>, material_index: usize) -> Result<usize> {
        let index_bytes = pad4_len(lines.indices.len() as u64 * 2);
        let vertex_bytes = lines.vertices.len() as u64 * 4;
        let color_bytes = lines.colors.map_or(0, |c| c.len() as u64 * 4);
        self.prepare_buffer(index_bytes + vertex_bytes + color_bytes)?;

        let indices = self.write_index_block(lines.indices)?;
        let position = self.write_float_block(lines.vertices, "VEC3", None, None)?;

        let mut primitive = schema::Primitive {
            indices: Some(indices),
            material: Some(material_index),
            mode: Some(schema::MODE_LINES),
            ..Default::default()
        };
        primitive.attributes.insert("POSITION".to_string(), position);
        if let Some(colors) = lines.colors {
            let accessor = self.write_float_block(colors, "VEC3", None, None)?;
            primitive.attributes.insert("COLOR_0".to_string(), accessor);
        }

        let mut out = schema::Mesh { primitives: vec![primitive] };
        self.hooks.on_create_lines(lines, &mut out);
        let index = self.manifest.meshes.len();
        self.manifest.meshes.push(out);
        Ok(index)
    }

    fn create_points(&mut self, points: &PointsView<'_>, material_index: usize) -> Result<usize> {
        let vertex_bytes = points.vertices.len() as u64 * 4;
        let color_bytes = points.colors.map_or(0, |c| c.len() as u64 * 4);
        self.prepare_buffer(vertex_bytes + color_bytes)?;

        let position = self.write_float_block(points.vertices, "VEC3", None, None)?;
        let mut primitive = schema::Primitive {
            indices: None,
            material: Some(material_index),
            mode: Some(schema::MODE_POINTS),
            ..Default::default()
        };
        primitive.attributes.insert("POSITION".to_string(), position);
        if let Some(colors) = points.colors {
            let accessor = self.write_float_block(colors, "VEC3", None, None)?;
            primitive.attributes.insert("COLOR_0".to_string(), accessor);
        }

        let index = self.manifest.meshes.len();
        self.manifest.meshes.push(schema::Mesh { primitives: vec![primitive] });
        Ok(index)
    }

    // -- buffers ----------------------------------------------------------

    /// Make sure an open buffer can absorb `byte_len` more bytes, rolling
    /// over to a new indexed `.bin` file when the cap would be exceeded.
    fn prepare_buffer(&mut self, byte_len: u64) -> Result<()> {
        let roll_over = match &self.stream {
            Some(stream) => stream.pos() + byte_len > self.options.max_buffer_size,
            None => true,
        };
        if roll_over {
            self.finish_buffer()?;
            let uri = format!("{}.bin", self.manifest.buffers.len());
            self.stream = Some(BufferStream::create(&self.out_dir.join(&uri))?);
            self.manifest.buffers.push(schema::Buffer { uri: Some(uri), byte_length: 0 });
        }
        Ok(())
    }

    /// Close the active buffer file and record its final byte length.
    fn finish_buffer(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            let byte_length = stream.finish()?;
            if let Some(buffer) = self.manifest.buffers.last_mut() {
                buffer.byte_length = byte_length;
            }
        }
        Ok(())
    }

    fn active_stream(&mut self) -> Result<&mut BufferStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| Error::other("no open buffer stream"))
    }

    /// Write an index block, pad the buffer to 4 bytes, and append its
    /// bufferView and accessor.
    fn write_index_block(&mut self, indices: &[u16]) -> Result<usize> {
        let buffer = self.manifest.buffers.len() - 1;
        let stream = self.active_stream()?;
        let offset = stream.pos();
        for &index in indices {
            stream.write_u16(index)?;
        }
        let byte_length = stream.pos() - offset;
        stream.pad4()?;

        self.manifest.buffer_views.push(schema::BufferView {
            buffer,
            byte_offset: offset,
            byte_length,
        });
        let view = self.manifest.buffer_views.len() - 1;
        self.push_accessor(schema::Accessor {
            buffer_view: Some(view),
            component_type: schema::COMPONENT_UNSIGNED_SHORT,
            count: indices.len(),
            type_name: "SCALAR".to_string(),
            min: None,
            max: None,
        })
    }

    /// Write a float block and append its bufferView and accessor.
    fn write_float_block(
        &mut self,
        values: &[f32],
        type_name: &str,
        min: Option<Vec<f32>>,
        max: Option<Vec<f32>>,
    ) -> Result<usize> {
        let components = match type_name {
            "VEC2" => 2,
            _ => 3,
        };
        let buffer = self.manifest.buffers.len() - 1;
        let stream = self.active_stream()?;
        let offset = stream.pos();
        for &value in values {
            stream.write_f32(value)?;
        }
        let byte_length = stream.pos() - offset;

        self.manifest.buffer_views.push(schema::BufferView {
            buffer,
            byte_offset: offset,
            byte_length,
        });
        let view = self.manifest.buffer_views.len() - 1;
        self.push_accessor(schema::Accessor {
            buffer_view: Some(view),
            component_type: schema::COMPONENT_FLOAT,
            count: values.len() / components,
            type_name: type_name.to_string(),
            min,
            max,
        })
    }

    fn push_accessor(&mut self, accessor: schema::Accessor) -> Result<usize> {
        self.manifest.accessors.push(accessor);
        Ok(self.manifest.accessors.len() - 1)
    }

    // -- materials --------------------------------------------------------

    /// Index of the shared fallback material, appended on first use.
    fn default_material_index(&mut self) -> usize {
        if let Some(index) = self.default_material {
            return index;
        }
        let index = self.manifest.materials.len();
        self.manifest.materials.push(build_material(&PhysicalMaterial::default(), None));
        self.default_material = Some(index);
        index
    }

    fn create_material(
        &mut self,
        material: &PhysicalMaterial,
        scene: &dyn SceneView,
    ) -> Result<schema::Material> {
        let texture = match &material.diffuse_texture {
            Some(uri) => self.create_texture(uri, scene)?,
            None => None,
        };
        Ok(build_material(material, texture))
    }

    /// Resolve a diffuse texture URI into a texture index, deduplicating
    /// by normalized URI and writing the image bytes under the output dir.
    fn create_texture(&mut self, uri: &str, scene: &dyn SceneView) -> Result<Option<usize>> {
        let normalized = normalize_uri(uri);
        if let Some(&index) = self.texture_cache.get(&normalized) {
            return Ok(Some(index));
        }
        let Some(bytes) = scene.image(uri) else {
            warn!(uri, "texture image not resolvable, material left untextured");
            return Ok(None);
        };

        let target = self.out_dir.join(&normalized);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, bytes)?;

        let image = self.manifest.images.len();
        self.manifest.images.push(schema::Image { uri: Some(normalized.clone()) });
        let texture = self.manifest.textures.len();
        self.manifest.textures.push(schema::Texture { source: Some(image) });
        self.texture_cache.insert(normalized, texture);
        Ok(Some(texture))
    }
}

/// Map a physical material to its glTF representation. Opacity below 1
/// switches to alpha blending and folds into the base-color alpha.
fn build_material(material: &PhysicalMaterial, texture: Option<usize>) -> schema::Material {
    let mut base_color = material.base_color;
    let mut alpha_mode = None;
    if material.opacity < 1.0 {
        alpha_mode = Some("BLEND".to_string());
        base_color[3] = material.opacity;
    }
    schema::Material {
        name: None,
        alpha_mode,
        pbr_metallic_roughness: Some(schema::PbrMetallicRoughness {
            base_color_factor: Some(base_color),
            metallic_factor: Some(material.metallic),
            roughness_factor: Some(material.roughness),
            base_color_texture: texture
                .map(|index| schema::TextureInfo { index, tex_coord: Some(0) }),
        }),
    }
}

/// Length of `len` bytes once padded to a 4-byte boundary.
fn pad4_len(len: u64) -> u64 {
    (len + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{SceneMetadata, SvfScene};
    use crate::svf::{Fragment, GeometryMetadata};
    use smallvec::smallvec;
    use std::collections::HashMap as StdHashMap;

    /// Synthetic one-mesh scene used across the writer tests.
    struct SingleMeshScene {
        indices: Vec<u16>,
        vertices: Vec<f32>,
        normals: Option<Vec<f32>>,
        node_count: usize,
        material: PhysicalMaterial,
        metadata: SceneMetadata,
        images: StdHashMap<String, Vec<u8>>,
    }

    impl SingleMeshScene {
        fn triangle(node_count: usize) -> Self {
            Self {
                indices: vec![0, 1, 2],
                vertices: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
                normals: Some(vec![0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0]),
                node_count,
                material: PhysicalMaterial::default(),
                metadata: SceneMetadata::default(),
                images: StdHashMap::new(),
            }
        }
    }

    impl SceneView for SingleMeshScene {
        fn node_count(&self) -> usize {
            self.node_count
        }

        fn node(&self, index: usize) -> SceneNode {
            SceneNode {
                db_id: index as u32 + 1,
                geometry: 1,
                material: Some(0),
                transform: Some(Transform::identity()),
            }
        }

        fn geometry_count(&self) -> usize {
            2
        }

        fn geometry(&self, id: u32) -> Geometry<'_> {
            if id != 1 {
                return Geometry::Empty;
            }
            Geometry::Mesh(MeshView {
                indices: &self.indices,
                vertices: &self.vertices,
                normals: self.normals.as_deref(),
                colors: None,
                color_stride: 4,
                uv_channels: smallvec![],
                min: [0.0, 0.0, 0.0],
                max: [1.0, 1.0, 0.0],
            })
        }

        fn material_count(&self) -> usize {
            1
        }

        fn material(&self, _index: usize) -> PhysicalMaterial {
            self.material.clone()
        }

        fn image(&self, uri: &str) -> Option<&[u8]> {
            self.images.get(&normalize_uri(uri)).map(Vec::as_slice)
        }

        fn metadata(&self) -> &SceneMetadata {
            &self.metadata
        }
    }

    fn write_scene(scene: &dyn SceneView, options: WriterOptions) -> (tempfile::TempDir, Gltf) {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = GltfWriter::new(dir.path(), options).unwrap();
        writer.write(scene).unwrap();
        writer.close().unwrap();
        let manifest: Gltf = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("output.gltf")).unwrap(),
        )
        .unwrap();
        (dir, manifest)
    }

    #[test]
    fn test_single_triangle_end_to_end() {
        let scene = SingleMeshScene::triangle(1);
        let (dir, manifest) = write_scene(&scene, WriterOptions::default());

        assert_eq!(manifest.asset.version, "2.0");
        assert_eq!(manifest.nodes.len(), 1);
        assert_eq!(manifest.nodes[0].mesh, Some(0));
        assert_eq!(manifest.scenes.len(), 1);
        assert_eq!(manifest.scenes[0].nodes, vec![0]);

        assert_eq!(manifest.meshes.len(), 1);
        let primitive = &manifest.meshes[0].primitives[0];
        assert!(primitive.attributes.contains_key("POSITION"));
        assert!(primitive.attributes.contains_key("NORMAL"));
        let indices = primitive.indices.unwrap();
        assert_eq!(manifest.accessors[indices].count, 3);
        assert_eq!(
            manifest.accessors[indices].component_type,
            schema::COMPONENT_UNSIGNED_SHORT
        );

        // Position accessor carries decode-time bounds.
        let position = primitive.attributes["POSITION"];
        assert_eq!(manifest.accessors[position].min, Some(vec![0.0, 0.0, 0.0]));
        assert_eq!(manifest.accessors[position].max, Some(vec![1.0, 1.0, 0.0]));

        // One buffer holding padded indices + positions + normals.
        assert_eq!(manifest.buffers.len(), 1);
        let expected = pad4_len(3 * 2) + 9 * 4 + 9 * 4;
        assert_eq!(manifest.buffers[0].byte_length, expected);
        let bin = std::fs::metadata(dir.path().join("0.bin")).unwrap();
        assert_eq!(bin.len(), expected);
    }

    #[test]
    fn test_buffer_capping() {
        // Mesh payload: pad4(6) + 36 + 36 = 80 bytes; cap at 100 so each
        // mesh rolls into its own buffer.
        let scene = SingleMeshScene::triangle(3);
        let options = WriterOptions {
            max_buffer_size: 100,
            ..Default::default()
        };
        let (dir, manifest) = write_scene(&scene, options);

        assert_eq!(manifest.buffers.len(), 3);
        for (i, buffer) in manifest.buffers.iter().enumerate() {
            assert_eq!(buffer.byte_length, 80);
            assert_eq!(buffer.uri.as_deref(), Some(format!("{}.bin", i).as_str()));
            assert_eq!(
                std::fs::metadata(dir.path().join(format!("{}.bin", i))).unwrap().len(),
                80
            );
        }
        // Accessors point at views inside the right buffers.
        for accessor in &manifest.accessors {
            let view = &manifest.buffer_views[accessor.buffer_view.unwrap()];
            assert!(view.byte_offset + view.byte_length <= manifest.buffers[view.buffer].byte_length);
        }
    }

    #[test]
    fn test_dedup_collapses_identical_meshes() {
        let scene = SingleMeshScene::triangle(2);
        let options = WriterOptions { deduplicate: true, ..Default::default() };
        let (_dir, manifest) = write_scene(&scene, options);

        assert_eq!(manifest.meshes.len(), 1);
        assert_eq!(manifest.nodes.len(), 2);
        assert_eq!(manifest.nodes[0].mesh, Some(0));
        assert_eq!(manifest.nodes[1].mesh, Some(0));
        assert_eq!(manifest.scenes[0].nodes.len(), 2);
    }

    #[test]
    fn test_without_dedup_meshes_are_repeated() {
        let scene = SingleMeshScene::triangle(2);
        let (_dir, manifest) = write_scene(&scene, WriterOptions::default());
        assert_eq!(manifest.meshes.len(), 2);
    }

    #[test]
    fn test_default_material_shape() {
        let scene = SingleMeshScene::triangle(1);
        let (_dir, manifest) = write_scene(&scene, WriterOptions::default());
        let pbr = manifest.materials[0].pbr_metallic_roughness.as_ref().unwrap();
        assert_eq!(pbr.base_color_factor, Some([0.25, 0.25, 0.25, 1.0]));
        assert_eq!(pbr.metallic_factor, Some(0.0));
        assert_eq!(pbr.roughness_factor, Some(0.5));
        assert!(manifest.materials[0].alpha_mode.is_none());
    }

    #[test]
    fn test_transparent_material_blends() {
        let mut scene = SingleMeshScene::triangle(1);
        scene.material.opacity = 0.5;
        scene.material.base_color = [1.0, 0.0, 0.0, 1.0];
        let (_dir, manifest) = write_scene(&scene, WriterOptions::default());
        let material = &manifest.materials[0];
        assert_eq!(material.alpha_mode.as_deref(), Some("BLEND"));
        let pbr = material.pbr_metallic_roughness.as_ref().unwrap();
        assert_eq!(pbr.base_color_factor, Some([1.0, 0.0, 0.0, 0.5]));
    }

    #[test]
    fn test_ignore_meshes_keeps_node_out_of_scene() {
        let scene = SingleMeshScene::triangle(1);
        let options = WriterOptions { ignore_mesh_geometry: true, ..Default::default() };
        let (_dir, manifest) = write_scene(&scene, options);
        // The node exists but is not part of the scene's node list.
        assert_eq!(manifest.nodes.len(), 1);
        assert!(manifest.nodes[0].mesh.is_none());
        assert!(manifest.scenes[0].nodes.is_empty());
        assert!(manifest.meshes.is_empty());
    }

    #[test]
    fn test_write_after_close_is_protocol_error() {
        let dir = tempfile::tempdir().unwrap();
        let scene = SingleMeshScene::triangle(1);
        let mut writer = GltfWriter::new(dir.path(), WriterOptions::default()).unwrap();
        writer.write(&scene).unwrap();
        writer.close().unwrap();
        assert!(matches!(writer.write(&scene), Err(Error::WriterClosed)));
        assert!(matches!(writer.close(), Err(Error::WriterClosed)));
    }

    #[test]
    fn test_matrix_transform_excludes_translation() {
        struct MatrixScene(SingleMeshScene);
        impl SceneView for MatrixScene {
            fn node_count(&self) -> usize {
                1
            }
            fn node(&self, _index: usize) -> SceneNode {
                SceneNode {
                    db_id: 1,
                    geometry: 1,
                    material: None,
                    transform: Some(Transform::from_mat3_translation(
                        [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
                        glam::vec3(5.0, 6.0, 7.0),
                    )),
                }
            }
            fn geometry_count(&self) -> usize {
                self.0.geometry_count()
            }
            fn geometry(&self, id: u32) -> Geometry<'_> {
                self.0.geometry(id)
            }
            fn material_count(&self) -> usize {
                0
            }
            fn material(&self, _index: usize) -> PhysicalMaterial {
                PhysicalMaterial::default()
            }
            fn image(&self, _uri: &str) -> Option<&[u8]> {
                None
            }
            fn metadata(&self) -> &SceneMetadata {
                self.0.metadata()
            }
        }

        let scene = MatrixScene(SingleMeshScene::triangle(1));
        let (_dir, manifest) = write_scene(&scene, WriterOptions::default());
        let node = &manifest.nodes[0];
        assert!(node.matrix.is_some());
        assert!(node.translation.is_none());
        assert!(node.rotation.is_none());
        assert!(node.scale.is_none());
        let matrix = node.matrix.unwrap();
        assert_eq!(&matrix[12..16], &[5.0, 6.0, 7.0, 1.0]);
    }

    #[test]
    fn test_texture_written_and_deduplicated() {
        let mut scene = SingleMeshScene::triangle(2);
        scene.material.diffuse_texture = Some("Textures\\Wood.PNG".to_string());
        scene
            .images
            .insert("textures/wood.png".to_string(), vec![0x89, 0x50, 0x4e, 0x47]);

        let (dir, manifest) = write_scene(&scene, WriterOptions::default());
        assert_eq!(manifest.images.len(), 1);
        assert_eq!(manifest.textures.len(), 1);
        assert_eq!(manifest.images[0].uri.as_deref(), Some("textures/wood.png"));
        assert!(dir.path().join("textures/wood.png").exists());
    }

    #[test]
    fn test_center_wraps_scene_in_root() {
        let mut scene = SingleMeshScene::triangle(1);
        scene.metadata.world_bounds = Some(([0.0, 0.0, 0.0], [2.0, 4.0, 6.0]));
        let options = WriterOptions { center: true, ..Default::default() };
        let (_dir, manifest) = write_scene(&scene, options);

        assert_eq!(manifest.scenes[0].nodes.len(), 1);
        let root = &manifest.nodes[*manifest.scenes[0].nodes.first().unwrap()];
        assert_eq!(root.translation, Some([-1.0, -2.0, -3.0]));
        assert_eq!(root.children.len(), 1);
    }

    /// Adapter wiring the SVF decoders through the writer; exercises the
    /// pack-file → scene → manifest path in one place.
    #[test]
    fn test_svf_scene_through_writer() {
        use crate::svf::meshes::tests::triangle_pack;

        let mesh_packs =
            StdHashMap::from([(0u32, crate::svf::parse_mesh_pack(triangle_pack()).unwrap())]);
        let scene = SvfScene::from_parts(
            vec![Fragment {
                visible: true,
                material_id: 0,
                geometry_id: 0,
                db_id: 7,
                transform: Some(Transform::identity()),
                bbox: [0.0; 6],
            }],
            vec![GeometryMetadata { frag_type: 0, prim_count: 1, pack_id: 0, entity_id: 0 }],
            mesh_packs,
            vec![None],
            StdHashMap::new(),
            SceneMetadata::default(),
        );

        let (_dir, manifest) = write_scene(&scene, WriterOptions::default());
        assert_eq!(manifest.nodes.len(), 1);
        assert_eq!(manifest.nodes[0].name.as_deref(), Some("7"));
        assert_eq!(manifest.meshes.len(), 1);
    }
}
