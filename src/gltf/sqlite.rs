//! Relational round-trip of a finished glTF manifest.
//!
//! Serialization flattens the manifest into 8 tables keyed by original
//! array index (one primitive per mesh, matching the writer's output),
//! plus an optional `properties` table fed by the external property
//! database collaborator. Deserialization can subset by node `dbid` and
//! rebuilds every cross-reference by value: original ids act as surrogate
//! keys held in per-table side maps and are resolved to fresh 0-based
//! indices before the manifest is emitted again.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use rusqlite::{params, Connection};

use crate::gltf::schema::{self, Gltf};
use crate::util::Result;

/// Opaque per-object property source (the external property database).
pub trait PropertyLookup {
    fn properties(&self, db_id: i64) -> Vec<(String, String)>;
}

/// Node subset selection applied on deserialization.
pub enum NodeFilter {
    /// Arbitrary SQL predicate over the `nodes` columns, e.g.
    /// `dbid BETWEEN 100 AND 200`.
    Predicate(String),
    /// Explicit dbid list.
    Ids(Vec<i64>),
}

const SCHEMA_SQL: &str = "
CREATE TABLE buffers (id INTEGER PRIMARY KEY, uri TEXT, byte_length INTEGER NOT NULL);
CREATE TABLE buffer_views (id INTEGER PRIMARY KEY, buffer_id INTEGER NOT NULL,
    byte_offset INTEGER NOT NULL, byte_length INTEGER NOT NULL);
CREATE TABLE accessors (id INTEGER PRIMARY KEY, buffer_view_id INTEGER,
    component_type INTEGER NOT NULL, count INTEGER NOT NULL, type TEXT NOT NULL,
    min TEXT, max TEXT);
CREATE TABLE meshes (id INTEGER PRIMARY KEY, mode INTEGER, material_id INTEGER,
    index_accessor_id INTEGER, position_accessor_id INTEGER,
    normal_accessor_id INTEGER, uv_accessor_id INTEGER, color_accessor_id INTEGER);
CREATE TABLE materials (id INTEGER PRIMARY KEY, base_color_r REAL, base_color_g REAL,
    base_color_b REAL, base_color_a REAL, metallic REAL, roughness REAL,
    alpha_mode TEXT, texture_id INTEGER);
CREATE TABLE textures (id INTEGER PRIMARY KEY, image_id INTEGER);
CREATE TABLE images (id INTEGER PRIMARY KEY, uri TEXT);
CREATE TABLE nodes (id INTEGER PRIMARY KEY, dbid INTEGER, mesh_id INTEGER, matrix TEXT,
    tx REAL, ty REAL, tz REAL, rx REAL, ry REAL, rz REAL, rw REAL,
    sx REAL, sy REAL, sz REAL);
CREATE TABLE properties (dbid INTEGER NOT NULL, name TEXT NOT NULL, value TEXT);
CREATE INDEX idx_nodes_dbid ON nodes (dbid);
CREATE INDEX idx_properties_dbid ON properties (dbid);
";

/// Serialize a manifest into a fresh SQLite database at `path`.
pub fn serialize_manifest(
    manifest: &Gltf,
    path: &Path,
    properties: Option<&dyn PropertyLookup>,
) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let mut conn = Connection::open(path)?;
    let tx = conn.transaction()?;
    tx.execute_batch(SCHEMA_SQL)?;

    for (i, buffer) in manifest.buffers.iter().enumerate() {
        tx.execute(
            "INSERT INTO buffers (id, uri, byte_length) VALUES (?1, ?2, ?3)",
            params![i as i64, buffer.uri, buffer.byte_length as i64],
        )?;
    }
    for (i, view) in manifest.buffer_views.iter().enumerate() {
        tx.execute(
            "INSERT INTO buffer_views (id, buffer_id, byte_offset, byte_length)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                i as i64,
                view.buffer as i64,
                view.byte_offset as i64,
                view.byte_length as i64
            ],
        )?;
    }
    for (i, accessor) in manifest.accessors.iter().enumerate() {
        let min = accessor.min.as_ref().map(serde_json::to_string).transpose()?;
        let max = accessor.max.as_ref().map(serde_json::to_string).transpose()?;
        tx.execute(
            "INSERT INTO accessors (id, buffer_view_id, component_type, count, type, min, max)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                i as i64,
                accessor.buffer_view.map(|v| v as i64),
                accessor.component_type,
                accessor.count as i64,
                accessor.type_name,
                min,
                max
            ],
        )?;
    }
    for (i, mesh) in manifest.meshes.iter().enumerate() {
        let primitive = mesh.primitives.first();
        let attr = |name: &str| -> Option<i64> {
            primitive.and_then(|p| p.attributes.get(name)).map(|&v| v as i64)
        };
        tx.execute(
            "INSERT INTO meshes (id, mode, material_id, index_accessor_id,
                position_accessor_id, normal_accessor_id, uv_accessor_id, color_accessor_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                i as i64,
                primitive.and_then(|p| p.mode),
                primitive.and_then(|p| p.material).map(|v| v as i64),
                primitive.and_then(|p| p.indices).map(|v| v as i64),
                attr("POSITION"),
                attr("NORMAL"),
                attr("TEXCOORD_0"),
                attr("COLOR_0")
            ],
        )?;
    }
    for (i, material) in manifest.materials.iter().enumerate() {
        let pbr = material.pbr_metallic_roughness.as_ref();
        let base = pbr.and_then(|p| p.base_color_factor);
        tx.execute(
            "INSERT INTO materials (id, base_color_r, base_color_g, base_color_b, base_color_a,
                metallic, roughness, alpha_mode, texture_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                i as i64,
                base.map(|c| c[0] as f64),
                base.map(|c| c[1] as f64),
                base.map(|c| c[2] as f64),
                base.map(|c| c[3] as f64),
                pbr.and_then(|p| p.metallic_factor).map(f64::from),
                pbr.and_then(|p| p.roughness_factor).map(f64::from),
                material.alpha_mode,
                pbr.and_then(|p| p.base_color_texture.as_ref()).map(|t| t.index as i64)
            ],
        )?;
    }
    for (i, texture) in manifest.textures.iter().enumerate() {
        tx.execute(
            "INSERT INTO textures (id, image_id) VALUES (?1, ?2)",
            params![i as i64, texture.source.map(|v| v as i64)],
        )?;
    }
    for (i, image) in manifest.images.iter().enumerate() {
        tx.execute(
            "INSERT INTO images (id, uri) VALUES (?1, ?2)",
            params![i as i64, image.uri],
        )?;
    }

    let mut db_ids = BTreeSet::new();
    for (i, node) in manifest.nodes.iter().enumerate() {
        let dbid = node.name.as_deref().and_then(|n| n.parse::<i64>().ok());
        if let Some(dbid) = dbid {
            db_ids.insert(dbid);
        }
        let matrix = node.matrix.as_ref().map(serde_json::to_string).transpose()?;
        tx.execute(
            "INSERT INTO nodes (id, dbid, mesh_id, matrix,
                tx, ty, tz, rx, ry, rz, rw, sx, sy, sz)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                i as i64,
                dbid,
                node.mesh.map(|v| v as i64),
                matrix,
                node.translation.map(|t| t[0] as f64),
                node.translation.map(|t| t[1] as f64),
                node.translation.map(|t| t[2] as f64),
                node.rotation.map(|r| r[0] as f64),
                node.rotation.map(|r| r[1] as f64),
                node.rotation.map(|r| r[2] as f64),
                node.rotation.map(|r| r[3] as f64),
                node.scale.map(|s| s[0] as f64),
                node.scale.map(|s| s[1] as f64),
                node.scale.map(|s| s[2] as f64)
            ],
        )?;
    }

    if let Some(lookup) = properties {
        for dbid in db_ids {
            for (name, value) in lookup.properties(dbid) {
                tx.execute(
                    "INSERT INTO properties (dbid, name, value) VALUES (?1, ?2, ?3)",
                    params![dbid, name, value],
                )?;
            }
        }
    }

    tx.commit()?;
    Ok(())
}

// Row images of the tables, keyed by their original ids until the final
// index-rewrite pass.

struct MeshRow {
    mode: Option<u32>,
    material: Option<i64>,
    indices: Option<i64>,
    position: Option<i64>,
    normal: Option<i64>,
    uv: Option<i64>,
    color: Option<i64>,
}

struct AccessorRow {
    buffer_view: Option<i64>,
    component_type: u32,
    count: i64,
    type_name: String,
    min: Option<String>,
    max: Option<String>,
}

struct NodeRow {
    dbid: Option<i64>,
    mesh: Option<i64>,
    matrix: Option<String>,
    translation: Option<[f64; 3]>,
    rotation: Option<[f64; 4]>,
    scale: Option<[f64; 3]>,
}

struct MaterialRow {
    base_color: Option<[f64; 4]>,
    metallic: Option<f64>,
    roughness: Option<f64>,
    alpha_mode: Option<String>,
    texture: Option<i64>,
}

/// Load a whole table into an id-keyed map.
fn load_table<T>(
    conn: &Connection,
    sql: &str,
    mut map_row: impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
) -> Result<HashMap<i64, T>> {
    let mut statement = conn.prepare(sql)?;
    let rows = statement.query_map([], |row| Ok((row.get::<_, i64>(0)?, map_row(row)?)))?;
    let mut out = HashMap::new();
    for row in rows {
        let (id, value) = row?;
        out.insert(id, value);
    }
    Ok(out)
}

/// Deserialize a manifest, optionally subset to nodes matching `filter`.
///
/// All cross-references are renumbered to fresh, dense 0-based indices.
pub fn deserialize_manifest(path: &Path, filter: Option<&NodeFilter>) -> Result<Gltf> {
    let conn = Connection::open(path)?;

    let node_sql = match filter {
        None => "SELECT id, dbid, mesh_id, matrix, tx, ty, tz, rx, ry, rz, rw, sx, sy, sz \
                 FROM nodes ORDER BY id"
            .to_string(),
        Some(NodeFilter::Predicate(predicate)) => format!(
            "SELECT id, dbid, mesh_id, matrix, tx, ty, tz, rx, ry, rz, rw, sx, sy, sz \
             FROM nodes WHERE {} ORDER BY id",
            predicate
        ),
        Some(NodeFilter::Ids(ids)) => {
            let list = ids.iter().map(i64::to_string).collect::<Vec<_>>().join(",");
            format!(
                "SELECT id, dbid, mesh_id, matrix, tx, ty, tz, rx, ry, rz, rw, sx, sy, sz \
                 FROM nodes WHERE dbid IN ({}) ORDER BY id",
                list
            )
        }
    };

    let mut nodes: Vec<NodeRow> = Vec::new();
    {
        let mut statement = conn.prepare(&node_sql)?;
        let rows = statement.query_map([], |row| {
            let translation = match (
                row.get::<_, Option<f64>>(4)?,
                row.get::<_, Option<f64>>(5)?,
                row.get::<_, Option<f64>>(6)?,
            ) {
                (Some(x), Some(y), Some(z)) => Some([x, y, z]),
                _ => None,
            };
            let rotation = match (
                row.get::<_, Option<f64>>(7)?,
                row.get::<_, Option<f64>>(8)?,
                row.get::<_, Option<f64>>(9)?,
                row.get::<_, Option<f64>>(10)?,
            ) {
                (Some(x), Some(y), Some(z), Some(w)) => Some([x, y, z, w]),
                _ => None,
            };
            let scale = match (
                row.get::<_, Option<f64>>(11)?,
                row.get::<_, Option<f64>>(12)?,
                row.get::<_, Option<f64>>(13)?,
            ) {
                (Some(x), Some(y), Some(z)) => Some([x, y, z]),
                _ => None,
            };
            Ok(NodeRow {
                dbid: row.get(1)?,
                mesh: row.get(2)?,
                matrix: row.get(3)?,
                translation,
                rotation,
                scale,
            })
        })?;
        for row in rows {
            nodes.push(row?);
        }
    }

    let meshes = load_table(&conn, "SELECT id, mode, material_id, index_accessor_id, \
        position_accessor_id, normal_accessor_id, uv_accessor_id, color_accessor_id FROM meshes", |row| {
        Ok(MeshRow {
            mode: row.get(1)?,
            material: row.get(2)?,
            indices: row.get(3)?,
            position: row.get(4)?,
            normal: row.get(5)?,
            uv: row.get(6)?,
            color: row.get(7)?,
        })
    })?;
    let accessors = load_table(&conn, "SELECT id, buffer_view_id, component_type, count, type, \
        min, max FROM accessors", |row| {
        Ok(AccessorRow {
            buffer_view: row.get(1)?,
            component_type: row.get(2)?,
            count: row.get(3)?,
            type_name: row.get(4)?,
            min: row.get(5)?,
            max: row.get(6)?,
        })
    })?;
    let views = load_table(&conn, "SELECT id, buffer_id, byte_offset, byte_length FROM buffer_views", |row| {
        Ok((row.get::<_, i64>(1)?, row.get::<_, i64>(2)?, row.get::<_, i64>(3)?))
    })?;
    let buffers = load_table(&conn, "SELECT id, uri, byte_length FROM buffers", |row| {
        Ok((row.get::<_, Option<String>>(1)?, row.get::<_, i64>(2)?))
    })?;
    let materials = load_table(&conn, "SELECT id, base_color_r, base_color_g, base_color_b, \
        base_color_a, metallic, roughness, alpha_mode, texture_id FROM materials", |row| {
        let base_color = match (
            row.get::<_, Option<f64>>(1)?,
            row.get::<_, Option<f64>>(2)?,
            row.get::<_, Option<f64>>(3)?,
            row.get::<_, Option<f64>>(4)?,
        ) {
            (Some(r), Some(g), Some(b), Some(a)) => Some([r, g, b, a]),
            _ => None,
        };
        Ok(MaterialRow {
            base_color,
            metallic: row.get(5)?,
            roughness: row.get(6)?,
            alpha_mode: row.get(7)?,
            texture: row.get(8)?,
        })
    })?;
    let textures = load_table(&conn, "SELECT id, image_id FROM textures", |row| {
        row.get::<_, Option<i64>>(1)
    })?;
    let images = load_table(&conn, "SELECT id, uri FROM images", |row| {
        row.get::<_, Option<String>>(1)
    })?;

    // Chase references from the surviving nodes outwards, collecting each
    // table's referenced surrogate keys.
    let mesh_ids: BTreeSet<i64> = nodes.iter().filter_map(|n| n.mesh).collect();
    let mut accessor_ids = BTreeSet::new();
    let mut material_ids = BTreeSet::new();
    for id in &mesh_ids {
        if let Some(mesh) = meshes.get(id) {
            for accessor in [mesh.indices, mesh.position, mesh.normal, mesh.uv, mesh.color] {
                if let Some(accessor) = accessor {
                    accessor_ids.insert(accessor);
                }
            }
            if let Some(material) = mesh.material {
                material_ids.insert(material);
            }
        }
    }
    let view_ids: BTreeSet<i64> = accessor_ids
        .iter()
        .filter_map(|id| accessors.get(id).and_then(|a| a.buffer_view))
        .collect();
    let buffer_ids: BTreeSet<i64> =
        view_ids.iter().filter_map(|id| views.get(id).map(|v| v.0)).collect();
    let texture_ids: BTreeSet<i64> = material_ids
        .iter()
        .filter_map(|id| materials.get(id).and_then(|m| m.texture))
        .collect();
    let image_ids: BTreeSet<i64> = texture_ids
        .iter()
        .filter_map(|id| textures.get(id).copied().flatten())
        .collect();

    // Surrogate key → fresh array index, one side map per table.
    let index_of = |ids: &BTreeSet<i64>| -> HashMap<i64, usize> {
        ids.iter().enumerate().map(|(index, &id)| (id, index)).collect()
    };
    let mesh_index = index_of(&mesh_ids);
    let accessor_index = index_of(&accessor_ids);
    let view_index = index_of(&view_ids);
    let buffer_index = index_of(&buffer_ids);
    let material_index = index_of(&material_ids);
    let texture_index = index_of(&texture_ids);
    let image_index = index_of(&image_ids);

    let mut manifest = Gltf::new(concat!("svf2gltf v", env!("CARGO_PKG_VERSION")));

    for id in &buffer_ids {
        let (uri, byte_length) = &buffers[id];
        manifest.buffers.push(schema::Buffer {
            uri: uri.clone(),
            byte_length: *byte_length as u64,
        });
    }
    for id in &view_ids {
        let (buffer, byte_offset, byte_length) = views[id];
        manifest.buffer_views.push(schema::BufferView {
            buffer: buffer_index[&buffer],
            byte_offset: byte_offset as u64,
            byte_length: byte_length as u64,
        });
    }
    for id in &accessor_ids {
        let row = &accessors[id];
        manifest.accessors.push(schema::Accessor {
            buffer_view: row.buffer_view.map(|v| view_index[&v]),
            component_type: row.component_type,
            count: row.count as usize,
            type_name: row.type_name.clone(),
            min: row.min.as_deref().map(serde_json::from_str).transpose()?,
            max: row.max.as_deref().map(serde_json::from_str).transpose()?,
        });
    }
    for id in &image_ids {
        manifest.images.push(schema::Image { uri: images[id].clone() });
    }
    for id in &texture_ids {
        manifest.textures.push(schema::Texture {
            source: textures[id].map(|image| image_index[&image]),
        });
    }
    for id in &material_ids {
        let row = &materials[id];
        manifest.materials.push(schema::Material {
            name: None,
            alpha_mode: row.alpha_mode.clone(),
            pbr_metallic_roughness: Some(schema::PbrMetallicRoughness {
                base_color_factor: row
                    .base_color
                    .map(|c| [c[0] as f32, c[1] as f32, c[2] as f32, c[3] as f32]),
                metallic_factor: row.metallic.map(|v| v as f32),
                roughness_factor: row.roughness.map(|v| v as f32),
                base_color_texture: row.texture.map(|t| schema::TextureInfo {
                    index: texture_index[&t],
                    tex_coord: Some(0),
                }),
            }),
        });
    }
    for id in &mesh_ids {
        let row = &meshes[id];
        let mut primitive = schema::Primitive {
            indices: row.indices.map(|a| accessor_index[&a]),
            material: row.material.map(|m| material_index[&m]),
            mode: row.mode,
            ..Default::default()
        };
        let mut attr = |name: &str, id: Option<i64>| {
            if let Some(id) = id {
                primitive.attributes.insert(name.to_string(), accessor_index[&id]);
            }
        };
        attr("POSITION", row.position);
        attr("NORMAL", row.normal);
        attr("TEXCOORD_0", row.uv);
        attr("COLOR_0", row.color);
        manifest.meshes.push(schema::Mesh { primitives: vec![primitive] });
    }

    let mut scene_nodes = Vec::new();
    for row in &nodes {
        let index = manifest.nodes.len();
        manifest.nodes.push(schema::Node {
            name: row.dbid.map(|dbid| dbid.to_string()),
            mesh: row.mesh.map(|m| mesh_index[&m]),
            matrix: row.matrix.as_deref().map(serde_json::from_str).transpose()?,
            translation: row.translation.map(|t| t.map(|v| v as f32)),
            rotation: row.rotation.map(|r| r.map(|v| v as f32)),
            scale: row.scale.map(|s| s.map(|v| v as f32)),
            children: Vec::new(),
        });
        scene_nodes.push(index);
    }
    manifest.scenes.push(schema::Scene { name: None, nodes: scene_nodes });
    manifest.scene = Some(0);

    Ok(manifest)
}
