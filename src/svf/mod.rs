//! Decoders for the first-generation SVF container family.
//!
//! All SVF assets share the generic pack-file container ([`pack`]); the
//! sibling modules decode its entry streams into typed records.

pub mod fragments;
pub mod geometries;
pub mod materials;
pub mod meshes;
pub mod pack;

pub use fragments::{parse_fragments, Fragment};
pub use geometries::{parse_geometries, GeometryMetadata};
pub use materials::{parse_materials, PhongMaterial};
pub use meshes::{parse_mesh_pack, LineSet, Mesh, PointSet, Primitive};
pub use pack::{EntryType, PackFile};
