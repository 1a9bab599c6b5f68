//! Decoders for the second-generation SVF2/OTG format family.
//!
//! Unlike SVF there is no shared container: fragments, geometry and the
//! hash lists are independent flat binary layouts, and materials are
//! standalone JSON assets addressed by content hash.

pub mod fragments;
pub mod geometry;
pub mod hashes;
pub mod materials;

pub use fragments::{parse_fragments, OtgFragment};
pub use geometry::{decode_normal, GeometryKind, OtgGeometry};
pub use hashes::parse_hashes;
pub use materials::parse_material;
