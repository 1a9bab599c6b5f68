//! # svf2gltf
//!
//! Converter for the SVF/SVF2 binary scene-graph containers into glTF 2.0.
//!
//! Both container generations decode into a shared intermediate scene
//! contract, so the writer is format-agnostic: SVF views go through the
//! generic pack-file container and its typed entry decoders, SVF2 views
//! through flat fragment/geometry/hash-list layouts with delta-coded
//! indices and packed normals.
//!
//! ## Modules
//!
//! - [`util`] - Basic types (byte cursor, errors, content hashing)
//! - [`svf`] - First-generation container: pack files and entry decoders
//! - [`otg`] - Second-generation flat layouts and hash lists
//! - [`scene`] - Format-agnostic scene model and the per-format adapters
//! - [`gltf`] - Manifest schema, streaming writer, SQLite codec
//! - [`resolve`] - Asset resolution, cancellation, batch back-pressure
//!
//! ## Example
//!
//! ```ignore
//! use svf2gltf::prelude::*;
//!
//! let resolver = FileResolver::new("input/");
//! let cancel = CancellationToken::new();
//! let scene = SvfScene::load(&resolver, &assets, &cancel)?;
//!
//! let mut writer = GltfWriter::new("output/", WriterOptions::default())?;
//! writer.write(&scene)?;
//! writer.close()?;
//! ```

pub mod gltf;
pub mod otg;
pub mod resolve;
pub mod scene;
pub mod svf;
pub mod util;

// Re-export commonly used types
pub use gltf::{GltfWriter, WriterOptions};
pub use scene::{OtgScene, SceneView, SvfScene};
pub use util::{Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::gltf::{Gltf, GltfWriter, NodeFilter, WriterHooks, WriterOptions};
    pub use crate::resolve::{CancellationToken, FileResolver, Resolver};
    pub use crate::scene::{
        Geometry, Node, OtgScene, PhysicalMaterial, SceneView, SvfScene, Transform,
    };
    pub use crate::scene::otg::OtgAssets;
    pub use crate::scene::svf::SvfAssets;
    pub use crate::util::{ByteCursor, Error, Result};
}
