//! glTF 2.0 output: the JSON schema model, the streaming writer, and the
//! relational manifest codec.

pub mod schema;
pub mod sqlite;
pub mod writer;

pub use schema::Gltf;
pub use sqlite::{deserialize_manifest, serialize_manifest, NodeFilter, PropertyLookup};
pub use writer::{
    DefaultHooks, GltfWriter, WriterHooks, WriterOptions, DEFAULT_MAX_BUFFER_SIZE,
};
