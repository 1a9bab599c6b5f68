//! SVF2 material decoder.
//!
//! Same gzip + SimplePhong contract as the SVF decoder, but each asset is a
//! single material document whose root record sits directly at
//! `materials["0"]` instead of going through a `userassets` indirection.
//! Texture connections still resolve inside the same `materials` map.

use serde_json::Value;
use tracing::warn;

use crate::svf::materials::{parse_simple_phong, PhongMaterial};
use crate::util::compression::maybe_gunzip;
use crate::util::{Error, Result};

/// Decode one SVF2 material asset.
///
/// Returns `None` for definitions other than `SimplePhong`.
pub fn parse_material(bytes: Vec<u8>) -> Result<Option<PhongMaterial>> {
    let data = maybe_gunzip(bytes)?;
    let json: Value = serde_json::from_slice(&data)?;
    let records = json
        .get("materials")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::invalid("material JSON lacks a materials map"))?;
    let Some(root) = records.get("0") else {
        return Err(Error::invalid("material JSON lacks a root record"));
    };
    match root.get("definition").and_then(Value::as_str) {
        Some("SimplePhong") => Ok(Some(parse_simple_phong(root, records))),
        other => {
            warn!(definition = ?other, "unsupported material definition");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_material() {
        let doc = r#"{ "materials": {
            "0": {
                "definition": "SimplePhong",
                "properties": {
                    "colors": {
                        "generic_diffuse": { "values": [{ "r": 0.2, "g": 0.4, "b": 0.6, "a": 1.0 }] }
                    },
                    "scalars": { "generic_glossiness": { "values": [60.0] } }
                },
                "textures": { "generic_diffuse": { "connections": ["1"] } }
            },
            "1": {
                "definition": "UnifiedBitmap",
                "properties": {
                    "uris": { "unifiedbitmap_Bitmap": { "values": ["brick.jpg"] } }
                }
            }
        } }"#;
        let material = parse_material(doc.as_bytes().to_vec()).unwrap().unwrap();
        assert_eq!(material.diffuse, [0.2, 0.4, 0.6, 1.0]);
        assert_eq!(material.glossiness, 60.0);
        assert_eq!(material.maps.diffuse.as_ref().unwrap().uri, "brick.jpg");
    }

    #[test]
    fn test_non_phong_is_none() {
        let doc = r#"{ "materials": { "0": { "definition": "PrismMetal" } } }"#;
        assert!(parse_material(doc.as_bytes().to_vec()).unwrap().is_none());
    }

    #[test]
    fn test_missing_root_is_error() {
        let doc = r#"{ "materials": { "7": { "definition": "SimplePhong" } } }"#;
        assert!(parse_material(doc.as_bytes().to_vec()).is_err());
    }
}
