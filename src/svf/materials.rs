//! SVF material decoder.
//!
//! Materials arrive as a (possibly gzipped) JSON document. Each group wraps
//! a small set of material records; the root record is selected through the
//! group's `userassets` list and must use the `SimplePhong` definition —
//! anything else decodes to `None` for that slot and processing continues.

use serde_json::{Map, Value};
use tracing::warn;

use crate::util::compression::maybe_gunzip;
use crate::util::{Error, Result};

/// Texture reference with UV scaling.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureMap {
    /// Source-relative image URI.
    pub uri: String,
    /// U/V scale factors.
    pub scale: [f32; 2],
}

/// Texture slots recognized on a Phong material.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MaterialMaps {
    pub diffuse: Option<TextureMap>,
    pub specular: Option<TextureMap>,
    pub bump: Option<TextureMap>,
    pub alpha: Option<TextureMap>,
}

/// Decoded SimplePhong material record.
#[derive(Clone, Debug, PartialEq)]
pub struct PhongMaterial {
    /// RGBA colors, components in 0..1.
    pub diffuse: [f32; 4],
    pub specular: [f32; 4],
    pub ambient: [f32; 4],
    pub emissive: [f32; 4],
    pub glossiness: f32,
    pub reflectivity: f32,
    /// 1 − generic_transparency.
    pub opacity: f32,
    pub metal: bool,
    pub maps: MaterialMaps,
}

/// Decode an SVF material list. Slot order follows the ascending numeric
/// keys of the `materials` map; unsupported definitions yield `None`.
pub fn parse_materials(bytes: Vec<u8>) -> Result<Vec<Option<PhongMaterial>>> {
    let data = maybe_gunzip(bytes)?;
    let json: Value = serde_json::from_slice(&data)?;
    let groups = json
        .get("materials")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::invalid("material JSON lacks a materials map"))?;

    let mut keys: Vec<(u64, &String)> = groups
        .keys()
        .filter_map(|k| k.parse::<u64>().ok().map(|n| (n, k)))
        .collect();
    keys.sort_unstable();

    let mut materials = Vec::with_capacity(keys.len());
    for (_, key) in keys {
        materials.push(parse_material_group(&groups[key]));
    }
    Ok(materials)
}

fn parse_material_group(group: &Value) -> Option<PhongMaterial> {
    let records = group.get("materials")?.as_object()?;
    let root_key = group.get("userassets")?.get(0)?.as_str()?;
    let root = records.get(root_key)?;
    match root.get("definition").and_then(Value::as_str) {
        Some("SimplePhong") => Some(parse_simple_phong(root, records)),
        other => {
            warn!(definition = ?other, "unsupported material definition");
            None
        }
    }
}

/// Extract a SimplePhong record. `siblings` is the containing material map
/// used to resolve texture connections.
pub(crate) fn parse_simple_phong(material: &Value, siblings: &Map<String, Value>) -> PhongMaterial {
    PhongMaterial {
        diffuse: color_property(material, "generic_diffuse", [0.0, 0.0, 0.0, 1.0]),
        specular: color_property(material, "generic_specular", [0.0, 0.0, 0.0, 1.0]),
        ambient: color_property(material, "generic_ambient", [0.0, 0.0, 0.0, 1.0]),
        emissive: color_property(material, "generic_emissive", [0.0, 0.0, 0.0, 1.0]),
        glossiness: scalar_property(material, "generic_glossiness", 30.0),
        reflectivity: scalar_property(material, "generic_reflectivity_at_0deg", 0.0),
        opacity: 1.0 - scalar_property(material, "generic_transparency", 0.0),
        metal: boolean_property(material, "generic_is_metal", false),
        maps: MaterialMaps {
            diffuse: texture_property(material, siblings, "generic_diffuse"),
            specular: texture_property(material, siblings, "generic_specular"),
            bump: texture_property(material, siblings, "generic_bump"),
            alpha: texture_property(material, siblings, "generic_alpha"),
        },
    }
}

fn color_property(material: &Value, name: &str, default: [f32; 4]) -> [f32; 4] {
    let Some(value) = material
        .pointer(&format!("/properties/colors/{}/values/0", name))
        .and_then(Value::as_object)
    else {
        return default;
    };
    let channel = |key: &str, fallback: f32| {
        value.get(key).and_then(Value::as_f64).map(|v| v as f32).unwrap_or(fallback)
    };
    [channel("r", 0.0), channel("g", 0.0), channel("b", 0.0), channel("a", 1.0)]
}

fn scalar_property(material: &Value, name: &str, default: f32) -> f32 {
    material
        .pointer(&format!("/properties/scalars/{}/values/0", name))
        .and_then(Value::as_f64)
        .map(|v| v as f32)
        .unwrap_or(default)
}

fn boolean_property(material: &Value, name: &str, default: bool) -> bool {
    material
        .pointer(&format!("/properties/booleans/{}", name))
        .and_then(Value::as_bool)
        .unwrap_or(default)
}

/// Follow a texture connection into its sibling record and read the bitmap
/// URI plus optional UV scale.
fn texture_property(
    material: &Value,
    siblings: &Map<String, Value>,
    prop: &str,
) -> Option<TextureMap> {
    let connection = material
        .pointer(&format!("/textures/{}/connections/0", prop))?
        .as_str()?;
    let texture = siblings.get(connection)?;
    let uri = texture
        .pointer("/properties/uris/unifiedbitmap_Bitmap/values/0")?
        .as_str()?
        .to_string();
    if uri.is_empty() {
        return None;
    }
    let scale = [
        scalar_property(texture, "texture_UScale", 1.0),
        scalar_property(texture, "texture_VScale", 1.0),
    ];
    Some(TextureMap { uri, scale })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const PHONG_GROUP: &str = r#"{
        "userassets": ["0"],
        "materials": {
            "0": {
                "definition": "SimplePhong",
                "properties": {
                    "colors": {
                        "generic_diffuse": { "values": [{ "r": 1.0, "g": 0.5, "b": 0.25, "a": 1.0 }] }
                    },
                    "scalars": {
                        "generic_glossiness": { "values": [128.0] },
                        "generic_transparency": { "values": [0.25] }
                    },
                    "booleans": { "generic_is_metal": true }
                },
                "textures": {
                    "generic_diffuse": { "connections": ["1"] }
                }
            },
            "1": {
                "definition": "UnifiedBitmap",
                "properties": {
                    "uris": { "unifiedbitmap_Bitmap": { "values": ["Textures\\wood.png"] } },
                    "scalars": {
                        "texture_UScale": { "values": [2.0] },
                        "texture_VScale": { "values": [3.0] }
                    }
                }
            }
        }
    }"#;

    fn material_doc() -> String {
        format!(
            r#"{{ "materials": {{ "0": {}, "1": {{ "userassets": ["0"], "materials": {{ "0": {{ "definition": "PrismWood" }} }} }} }} }}"#,
            PHONG_GROUP
        )
    }

    #[test]
    fn test_parse_simple_phong() {
        let materials = parse_materials(material_doc().into_bytes()).unwrap();
        assert_eq!(materials.len(), 2);

        let phong = materials[0].as_ref().expect("SimplePhong should decode");
        assert_eq!(phong.diffuse, [1.0, 0.5, 0.25, 1.0]);
        assert_eq!(phong.glossiness, 128.0);
        assert_eq!(phong.opacity, 0.75);
        assert!(phong.metal);

        let map = phong.maps.diffuse.as_ref().expect("diffuse texture");
        assert_eq!(map.uri, "Textures\\wood.png");
        assert_eq!(map.scale, [2.0, 3.0]);
    }

    #[test]
    fn test_unsupported_definition_is_none() {
        let materials = parse_materials(material_doc().into_bytes()).unwrap();
        assert!(materials[1].is_none());
    }

    #[test]
    fn test_defaults_when_properties_missing() {
        let doc = r#"{ "materials": { "0": {
            "userassets": ["0"],
            "materials": { "0": { "definition": "SimplePhong" } }
        } } }"#;
        let materials = parse_materials(doc.as_bytes().to_vec()).unwrap();
        let phong = materials[0].as_ref().unwrap();
        assert_eq!(phong.diffuse, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(phong.glossiness, 30.0);
        assert_eq!(phong.reflectivity, 0.0);
        assert_eq!(phong.opacity, 1.0);
        assert!(!phong.metal);
        assert_eq!(phong.maps, MaterialMaps::default());
    }

    #[test]
    fn test_gzipped_payload() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(material_doc().as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let materials = parse_materials(compressed).unwrap();
        assert!(materials[0].is_some());
    }
}
