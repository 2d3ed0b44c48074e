//! glTF import into the typed scene graph.

use crate::assets::AssetError;
use crate::scene::{Aabb, MaterialParams, MeshRenderable, ModelAsset, SceneNode};
use glam::{Mat4, Vec3};
use std::path::Path;

pub fn load_gltf_model(path: &Path) -> Result<ModelAsset, AssetError> {
    let (document, buffers, _images) =
        ::gltf::import(path).map_err(|source| AssetError::ParseGltf {
            path: path.display().to_string(),
            source,
        })?;

    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .ok_or_else(|| AssetError::EmptyGltf {
            path: path.display().to_string(),
        })?;

    let children = scene
        .nodes()
        .map(|node| convert_node(&node, &buffers))
        .collect();
    let root_name = scene.name().unwrap_or("scene").to_string();
    let root = SceneNode::group(&root_name, Mat4::IDENTITY, children);

    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("model")
        .to_string();
    let mut model = ModelAsset::new(name, root);
    let renderables = model.renderable_count();
    if renderables == 0 {
        return Err(AssetError::EmptyGltf {
            path: path.display().to_string(),
        });
    }
    log::info!(
        "Loaded glTF {} ({} renderables, bounds {:?}..{:?})",
        path.display(),
        renderables,
        model.bounds.min,
        model.bounds.max
    );
    Ok(model)
}

fn convert_node(node: &::gltf::Node<'_>, buffers: &[::gltf::buffer::Data]) -> SceneNode {
    let local = Mat4::from_cols_array_2d(&node.transform().matrix());
    let name = node
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("node_{}", node.index()));
    let renderables = node
        .mesh()
        .map(|mesh| {
            mesh.primitives()
                .filter_map(|primitive| convert_primitive(&primitive, buffers))
                .collect()
        })
        .unwrap_or_default();
    let children = node
        .children()
        .map(|child| convert_node(&child, buffers))
        .collect();
    SceneNode {
        name,
        local,
        renderables,
        children,
    }
}

fn convert_primitive(
    primitive: &::gltf::Primitive<'_>,
    buffers: &[::gltf::buffer::Data],
) -> Option<MeshRenderable> {
    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| data.0.as_slice()));
    let bounds = reader.read_positions()?.fold(None, |acc: Option<Aabb>, position| {
        let point = Vec3::from(position);
        Some(match acc {
            Some(bounds) => bounds.union(&Aabb::new(point, point)),
            None => Aabb::new(point, point),
        })
    })?;

    let material = primitive.material();
    let pbr = material.pbr_metallic_roughness();
    Some(MeshRenderable {
        material_name: material.name().unwrap_or("default").to_string(),
        material: MaterialParams {
            base_color_rgba: pbr.base_color_factor(),
            metallic: pbr.metallic_factor(),
            roughness: pbr.roughness_factor(),
            emissive_rgb: material.emissive_factor(),
            environment_intensity: 1.0,
        },
        local_bounds: bounds,
        cast_shadow: true,
        buffers: None,
    })
}

#[cfg(test)]
mod tests {
    use super::load_gltf_model;
    use crate::assets::AssetError;
    use glam::Vec3;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    const TRIANGLE: &str = r#"{
  "asset": { "version": "2.0" },
  "scene": 0,
  "scenes": [{ "nodes": [0] }],
  "nodes": [{ "name": "tri", "mesh": 0, "translation": [0.0, 1.0, 0.0] }],
  "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 }, "material": 0 }] }],
  "materials": [{
    "name": "Gold",
    "pbrMetallicRoughness": { "baseColorFactor": [1.0, 0.8, 0.3, 1.0], "metallicFactor": 1.0, "roughnessFactor": 0.25 }
  }],
  "accessors": [{
    "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
    "min": [0.0, 0.0, 0.0], "max": [1.0, 2.0, 0.0]
  }],
  "bufferViews": [{ "buffer": 0, "byteLength": 36 }],
  "buffers": [{
    "byteLength": 36,
    "uri": "data:application/octet-stream;base64,AAAAAAAAAAAAAAAAAACAPwAAAAAAAAAAAAAAAAAAAEAAAAAA"
  }]
}"#;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "lookdev_{}_{}_{}.gltf",
            name,
            std::process::id(),
            nonce
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn loads_node_transform_and_material() {
        let path = temp_file("triangle", TRIANGLE);
        let mut model = load_gltf_model(&path).unwrap();
        assert_eq!(model.bounds.min, Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(model.bounds.max, Vec3::new(1.0, 3.0, 0.0));
        let (material, cast_shadow) = model.primary_surface().unwrap();
        assert!(cast_shadow);
        assert_eq!(material.metallic, 1.0);
        assert_eq!(material.roughness, 0.25);
        assert_eq!(material.base_color_rgba, [1.0, 0.8, 0.3, 1.0]);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn invalid_document_is_a_parse_error() {
        let path = temp_file("broken", "{ not gltf");
        assert!(matches!(
            load_gltf_model(&path),
            Err(AssetError::ParseGltf { .. })
        ));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn document_without_meshes_is_empty() {
        let path = temp_file(
            "empty",
            r#"{ "asset": { "version": "2.0" }, "scenes": [{ "nodes": [] }] }"#,
        );
        assert!(matches!(
            load_gltf_model(&path),
            Err(AssetError::EmptyGltf { .. })
        ));
        let _ = std::fs::remove_file(path);
    }
}
