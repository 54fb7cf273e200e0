//! Turns binary glTF into the flat description the render context loads:
//! raw buffer blobs, encoded images, material records and per-primitive
//! accessor windows. Nothing here touches the GPU.

use crate::{
    rendering::{
        material::MaterialRecord,
        primitive::{TextureKind, TEXTURE_KIND_COUNT},
    },
    Result, YarraError,
};
use ash::vk;
use glam::Mat4;
use gltf::accessor::DataType;

/// A scene ready to be loaded: everything the render context needs, with all
/// glTF indirection already flattened away.
#[derive(Debug, Default)]
pub struct SceneSource {
    /// Raw buffer blobs, uploaded verbatim
    pub buffers: Vec<Vec<u8>>,
    /// Encoded PNG or JPEG bytes, one entry per glTF image
    pub images: Vec<Vec<u8>>,
    /// Material factors and texture references
    pub materials: Vec<MaterialSource>,
    /// Drawable primitives with world transforms applied
    pub primitives: Vec<PrimitiveSource>,
}

/// One material before upload.
#[derive(Debug, Clone)]
pub struct MaterialSource {
    /// The record as the shaders will see it
    pub record: MaterialRecord,
    /// Whether the material blends
    pub transparent: bool,
    /// Referenced image index per canonical texture map
    pub texture_images: [Option<u32>; TEXTURE_KIND_COUNT],
}

/// A window into a source buffer, flattened from a glTF accessor and its
/// buffer view.
#[derive(Debug, Clone, Copy)]
pub struct AccessorSource {
    /// Index into [`SceneSource::buffers`]
    pub buffer: u32,
    /// The buffer view's offset into the buffer
    pub view_byte_offset: vk::DeviceSize,
    /// The accessor's offset into the view
    pub accessor_byte_offset: vk::DeviceSize,
    /// Element stride; the view's stride when it has one, the accessor's
    /// natural element size otherwise
    pub byte_stride: vk::DeviceSize,
    /// Number of elements
    pub count: u32,
}

/// One drawable primitive before upload.
#[derive(Debug, Clone)]
pub struct PrimitiveSource {
    /// World transform of the node the primitive belongs to
    pub transform: Mat4,
    /// Position stream
    pub position: AccessorSource,
    /// Normal stream
    pub normal: AccessorSource,
    /// Texture coordinate stream
    pub uv: AccessorSource,
    /// Tangent stream, when the mesh provides one
    pub tangent: Option<AccessorSource>,
    /// 16-bit index stream
    pub indices: AccessorSource,
    /// Index into [`SceneSource::materials`]
    pub material: Option<u32>,
}

/// Import a scene from binary glTF bytes.
pub fn load_scene_from_glb(bytes: &[u8]) -> Result<SceneSource> {
    let gltf = gltf::Gltf::from_slice(bytes).map_err(anyhow::Error::new)?;
    let document = &gltf.document;
    let blob = gltf.blob.as_deref();

    let mut buffers = Vec::new();
    for buffer in document.buffers() {
        match buffer.source() {
            gltf::buffer::Source::Bin => {
                // The declared length is not validated against the binary
                // chunk, so a truncated file must fail here, not panic.
                let blob = blob.ok_or(YarraError::InvalidFormatError)?;
                let bytes = blob
                    .get(..buffer.length())
                    .ok_or(YarraError::InvalidFormatError)?;
                buffers.push(bytes.to_vec());
            }
            gltf::buffer::Source::Uri(uri) => {
                println!("[YARRA_IMPORT] External buffer {uri} is not supported");
                return Err(YarraError::InvalidFormatError);
            }
        }
    }

    let mut images = Vec::new();
    for image in document.images() {
        match image.source() {
            gltf::image::Source::View { view, .. } => {
                let data = buffers
                    .get(view.buffer().index())
                    .ok_or(YarraError::InvalidFormatError)?;
                let end = view
                    .offset()
                    .checked_add(view.length())
                    .ok_or(YarraError::InvalidFormatError)?;
                let bytes = data
                    .get(view.offset()..end)
                    .ok_or(YarraError::InvalidFormatError)?;
                images.push(bytes.to_vec());
            }
            gltf::image::Source::Uri { uri, .. } => {
                println!("[YARRA_IMPORT] External image {uri} is not supported");
                return Err(YarraError::InvalidFormatError);
            }
        }
    }

    let materials = document.materials().map(import_material).collect();

    let mut primitives = Vec::new();
    if let Some(scene) = document.default_scene().or_else(|| document.scenes().next()) {
        for node in scene.nodes() {
            import_node(&node, Mat4::IDENTITY, &mut primitives);
        }
    }

    println!(
        "[YARRA_IMPORT] Imported {} buffers, {} images, {} primitives",
        buffers.len(),
        images.len(),
        primitives.len()
    );

    Ok(SceneSource {
        buffers,
        images,
        materials,
        primitives,
    })
}

/// Import a scene from a `.glb` file on disk.
pub fn load_scene_from_glb_file(path: &std::path::Path) -> Result<SceneSource> {
    let bytes = std::fs::read(path)?;
    load_scene_from_glb(&bytes)
}

fn import_material(material: gltf::Material) -> MaterialSource {
    let pbr = material.pbr_metallic_roughness();
    let record = MaterialRecord::new(
        pbr.base_color_factor(),
        pbr.roughness_factor(),
        pbr.metallic_factor(),
        material.emissive_factor(),
    );

    let mut texture_images = [None; TEXTURE_KIND_COUNT];
    texture_images[TextureKind::BaseColor as usize] = pbr
        .base_color_texture()
        .map(|i| i.texture().source().index() as u32);
    texture_images[TextureKind::Normal as usize] = material
        .normal_texture()
        .map(|i| i.texture().source().index() as u32);
    texture_images[TextureKind::MetallicRoughness as usize] = pbr
        .metallic_roughness_texture()
        .map(|i| i.texture().source().index() as u32);
    texture_images[TextureKind::Occlusion as usize] = material
        .occlusion_texture()
        .map(|i| i.texture().source().index() as u32);
    texture_images[TextureKind::Emissive as usize] = material
        .emissive_texture()
        .map(|i| i.texture().source().index() as u32);

    MaterialSource {
        record,
        transparent: material.alpha_mode() == gltf::material::AlphaMode::Blend,
        texture_images,
    }
}

fn import_node(node: &gltf::Node, parent_transform: Mat4, primitives: &mut Vec<PrimitiveSource>) {
    let transform = parent_transform * Mat4::from_cols_array_2d(&node.transform().matrix());

    if let Some(mesh) = node.mesh() {
        for primitive in mesh.primitives() {
            match import_primitive(&primitive, transform) {
                Some(primitive) => primitives.push(primitive),
                None => {
                    let name = mesh.name().unwrap_or("unnamed");
                    println!("[YARRA_IMPORT] Skipping unsupported primitive of mesh {name}");
                }
            }
        }
    }

    for child in node.children() {
        import_node(&child, transform, primitives);
    }
}

fn import_primitive(primitive: &gltf::Primitive, transform: Mat4) -> Option<PrimitiveSource> {
    if primitive.mode() != gltf::mesh::Mode::Triangles {
        return None;
    }

    let position = flatten_accessor(&primitive.get(&gltf::Semantic::Positions)?)?;
    let normal = flatten_accessor(&primitive.get(&gltf::Semantic::Normals)?)?;
    let uv = flatten_accessor(&primitive.get(&gltf::Semantic::TexCoords(0))?)?;
    let tangent = primitive
        .get(&gltf::Semantic::Tangents)
        .and_then(|a| flatten_accessor(&a));

    let index_accessor = primitive.indices()?;
    if index_accessor.data_type() != DataType::U16 {
        return None;
    }
    let indices = flatten_accessor(&index_accessor)?;

    Some(PrimitiveSource {
        transform,
        position,
        normal,
        uv,
        tangent,
        indices,
        material: primitive.material().index().map(|i| i as u32),
    })
}

fn flatten_accessor(accessor: &gltf::Accessor) -> Option<AccessorSource> {
    // Sparse accessors have no view; they never appear in the scenes this
    // renderer targets.
    let view = accessor.view()?;
    Some(AccessorSource {
        buffer: view.buffer().index() as u32,
        view_byte_offset: view.offset() as vk::DeviceSize,
        accessor_byte_offset: accessor.offset() as vk::DeviceSize,
        byte_stride: view
            .stride()
            .unwrap_or_else(|| accessor.size()) as vk::DeviceSize,
        count: accessor.count() as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_glb(json: &str, bin: &[u8]) -> Vec<u8> {
        let mut json = json.as_bytes().to_vec();
        while json.len() % 4 != 0 {
            json.push(b' ');
        }
        let mut bin = bin.to_vec();
        while bin.len() % 4 != 0 {
            bin.push(0);
        }

        let total = 12 + 8 + json.len() + 8 + bin.len();
        let mut glb = Vec::with_capacity(total);
        glb.extend_from_slice(&0x4654_6C67u32.to_le_bytes());
        glb.extend_from_slice(&2u32.to_le_bytes());
        glb.extend_from_slice(&(total as u32).to_le_bytes());
        glb.extend_from_slice(&(json.len() as u32).to_le_bytes());
        glb.extend_from_slice(&0x4E4F_534Au32.to_le_bytes());
        glb.extend_from_slice(&json);
        glb.extend_from_slice(&(bin.len() as u32).to_le_bytes());
        glb.extend_from_slice(&0x004E_4942u32.to_le_bytes());
        glb.extend_from_slice(&bin);
        glb
    }

    fn triangle_glb() -> Vec<u8> {
        // 3 vertices: positions (36 bytes), normals (36), uvs (24),
        // 16-bit indices (6, padded to 8).
        let mut bin = Vec::new();
        for v in [[0f32, 0., 0.], [1., 0., 0.], [0., 1., 0.]] {
            for f in v {
                bin.extend_from_slice(&f.to_le_bytes());
            }
        }
        for _ in 0..3 {
            for f in [0f32, 0., 1.] {
                bin.extend_from_slice(&f.to_le_bytes());
            }
        }
        for uv in [[0f32, 0.], [1., 0.], [0., 1.]] {
            for f in uv {
                bin.extend_from_slice(&f.to_le_bytes());
            }
        }
        for i in [0u16, 1, 2] {
            bin.extend_from_slice(&i.to_le_bytes());
        }

        let json = r#"{
            "asset": {"version": "2.0"},
            "scene": 0,
            "scenes": [{"nodes": [0]}],
            "nodes": [{"mesh": 0}],
            "meshes": [{"primitives": [{
                "attributes": {"POSITION": 0, "NORMAL": 1, "TEXCOORD_0": 2},
                "indices": 3,
                "material": 0
            }]}],
            "materials": [{
                "pbrMetallicRoughness": {
                    "baseColorFactor": [1, 0, 0, 1],
                    "metallicFactor": 0.25,
                    "roughnessFactor": 0.5
                },
                "alphaMode": "BLEND"
            }],
            "buffers": [{"byteLength": 104}],
            "bufferViews": [
                {"buffer": 0, "byteOffset": 0, "byteLength": 36},
                {"buffer": 0, "byteOffset": 36, "byteLength": 36},
                {"buffer": 0, "byteOffset": 72, "byteLength": 24},
                {"buffer": 0, "byteOffset": 96, "byteLength": 6}
            ],
            "accessors": [
                {"bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
                 "min": [0, 0, 0], "max": [1, 1, 0]},
                {"bufferView": 1, "componentType": 5126, "count": 3, "type": "VEC3"},
                {"bufferView": 2, "componentType": 5126, "count": 3, "type": "VEC2"},
                {"bufferView": 3, "componentType": 5123, "count": 3, "type": "SCALAR"}
            ]
        }"#;
        build_glb(json, &bin)
    }

    #[test]
    pub fn imports_a_triangle() {
        let scene = load_scene_from_glb(&triangle_glb()).unwrap();

        assert_eq!(scene.buffers.len(), 1);
        assert_eq!(scene.primitives.len(), 1);
        assert_eq!(scene.materials.len(), 1);

        let primitive = &scene.primitives[0];
        assert_eq!(primitive.transform, Mat4::IDENTITY);
        assert_eq!(primitive.material, Some(0));

        // Strides fall back to the accessors' natural element sizes.
        assert_eq!(primitive.position.view_byte_offset, 0);
        assert_eq!(primitive.position.byte_stride, 12);
        assert_eq!(primitive.normal.view_byte_offset, 36);
        assert_eq!(primitive.uv.byte_stride, 8);
        assert_eq!(primitive.indices.view_byte_offset, 96);
        assert_eq!(primitive.indices.count, 3);
    }

    #[test]
    pub fn imports_material_factors_and_alpha_mode() {
        let scene = load_scene_from_glb(&triangle_glb()).unwrap();
        let material = &scene.materials[0];

        assert!(material.transparent);
        assert_eq!(material.record.base_color, [1., 0., 0., 1.]);
        assert_eq!(material.record.roughness, 0.5);
        assert_eq!(material.record.metallic, 0.25);
        assert_eq!(material.texture_images, [None; TEXTURE_KIND_COUNT]);
    }

    #[test]
    pub fn rejects_garbage() {
        assert!(load_scene_from_glb(&[0, 1, 2, 3]).is_err());
    }

    #[test]
    pub fn rejects_buffer_longer_than_binary_chunk() {
        // The declared byteLength exceeds the 4-byte binary chunk.
        let json = r#"{
            "asset": {"version": "2.0"},
            "buffers": [{"byteLength": 4096}]
        }"#;
        let glb = build_glb(json, &[0, 0, 0, 0]);

        match load_scene_from_glb(&glb) {
            Err(YarraError::InvalidFormatError) => {}
            other => panic!("expected InvalidFormatError, got {other:?}"),
        }
    }
}
