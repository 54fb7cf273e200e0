use crate::{
    rendering::{
        geometry::{IndexStreamView, VertexStreamView},
        texture::{DEFAULT_NORMAL_SLOT, DEFAULT_TEXTURE_SLOT},
    },
    Result, YarraError,
};
use glam::Mat4;

/// The canonical texture maps a material can reference, in the order their
/// slots appear in [`Primitive::texture_slots`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    /// Base colour map
    BaseColor = 0,
    /// Tangent-space normal map
    Normal = 1,
    /// Metallic-roughness map
    MetallicRoughness = 2,
    /// Ambient occlusion map
    Occlusion = 3,
    /// Emissive map
    Emissive = 4,
}

/// Number of canonical texture maps.
pub const TEXTURE_KIND_COUNT: usize = 5;

/// One drawable piece of a mesh: its vertex streams, its indices and the
/// fully resolved material and texture slots the shaders need. Everything a
/// draw call touches is pinned down at load time; recording a draw never
/// consults the scene file again.
#[derive(Debug, Clone, PartialEq)]
pub struct Primitive {
    /// World transform of the node the primitive belongs to
    pub transform: Mat4,
    /// Positions, three floats per vertex
    pub position_view: VertexStreamView,
    /// Normals, three floats per vertex
    pub normal_view: VertexStreamView,
    /// Texture coordinates, two floats per vertex
    pub uv_view: VertexStreamView,
    /// Tangents, four floats per vertex, when the mesh provides them
    pub tangent_view: Option<VertexStreamView>,
    /// 16-bit indices
    pub index_view: IndexStreamView,
    /// Resolved index into the material store
    pub material_index: u32,
    /// Resolved texture table slots, one per [`TextureKind`]
    pub texture_slots: [u32; TEXTURE_KIND_COUNT],
    /// Whether the primitive's material blends
    pub transparent: bool,
}

/// Resolve a primitive's texture references into table slots. `references`
/// holds per-kind scene texture indices; `scene_slots` maps a scene texture
/// index to its table slot. A missing reference is expected and collapses to
/// the defaults: the flat normal map for [`TextureKind::Normal`], the white
/// texture for everything else. A reference past the end of `scene_slots` is
/// corrupt input and fatal.
pub fn resolve_texture_slots(
    references: [Option<u32>; TEXTURE_KIND_COUNT],
    scene_slots: &[u32],
) -> Result<[u32; TEXTURE_KIND_COUNT]> {
    let mut slots = [DEFAULT_TEXTURE_SLOT; TEXTURE_KIND_COUNT];
    for (kind, slot) in slots.iter_mut().enumerate() {
        *slot = match references[kind] {
            Some(index) => *scene_slots.get(index as usize).ok_or(
                YarraError::IndexOutOfBounds {
                    kind: "image",
                    index: index as usize,
                    len: scene_slots.len(),
                },
            )?,
            None if kind == TextureKind::Normal as usize => DEFAULT_NORMAL_SLOT,
            None => DEFAULT_TEXTURE_SLOT,
        };
    }
    Ok(slots)
}

/// The order primitives are drawn in: every opaque primitive strictly before
/// every transparent one, preserving submission order within each group.
pub fn draw_order(primitives: &[Primitive]) -> Vec<usize> {
    let opaque = primitives
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.transparent)
        .map(|(i, _)| i);
    let transparent = primitives
        .iter()
        .enumerate()
        .filter(|(_, p)| p.transparent)
        .map(|(i, _)| i);
    opaque.chain(transparent).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::{
        buffer::{DeviceBuffer, ResourceState},
        geometry::BufferId,
    };
    use ash::vk;
    use id_arena::Arena;

    fn dummy_buffer_id() -> BufferId {
        let mut arena: Arena<DeviceBuffer> = Arena::new();
        arena.alloc(DeviceBuffer {
            buffer: vk::Buffer::null(),
            device_memory: vk::DeviceMemory::null(),
            size: 0,
            device_address: 0,
            state: ResourceState::CopyDest,
        })
    }

    fn dummy_primitive(transparent: bool) -> Primitive {
        let buffer = dummy_buffer_id();
        let stream = VertexStreamView::new(buffer, 0, 0, 12, 3);
        Primitive {
            transform: Mat4::IDENTITY,
            position_view: stream,
            normal_view: stream,
            uv_view: stream,
            tangent_view: None,
            index_view: IndexStreamView::new(buffer, 0, 0, 3),
            material_index: 0,
            texture_slots: [DEFAULT_TEXTURE_SLOT; TEXTURE_KIND_COUNT],
            transparent,
        }
    }

    #[test]
    pub fn missing_references_get_per_kind_defaults() {
        let slots = resolve_texture_slots([None, None, None, None, None], &[]).unwrap();
        assert_eq!(slots[TextureKind::BaseColor as usize], DEFAULT_TEXTURE_SLOT);
        assert_eq!(slots[TextureKind::Normal as usize], DEFAULT_NORMAL_SLOT);
        assert_eq!(slots[TextureKind::Emissive as usize], DEFAULT_TEXTURE_SLOT);
    }

    #[test]
    pub fn present_references_map_through_scene_slots() {
        // Scene texture 0 landed in table slot 7, texture 1 in slot 3.
        let scene_slots = [7, 3];
        let slots =
            resolve_texture_slots([Some(1), Some(0), None, Some(0), None], &scene_slots).unwrap();
        assert_eq!(slots[TextureKind::BaseColor as usize], 3);
        assert_eq!(slots[TextureKind::Normal as usize], 7);
        assert_eq!(slots[TextureKind::MetallicRoughness as usize], DEFAULT_TEXTURE_SLOT);
        assert_eq!(slots[TextureKind::Occlusion as usize], 7);
    }

    #[test]
    pub fn dangling_references_are_fatal() {
        // One scene texture in slot 5; a reference to image 9 names nothing.
        match resolve_texture_slots([Some(9), None, None, None, None], &[5]) {
            Err(YarraError::IndexOutOfBounds { kind, index, len }) => {
                assert_eq!(kind, "image");
                assert_eq!(index, 9);
                assert_eq!(len, 1);
            }
            other => panic!("expected IndexOutOfBounds, got {other:?}"),
        }
    }

    #[test]
    pub fn opaque_draws_before_transparent() {
        let primitives = vec![
            dummy_primitive(true),
            dummy_primitive(false),
            dummy_primitive(true),
            dummy_primitive(false),
            dummy_primitive(false),
        ];
        assert_eq!(draw_order(&primitives), vec![1, 3, 4, 0, 2]);
    }

    #[test]
    pub fn all_opaque_preserves_submission_order() {
        let primitives = vec![
            dummy_primitive(false),
            dummy_primitive(false),
            dummy_primitive(false),
        ];
        assert_eq!(draw_order(&primitives), vec![0, 1, 2]);
    }
}
