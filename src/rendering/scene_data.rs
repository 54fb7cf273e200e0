use glam::{Mat4, Vec4};

/// Per-frame constants shared by every draw, rewritten by the CPU at the top
/// of each frame into a persistently mapped buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneData {
    /// Combined camera view-projection matrix
    pub view_projection: Mat4,
    /// Combined light view-projection matrix, used by the shadow pass and by
    /// the main pass when sampling the shadow map
    pub light_view_projection: Mat4,
    /// Camera position in world space, w unused
    pub camera_position: Vec4,
    /// Direction towards the light in world space, w unused
    pub light_direction: Vec4,
}

impl Default for SceneData {
    fn default() -> Self {
        Self {
            view_projection: Mat4::IDENTITY,
            light_view_projection: Mat4::IDENTITY,
            camera_position: Vec4::ZERO,
            light_direction: Vec4::new(0., 1., 0., 0.),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoffset::offset_of;

    #[test]
    pub fn layout_matches_shader_expectations() {
        assert_eq!(std::mem::size_of::<SceneData>(), 160);
        assert_eq!(offset_of!(SceneData, view_projection), 0);
        assert_eq!(offset_of!(SceneData, light_view_projection), 64);
        assert_eq!(offset_of!(SceneData, camera_position), 128);
        assert_eq!(offset_of!(SceneData, light_direction), 144);
    }
}
