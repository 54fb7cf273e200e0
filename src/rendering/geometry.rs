use crate::{
    contexts::VulkanContext,
    rendering::{
        buffer::{DeviceBuffer, ResourceState},
        upload::Uploader,
    },
    Result,
};
use ash::vk;
use id_arena::{Arena, Id};

/// Handle to a buffer owned by the [`GeometryRegistry`].
pub type BufferId = Id<DeviceBuffer>;

/// Owns every device-local geometry buffer in the scene. Buffers are created
/// in the copy-destination state, filled through the uploader and left
/// readable as vertex and constant data; they are never written again.
#[derive(Default)]
pub struct GeometryRegistry {
    buffers: Arena<DeviceBuffer>,
}

impl GeometryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a device-local buffer for `data`, record its upload and return
    /// a handle to it. The buffer lands in
    /// [`ResourceState::VertexAndConstantBuffer`] once the uploader flushes.
    pub fn register_buffer<T: Copy>(
        &mut self,
        vulkan_context: &VulkanContext,
        uploader: &mut Uploader,
        data: &[T],
    ) -> Result<BufferId> {
        let size = std::mem::size_of_val(data) as vk::DeviceSize;
        let mut buffer = DeviceBuffer::new(
            vulkan_context,
            size,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::INDEX_BUFFER,
        )?;
        uploader.upload_buffer(
            vulkan_context,
            &mut buffer,
            data,
            ResourceState::VertexAndConstantBuffer,
        )?;
        Ok(self.buffers.alloc(buffer))
    }

    /// Look up a registered buffer.
    pub fn get(&self, id: BufferId) -> &DeviceBuffer {
        &self.buffers[id]
    }

    /// safety: no in-flight work may reference any registered buffer.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for (_, buffer) in self.buffers.iter() {
            buffer.destroy(device);
        }
    }
}

/// A typed window into a registered buffer, describing one vertex attribute
/// stream. The offset bakes in both the source view's offset and the
/// accessor's own offset; the stride always comes from the accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexStreamView {
    /// The buffer the stream lives in
    pub buffer: BufferId,
    /// Offset of the first element from the start of the buffer, in bytes
    pub byte_offset: vk::DeviceSize,
    /// Distance between consecutive elements, in bytes
    pub byte_stride: vk::DeviceSize,
    /// Number of elements in the stream
    pub count: u32,
}

impl VertexStreamView {
    /// Build a stream view from flattened accessor data.
    pub fn new(
        buffer: BufferId,
        view_byte_offset: vk::DeviceSize,
        accessor_byte_offset: vk::DeviceSize,
        byte_stride: vk::DeviceSize,
        count: u32,
    ) -> Self {
        Self {
            buffer,
            byte_offset: view_byte_offset + accessor_byte_offset,
            byte_stride,
            count,
        }
    }

    /// Total extent of the stream in bytes.
    pub fn byte_length(&self) -> vk::DeviceSize {
        self.byte_stride * self.count as vk::DeviceSize
    }
}

/// A window into a registered buffer holding 16-bit indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStreamView {
    /// The buffer the indices live in
    pub buffer: BufferId,
    /// Offset of the first index from the start of the buffer, in bytes
    pub byte_offset: vk::DeviceSize,
    /// Number of indices
    pub count: u32,
}

impl IndexStreamView {
    /// The index format is always 16 bit.
    pub const INDEX_TYPE: vk::IndexType = vk::IndexType::UINT16;

    /// Build an index view from flattened accessor data.
    pub fn new(
        buffer: BufferId,
        view_byte_offset: vk::DeviceSize,
        accessor_byte_offset: vk::DeviceSize,
        count: u32,
    ) -> Self {
        Self {
            buffer,
            byte_offset: view_byte_offset + accessor_byte_offset,
            count,
        }
    }

    /// Total extent of the indices in bytes.
    pub fn byte_length(&self) -> vk::DeviceSize {
        2 * self.count as vk::DeviceSize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    pub fn vertex_view_offsets_compose() {
        let view = VertexStreamView::new(dummy_buffer_id(), 1024, 12, 32, 100);
        assert_eq!(view.byte_offset, 1036);
        assert_eq!(view.byte_stride, 32);
        assert_eq!(view.byte_length(), 3200);
    }

    #[test]
    pub fn index_view_is_sixteen_bit() {
        let view = IndexStreamView::new(dummy_buffer_id(), 256, 0, 36);
        assert_eq!(view.byte_offset, 256);
        assert_eq!(view.byte_length(), 72);
        assert_eq!(IndexStreamView::INDEX_TYPE, vk::IndexType::UINT16);
    }
}
