use crate::{contexts::VulkanContext, rendering::memory::allocate_memory, Result, YarraError};
use ash::vk;
use std::{fmt::Debug, marker::PhantomData, ptr::NonNull, slice};

/// The set of states a device-local buffer can be in. Every transition between
/// states is an explicit barrier recorded by the code that performs it - there
/// is no implicit promotion or decay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// Freshly created, or reset; the only state uploads are accepted in
    CopyDest,
    /// Readable as a vertex buffer or as shader constants
    VertexAndConstantBuffer,
    /// Readable from the fragment stage
    PixelShaderResource,
    /// Readable from any stage
    GenericRead,
}

impl ResourceState {
    /// The accesses that must complete (source) or be made visible
    /// (destination) when a barrier crosses this state.
    pub const fn access_mask(self) -> vk::AccessFlags {
        match self {
            ResourceState::CopyDest => vk::AccessFlags::TRANSFER_WRITE,
            ResourceState::VertexAndConstantBuffer => vk::AccessFlags::from_raw(
                vk::AccessFlags::VERTEX_ATTRIBUTE_READ.as_raw()
                    | vk::AccessFlags::INDEX_READ.as_raw()
                    | vk::AccessFlags::UNIFORM_READ.as_raw(),
            ),
            ResourceState::PixelShaderResource => vk::AccessFlags::SHADER_READ,
            ResourceState::GenericRead => vk::AccessFlags::MEMORY_READ,
        }
    }

    /// The pipeline stages that participate in a barrier crossing this state.
    pub const fn stage_mask(self) -> vk::PipelineStageFlags {
        match self {
            ResourceState::CopyDest => vk::PipelineStageFlags::TRANSFER,
            ResourceState::VertexAndConstantBuffer => vk::PipelineStageFlags::from_raw(
                vk::PipelineStageFlags::VERTEX_INPUT.as_raw()
                    | vk::PipelineStageFlags::VERTEX_SHADER.as_raw(),
            ),
            ResourceState::PixelShaderResource => vk::PipelineStageFlags::FRAGMENT_SHADER,
            ResourceState::GenericRead => vk::PipelineStageFlags::ALL_COMMANDS,
        }
    }
}

/// A device-local buffer that can only be written through the staging path.
/// Created in [`ResourceState::CopyDest`]; the uploader moves it to its final
/// state once its contents have been copied in.
pub struct DeviceBuffer {
    /// The buffer handle
    pub buffer: vk::Buffer,
    /// The memory backing the buffer
    pub device_memory: vk::DeviceMemory,
    /// Size of the buffer in bytes
    pub size: vk::DeviceSize,
    /// The buffer's address in the device address space
    pub device_address: vk::DeviceAddress,
    /// The state the buffer is currently in
    pub state: ResourceState,
}

impl DeviceBuffer {
    /// Create a device-local buffer of `size` bytes in the
    /// [`ResourceState::CopyDest`] state.
    pub fn new(
        vulkan_context: &VulkanContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self> {
        let device = &vulkan_context.device;
        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(
                usage
                    | vk::BufferUsageFlags::TRANSFER_DST
                    | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&create_info, None) }?;

        let memory_requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let device_memory = unsafe {
            allocate_memory(
                vulkan_context,
                memory_requirements,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                vk::MemoryAllocateFlags::DEVICE_ADDRESS,
            )
        };
        unsafe { device.bind_buffer_memory(buffer, device_memory, 0) }?;

        let device_address = unsafe {
            device.get_buffer_device_address(&vk::BufferDeviceAddressInfo::builder().buffer(buffer))
        };

        Ok(Self {
            buffer,
            device_memory,
            size,
            device_address,
            state: ResourceState::CopyDest,
        })
    }

    /// Fail unless the buffer is in `expected`. The uploader calls this before
    /// recording a copy so that a double-upload is caught on the CPU, not as a
    /// GPU hazard.
    pub fn assert_state(&self, expected: ResourceState) -> Result<()> {
        if self.state != expected {
            return Err(YarraError::InvalidResourceState {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    /// safety: the buffer must not be referenced by any in-flight work.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_buffer(self.buffer, None);
        device.free_memory(self.device_memory, None);
    }
}

impl Debug for DeviceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("size", &self.size)
            .field("device_address", &self.device_address)
            .field("state", &self.state)
            .finish()
    }
}

/// A host-visible, host-coherent buffer that stays persistently mapped for its
/// whole lifetime. Used for per-frame constants that the CPU rewrites every
/// frame; bulk data goes through [`DeviceBuffer`] and the uploader instead.
pub struct HostBuffer<T: Sized> {
    /// The buffer handle
    pub buffer: vk::Buffer,
    /// The memory backing the buffer
    pub device_memory: vk::DeviceMemory,
    /// Pointer to the mapped memory
    pub memory_address: NonNull<T>,
    /// The number of items currently in the buffer
    pub len: usize,
    /// The maximum number of items the buffer can hold
    pub max_len: usize,
    _phantom: PhantomData<T>,
}

impl<T: Sized> HostBuffer<T> {
    /// Create a persistently mapped buffer with room for `max_len` items.
    pub fn new(
        vulkan_context: &VulkanContext,
        usage: vk::BufferUsageFlags,
        max_len: usize,
    ) -> Result<Self> {
        let device = &vulkan_context.device;
        let size = (std::mem::size_of::<T>() * max_len) as vk::DeviceSize;
        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&create_info, None) }?;

        let memory_requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let flags = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let device_memory =
            unsafe { allocate_memory(vulkan_context, memory_requirements, flags, vk::MemoryAllocateFlags::empty()) };
        unsafe { device.bind_buffer_memory(buffer, device_memory, 0) }?;

        let memory_address = unsafe {
            device.map_memory(
                device_memory,
                0,
                vk::WHOLE_SIZE,
                vk::MemoryMapFlags::empty(),
            )
        }?;
        let memory_address =
            NonNull::new(memory_address as *mut T).ok_or(YarraError::MemoryMapFailed)?;

        Ok(Self {
            buffer,
            device_memory,
            memory_address,
            len: 0,
            max_len,
            _phantom: PhantomData,
        })
    }

    /// Replace the contents of the buffer with `data`.
    ///
    /// safety: any frame currently reading the buffer must have completed.
    pub unsafe fn overwrite(&mut self, data: &[T]) {
        assert!(data.len() <= self.max_len);
        std::ptr::copy_nonoverlapping(data.as_ptr(), self.memory_address.as_ptr(), data.len());
        self.len = data.len();
    }

    /// Append an item, returning its index.
    ///
    /// safety: any frame currently reading the buffer must have completed.
    pub unsafe fn push(&mut self, item: &T) -> usize {
        assert!(self.len < self.max_len);
        let index = self.len;
        std::ptr::copy_nonoverlapping(item as *const T, self.memory_address.as_ptr().add(index), 1);
        self.len += 1;
        index
    }

    /// View the current contents of the buffer.
    ///
    /// safety: no GPU work may be writing the buffer.
    pub unsafe fn as_slice(&self) -> &[T] {
        slice::from_raw_parts(self.memory_address.as_ptr(), self.len)
    }

    /// safety: the buffer must not be referenced by any in-flight work.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.unmap_memory(self.device_memory);
        device.destroy_buffer(self.buffer, None);
        device.free_memory(self.device_memory, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn state_check_catches_double_upload() {
        let buffer = DeviceBuffer {
            buffer: vk::Buffer::null(),
            device_memory: vk::DeviceMemory::null(),
            size: 64,
            device_address: 0,
            state: ResourceState::VertexAndConstantBuffer,
        };

        assert!(buffer.assert_state(ResourceState::VertexAndConstantBuffer).is_ok());
        match buffer.assert_state(ResourceState::CopyDest) {
            Err(YarraError::InvalidResourceState { expected, actual }) => {
                assert_eq!(expected, ResourceState::CopyDest);
                assert_eq!(actual, ResourceState::VertexAndConstantBuffer);
            }
            other => panic!("expected InvalidResourceState, got {other:?}"),
        }
    }

    #[test]
    pub fn vertex_state_covers_index_reads() {
        let access = ResourceState::VertexAndConstantBuffer.access_mask();
        assert!(access.contains(vk::AccessFlags::VERTEX_ATTRIBUTE_READ));
        assert!(access.contains(vk::AccessFlags::INDEX_READ));
        assert!(access.contains(vk::AccessFlags::UNIFORM_READ));
    }
}
