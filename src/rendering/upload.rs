use crate::{
    contexts::VulkanContext,
    rendering::{
        buffer::{DeviceBuffer, ResourceState},
        fence::TimelineFence,
        image::Image,
        memory::allocate_memory,
    },
    Result,
};
use ash::vk;
use std::slice::from_ref as slice_from_ref;

/// Records staging copies into a single command buffer and owns the staging
/// memory until the copies have demonstrably finished. Destination buffers
/// must be in [`ResourceState::CopyDest`]; after the copy the uploader records
/// the barrier into the caller's requested state and updates the tracked state
/// to match.
pub struct Uploader {
    command_buffer: vk::CommandBuffer,
    staging: Vec<(vk::Buffer, vk::DeviceMemory)>,
}

impl Uploader {
    /// Create the uploader and begin its command buffer.
    pub fn new(vulkan_context: &VulkanContext) -> Result<Self> {
        let device = &vulkan_context.device;
        let command_buffer = unsafe {
            device.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::builder()
                    .command_pool(vulkan_context.command_pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1),
            )
        }?[0];

        let mut uploader = Self {
            command_buffer,
            staging: Vec::new(),
        };
        uploader.begin(vulkan_context)?;
        Ok(uploader)
    }

    fn begin(&mut self, vulkan_context: &VulkanContext) -> Result<()> {
        unsafe {
            vulkan_context.device.begin_command_buffer(
                self.command_buffer,
                &vk::CommandBufferBeginInfo::builder()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )
        }?;
        Ok(())
    }

    /// Record a copy of `data` into `dst`, followed by the barrier into
    /// `target`. Nothing reaches the GPU until [`Uploader::flush`].
    pub fn upload_buffer<T: Copy>(
        &mut self,
        vulkan_context: &VulkanContext,
        dst: &mut DeviceBuffer,
        data: &[T],
        target: ResourceState,
    ) -> Result<()> {
        dst.assert_state(ResourceState::CopyDest)?;
        let size = std::mem::size_of_val(data) as vk::DeviceSize;
        if size > dst.size {
            return Err(crate::YarraError::IndexOutOfBounds {
                kind: "upload bytes",
                index: size as usize,
                len: dst.size as usize,
            });
        }

        let device = &vulkan_context.device;
        let (staging_buffer, staging_memory) =
            self.create_staging_buffer(vulkan_context, data.as_ptr() as *const u8, size)?;

        let region = vk::BufferCopy::builder().size(size);
        let barrier = vk::BufferMemoryBarrier::builder()
            .src_access_mask(ResourceState::CopyDest.access_mask())
            .dst_access_mask(target.access_mask())
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(dst.buffer)
            .offset(0)
            .size(vk::WHOLE_SIZE);

        unsafe {
            device.cmd_copy_buffer(
                self.command_buffer,
                staging_buffer,
                dst.buffer,
                slice_from_ref(&region),
            );
            device.cmd_pipeline_barrier(
                self.command_buffer,
                ResourceState::CopyDest.stage_mask(),
                target.stage_mask(),
                vk::DependencyFlags::empty(),
                &[],
                slice_from_ref(&barrier),
                &[],
            );
        }

        dst.state = target;
        Ok(())
    }

    /// Record a copy of tightly packed RGBA texels into `dst`, transitioning
    /// it from UNDEFINED to SHADER_READ_ONLY_OPTIMAL around the copy.
    pub fn upload_image(
        &mut self,
        vulkan_context: &VulkanContext,
        dst: &Image,
        pixels: &[u8],
    ) -> Result<()> {
        let device = &vulkan_context.device;
        let (staging_buffer, _) = self.create_staging_buffer(
            vulkan_context,
            pixels.as_ptr(),
            pixels.len() as vk::DeviceSize,
        )?;

        let subresource_range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };

        let to_transfer = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(dst.handle)
            .subresource_range(subresource_range);

        let region = vk::BufferImageCopy::builder()
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_extent(vk::Extent3D {
                width: dst.extent.width,
                height: dst.extent.height,
                depth: 1,
            });

        let to_shader_read = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(dst.handle)
            .subresource_range(subresource_range);

        unsafe {
            device.cmd_pipeline_barrier(
                self.command_buffer,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                slice_from_ref(&to_transfer),
            );
            device.cmd_copy_buffer_to_image(
                self.command_buffer,
                staging_buffer,
                dst.handle,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                slice_from_ref(&region),
            );
            device.cmd_pipeline_barrier(
                self.command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                slice_from_ref(&to_shader_read),
            );
        }

        Ok(())
    }

    /// Submit everything recorded so far, wait for the fence to pass the
    /// submission's target and only then free the staging memory. Returns the
    /// fence value the submission signalled.
    pub fn flush(
        &mut self,
        vulkan_context: &VulkanContext,
        fence: &mut TimelineFence,
    ) -> Result<u64> {
        let device = &vulkan_context.device;
        unsafe { device.end_command_buffer(self.command_buffer) }?;

        let target = fence.next_target();
        let signal_values = [target];
        let mut timeline_info =
            vk::TimelineSemaphoreSubmitInfo::builder().signal_semaphore_values(&signal_values);
        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(slice_from_ref(&self.command_buffer))
            .signal_semaphores(slice_from_ref(&fence.semaphore))
            .push_next(&mut timeline_info);

        unsafe {
            device.queue_submit(
                vulkan_context.graphics_queue,
                slice_from_ref(&submit_info),
                vk::Fence::null(),
            )
        }?;

        fence.wait_until(device, target)?;

        // Staging memory is only safe to release once the copies are done.
        for (buffer, memory) in self.staging.drain(..) {
            unsafe {
                device.destroy_buffer(buffer, None);
                device.free_memory(memory, None);
            }
        }

        self.begin(vulkan_context)?;
        println!("[YARRA_UPLOAD] Flushed upload batch at fence value {target}");
        Ok(target)
    }

    fn create_staging_buffer(
        &mut self,
        vulkan_context: &VulkanContext,
        data: *const u8,
        size: vk::DeviceSize,
    ) -> Result<(vk::Buffer, vk::DeviceMemory)> {
        let device = &vulkan_context.device;
        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&create_info, None) }?;

        let memory_requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let device_memory = unsafe {
            allocate_memory(
                vulkan_context,
                memory_requirements,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                vk::MemoryAllocateFlags::empty(),
            )
        };

        unsafe {
            device.bind_buffer_memory(buffer, device_memory, 0)?;
            let dst =
                device.map_memory(device_memory, 0, size, vk::MemoryMapFlags::empty())?;
            std::ptr::copy_nonoverlapping(data, dst as *mut u8, size as usize);
            device.unmap_memory(device_memory);
        }

        self.staging.push((buffer, device_memory));
        Ok((buffer, device_memory))
    }

    /// safety: no submission referencing the command buffer may be in flight.
    pub unsafe fn destroy(&mut self, vulkan_context: &VulkanContext) {
        let device = &vulkan_context.device;
        for (buffer, memory) in self.staging.drain(..) {
            device.destroy_buffer(buffer, None);
            device.free_memory(memory, None);
        }
        device.free_command_buffers(
            vulkan_context.command_pool,
            slice_from_ref(&self.command_buffer),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "requires a Vulkan driver"]
    pub fn uploaded_bytes_round_trip() {
        let vulkan_context = VulkanContext::testing().unwrap();
        let device = &vulkan_context.device;
        let mut fence = TimelineFence::new(device).unwrap();
        let mut uploader = Uploader::new(&vulkan_context).unwrap();

        let data: Vec<u8> = (0..100).collect();
        let mut buffer = DeviceBuffer::new(
            &vulkan_context,
            data.len() as _,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC,
        )
        .unwrap();

        uploader
            .upload_buffer(
                &vulkan_context,
                &mut buffer,
                &data,
                ResourceState::VertexAndConstantBuffer,
            )
            .unwrap();
        assert_eq!(buffer.state, ResourceState::VertexAndConstantBuffer);

        // A second upload into the same buffer must be rejected.
        assert!(uploader
            .upload_buffer(
                &vulkan_context,
                &mut buffer,
                &data,
                ResourceState::VertexAndConstantBuffer,
            )
            .is_err());

        let target = uploader.flush(&vulkan_context, &mut fence).unwrap();
        assert!(fence.current_completed(device).unwrap() >= target);

        let read_back = unsafe { read_back(&vulkan_context, &buffer) };
        assert_eq!(read_back, data);

        unsafe {
            buffer.destroy(device);
            uploader.destroy(&vulkan_context);
            fence.destroy(device);
        }
    }

    unsafe fn read_back(vulkan_context: &VulkanContext, src: &DeviceBuffer) -> Vec<u8> {
        let device = &vulkan_context.device;
        let readback = device
            .create_buffer(
                &vk::BufferCreateInfo::builder()
                    .size(src.size)
                    .usage(vk::BufferUsageFlags::TRANSFER_DST)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE),
                None,
            )
            .unwrap();
        let memory_requirements = device.get_buffer_memory_requirements(readback);
        let memory = allocate_memory(
            vulkan_context,
            memory_requirements,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryAllocateFlags::empty(),
        );
        device.bind_buffer_memory(readback, memory, 0).unwrap();

        let command_buffer = device
            .allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::builder()
                    .command_pool(vulkan_context.command_pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1),
            )
            .unwrap()[0];
        device
            .begin_command_buffer(
                command_buffer,
                &vk::CommandBufferBeginInfo::builder()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
            )
            .unwrap();
        let to_transfer_read = vk::BufferMemoryBarrier::builder()
            .src_access_mask(src.state.access_mask())
            .dst_access_mask(vk::AccessFlags::TRANSFER_READ)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(src.buffer)
            .offset(0)
            .size(vk::WHOLE_SIZE);
        device.cmd_pipeline_barrier(
            command_buffer,
            src.state.stage_mask(),
            vk::PipelineStageFlags::TRANSFER,
            vk::DependencyFlags::empty(),
            &[],
            slice_from_ref(&to_transfer_read),
            &[],
        );
        let region = vk::BufferCopy::builder().size(src.size);
        device.cmd_copy_buffer(command_buffer, src.buffer, readback, slice_from_ref(&region));
        device.end_command_buffer(command_buffer).unwrap();

        let submit_info =
            vk::SubmitInfo::builder().command_buffers(slice_from_ref(&command_buffer));
        device
            .queue_submit(
                vulkan_context.graphics_queue,
                slice_from_ref(&submit_info),
                vk::Fence::null(),
            )
            .unwrap();
        device.device_wait_idle().unwrap();

        let mapped = device
            .map_memory(memory, 0, src.size, vk::MemoryMapFlags::empty())
            .unwrap();
        let bytes = std::slice::from_raw_parts(mapped as *const u8, src.size as usize).to_vec();
        device.unmap_memory(memory);

        device.free_command_buffers(vulkan_context.command_pool, slice_from_ref(&command_buffer));
        device.destroy_buffer(readback, None);
        device.free_memory(memory, None);
        bytes
    }
}
