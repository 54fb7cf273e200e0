use crate::{
    contexts::VulkanContext,
    rendering::{descriptors::SHADOW_MAP_BINDING, image::Image},
    Result, DEPTH_FORMAT, SHADOW_MAP_SIZE,
};
use ash::vk;
use std::slice::from_ref as slice_from_ref;

/// The depth-only shadow render target. Each frame it is written by the
/// shadow pass, then sampled by the main pass; the transitions between the
/// two uses are explicit barriers recorded here.
pub struct ShadowMap {
    /// The depth image the shadow pass renders into
    pub image: Image,
    /// The depth-only render pass
    pub render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    sampler: vk::Sampler,
}

impl ShadowMap {
    /// Create the shadow map at its fixed resolution.
    pub fn new(vulkan_context: &VulkanContext) -> Result<Self> {
        let device = &vulkan_context.device;
        let extent = vk::Extent2D {
            width: SHADOW_MAP_SIZE,
            height: SHADOW_MAP_SIZE,
        };
        let image = vulkan_context.create_image(
            DEPTH_FORMAT,
            &extent,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        )?;

        let attachment = vk::AttachmentDescription::builder()
            .format(DEPTH_FORMAT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .build();

        let depth_reference = vk::AttachmentReference::builder()
            .attachment(0)
            .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .depth_stencil_attachment(&depth_reference);

        let render_pass = unsafe {
            device.create_render_pass(
                &vk::RenderPassCreateInfo::builder()
                    .attachments(slice_from_ref(&attachment))
                    .subpasses(slice_from_ref(&subpass)),
                None,
            )
        }?;

        let framebuffer = unsafe {
            device.create_framebuffer(
                &vk::FramebufferCreateInfo::builder()
                    .render_pass(render_pass)
                    .attachments(slice_from_ref(&image.view))
                    .width(SHADOW_MAP_SIZE)
                    .height(SHADOW_MAP_SIZE)
                    .layers(1),
                None,
            )
        }?;

        let sampler = unsafe {
            device.create_sampler(
                &vk::SamplerCreateInfo::builder()
                    .mag_filter(vk::Filter::LINEAR)
                    .min_filter(vk::Filter::LINEAR)
                    .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
                    .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
                    .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
                    .border_color(vk::BorderColor::FLOAT_OPAQUE_WHITE),
                None,
            )
        }?;

        Ok(Self {
            image,
            render_pass,
            framebuffer,
            sampler,
        })
    }

    /// Transition the map into the writable state and begin the depth-only
    /// pass. The previous frame's contents are discarded; the pass clears.
    pub fn record_begin(&self, device: &ash::Device, command_buffer: vk::CommandBuffer) {
        let subresource_range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::DEPTH,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let to_depth_write = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::SHADER_READ)
            .dst_access_mask(
                vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            )
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image.handle)
            .subresource_range(subresource_range);

        let clear_value = vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.,
                stencil: 0,
            },
        };
        let render_area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: self.image.extent,
        };
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(self.framebuffer)
            .render_area(render_area)
            .clear_values(slice_from_ref(&clear_value));

        unsafe {
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                slice_from_ref(&to_depth_write),
            );
            device.cmd_begin_render_pass(command_buffer, &begin_info, vk::SubpassContents::INLINE);
        }
    }

    /// End the depth-only pass and transition the map into the sampleable
    /// state for the main pass.
    pub fn record_end(&self, device: &ash::Device, command_buffer: vk::CommandBuffer) {
        let to_shader_read = vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .old_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image.handle)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::DEPTH,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe {
            device.cmd_end_render_pass(command_buffer);
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                slice_from_ref(&to_shader_read),
            );
        }
    }

    /// Point the shadow-map binding of `set` at the depth image.
    pub fn update_descriptor_set(&self, device: &ash::Device, set: vk::DescriptorSet) {
        let image_info = vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.image.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(SHADOW_MAP_BINDING)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(slice_from_ref(&image_info));
        unsafe { device.update_descriptor_sets(slice_from_ref(&write), &[]) };
    }

    /// safety: no in-flight work may reference the shadow map.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        device.destroy_sampler(self.sampler, None);
        device.destroy_framebuffer(self.framebuffer, None);
        device.destroy_render_pass(self.render_pass, None);
        self.image.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ignore = "requires a Vulkan driver"]
    pub fn shadow_map_has_fixed_resolution() {
        let vulkan_context = VulkanContext::testing().unwrap();
        let mut shadow_map = ShadowMap::new(&vulkan_context).unwrap();
        assert_eq!(shadow_map.image.extent.width, SHADOW_MAP_SIZE);
        assert_eq!(shadow_map.image.extent.height, SHADOW_MAP_SIZE);
        assert_eq!(shadow_map.image.format, DEPTH_FORMAT);
        unsafe { shadow_map.destroy(&vulkan_context.device) };
    }
}
