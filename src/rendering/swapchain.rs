use crate::{contexts::VulkanContext, rendering::image::Image, Result, COLOR_FORMAT, DEPTH_FORMAT};
use ash::vk;
use std::slice::from_ref as slice_from_ref;

/// The images the renderer draws into, handed in by the caller. The renderer
/// never owns a window-system swapchain; it only needs the image handles and
/// their shared resolution.
#[derive(Debug, Clone)]
pub struct SwapchainInfo {
    /// The images in the swapchain
    pub images: Vec<vk::Image>,
    /// The resolution of the swapchain
    pub resolution: vk::Extent2D,
}

/// Views, the shared depth buffer and one framebuffer per swapchain image.
pub struct Swapchain {
    /// The renderable area, spanning the whole swapchain resolution
    pub render_area: vk::Rect2D,
    /// One framebuffer per swapchain image
    pub framebuffers: Vec<vk::Framebuffer>,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    depth_image: Image,
}

impl Swapchain {
    /// Build views and framebuffers over the caller's images for the given
    /// render pass.
    pub fn new(
        vulkan_context: &VulkanContext,
        swapchain_info: &SwapchainInfo,
        render_pass: vk::RenderPass,
    ) -> Result<Self> {
        let device = &vulkan_context.device;
        let resolution = swapchain_info.resolution;

        let depth_image = vulkan_context.create_image(
            DEPTH_FORMAT,
            &resolution,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        )?;

        let mut views = Vec::with_capacity(swapchain_info.images.len());
        let mut framebuffers = Vec::with_capacity(swapchain_info.images.len());
        for image in &swapchain_info.images {
            let view = vulkan_context.create_image_view(image, COLOR_FORMAT)?;
            let attachments = [view, depth_image.view];
            let framebuffer = unsafe {
                device.create_framebuffer(
                    &vk::FramebufferCreateInfo::builder()
                        .render_pass(render_pass)
                        .attachments(&attachments)
                        .width(resolution.width)
                        .height(resolution.height)
                        .layers(1),
                    None,
                )
            }?;
            views.push(view);
            framebuffers.push(framebuffer);
        }

        println!(
            "[YARRA_SWAPCHAIN] Built {} framebuffers at {}x{}",
            framebuffers.len(),
            resolution.width,
            resolution.height
        );

        Ok(Self {
            render_area: vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: resolution,
            },
            framebuffers,
            images: swapchain_info.images.clone(),
            views,
            depth_image,
        })
    }

    /// Transition image `index` into the renderable state. Contents are
    /// discarded; the main pass clears.
    pub fn record_acquire_barrier(
        &self,
        device: &ash::Device,
        command_buffer: vk::CommandBuffer,
        index: usize,
    ) {
        let barrier = color_barrier(
            self.images[index],
            vk::AccessFlags::empty(),
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        unsafe {
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                slice_from_ref(&barrier),
            );
        }
    }

    /// Transition image `index` into the presentable state.
    pub fn record_present_barrier(
        &self,
        device: &ash::Device,
        command_buffer: vk::CommandBuffer,
        index: usize,
    ) {
        let barrier = color_barrier(
            self.images[index],
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            vk::AccessFlags::empty(),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        unsafe {
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                slice_from_ref(&barrier),
            );
        }
    }

    /// safety: no in-flight work may reference the swapchain.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for framebuffer in self.framebuffers.drain(..) {
            device.destroy_framebuffer(framebuffer, None);
        }
        for view in self.views.drain(..) {
            device.destroy_image_view(view, None);
        }
        self.depth_image.destroy(device);
    }
}

fn color_barrier(
    image: vk::Image,
    src_access_mask: vk::AccessFlags,
    dst_access_mask: vk::AccessFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> vk::ImageMemoryBarrier {
    vk::ImageMemoryBarrier::builder()
        .src_access_mask(src_access_mask)
        .dst_access_mask(dst_access_mask)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .build()
}
