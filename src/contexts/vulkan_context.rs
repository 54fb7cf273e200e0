use crate::{
    rendering::{image::Image, memory::allocate_memory},
    yarra_error::YarraError,
    Result, DEPTH_FORMAT,
};
use ash::{vk, Device, Entry, Instance};
use std::{ffi::CString, fmt::Debug};

/// Everything the renderer needs from the Vulkan runtime: one logical device,
/// one direct queue, a command pool and the device constants queried once at
/// startup. Created once and passed by reference into every component - there
/// is no ambient global state in this crate.
pub struct VulkanContext {
    /// A handle to the Vulkan entrypoint
    pub entry: Entry,
    /// A handle to the Vulkan instance
    pub instance: Instance,
    /// The physical device in use
    pub physical_device: vk::PhysicalDevice,
    /// The logical device
    pub device: Device,
    /// Command pool used for load-time transfer work
    pub command_pool: vk::CommandPool,
    /// The queue family in use
    pub queue_family_index: u32,
    /// The single direct queue all work is submitted to
    pub graphics_queue: vk::Queue,
    /// Device constants queried once at creation
    pub limits: DeviceConstants,
}

/// Device-reported constants the renderer depends on, queried exactly once.
#[derive(Debug, Clone, Copy)]
pub struct DeviceConstants {
    /// Required alignment for constant-buffer records, typically 256 bytes
    pub min_uniform_buffer_offset_alignment: vk::DeviceSize,
}

impl VulkanContext {
    /// Create a headless context: no surface, no swapchain extension. Suitable
    /// for offscreen rendering and for driving the renderer under test.
    pub fn new() -> Result<Self> {
        Self::new_with_extensions(&[], &[])
    }

    /// Create a context with the given instance and device extensions enabled,
    /// for callers that present to a window system.
    pub fn new_with_extensions(
        instance_extensions: &[CString],
        device_extensions: &[CString],
    ) -> Result<Self> {
        println!("[YARRA_VULKAN] Initialising Vulkan..");
        let app_name = CString::new("Yarra").map_err(anyhow::Error::new)?;
        let entry = unsafe { Entry::load().map_err(anyhow::Error::new)? };

        let extension_names = instance_extensions
            .iter()
            .map(|e| e.as_ptr())
            .collect::<Vec<_>>();

        // 1.3 for vkCmdBindVertexBuffers2: vertex strides come from accessors
        // at draw time, not from the pipeline.
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .api_version(vk::API_VERSION_1_3);
        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }?;

        let physical_device = unsafe {
            *instance
                .enumerate_physical_devices()?
                .first()
                .ok_or(YarraError::EmptyListError)?
        };

        let (device, graphics_queue, queue_family_index) =
            create_vulkan_device(device_extensions, &instance, physical_device)?;

        let command_pool = unsafe {
            device.create_command_pool(
                &vk::CommandPoolCreateInfo::builder()
                    .queue_family_index(queue_family_index)
                    .flags(
                        vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER
                            | vk::CommandPoolCreateFlags::TRANSIENT,
                    ),
                None,
            )
        }?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let limits = DeviceConstants {
            min_uniform_buffer_offset_alignment: properties
                .limits
                .min_uniform_buffer_offset_alignment,
        };

        println!("[YARRA_VULKAN] ..done");

        Ok(Self {
            entry,
            instance,
            physical_device,
            device,
            command_pool,
            queue_family_index,
            graphics_queue,
            limits,
        })
    }

    /// Context for driving the renderer in tests. Requires a Vulkan driver.
    pub fn testing() -> Result<Self> {
        Self::new()
    }

    /// Create a device-local image together with its view and memory.
    pub fn create_image(
        &self,
        format: vk::Format,
        extent: &vk::Extent2D,
        usage: vk::ImageUsageFlags,
    ) -> Result<Image> {
        let create_info = vk::ImageCreateInfo::builder()
            .format(format)
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let handle = unsafe { self.device.create_image(&create_info, None) }?;

        let memory_requirements = unsafe { self.device.get_image_memory_requirements(handle) };
        let device_memory = unsafe {
            allocate_memory(
                self,
                memory_requirements,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                vk::MemoryAllocateFlags::empty(),
            )
        };
        unsafe { self.device.bind_image_memory(handle, device_memory, 0) }?;

        let view = self.create_image_view(&handle, format)?;

        Ok(Image {
            handle,
            view,
            device_memory,
            extent: *extent,
            usage,
            format,
        })
    }

    /// Create a 2D view over an image, picking the aspect from the format.
    pub fn create_image_view(&self, image: &vk::Image, format: vk::Format) -> Result<vk::ImageView> {
        let aspect_mask = get_aspect_mask(format);
        let create_info = vk::ImageViewCreateInfo::builder()
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image(*image);
        unsafe { self.device.create_image_view(&create_info, None) }.map_err(Into::into)
    }

    /// Create the shared linear sampler used for all textures.
    pub fn create_texture_sampler(&self) -> Result<vk::Sampler> {
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR);

        unsafe { self.device.create_sampler(&create_info, None) }.map_err(Into::into)
    }
}

fn create_vulkan_device(
    device_extensions: &[CString],
    instance: &Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<(Device, vk::Queue, u32)> {
    let extension_names = device_extensions
        .iter()
        .map(|e| e.as_ptr())
        .collect::<Vec<_>>();

    let queue_family_index = unsafe {
        instance
            .get_physical_device_queue_family_properties(physical_device)
            .into_iter()
            .enumerate()
            .find_map(|(queue_family_index, info)| {
                if info.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                    Some(queue_family_index as u32)
                } else {
                    None
                }
            })
            .ok_or(YarraError::NoGraphicsQueue)?
    };

    let queue_priorities = [1.0];
    let graphics_queue_create_info = vk::DeviceQueueCreateInfo::builder()
        .queue_priorities(&queue_priorities)
        .queue_family_index(queue_family_index)
        .build();
    let queue_create_infos = [graphics_queue_create_info];

    // The whole synchronisation design hangs off timeline semaphores, and the
    // material table hands out raw device addresses.
    let mut vulkan_12_features = vk::PhysicalDeviceVulkan12Features::builder()
        .timeline_semaphore(true)
        .buffer_device_address(true)
        .runtime_descriptor_array(true)
        .descriptor_binding_partially_bound(true)
        .descriptor_binding_variable_descriptor_count(true)
        .descriptor_binding_sampled_image_update_after_bind(true);

    let device_create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .push_next(&mut vulkan_12_features);

    let device =
        unsafe { instance.create_device(physical_device, &device_create_info, None) }?;
    let graphics_queue = unsafe { device.get_device_queue(queue_family_index, 0) };

    Ok((device, graphics_queue, queue_family_index))
}

fn get_aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    if format == DEPTH_FORMAT {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

impl Debug for VulkanContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanContext")
            .field("physical_device", &self.physical_device)
            .field("queue_family_index", &self.queue_family_index)
            .finish()
    }
}
