use ash::vk;

/// A 2D image together with its view and backing memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    /// The underlying image handle
    pub handle: vk::Image,
    /// A 2D view over the whole image
    pub view: vk::ImageView,
    /// The memory backing the image
    pub device_memory: vk::DeviceMemory,
    /// Width and height in texels
    pub extent: vk::Extent2D,
    /// The usage the image was created with
    pub usage: vk::ImageUsageFlags,
    /// The texel format
    pub format: vk::Format,
}

impl Image {
    /// safety: the image must not be referenced by any in-flight work.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_image_view(self.view, None);
        device.destroy_image(self.handle, None);
        device.free_memory(self.device_memory, None);
    }
}
