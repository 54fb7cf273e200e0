use crate::{
    contexts::VulkanContext,
    rendering::{descriptors::TextureTable, image::Image, upload::Uploader},
    Result, YarraError, TEXTURE_FORMAT,
};
use ash::vk;

/// Slot of the 1x1 white texture substituted for missing colour-like maps.
pub const DEFAULT_TEXTURE_SLOT: u32 = 0;
/// Slot of the 1x1 flat normal map substituted for missing normal maps.
pub const DEFAULT_NORMAL_SLOT: u32 = 1;

/// A sampled texture and the table slot it lives in.
pub struct Texture {
    /// The image backing the texture
    pub image: Image,
    /// The texture's slot in the bindless table
    pub slot: u32,
}

/// Owns every sampled texture in the scene, including the two procedural
/// defaults created up front so that slots [`DEFAULT_TEXTURE_SLOT`] and
/// [`DEFAULT_NORMAL_SLOT`] always resolve.
pub struct TextureStore {
    sampler: vk::Sampler,
    textures: Vec<Texture>,
}

impl TextureStore {
    /// Create the store, the shared sampler and the default textures.
    pub fn new(
        vulkan_context: &VulkanContext,
        uploader: &mut Uploader,
        table: &mut TextureTable,
    ) -> Result<Self> {
        let sampler = vulkan_context.create_texture_sampler()?;
        let mut store = Self {
            sampler,
            textures: Vec::new(),
        };

        let white = [255, 255, 255, 255];
        let flat_normal = [128, 128, 255, 255];
        let slot = store.add_pixels(vulkan_context, uploader, table, &white, 1, 1)?;
        debug_assert_eq!(slot, DEFAULT_TEXTURE_SLOT);
        let slot = store.add_pixels(vulkan_context, uploader, table, &flat_normal, 1, 1)?;
        debug_assert_eq!(slot, DEFAULT_NORMAL_SLOT);

        Ok(store)
    }

    /// Decode an encoded PNG or JPEG, upload it and bind it into the table.
    /// Returns the texture's slot.
    pub fn add_encoded(
        &mut self,
        vulkan_context: &VulkanContext,
        uploader: &mut Uploader,
        table: &mut TextureTable,
        bytes: &[u8],
    ) -> Result<u32> {
        let (pixels, width, height) = decode_pixels(bytes)?;
        self.add_pixels(vulkan_context, uploader, table, &pixels, width, height)
    }

    /// Upload tightly packed RGBA texels and bind them into the table.
    /// Returns the texture's slot.
    pub fn add_pixels(
        &mut self,
        vulkan_context: &VulkanContext,
        uploader: &mut Uploader,
        table: &mut TextureTable,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<u32> {
        let extent = vk::Extent2D { width, height };
        let image = vulkan_context.create_image(
            TEXTURE_FORMAT,
            &extent,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        )?;
        uploader.upload_image(vulkan_context, &image, pixels)?;
        let slot = table.bind(&vulkan_context.device, self.sampler, image.view)?;
        self.textures.push(Texture { image, slot });
        Ok(slot)
    }

    /// The number of textures in the store, defaults included.
    pub fn len(&self) -> u32 {
        self.textures.len() as u32
    }

    /// A store always holds the default textures.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// safety: no in-flight work may reference any texture in the store.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        device.destroy_sampler(self.sampler, None);
        for texture in self.textures.drain(..) {
            texture.image.destroy(device);
        }
    }
}

/// Decode an encoded image into tightly packed RGBA texels.
fn decode_pixels(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let decoded = image::load_from_memory(bytes).map_err(|e| {
        println!("[YARRA_TEXTURE] Unable to decode image: {e:?}");
        YarraError::InvalidFormatError
    })?;
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok((rgba.into_raw(), width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    pub fn decode_expands_rgb_to_rgba() {
        let rgb = image::RgbImage::from_pixel(2, 3, image::Rgb([10, 20, 30]));
        let mut encoded = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(rgb)
            .write_to(&mut encoded, image::ImageOutputFormat::Png)
            .unwrap();

        let (pixels, width, height) = decode_pixels(encoded.get_ref()).unwrap();
        assert_eq!((width, height), (2, 3));
        assert_eq!(pixels.len(), 2 * 3 * 4);
        assert_eq!(&pixels[0..4], &[10, 20, 30, 255]);
    }

    #[test]
    pub fn decode_rejects_garbage() {
        assert!(decode_pixels(&[0xde, 0xad, 0xbe, 0xef]).is_err());
    }
}
