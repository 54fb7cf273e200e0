use crate::{
    contexts::VulkanContext,
    rendering::{
        buffer::{DeviceBuffer, ResourceState},
        descriptors::{BufferTable, MATERIALS_BINDING},
        upload::Uploader,
    },
    Result, YarraError,
};
use ash::vk;
use std::slice::from_ref as slice_from_ref;

/// The material index every unresolvable reference collapses to.
pub const NO_MATERIAL: u32 = 0;

/// One material as the shaders see it. The layout is `repr(C)` and padded to
/// 256 bytes so a record index converts to a device address by plain
/// multiplication, with every address meeting the constant-buffer alignment.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaterialRecord {
    /// RGBA base colour factor
    pub base_color: [f32; 4],
    /// Roughness factor in [0, 1]
    pub roughness: f32,
    /// Metallic factor in [0, 1]
    pub metallic: f32,
    /// RGB emissive factor
    pub emission: [f32; 3],
    _pad: [f32; 55],
}

impl MaterialRecord {
    /// Build a record from the factors a scene file provides.
    pub fn new(base_color: [f32; 4], roughness: f32, metallic: f32, emission: [f32; 3]) -> Self {
        Self {
            base_color,
            roughness,
            metallic,
            emission,
            _pad: [0.; 55],
        }
    }
}

impl Default for MaterialRecord {
    fn default() -> Self {
        Self::new([1., 1., 1., 1.], 1., 0., [0., 0., 0.])
    }
}

/// Resolve a possibly missing material reference against a store of `len`
/// records. An absent reference is expected and collapses to [`NO_MATERIAL`];
/// an index past the end of the store is corrupt input and fatal.
pub fn resolve_material_index(index: Option<u32>, len: u32) -> Result<u32> {
    match index {
        Some(index) if index < len => Ok(index),
        Some(index) => Err(YarraError::IndexOutOfBounds {
            kind: "material",
            index: index as usize,
            len: len as usize,
        }),
        None => Ok(NO_MATERIAL),
    }
}

/// All material records for the scene, uploaded once into a single
/// device-local buffer. Shaders reach individual records either through the
/// storage-buffer binding or through raw device addresses handed out by
/// [`MaterialStore::gpu_address`].
pub struct MaterialStore {
    /// The buffer holding every record
    pub buffer: DeviceBuffer,
    table: BufferTable,
    len: u32,
}

impl MaterialStore {
    /// Upload `records` in one batch. An empty scene still gets a default
    /// record so that index [`NO_MATERIAL`] always resolves.
    pub fn new(
        vulkan_context: &VulkanContext,
        uploader: &mut Uploader,
        records: &[MaterialRecord],
    ) -> Result<Self> {
        let records = if records.is_empty() {
            std::borrow::Cow::Owned(vec![MaterialRecord::default()])
        } else {
            std::borrow::Cow::Borrowed(records)
        };

        let increment = std::mem::size_of::<MaterialRecord>() as vk::DeviceSize;
        let alignment = vulkan_context.limits.min_uniform_buffer_offset_alignment;
        assert!(increment % alignment == 0);

        let size = increment * records.len() as vk::DeviceSize;
        let mut buffer = DeviceBuffer::new(
            vulkan_context,
            size,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::UNIFORM_BUFFER,
        )?;
        uploader.upload_buffer(
            vulkan_context,
            &mut buffer,
            &records[..],
            ResourceState::PixelShaderResource,
        )?;

        let table = BufferTable::new(buffer.device_address, increment, records.len() as u32);
        let len = records.len() as u32;
        println!("[YARRA_MATERIAL] Uploaded {len} material records");

        Ok(Self { buffer, table, len })
    }

    /// The device address of record `index`.
    pub fn gpu_address(&self, index: u32) -> Result<vk::DeviceAddress> {
        self.table.address_of(index)
    }

    /// The number of records in the store.
    pub fn len(&self) -> u32 {
        self.len
    }

    /// A store always holds at least the default record.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Point the storage-buffer binding of `set` at the record buffer.
    pub fn update_descriptor_set(&self, device: &ash::Device, set: vk::DescriptorSet) {
        let buffer_info = vk::DescriptorBufferInfo {
            buffer: self.buffer.buffer,
            offset: 0,
            range: vk::WHOLE_SIZE,
        };
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(MATERIALS_BINDING)
            .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
            .buffer_info(slice_from_ref(&buffer_info));
        unsafe { device.update_descriptor_sets(slice_from_ref(&write), &[]) };
    }

    /// safety: no in-flight work may reference the record buffer.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        self.buffer.destroy(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoffset::offset_of;

    #[test]
    pub fn record_layout_is_stable() {
        assert_eq!(std::mem::size_of::<MaterialRecord>(), 256);
        assert_eq!(offset_of!(MaterialRecord, base_color), 0);
        assert_eq!(offset_of!(MaterialRecord, roughness), 16);
        assert_eq!(offset_of!(MaterialRecord, metallic), 20);
        assert_eq!(offset_of!(MaterialRecord, emission), 24);
    }

    #[test]
    pub fn record_addresses_step_by_record_size() {
        let increment = std::mem::size_of::<MaterialRecord>() as vk::DeviceSize;
        let table = BufferTable::new(0x10_0000, increment, 8);
        assert_eq!(table.address_of(0).unwrap(), 0x10_0000);
        assert_eq!(table.address_of(5).unwrap(), 0x10_0000 + 5 * 256);
        assert!(table.address_of(8).is_err());
    }

    #[test]
    pub fn missing_references_collapse_to_no_material() {
        assert_eq!(resolve_material_index(None, 4).unwrap(), NO_MATERIAL);
        assert_eq!(resolve_material_index(Some(3), 4).unwrap(), 3);
        assert_eq!(resolve_material_index(Some(0), 1).unwrap(), 0);
    }

    #[test]
    pub fn dangling_material_references_are_fatal() {
        match resolve_material_index(Some(9), 4) {
            Err(YarraError::IndexOutOfBounds { kind, index, len }) => {
                assert_eq!(kind, "material");
                assert_eq!(index, 9);
                assert_eq!(len, 4);
            }
            other => panic!("expected IndexOutOfBounds, got {other:?}"),
        }
    }
}
