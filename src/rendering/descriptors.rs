use crate::{contexts::VulkanContext, Result, YarraError};
use ash::vk;
use std::slice::from_ref as slice_from_ref;

/// Binding for the per-frame scene constants
pub const SCENE_DATA_BINDING: u32 = 0;
/// Binding for the material record buffer
pub const MATERIALS_BINDING: u32 = 1;
/// Binding for the shadow map
pub const SHADOW_MAP_BINDING: u32 = 2;
/// Binding for the bindless texture array
pub const TEXTURES_BINDING: u32 = 3;

/// Fixed capacity of the texture table. Exceeding it is a hard error, never a
/// silent reallocation - shaders hold slot indices across the table's lifetime.
pub const TEXTURE_TABLE_CAPACITY: u32 = 128;

/// The descriptor pool, the single graphics set layout and the single set all
/// draws bind. Everything varies per draw through push constants and array
/// indices, so one set for the whole renderer is enough.
pub struct Descriptors {
    /// The layout shared by the main and shadow pipelines
    pub graphics_layout: vk::DescriptorSetLayout,
    /// The set bound once per command buffer
    pub set: vk::DescriptorSet,
    /// The pool the set was allocated from
    pub pool: vk::DescriptorPool,
}

impl Descriptors {
    /// Create the pool, layout and set.
    ///
    /// safety: requires a valid `vulkan_context`.
    pub unsafe fn new(vulkan_context: &VulkanContext) -> Result<Self> {
        let device = &vulkan_context.device;

        let bindings = [
            vk::DescriptorSetLayoutBinding {
                binding: SCENE_DATA_BINDING,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 1,
                stage_flags: vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                ..Default::default()
            },
            vk::DescriptorSetLayoutBinding {
                binding: MATERIALS_BINDING,
                descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: 1,
                stage_flags: vk::ShaderStageFlags::FRAGMENT,
                ..Default::default()
            },
            vk::DescriptorSetLayoutBinding {
                binding: SHADOW_MAP_BINDING,
                descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: 1,
                stage_flags: vk::ShaderStageFlags::FRAGMENT,
                ..Default::default()
            },
            vk::DescriptorSetLayoutBinding {
                binding: TEXTURES_BINDING,
                descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: TEXTURE_TABLE_CAPACITY,
                stage_flags: vk::ShaderStageFlags::FRAGMENT,
                ..Default::default()
            },
        ];

        // The texture array is written incrementally as scenes load, so it
        // must be partially bound and updatable after bind.
        let descriptor_flags = [
            vk::DescriptorBindingFlags::empty(),
            vk::DescriptorBindingFlags::empty(),
            vk::DescriptorBindingFlags::empty(),
            vk::DescriptorBindingFlags::PARTIALLY_BOUND
                | vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT
                | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND,
        ];
        let mut binding_flags = vk::DescriptorSetLayoutBindingFlagsCreateInfo::builder()
            .binding_flags(&descriptor_flags);

        let graphics_layout = device.create_descriptor_set_layout(
            &vk::DescriptorSetLayoutCreateInfo::builder()
                .bindings(&bindings)
                .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
                .push_next(&mut binding_flags),
            None,
        )?;

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 1,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: 1,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: TEXTURE_TABLE_CAPACITY + 1,
            },
        ];
        let pool = device.create_descriptor_pool(
            &vk::DescriptorPoolCreateInfo::builder()
                .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
                .pool_sizes(&pool_sizes)
                .max_sets(1),
            None,
        )?;

        let counts = [TEXTURE_TABLE_CAPACITY];
        let mut variable_count_info = vk::DescriptorSetVariableDescriptorCountAllocateInfo::builder()
            .descriptor_counts(&counts);
        let set = device.allocate_descriptor_sets(
            &vk::DescriptorSetAllocateInfo::builder()
                .descriptor_pool(pool)
                .set_layouts(slice_from_ref(&graphics_layout))
                .push_next(&mut variable_count_info),
        )?[0];

        Ok(Self {
            graphics_layout,
            set,
            pool,
        })
    }

    /// safety: no in-flight work may reference the set.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        device.destroy_descriptor_set_layout(self.graphics_layout, None);
        device.destroy_descriptor_pool(self.pool, None);
    }
}

/// The bindless texture array: a fixed-capacity table of combined image
/// samplers. Slots are handed out in order and never reused, so a slot written
/// into a material stays valid for the table's whole lifetime.
pub struct TextureTable {
    set: vk::DescriptorSet,
    capacity: u32,
    views: Vec<vk::ImageView>,
}

impl TextureTable {
    /// Create a table that writes into the given set.
    pub fn new(set: vk::DescriptorSet) -> Self {
        Self {
            set,
            capacity: TEXTURE_TABLE_CAPACITY,
            views: Vec::new(),
        }
    }

    /// Write `view` into the next free slot and return the slot index.
    pub fn bind(
        &mut self,
        device: &ash::Device,
        sampler: vk::Sampler,
        view: vk::ImageView,
    ) -> Result<u32> {
        let slot = self.push_view(view)?;
        self.write_view(device, slot, sampler, view)?;
        Ok(slot)
    }

    /// Overwrite the view in an already allocated slot. Last write wins; the
    /// previous contents are not tracked.
    pub fn write_view(
        &mut self,
        device: &ash::Device,
        slot: u32,
        sampler: vk::Sampler,
        view: vk::ImageView,
    ) -> Result<()> {
        let stored = self
            .views
            .get_mut(slot as usize)
            .ok_or(YarraError::OutOfCapacity {
                capacity: self.capacity,
                index: slot,
            })?;
        *stored = view;

        let image_info = vk::DescriptorImageInfo {
            sampler,
            image_view: view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.set)
            .dst_binding(TEXTURES_BINDING)
            .dst_array_element(slot)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(slice_from_ref(&image_info));
        unsafe { device.update_descriptor_sets(slice_from_ref(&write), &[]) };
        Ok(())
    }

    fn push_view(&mut self, view: vk::ImageView) -> Result<u32> {
        let index = self.views.len() as u32;
        if index >= self.capacity {
            return Err(YarraError::OutOfCapacity {
                capacity: self.capacity,
                index,
            });
        }
        self.views.push(view);
        Ok(index)
    }

    /// The view stored at `slot`, for inspection without touching the GPU.
    pub fn view_at(&self, slot: u32) -> Result<vk::ImageView> {
        self.views
            .get(slot as usize)
            .copied()
            .ok_or(YarraError::IndexOutOfBounds {
                kind: "texture slot",
                index: slot as usize,
                len: self.views.len(),
            })
    }

    /// The number of slots handed out so far.
    pub fn len(&self) -> u32 {
        self.views.len() as u32
    }

    /// Whether any slots have been handed out.
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

/// A table of fixed-size records living in one device-local buffer, addressed
/// by `base + index * increment`. The increment never changes after creation,
/// so record addresses are stable for the table's whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferTable {
    base: vk::DeviceAddress,
    increment: vk::DeviceSize,
    capacity: u32,
}

impl BufferTable {
    /// Describe a table rooted at `base` with `capacity` records of
    /// `increment` bytes each.
    pub fn new(base: vk::DeviceAddress, increment: vk::DeviceSize, capacity: u32) -> Self {
        Self {
            base,
            increment,
            capacity,
        }
    }

    /// The device address of record `index`.
    pub fn address_of(&self, index: u32) -> Result<vk::DeviceAddress> {
        if index >= self.capacity {
            return Err(YarraError::OutOfCapacity {
                capacity: self.capacity,
                index,
            });
        }
        Ok(self.base + index as vk::DeviceSize * self.increment)
    }

    /// The per-record stride in bytes.
    pub fn increment(&self) -> vk::DeviceSize {
        self.increment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn texture_slots_are_sequential_and_stable() {
        let mut table = TextureTable {
            set: vk::DescriptorSet::null(),
            capacity: 4,
            views: Vec::new(),
        };

        for expected in 0..4 {
            let slot = table.push_view(vk::ImageView::null()).unwrap();
            assert_eq!(slot, expected);
        }

        // Slot 2 still resolves after later binds.
        assert!(table.view_at(2).is_ok());
        assert!(table.view_at(4).is_err());
    }

    #[test]
    pub fn texture_table_rejects_overflow() {
        let mut table = TextureTable {
            set: vk::DescriptorSet::null(),
            capacity: 2,
            views: Vec::new(),
        };
        table.push_view(vk::ImageView::null()).unwrap();
        table.push_view(vk::ImageView::null()).unwrap();

        match table.push_view(vk::ImageView::null()) {
            Err(YarraError::OutOfCapacity { capacity, index }) => {
                assert_eq!(capacity, 2);
                assert_eq!(index, 2);
            }
            other => panic!("expected OutOfCapacity, got {other:?}"),
        }
    }

    #[test]
    pub fn buffer_table_addresses_step_by_increment() {
        let table = BufferTable::new(0x1000, 256, 16);
        assert_eq!(table.address_of(0).unwrap(), 0x1000);
        assert_eq!(table.address_of(1).unwrap(), 0x1100);
        assert_eq!(table.address_of(15).unwrap(), 0x1000 + 15 * 256);
        assert!(table.address_of(16).is_err());
    }

    #[test]
    pub fn buffer_table_addresses_are_reproducible() {
        let table = BufferTable::new(0xBEEF_0000, 64, 8);
        let first = table.address_of(3).unwrap();
        let second = table.address_of(3).unwrap();
        assert_eq!(first, second);
    }
}
