#![allow(unsafe_code)]

//! The process-wide bindless descriptor table.
//!
//! One descriptor set with four fixed bindings (uniform buffer, storage
//! buffer, sampled texture, storage texture), each a bounded array with
//! partially-bound and update-after-bind semantics. Shaders reference
//! resources by the integer indices handed out here, passed through push
//! constants.

use crate::rhi::rhi_enums::{BindlessError, DeviceError, ResourceState};
use ash::vk;
use std::collections::BTreeSet;
use std::sync::Mutex;

/// Elements per bindless binding array.
pub const MAX_BINDLESS_RESOURCES_PER_TYPE: u32 = 1024;

/// The reserved "invalid" index of every binding array.
pub const BINDLESS_INVALID_INDEX: u16 = 0;

pub(crate) const BINDING_UNIFORM_BUFFER: u32 = 0;
pub(crate) const BINDING_STORAGE_BUFFER: u32 = 1;
pub(crate) const BINDING_SAMPLED_TEXTURE: u32 = 2;
pub(crate) const BINDING_STORAGE_TEXTURE: u32 = 3;

/// Bindless indices of a buffer, one per applicable binding.
/// `BINDLESS_INVALID_INDEX` marks an absent binding.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct BufferBindings {
    pub uniform: u16,
    pub storage: u16,
}

/// Bindless indices of a texture view.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct TextureBindings {
    pub sampled: u16,
    pub storage: u16,
}

/// Free-index set of one binding array. Index 0 is reserved as invalid.
#[derive(Debug, Clone)]
pub(crate) struct BindingAllocator {
    free: BTreeSet<u16>,
    capacity: u32,
}

impl BindingAllocator {
    pub fn new(capacity: u32) -> BindingAllocator {
        BindingAllocator {
            free: (1..capacity as u16).collect(),
            capacity,
        }
    }

    /// Hands out the smallest free index.
    pub fn allocate(&mut self) -> Result<u16, BindlessError> {
        let index = *self
            .free
            .iter()
            .next()
            .ok_or(BindlessError::OutOfBindlessSlots(self.capacity))?;
        self.free.remove(&index);
        Ok(index)
    }

    /// Returns an index to the free set.
    pub fn release(&mut self, index: u16) {
        if index != BINDLESS_INVALID_INDEX {
            self.free.insert(index);
        }
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}

#[derive(Debug)]
struct FreeSets {
    uniform_buffer: BindingAllocator,
    storage_buffer: BindingAllocator,
    sampled_texture: BindingAllocator,
    storage_texture: BindingAllocator,
}

/// Owns the bindless set, its pool and layout, the per-binding free sets and
/// the default sampler.
pub struct DescriptorManager {
    device: ash::Device,
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,
    default_sampler: vk::Sampler,
    free: Mutex<FreeSets>,
}

impl DescriptorManager {
    pub(crate) fn new(device: ash::Device) -> Result<DescriptorManager, DeviceError> {
        let binding_types = [
            (BINDING_UNIFORM_BUFFER, vk::DescriptorType::UNIFORM_BUFFER),
            (BINDING_STORAGE_BUFFER, vk::DescriptorType::STORAGE_BUFFER),
            (
                BINDING_SAMPLED_TEXTURE,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            ),
            (BINDING_STORAGE_TEXTURE, vk::DescriptorType::STORAGE_IMAGE),
        ];

        let bindings: Vec<_> = binding_types
            .iter()
            .map(|&(binding, descriptor_type)| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(binding)
                    .descriptor_type(descriptor_type)
                    .descriptor_count(MAX_BINDLESS_RESOURCES_PER_TYPE)
                    .stage_flags(vk::ShaderStageFlags::ALL)
                    .build()
            })
            .collect();

        let binding_flags = [vk::DescriptorBindingFlags::PARTIALLY_BOUND
            | vk::DescriptorBindingFlags::UPDATE_AFTER_BIND; 4];

        let mut binding_flags_info =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::builder().binding_flags(&binding_flags);

        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder()
            .flags(vk::DescriptorSetLayoutCreateFlags::UPDATE_AFTER_BIND_POOL)
            .bindings(&bindings)
            .push_next(&mut binding_flags_info);

        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
            .map_err(DeviceError::from_vk)?;

        let pool_sizes: Vec<_> = binding_types
            .iter()
            .map(|&(_, descriptor_type)| {
                vk::DescriptorPoolSize::builder()
                    .ty(descriptor_type)
                    .descriptor_count(MAX_BINDLESS_RESOURCES_PER_TYPE)
                    .build()
            })
            .collect();

        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND)
            .max_sets(1)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
            .map_err(DeviceError::from_vk)?;

        let layouts = [layout];
        let allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        let set = unsafe { device.allocate_descriptor_sets(&allocate_info) }
            .map_err(DeviceError::from_vk)?[0];

        let sampler_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .anisotropy_enable(true)
            .max_anisotropy(4.0)
            .compare_op(vk::CompareOp::ALWAYS)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK);

        let default_sampler = unsafe { device.create_sampler(&sampler_info, None) }
            .map_err(DeviceError::from_vk)?;

        Ok(DescriptorManager {
            device,
            layout,
            pool,
            set,
            default_sampler,
            free: Mutex::new(FreeSets {
                uniform_buffer: BindingAllocator::new(MAX_BINDLESS_RESOURCES_PER_TYPE),
                storage_buffer: BindingAllocator::new(MAX_BINDLESS_RESOURCES_PER_TYPE),
                sampled_texture: BindingAllocator::new(MAX_BINDLESS_RESOURCES_PER_TYPE),
                storage_texture: BindingAllocator::new(MAX_BINDLESS_RESOURCES_PER_TYPE),
            }),
        })
    }

    pub(crate) fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub(crate) fn set(&self) -> vk::DescriptorSet {
        self.set
    }

    /// Writes the buffer into every binding its usage asks for and returns
    /// the allocated indices.
    pub(crate) fn add_buffer(
        &self,
        buffer: vk::Buffer,
        usage: ResourceState,
    ) -> Result<BufferBindings, BindlessError> {
        let mut bindings = BufferBindings::default();
        let mut free = self.free.lock().unwrap();

        let buffer_info = [vk::DescriptorBufferInfo::builder()
            .buffer(buffer)
            .offset(0)
            .range(vk::WHOLE_SIZE)
            .build()];

        let mut writes = Vec::with_capacity(2);

        if usage.contains(ResourceState::UNIFORM_BUFFER) {
            bindings.uniform = free.uniform_buffer.allocate()?;
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(self.set)
                    .dst_binding(BINDING_UNIFORM_BUFFER)
                    .dst_array_element(u32::from(bindings.uniform))
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(&buffer_info)
                    .build(),
            );
        }

        if usage.intersects(ResourceState::STORAGE_BUFFER_READ_WRITE) {
            bindings.storage = match free.storage_buffer.allocate() {
                Ok(index) => index,
                Err(err) => {
                    free.uniform_buffer.release(bindings.uniform);
                    return Err(err);
                }
            };
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(self.set)
                    .dst_binding(BINDING_STORAGE_BUFFER)
                    .dst_array_element(u32::from(bindings.storage))
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(&buffer_info)
                    .build(),
            );
        }

        if !writes.is_empty() {
            unsafe { self.device.update_descriptor_sets(&writes, &[]) };
        }

        Ok(bindings)
    }

    /// Returns a buffer's indices to their free sets.
    pub(crate) fn remove_buffer(&self, bindings: BufferBindings) {
        let mut free = self.free.lock().unwrap();
        free.uniform_buffer.release(bindings.uniform);
        free.storage_buffer.release(bindings.storage);
    }

    /// Writes the view into the sampled and/or storage binding and returns
    /// the allocated indices. `sampler` of `None` uses the default sampler.
    pub(crate) fn add_image_view(
        &self,
        view: vk::ImageView,
        usage: ResourceState,
        sampler: Option<vk::Sampler>,
    ) -> Result<TextureBindings, BindlessError> {
        let mut bindings = TextureBindings::default();
        let mut free = self.free.lock().unwrap();

        let mut writes = Vec::with_capacity(2);

        let sampled_info = [vk::DescriptorImageInfo::builder()
            .sampler(sampler.unwrap_or(self.default_sampler))
            .image_view(view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .build()];

        let storage_info = [vk::DescriptorImageInfo::builder()
            .image_view(view)
            .image_layout(vk::ImageLayout::GENERAL)
            .build()];

        if usage.contains(ResourceState::SHADER_SAMPLED) {
            bindings.sampled = free.sampled_texture.allocate()?;
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(self.set)
                    .dst_binding(BINDING_SAMPLED_TEXTURE)
                    .dst_array_element(u32::from(bindings.sampled))
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(&sampled_info)
                    .build(),
            );
        }

        if usage.intersects(ResourceState::STORAGE_TEXTURE_READ_WRITE) {
            bindings.storage = match free.storage_texture.allocate() {
                Ok(index) => index,
                Err(err) => {
                    free.sampled_texture.release(bindings.sampled);
                    return Err(err);
                }
            };
            writes.push(
                vk::WriteDescriptorSet::builder()
                    .dst_set(self.set)
                    .dst_binding(BINDING_STORAGE_TEXTURE)
                    .dst_array_element(u32::from(bindings.storage))
                    .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                    .image_info(&storage_info)
                    .build(),
            );
        }

        if !writes.is_empty() {
            unsafe { self.device.update_descriptor_sets(&writes, &[]) };
        }

        Ok(bindings)
    }

    /// Returns a view's indices to their free sets.
    pub(crate) fn remove_image_view(&self, bindings: TextureBindings) {
        let mut free = self.free.lock().unwrap();
        free.sampled_texture.release(bindings.sampled);
        free.storage_texture.release(bindings.storage);
    }

    /// Rebinds the combined image-sampler entry at an existing index.
    pub(crate) fn update_sampler(
        &self,
        sampled_binding: u16,
        view: vk::ImageView,
        sampler: Option<vk::Sampler>,
    ) {
        let image_info = [vk::DescriptorImageInfo::builder()
            .sampler(sampler.unwrap_or(self.default_sampler))
            .image_view(view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .build()];

        let write = vk::WriteDescriptorSet::builder()
            .dst_set(self.set)
            .dst_binding(BINDING_SAMPLED_TEXTURE)
            .dst_array_element(u32::from(sampled_binding))
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(&image_info)
            .build();

        unsafe { self.device.update_descriptor_sets(&[write], &[]) };
    }

    /// Destroys the Vulkan objects. Called by the owning device before the
    /// logical device goes away.
    pub(crate) fn destroy(&self) {
        unsafe {
            self.device.destroy_sampler(self.default_sampler, None);
            self.device.destroy_descriptor_pool(self.pool, None);
            self.device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreeset;

    /// S4: every index in `1..capacity` is handed out exactly once, the next
    /// allocation fails, and a released index is reused.
    #[test]
    fn exhaustion_and_reuse() {
        let mut allocator = BindingAllocator::new(MAX_BINDLESS_RESOURCES_PER_TYPE);

        let mut seen = BTreeSet::new();
        for _ in 1..MAX_BINDLESS_RESOURCES_PER_TYPE {
            let index = allocator.allocate().unwrap();
            assert!(index >= 1);
            assert!(seen.insert(index), "index {} handed out twice", index);
        }

        assert_eq!(
            allocator.allocate(),
            Err(BindlessError::OutOfBindlessSlots(
                MAX_BINDLESS_RESOURCES_PER_TYPE
            ))
        );

        allocator.release(713);
        assert_eq!(allocator.allocate(), Ok(713));
    }

    /// Property 5: releasing restores the free-set cardinality, and the
    /// invalid index is never recycled into the set.
    #[test]
    fn release_round_trip() {
        let mut allocator = BindingAllocator::new(8);
        assert_eq!(allocator.free_count(), 7);

        let a = allocator.allocate().unwrap();
        let b = allocator.allocate().unwrap();
        assert_ne!(a, b);
        assert_eq!(allocator.free_count(), 5);

        allocator.release(a);
        allocator.release(b);
        assert_eq!(allocator.free_count(), 7);

        allocator.release(BINDLESS_INVALID_INDEX);
        assert_eq!(allocator.free_count(), 7);
    }

    #[test]
    fn smallest_index_first() {
        let mut allocator = BindingAllocator::new(8);
        assert_eq!(allocator.allocate(), Ok(1));
        assert_eq!(allocator.allocate(), Ok(2));

        allocator.release(1);
        assert_eq!(allocator.allocate(), Ok(1));

        let remaining: BTreeSet<u16> = (3..8).collect();
        assert_eq!(
            (3..8).map(|_| allocator.allocate().unwrap()).collect::<BTreeSet<_>>(),
            remaining
        );
        assert_eq!(remaining, btreeset! {3, 4, 5, 6, 7});
    }
}
