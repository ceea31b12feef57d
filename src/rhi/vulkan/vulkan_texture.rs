#![allow(unsafe_code)]

//! GPU textures and their view lists.

use super::vulkan_descriptor_manager::{TextureBindings, BINDLESS_INVALID_INDEX};
use super::vulkan_device::DeviceShared;
use super::vulkan_utils::{
    vk_address_mode, vk_aspect_mask, vk_border_color, vk_extent_3d, vk_filter, vk_format,
    vk_image_type, vk_image_usage, vk_image_view_type, vk_mipmap_mode, vk_sample_count,
};
use crate::rhi::rhi_enums::{DeviceError, ResourceState, TextureType, TextureViewType};
use crate::rhi::rhi_structs::{SamplerInfo, TextureInfo, TextureViewInfo};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use log::error;
use std::sync::{Arc, Mutex};

struct TextureView {
    raw: vk::ImageView,
    custom_sampler: Option<vk::Sampler>,
    bindings: TextureBindings,
    info: TextureViewInfo,
}

/// A GPU texture owning an ordered list of views.
///
/// View 0 is the default view covering every mip and layer and always exists
/// for a live texture. Each view owns its own bindless indices and may carry
/// a custom sampler.
pub struct Texture {
    shared: Arc<DeviceShared>,
    image: vk::Image,
    allocation: Mutex<Option<Allocation>>,
    /// Swapchain textures wrap images owned by the presentation engine.
    owning: bool,
    views: Mutex<Vec<TextureView>>,
    info: TextureInfo,
}

impl Texture {
    /// Creates and allocates a texture and its default view.
    pub(crate) fn new(
        shared: Arc<DeviceShared>,
        info: TextureInfo,
    ) -> Result<Arc<Texture>, DeviceError> {
        if info.samples == 0 || info.samples > 64 || !info.samples.is_power_of_two() {
            error!(
                "texture '{}' sample count must be a power of two up to 64, got {}",
                info.name, info.samples
            );
            return Err(DeviceError::Unsupported("invalid sample count"));
        }

        let flags = if info.cube_compatible {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };

        let create_info = vk::ImageCreateInfo::builder()
            .flags(flags)
            .image_type(vk_image_type(info.texture_type))
            .format(vk_format(info.format))
            .extent(vk_extent_3d(info.extent))
            .mip_levels(info.mip_levels)
            .array_layers(info.layer_count())
            .samples(vk_sample_count(info.samples))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk_image_usage(info.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { shared.raw.create_image(&create_info, None) }
            .map_err(DeviceError::from_vk)?;

        let requirements = unsafe { shared.raw.get_image_memory_requirements(image) };

        let allocation = shared
            .allocate(&AllocationCreateDesc {
                name: &info.name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|err| DeviceError::AllocationFailed(err.to_string()))?;

        unsafe {
            shared
                .raw
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        }
        .map_err(DeviceError::from_vk)?;

        let texture = Arc::new(Texture {
            shared,
            image,
            allocation: Mutex::new(Some(allocation)),
            owning: true,
            views: Mutex::new(Vec::new()),
            info,
        });

        texture.init_debug_name_and_default_view()?;

        Ok(texture)
    }

    /// Wraps an image owned elsewhere (swapchain images).
    pub(crate) fn from_raw_image(
        shared: Arc<DeviceShared>,
        info: TextureInfo,
        image: vk::Image,
    ) -> Result<Arc<Texture>, DeviceError> {
        let texture = Arc::new(Texture {
            shared,
            image,
            allocation: Mutex::new(None),
            owning: false,
            views: Mutex::new(Vec::new()),
            info,
        });

        texture.init_debug_name_and_default_view()?;

        Ok(texture)
    }

    fn init_debug_name_and_default_view(&self) -> Result<(), DeviceError> {
        if !self.info.name.is_empty() {
            self.shared.set_debug_name(self.image, &self.info.name);
        }

        let layer_count = self.info.layer_count();
        let view_type = match self.info.texture_type {
            TextureType::Texture3D => TextureViewType::View3D,
            TextureType::Texture1D if layer_count == 1 => TextureViewType::View1D,
            TextureType::Texture1D => TextureViewType::Array1D,
            TextureType::Texture2D if layer_count == 1 => TextureViewType::View2D,
            TextureType::Texture2D => TextureViewType::Array2D,
        };

        self.create_view(TextureViewInfo {
            view_type,
            first_mip: 0,
            mip_count: self.info.mip_levels,
            first_layer: 0,
            layer_count,
        })?;

        Ok(())
    }

    /// Creates a view over a subresource range and registers it in the
    /// bindless table. Returns the view index.
    pub fn create_view(&self, info: TextureViewInfo) -> Result<u32, DeviceError> {
        assert!(
            info.first_mip + info.mip_count <= self.info.mip_levels,
            "view mip range out of bounds for texture '{}'",
            self.info.name
        );
        assert!(
            info.first_layer + info.layer_count <= self.info.layer_count(),
            "view layer range out of bounds for texture '{}'",
            self.info.name
        );

        let create_info = vk::ImageViewCreateInfo::builder()
            .image(self.image)
            .view_type(vk_image_view_type(info.view_type))
            .format(vk_format(self.info.format))
            .components(vk::ComponentMapping::default())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk_aspect_mask(self.info.format),
                base_mip_level: info.first_mip,
                level_count: info.mip_count,
                base_array_layer: info.first_layer,
                layer_count: info.layer_count,
            });

        let raw = unsafe { self.shared.raw.create_image_view(&create_info, None) }
            .map_err(DeviceError::from_vk)?;

        let bindings = self
            .shared
            .descriptors
            .add_image_view(raw, self.info.usage, None)
            .map_err(|err| {
                error!(
                    "bindless registration failed for a view of '{}': {}",
                    self.info.name, err
                );
                DeviceError::OutOfDeviceMemory
            })?;

        let mut views = self.views.lock().unwrap();
        let view_idx = views.len() as u32;
        views.push(TextureView {
            raw,
            custom_sampler: None,
            bindings,
            info,
        });

        if !self.info.name.is_empty() {
            self.shared
                .set_debug_name(raw, &format!("{} <view {}>", self.info.name, view_idx));
        }

        Ok(view_idx)
    }

    pub fn info(&self) -> &TextureInfo {
        &self.info
    }

    pub fn view_count(&self) -> u32 {
        self.views.lock().unwrap().len() as u32
    }

    pub fn view_info(&self, view_idx: u32) -> TextureViewInfo {
        self.views.lock().unwrap()[view_idx as usize].info
    }

    /// Bindless index of the view in the sampled-texture binding.
    pub fn sampled_binding(&self, view_idx: u32) -> u16 {
        self.views.lock().unwrap()[view_idx as usize].bindings.sampled
    }

    /// Bindless index of the view in the storage-texture binding.
    pub fn storage_binding(&self, view_idx: u32) -> u16 {
        self.views.lock().unwrap()[view_idx as usize].bindings.storage
    }

    /// Creates a custom sampler for a view and rebinds its combined
    /// image-sampler entry. Returns false when the view is not sampled.
    pub fn set_sampler(&self, info: SamplerInfo, view_idx: u32) -> bool {
        let mut views = self.views.lock().unwrap();
        let view = &mut views[view_idx as usize];

        if !self.info.usage.contains(ResourceState::SHADER_SAMPLED)
            || view.bindings.sampled == BINDLESS_INVALID_INDEX
        {
            return false;
        }

        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk_filter(info.mag_filter))
            .min_filter(vk_filter(info.min_filter))
            .mipmap_mode(vk_mipmap_mode(info.mipmap_mode))
            .address_mode_u(vk_address_mode(info.address_mode_u))
            .address_mode_v(vk_address_mode(info.address_mode_v))
            .address_mode_w(vk_address_mode(info.address_mode_w))
            .mip_lod_bias(info.lod_bias)
            .anisotropy_enable(info.anisotropy_enabled)
            .max_anisotropy(info.max_anisotropy)
            .compare_op(vk::CompareOp::ALWAYS)
            .min_lod(info.min_lod)
            .max_lod(info.max_lod)
            .border_color(vk_border_color(info.border_color));

        let sampler = match unsafe { self.shared.raw.create_sampler(&create_info, None) } {
            Ok(sampler) => sampler,
            Err(result) => {
                error!(
                    "failed to create a sampler for '{}': {}",
                    self.info.name, result
                );
                return false;
            }
        };

        if let Some(previous) = view.custom_sampler.replace(sampler) {
            unsafe { self.shared.raw.destroy_sampler(previous, None) };
        }

        self.shared
            .descriptors
            .update_sampler(view.bindings.sampled, view.raw, Some(sampler));

        if !self.info.name.is_empty() {
            self.shared
                .set_debug_name(sampler, &format!("{} <sampler {}>", self.info.name, view_idx));
        }

        true
    }

    pub(crate) fn raw(&self) -> vk::Image {
        self.image
    }

    pub(crate) fn vk_view(&self, view_idx: u32) -> vk::ImageView {
        let views = self.views.lock().unwrap();
        assert!(
            (view_idx as usize) < views.len(),
            "invalid view index {} on texture '{}'",
            view_idx,
            self.info.name
        );
        views[view_idx as usize].raw
    }

    /// Subresource range of a view, used when linking barriers.
    pub(crate) fn view_subresource_range(&self, view_idx: u32) -> vk::ImageSubresourceRange {
        let info = self.view_info(view_idx);
        vk::ImageSubresourceRange {
            aspect_mask: vk_aspect_mask(self.info.format),
            base_mip_level: info.first_mip,
            level_count: info.mip_count,
            base_array_layer: info.first_layer,
            layer_count: info.layer_count,
        }
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        let mut views = self.views.lock().unwrap();
        for view in views.drain(..) {
            unsafe {
                self.shared.raw.destroy_image_view(view.raw, None);
                if let Some(sampler) = view.custom_sampler {
                    self.shared.raw.destroy_sampler(sampler, None);
                }
            }
            self.shared.descriptors.remove_image_view(view.bindings);
        }

        if self.owning {
            if let Some(allocation) = self.allocation.lock().unwrap().take() {
                self.shared.free_allocation(allocation);
            }

            unsafe {
                self.shared.raw.destroy_image(self.image, None);
            }
        }
    }
}
