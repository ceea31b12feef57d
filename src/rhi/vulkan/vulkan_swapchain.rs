#![allow(unsafe_code)]

//! Windowed presentation.

use super::vulkan_device::DeviceShared;
use super::vulkan_texture::Texture;
use super::vulkan_utils::{format_from_vk, vk_extent_2d, vk_image_usage};
use crate::rhi::rhi_enums::{DeviceError, TextureType};
use crate::rhi::rhi_structs::{Extent2D, Extent3D, SwapchainInfo, TextureInfo};
use ash::vk;
use log::error;
use std::sync::Arc;

fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    formats
        .iter()
        .copied()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or(formats[0])
}

fn choose_present_mode(present_modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    for &mode in present_modes {
        if !vsync && mode == vk::PresentModeKHR::IMMEDIATE {
            return mode;
        }
        if vsync && mode == vk::PresentModeKHR::MAILBOX {
            return mode;
        }
    }

    // FIFO is the only mode guaranteed to exist.
    vk::PresentModeKHR::FIFO
}

/// A swapchain and its images wrapped as non-owning textures.
///
/// Acquisition returning `None` and presentation reporting out-of-date are
/// never fatal: the caller reacts by calling [`Swapchain::recreate`] with
/// the window's current framebuffer size.
pub struct Swapchain {
    shared: Arc<DeviceShared>,
    surface: vk::SurfaceKHR,
    raw: vk::SwapchainKHR,
    textures: Vec<Arc<Texture>>,
    info: SwapchainInfo,
}

impl Swapchain {
    pub(crate) fn new(
        shared: Arc<DeviceShared>,
        info: SwapchainInfo,
    ) -> Result<Swapchain, DeviceError> {
        let mut swapchain = Swapchain {
            shared,
            surface: info.surface,
            raw: vk::SwapchainKHR::null(),
            textures: Vec::new(),
            info,
        };

        swapchain.create_swapchain()?;

        Ok(swapchain)
    }

    /// The swapchain textures, indexed by acquired image index.
    pub fn textures(&self) -> &[Arc<Texture>] {
        &self.textures
    }

    pub fn extent(&self) -> Extent2D {
        self.info.extent
    }

    /// Destroys and recreates the swapchain at the window's current
    /// framebuffer size. Existing texture references become stale.
    pub fn recreate(&mut self, extent: Extent2D) -> Result<(), DeviceError> {
        self.info.extent = extent;

        self.textures.clear();
        if self.raw != vk::SwapchainKHR::null() {
            unsafe {
                self.shared.swapchain_loader.destroy_swapchain(self.raw, None);
            }
            self.raw = vk::SwapchainKHR::null();
        }

        self.create_swapchain()
    }

    pub(crate) fn raw(&self) -> vk::SwapchainKHR {
        self.raw
    }

    /// Acquires the next image, signalling `semaphore`. Returns `None` when
    /// the swapchain is out of date and must be recreated.
    pub(crate) fn acquire_next(&mut self, semaphore: vk::Semaphore) -> Option<u32> {
        let result = unsafe {
            self.shared.swapchain_loader.acquire_next_image(
                self.raw,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((texture_idx, _suboptimal)) => Some(texture_idx),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => None,
            Err(result) => {
                error!("swapchain acquisition failed: {}", result);
                None
            }
        }
    }

    fn create_swapchain(&mut self) -> Result<(), DeviceError> {
        let surface_loader = &self.shared.surface_loader;
        let physical_device = self.shared.physical_device;

        let (capabilities, formats, present_modes) = unsafe {
            let capabilities = surface_loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
                .map_err(DeviceError::from_vk)?;
            let formats = surface_loader
                .get_physical_device_surface_formats(physical_device, self.surface)
                .map_err(DeviceError::from_vk)?;
            let present_modes = surface_loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
                .map_err(DeviceError::from_vk)?;
            (capabilities, formats, present_modes)
        };

        let format = choose_surface_format(&formats);
        let present_mode = choose_present_mode(&present_modes, self.info.vsync);
        let min_image_count = self.info.min_image_count.max(capabilities.min_image_count);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(min_image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(vk_extent_2d(self.info.extent))
            .image_array_layers(1)
            .image_usage(vk_image_usage(self.info.usage))
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        self.raw = unsafe {
            self.shared
                .swapchain_loader
                .create_swapchain(&create_info, None)
        }
        .map_err(DeviceError::from_vk)?;

        if !self.info.name.is_empty() {
            self.shared.set_debug_name(self.raw, &self.info.name);
        }

        let images = unsafe { self.shared.swapchain_loader.get_swapchain_images(self.raw) }
            .map_err(DeviceError::from_vk)?;

        self.textures.reserve(images.len());
        for (texture_idx, &image) in images.iter().enumerate() {
            let name = if self.info.name.is_empty() {
                String::new()
            } else {
                format!("{}[{}]", self.info.name, texture_idx)
            };

            let texture_info = TextureInfo {
                format: format_from_vk(format.format),
                texture_type: TextureType::Texture2D,
                usage: self.info.usage,
                cube_compatible: false,
                extent: Extent3D::new(self.info.extent.x, self.info.extent.y, 1),
                mip_levels: 1,
                samples: 1,
                name,
            };

            let texture = Texture::from_raw_image(self.shared.clone(), texture_info, image)?;
            self.textures.push(texture);
        }

        Ok(())
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.textures.clear();

        unsafe {
            if self.raw != vk::SwapchainKHR::null() {
                self.shared.swapchain_loader.destroy_swapchain(self.raw, None);
            }

            self.shared.surface_loader.destroy_surface(self.surface, None);
        }
    }
}
