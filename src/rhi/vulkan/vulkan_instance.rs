#![allow(unsafe_code)]

//! Instance creation, validation setup and device enumeration.

use super::vulkan_device::Device;
use super::vulkan_queue_set::select_queue_families;
use super::vulkan_utils::{device_type_from_vk, max_samples_from_vk};
use crate::rhi::rhi_enums::{GraphicsApi, InstanceError, ValidationLevel};
use crate::rhi::rhi_structs::{DeviceInfo, DeviceProperties};
use ash::extensions::ext::DebugUtils;
use ash::vk;
use log::{debug, error, info, warn};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::{c_void, CStr, CString};

unsafe extern "system" fn vulkan_debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_types: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let message = if p_callback_data.is_null() {
        std::borrow::Cow::from("<no message>")
    } else {
        CStr::from_ptr((*p_callback_data).p_message).to_string_lossy()
    };

    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => error!("[vulkan] {}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => warn!("[vulkan] {}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => info!("[vulkan] {}", message),
        _ => debug!("[vulkan] {}", message),
    }

    vk::FALSE
}

/// The Vulkan instance: validation configuration, adapter enumeration and
/// logical device creation.
pub struct Instance {
    entry: ash::Entry,
    raw: ash::Instance,
    debug_utils: Option<DebugUtils>,
    debug_messenger: vk::DebugUtilsMessengerEXT,
    validation: ValidationLevel,
    physical_devices: Vec<vk::PhysicalDevice>,
    device_infos: Vec<DeviceInfo>,
}

impl Instance {
    /// Creates the instance with the requested validation level. Validation
    /// silently degrades to `None` when the layer is not installed.
    pub fn new(api: GraphicsApi, validation: ValidationLevel) -> Result<Instance, InstanceError> {
        assert!(
            api == GraphicsApi::Vulkan,
            "only the Vulkan backend is implemented"
        );

        let entry = unsafe { ash::Entry::load() }
            .map_err(|err| InstanceError::LoadingFailed(err.to_string()))?;

        let mut validation = validation;
        let wants_layers =
            validation == ValidationLevel::Basic || validation == ValidationLevel::Extensive;
        if wants_layers && !Self::validation_layer_available(&entry) {
            warn!("validation layer not available, downgrading to DebugInfoOnly");
            validation = ValidationLevel::DebugInfoOnly;
        }

        let app_name = CString::new("ember").unwrap();
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .engine_name(&app_name)
            .api_version(vk::API_VERSION_1_3);

        let layer_names: Vec<CString> = if validation == ValidationLevel::Basic
            || validation == ValidationLevel::Extensive
        {
            vec![CString::new("VK_LAYER_KHRONOS_validation").unwrap()]
        } else {
            Vec::new()
        };
        let layer_pointers: Vec<_> = layer_names.iter().map(|name| name.as_ptr()).collect();

        let mut extension_pointers = vec![ash::extensions::khr::Surface::name().as_ptr()];

        #[cfg(target_os = "linux")]
        {
            extension_pointers.push(ash::extensions::khr::XlibSurface::name().as_ptr());
            extension_pointers.push(ash::extensions::khr::WaylandSurface::name().as_ptr());
        }

        #[cfg(target_os = "windows")]
        extension_pointers.push(ash::extensions::khr::Win32Surface::name().as_ptr());

        if validation != ValidationLevel::None {
            extension_pointers.push(DebugUtils::name().as_ptr());
        }

        /* Extra validation features per level. */
        let enabled_features = match validation {
            ValidationLevel::Basic => vec![vk::ValidationFeatureEnableEXT::SYNCHRONIZATION_VALIDATION],
            ValidationLevel::Extensive => vec![
                vk::ValidationFeatureEnableEXT::SYNCHRONIZATION_VALIDATION,
                vk::ValidationFeatureEnableEXT::BEST_PRACTICES,
            ],
            _ => Vec::new(),
        };

        let mut validation_features =
            vk::ValidationFeaturesEXT::builder().enabled_validation_features(&enabled_features);

        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_layer_names(&layer_pointers)
            .enabled_extension_names(&extension_pointers);

        if !enabled_features.is_empty() {
            create_info = create_info.push_next(&mut validation_features);
        }

        let raw = unsafe { entry.create_instance(&create_info, None) }
            .map_err(InstanceError::VkFailed)?;

        let (debug_utils, debug_messenger) = if validation != ValidationLevel::None {
            let debug_utils = DebugUtils::new(&entry, &raw);

            let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(vulkan_debug_callback));

            let messenger = unsafe {
                debug_utils.create_debug_utils_messenger(&messenger_info, None)
            }
            .map_err(InstanceError::VkFailed)?;

            (Some(debug_utils), messenger)
        } else {
            (None, vk::DebugUtilsMessengerEXT::null())
        };

        let physical_devices =
            unsafe { raw.enumerate_physical_devices() }.map_err(InstanceError::VkFailed)?;

        let device_infos = physical_devices
            .iter()
            .enumerate()
            .map(|(id, &physical_device)| {
                Self::query_device_info(&raw, physical_device, id as u32)
            })
            .collect();

        info!("created vulkan instance with validation={:?}", validation);

        Ok(Instance {
            entry,
            raw,
            debug_utils,
            debug_messenger,
            validation,
            physical_devices,
            device_infos,
        })
    }

    /// The enumerated adapters in a stable order.
    pub fn device_info_list(&self) -> &[DeviceInfo] {
        &self.device_infos
    }

    /// Creates the logical device bound to the adapter with index `id`.
    pub fn create_device(&self, id: u32, frames_in_flight: u32) -> Result<Device, InstanceError> {
        let physical_device = *self
            .physical_devices
            .get(id as usize)
            .ok_or(InstanceError::UnknownDevice(id))?;

        let info = self.device_infos[id as usize].clone();
        if !info.engine_supported {
            return Err(InstanceError::Unsupported(
                "device lacks Vulkan 1.3 with the required features",
            ));
        }

        Device::new(self, physical_device, info, frames_in_flight)
            .map_err(|err| {
                error!("device creation failed: {}", err);
                InstanceError::Unsupported("logical device creation failed")
            })
    }

    /// Creates a presentation surface from the platform window layer's raw
    /// handles. The surface is handed to [`SwapchainInfo`] and destroyed by
    /// the swapchain.
    ///
    /// [`SwapchainInfo`]: crate::rhi::rhi_structs::SwapchainInfo
    pub fn create_surface(
        &self,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
    ) -> Result<vk::SurfaceKHR, InstanceError> {
        unsafe {
            ash_window::create_surface(&self.entry, &self.raw, display_handle, window_handle, None)
        }
        .map_err(InstanceError::VkFailed)
    }

    pub(crate) fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub(crate) fn raw(&self) -> &ash::Instance {
        &self.raw
    }

    pub(crate) fn debug_utils(&self) -> Option<&DebugUtils> {
        self.debug_utils.as_ref()
    }

    pub(crate) fn validation(&self) -> ValidationLevel {
        self.validation
    }

    fn validation_layer_available(entry: &ash::Entry) -> bool {
        let layers = match entry.enumerate_instance_layer_properties() {
            Ok(layers) => layers,
            Err(_) => return false,
        };

        layers.iter().any(|layer| {
            let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
            name.to_bytes() == b"VK_LAYER_KHRONOS_validation"
        })
    }

    fn query_device_info(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        id: u32,
    ) -> DeviceInfo {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let mut vulkan12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut vulkan13 = vk::PhysicalDeviceVulkan13Features::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::builder()
            .push_next(&mut vulkan12)
            .push_next(&mut vulkan13);

        unsafe { instance.get_physical_device_features2(physical_device, &mut features2) };

        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

        let engine_supported = properties.api_version >= vk::API_VERSION_1_3
            && vulkan12.timeline_semaphore == vk::TRUE
            && vulkan12.runtime_descriptor_array == vk::TRUE
            && vulkan12.descriptor_binding_partially_bound == vk::TRUE
            && vulkan13.synchronization2 == vk::TRUE
            && vulkan13.dynamic_rendering == vk::TRUE
            && select_queue_families(&queue_families).is_ok();

        DeviceInfo {
            id,
            name,
            device_type: device_type_from_vk(properties.device_type),
            engine_supported,
            properties: DeviceProperties {
                max_msaa_samples: max_samples_from_vk(&properties),
                max_sampler_anisotropy: properties.limits.max_sampler_anisotropy,
            },
        }
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some(debug_utils) = &self.debug_utils {
                if self.debug_messenger != vk::DebugUtilsMessengerEXT::null() {
                    debug_utils.destroy_debug_utils_messenger(self.debug_messenger, None);
                }
            }

            self.raw.destroy_instance(None);
        }
    }
}
