#![allow(unsafe_code)]

//! Monotonic per-queue value fences.

use super::vulkan_device::DeviceShared;
use crate::rhi::rhi_enums::DeviceError;
use ash::vk;
use std::sync::Arc;

/// A timeline semaphore whose values are laid out as
/// `absolute_frame * max_per_frame + local`, so that values from later
/// frames are strictly greater than any value of an earlier frame.
pub struct TimelineSemaphore {
    shared: Arc<DeviceShared>,
    raw: vk::Semaphore,
    max_per_frame: u64,
}

impl TimelineSemaphore {
    pub(crate) fn new(
        shared: Arc<DeviceShared>,
        max_per_frame: u64,
    ) -> Result<TimelineSemaphore, DeviceError> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);

        let create_info = vk::SemaphoreCreateInfo::builder().push_next(&mut type_info);

        let raw = unsafe { shared.raw.create_semaphore(&create_info, None) }
            .map_err(DeviceError::from_vk)?;

        Ok(TimelineSemaphore {
            shared,
            raw,
            max_per_frame,
        })
    }

    pub(crate) fn raw(&self) -> vk::Semaphore {
        self.raw
    }

    /// Absolute timeline value of a frame-local time point.
    pub(crate) fn time_point(&self, absolute_frame: u64, local: u64) -> u64 {
        absolute_frame * self.max_per_frame + local
    }
}

impl Drop for TimelineSemaphore {
    fn drop(&mut self) {
        unsafe {
            self.shared.raw.destroy_semaphore(self.raw, None);
        }
    }
}
