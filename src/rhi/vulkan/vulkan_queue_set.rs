#![allow(unsafe_code)]

//! Queue family selection and queue handles by role.
//!
//! Up to three queues: the `main` graphics-compute-transfer queue, an async
//! `compute` queue from a different family, and a dedicated `transfer` queue
//! from a transfer-only family. Absent roles collapse onto `main`.

use crate::rhi::render_graph::QueueLayout;
use crate::rhi::rhi_enums::DeviceError;
use ash::vk;
use log::info;

/// Families chosen for each queue role.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct QueueFamilyIndices {
    pub main: u32,
    pub compute: Option<u32>,
    pub transfer: Option<u32>,
}

/// Picks queue families from the advertised properties.
///
/// The main family must carry graphics, compute and transfer. The async
/// compute family is any compute-capable family other than main; the
/// dedicated transfer family must not carry graphics or compute.
pub(crate) fn select_queue_families(
    families: &[vk::QueueFamilyProperties],
) -> Result<QueueFamilyIndices, DeviceError> {
    let main_flags =
        vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;

    let main = families
        .iter()
        .position(|family| family.queue_flags.contains(main_flags))
        .ok_or(DeviceError::Unsupported(
            "no queue family supports graphics, compute and transfer",
        ))? as u32;

    let compute = families
        .iter()
        .enumerate()
        .position(|(index, family)| {
            index as u32 != main && family.queue_flags.contains(vk::QueueFlags::COMPUTE)
        })
        .map(|index| index as u32);

    let transfer = families
        .iter()
        .position(|family| {
            family.queue_flags.contains(vk::QueueFlags::TRANSFER)
                && !family
                    .queue_flags
                    .intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        })
        .map(|index| index as u32);

    Ok(QueueFamilyIndices {
        main,
        compute,
        transfer,
    })
}

/// Queues retrieved from the device, addressed by role or scheduler index.
pub struct QueueSet {
    family_indices: QueueFamilyIndices,
    queues: [vk::Queue; 3],
    queue_count: u32,
}

impl QueueSet {
    pub(crate) fn new(device: &ash::Device, family_indices: QueueFamilyIndices) -> QueueSet {
        let mut queues = [vk::Queue::null(); 3];
        let mut queue_count = 0;

        queues[queue_count] = unsafe { device.get_device_queue(family_indices.main, 0) };
        queue_count += 1;

        if let Some(compute) = family_indices.compute {
            info!("async compute queue found (family {})", compute);
            queues[queue_count] = unsafe { device.get_device_queue(compute, 0) };
            queue_count += 1;
        } else {
            info!("no async compute queue, falling back to main");
        }

        if let Some(transfer) = family_indices.transfer {
            info!("dedicated transfer queue found (family {})", transfer);
            queues[queue_count] = unsafe { device.get_device_queue(transfer, 0) };
            queue_count += 1;
        } else {
            info!("no dedicated transfer queue, falling back to main");
        }

        QueueSet {
            family_indices,
            queues,
            queue_count: queue_count as u32,
        }
    }

    pub(crate) fn family_indices(&self) -> QueueFamilyIndices {
        self.family_indices
    }

    /// Number of distinct hardware queues, 1 to 3.
    pub fn queue_count(&self) -> u32 {
        self.queue_count
    }

    /// The graphics-compute-transfer queue.
    pub fn main_queue(&self) -> vk::Queue {
        self.queues[0]
    }

    /// The async compute queue, when the device has one.
    pub fn compute_queue(&self) -> Option<vk::Queue> {
        self.family_indices.compute.map(|_| self.queues[1])
    }

    /// The dedicated transfer queue, when the device has one.
    pub fn transfer_queue(&self) -> Option<vk::Queue> {
        self.family_indices.transfer?;
        let index = if self.family_indices.compute.is_some() {
            2
        } else {
            1
        };
        Some(self.queues[index])
    }

    /// Queue handle by scheduler index (0 = main).
    pub(crate) fn queue_by_index(&self, queue_idx: u32) -> vk::Queue {
        assert!(queue_idx < self.queue_count, "invalid queue index");
        self.queues[queue_idx as usize]
    }

    /// Family of the queue at a scheduler index.
    pub(crate) fn family_by_index(&self, queue_idx: u32) -> u32 {
        assert!(queue_idx < self.queue_count, "invalid queue index");

        if queue_idx == 0 {
            return self.family_indices.main;
        }

        match (self.family_indices.compute, queue_idx) {
            (Some(compute), 1) => compute,
            _ => self.family_indices.transfer.expect("queue index in range"),
        }
    }

    /// Scheduler queue indices of the roles that are present.
    pub(crate) fn layout(&self) -> QueueLayout {
        let compute = self.family_indices.compute.map(|_| 1);
        let transfer = self
            .family_indices
            .transfer
            .map(|_| if compute.is_some() { 2 } else { 1 });

        QueueLayout {
            queue_count: self.queue_count,
            compute,
            transfer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn selects_three_distinct_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];

        let indices = select_queue_families(&families).unwrap();
        assert_eq!(indices.main, 0);
        assert_eq!(indices.compute, Some(1));
        assert_eq!(indices.transfer, Some(2));
    }

    #[test]
    fn missing_roles_collapse_to_main() {
        let families = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )];

        let indices = select_queue_families(&families).unwrap();
        assert_eq!(indices.main, 0);
        assert_eq!(indices.compute, None);
        assert_eq!(indices.transfer, None);
    }

    #[test]
    fn transfer_family_must_be_transfer_only() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
        ];

        let indices = select_queue_families(&families).unwrap();
        assert_eq!(indices.transfer, None);
    }

    #[test]
    fn no_main_family_is_unsupported() {
        let families = [family(vk::QueueFlags::TRANSFER)];
        assert!(select_queue_families(&families).is_err());
    }
}
