#![allow(unsafe_code)]

//! Per-frame, per-queue command pools.
//!
//! The grid holds `frames_in_flight x queue_count` pools. Buffers are
//! one-shot primaries, reused across frames: resetting a frame resets its
//! pools by pool and rewinds the reuse cursors.

use super::vulkan_command_buffer::CommandBuffer;
use super::vulkan_device::DeviceShared;
use crate::rhi::rhi_enums::DeviceError;
use ash::vk;
use log::error;
use std::sync::Arc;

#[derive(Default)]
struct CommandBufferList {
    buffers: Vec<vk::CommandBuffer>,
    cursor: usize,
}

/// The command pool grid of one render graph.
pub struct CommandPool {
    shared: Arc<DeviceShared>,
    pools: Vec<vk::CommandPool>,
    lists: Vec<CommandBufferList>,
    frames_in_flight: u32,
    queue_count: u32,
}

impl CommandPool {
    pub(crate) fn new(
        shared: Arc<DeviceShared>,
        frames_in_flight: u32,
        queue_count: u32,
    ) -> Result<CommandPool, DeviceError> {
        let mut pools = Vec::with_capacity((frames_in_flight * queue_count) as usize);
        let mut lists = Vec::with_capacity(pools.capacity());

        for frame_idx in 0..frames_in_flight {
            for queue_idx in 0..queue_count {
                let pool_info = vk::CommandPoolCreateInfo::builder()
                    .queue_family_index(shared.queues.family_by_index(queue_idx));

                let pool = unsafe { shared.raw.create_command_pool(&pool_info, None) }
                    .map_err(DeviceError::from_vk)?;

                shared.set_debug_name(
                    pool,
                    &format!("CommandPool(frame={}, queue={})", frame_idx, queue_idx),
                );

                pools.push(pool);
                lists.push(CommandBufferList::default());
            }
        }

        Ok(CommandPool {
            shared,
            pools,
            lists,
            frames_in_flight,
            queue_count,
        })
    }

    fn grid_index(&self, frame_idx: u32, queue_idx: u32) -> usize {
        assert!(frame_idx < self.frames_in_flight && queue_idx < self.queue_count);
        (frame_idx * self.queue_count + queue_idx) as usize
    }

    /// Hands out the next command buffer of the slot, allocating when the
    /// reuse list is exhausted.
    pub(crate) fn allocate(
        &mut self,
        frame_idx: u32,
        queue_idx: u32,
        use_debug_labels: bool,
    ) -> Result<CommandBuffer, DeviceError> {
        let index = self.grid_index(frame_idx, queue_idx);

        if self.lists[index].cursor < self.lists[index].buffers.len() {
            let raw = self.lists[index].buffers[self.lists[index].cursor];
            self.lists[index].cursor += 1;
            return Ok(CommandBuffer::new(
                self.shared.clone(),
                raw,
                use_debug_labels,
            ));
        }

        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pools[index])
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let raw = unsafe { self.shared.raw.allocate_command_buffers(&allocate_info) }
            .map_err(DeviceError::from_vk)?[0];

        self.lists[index].buffers.push(raw);
        self.lists[index].cursor += 1;

        Ok(CommandBuffer::new(
            self.shared.clone(),
            raw,
            use_debug_labels,
        ))
    }

    /// Resets every pool of a frame slot and rewinds its reuse cursors.
    pub(crate) fn reset(&mut self, frame_idx: u32) {
        for queue_idx in 0..self.queue_count {
            let index = self.grid_index(frame_idx, queue_idx);

            let result = unsafe {
                self.shared
                    .raw
                    .reset_command_pool(self.pools[index], vk::CommandPoolResetFlags::empty())
            };
            if let Err(result) = result {
                error!(
                    "command pool reset failed (frame={}, queue={}): {}",
                    frame_idx, queue_idx, result
                );
            }

            self.lists[index].cursor = 0;
        }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        for &pool in &self.pools {
            unsafe {
                self.shared.raw.destroy_command_pool(pool, None);
            }
        }
    }
}
