#![allow(unsafe_code)]

//! The dedicated transfer engine.
//!
//! Data streams through two rotating staging buffers of fixed capacity, one
//! command pool per slot. Requests pack copies into the currently mapped
//! staging buffer by offset; whatever does not fit right now is deferred,
//! and oversize transfers are rejected. `submit_and_wait` runs at frame end:
//! it submits the recorded copies, flips to the other slot so the next frame
//! starts on an empty pool, waits, and fires completion callbacks.

use super::vulkan_buffer::Buffer;
use super::vulkan_command_buffer::CommandBuffer;
use super::vulkan_device::DeviceShared;
use super::vulkan_texture::Texture;
use super::vulkan_utils::{vk_access_flags, vk_image_layout, vk_pipeline_stage};
use crate::rhi::rhi_enums::{DeviceError, Filter, JobType, ResourceState, TransferError};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use log::error;
use std::sync::Arc;

/// A buffer upload processed by the transfer engine.
pub struct BufferTransfer {
    pub buffer: Arc<Buffer>,
    /// State the buffer is consumed in after the transfer.
    pub final_state: ResourceState,
    pub data: Vec<u8>,
}

/// A texture upload processed by the transfer engine.
///
/// Data is copied into mip 0; the remaining levels are either generated by
/// blitting (requires the transfers to run on a graphics-capable queue) or
/// left untouched.
pub struct TextureTransfer {
    pub texture: Arc<Texture>,
    pub final_state: ResourceState,
    pub data: Vec<u8>,
    pub gen_mips: bool,
    pub gen_mips_filter: Filter,
}

/// A batch of uploads with a completion callback.
#[derive(Default)]
pub struct TransferRequest {
    pub buffer_transfers: Vec<BufferTransfer>,
    pub texture_transfers: Vec<TextureTransfer>,
    pub callback: Option<Box<dyn FnOnce()>>,
}

/// Where a transfer of `size` bytes lands given the staging cursor.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum PackOutcome {
    /// Copy at this staging offset.
    Fits { offset: u64 },
    /// Does not fit right now; retry after the next submit.
    Defer,
    /// Larger than the whole staging buffer; never transferable.
    TooLarge,
}

pub(crate) fn pack_into_staging(cursor: u64, size: u64, capacity: u64) -> PackOutcome {
    if size > capacity {
        PackOutcome::TooLarge
    } else if cursor + size > capacity {
        PackOutcome::Defer
    } else {
        PackOutcome::Fits { offset: cursor }
    }
}

struct StagingSlot {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    pool: vk::CommandPool,
}

/// Double-buffered staging uploader bound to one queue.
pub struct TransferEngine {
    shared: Arc<DeviceShared>,
    queue: vk::Queue,
    staging_capacity: u64,
    slots: [StagingSlot; 2],
    cur_idx: usize,
    cur_cmds: Option<CommandBuffer>,
    cur_data_size: u64,
    callbacks: Vec<Box<dyn FnOnce()>>,
    pending: Vec<TransferRequest>,
}

impl TransferEngine {
    pub(crate) fn new(
        shared: Arc<DeviceShared>,
        queue: vk::Queue,
        queue_family: u32,
        staging_capacity: u64,
    ) -> Result<TransferEngine, DeviceError> {
        let mut make_slot = |slot_idx: usize| -> Result<StagingSlot, DeviceError> {
            let pool_info = vk::CommandPoolCreateInfo::builder().queue_family_index(queue_family);
            let pool = unsafe { shared.raw.create_command_pool(&pool_info, None) }
                .map_err(DeviceError::from_vk)?;
            shared.set_debug_name(pool, &format!("TransferEngine::pools[{}]", slot_idx));

            let buffer_info = vk::BufferCreateInfo::builder()
                .size(staging_capacity)
                .usage(vk::BufferUsageFlags::TRANSFER_SRC)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);

            let buffer = unsafe { shared.raw.create_buffer(&buffer_info, None) }
                .map_err(DeviceError::from_vk)?;
            shared.set_debug_name(buffer, &format!("TransferEngine::staging[{}]", slot_idx));

            let requirements = unsafe { shared.raw.get_buffer_memory_requirements(buffer) };

            let allocation = shared
                .allocate(&AllocationCreateDesc {
                    name: "transfer staging",
                    requirements,
                    location: MemoryLocation::CpuToGpu,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|err| DeviceError::AllocationFailed(err.to_string()))?;

            unsafe {
                shared
                    .raw
                    .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
            }
            .map_err(DeviceError::from_vk)?;

            Ok(StagingSlot {
                buffer,
                allocation: Some(allocation),
                pool,
            })
        };

        let slots = [make_slot(0)?, make_slot(1)?];

        let mut engine = TransferEngine {
            shared,
            queue,
            staging_capacity,
            slots,
            cur_idx: 1,
            cur_cmds: None,
            cur_data_size: 0,
            callbacks: Vec::new(),
            pending: Vec::new(),
        };

        engine.flip()?;

        Ok(engine)
    }

    /// Packs as much of the request as currently fits; the rest is deferred
    /// to the next frame. Oversize transfers fail with `StagingTooSmall`.
    pub fn request(&mut self, mut transfer: TransferRequest) {
        let mut remaining_buffers = Vec::new();
        for buffer_transfer in transfer.buffer_transfers.drain(..) {
            match self.stage_bytes(&buffer_transfer.data) {
                Ok(Some(offset)) => self.record_buffer_copy(&buffer_transfer, offset),
                Ok(None) => remaining_buffers.push(buffer_transfer),
                Err(err) => {
                    error!("dropping buffer transfer: {}", err);
                    return;
                }
            }
        }

        let mut remaining_textures = Vec::new();
        for texture_transfer in transfer.texture_transfers.drain(..) {
            match self.stage_bytes(&texture_transfer.data) {
                Ok(Some(offset)) => self.record_texture_copy(&texture_transfer, offset),
                Ok(None) => remaining_textures.push(texture_transfer),
                Err(err) => {
                    error!("dropping texture transfer: {}", err);
                    return;
                }
            }
        }

        if remaining_buffers.is_empty() && remaining_textures.is_empty() {
            if let Some(callback) = transfer.callback.take() {
                self.callbacks.push(callback);
            }
        } else {
            self.pending.push(TransferRequest {
                buffer_transfers: remaining_buffers,
                texture_transfers: remaining_textures,
                callback: transfer.callback,
            });
        }
    }

    /// Submits the recorded copies, flips the staging slot, waits for the
    /// queue and invokes completion callbacks in registration order. Pending
    /// requests are re-packed afterwards.
    pub fn submit_and_wait(&mut self) {
        if self.cur_data_size == 0 {
            return;
        }

        let cmds = match self.cur_cmds.as_mut() {
            Some(cmds) => cmds,
            None => return,
        };

        if let Err(err) = cmds.end() {
            error!("failed to end the transfer command buffer: {}", err);
            return;
        }

        let cmds_submit_info = vk::CommandBufferSubmitInfo::builder()
            .command_buffer(cmds.raw())
            .build();

        let submit_info = vk::SubmitInfo2::builder()
            .command_buffer_infos(std::slice::from_ref(&cmds_submit_info))
            .build();

        let submit_result = unsafe {
            self.shared
                .raw
                .queue_submit2(self.queue, &[submit_info], vk::Fence::null())
        };
        if let Err(result) = submit_result {
            error!("transfer submit failed: {}", result);
            return;
        }

        // Flip before blocking so the CPU does at least some work while the
        // copies run.
        if let Err(err) = self.flip() {
            error!("failed to flip the staging slot: {}", err);
        }

        unsafe {
            let _ = self.shared.raw.queue_wait_idle(self.queue);
        }

        for callback in self.callbacks.drain(..) {
            callback();
        }

        for request in std::mem::take(&mut self.pending) {
            self.request(request);
        }
    }

    /// Copies `data` into the current staging buffer. `Ok(None)` means the
    /// transfer has to wait for the next slot.
    fn stage_bytes(&mut self, data: &[u8]) -> Result<Option<u64>, TransferError> {
        let size = data.len() as u64;

        let offset = match pack_into_staging(self.cur_data_size, size, self.staging_capacity) {
            PackOutcome::TooLarge => {
                return Err(TransferError::StagingTooSmall {
                    requested: size,
                    capacity: self.staging_capacity,
                })
            }
            PackOutcome::Defer => return Ok(None),
            PackOutcome::Fits { offset } => offset,
        };

        let slot = &self.slots[self.cur_idx];
        let mapped = slot
            .allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_ptr())
            .expect("staging memory is host visible and mapped");

        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                (mapped.as_ptr() as *mut u8).add(offset as usize),
                data.len(),
            );
        }

        self.cur_data_size += size;

        Ok(Some(offset))
    }

    fn record_buffer_copy(&mut self, transfer: &BufferTransfer, offset: u64) {
        let cmds = self.cur_cmds.as_ref().expect("transfer recording active");

        let region = vk::BufferCopy2::builder()
            .src_offset(offset)
            .dst_offset(0)
            .size(transfer.data.len() as u64)
            .build();

        let copy_info = vk::CopyBufferInfo2::builder()
            .src_buffer(self.slots[self.cur_idx].buffer)
            .dst_buffer(transfer.buffer.raw())
            .regions(std::slice::from_ref(&region));

        unsafe {
            self.shared.raw.cmd_copy_buffer2(cmds.raw(), &copy_info);
        }
    }

    fn record_texture_copy(&mut self, transfer: &TextureTransfer, offset: u64) {
        let texture = &transfer.texture;
        let info = texture.info().clone();
        let raw_cmds = self.cur_cmds.as_ref().expect("transfer recording active").raw();

        /* The whole image moves to TRANSFER_DST for the copy. */
        let to_transfer_dst = vk::ImageMemoryBarrier2::builder()
            .src_stage_mask(vk::PipelineStageFlags2::TOP_OF_PIPE)
            .src_access_mask(vk::AccessFlags2::NONE)
            .dst_stage_mask(vk::PipelineStageFlags2::ALL_TRANSFER)
            .dst_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(texture.raw())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: info.mip_levels,
                base_array_layer: 0,
                layer_count: info.layer_count(),
            })
            .build();

        let dependency_info = vk::DependencyInfo::builder()
            .image_memory_barriers(std::slice::from_ref(&to_transfer_dst));

        unsafe {
            self.shared.raw.cmd_pipeline_barrier2(raw_cmds, &dependency_info);
        }

        let region = vk::BufferImageCopy2::builder()
            .buffer_offset(offset)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: info.layer_count(),
            })
            .image_extent(vk::Extent3D {
                width: info.extent.x,
                height: info.extent.y,
                depth: info.extent.z.max(1),
            })
            .build();

        let copy_info = vk::CopyBufferToImageInfo2::builder()
            .src_buffer(self.slots[self.cur_idx].buffer)
            .dst_image(texture.raw())
            .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .regions(std::slice::from_ref(&region));

        unsafe {
            self.shared.raw.cmd_copy_buffer_to_image2(raw_cmds, &copy_info);
        }

        if transfer.gen_mips && info.mip_levels > 1 {
            let cmds = self.cur_cmds.as_mut().expect("transfer recording active");
            cmds.generate_mip_levels(texture, transfer.final_state, transfer.gen_mips_filter);
        } else {
            let to_final = vk::ImageMemoryBarrier2::builder()
                .src_stage_mask(vk::PipelineStageFlags2::ALL_TRANSFER)
                .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                .dst_stage_mask(vk_pipeline_stage(JobType::Transfer, transfer.final_state))
                .dst_access_mask(vk_access_flags(transfer.final_state))
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk_image_layout(transfer.final_state))
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(texture.raw())
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: info.mip_levels,
                    base_array_layer: 0,
                    layer_count: info.layer_count(),
                })
                .build();

            let dependency_info = vk::DependencyInfo::builder()
                .image_memory_barriers(std::slice::from_ref(&to_final));

            unsafe {
                self.shared.raw.cmd_pipeline_barrier2(raw_cmds, &dependency_info);
            }
        }
    }

    fn flip(&mut self) -> Result<(), DeviceError> {
        self.cur_idx = (self.cur_idx + 1) % 2;

        unsafe {
            self.shared
                .raw
                .reset_command_pool(
                    self.slots[self.cur_idx].pool,
                    vk::CommandPoolResetFlags::empty(),
                )
                .map_err(DeviceError::from_vk)?;
        }

        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.slots[self.cur_idx].pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let raw = unsafe { self.shared.raw.allocate_command_buffers(&allocate_info) }
            .map_err(DeviceError::from_vk)?[0];

        let mut cmds = CommandBuffer::new(self.shared.clone(), raw, false);
        cmds.begin()?;

        self.cur_cmds = Some(cmds);
        self.cur_data_size = 0;

        Ok(())
    }
}

impl Drop for TransferEngine {
    fn drop(&mut self) {
        for slot in &mut self.slots {
            unsafe {
                self.shared.raw.destroy_command_pool(slot.pool, None);
            }

            if let Some(allocation) = slot.allocation.take() {
                self.shared.free_allocation(allocation);
            }

            unsafe {
                self.shared.raw.destroy_buffer(slot.buffer, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfers_pack_by_offset() {
        assert_eq!(pack_into_staging(0, 64, 256), PackOutcome::Fits { offset: 0 });
        assert_eq!(pack_into_staging(64, 64, 256), PackOutcome::Fits { offset: 64 });
        assert_eq!(
            pack_into_staging(128, 128, 256),
            PackOutcome::Fits { offset: 128 }
        );
    }

    #[test]
    fn full_staging_defers() {
        assert_eq!(pack_into_staging(200, 100, 256), PackOutcome::Defer);
        // Deferred transfers fit again once the cursor rewinds.
        assert_eq!(
            pack_into_staging(0, 100, 256),
            PackOutcome::Fits { offset: 0 }
        );
    }

    #[test]
    fn oversize_is_rejected_outright() {
        assert_eq!(pack_into_staging(0, 512, 256), PackOutcome::TooLarge);
    }
}
