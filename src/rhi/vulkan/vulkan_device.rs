#![allow(unsafe_code)]

//! The logical device and the per-frame lifecycle.

use super::vulkan_buffer::Buffer;
use super::vulkan_descriptor_manager::DescriptorManager;
use super::vulkan_instance::Instance;
use super::vulkan_pipeline::{ComputePipelineInfo, GraphicsPipelineInfo, Pipeline};
use super::vulkan_queue_set::{select_queue_families, QueueSet};
use super::vulkan_shader_module::{ShaderModule, ShaderModuleSource};
use super::vulkan_swapchain::Swapchain;
use super::vulkan_texture::Texture;
use super::vulkan_timeline_semaphore::TimelineSemaphore;
use super::vulkan_transfer_engine::{TransferEngine, TransferRequest};
use crate::rhi::context::Context;
use crate::rhi::render_graph::{QueueLayout, RenderGraph, RenderGraphBuilder};
use crate::rhi::rhi_enums::{DeviceError, ShaderError, ValidationLevel};
use crate::rhi::rhi_structs::{BufferInfo, DeviceInfo, SwapchainInfo, TextureInfo};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, Allocator, AllocatorCreateDesc};
use log::error;
use std::ffi::CString;
use std::sync::{Arc, Mutex};

/// Upper bound on render graphs executed within one frame; used to lay out
/// the values of the process-wide render-graph timeline semaphore.
pub const MAX_RENDER_GRAPHS_PER_FRAME: u64 = 16;

/// Staging capacity of the dedicated transfer engine.
const TRANSFER_STAGING_CAPACITY: u64 = 128 * 1024 * 1024;

/// Device state shared with every object the device creates.
///
/// Resources hold an `Arc` of this so that their destructors can reach the
/// allocator and the bindless table; the raw device outlives every resource
/// by construction.
pub struct DeviceShared {
    pub(crate) raw: ash::Device,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) queues: QueueSet,
    pub(crate) descriptors: DescriptorManager,
    pub(crate) debug_utils: Option<ash::extensions::ext::DebugUtils>,
    pub(crate) surface_loader: ash::extensions::khr::Surface,
    pub(crate) swapchain_loader: ash::extensions::khr::Swapchain,
    pub(crate) debug_enabled: bool,
    allocator: Mutex<Option<Allocator>>,
}

impl DeviceShared {
    pub(crate) fn allocate(
        &self,
        desc: &AllocationCreateDesc<'_>,
    ) -> Result<Allocation, gpu_allocator::AllocationError> {
        self.allocator
            .lock()
            .unwrap()
            .as_mut()
            .expect("allocator outlives every resource")
            .allocate(desc)
    }

    pub(crate) fn free_allocation(&self, allocation: Allocation) {
        if let Some(allocator) = self.allocator.lock().unwrap().as_mut() {
            let _ = allocator.free(allocation);
        }
    }

    /// Names an object in captures and validation messages. No-op without
    /// debug utils.
    pub(crate) fn set_debug_name<T: vk::Handle>(&self, handle: T, name: &str) {
        let debug_utils = match &self.debug_utils {
            Some(debug_utils) => debug_utils,
            None => return,
        };

        let name = match CString::new(name) {
            Ok(name) => name,
            Err(_) => return,
        };

        let name_info = vk::DebugUtilsObjectNameInfoEXT::builder()
            .object_type(T::TYPE)
            .object_handle(handle.as_raw())
            .object_name(&name);

        unsafe {
            let _ = debug_utils.set_debug_utils_object_name(self.raw.handle(), &name_info);
        }
    }
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        unsafe {
            let _ = self.raw.device_wait_idle();
        }

        self.descriptors.destroy();

        // The allocator must release its memory before the device goes away.
        drop(self.allocator.lock().unwrap().take());

        unsafe {
            self.raw.destroy_device(None);
        }
    }
}

struct FrameSync {
    fence_render_finished: vk::Fence,
    semaphore_render_finished: vk::Semaphore,
    semaphore_swapchain_acquire: vk::Semaphore,
}

/// The logical device: owns the queues, the allocator, the bindless table
/// and the transfer engine, and drives the frame lifecycle.
pub struct Device {
    shared: Arc<DeviceShared>,
    info: DeviceInfo,
    frames_in_flight: u32,
    frame_sync: Vec<FrameSync>,
    render_graph_semaphore: TimelineSemaphore,
    transfer_engine: TransferEngine,
    current_frame_idx: u32,
    current_absolute_frame: u64,
    current_graph_idx: u64,
    current_swapchain_image_idx: u32,
    swapchain_frame: bool,
}

impl Device {
    pub(crate) fn new(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        info: DeviceInfo,
        frames_in_flight: u32,
    ) -> Result<Device, DeviceError> {
        assert!(frames_in_flight > 0, "at least one frame in flight");

        let queue_families = unsafe {
            instance
                .raw()
                .get_physical_device_queue_family_properties(physical_device)
        };
        let family_indices = select_queue_families(&queue_families)?;

        let queue_priority = [1.0f32];
        let mut queue_create_infos = vec![vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(family_indices.main)
            .queue_priorities(&queue_priority)
            .build()];

        if let Some(compute) = family_indices.compute {
            queue_create_infos.push(
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(compute)
                    .queue_priorities(&queue_priority)
                    .build(),
            );
        }

        if let Some(transfer) = family_indices.transfer {
            queue_create_infos.push(
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(transfer)
                    .queue_priorities(&queue_priority)
                    .build(),
            );
        }

        let features = vk::PhysicalDeviceFeatures::builder()
            .sampler_anisotropy(true)
            .shader_int64(true)
            .multi_draw_indirect(true)
            .draw_indirect_first_instance(true);

        let mut vulkan12 = vk::PhysicalDeviceVulkan12Features::builder()
            .timeline_semaphore(true)
            .runtime_descriptor_array(true)
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_uniform_buffer_update_after_bind(true)
            .descriptor_binding_storage_buffer_update_after_bind(true)
            .descriptor_binding_storage_image_update_after_bind(true)
            .descriptor_binding_sampled_image_update_after_bind(true)
            .shader_uniform_buffer_array_non_uniform_indexing(true)
            .shader_storage_buffer_array_non_uniform_indexing(true);

        let mut vulkan13 = vk::PhysicalDeviceVulkan13Features::builder()
            .synchronization2(true)
            .dynamic_rendering(true);

        let extensions = [ash::extensions::khr::Swapchain::name().as_ptr()];

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features)
            .push_next(&mut vulkan12)
            .push_next(&mut vulkan13);

        let raw = unsafe {
            instance
                .raw()
                .create_device(physical_device, &create_info, None)
        }
        .map_err(DeviceError::from_vk)?;

        let queues = QueueSet::new(&raw, family_indices);

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.raw().clone(),
            device: raw.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|err| DeviceError::AllocationFailed(err.to_string()))?;

        let descriptors = DescriptorManager::new(raw.clone())?;

        let surface_loader = ash::extensions::khr::Surface::new(instance.entry(), instance.raw());
        let swapchain_loader = ash::extensions::khr::Swapchain::new(instance.raw(), &raw);

        let shared = Arc::new(DeviceShared {
            raw,
            physical_device,
            queues,
            descriptors,
            debug_utils: instance.debug_utils().cloned(),
            surface_loader,
            swapchain_loader,
            debug_enabled: instance.validation() != ValidationLevel::None,
            allocator: Mutex::new(Some(allocator)),
        });

        let frame_sync = Self::create_frame_sync(&shared, frames_in_flight)?;

        let render_graph_semaphore =
            TimelineSemaphore::new(shared.clone(), MAX_RENDER_GRAPHS_PER_FRAME + 1)?;
        shared.set_debug_name(
            render_graph_semaphore.raw(),
            "Device::render_graph_semaphore",
        );

        let (transfer_queue, transfer_family) = match (
            shared.queues.transfer_queue(),
            shared.queues.family_indices().transfer,
        ) {
            (Some(queue), Some(family)) => (queue, family),
            _ => (
                shared.queues.main_queue(),
                shared.queues.family_indices().main,
            ),
        };

        let transfer_engine = TransferEngine::new(
            shared.clone(),
            transfer_queue,
            transfer_family,
            TRANSFER_STAGING_CAPACITY,
        )?;

        Ok(Device {
            shared,
            info,
            frames_in_flight,
            frame_sync,
            render_graph_semaphore,
            transfer_engine,
            current_frame_idx: 0,
            current_absolute_frame: 0,
            current_graph_idx: 0,
            current_swapchain_image_idx: 0,
            swapchain_frame: false,
        })
    }

    /// The adapter info the device was created from.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn frames_in_flight(&self) -> u32 {
        self.frames_in_flight
    }

    /// Current frame-in-flight slot, `0..frames_in_flight`.
    pub fn current_frame(&self) -> u32 {
        self.current_frame_idx
    }

    /// Monotonic frame counter, never wrapping.
    pub fn current_absolute_frame(&self) -> u64 {
        self.current_absolute_frame
    }

    /// Blocks until all pending device work finished.
    pub fn wait_idle(&self) {
        unsafe {
            let _ = self.shared.raw.device_wait_idle();
        }
    }

    pub(crate) fn shared(&self) -> Arc<DeviceShared> {
        self.shared.clone()
    }

    pub(crate) fn queue_layout(&self) -> QueueLayout {
        self.shared.queues.layout()
    }

    /// Begins a frame targeting `swapchain`.
    ///
    /// Waits on the slot's in-flight fence and acquires the next swapchain
    /// image. Returns `Ok(None)` when the swapchain is out of date: nothing
    /// was acquired, the fence stays signaled and the caller recreates the
    /// swapchain before the next attempt.
    pub fn begin_frame(&mut self, swapchain: &mut Swapchain) -> Result<Option<u32>, DeviceError> {
        let fence = self.frame_sync[self.current_frame_idx as usize].fence_render_finished;
        let acquire_semaphore =
            self.frame_sync[self.current_frame_idx as usize].semaphore_swapchain_acquire;

        unsafe {
            self.shared
                .raw
                .wait_for_fences(&[fence], true, u64::MAX)
                .map_err(DeviceError::from_vk)?;
        }

        let texture_idx = match swapchain.acquire_next(acquire_semaphore) {
            Some(texture_idx) => texture_idx,
            None => {
                // The fence stays signaled: no work is submitted this frame
                // and the next begin_frame must not deadlock on it.
                self.increment_frame();
                self.wait_idle();
                return Ok(None);
            }
        };

        unsafe {
            self.shared
                .raw
                .reset_fences(&[fence])
                .map_err(DeviceError::from_vk)?;
        }

        self.current_swapchain_image_idx = texture_idx;
        self.current_graph_idx = 0;
        self.swapchain_frame = true;

        Ok(Some(texture_idx))
    }

    /// Ends the frame begun with [`begin_frame`](Device::begin_frame) and
    /// presents. Returns `Ok(false)` when the swapchain went out of date or
    /// suboptimal and needs a recreate.
    ///
    /// A successful call advances the transfer engine (submit and wait) and
    /// increments the frame counter.
    pub fn end_frame(&mut self, swapchain: &mut Swapchain) -> Result<bool, DeviceError> {
        assert!(self.swapchain_frame, "end_frame without begin_frame");

        self.submit_frame_fence()?;

        let frame_sync = &self.frame_sync[self.current_frame_idx as usize];

        let swapchains = [swapchain.raw()];
        let wait_semaphores = [frame_sync.semaphore_render_finished];
        let image_indices = [self.current_swapchain_image_idx];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let present_result = unsafe {
            self.shared
                .swapchain_loader
                .queue_present(self.shared.queues.main_queue(), &present_info)
        };

        let valid = match present_result {
            Ok(false) => true,
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.wait_idle();
                false
            }
            Err(result) => return Err(DeviceError::from_vk(result)),
        };

        self.swapchain_frame = false;
        self.increment_frame();

        self.transfer_engine.submit_and_wait();

        Ok(valid)
    }

    /// Begins a frame without a swapchain: fence-gated like a windowed frame
    /// but with no acquire.
    pub fn begin_offscreen_frame(&mut self) -> Result<(), DeviceError> {
        let frame_sync = &self.frame_sync[self.current_frame_idx as usize];

        unsafe {
            self.shared
                .raw
                .wait_for_fences(&[frame_sync.fence_render_finished], true, u64::MAX)
                .map_err(DeviceError::from_vk)?;
            self.shared
                .raw
                .reset_fences(&[frame_sync.fence_render_finished])
                .map_err(DeviceError::from_vk)?;
        }

        self.current_graph_idx = 0;
        self.swapchain_frame = false;

        Ok(())
    }

    /// Ends an offscreen frame: signals the slot fence, advances the
    /// transfer engine and increments the frame counter.
    pub fn end_offscreen_frame(&mut self) -> Result<(), DeviceError> {
        self.submit_frame_fence()?;
        self.increment_frame();
        self.transfer_engine.submit_and_wait();
        Ok(())
    }

    /// Executes one compiled render graph, chaining it after any graph that
    /// already ran this frame.
    ///
    /// The first graph of a windowed frame waits on the acquire semaphore;
    /// later graphs wait on the previous graph's value of the process-wide
    /// render-graph timeline semaphore.
    pub fn execute_consecutive(&mut self, render_graph: &mut RenderGraph, context: &mut Context) {
        assert!(
            self.current_graph_idx + 1 < MAX_RENDER_GRAPHS_PER_FRAME,
            "render graph per-frame limit of {} exceeded",
            MAX_RENDER_GRAPHS_PER_FRAME
        );

        let frame_sync = &self.frame_sync[self.current_frame_idx as usize];
        let first_graph = self.current_graph_idx == 0;

        let (wait_semaphore, wait_value) = if first_graph {
            if self.swapchain_frame {
                (frame_sync.semaphore_swapchain_acquire, 0)
            } else {
                (vk::Semaphore::null(), 0)
            }
        } else {
            (
                self.render_graph_semaphore.raw(),
                self.render_graph_semaphore_value(self.current_graph_idx),
            )
        };

        self.current_graph_idx += 1;
        let signal_value = self.render_graph_semaphore_value(self.current_graph_idx);

        render_graph.execute(
            context,
            wait_semaphore,
            wait_value,
            self.render_graph_semaphore.raw(),
            signal_value,
            self.current_frame_idx,
            self.current_absolute_frame,
        );
    }

    /// Enqueues staging copies on the dedicated transfer engine; they run at
    /// the next frame boundary.
    pub fn request_dedicated_transfer(&mut self, transfer: TransferRequest) {
        self.transfer_engine.request(transfer);
    }

    /// A builder for a render graph executed by this device.
    pub fn new_render_graph_builder(&self) -> RenderGraphBuilder {
        RenderGraphBuilder::new()
    }

    pub fn create_swapchain(&self, info: SwapchainInfo) -> Result<Swapchain, DeviceError> {
        Swapchain::new(self.shared.clone(), info)
    }

    pub fn create_texture(&self, info: TextureInfo) -> Result<Arc<Texture>, DeviceError> {
        Texture::new(self.shared.clone(), info)
    }

    pub fn create_buffer(&self, info: BufferInfo) -> Result<Arc<Buffer>, DeviceError> {
        Buffer::new(self.shared.clone(), info)
    }

    pub fn create_shader_module(
        &self,
        source: &ShaderModuleSource,
    ) -> Result<ShaderModule, ShaderError> {
        ShaderModule::new(self.shared.clone(), source)
    }

    pub fn create_graphics_pipeline(
        &self,
        info: &GraphicsPipelineInfo<'_>,
    ) -> Result<Pipeline, ShaderError> {
        Pipeline::new_graphics(self.shared.clone(), info)
    }

    pub fn create_compute_pipeline(
        &self,
        info: &ComputePipelineInfo<'_>,
    ) -> Result<Pipeline, ShaderError> {
        Pipeline::new_compute(self.shared.clone(), info)
    }

    /// Submits the end-of-frame no-op that waits for the last render graph,
    /// signals the render-finished semaphore and the in-flight fence.
    ///
    /// Runs even for empty frames so the slot fence is always re-signaled.
    fn submit_frame_fence(&mut self) -> Result<(), DeviceError> {
        let frame_sync = &self.frame_sync[self.current_frame_idx as usize];
        let empty_frame = self.current_graph_idx == 0;

        let mut wait_semaphores = Vec::with_capacity(1);
        if !empty_frame {
            wait_semaphores.push(
                vk::SemaphoreSubmitInfo::builder()
                    .semaphore(self.render_graph_semaphore.raw())
                    .value(self.render_graph_semaphore_value(self.current_graph_idx))
                    .stage_mask(vk::PipelineStageFlags2::TOP_OF_PIPE)
                    .build(),
            );
        }

        let signal_semaphores = [vk::SemaphoreSubmitInfo::builder()
            .semaphore(frame_sync.semaphore_render_finished)
            .stage_mask(vk::PipelineStageFlags2::BOTTOM_OF_PIPE)
            .build()];

        let submit_info = vk::SubmitInfo2::builder()
            .wait_semaphore_infos(&wait_semaphores)
            .signal_semaphore_infos(&signal_semaphores)
            .build();

        unsafe {
            self.shared
                .raw
                .queue_submit2(
                    self.shared.queues.main_queue(),
                    &[submit_info],
                    frame_sync.fence_render_finished,
                )
                .map_err(DeviceError::from_vk)
        }
    }

    /// Timeline value of the `graph_idx`-th graph of the current frame:
    /// `absolute_frame * (K + 1) + graph_idx`, `K` the per-frame graph cap.
    fn render_graph_semaphore_value(&self, graph_idx: u64) -> u64 {
        self.render_graph_semaphore
            .time_point(self.current_absolute_frame, graph_idx)
    }

    fn increment_frame(&mut self) {
        self.current_frame_idx = (self.current_frame_idx + 1) % self.frames_in_flight;
        self.current_absolute_frame += 1;
    }

    fn create_frame_sync(
        shared: &Arc<DeviceShared>,
        frames_in_flight: u32,
    ) -> Result<Vec<FrameSync>, DeviceError> {
        let mut frame_sync = Vec::with_capacity(frames_in_flight as usize);

        for frame_idx in 0..frames_in_flight {
            let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
            let semaphore_info = vk::SemaphoreCreateInfo::builder();

            let sync = unsafe {
                FrameSync {
                    fence_render_finished: shared
                        .raw
                        .create_fence(&fence_info, None)
                        .map_err(DeviceError::from_vk)?,
                    semaphore_render_finished: shared
                        .raw
                        .create_semaphore(&semaphore_info, None)
                        .map_err(DeviceError::from_vk)?,
                    semaphore_swapchain_acquire: shared
                        .raw
                        .create_semaphore(&semaphore_info, None)
                        .map_err(DeviceError::from_vk)?,
                }
            };

            shared.set_debug_name(
                sync.fence_render_finished,
                &format!("Device::frame_sync[{}].fence_render_finished", frame_idx),
            );
            shared.set_debug_name(
                sync.semaphore_render_finished,
                &format!("Device::frame_sync[{}].semaphore_render_finished", frame_idx),
            );
            shared.set_debug_name(
                sync.semaphore_swapchain_acquire,
                &format!(
                    "Device::frame_sync[{}].semaphore_swapchain_acquire",
                    frame_idx
                ),
            );

            frame_sync.push(sync);
        }

        Ok(frame_sync)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.wait_idle();

        for sync in self.frame_sync.drain(..) {
            unsafe {
                self.shared
                    .raw
                    .destroy_fence(sync.fence_render_finished, None);
                self.shared
                    .raw
                    .destroy_semaphore(sync.semaphore_render_finished, None);
                self.shared
                    .raw
                    .destroy_semaphore(sync.semaphore_swapchain_acquire, None);
            }
        }

        // Transfer engine and render-graph semaphore hold one reference each
        // beyond ours.
        if Arc::strong_count(&self.shared) > 3 {
            error!("device dropped while resources are still alive");
        }
    }
}
