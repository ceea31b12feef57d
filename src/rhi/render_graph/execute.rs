#![allow(unsafe_code)]

//! Transient resolution, barrier linking and per-frame execution.

use super::super::context::Context;
use super::super::dag::NodeHandle;
use super::super::rhi_enums::JobType;
use super::super::version_registry::ResourceId;
use super::super::vulkan::vulkan_utils::{vk_attachment_load, vk_attachment_store};
use super::super::vulkan::{Buffer, CommandBuffer, DeviceShared, Texture, TimelineSemaphore};
use super::schedule::Submission;
use super::{RenderGraph, RenderResource, TextureSlot};
use ash::vk;
use cgmath::Vector4;
use log::error;
use std::sync::Arc;

/// A planned image barrier bound to its current concrete image.
#[derive(Clone, Copy)]
pub(crate) struct ImageLink {
    pub image: vk::Image,
    pub range: vk::ImageSubresourceRange,
}

/// A planned buffer barrier bound to its current concrete buffer.
#[derive(Clone, Copy)]
pub(crate) struct BufferLink {
    pub buffer: vk::Buffer,
    pub size: u64,
}

/// One attachment bound to its current image view.
#[derive(Clone, Copy)]
pub(crate) struct AttachmentLink {
    pub view: vk::ImageView,
    pub resolve_view: Option<vk::ImageView>,
    pub load: vk::AttachmentLoadOp,
    pub store: vk::AttachmentStoreOp,
    pub clear: vk::ClearValue,
    pub is_depth: bool,
}

/// A render pass's attachments bound to current resources.
#[derive(Clone, Default)]
pub(crate) struct RenderPassLink {
    pub colors: Vec<AttachmentLink>,
    pub depth_stencil: Option<AttachmentLink>,
    pub extent: vk::Extent2D,
    pub samples: u8,
}

/// The plan's barrier and attachment slots bound to concrete resources.
/// Rebuilt whenever a transient is recreated or an import is rebound.
#[derive(Default)]
pub(crate) struct LinkedResources {
    pub image: Vec<Option<ImageLink>>,
    pub buffer: Vec<Option<BufferLink>>,
    pub render_passes: Vec<RenderPassLink>,
}

/// Debug label colors per node type: render pass amber, compute green,
/// transfer cyan.
fn debug_label_color(job_type: JobType) -> Vector4<f32> {
    match job_type {
        JobType::RenderPass => Vector4::new(1.0, 0.757, 0.145, 1.0),
        JobType::Compute => Vector4::new(0.4, 0.804, 0.0, 1.0),
        JobType::Transfer => Vector4::new(0.0, 0.81, 0.82, 1.0),
    }
}

impl RenderGraph {
    /// Walks every dependent transient-texture attribute, copying the value
    /// currently observed on its dependency. Recreates textures whose
    /// attributes drifted (or everything on `force_recreate_resources`) and
    /// re-registers their declared views. Returns whether anything changed.
    pub(crate) fn update_dependent_resource_values(&mut self) -> bool {
        let shared = match &self.shared {
            Some(shared) => shared.clone(),
            None => return false,
        };

        let mut changed_any = false;

        let ids: Vec<ResourceId> = self.transient_texture_infos.keys().copied().collect();
        for id in ids {
            let mut changed = false;

            /* Resolve each dependent attribute against the registry. */
            {
                let lookup = |version| match self.registry.resource_by_version(version) {
                    RenderResource::Texture(slot) => Some(slot.texture.info().clone()),
                    _ => None,
                };

                let observed_format = self.transient_texture_infos[&id]
                    .format
                    .dependency()
                    .and_then(lookup);
                let observed_extent = self.transient_texture_infos[&id]
                    .extent
                    .dependency()
                    .and_then(lookup);
                let observed_mips = self.transient_texture_infos[&id]
                    .mip_levels
                    .dependency()
                    .and_then(lookup);
                let observed_samples = self.transient_texture_infos[&id]
                    .samples
                    .dependency()
                    .and_then(lookup);

                let info = self.transient_texture_infos.get_mut(&id).unwrap();

                if let Some(observed) = observed_format {
                    changed |= info.format.update_dependent_value(observed.format);
                }
                if let Some(observed) = observed_extent {
                    changed |= info.extent.update_dependent_value(observed.extent);
                }
                if let Some(observed) = observed_mips {
                    changed |= info.mip_levels.update_dependent_value(observed.mip_levels);
                }
                if let Some(observed) = observed_samples {
                    changed |= info.samples.update_dependent_value(observed.samples);
                }
            }

            let missing = !self.transient_textures.contains_key(&id);
            if changed || missing || self.force_recreate_resources {
                let resolved = self.transient_texture_infos[&id].resolved();

                match Texture::new(shared.clone(), resolved) {
                    Ok(texture) => {
                        if let Some(views) = self.transient_texture_views.get(&id) {
                            for view in views {
                                if let Err(err) = texture.create_view(*view) {
                                    error!("failed to recreate a transient view: {}", err);
                                }
                            }
                        }

                        self.registry.update_resource(
                            id,
                            RenderResource::Texture(TextureSlot {
                                texture: texture.clone(),
                                view: 0,
                            }),
                        );
                        self.transient_textures.insert(id, texture);
                    }
                    Err(err) => error!("failed to create a transient texture: {}", err),
                }
            }

            changed_any |= changed;
        }

        changed_any
    }

    /// Recreates every transient buffer and rebinds its registry slot.
    pub(crate) fn recreate_transient_buffers(&mut self) {
        let shared = match &self.shared {
            Some(shared) => shared.clone(),
            None => return,
        };

        let ids: Vec<ResourceId> = self.transient_buffer_infos.keys().copied().collect();
        for id in ids {
            let info = self.transient_buffer_infos[&id].clone();

            match Buffer::new(shared.clone(), info) {
                Ok(buffer) => {
                    self.registry
                        .update_resource(id, RenderResource::Buffer(buffer.clone()));
                    self.transient_buffers.insert(id, buffer);
                }
                Err(err) => error!("failed to create a transient buffer: {}", err),
            }
        }
    }

    /// Binds planned barriers and attachments to the concrete resources the
    /// registry currently holds.
    pub(crate) fn link_resources(&mut self) {
        let mut linked = LinkedResources::default();

        for barrier in &self.barriers.image_barriers {
            let link = match self.registry.resource_by_id(barrier.resource) {
                RenderResource::Texture(slot) => Some(ImageLink {
                    image: slot.texture.raw(),
                    range: slot.texture.view_subresource_range(slot.view),
                }),
                _ => {
                    error!(
                        "image barrier references resource {} with no texture bound",
                        barrier.resource
                    );
                    None
                }
            };
            linked.image.push(link);
        }

        for barrier in &self.barriers.buffer_barriers {
            let link = match self.registry.resource_by_id(barrier.resource) {
                RenderResource::Buffer(buffer) => Some(BufferLink {
                    buffer: buffer.raw(),
                    size: buffer.info().size,
                }),
                _ => {
                    error!(
                        "buffer barrier references resource {} with no buffer bound",
                        barrier.resource
                    );
                    None
                }
            };
            linked.buffer.push(link);
        }

        for plan in &self.render_passes {
            let mut link = RenderPassLink::default();
            let mut expected: Option<(vk::Extent2D, u8)> = None;

            let mut bind_attachment = |version, load, store, is_depth: bool| {
                let slot = match self.registry.resource_by_version(version) {
                    RenderResource::Texture(slot) => slot.clone(),
                    _ => {
                        error!("attachment version {} has no texture bound", version);
                        return None;
                    }
                };

                let info = slot.texture.info();
                let extent = vk::Extent2D {
                    width: info.extent.x,
                    height: info.extent.y,
                };

                match expected {
                    None => expected = Some((extent, info.samples)),
                    Some((first_extent, first_samples)) => {
                        if first_extent != extent || first_samples != info.samples {
                            error!(
                                "attachment extents or sample counts diverged on texture '{}'",
                                info.name
                            );
                        }
                    }
                }

                let clear = if is_depth {
                    vk::ClearValue {
                        depth_stencil: vk::ClearDepthStencilValue {
                            depth: 1.0,
                            stencil: 0,
                        },
                    }
                } else {
                    vk::ClearValue {
                        color: vk::ClearColorValue {
                            float32: [0.0, 0.0, 0.0, 0.0],
                        },
                    }
                };

                Some(AttachmentLink {
                    view: slot.texture.vk_view(slot.view),
                    resolve_view: None,
                    load: vk_attachment_load(load),
                    store: vk_attachment_store(store),
                    clear,
                    is_depth,
                })
            };

            for (color_idx, color) in plan.colors.iter().enumerate() {
                let mut attachment =
                    match bind_attachment(color.version, color.load, color.store, false) {
                        Some(attachment) => attachment,
                        None => continue,
                    };

                if let Some(resolve_version) = plan.resolves[color_idx] {
                    attachment.resolve_view =
                        match self.registry.resource_by_version(resolve_version) {
                            RenderResource::Texture(slot) => {
                                Some(slot.texture.vk_view(slot.view))
                            }
                            _ => {
                                error!(
                                    "resolve attachment version {} has no texture bound",
                                    resolve_version
                                );
                                None
                            }
                        };
                }

                link.colors.push(attachment);
            }

            if let Some(depth) = plan.depth_stencil {
                link.depth_stencil = bind_attachment(depth.version, depth.load, depth.store, true);
            }

            if let Some((extent, samples)) = expected {
                link.extent = extent;
                link.samples = samples;
            }

            linked.render_passes.push(link);
        }

        self.linked = linked;
    }

    /// Executes the compiled graph for one frame.
    ///
    /// `wait`/`signal` connect the graph into the device's frame chain; they
    /// apply to the first and last submission of the main queue.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn execute(
        &mut self,
        context: &mut Context,
        wait: vk::Semaphore,
        wait_value: u64,
        signal: vk::Semaphore,
        signal_value: u64,
        frame_idx: u32,
        absolute_frame: u64,
    ) {
        if self.first_execute {
            self.update_dependent_resource_values();
            self.recreate_transient_buffers();
            self.link_resources();

            self.first_execute = false;
            self.dirty = false;
            self.force_recreate_resources = false;
        } else if self.dirty || self.force_recreate_resources {
            if self.update_dependent_resource_values() || self.force_recreate_resources {
                self.recreate_transient_buffers();
            }
            self.link_resources();

            self.dirty = false;
            self.force_recreate_resources = false;
        }

        let shared = match &self.shared {
            Some(shared) => shared.clone(),
            None => {
                error!("render graph '{}' executed before compilation", self.name);
                return;
            }
        };

        let mut command_pool = match self.command_pool.take() {
            Some(pool) => pool,
            None => {
                error!("render graph '{}' has no command pool", self.name);
                return;
            }
        };
        command_pool.reset(frame_idx);

        for queue in 0..self.schedule.queue_count {
            let nodes = self.schedule.nodes_per_queue[queue as usize].clone();
            let submissions = self.schedule.submissions_per_queue[queue as usize].clone();
            if submissions.is_empty() {
                continue;
            }

            let vk_queue = shared.queues.queue_by_index(queue);
            let mut submission_idx = 0usize;
            let mut cmds: Option<CommandBuffer> = None;

            for &handle in &nodes {
                let level = self.order.depths[handle as usize];

                if level > submissions[submission_idx].level {
                    if let Some(finished) = cmds.take() {
                        self.submit_commands(
                            finished,
                            vk_queue,
                            queue,
                            submission_idx,
                            &submissions,
                            wait,
                            wait_value,
                            signal,
                            signal_value,
                            absolute_frame,
                        );
                    }
                    submission_idx += 1;
                }

                if cmds.is_none() {
                    match command_pool.allocate(frame_idx, queue, shared.debug_enabled) {
                        Ok(mut new_cmds) => {
                            if let Err(err) = new_cmds.begin() {
                                error!("failed to begin a command buffer: {}", err);
                                continue;
                            }
                            cmds = Some(new_cmds);
                        }
                        Err(err) => {
                            error!("failed to allocate a command buffer: {}", err);
                            continue;
                        }
                    }
                }

                let recording = cmds.as_mut().unwrap();
                self.record_node(recording, context, handle, &shared);
            }

            if submission_idx < submissions.len() {
                if let Some(finished) = cmds.take() {
                    self.submit_commands(
                        finished,
                        vk_queue,
                        queue,
                        submission_idx,
                        &submissions,
                        wait,
                        wait_value,
                        signal,
                        signal_value,
                        absolute_frame,
                    );
                }
            }
        }

        self.command_pool = Some(command_pool);
    }

    fn record_node(
        &mut self,
        cmds: &mut CommandBuffer,
        context: &mut Context,
        handle: NodeHandle,
        shared: &Arc<DeviceShared>,
    ) {
        let node = self.dag.node(handle);
        let name = node.name.clone();
        let job_type = node.job_type;
        let capabilities = node.capabilities;
        let ranges = self.barriers.per_node[handle as usize];

        cmds.set_capabilities(capabilities);
        cmds.begin_debug_label(&name, debug_label_color(job_type));

        /* In-barriers. */
        let mut image_barriers = Vec::new();
        for idx in ranges.in_image.begin..ranges.in_image.begin + ranges.in_image.count {
            let barrier = self.barriers.image_barriers[idx as usize];
            if let Some(link) = self.linked.image[idx as usize] {
                image_barriers.push(
                    vk::ImageMemoryBarrier2::builder()
                        .src_stage_mask(barrier.src_stage)
                        .src_access_mask(barrier.src_access)
                        .dst_stage_mask(barrier.dst_stage)
                        .dst_access_mask(barrier.dst_access)
                        .old_layout(barrier.old_layout)
                        .new_layout(barrier.new_layout)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .image(link.image)
                        .subresource_range(link.range)
                        .build(),
                );
            }
        }

        let mut buffer_barriers = Vec::new();
        for idx in ranges.in_buffer.begin..ranges.in_buffer.begin + ranges.in_buffer.count {
            let barrier = self.barriers.buffer_barriers[idx as usize];
            if let Some(link) = self.linked.buffer[idx as usize] {
                buffer_barriers.push(
                    vk::BufferMemoryBarrier2::builder()
                        .src_stage_mask(barrier.src_stage)
                        .src_access_mask(barrier.src_access)
                        .dst_stage_mask(barrier.dst_stage)
                        .dst_access_mask(barrier.dst_access)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .buffer(link.buffer)
                        .offset(0)
                        .size(link.size)
                        .build(),
                );
            }
        }

        if !image_barriers.is_empty() || !buffer_barriers.is_empty() {
            let dependency_info = vk::DependencyInfo::builder()
                .image_memory_barriers(&image_barriers)
                .buffer_memory_barriers(&buffer_barriers);

            unsafe {
                shared.raw.cmd_pipeline_barrier2(cmds.raw(), &dependency_info);
            }
        }

        /* Pack barriers, expanded over the membership right now. */
        let mut pack_barriers = Vec::new();
        for idx in ranges.in_pack.begin..ranges.in_pack.begin + ranges.in_pack.count {
            let barrier = self.barriers.pack_barriers[idx as usize];
            if let RenderResource::BufferPack(pack) = self.registry.resource_by_id(barrier.resource)
            {
                for buffer in pack.snapshot() {
                    pack_barriers.push(
                        vk::BufferMemoryBarrier2::builder()
                            .src_stage_mask(barrier.src_stage)
                            .src_access_mask(barrier.src_access)
                            .dst_stage_mask(barrier.dst_stage)
                            .dst_access_mask(barrier.dst_access)
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .buffer(buffer.raw())
                            .offset(0)
                            .size(vk::WHOLE_SIZE)
                            .build(),
                    );
                }
            }
        }

        if !pack_barriers.is_empty() {
            let dependency_info =
                vk::DependencyInfo::builder().buffer_memory_barriers(&pack_barriers);

            unsafe {
                shared.raw.cmd_pipeline_barrier2(cmds.raw(), &dependency_info);
            }
        }

        /* Dynamic rendering around render-pass jobs. */
        let render_pass_idx = self.node_render_pass[handle as usize];

        if let Some(render_pass_idx) = render_pass_idx {
            let link = &self.linked.render_passes[render_pass_idx as usize];

            let color_attachments: Vec<_> = link
                .colors
                .iter()
                .map(|attachment| {
                    let mut builder = vk::RenderingAttachmentInfo::builder()
                        .image_view(attachment.view)
                        .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                        .load_op(attachment.load)
                        .store_op(attachment.store)
                        .clear_value(attachment.clear);

                    if let Some(resolve_view) = attachment.resolve_view {
                        builder = builder
                            .resolve_mode(vk::ResolveModeFlags::AVERAGE)
                            .resolve_image_view(resolve_view)
                            .resolve_image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
                    }

                    builder.build()
                })
                .collect();

            let render_area = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: link.extent,
            };

            let mut rendering_info = vk::RenderingInfo::builder()
                .render_area(render_area)
                .layer_count(1)
                .color_attachments(&color_attachments);

            let depth_attachment;
            if let Some(depth) = &link.depth_stencil {
                depth_attachment = vk::RenderingAttachmentInfo::builder()
                    .image_view(depth.view)
                    .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                    .load_op(depth.load)
                    .store_op(depth.store)
                    .clear_value(depth.clear)
                    .build();
                rendering_info = rendering_info.depth_attachment(&depth_attachment);
            }

            unsafe {
                shared.raw.cmd_begin_rendering(cmds.raw(), &rendering_info);
            }

            /* Viewport covering the render area, height negated to keep the
             * y-up clip-space convention; scissor equals the render area. */
            let viewport = vk::Viewport {
                x: 0.0,
                y: link.extent.height as f32,
                width: link.extent.width as f32,
                height: -(link.extent.height as f32),
                min_depth: 0.0,
                max_depth: 1.0,
            };

            unsafe {
                shared.raw.cmd_set_viewport(cmds.raw(), 0, &[viewport]);
                shared.raw.cmd_set_scissor(cmds.raw(), 0, &[render_area]);
            }
        }

        /* The job, taken out for the call so it can borrow the graph. */
        let mut job = self.jobs[handle as usize].take();
        if let Some(job) = job.as_mut() {
            job(self, context, cmds);
        }
        self.jobs[handle as usize] = job;

        if render_pass_idx.is_some() {
            unsafe {
                shared.raw.cmd_end_rendering(cmds.raw());
            }
        }

        /* Out-barriers restore imported resources to their final states. */
        let mut out_barriers = Vec::new();
        for idx in ranges.out_image.begin..ranges.out_image.begin + ranges.out_image.count {
            let barrier = self.barriers.image_barriers[idx as usize];
            if let Some(link) = self.linked.image[idx as usize] {
                out_barriers.push(
                    vk::ImageMemoryBarrier2::builder()
                        .src_stage_mask(barrier.src_stage)
                        .src_access_mask(barrier.src_access)
                        .dst_stage_mask(barrier.dst_stage)
                        .dst_access_mask(barrier.dst_access)
                        .old_layout(barrier.old_layout)
                        .new_layout(barrier.new_layout)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .image(link.image)
                        .subresource_range(link.range)
                        .build(),
                );
            }
        }

        if !out_barriers.is_empty() {
            let dependency_info =
                vk::DependencyInfo::builder().image_memory_barriers(&out_barriers);

            unsafe {
                shared.raw.cmd_pipeline_barrier2(cmds.raw(), &dependency_info);
            }
        }

        cmds.end_debug_label();
    }

    #[allow(clippy::too_many_arguments)]
    fn submit_commands(
        &self,
        mut cmds: CommandBuffer,
        vk_queue: vk::Queue,
        queue: u32,
        submission_idx: usize,
        submissions: &[Submission],
        external_wait: vk::Semaphore,
        external_wait_value: u64,
        external_signal: vk::Semaphore,
        external_signal_value: u64,
        absolute_frame: u64,
    ) {
        let shared = self.shared.as_ref().expect("compiled graph");
        let submission = &submissions[submission_idx];

        if let Err(err) = cmds.end() {
            error!("failed to end a command buffer: {}", err);
            return;
        }

        let mut wait_semaphores = Vec::new();
        for (wait_queue, wait) in submission.waits.iter().enumerate() {
            if wait.base_value == 0 {
                continue;
            }

            let semaphore: &TimelineSemaphore = &self.semaphores[wait_queue];
            wait_semaphores.push(
                vk::SemaphoreSubmitInfo::builder()
                    .semaphore(semaphore.raw())
                    .value(semaphore.time_point(absolute_frame, wait.base_value))
                    .stage_mask(wait.stages)
                    .build(),
            );
        }

        /* The first main-queue submission additionally waits on the chain
         * value handed in by the device (acquire or the previous graph). */
        if external_wait != vk::Semaphore::null() && queue == 0 && submission_idx == 0 {
            wait_semaphores.push(
                vk::SemaphoreSubmitInfo::builder()
                    .semaphore(external_wait)
                    .value(external_wait_value)
                    .stage_mask(vk::PipelineStageFlags2::TOP_OF_PIPE)
                    .build(),
            );
        }

        let mut signal_semaphores = Vec::new();
        if submission.signal.base_value != 0 {
            let semaphore = &self.semaphores[queue as usize];
            signal_semaphores.push(
                vk::SemaphoreSubmitInfo::builder()
                    .semaphore(semaphore.raw())
                    .value(semaphore.time_point(absolute_frame, submission.signal.base_value))
                    .stage_mask(submission.signal.stages)
                    .build(),
            );
        }

        if external_signal != vk::Semaphore::null()
            && queue == 0
            && submission_idx + 1 == submissions.len()
        {
            signal_semaphores.push(
                vk::SemaphoreSubmitInfo::builder()
                    .semaphore(external_signal)
                    .value(external_signal_value)
                    .stage_mask(vk::PipelineStageFlags2::BOTTOM_OF_PIPE)
                    .build(),
            );
        }

        let cmds_submit_info = vk::CommandBufferSubmitInfo::builder()
            .command_buffer(cmds.raw())
            .build();

        let submit_info = vk::SubmitInfo2::builder()
            .wait_semaphore_infos(&wait_semaphores)
            .command_buffer_infos(std::slice::from_ref(&cmds_submit_info))
            .signal_semaphore_infos(&signal_semaphores)
            .build();

        let result = unsafe {
            shared
                .raw
                .queue_submit2(vk_queue, &[submit_info], vk::Fence::null())
        };

        if let Err(result) = result {
            error!("render graph submit failed: {}", result);
        }
    }
}
