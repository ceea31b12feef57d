#![allow(unsafe_code)]

//! One-shot primary command buffers.
//!
//! Commands validate their required capability against the issuing node's
//! capability mask; a mismatch is logged and the command is dropped, per the
//! execution-time error policy.

use super::vulkan_buffer::Buffer;
use super::vulkan_device::DeviceShared;
use super::vulkan_pipeline::Pipeline;
use super::vulkan_texture::Texture;
use super::vulkan_utils::{vk_extent_3d, vk_filter, vk_image_layout};
use crate::rhi::rhi_enums::{Capability, DeviceError, Filter, ResourceState};
use crate::rhi::rhi_structs::{Extent3D, Viewport};
use ash::vk;
use cgmath::Vector4;
use log::error;
use std::ffi::CString;
use std::sync::Arc;

/// A primary command buffer recording one submission of a render graph.
pub struct CommandBuffer {
    shared: Arc<DeviceShared>,
    raw: vk::CommandBuffer,
    capabilities: Capability,
    use_debug_labels: bool,
    descriptor_set: vk::DescriptorSet,
    descriptor_set_bound: bool,
}

impl CommandBuffer {
    pub(crate) fn new(
        shared: Arc<DeviceShared>,
        raw: vk::CommandBuffer,
        use_debug_labels: bool,
    ) -> CommandBuffer {
        let descriptor_set = shared.descriptors.set();
        CommandBuffer {
            shared,
            raw,
            capabilities: Capability::all(),
            use_debug_labels,
            descriptor_set,
            descriptor_set_bound: false,
        }
    }

    pub(crate) fn raw(&self) -> vk::CommandBuffer {
        self.raw
    }

    /// Restricts the commands the current node's job may record.
    pub(crate) fn set_capabilities(&mut self, capabilities: Capability) {
        self.capabilities = capabilities;
    }

    pub(crate) fn begin(&mut self) -> Result<(), DeviceError> {
        self.descriptor_set_bound = false;

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe { self.shared.raw.begin_command_buffer(self.raw, &begin_info) }
            .map_err(DeviceError::from_vk)
    }

    pub(crate) fn end(&mut self) -> Result<(), DeviceError> {
        self.descriptor_set_bound = false;
        unsafe { self.shared.raw.end_command_buffer(self.raw) }.map_err(DeviceError::from_vk)
    }

    fn check_capability(&self, required: Capability, command: &str) -> bool {
        if !self.capabilities.contains(required) {
            error!(
                "capability mismatch: {} requires {:?} but the node only allows {:?}",
                command, required, self.capabilities
            );
            return false;
        }
        true
    }

    /// Generates every mip level of `texture` from level 0 by successive
    /// half-resolution blits, leaving all levels in `final_state`.
    ///
    /// The texture must be in `TRANSFER_DST` when the command is recorded.
    /// Requires graphics and transfer capability.
    pub fn generate_mip_levels(&mut self, texture: &Texture, final_state: ResourceState, filter: Filter) {
        if !self.check_capability(
            Capability::GRAPHICS | Capability::TRANSFER,
            "generate_mip_levels",
        ) {
            return;
        }

        let final_layout = vk_image_layout(final_state);
        let image = texture.raw();

        let transfer_mip_to_final_state =
            |cmds: &CommandBuffer, old_layout: vk::ImageLayout, src_access: vk::AccessFlags2, mip: u32| {
                let barrier = vk::ImageMemoryBarrier2::builder()
                    .src_stage_mask(vk::PipelineStageFlags2::ALL_TRANSFER)
                    .src_access_mask(src_access)
                    .dst_stage_mask(vk::PipelineStageFlags2::VERTEX_SHADER)
                    .dst_access_mask(vk::AccessFlags2::SHADER_READ)
                    .old_layout(old_layout)
                    .new_layout(final_layout)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: mip,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .build();

                let dependency_info = vk::DependencyInfo::builder()
                    .image_memory_barriers(std::slice::from_ref(&barrier));

                unsafe {
                    cmds.shared
                        .raw
                        .cmd_pipeline_barrier2(cmds.raw, &dependency_info)
                };
            };

        let mip_levels = texture.info().mip_levels;
        let mut mip_width = texture.info().extent.x;
        let mut mip_height = texture.info().extent.y;

        for i in 1..mip_levels {
            /* Transition mip (i - 1) to TRANSFER_SRC_OPTIMAL. */
            let barrier_src = vk::ImageMemoryBarrier2::builder()
                .src_stage_mask(vk::PipelineStageFlags2::ALL_TRANSFER)
                .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags2::ALL_TRANSFER)
                .dst_access_mask(vk::AccessFlags2::TRANSFER_READ)
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: i - 1,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .build();

            let dependency_info = vk::DependencyInfo::builder()
                .image_memory_barriers(std::slice::from_ref(&barrier_src));

            unsafe {
                self.shared
                    .raw
                    .cmd_pipeline_barrier2(self.raw, &dependency_info)
            };

            /* Blit mip (i - 1) to mip i at half resolution. */
            let dst_width = if mip_width > 1 { mip_width / 2 } else { 1 };
            let dst_height = if mip_height > 1 { mip_height / 2 } else { 1 };

            let blit_region = vk::ImageBlit2::builder()
                .src_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: i - 1,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .src_offsets([
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D {
                        x: mip_width as i32,
                        y: mip_height as i32,
                        z: 1,
                    },
                ])
                .dst_subresource(vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: i,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .dst_offsets([
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D {
                        x: dst_width as i32,
                        y: dst_height as i32,
                        z: 1,
                    },
                ])
                .build();

            let blit_info = vk::BlitImageInfo2::builder()
                .src_image(image)
                .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                .dst_image(image)
                .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .regions(std::slice::from_ref(&blit_region))
                .filter(vk_filter(filter));

            unsafe { self.shared.raw.cmd_blit_image2(self.raw, &blit_info) };

            /* Transition mip (i - 1) to the final layout. */
            transfer_mip_to_final_state(
                self,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::AccessFlags2::TRANSFER_READ,
                i - 1,
            );

            if mip_width > 1 {
                mip_width /= 2;
            }
            if mip_height > 1 {
                mip_height /= 2;
            }
        }

        /* The last mip was never blitted from and is still TRANSFER_DST. */
        transfer_mip_to_final_state(
            self,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::AccessFlags2::TRANSFER_WRITE,
            mip_levels - 1,
        );
    }

    /// A standalone execution barrier between two buffer states.
    pub fn buffer_barrier(&mut self, buffer: &Buffer, src_state: ResourceState, dst_state: ResourceState) {
        use super::vulkan_utils::vk_access_flags;

        let barrier = vk::BufferMemoryBarrier2::builder()
            .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .src_access_mask(vk_access_flags(src_state))
            .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .dst_access_mask(vk_access_flags(dst_state))
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(buffer.raw())
            .offset(0)
            .size(vk::WHOLE_SIZE)
            .build();

        let dependency_info =
            vk::DependencyInfo::builder().buffer_memory_barriers(std::slice::from_ref(&barrier));

        unsafe {
            self.shared
                .raw
                .cmd_pipeline_barrier2(self.raw, &dependency_info)
        };
    }

    /// Uploads push-constant bytes visible to all of the pipeline's stages.
    pub fn set_push_constant(&mut self, pipeline: &Pipeline, data: &[u8]) {
        if !self.check_capability(pipeline.required_capability(), "set_push_constant") {
            return;
        }

        unsafe {
            self.shared.raw.cmd_push_constants(
                self.raw,
                pipeline.layout(),
                pipeline.push_constant_stages(),
                0,
                data,
            );
        }
    }

    /// Binds the pipeline and, once per command buffer, the bindless set.
    pub fn bind_pipeline(&mut self, pipeline: &Pipeline) {
        if !self.check_capability(pipeline.required_capability(), "bind_pipeline") {
            return;
        }

        let bind_point = pipeline.bind_point();

        unsafe {
            self.shared
                .raw
                .cmd_bind_pipeline(self.raw, bind_point, pipeline.raw());
        }

        if !self.descriptor_set_bound {
            unsafe {
                self.shared.raw.cmd_bind_descriptor_sets(
                    self.raw,
                    bind_point,
                    pipeline.layout(),
                    0,
                    &[self.descriptor_set],
                    &[],
                );
            }
            self.descriptor_set_bound = true;
        }
    }

    /// Requires compute capability.
    pub fn dispatch(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        if !self.check_capability(Capability::COMPUTE, "dispatch") {
            return;
        }

        unsafe {
            self.shared
                .raw
                .cmd_dispatch(self.raw, group_count_x, group_count_y, group_count_z);
        }
    }

    /// Sets viewports with the height negated to keep clip space y-up.
    /// Requires graphics capability.
    pub fn set_viewports(&mut self, viewports: &[Viewport]) {
        if !self.check_capability(Capability::GRAPHICS, "set_viewports") {
            return;
        }

        let vk_viewports: Vec<_> = viewports
            .iter()
            .map(|viewport| vk::Viewport {
                x: viewport.x,
                y: viewport.y + viewport.height,
                width: viewport.width,
                height: -viewport.height,
                min_depth: viewport.min_depth,
                max_depth: viewport.max_depth,
            })
            .collect();

        unsafe { self.shared.raw.cmd_set_viewport(self.raw, 0, &vk_viewports) };
    }

    /// Requires graphics capability.
    pub fn bind_vertex_buffers(&mut self, first_binding: u32, vertex_buffers: &[&Buffer]) {
        if !self.check_capability(Capability::GRAPHICS, "bind_vertex_buffers") {
            return;
        }

        let buffers: Vec<_> = vertex_buffers.iter().map(|buffer| buffer.raw()).collect();
        let offsets = vec![0u64; buffers.len()];

        unsafe {
            self.shared
                .raw
                .cmd_bind_vertex_buffers(self.raw, first_binding, &buffers, &offsets);
        }
    }

    /// Binds a `u32` index buffer. Requires graphics capability.
    pub fn bind_index_buffer(&mut self, index_buffer: &Buffer) {
        if !self.check_capability(Capability::GRAPHICS, "bind_index_buffer") {
            return;
        }

        unsafe {
            self.shared.raw.cmd_bind_index_buffer(
                self.raw,
                index_buffer.raw(),
                0,
                vk::IndexType::UINT32,
            );
        }
    }

    /// Requires graphics capability.
    pub fn draw(
        &mut self,
        vertex_count: u32,
        first_vertex: u32,
        instance_count: u32,
        first_instance: u32,
    ) {
        if !self.check_capability(Capability::GRAPHICS, "draw") {
            return;
        }

        unsafe {
            self.shared.raw.cmd_draw(
                self.raw,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }

    /// Requires graphics capability.
    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        first_index: u32,
        vertex_offset: i32,
        instance_count: u32,
        first_instance: u32,
    ) {
        if !self.check_capability(Capability::GRAPHICS, "draw_indexed") {
            return;
        }

        unsafe {
            self.shared.raw.cmd_draw_indexed(
                self.raw,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    /// Requires graphics capability.
    pub fn draw_indirect(&mut self, indirect_buffer: &Buffer, offset: u64, stride: u32, draw_count: u32) {
        if !self.check_capability(Capability::GRAPHICS, "draw_indirect") {
            return;
        }

        unsafe {
            self.shared.raw.cmd_draw_indirect(
                self.raw,
                indirect_buffer.raw(),
                offset,
                draw_count,
                stride,
            );
        }
    }

    /// Requires graphics capability.
    pub fn draw_indexed_indirect(
        &mut self,
        indirect_buffer: &Buffer,
        offset: u64,
        stride: u32,
        draw_count: u32,
    ) {
        if !self.check_capability(Capability::GRAPHICS, "draw_indexed_indirect") {
            return;
        }

        unsafe {
            self.shared.raw.cmd_draw_indexed_indirect(
                self.raw,
                indirect_buffer.raw(),
                offset,
                draw_count,
                stride,
            );
        }
    }

    /// Requires transfer capability.
    pub fn copy_buffer(
        &mut self,
        src_buffer: &Buffer,
        dst_buffer: &Buffer,
        size: u64,
        src_offset: u64,
        dst_offset: u64,
    ) {
        if !self.check_capability(Capability::TRANSFER, "copy_buffer") {
            return;
        }

        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };

        unsafe {
            self.shared.raw.cmd_copy_buffer(
                self.raw,
                src_buffer.raw(),
                dst_buffer.raw(),
                &[region],
            );
        }
    }

    /// Copies tightly packed buffer data into one mip level of a texture in
    /// `TRANSFER_DST_OPTIMAL`. Requires transfer capability.
    pub fn copy_buffer_to_texture(
        &mut self,
        buffer: &Buffer,
        texture: &Texture,
        extent: Extent3D,
        mip_level: u32,
    ) {
        if !self.check_capability(Capability::TRANSFER, "copy_buffer_to_texture") {
            return;
        }

        let region = buffer_image_copy(extent, mip_level);

        unsafe {
            self.shared.raw.cmd_copy_buffer_to_image(
                self.raw,
                buffer.raw(),
                texture.raw(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    /// Requires transfer capability.
    pub fn copy_texture_to_buffer(
        &mut self,
        texture: &Texture,
        buffer: &Buffer,
        extent: Extent3D,
        mip_level: u32,
    ) {
        if !self.check_capability(Capability::TRANSFER, "copy_texture_to_buffer") {
            return;
        }

        let region = buffer_image_copy(extent, mip_level);

        unsafe {
            self.shared.raw.cmd_copy_image_to_buffer(
                self.raw,
                texture.raw(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                buffer.raw(),
                &[region],
            );
        }
    }

    /// Requires transfer capability.
    pub fn copy_texture(
        &mut self,
        src_texture: &Texture,
        dst_texture: &Texture,
        extent: Extent3D,
        src_mip_level: u32,
        dst_mip_level: u32,
    ) {
        if !self.check_capability(Capability::TRANSFER, "copy_texture") {
            return;
        }

        let region = vk::ImageCopy {
            src_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: src_mip_level,
                base_array_layer: 0,
                layer_count: 1,
            },
            src_offset: vk::Offset3D::default(),
            dst_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: dst_mip_level,
                base_array_layer: 0,
                layer_count: 1,
            },
            dst_offset: vk::Offset3D::default(),
            extent: vk_extent_3d(extent),
        };

        unsafe {
            self.shared.raw.cmd_copy_image(
                self.raw,
                src_texture.raw(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst_texture.raw(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    pub(crate) fn begin_debug_label(&mut self, name: &str, color: Vector4<f32>) {
        let debug_utils = match (&self.shared.debug_utils, self.use_debug_labels) {
            (Some(debug_utils), true) => debug_utils,
            _ => return,
        };

        let name = CString::new(name).unwrap_or_default();
        let label = vk::DebugUtilsLabelEXT::builder()
            .label_name(&name)
            .color([color.x, color.y, color.z, color.w]);

        unsafe { debug_utils.cmd_begin_debug_utils_label(self.raw, &label) };
    }

    pub(crate) fn end_debug_label(&mut self) {
        if let (Some(debug_utils), true) = (&self.shared.debug_utils, self.use_debug_labels) {
            unsafe { debug_utils.cmd_end_debug_utils_label(self.raw) };
        }
    }
}

fn buffer_image_copy(extent: Extent3D, mip_level: u32) -> vk::BufferImageCopy {
    vk::BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level,
            base_array_layer: 0,
            layer_count: 1,
        },
        image_offset: vk::Offset3D::default(),
        image_extent: vk_extent_3d(extent),
    }
}
