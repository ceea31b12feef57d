#![allow(unsafe_code)]

//! Graphics and compute pipelines over the bindless layout.
//!
//! Every pipeline uses the single bindless descriptor set layout and one
//! push-constant range; shaders reach their resources through integer
//! indices in the push constants. Render-pass state is expressed with
//! dynamic rendering, so pipelines carry attachment formats instead of a
//! render-pass object.

use super::vulkan_device::DeviceShared;
use super::vulkan_shader_module::ShaderModule;
use super::vulkan_utils::{vk_format, vk_sample_count};
use crate::rhi::rhi_enums::{Capability, Format, ShaderError};
use ash::vk;
use std::ffi::CString;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Topology {
    PointList,
    LineList,
    TriangleList,
    TriangleStrip,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PolygonMode {
    Fill,
    Line,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CullMode {
    None,
    FrontOnly,
    BackOnly,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum FrontFace {
    CounterClockwise,
    Clockwise,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CompareOperation {
    Never,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Equal,
    Always,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BlendOperation {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

/// Primitive assembly state.
#[derive(Debug, Clone, Copy)]
pub struct InputAssemblyInfo {
    pub topology: Topology,
}

impl Default for InputAssemblyInfo {
    fn default() -> Self {
        InputAssemblyInfo {
            topology: Topology::TriangleList,
        }
    }
}

/// Rasterizer state.
#[derive(Debug, Clone, Copy)]
pub struct RasterizationInfo {
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub polygon_mode: PolygonMode,
}

impl Default for RasterizationInfo {
    fn default() -> Self {
        RasterizationInfo {
            cull_mode: CullMode::BackOnly,
            front_face: FrontFace::CounterClockwise,
            polygon_mode: PolygonMode::Fill,
        }
    }
}

/// Depth test state. Stencil tests are not exposed.
#[derive(Debug, Clone, Copy)]
pub struct DepthStencilTestInfo {
    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub depth_compare: CompareOperation,
}

impl Default for DepthStencilTestInfo {
    fn default() -> Self {
        DepthStencilTestInfo {
            depth_test_enable: true,
            depth_write_enable: true,
            depth_compare: CompareOperation::LessOrEqual,
        }
    }
}

/// Blend state applied to every color attachment.
#[derive(Debug, Clone, Copy)]
pub struct ColorBlendInfo {
    pub enable: bool,
    pub src_color_factor: BlendFactor,
    pub dst_color_factor: BlendFactor,
    pub color_operation: BlendOperation,
    pub src_alpha_factor: BlendFactor,
    pub dst_alpha_factor: BlendFactor,
    pub alpha_operation: BlendOperation,
}

impl Default for ColorBlendInfo {
    fn default() -> Self {
        ColorBlendInfo {
            enable: false,
            src_color_factor: BlendFactor::SrcAlpha,
            dst_color_factor: BlendFactor::OneMinusSrcAlpha,
            color_operation: BlendOperation::Add,
            src_alpha_factor: BlendFactor::One,
            dst_alpha_factor: BlendFactor::Zero,
            alpha_operation: BlendOperation::Add,
        }
    }
}

/// Everything needed to create a graphics pipeline.
pub struct GraphicsPipelineInfo<'a> {
    pub vertex_shader: &'a ShaderModule,
    pub fragment_shader: &'a ShaderModule,
    pub input_assembly: InputAssemblyInfo,
    pub rasterization: RasterizationInfo,
    pub depth_stencil: DepthStencilTestInfo,
    pub blend: ColorBlendInfo,
    /// Formats of the color attachments the pipeline renders into.
    pub color_formats: Vec<Format>,
    pub depth_format: Option<Format>,
    pub samples: u8,
    /// Size of the pipeline's push-constant block in bytes, 0 for none.
    pub push_constant_size: u32,
    pub name: String,
}

/// Everything needed to create a compute pipeline.
pub struct ComputePipelineInfo<'a> {
    pub shader: &'a ShaderModule,
    pub push_constant_size: u32,
    pub name: String,
}

/// A compiled pipeline and its layout.
pub struct Pipeline {
    shared: Arc<DeviceShared>,
    raw: vk::Pipeline,
    layout: vk::PipelineLayout,
    bind_point: vk::PipelineBindPoint,
    push_constant_stages: vk::ShaderStageFlags,
}

fn create_layout(
    shared: &DeviceShared,
    push_constant_size: u32,
    stages: vk::ShaderStageFlags,
) -> Result<vk::PipelineLayout, ShaderError> {
    let set_layouts = [shared.descriptors.layout()];

    let push_constant_ranges = [vk::PushConstantRange {
        stage_flags: stages,
        offset: 0,
        size: push_constant_size,
    }];

    let mut layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
    if push_constant_size > 0 {
        layout_info = layout_info.push_constant_ranges(&push_constant_ranges);
    }

    unsafe { shared.raw.create_pipeline_layout(&layout_info, None) }.map_err(ShaderError::VkFailed)
}

fn vk_compare_op(operation: CompareOperation) -> vk::CompareOp {
    match operation {
        CompareOperation::Never => vk::CompareOp::NEVER,
        CompareOperation::Less => vk::CompareOp::LESS,
        CompareOperation::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareOperation::Greater => vk::CompareOp::GREATER,
        CompareOperation::GreaterOrEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareOperation::Equal => vk::CompareOp::EQUAL,
        CompareOperation::Always => vk::CompareOp::ALWAYS,
    }
}

fn vk_blend_factor(factor: BlendFactor) -> vk::BlendFactor {
    match factor {
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::SrcColor => vk::BlendFactor::SRC_COLOR,
        BlendFactor::OneMinusSrcColor => vk::BlendFactor::ONE_MINUS_SRC_COLOR,
        BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
    }
}

fn vk_blend_op(operation: BlendOperation) -> vk::BlendOp {
    match operation {
        BlendOperation::Add => vk::BlendOp::ADD,
        BlendOperation::Subtract => vk::BlendOp::SUBTRACT,
        BlendOperation::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
        BlendOperation::Min => vk::BlendOp::MIN,
        BlendOperation::Max => vk::BlendOp::MAX,
    }
}

impl Pipeline {
    /// Creates a graphics pipeline with dynamic viewport and scissor.
    ///
    /// Vertex data is fetched bindlessly from storage buffers, so the
    /// pipeline has no fixed vertex input state.
    pub(crate) fn new_graphics(
        shared: Arc<DeviceShared>,
        info: &GraphicsPipelineInfo<'_>,
    ) -> Result<Pipeline, ShaderError> {
        let stages_mask = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;
        let layout = create_layout(&shared, info.push_constant_size, stages_mask)?;

        let entry_point = CString::new("main").unwrap();
        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(info.vertex_shader.raw())
                .name(&entry_point)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(info.fragment_shader.raw())
                .name(&entry_point)
                .build(),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder();

        let topology = match info.input_assembly.topology {
            Topology::PointList => vk::PrimitiveTopology::POINT_LIST,
            Topology::LineList => vk::PrimitiveTopology::LINE_LIST,
            Topology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            Topology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(topology)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(match info.rasterization.polygon_mode {
                PolygonMode::Fill => vk::PolygonMode::FILL,
                PolygonMode::Line => vk::PolygonMode::LINE,
            })
            .cull_mode(match info.rasterization.cull_mode {
                CullMode::None => vk::CullModeFlags::NONE,
                CullMode::FrontOnly => vk::CullModeFlags::FRONT,
                CullMode::BackOnly => vk::CullModeFlags::BACK,
            })
            .front_face(match info.rasterization.front_face {
                FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
                FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
            })
            .line_width(1.0);

        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk_sample_count(info.samples));

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(info.depth_stencil.depth_test_enable)
            .depth_write_enable(info.depth_stencil.depth_write_enable)
            .depth_compare_op(vk_compare_op(info.depth_stencil.depth_compare));

        let blend_attachments: Vec<_> = info
            .color_formats
            .iter()
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::builder()
                    .blend_enable(info.blend.enable)
                    .src_color_blend_factor(vk_blend_factor(info.blend.src_color_factor))
                    .dst_color_blend_factor(vk_blend_factor(info.blend.dst_color_factor))
                    .color_blend_op(vk_blend_op(info.blend.color_operation))
                    .src_alpha_blend_factor(vk_blend_factor(info.blend.src_alpha_factor))
                    .dst_alpha_blend_factor(vk_blend_factor(info.blend.dst_alpha_factor))
                    .alpha_blend_op(vk_blend_op(info.blend.alpha_operation))
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
                    .build()
            })
            .collect();

        let blend_state =
            vk::PipelineColorBlendStateCreateInfo::builder().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let color_formats: Vec<_> = info
            .color_formats
            .iter()
            .map(|&format| vk_format(format))
            .collect();

        let mut rendering_info = vk::PipelineRenderingCreateInfo::builder()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(
                info.depth_format.map(vk_format).unwrap_or(vk::Format::UNDEFINED),
            );

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .push_next(&mut rendering_info);

        let raw = unsafe {
            shared.raw.create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&create_info),
                None,
            )
        }
        .map_err(|(_, result)| ShaderError::VkFailed(result))?[0];

        if !info.name.is_empty() {
            shared.set_debug_name(raw, &info.name);
        }

        Ok(Pipeline {
            shared,
            raw,
            layout,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            push_constant_stages: stages_mask,
        })
    }

    /// Creates a compute pipeline.
    pub(crate) fn new_compute(
        shared: Arc<DeviceShared>,
        info: &ComputePipelineInfo<'_>,
    ) -> Result<Pipeline, ShaderError> {
        let stages_mask = vk::ShaderStageFlags::COMPUTE;
        let layout = create_layout(&shared, info.push_constant_size, stages_mask)?;

        let entry_point = CString::new("main").unwrap();
        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(info.shader.raw())
            .name(&entry_point)
            .build();

        let create_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage)
            .layout(layout);

        let raw = unsafe {
            shared.raw.create_compute_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&create_info),
                None,
            )
        }
        .map_err(|(_, result)| ShaderError::VkFailed(result))?[0];

        if !info.name.is_empty() {
            shared.set_debug_name(raw, &info.name);
        }

        Ok(Pipeline {
            shared,
            raw,
            layout,
            bind_point: vk::PipelineBindPoint::COMPUTE,
            push_constant_stages: stages_mask,
        })
    }

    pub(crate) fn raw(&self) -> vk::Pipeline {
        self.raw
    }

    pub(crate) fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub(crate) fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }

    pub(crate) fn push_constant_stages(&self) -> vk::ShaderStageFlags {
        self.push_constant_stages
    }

    /// Capability a command buffer needs to use this pipeline.
    pub(crate) fn required_capability(&self) -> Capability {
        match self.bind_point {
            vk::PipelineBindPoint::COMPUTE => Capability::COMPUTE,
            _ => Capability::GRAPHICS,
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.shared.raw.destroy_pipeline(self.raw, None);
            self.shared.raw.destroy_pipeline_layout(self.layout, None);
        }
    }
}
