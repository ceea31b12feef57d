//! Conversions between RHI enums and their Vulkan equivalents.
//!
//! Access masks are the disjunction over the contained state bits; image
//! layouts follow a one-to-one table, and combined states (other than the
//! storage read/write pairs, which share the `GENERAL` layout) must not be
//! used where a layout is derived.

use crate::rhi::rhi_enums::*;
use crate::rhi::rhi_structs::{Extent2D, Extent3D};
use ash::vk;

pub(crate) fn vk_format(format: Format) -> vk::Format {
    match format {
        Format::Invalid => vk::Format::UNDEFINED,

        Format::R32Uint => vk::Format::R32_UINT,
        Format::R32Sint => vk::Format::R32_SINT,
        Format::R32Sfloat => vk::Format::R32_SFLOAT,

        Format::D16Unorm => vk::Format::D16_UNORM,
        Format::D32Sfloat => vk::Format::D32_SFLOAT,

        Format::R32G32Uint => vk::Format::R32G32_UINT,
        Format::R32G32Sint => vk::Format::R32G32_SINT,
        Format::R32G32Sfloat => vk::Format::R32G32_SFLOAT,

        Format::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,

        Format::R8G8B8Unorm => vk::Format::R8G8B8_UNORM,
        Format::R8G8B8Srgb => vk::Format::R8G8B8_SRGB,
        Format::R16G16B16Sfloat => vk::Format::R16G16B16_SFLOAT,
        Format::R32G32B32Sfloat => vk::Format::R32G32B32_SFLOAT,

        Format::R8G8B8A8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::R8G8B8A8Srgb => vk::Format::R8G8B8A8_SRGB,
        Format::B8G8R8A8Srgb => vk::Format::B8G8R8A8_SRGB,
        Format::R32G32B32A32Sfloat => vk::Format::R32G32B32A32_SFLOAT,
    }
}

pub(crate) fn format_from_vk(format: vk::Format) -> Format {
    match format {
        vk::Format::R32_UINT => Format::R32Uint,
        vk::Format::R32_SINT => Format::R32Sint,
        vk::Format::R32_SFLOAT => Format::R32Sfloat,

        vk::Format::D16_UNORM => Format::D16Unorm,
        vk::Format::D32_SFLOAT => Format::D32Sfloat,

        vk::Format::R32G32_UINT => Format::R32G32Uint,
        vk::Format::R32G32_SINT => Format::R32G32Sint,
        vk::Format::R32G32_SFLOAT => Format::R32G32Sfloat,

        vk::Format::D24_UNORM_S8_UINT => Format::D24UnormS8Uint,

        vk::Format::R8G8B8_UNORM => Format::R8G8B8Unorm,
        vk::Format::R8G8B8_SRGB => Format::R8G8B8Srgb,
        vk::Format::R16G16B16_SFLOAT => Format::R16G16B16Sfloat,
        vk::Format::R32G32B32_SFLOAT => Format::R32G32B32Sfloat,

        vk::Format::R8G8B8A8_UNORM => Format::R8G8B8A8Unorm,
        vk::Format::R8G8B8A8_SRGB => Format::R8G8B8A8Srgb,
        vk::Format::B8G8R8A8_SRGB => Format::B8G8R8A8Srgb,
        vk::Format::R32G32B32A32_SFLOAT => Format::R32G32B32A32Sfloat,

        _ => Format::Invalid,
    }
}

pub(crate) fn vk_extent_2d(extent: Extent2D) -> vk::Extent2D {
    vk::Extent2D {
        width: extent.x,
        height: extent.y,
    }
}

pub(crate) fn vk_extent_3d(extent: Extent3D) -> vk::Extent3D {
    vk::Extent3D {
        width: extent.x,
        height: extent.y,
        depth: extent.z,
    }
}

pub(crate) fn vk_sample_count(samples: u8) -> vk::SampleCountFlags {
    match samples {
        0 | 1 => vk::SampleCountFlags::TYPE_1,
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        16 => vk::SampleCountFlags::TYPE_16,
        32 => vk::SampleCountFlags::TYPE_32,
        64 => vk::SampleCountFlags::TYPE_64,
        other => panic!("unsupported sample count {}", other),
    }
}

pub(crate) fn vk_buffer_usage(states: ResourceState) -> vk::BufferUsageFlags {
    let mut usage = vk::BufferUsageFlags::empty();

    if states.contains(ResourceState::TRANSFER_SRC) {
        usage |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if states.contains(ResourceState::TRANSFER_DST) {
        usage |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    if states.contains(ResourceState::VERTEX_BUFFER) {
        usage |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if states.contains(ResourceState::INDEX_BUFFER) {
        usage |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if states.contains(ResourceState::INDIRECT_ARGUMENT) {
        usage |= vk::BufferUsageFlags::INDIRECT_BUFFER;
    }
    if states.contains(ResourceState::UNIFORM_BUFFER) {
        usage |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if states.intersects(ResourceState::STORAGE_BUFFER_READ_WRITE) {
        usage |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }

    usage
}

pub(crate) fn vk_image_usage(states: ResourceState) -> vk::ImageUsageFlags {
    let mut usage = vk::ImageUsageFlags::empty();

    if states.contains(ResourceState::TRANSFER_SRC) {
        usage |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if states.contains(ResourceState::TRANSFER_DST) {
        usage |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if states.contains(ResourceState::SHADER_SAMPLED) {
        usage |= vk::ImageUsageFlags::SAMPLED;
    }
    if states.contains(ResourceState::COLOR_TARGET)
        || states.contains(ResourceState::COLOR_MULTISAMPLE_RESOLVE)
    {
        usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if states.contains(ResourceState::DEPTH_STENCIL_TARGET)
        || states.contains(ResourceState::DEPTH_STENCIL_READ)
    {
        usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if states.intersects(ResourceState::STORAGE_TEXTURE_READ_WRITE) {
        usage |= vk::ImageUsageFlags::STORAGE;
    }

    usage
}

pub(crate) fn vk_access_flags(state: ResourceState) -> vk::AccessFlags2 {
    let mut access = vk::AccessFlags2::NONE;

    if state.contains(ResourceState::TRANSFER_SRC) {
        access |= vk::AccessFlags2::TRANSFER_READ;
    }
    if state.contains(ResourceState::TRANSFER_DST) {
        access |= vk::AccessFlags2::TRANSFER_WRITE;
    }
    if state.contains(ResourceState::SHADER_SAMPLED) {
        access |= vk::AccessFlags2::SHADER_SAMPLED_READ;
    }
    if state.contains(ResourceState::COLOR_TARGET)
        || state.contains(ResourceState::COLOR_MULTISAMPLE_RESOLVE)
    {
        access |= vk::AccessFlags2::COLOR_ATTACHMENT_WRITE;
    }
    if state.contains(ResourceState::DEPTH_STENCIL_TARGET) {
        access |= vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE;
    }
    if state.contains(ResourceState::DEPTH_STENCIL_READ) {
        access |= vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ;
    }
    if state.contains(ResourceState::STORAGE_TEXTURE_READ) {
        access |= vk::AccessFlags2::SHADER_READ;
    }
    if state.contains(ResourceState::STORAGE_TEXTURE_WRITE) {
        access |= vk::AccessFlags2::SHADER_WRITE;
    }
    if state.contains(ResourceState::VERTEX_BUFFER) {
        access |= vk::AccessFlags2::VERTEX_ATTRIBUTE_READ;
    }
    if state.contains(ResourceState::INDEX_BUFFER) {
        access |= vk::AccessFlags2::INDEX_READ;
    }
    if state.contains(ResourceState::INDIRECT_ARGUMENT) {
        access |= vk::AccessFlags2::INDIRECT_COMMAND_READ;
    }
    if state.contains(ResourceState::UNIFORM_BUFFER) {
        access |= vk::AccessFlags2::UNIFORM_READ;
    }
    if state.contains(ResourceState::STORAGE_BUFFER_READ) {
        access |= vk::AccessFlags2::SHADER_STORAGE_READ;
    }
    if state.contains(ResourceState::STORAGE_BUFFER_WRITE) {
        access |= vk::AccessFlags2::SHADER_STORAGE_WRITE;
    }

    access
}

/// The image layout a state keeps a texture in. Only single states (plus the
/// storage read/write pair, which shares `GENERAL`) have a layout.
pub(crate) fn vk_image_layout(state: ResourceState) -> vk::ImageLayout {
    if state == ResourceState::UNDEFINED {
        return vk::ImageLayout::UNDEFINED;
    }
    if state.intersects(ResourceState::STORAGE_TEXTURE_READ_WRITE) {
        return vk::ImageLayout::GENERAL;
    }

    match state {
        ResourceState::TRANSFER_SRC => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ResourceState::TRANSFER_DST => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ResourceState::SHADER_SAMPLED => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ResourceState::COLOR_TARGET => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ResourceState::COLOR_MULTISAMPLE_RESOLVE => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ResourceState::DEPTH_STENCIL_TARGET => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ResourceState::DEPTH_STENCIL_READ => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        ResourceState::PRESENT_TEXTURE => vk::ImageLayout::PRESENT_SRC_KHR,
        other => panic!("state {:?} does not name an image layout", other),
    }
}

/// Pipeline stages a node of `job_type` touches a resource of `state` in.
pub(crate) fn vk_pipeline_stage(job_type: JobType, state: ResourceState) -> vk::PipelineStageFlags2 {
    if state == ResourceState::UNDEFINED {
        return vk::PipelineStageFlags2::TOP_OF_PIPE;
    }

    let mut stages = vk::PipelineStageFlags2::NONE;

    if state.intersects(ResourceState::TRANSFER_SRC | ResourceState::TRANSFER_DST) {
        stages |= vk::PipelineStageFlags2::ALL_TRANSFER;
    }
    if state.intersects(ResourceState::COLOR_TARGET | ResourceState::COLOR_MULTISAMPLE_RESOLVE) {
        stages |= vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT;
    }
    if state.intersects(ResourceState::DEPTH_STENCIL_TARGET | ResourceState::DEPTH_STENCIL_READ) {
        stages |= vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS;
    }
    if state.intersects(
        ResourceState::SHADER_SAMPLED
            | ResourceState::UNIFORM_BUFFER
            | ResourceState::STORAGE_BUFFER_READ_WRITE
            | ResourceState::STORAGE_TEXTURE_READ_WRITE,
    ) {
        stages |= match job_type {
            JobType::RenderPass => {
                vk::PipelineStageFlags2::VERTEX_SHADER | vk::PipelineStageFlags2::FRAGMENT_SHADER
            }
            JobType::Compute => vk::PipelineStageFlags2::COMPUTE_SHADER,
            JobType::Transfer => vk::PipelineStageFlags2::ALL_TRANSFER,
        };
    }
    if state.contains(ResourceState::VERTEX_BUFFER) {
        stages |= vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT;
    }
    if state.contains(ResourceState::INDEX_BUFFER) {
        stages |= vk::PipelineStageFlags2::INDEX_INPUT;
    }
    if state.contains(ResourceState::INDIRECT_ARGUMENT) {
        stages |= vk::PipelineStageFlags2::DRAW_INDIRECT;
    }
    if state.contains(ResourceState::PRESENT_TEXTURE) {
        stages |= vk::PipelineStageFlags2::BOTTOM_OF_PIPE;
    }

    if stages == vk::PipelineStageFlags2::NONE {
        stages = vk::PipelineStageFlags2::ALL_COMMANDS;
    }

    stages
}

pub(crate) fn vk_image_type(texture_type: TextureType) -> vk::ImageType {
    match texture_type {
        TextureType::Texture1D => vk::ImageType::TYPE_1D,
        TextureType::Texture2D => vk::ImageType::TYPE_2D,
        TextureType::Texture3D => vk::ImageType::TYPE_3D,
    }
}

pub(crate) fn vk_image_view_type(view_type: TextureViewType) -> vk::ImageViewType {
    match view_type {
        TextureViewType::View1D => vk::ImageViewType::TYPE_1D,
        TextureViewType::View2D => vk::ImageViewType::TYPE_2D,
        TextureViewType::View3D => vk::ImageViewType::TYPE_3D,
        TextureViewType::Cube => vk::ImageViewType::CUBE,
        TextureViewType::Array1D => vk::ImageViewType::TYPE_1D_ARRAY,
        TextureViewType::Array2D => vk::ImageViewType::TYPE_2D_ARRAY,
        TextureViewType::ArrayCube => vk::ImageViewType::CUBE_ARRAY,
    }
}

pub(crate) fn vk_filter(filter: Filter) -> vk::Filter {
    match filter {
        Filter::Nearest => vk::Filter::NEAREST,
        Filter::Linear => vk::Filter::LINEAR,
    }
}

pub(crate) fn vk_mipmap_mode(filter: Filter) -> vk::SamplerMipmapMode {
    match filter {
        Filter::Nearest => vk::SamplerMipmapMode::NEAREST,
        Filter::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

pub(crate) fn vk_address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
    }
}

pub(crate) fn vk_border_color(color: BorderColor) -> vk::BorderColor {
    match color {
        BorderColor::TransparentBlack => vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
        BorderColor::OpaqueBlack => vk::BorderColor::INT_OPAQUE_BLACK,
        BorderColor::OpaqueWhite => vk::BorderColor::INT_OPAQUE_WHITE,
    }
}

pub(crate) fn vk_attachment_load(load: AttachmentLoad) -> vk::AttachmentLoadOp {
    match load {
        AttachmentLoad::Load => vk::AttachmentLoadOp::LOAD,
        AttachmentLoad::Clear => vk::AttachmentLoadOp::CLEAR,
        AttachmentLoad::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

pub(crate) fn vk_attachment_store(store: AttachmentStore) -> vk::AttachmentStoreOp {
    match store {
        AttachmentStore::Store => vk::AttachmentStoreOp::STORE,
        AttachmentStore::Discard => vk::AttachmentStoreOp::DONT_CARE,
    }
}

/// Aspect mask derived from a texture's format.
pub(crate) fn vk_aspect_mask(format: Format) -> vk::ImageAspectFlags {
    if format.has_depth_stencil() {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else if format.has_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub(crate) fn device_type_from_vk(device_type: vk::PhysicalDeviceType) -> DeviceType {
    match device_type {
        vk::PhysicalDeviceType::INTEGRATED_GPU => DeviceType::IntegratedGpu,
        vk::PhysicalDeviceType::DISCRETE_GPU => DeviceType::DiscreteGpu,
        vk::PhysicalDeviceType::VIRTUAL_GPU => DeviceType::VirtualGpu,
        vk::PhysicalDeviceType::CPU => DeviceType::Cpu,
        _ => DeviceType::Undefined,
    }
}

/// Highest sample count usable for both color and depth attachments.
pub(crate) fn max_samples_from_vk(properties: &vk::PhysicalDeviceProperties) -> u8 {
    let counts = properties.limits.framebuffer_color_sample_counts
        & properties.limits.framebuffer_depth_sample_counts;

    if counts.contains(vk::SampleCountFlags::TYPE_64) {
        64
    } else if counts.contains(vk::SampleCountFlags::TYPE_32) {
        32
    } else if counts.contains(vk::SampleCountFlags::TYPE_16) {
        16
    } else if counts.contains(vk::SampleCountFlags::TYPE_8) {
        8
    } else if counts.contains(vk::SampleCountFlags::TYPE_4) {
        4
    } else if counts.contains(vk::SampleCountFlags::TYPE_2) {
        2
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_flags_are_disjunctions() {
        let state = ResourceState::UNIFORM_BUFFER | ResourceState::TRANSFER_DST;
        let access = vk_access_flags(state);
        assert!(access.contains(vk::AccessFlags2::UNIFORM_READ));
        assert!(access.contains(vk::AccessFlags2::TRANSFER_WRITE));
    }

    #[test]
    fn single_states_map_to_layouts() {
        assert_eq!(
            vk_image_layout(ResourceState::COLOR_TARGET),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            vk_image_layout(ResourceState::UNDEFINED),
            vk::ImageLayout::UNDEFINED
        );
        assert_eq!(
            vk_image_layout(ResourceState::STORAGE_TEXTURE_READ_WRITE),
            vk::ImageLayout::GENERAL
        );
        assert_eq!(
            vk_image_layout(ResourceState::PRESENT_TEXTURE),
            vk::ImageLayout::PRESENT_SRC_KHR
        );
    }

    #[test]
    #[should_panic]
    fn combined_states_have_no_layout() {
        vk_image_layout(ResourceState::COLOR_TARGET | ResourceState::SHADER_SAMPLED);
    }

    #[test]
    fn shader_read_stages_follow_the_job_type() {
        let state = ResourceState::UNIFORM_BUFFER;
        assert_eq!(
            vk_pipeline_stage(JobType::RenderPass, state),
            vk::PipelineStageFlags2::VERTEX_SHADER | vk::PipelineStageFlags2::FRAGMENT_SHADER
        );
        assert_eq!(
            vk_pipeline_stage(JobType::Compute, state),
            vk::PipelineStageFlags2::COMPUTE_SHADER
        );
    }
}
