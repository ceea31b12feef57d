//! Builder-level behavior that needs no GPU: version bookkeeping under the
//! attachment-load policy and the begin/end scoping rules.

use ember_rhi::rhi::vulkan::BufferPack;
use ember_rhi::rhi::{
    AttachmentLoad, AttachmentStore, Capability, DependentTextureInfo, DependentValue, Extent3D,
    Format, ResourceState, TextureInfo,
};

fn builder() -> ember_rhi::rhi::RenderGraphBuilder {
    ember_rhi::rhi::RenderGraphBuilder::new()
}

fn transient_color_info() -> DependentTextureInfo {
    DependentTextureInfo::fixed(TextureInfo {
        format: Format::R8G8B8A8Unorm,
        usage: ResourceState::COLOR_TARGET | ResourceState::SHADER_SAMPLED,
        extent: Extent3D::new(1920, 1080, 1),
        name: "hdr_color".to_owned(),
        ..Default::default()
    })
}

#[test]
fn clear_reuses_the_version_and_load_bumps_it() {
    let mut builder = builder();

    let color = builder.declare_transient_texture(transient_color_info());

    builder.begin_render_pass("clear", Capability::GRAPHICS);
    let cleared = builder.add_color_target(color, AttachmentLoad::Clear, AttachmentStore::Store);
    builder.end_render_pass();

    // Clear overwrites everything: the write keeps the incoming version.
    assert_eq!(cleared, color);

    builder.begin_render_pass("overlay", Capability::GRAPHICS);
    let overlaid = builder.add_color_target(cleared, AttachmentLoad::Load, AttachmentStore::Store);
    builder.end_render_pass();

    // Load consumes the previous contents and produces a fresh version.
    assert_ne!(overlaid, cleared);
    assert_eq!(builder.last_resource_version(color), overlaid);
}

#[test]
fn read_write_buffer_produces_fresh_versions() {
    let mut builder = builder();

    let buffer = builder.declare_transient_buffer(Default::default());

    builder.begin_compute("integrate", false, Capability::COMPUTE);
    let first = builder.read_write_buffer(buffer, ResourceState::STORAGE_BUFFER_READ_WRITE);
    builder.end_compute();

    builder.begin_compute("scatter", true, Capability::COMPUTE);
    let second = builder.read_write_buffer(first, ResourceState::STORAGE_BUFFER_READ_WRITE);
    builder.end_compute();

    assert_ne!(first, buffer);
    assert_ne!(second, first);
    assert_eq!(builder.last_resource_version(buffer), second);
}

#[test]
fn dependent_values_track_their_dependency() {
    let mut builder = builder();

    let color = builder.declare_transient_texture(transient_color_info());

    let mut depth_info = DependentTextureInfo {
        format: DependentValue::Fixed(Format::D32Sfloat),
        usage: ResourceState::DEPTH_STENCIL_TARGET,
        extent: DependentValue::dependent_on(color),
        name: "depth".to_owned(),
        ..Default::default()
    };

    assert!(depth_info.extent.is_dependent());
    assert_eq!(depth_info.extent.dependency(), Some(color));

    // Resolution copies the observed value and reports drift.
    assert!(depth_info
        .extent
        .update_dependent_value(Extent3D::new(1920, 1080, 1)));
    assert!(!depth_info
        .extent
        .update_dependent_value(Extent3D::new(1920, 1080, 1)));
    assert!(depth_info
        .extent
        .update_dependent_value(Extent3D::new(1280, 720, 1)));
    assert_eq!(depth_info.resolved().extent, Extent3D::new(1280, 720, 1));
}

#[test]
fn buffer_pack_membership_is_dynamic() {
    let pack = BufferPack::new("object_buffers");
    assert!(pack.is_empty());
    assert_eq!(pack.name(), "object_buffers");
}

#[test]
#[should_panic(expected = "without ending")]
fn nested_begin_panics() {
    let mut builder = builder();
    builder.begin_render_pass("first", Capability::GRAPHICS);
    builder.begin_compute("second", false, Capability::COMPUTE);
}

#[test]
#[should_panic(expected = "does not match")]
fn mismatched_end_panics() {
    let mut builder = builder();
    builder.begin_render_pass("pass", Capability::GRAPHICS);
    builder.end_compute();
}

#[test]
#[should_panic(expected = "outside of a begin/end node scope")]
fn resource_access_outside_scope_panics() {
    let mut builder = builder();
    let buffer = builder.declare_transient_buffer(Default::default());
    builder.read_buffer(buffer, ResourceState::UNIFORM_BUFFER);
}
