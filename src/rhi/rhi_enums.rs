//! Enumerations and flag sets shared by every part of the RHI.

use ash::vk;
use bitflags::bitflags;
use failure::Fail;

/// The graphics APIs an instance can be created for.
///
/// Only Vulkan is implemented; the enum exists so that instance creation has a
/// stable signature once another backend is added.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum GraphicsApi {
    Vulkan,
}

/// How much validation the backend should perform.
///
/// This is the only external knob of the RHI. Everything above `None` enables
/// the debug-utils machinery (object names, command-buffer labels).
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ValidationLevel {
    /// No validation layers, no debug messenger.
    None,
    /// Debug names and labels only.
    DebugInfoOnly,
    /// Standard validation plus synchronization validation.
    Basic,
    /// Everything from `Basic` plus best-practices validation.
    Extensive,
}

/// Type of the physical device a logical device is bound to.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DeviceType {
    Undefined,
    IntegratedGpu,
    DiscreteGpu,
    VirtualGpu,
    Cpu,
}

/// The kind of work a render-graph node records.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum JobType {
    RenderPass,
    Compute,
    Transfer,
}

/// Texel format of a texture.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Format {
    Invalid,

    R32Uint,
    R32Sint,
    R32Sfloat,

    D16Unorm,
    D32Sfloat,

    R32G32Uint,
    R32G32Sint,
    R32G32Sfloat,

    D24UnormS8Uint,

    R8G8B8Unorm,
    R8G8B8Srgb,
    R16G16B16Sfloat,
    R32G32B32Sfloat,

    R8G8B8A8Unorm,
    R8G8B8A8Srgb,
    B8G8R8A8Srgb,
    R32G32B32A32Sfloat,
}

impl Default for Format {
    fn default() -> Self {
        Format::Invalid
    }
}

impl Format {
    /// Whether the format has a depth component.
    pub fn has_depth(self) -> bool {
        matches!(
            self,
            Format::D16Unorm | Format::D32Sfloat | Format::D24UnormS8Uint
        )
    }

    /// Whether the format has both depth and stencil components.
    pub fn has_depth_stencil(self) -> bool {
        matches!(self, Format::D24UnormS8Uint)
    }
}

/// Dimensionality of a texture.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TextureType {
    Texture1D,
    Texture2D,
    Texture3D,
}

/// Dimensionality and arrayness of a texture view.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TextureViewType {
    View1D,
    View2D,
    View3D,
    Cube,
    Array1D,
    Array2D,
    ArrayCube,
}

/// Texel filtering used by samplers and blits.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Filter {
    Nearest,
    Linear,
}

/// How sampler coordinates outside of `[0, 1]` are treated.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AddressMode {
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

/// Border color used with [`AddressMode::ClampToBorder`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BorderColor {
    TransparentBlack,
    OpaqueBlack,
    OpaqueWhite,
}

/// Load behavior of a render-pass attachment.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AttachmentLoad {
    Load,
    Clear,
    DontCare,
}

/// Store behavior of a render-pass attachment.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AttachmentStore {
    Store,
    Discard,
}

bitflags! {
    /// Permission bits for the commands a render-graph job may record.
    ///
    /// Every command documents the capability it requires; the command buffer
    /// rejects commands whose capability is not a subset of the node's mask.
    pub struct Capability: u8 {
        const GRAPHICS = 0b001;
        const COMPUTE  = 0b010;
        const TRANSFER = 0b100;
    }
}

bitflags! {
    /// A device-side usage state of a resource.
    ///
    /// A single bit names one concrete state (and, for textures, one image
    /// layout). Masks of several bits are used as *usage* masks: a texture
    /// created with `SHADER_SAMPLED | COLOR_TARGET` may be observed in either
    /// state by the render graph. The empty mask stands for the undefined
    /// state.
    #[derive(Default)]
    pub struct ResourceState: u32 {
        const TRANSFER_SRC               = 0x0000_0001;
        const TRANSFER_DST               = 0x0000_0002;
        const SHADER_SAMPLED             = 0x0000_0004;
        const COLOR_TARGET               = 0x0000_0008;
        const COLOR_MULTISAMPLE_RESOLVE  = 0x0000_0010;
        const DEPTH_STENCIL_TARGET       = 0x0000_0020;
        const DEPTH_STENCIL_READ         = 0x0000_0040;
        const STORAGE_TEXTURE_READ       = 0x0000_0080;
        const STORAGE_TEXTURE_WRITE      = 0x0000_0100;
        const PRESENT_TEXTURE            = 0x0000_0200;
        const VERTEX_BUFFER              = 0x0000_0400;
        const INDEX_BUFFER               = 0x0000_0800;
        const INDIRECT_ARGUMENT          = 0x0000_1000;
        const UNIFORM_BUFFER             = 0x0000_2000;
        const STORAGE_BUFFER_READ        = 0x0000_4000;
        const STORAGE_BUFFER_WRITE       = 0x0000_8000;

        const STORAGE_BUFFER_READ_WRITE  = Self::STORAGE_BUFFER_READ.bits | Self::STORAGE_BUFFER_WRITE.bits;
        const STORAGE_TEXTURE_READ_WRITE = Self::STORAGE_TEXTURE_READ.bits | Self::STORAGE_TEXTURE_WRITE.bits;
    }
}

impl ResourceState {
    /// The undefined state: contents and layout are unspecified.
    pub const UNDEFINED: ResourceState = ResourceState::empty();
}

/// Errors that can happen while creating an instance or enumerating devices.
#[derive(Fail, Debug)]
pub enum InstanceError {
    #[fail(display = "Failed to load the Vulkan library: {}", _0)]
    LoadingFailed(String),

    #[fail(display = "Vulkan call failed: {}", _0)]
    VkFailed(vk::Result),

    #[fail(display = "No physical device with index {} was enumerated.", _0)]
    UnknownDevice(u32),

    #[fail(display = "Device is missing required features or extensions: {}", _0)]
    Unsupported(&'static str),
}

/// Errors surfaced by device operations and resource creation.
#[derive(Fail, Debug)]
pub enum DeviceError {
    #[fail(display = "There's not enough host memory to create the requested object.")]
    OutOfHostMemory,

    #[fail(display = "There's not enough device memory to create the requested object.")]
    OutOfDeviceMemory,

    #[fail(display = "The device has been lost.")]
    DeviceLost,

    #[fail(display = "Device is missing required features: {}", _0)]
    Unsupported(&'static str),

    #[fail(display = "Device allocation failed: {}", _0)]
    AllocationFailed(String),

    #[fail(display = "Vulkan call failed: {}", _0)]
    VkFailed(vk::Result),
}

impl DeviceError {
    /// Translates a raw backend result into the error taxonomy of the RHI.
    pub fn from_vk(result: vk::Result) -> DeviceError {
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => DeviceError::OutOfHostMemory,
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => DeviceError::OutOfDeviceMemory,
            vk::Result::ERROR_DEVICE_LOST => DeviceError::DeviceLost,
            other => DeviceError::VkFailed(other),
        }
    }
}

/// Errors detected while building or compiling a render graph.
#[derive(Fail, Debug, Clone, Eq, PartialEq)]
pub enum RenderGraphError {
    #[fail(display = "The render graph contains a cycle.")]
    Cycle,

    #[fail(display = "Resource version {} is written by more than one node.", _0)]
    DoubleWriter(u32),

    #[fail(display = "Resource version {} is read but never declared or produced.", _0)]
    DanglingRead(u32),

    #[fail(display = "Render pass attachment slot holds version {} which is not a texture.", _0)]
    AttachmentNotTexture(u32),

    #[fail(display = "Render pass node '{}' has more than one depth stencil attachment.", _0)]
    MultipleDepthStencil(String),

    #[fail(
        display = "Render pass node '{}' adds a multisample resolve to a single-sampled color target.",
        _0
    )]
    ResolveWithoutMultisample(String),

    #[fail(
        display = "Render pass node '{}' has a multisample resolve without a matching color target.",
        _0
    )]
    ResolveWithoutColorTarget(String),

    #[fail(
        display = "Render pass node '{}' mixes attachment extents or sample counts.",
        _0
    )]
    AttachmentMismatch(String),
}

/// Errors of the bindless descriptor manager.
#[derive(Fail, Debug, Clone, Eq, PartialEq)]
pub enum BindlessError {
    #[fail(display = "All {} bindless slots of this binding are in use.", _0)]
    OutOfBindlessSlots(u32),
}

/// Errors of the dedicated transfer engine.
#[derive(Fail, Debug, Clone, Eq, PartialEq)]
pub enum TransferError {
    #[fail(
        display = "Transfer of {} bytes exceeds the staging capacity of {} bytes.",
        requested, capacity
    )]
    StagingTooSmall { requested: u64, capacity: u64 },
}

/// Errors surfaced while creating shader modules and pipelines.
#[derive(Fail, Debug)]
pub enum ShaderError {
    #[fail(display = "Shader binary is not valid SPIR-V: {}", _0)]
    InvalidSpirv(&'static str),

    #[fail(display = "Vulkan call failed: {}", _0)]
    VkFailed(vk::Result),
}
