//! Plain descriptions used to create and inspect RHI objects.

use super::rhi_enums::*;
use super::version_registry::ResourceVersion;
use ash::vk;

/// Two-dimensional size in pixels.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash)]
pub struct Extent2D {
    pub x: u32,
    pub y: u32,
}

impl Extent2D {
    pub fn new(x: u32, y: u32) -> Self {
        Extent2D { x, y }
    }
}

/// Three-dimensional size in pixels.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Hash)]
pub struct Extent3D {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Extent3D {
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Extent3D { x, y, z }
    }
}

/// Properties, features and limits of a device.
#[derive(Debug, Clone, Copy)]
pub struct DeviceProperties {
    /// Highest sample count usable for both color and depth attachments.
    pub max_msaa_samples: u8,

    /// Highest anisotropy value supported by samplers.
    pub max_sampler_anisotropy: f32,
}

/// Device info, used to identify the device to create.
///
/// Exactly the info returned by instance device enumeration.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Index into the instance's device list.
    pub id: u32,

    pub name: String,

    pub device_type: DeviceType,

    /// Whether the device carries every feature the RHI requires.
    pub engine_supported: bool,

    pub properties: DeviceProperties,
}

/// Describes a GPU buffer.
#[derive(Debug, Clone)]
pub struct BufferInfo {
    /// Size in bytes.
    pub size: u64,

    /// Union of every state the buffer will ever be observed in. Determines
    /// the buffer usage flags and which bindless bindings are allocated.
    pub usage: ResourceState,

    /// Whether the buffer lives in host-visible memory and can be written
    /// from the CPU.
    pub cpu_visible: bool,

    pub name: String,
}

impl Default for BufferInfo {
    fn default() -> Self {
        BufferInfo {
            size: 0,
            usage: ResourceState::UNDEFINED,
            cpu_visible: false,
            name: String::new(),
        }
    }
}

/// Describes a GPU texture.
#[derive(Debug, Clone)]
pub struct TextureInfo {
    pub format: Format,

    pub texture_type: TextureType,

    /// Union of every state the texture will ever be observed in.
    pub usage: ResourceState,

    /// Whether cube views may be created over the texture's layers.
    pub cube_compatible: bool,

    /// Width, height and depth. For non-3D textures `z` is the layer count.
    pub extent: Extent3D,

    pub mip_levels: u32,

    /// Sample count, must be a power of two.
    pub samples: u8,

    pub name: String,
}

impl Default for TextureInfo {
    fn default() -> Self {
        TextureInfo {
            format: Format::Invalid,
            texture_type: TextureType::Texture2D,
            usage: ResourceState::UNDEFINED,
            cube_compatible: false,
            extent: Extent3D::new(1, 1, 1),
            mip_levels: 1,
            samples: 1,
            name: String::new(),
        }
    }
}

impl TextureInfo {
    /// Number of array layers; 3D textures always have a single layer.
    pub fn layer_count(&self) -> u32 {
        match self.texture_type {
            TextureType::Texture3D => 1,
            _ => self.extent.z,
        }
    }
}

/// Describes a view over a subresource range of a texture.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TextureViewInfo {
    pub view_type: TextureViewType,
    pub first_mip: u32,
    pub mip_count: u32,
    pub first_layer: u32,
    pub layer_count: u32,
}

/// Describes a sampler.
#[derive(Debug, Clone, Copy)]
pub struct SamplerInfo {
    pub mag_filter: Filter,
    pub min_filter: Filter,
    pub mipmap_mode: Filter,
    pub address_mode_u: AddressMode,
    pub address_mode_v: AddressMode,
    pub address_mode_w: AddressMode,
    pub lod_bias: f32,
    pub min_lod: f32,
    /// Upper LOD clamp; `f32::MAX` disables the clamp.
    pub max_lod: f32,
    pub anisotropy_enabled: bool,
    pub max_anisotropy: f32,
    pub border_color: BorderColor,
}

impl Default for SamplerInfo {
    fn default() -> Self {
        SamplerInfo {
            mag_filter: Filter::Linear,
            min_filter: Filter::Linear,
            mipmap_mode: Filter::Linear,
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            address_mode_w: AddressMode::ClampToEdge,
            lod_bias: 0.0,
            min_lod: 0.0,
            max_lod: f32::MAX,
            anisotropy_enabled: true,
            max_anisotropy: 4.0,
            border_color: BorderColor::OpaqueBlack,
        }
    }
}

/// Describes a swapchain.
///
/// The surface comes from the platform layer (see
/// [`Instance::create_surface`](crate::rhi::vulkan::Instance::create_surface)).
pub struct SwapchainInfo {
    /// Surface to present to. The swapchain takes ownership and destroys it.
    pub surface: vk::SurfaceKHR,

    /// Usage mask of the swapchain textures, e.g. `COLOR_TARGET`.
    pub usage: ResourceState,

    /// Framebuffer size of the window, in pixels.
    pub extent: Extent2D,

    /// Prefer a non-tearing present mode.
    pub vsync: bool,

    /// Minimal number of swapchain images.
    pub min_image_count: u32,

    pub name: String,
}

/// A viewport in framebuffer pixels with a normalized depth range.
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

/// A value which is either fixed or inherited from another resource.
///
/// Transient texture attributes may depend on attributes of a different
/// resource version; the render graph resolves dependent values against the
/// registry before compiling and recreates the texture when an observed
/// value drifts.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DependentValue<T> {
    Fixed(T),
    Dependent {
        /// The resource version the value is inherited from.
        dependency: ResourceVersion,
        /// The value observed at the last resolution.
        value: T,
    },
}

impl<T: Copy + Default + PartialEq> DependentValue<T> {
    /// A value inherited from `dependency`, unresolved until the dependency
    /// holds a concrete resource.
    pub fn dependent_on(dependency: ResourceVersion) -> Self {
        DependentValue::Dependent {
            dependency,
            value: T::default(),
        }
    }

    /// The current value, fixed or last-resolved.
    pub fn get(&self) -> T {
        match *self {
            DependentValue::Fixed(value) => value,
            DependentValue::Dependent { value, .. } => value,
        }
    }

    /// Overwrites the current value, keeping the dependency if any.
    pub fn set(&mut self, new_value: T) {
        match self {
            DependentValue::Fixed(value) => *value = new_value,
            DependentValue::Dependent { value, .. } => *value = new_value,
        }
    }

    pub fn is_dependent(&self) -> bool {
        matches!(self, DependentValue::Dependent { .. })
    }

    /// The version this value depends on, if any.
    pub fn dependency(&self) -> Option<ResourceVersion> {
        match *self {
            DependentValue::Fixed(_) => None,
            DependentValue::Dependent { dependency, .. } => Some(dependency),
        }
    }
}

impl<T: Copy + Default + PartialEq> Default for DependentValue<T> {
    fn default() -> Self {
        DependentValue::Fixed(T::default())
    }
}

impl<T: Copy + Default + PartialEq> From<T> for DependentValue<T> {
    fn from(value: T) -> Self {
        DependentValue::Fixed(value)
    }
}

impl<T: Copy + Default + PartialEq> DependentValue<T> {
    /// Copies the dependency's observed attribute into the cached value.
    /// Returns whether the cached value changed.
    pub fn update_dependent_value(&mut self, observed: T) -> bool {
        match self {
            DependentValue::Fixed(_) => false,
            DependentValue::Dependent { value, .. } => {
                let changed = *value != observed;
                *value = observed;
                changed
            }
        }
    }
}

/// A texture description whose format, extent, mip count and sample count may
/// each be inherited from another resource version.
#[derive(Debug, Clone)]
pub struct DependentTextureInfo {
    pub format: DependentValue<Format>,
    pub texture_type: TextureType,
    pub usage: ResourceState,
    pub cube_compatible: bool,
    pub extent: DependentValue<Extent3D>,
    pub mip_levels: DependentValue<u32>,
    pub samples: DependentValue<u8>,
    pub name: String,
}

impl Default for DependentTextureInfo {
    fn default() -> Self {
        DependentTextureInfo {
            format: DependentValue::Fixed(Format::Invalid),
            texture_type: TextureType::Texture2D,
            usage: ResourceState::UNDEFINED,
            cube_compatible: false,
            extent: DependentValue::Fixed(Extent3D::new(1, 1, 1)),
            mip_levels: DependentValue::Fixed(1),
            samples: DependentValue::Fixed(1),
            name: String::new(),
        }
    }
}

impl DependentTextureInfo {
    /// The texture description with every attribute at its current value.
    pub fn resolved(&self) -> TextureInfo {
        TextureInfo {
            format: self.format.get(),
            texture_type: self.texture_type,
            usage: self.usage,
            cube_compatible: self.cube_compatible,
            extent: self.extent.get(),
            mip_levels: self.mip_levels.get(),
            samples: self.samples.get(),
            name: self.name.clone(),
        }
    }
}

impl DependentTextureInfo {
    /// A fully fixed description.
    pub fn fixed(info: TextureInfo) -> Self {
        DependentTextureInfo {
            format: DependentValue::Fixed(info.format),
            texture_type: info.texture_type,
            usage: info.usage,
            cube_compatible: info.cube_compatible,
            extent: DependentValue::Fixed(info.extent),
            mip_levels: DependentValue::Fixed(info.mip_levels),
            samples: DependentValue::Fixed(info.samples),
            name: info.name,
        }
    }
}
