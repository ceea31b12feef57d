//! Vulkan implementation of the RHI.
//!
//! One file per subsystem: instance and device, the queue set, the bindless
//! descriptor manager, resources, the swapchain, command pools and buffers,
//! the timeline semaphore wrapper and the dedicated transfer engine.

pub mod vulkan_buffer;
pub mod vulkan_command_buffer;
pub mod vulkan_command_pool;
pub mod vulkan_descriptor_manager;
pub mod vulkan_device;
pub mod vulkan_instance;
pub mod vulkan_pipeline;
pub mod vulkan_queue_set;
pub mod vulkan_shader_module;
pub mod vulkan_swapchain;
pub mod vulkan_texture;
pub mod vulkan_timeline_semaphore;
pub mod vulkan_transfer_engine;
pub mod vulkan_utils;

pub use self::vulkan_buffer::{Buffer, BufferPack};
pub use self::vulkan_command_buffer::CommandBuffer;
pub use self::vulkan_command_pool::CommandPool;
pub use self::vulkan_descriptor_manager::{
    BufferBindings, DescriptorManager, TextureBindings, BINDLESS_INVALID_INDEX,
    MAX_BINDLESS_RESOURCES_PER_TYPE,
};
pub use self::vulkan_device::{Device, DeviceShared, MAX_RENDER_GRAPHS_PER_FRAME};
pub use self::vulkan_instance::Instance;
pub use self::vulkan_pipeline::{
    BlendFactor, BlendOperation, ColorBlendInfo, CompareOperation, ComputePipelineInfo, CullMode,
    DepthStencilTestInfo, FrontFace, GraphicsPipelineInfo, InputAssemblyInfo, Pipeline,
    PolygonMode, RasterizationInfo, Topology,
};
pub use self::vulkan_queue_set::QueueSet;
pub use self::vulkan_shader_module::{ShaderModule, ShaderModuleSource, ShaderStage};
pub use self::vulkan_swapchain::Swapchain;
pub use self::vulkan_texture::Texture;
pub use self::vulkan_timeline_semaphore::TimelineSemaphore;
pub use self::vulkan_transfer_engine::{
    BufferTransfer, TextureTransfer, TransferEngine, TransferRequest,
};
