#![allow(unsafe_code)]

//! SPIR-V shader modules.
//!
//! The shader source compiler lives outside of the RHI; modules are created
//! from finished SPIR-V words.

use super::vulkan_device::DeviceShared;
use crate::rhi::rhi_enums::ShaderError;
use ash::vk;
use std::sync::Arc;

/// Pipeline stage a shader module is compiled for.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    pub(crate) fn vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }
}

/// Finished SPIR-V for one stage.
pub struct ShaderModuleSource {
    pub stage: ShaderStage,
    pub spirv: Vec<u32>,
}

/// A compiled shader module.
pub struct ShaderModule {
    shared: Arc<DeviceShared>,
    raw: vk::ShaderModule,
    stage: ShaderStage,
}

impl ShaderModule {
    pub(crate) fn new(
        shared: Arc<DeviceShared>,
        source: &ShaderModuleSource,
    ) -> Result<ShaderModule, ShaderError> {
        if source.spirv.is_empty() {
            return Err(ShaderError::InvalidSpirv("empty binary"));
        }
        if source.spirv[0] != 0x0723_0203 {
            return Err(ShaderError::InvalidSpirv("bad magic number"));
        }

        let create_info = vk::ShaderModuleCreateInfo::builder().code(&source.spirv);

        let raw = unsafe { shared.raw.create_shader_module(&create_info, None) }
            .map_err(ShaderError::VkFailed)?;

        Ok(ShaderModule {
            shared,
            raw,
            stage: source.stage,
        })
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub(crate) fn raw(&self) -> vk::ShaderModule {
        self.raw
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.shared.raw.destroy_shader_module(self.raw, None);
        }
    }
}
