#![allow(unsafe_code)]

//! GPU buffers and buffer packs.

use super::vulkan_descriptor_manager::BufferBindings;
use super::vulkan_device::DeviceShared;
use super::vulkan_utils::vk_buffer_usage;
use crate::rhi::rhi_enums::DeviceError;
use crate::rhi::rhi_structs::BufferInfo;
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use log::error;
use std::sync::{Arc, Mutex};

/// A typed GPU buffer owning its bindless indices.
pub struct Buffer {
    shared: Arc<DeviceShared>,
    raw: vk::Buffer,
    allocation: Mutex<Option<Allocation>>,
    bindings: BufferBindings,
    info: BufferInfo,
}

impl Buffer {
    /// Creates and allocates a buffer and registers it in the bindless table
    /// for every binding its usage asks for.
    pub(crate) fn new(
        shared: Arc<DeviceShared>,
        info: BufferInfo,
    ) -> Result<Arc<Buffer>, DeviceError> {
        let create_info = vk::BufferCreateInfo::builder()
            .size(info.size)
            .usage(vk_buffer_usage(info.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let raw = unsafe { shared.raw.create_buffer(&create_info, None) }
            .map_err(DeviceError::from_vk)?;

        let requirements = unsafe { shared.raw.get_buffer_memory_requirements(raw) };

        let location = if info.cpu_visible {
            MemoryLocation::CpuToGpu
        } else {
            MemoryLocation::GpuOnly
        };

        let allocation = shared
            .allocate(&AllocationCreateDesc {
                name: &info.name,
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|err| DeviceError::AllocationFailed(err.to_string()))?;

        unsafe {
            shared
                .raw
                .bind_buffer_memory(raw, allocation.memory(), allocation.offset())
        }
        .map_err(DeviceError::from_vk)?;

        let bindings = shared
            .descriptors
            .add_buffer(raw, info.usage)
            .map_err(|err| {
                error!("bindless registration failed for '{}': {}", info.name, err);
                DeviceError::OutOfDeviceMemory
            })?;

        if !info.name.is_empty() {
            shared.set_debug_name(raw, &info.name);
        }

        Ok(Arc::new(Buffer {
            shared,
            raw,
            allocation: Mutex::new(Some(allocation)),
            bindings,
            info,
        }))
    }

    pub fn info(&self) -> &BufferInfo {
        &self.info
    }

    /// Bindless index in the uniform-buffer binding, or the invalid index.
    pub fn uniform_binding(&self) -> u16 {
        self.bindings.uniform
    }

    /// Bindless index in the storage-buffer binding, or the invalid index.
    pub fn storage_binding(&self) -> u16 {
        self.bindings.storage
    }

    pub(crate) fn raw(&self) -> vk::Buffer {
        self.raw
    }

    /// Copies `data` into a CPU-visible buffer at `offset`.
    pub fn write_bytes(&self, offset: u64, data: &[u8]) {
        if !self.info.cpu_visible {
            error!(
                "write_bytes on the non CPU-visible buffer '{}'",
                self.info.name
            );
            return;
        }
        if offset + data.len() as u64 > self.info.size {
            error!(
                "write_bytes out of bounds on '{}': offset {} + {} > size {}",
                self.info.name,
                offset,
                data.len(),
                self.info.size
            );
            return;
        }

        let guard = self.allocation.lock().unwrap();
        let mapped = guard.as_ref().and_then(|allocation| allocation.mapped_ptr());

        match mapped {
            Some(ptr) => unsafe {
                std::ptr::copy_nonoverlapping(
                    data.as_ptr(),
                    (ptr.as_ptr() as *mut u8).add(offset as usize),
                    data.len(),
                );
            },
            None => error!("buffer '{}' has no mapped memory", self.info.name),
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.shared.descriptors.remove_buffer(self.bindings);

        if let Some(allocation) = self.allocation.lock().unwrap().take() {
            self.shared.free_allocation(allocation);
        }

        unsafe {
            self.shared.raw.destroy_buffer(self.raw, None);
        }
    }
}

/// A named dynamic set of buffers with identical layout, barriered as a
/// group by the render graph.
///
/// Membership is registered at execution time, typically from inside jobs;
/// barrier planning stays agnostic to it and the final buffer list is read
/// only when barriers are emitted.
pub struct BufferPack {
    name: String,
    buffers: Mutex<Vec<Arc<Buffer>>>,
}

impl BufferPack {
    /// An empty pack. Packs used by a render graph are created through
    /// [`RenderGraphBuilder::declare_import_buffer_pack`](crate::rhi::RenderGraphBuilder::declare_import_buffer_pack).
    pub fn new(name: &str) -> BufferPack {
        BufferPack {
            name: name.to_owned(),
            buffers: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a member buffer for the current execution.
    pub fn register_buffer(&self, buffer: Arc<Buffer>) {
        self.buffers.lock().unwrap().push(buffer);
    }

    /// Drops every member.
    pub fn clear(&self) {
        self.buffers.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The current membership, cloned so barrier emission sees a stable list
    /// while jobs keep mutating the pack.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Buffer>> {
        self.buffers.lock().unwrap().clone()
    }
}
