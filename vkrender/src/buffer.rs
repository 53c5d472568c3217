// Device buffer allocation helpers.
//
// Grounded on device.rs's create_buffer_with_size / find_memory_type_index
// pattern: one vkBuffer + one dedicated vkDeviceMemory per call. This
// renderer doesn't need a general-purpose suballocator for long-lived
// buffers (vertex/index/material/section data is allocated once at scene
// load); transient.rs covers the per-frame case.

use ash::vk;
use std::sync::Arc;

use crate::context::GfxContext;
use crate::error::{RenderError, Result};

pub struct Buffer {
    pub handle: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    ctx: Arc<GfxContext>,
    mapped: Option<*mut std::ffi::c_void>,
}

unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

impl Buffer {
    pub fn new(
        ctx: Arc<GfxContext>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        mem_flags: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = unsafe {
            ctx.device
                .create_buffer(&info, None)
                .map_err(RenderError::Vulkan)?
        };
        let reqs = unsafe { ctx.device.get_buffer_memory_requirements(handle) };
        let type_index = ctx
            .find_memory_type_index(reqs.memory_type_bits, mem_flags)
            .ok_or_else(|| {
                RenderError::DeviceSelection("no memory type for buffer allocation".to_string())
            })?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(reqs.size)
            .memory_type_index(type_index);

        let memory = unsafe {
            ctx.device
                .allocate_memory(&alloc_info, None)
                .map_err(RenderError::Vulkan)?
        };
        unsafe {
            ctx.device
                .bind_buffer_memory(handle, memory, 0)
                .map_err(RenderError::Vulkan)?;
        }

        Ok(Self {
            handle,
            memory,
            size: reqs.size,
            ctx,
            mapped: None,
        })
    }

    pub fn new_host_visible(ctx: Arc<GfxContext>, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Result<Self> {
        Self::new(
            ctx,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    pub fn new_device_local(ctx: Arc<GfxContext>, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Result<Self> {
        Self::new(ctx, size, usage, vk::MemoryPropertyFlags::DEVICE_LOCAL)
    }

    /// Persistently maps a host-visible buffer and writes `data` at offset 0.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let ptr = self.map()?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr as *mut u8, data.len());
        }
        Ok(())
    }

    pub fn map(&mut self) -> Result<*mut std::ffi::c_void> {
        if let Some(p) = self.mapped {
            return Ok(p);
        }
        let ptr = unsafe {
            self.ctx
                .device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .map_err(RenderError::Vulkan)?
        };
        self.mapped = Some(ptr);
        Ok(ptr)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            if self.mapped.is_some() {
                self.ctx.device.unmap_memory(self.memory);
            }
            self.ctx.device.destroy_buffer(self.handle, None);
            self.ctx.device.free_memory(self.memory, None);
        }
    }
}
