//! Command pools.

use crate::error::Result;
use ash::vk;

/// Command pool whose buffers can be reset individually.
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a pool for `queue_family`.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(device: &ash::Device, queue_family: u32) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = device.create_command_pool(&create_info, None)?;

        Ok(Self { pool, queue_family })
    }

    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate primary command buffers.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be used concurrently.
    pub unsafe fn allocate(
        &self,
        device: &ash::Device,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        Ok(device.allocate_command_buffers(&alloc_info)?)
    }

    /// Return command buffers to the pool.
    ///
    /// # Safety
    /// The buffers must come from this pool and must not be pending.
    pub unsafe fn free(&self, device: &ash::Device, command_buffers: &[vk::CommandBuffer]) {
        if !command_buffers.is_empty() {
            device.free_command_buffers(self.pool, command_buffers);
        }
    }

    /// Destroy the pool and every buffer allocated from it.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_command_pool(self.pool, None);
    }
}
