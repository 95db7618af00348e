//! [`GpuBackend`] on a real Vulkan device and window surface.

use std::collections::HashMap;

use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::backend::{GpuBackend, QueueKind, QueueSubmit, SwapchainDesc, SwapchainParts};
use crate::command::CommandPool;
use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::surface::SurfaceContext;
use crate::swapchain::{AcquireOutcome, PresentStatus, SurfaceCapabilities};

/// Vulkan device, window surface and one command pool per queue kind.
pub struct VulkanBackend {
    gpu: GpuContext,
    surface: SurfaceContext,
    pools: Mutex<HashMap<QueueKind, CommandPool>>,
    // Queues may alias each other; vkQueueSubmit and vkQueuePresentKHR need
    // external synchronization per queue.
    queue_lock: Mutex<()>,
}

impl VulkanBackend {
    /// Create a surface for `window` on `gpu` and the command pools.
    ///
    /// # Safety
    /// The window must outlive the returned backend.
    pub unsafe fn new<W>(gpu: GpuContext, window: &W) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        // SAFETY: the caller keeps the window alive.
        let surface = unsafe { SurfaceContext::from_window(&gpu, window)? };

        let mut pools = HashMap::new();
        for kind in QueueKind::ALL {
            // SAFETY: the family index comes from the device's own queue setup.
            match unsafe { CommandPool::new(gpu.device(), gpu.queue_family(kind)) } {
                Ok(pool) => {
                    pools.insert(kind, pool);
                }
                Err(e) => {
                    // SAFETY: nothing was allocated from these pools yet.
                    unsafe {
                        for pool in pools.values() {
                            pool.destroy(gpu.device());
                        }
                        surface.destroy();
                    }
                    return Err(e);
                }
            }
        }

        Ok(Self {
            gpu,
            surface,
            pools: Mutex::new(pools),
            queue_lock: Mutex::new(()),
        })
    }

    /// Device context, for recording commands and allocating attachments.
    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    pub fn surface(&self) -> &SurfaceContext {
        &self.surface
    }

    fn device(&self) -> &ash::Device {
        self.gpu.device()
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            let _ = self.gpu.device().device_wait_idle();
            for (_, pool) in self.pools.lock().drain() {
                pool.destroy(self.gpu.device());
            }
            self.surface.destroy();
        }
    }
}

impl GpuBackend for VulkanBackend {
    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::default();
        // SAFETY: the device is valid for the lifetime of self.
        Ok(unsafe { self.device().create_semaphore(&info, None)? })
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        // SAFETY: callers guarantee the semaphore is not pending.
        unsafe { self.device().destroy_semaphore(semaphore, None) }
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::default().flags(flags);
        // SAFETY: the device is valid for the lifetime of self.
        Ok(unsafe { self.device().create_fence(&info, None)? })
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        // SAFETY: callers guarantee the fence is not pending.
        unsafe { self.device().destroy_fence(fence, None) }
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn wait_for_fences(&self, fences: &[vk::Fence], timeout_ns: u64) -> Result<()> {
        // SAFETY: fences were created by this device.
        unsafe { self.device().wait_for_fences(fences, true, timeout_ns)? };
        Ok(())
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> Result<()> {
        // SAFETY: fences were created by this device and are not pending.
        unsafe { self.device().reset_fences(fences)? };
        Ok(())
    }

    fn fence_signaled(&self, fence: vk::Fence) -> Result<bool> {
        // SAFETY: the fence was created by this device.
        Ok(unsafe { self.device().get_fence_status(fence)? })
    }

    fn allocate_command_buffers(
        &self,
        queue: QueueKind,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let pools = self.pools.lock();
        let pool = pools
            .get(&queue)
            .ok_or_else(|| GpuError::InvalidState(format!("no command pool for {queue:?}")))?;
        // SAFETY: the pool lock serializes access to the pool.
        unsafe { pool.allocate(self.device(), count) }
    }

    fn free_command_buffers(&self, queue: QueueKind, command_buffers: &[vk::CommandBuffer]) {
        let pools = self.pools.lock();
        if let Some(pool) = pools.get(&queue) {
            // SAFETY: buffers came from this pool; callers guarantee they are idle.
            unsafe { pool.free(self.device(), command_buffers) }
        }
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        // SAFETY: pools are created with RESET_COMMAND_BUFFER; callers waited
        // on the fence guarding this buffer.
        unsafe {
            self.device()
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;
        }
        Ok(())
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        let info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        // SAFETY: the buffer is in the initial state after a reset.
        unsafe { self.device().begin_command_buffer(command_buffer, &info)? };
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        // SAFETY: the buffer is in the recording state.
        unsafe { self.device().end_command_buffer(command_buffer)? };
        Ok(())
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn queue_submit(&self, queue: QueueKind, submit: &QueueSubmit<'_>) -> Result<()> {
        let wait_semaphores: Vec<vk::Semaphore> =
            submit.waits.iter().map(|w| w.semaphore).collect();
        let wait_stages: Vec<vk::PipelineStageFlags> =
            submit.waits.iter().map(|w| w.stage_mask).collect();

        let submit_info = vk::SubmitInfo::default()
            .command_buffers(submit.command_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(submit.signals);

        let _guard = self.queue_lock.lock();
        // SAFETY: every handle in the submission was created by this device
        // and the queue lock is held.
        unsafe {
            self.device().queue_submit(
                self.gpu.queue(queue),
                &[submit_info],
                submit.fence.unwrap_or_default(),
            )?;
        }
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        let _guard = self.queue_lock.lock();
        self.gpu.wait_idle()
    }

    fn surface_capabilities(&self) -> Result<SurfaceCapabilities> {
        self.surface.capabilities(&self.gpu)
    }

    fn create_swapchain(
        &self,
        desc: &SwapchainDesc,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<SwapchainParts> {
        let queue_families = [self.gpu.queue_family(QueueKind::Graphics)];
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface.surface)
            .min_image_count(desc.image_count)
            .image_format(desc.surface_format.format)
            .image_color_space(desc.surface_format.color_space)
            .image_extent(desc.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(&queue_families)
            .pre_transform(desc.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(desc.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let loader = &self.surface.swapchain_loader;
        // SAFETY: the surface and device are valid; the old swapchain, if
        // any, was created by this loader.
        let swapchain = unsafe { loader.create_swapchain(&create_info, None)? };

        let mut parts = SwapchainParts {
            swapchain,
            images: Vec::new(),
            image_views: Vec::new(),
        };

        let populate = (|| -> Result<()> {
            // SAFETY: the swapchain was just created.
            parts.images = unsafe { loader.get_swapchain_images(swapchain)? };
            for &image in &parts.images {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(desc.surface_format.format)
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .level_count(1)
                            .layer_count(1),
                    );
                // SAFETY: the image belongs to the swapchain created above.
                let view = unsafe { self.device().create_image_view(&view_info, None)? };
                parts.image_views.push(view);
            }
            Ok(())
        })();

        if let Err(e) = populate {
            self.destroy_swapchain(&parts);
            return Err(e);
        }

        Ok(parts)
    }

    fn destroy_swapchain(&self, parts: &SwapchainParts) {
        // SAFETY: callers drained every queue that used these images.
        unsafe {
            for &view in &parts.image_views {
                self.device().destroy_image_view(view, None);
            }
            if parts.swapchain != vk::SwapchainKHR::null() {
                self.surface
                    .swapchain_loader
                    .destroy_swapchain(parts.swapchain, None);
            }
        }
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<AcquireOutcome> {
        // SAFETY: the swapchain and semaphore were created by this device and
        // the semaphore has no pending signal.
        let result = unsafe {
            self.surface.swapchain_loader.acquire_next_image(
                swapchain,
                timeout_ns,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, false)) => Ok(AcquireOutcome::Acquired(index)),
            Ok((index, true)) => Ok(AcquireOutcome::Suboptimal(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentStatus> {
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let _guard = self.queue_lock.lock();
        // SAFETY: the graphics family was checked for present support when
        // the swapchain was built; the queue lock is held.
        let result = unsafe {
            self.surface
                .swapchain_loader
                .queue_present(self.gpu.queue(QueueKind::Graphics), &present_info)
        };

        match result {
            Ok(false) => Ok(PresentStatus::Ok),
            Ok(true) => Ok(PresentStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
            Err(e) => Err(GpuError::from(e)),
        }
    }
}
