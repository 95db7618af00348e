//! The device seam the frame loop is written against.
//!
//! Everything above this trait (swapchain bookkeeping, frame slots, the queue
//! submission graph, the scheduler) only ever talks to a [`GpuBackend`]. The
//! Vulkan implementation lives in [`crate::vulkan`]; tests drive the same code
//! through a simulated GPU.
//!
//! Handles are plain `ash` handles. A backend only has to accept handles it
//! created itself.

use ash::vk;

use crate::error::Result;
use crate::swapchain::{AcquireOutcome, PresentStatus, SurfaceCapabilities};

/// Hardware queue a stage is submitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueueKind {
    /// Graphics queue. Presentation also goes through it.
    Graphics,
    /// Compute queue (dedicated if the device has one).
    Compute,
    /// Transfer queue (dedicated if the device has one).
    Transfer,
}

impl QueueKind {
    /// All queue kinds, in a stable order.
    pub const ALL: [QueueKind; 3] = [Self::Graphics, Self::Compute, Self::Transfer];
}

/// One semaphore a submission waits on, and the pipeline stage that waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreWait {
    pub semaphore: vk::Semaphore,
    pub stage_mask: vk::PipelineStageFlags,
}

/// A single queue submission.
///
/// The queue must not start `command_buffers` before every semaphore in
/// `waits` is signaled, and signals `signals` and `fence` only after the
/// commands finish.
#[derive(Debug, Clone, Copy)]
pub struct QueueSubmit<'a> {
    pub command_buffers: &'a [vk::CommandBuffer],
    pub waits: &'a [SemaphoreWait],
    pub signals: &'a [vk::Semaphore],
    pub fence: Option<vk::Fence>,
}

/// Parameters the swapchain wrapper hands to the backend on (re)build.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainDesc {
    pub image_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

/// Handles created for one swapchain.
#[derive(Debug, Clone, Default)]
pub struct SwapchainParts {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
}

/// Device operations needed by the frame loop.
pub trait GpuBackend {
    /// Create a binary semaphore.
    fn create_semaphore(&self) -> Result<vk::Semaphore>;

    /// Destroy a semaphore. It must not be referenced by pending work.
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    /// Create a fence, optionally already signaled.
    fn create_fence(&self, signaled: bool) -> Result<vk::Fence>;

    /// Destroy a fence. It must not be referenced by pending work.
    fn destroy_fence(&self, fence: vk::Fence);

    /// Block until every fence in `fences` is signaled.
    fn wait_for_fences(&self, fences: &[vk::Fence], timeout_ns: u64) -> Result<()>;

    /// Reset fences to the unsignaled state.
    fn reset_fences(&self, fences: &[vk::Fence]) -> Result<()>;

    /// Non-blocking fence query.
    fn fence_signaled(&self, fence: vk::Fence) -> Result<bool>;

    /// Allocate primary command buffers usable on `queue`.
    fn allocate_command_buffers(
        &self,
        queue: QueueKind,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>>;

    /// Free command buffers allocated for `queue`.
    fn free_command_buffers(&self, queue: QueueKind, command_buffers: &[vk::CommandBuffer]);

    /// Reset a command buffer. It must not be referenced by pending work.
    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()>;

    /// Begin one-time-submit recording.
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()>;

    /// Finish recording.
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()>;

    /// Submit work to a queue.
    fn queue_submit(&self, queue: QueueKind, submit: &QueueSubmit<'_>) -> Result<()>;

    /// Block until every queue is idle.
    fn wait_idle(&self) -> Result<()>;

    /// Query what the surface supports right now.
    fn surface_capabilities(&self) -> Result<SurfaceCapabilities>;

    /// Create a swapchain and views for its images.
    fn create_swapchain(
        &self,
        desc: &SwapchainDesc,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<SwapchainParts>;

    /// Destroy a swapchain and the views created with it.
    fn destroy_swapchain(&self, parts: &SwapchainParts);

    /// Acquire the next presentable image, signaling `semaphore` once usable.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<AcquireOutcome>;

    /// Queue `image_index` for presentation after `wait_semaphores`.
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentStatus>;
}
