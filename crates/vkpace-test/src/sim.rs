//! Deterministic simulated GPU.
//!
//! Time is measured in virtual ticks. Each queue executes one submission at a
//! time; a submission starts once its queue is free and every semaphore it
//! waits on has been signaled, and runs for the sum of the costs annotated on
//! its command buffers. Blocking calls advance the clock to the point where
//! they would return on real hardware.
//!
//! Misuse that a validation layer would report (double-signaled binary
//! semaphores, waits that can never be satisfied, resetting pending command
//! buffers, zero-sized swapchains) is recorded as a [`SimError`] instead of
//! failing the call, so tests can assert the log stays empty.

use std::collections::{HashMap, VecDeque};

use ash::vk::{self, Handle};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::trace;
use vkpace_gpu::{
    AcquireOutcome, GpuBackend, GpuError, PresentStatus, QueueKind, QueueSubmit, Result,
    SurfaceCapabilities, SwapchainDesc, SwapchainParts,
};

/// Cost of a command buffer nobody annotated.
pub const DEFAULT_COST: u64 = 1;

/// Protocol violation observed by the simulator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error("semaphore {0:#x} signaled while a signal is still pending")]
    DoubleSignal(u64),
    #[error("wait on semaphore {0:#x} that has no pending signal")]
    WaitWithoutSignal(u64),
    #[error("command buffer {0:#x} reset or resubmitted while pending")]
    CommandBufferBusy(u64),
    #[error("command buffer {0:#x} submitted while still recording")]
    CommandBufferRecording(u64),
    #[error("fence {0:#x} reset while its submission is pending")]
    FenceResetWhilePending(u64),
    #[error("fence {0:#x} submitted while already signaled")]
    FenceAlreadySignaled(u64),
    #[error("wait on fence {0:#x} that nothing will signal")]
    FenceNeverSignals(u64),
    #[error("swapchain created with a {0}x{1} extent")]
    ZeroExtentSwapchain(u32, u32),
    #[error("acquire while every swapchain image is held")]
    AllImagesHeld,
    #[error("unknown {0} handle {1:#x}")]
    UnknownHandle(&'static str, u64),
}

/// One queue submission as executed by the simulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimSubmission {
    pub queue: QueueKind,
    /// Tags annotated on the submitted command buffers.
    pub tags: Vec<String>,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub waits: Vec<vk::Semaphore>,
    pub signals: Vec<vk::Semaphore>,
    pub fence: Option<vk::Fence>,
    /// CPU time of the submit call.
    pub submitted_at: u64,
    pub start: u64,
    pub end: u64,
}

/// One blocking fence wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FenceWait {
    pub fences: Vec<vk::Fence>,
    pub start: u64,
    pub end: u64,
}

impl FenceWait {
    /// Whether the CPU actually blocked.
    pub fn blocked(&self) -> bool {
        self.end > self.start
    }
}

/// One present request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimPresent {
    pub swapchain: vk::SwapchainKHR,
    pub image_index: u32,
    /// CPU time of the present call.
    pub at: u64,
    /// When the image reaches the screen.
    pub visible_at: u64,
    pub status: PresentStatus,
}

/// Live handle counts, for leak checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveCounts {
    pub semaphores: usize,
    pub fences: usize,
    pub command_buffers: usize,
    pub swapchains: usize,
    pub image_views: usize,
}

impl LiveCounts {
    pub fn total(&self) -> usize {
        self.semaphores + self.fences + self.command_buffers + self.swapchains + self.image_views
    }
}

/// Status forced onto the next acquire or present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedStatus {
    Suboptimal,
    OutOfDate,
    /// Acquire reports an index past the end of the image set.
    BadIndex,
}

#[derive(Debug, Default)]
struct SemaphoreState {
    pending_signal: Option<u64>,
}

#[derive(Debug, Default)]
struct FenceState {
    /// Tick at which the fence is (or will be) signaled.
    signal_at: Option<u64>,
}

#[derive(Debug)]
struct CommandBufferState {
    queue: QueueKind,
    recording: bool,
    busy_until: u64,
    cost: u64,
    tag: Option<String>,
}

#[derive(Debug)]
struct SwapchainState {
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    held: Vec<bool>,
    available_at: Vec<u64>,
    next: usize,
}

#[derive(Debug)]
struct SimState {
    now: u64,
    next_handle: u64,
    device_lost: bool,
    semaphores: HashMap<u64, SemaphoreState>,
    fences: HashMap<u64, FenceState>,
    command_buffers: HashMap<u64, CommandBufferState>,
    swapchains: HashMap<u64, SwapchainState>,
    queue_busy_until: HashMap<QueueKind, u64>,
    surface_extent: vk::Extent2D,
    min_image_count: u32,
    max_image_count: u32,
    present_supported: bool,
    /// Semaphore, fence and command buffer creations left before they fail.
    creations_left: Option<usize>,
    acquire_script: VecDeque<ScriptedStatus>,
    present_script: VecDeque<ScriptedStatus>,
    submissions: Vec<SimSubmission>,
    fence_waits: Vec<FenceWait>,
    presents: Vec<SimPresent>,
    violations: Vec<SimError>,
}

impl SimState {
    fn handle(&mut self) -> u64 {
        let id = self.next_handle;
        self.next_handle += 1;
        id
    }

    fn violation(&mut self, error: SimError) {
        trace!("violation: {error}");
        self.violations.push(error);
    }

    fn signal_semaphore(&mut self, semaphore: vk::Semaphore, at: u64) {
        let raw = semaphore.as_raw();
        let double = match self.semaphores.get_mut(&raw) {
            Some(state) => state.pending_signal.replace(at).is_some(),
            None => {
                self.violation(SimError::UnknownHandle("semaphore", raw));
                return;
            }
        };
        if double {
            self.violation(SimError::DoubleSignal(raw));
        }
    }

    /// Consume a pending signal and return when it fires.
    fn wait_semaphore(&mut self, semaphore: vk::Semaphore) -> u64 {
        let raw = semaphore.as_raw();
        let signal = match self.semaphores.get_mut(&raw) {
            Some(state) => state.pending_signal.take(),
            None => {
                self.violation(SimError::UnknownHandle("semaphore", raw));
                return self.now;
            }
        };
        signal.unwrap_or_else(|| {
            self.violation(SimError::WaitWithoutSignal(raw));
            self.now
        })
    }

    /// Account for one object creation, failing once the budget is spent.
    fn creation(&mut self) -> Result<()> {
        match &mut self.creations_left {
            Some(0) => Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn check_lost(&self) -> Result<()> {
        if self.device_lost {
            Err(GpuError::DeviceLost)
        } else {
            Ok(())
        }
    }
}

/// Simulated GPU implementing [`GpuBackend`].
pub struct SimGpu {
    state: Mutex<SimState>,
}

impl Default for SimGpu {
    fn default() -> Self {
        Self::new(vk::Extent2D {
            width: 800,
            height: 600,
        })
    }
}

impl SimGpu {
    /// Create a simulator whose surface starts at `surface_extent`.
    pub fn new(surface_extent: vk::Extent2D) -> Self {
        Self {
            state: Mutex::new(SimState {
                now: 0,
                next_handle: 1,
                device_lost: false,
                semaphores: HashMap::new(),
                fences: HashMap::new(),
                command_buffers: HashMap::new(),
                swapchains: HashMap::new(),
                queue_busy_until: HashMap::new(),
                surface_extent,
                min_image_count: 2,
                max_image_count: 8,
                present_supported: true,
                creations_left: None,
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                submissions: Vec::new(),
                fence_waits: Vec::new(),
                presents: Vec::new(),
                violations: Vec::new(),
            }),
        }
    }

    /// Limit the swapchain image count the surface reports.
    pub fn with_image_limits(self, min: u32, max: u32) -> Self {
        {
            let mut state = self.state.lock();
            state.min_image_count = min;
            state.max_image_count = max;
        }
        self
    }

    /// Whether the graphics family can present to the surface.
    pub fn set_present_supported(&self, supported: bool) {
        self.state.lock().present_supported = supported;
    }

    /// Current virtual time.
    pub fn now(&self) -> u64 {
        self.state.lock().now
    }

    /// Let CPU time pass.
    pub fn advance(&self, ticks: u64) {
        self.state.lock().now += ticks;
    }

    pub fn set_surface_extent(&self, extent: vk::Extent2D) {
        self.state.lock().surface_extent = extent;
    }

    pub fn surface_extent(&self) -> vk::Extent2D {
        self.state.lock().surface_extent
    }

    /// Let the next `count` semaphore, fence or command buffer creations
    /// succeed and fail every one after with out-of-memory.
    pub fn fail_creations_after(&self, count: usize) {
        self.state.lock().creations_left = Some(count);
    }

    /// Make every following device call fail with `DeviceLost`.
    pub fn inject_device_lost(&self) {
        self.state.lock().device_lost = true;
    }

    /// Force the status of an upcoming acquire.
    pub fn script_acquire(&self, status: ScriptedStatus) {
        self.state.lock().acquire_script.push_back(status);
    }

    /// Force the status of an upcoming present.
    pub fn script_present(&self, status: ScriptedStatus) {
        self.state.lock().present_script.push_back(status);
    }

    /// Set how long `cmd` runs and tag it for the submission log.
    ///
    /// Applies until the command buffer is reset.
    pub fn annotate(&self, cmd: vk::CommandBuffer, cost: u64, tag: impl Into<String>) {
        let mut state = self.state.lock();
        let raw = cmd.as_raw();
        match state.command_buffers.get_mut(&raw) {
            Some(cb) => {
                cb.cost = cost;
                cb.tag = Some(tag.into());
            }
            None => state.violation(SimError::UnknownHandle("command buffer", raw)),
        }
    }

    /// Queue a command buffer was allocated for.
    pub fn command_buffer_queue(&self, cmd: vk::CommandBuffer) -> Option<QueueKind> {
        self.state
            .lock()
            .command_buffers
            .get(&cmd.as_raw())
            .map(|cb| cb.queue)
    }

    pub fn submissions(&self) -> Vec<SimSubmission> {
        self.state.lock().submissions.clone()
    }

    pub fn submission_count(&self) -> usize {
        self.state.lock().submissions.len()
    }

    /// Submissions carrying `tag`.
    pub fn submissions_tagged(&self, tag: &str) -> Vec<SimSubmission> {
        self.state
            .lock()
            .submissions
            .iter()
            .filter(|s| s.tags.iter().any(|t| t == tag))
            .cloned()
            .collect()
    }

    pub fn fence_waits(&self) -> Vec<FenceWait> {
        self.state.lock().fence_waits.clone()
    }

    pub fn presents(&self) -> Vec<SimPresent> {
        self.state.lock().presents.clone()
    }

    pub fn violations(&self) -> Vec<SimError> {
        self.state.lock().violations.clone()
    }

    pub fn live_counts(&self) -> LiveCounts {
        let state = self.state.lock();
        LiveCounts {
            semaphores: state.semaphores.len(),
            fences: state.fences.len(),
            command_buffers: state.command_buffers.len(),
            swapchains: state.swapchains.len(),
            image_views: state.swapchains.values().map(|s| s.views.len()).sum(),
        }
    }

    /// Whether `fence` is signaled at the current time.
    pub fn is_signaled(&self, fence: vk::Fence) -> bool {
        let state = self.state.lock();
        state
            .fences
            .get(&fence.as_raw())
            .and_then(|f| f.signal_at)
            .is_some_and(|at| at <= state.now)
    }
}

impl GpuBackend for SimGpu {
    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let mut state = self.state.lock();
        state.creation()?;
        let id = state.handle();
        state.semaphores.insert(id, SemaphoreState::default());
        Ok(vk::Semaphore::from_raw(id))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state.lock();
        let raw = semaphore.as_raw();
        if state.semaphores.remove(&raw).is_none() {
            state.violation(SimError::UnknownHandle("semaphore", raw));
        }
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let mut state = self.state.lock();
        state.creation()?;
        let id = state.handle();
        let signal_at = signaled.then_some(state.now);
        state.fences.insert(id, FenceState { signal_at });
        Ok(vk::Fence::from_raw(id))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        let raw = fence.as_raw();
        if state.fences.remove(&raw).is_none() {
            state.violation(SimError::UnknownHandle("fence", raw));
        }
    }

    fn wait_for_fences(&self, fences: &[vk::Fence], timeout_ns: u64) -> Result<()> {
        let mut state = self.state.lock();
        state.check_lost()?;

        let start = state.now;
        let mut until = start;
        for fence in fences {
            let raw = fence.as_raw();
            match state.fences.get(&raw).map(|f| f.signal_at) {
                Some(Some(at)) => until = until.max(at),
                Some(None) => {
                    state.violation(SimError::FenceNeverSignals(raw));
                    return Err(GpuError::Timeout);
                }
                None => {
                    state.violation(SimError::UnknownHandle("fence", raw));
                    return Err(GpuError::Timeout);
                }
            }
        }

        if until - start > timeout_ns {
            state.now += timeout_ns;
            return Err(GpuError::Timeout);
        }

        state.now = until;
        state.fence_waits.push(FenceWait {
            fences: fences.to_vec(),
            start,
            end: until,
        });
        Ok(())
    }

    fn reset_fences(&self, fences: &[vk::Fence]) -> Result<()> {
        let mut state = self.state.lock();
        state.check_lost()?;
        let now = state.now;
        for fence in fences {
            let raw = fence.as_raw();
            let pending = match state.fences.get_mut(&raw) {
                Some(f) => f.signal_at.take().is_some_and(|at| at > now),
                None => {
                    state.violation(SimError::UnknownHandle("fence", raw));
                    continue;
                }
            };
            if pending {
                state.violation(SimError::FenceResetWhilePending(raw));
            }
        }
        Ok(())
    }

    fn fence_signaled(&self, fence: vk::Fence) -> Result<bool> {
        self.state.lock().check_lost()?;
        Ok(self.is_signaled(fence))
    }

    fn allocate_command_buffers(
        &self,
        queue: QueueKind,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let mut state = self.state.lock();
        state.creation()?;
        let mut buffers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = state.handle();
            state.command_buffers.insert(
                id,
                CommandBufferState {
                    queue,
                    recording: false,
                    busy_until: 0,
                    cost: DEFAULT_COST,
                    tag: None,
                },
            );
            buffers.push(vk::CommandBuffer::from_raw(id));
        }
        Ok(buffers)
    }

    fn free_command_buffers(&self, _queue: QueueKind, command_buffers: &[vk::CommandBuffer]) {
        let mut state = self.state.lock();
        let now = state.now;
        for cmd in command_buffers {
            let raw = cmd.as_raw();
            match state.command_buffers.remove(&raw) {
                Some(cb) if cb.busy_until > now => {
                    state.violation(SimError::CommandBufferBusy(raw));
                }
                Some(_) => {}
                None => state.violation(SimError::UnknownHandle("command buffer", raw)),
            }
        }
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        let mut state = self.state.lock();
        let now = state.now;
        let raw = command_buffer.as_raw();
        let busy = match state.command_buffers.get_mut(&raw) {
            Some(cb) => {
                cb.recording = false;
                cb.cost = DEFAULT_COST;
                cb.tag = None;
                cb.busy_until > now
            }
            None => {
                state.violation(SimError::UnknownHandle("command buffer", raw));
                return Ok(());
            }
        };
        if busy {
            state.violation(SimError::CommandBufferBusy(raw));
        }
        Ok(())
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        let mut state = self.state.lock();
        let raw = command_buffer.as_raw();
        match state.command_buffers.get_mut(&raw) {
            Some(cb) => cb.recording = true,
            None => state.violation(SimError::UnknownHandle("command buffer", raw)),
        }
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        let mut state = self.state.lock();
        let raw = command_buffer.as_raw();
        match state.command_buffers.get_mut(&raw) {
            Some(cb) => cb.recording = false,
            None => state.violation(SimError::UnknownHandle("command buffer", raw)),
        }
        Ok(())
    }

    fn queue_submit(&self, queue: QueueKind, submit: &QueueSubmit<'_>) -> Result<()> {
        let mut state = self.state.lock();
        state.check_lost()?;
        let now = state.now;

        let mut cost = 0;
        let mut tags = Vec::new();
        for cmd in submit.command_buffers {
            let raw = cmd.as_raw();
            let Some(cb) = state.command_buffers.get(&raw) else {
                state.violation(SimError::UnknownHandle("command buffer", raw));
                continue;
            };
            let (recording, busy) = (cb.recording, cb.busy_until > now);
            cost += cb.cost;
            tags.extend(cb.tag.clone());
            if recording {
                state.violation(SimError::CommandBufferRecording(raw));
            }
            if busy {
                state.violation(SimError::CommandBufferBusy(raw));
            }
        }

        let mut start = now.max(state.queue_busy_until.get(&queue).copied().unwrap_or(0));
        for wait in submit.waits {
            start = start.max(state.wait_semaphore(wait.semaphore));
        }
        let end = start + cost;

        state.queue_busy_until.insert(queue, end);
        for cmd in submit.command_buffers {
            if let Some(cb) = state.command_buffers.get_mut(&cmd.as_raw()) {
                cb.busy_until = end;
            }
        }
        for &semaphore in submit.signals {
            state.signal_semaphore(semaphore, end);
        }
        if let Some(fence) = submit.fence {
            let raw = fence.as_raw();
            let already = match state.fences.get_mut(&raw) {
                Some(f) => f.signal_at.replace(end).is_some(),
                None => {
                    state.violation(SimError::UnknownHandle("fence", raw));
                    false
                }
            };
            if already {
                state.violation(SimError::FenceAlreadySignaled(raw));
            }
        }

        trace!("submit {queue:?} {tags:?}: {start}..{end}");
        state.submissions.push(SimSubmission {
            queue,
            tags,
            command_buffers: submit.command_buffers.to_vec(),
            waits: submit.waits.iter().map(|w| w.semaphore).collect(),
            signals: submit.signals.to_vec(),
            fence: submit.fence,
            submitted_at: now,
            start,
            end,
        });
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.check_lost()?;
        let idle_at = state.queue_busy_until.values().copied().max().unwrap_or(0);
        state.now = state.now.max(idle_at);
        Ok(())
    }

    fn surface_capabilities(&self) -> Result<SurfaceCapabilities> {
        let state = self.state.lock();
        state.check_lost()?;
        Ok(SurfaceCapabilities {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: state.min_image_count,
                max_image_count: state.max_image_count,
                current_extent: state.surface_extent,
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 16384,
                    height: 16384,
                },
                max_image_array_layers: 1,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            },
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
            present_supported: state.present_supported,
        })
    }

    fn create_swapchain(
        &self,
        desc: &SwapchainDesc,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<SwapchainParts> {
        let mut state = self.state.lock();
        state.check_lost()?;

        if desc.extent.width == 0 || desc.extent.height == 0 {
            state.violation(SimError::ZeroExtentSwapchain(
                desc.extent.width,
                desc.extent.height,
            ));
            return Err(GpuError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED));
        }
        if old_swapchain != vk::SwapchainKHR::null()
            && !state.swapchains.contains_key(&old_swapchain.as_raw())
        {
            state.violation(SimError::UnknownHandle("swapchain", old_swapchain.as_raw()));
        }

        let id = state.handle();
        let count = desc.image_count as usize;
        let mut images = Vec::with_capacity(count);
        let mut views = Vec::with_capacity(count);
        for _ in 0..count {
            images.push(vk::Image::from_raw(state.handle()));
            views.push(vk::ImageView::from_raw(state.handle()));
        }

        state.swapchains.insert(
            id,
            SwapchainState {
                extent: desc.extent,
                images: images.clone(),
                views: views.clone(),
                held: vec![false; count],
                available_at: vec![0; count],
                next: 0,
            },
        );

        Ok(SwapchainParts {
            swapchain: vk::SwapchainKHR::from_raw(id),
            images,
            image_views: views,
        })
    }

    fn destroy_swapchain(&self, parts: &SwapchainParts) {
        let mut state = self.state.lock();
        let raw = parts.swapchain.as_raw();
        if state.swapchains.remove(&raw).is_none() {
            state.violation(SimError::UnknownHandle("swapchain", raw));
        }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
        _timeout_ns: u64,
    ) -> Result<AcquireOutcome> {
        let mut state = self.state.lock();
        state.check_lost()?;

        let scripted = state.acquire_script.pop_front();
        if scripted == Some(ScriptedStatus::OutOfDate) {
            return Ok(AcquireOutcome::OutOfDate);
        }

        let surface_extent = state.surface_extent;
        let raw = swapchain.as_raw();
        let Some(chain) = state.swapchains.get_mut(&raw) else {
            state.violation(SimError::UnknownHandle("swapchain", raw));
            return Err(GpuError::Vulkan(vk::Result::ERROR_UNKNOWN));
        };
        if chain.extent != surface_extent {
            return Ok(AcquireOutcome::OutOfDate);
        }

        let count = chain.images.len();
        if scripted == Some(ScriptedStatus::BadIndex) {
            let now = state.now;
            state.signal_semaphore(semaphore, now);
            return Ok(AcquireOutcome::Acquired(count as u32));
        }
        let Some(index) = (0..count)
            .map(|i| (chain.next + i) % count)
            .find(|&i| !chain.held[i])
        else {
            state.violation(SimError::AllImagesHeld);
            return Err(GpuError::Timeout);
        };
        chain.held[index] = true;
        chain.next = (index + 1) % count;
        let ready_at = chain.available_at[index];

        let ready_at = ready_at.max(state.now);
        state.signal_semaphore(semaphore, ready_at);

        let index = index as u32;
        Ok(match scripted {
            Some(ScriptedStatus::Suboptimal) => AcquireOutcome::Suboptimal(index),
            _ => AcquireOutcome::Acquired(index),
        })
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentStatus> {
        let mut state = self.state.lock();
        state.check_lost()?;

        let mut visible_at = state.now;
        for &semaphore in wait_semaphores {
            visible_at = visible_at.max(state.wait_semaphore(semaphore));
        }

        let surface_extent = state.surface_extent;
        let raw = swapchain.as_raw();
        let Some(chain) = state.swapchains.get_mut(&raw) else {
            state.violation(SimError::UnknownHandle("swapchain", raw));
            return Err(GpuError::Vulkan(vk::Result::ERROR_UNKNOWN));
        };
        let index = image_index as usize;
        chain.held[index] = false;
        chain.available_at[index] = visible_at;
        let stale = chain.extent != surface_extent;

        let status = match state.present_script.pop_front() {
            Some(ScriptedStatus::OutOfDate) => PresentStatus::OutOfDate,
            Some(ScriptedStatus::Suboptimal) => PresentStatus::Suboptimal,
            None if stale => PresentStatus::OutOfDate,
            None => PresentStatus::Ok,
        };

        let at = state.now;
        state.presents.push(SimPresent {
            swapchain,
            image_index,
            at,
            visible_at,
            status,
        });
        Ok(status)
    }
}
