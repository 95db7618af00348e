//! The per-frame state machine.
//!
//! One call to [`FrameScheduler::run_frame`] produces at most one presented
//! frame:
//!
//! ```text
//! Idle -> SlotAcquired -> ImageAcquired -> Recorded -> Submitted -> Presented
//! ```
//!
//! The CPU blocks in exactly two places per frame: on the fence of the slot it
//! is about to reuse, and on the fence of another slot still rendering into
//! the acquired image. It never waits on the frame it just submitted.

use std::sync::Arc;
use std::time::Instant;

use ash::vk;
use tracing::{debug, error, info};
use vkpace_gpu::{
    AcquireOutcome, FrameSlotPool, FrameSubmission, GpuBackend, GpuError, PresentStatus,
    QueueGraph, Swapchain,
};

use crate::config::SchedulerConfig;
use crate::error::FrameError;
use crate::frame::FrameContext;
use crate::payload::{FramePayload, UiOverlay};
use crate::resize::{ResizeHandler, ResizeOutcome, StaleReason};
use crate::stats::FrameStats;
use crate::window::SurfaceSource;

/// Where the current frame is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    SlotAcquired,
    ImageAcquired,
    Recorded,
    Submitted,
    Presented,
    /// A fatal error occurred; no further frames will run.
    Failed,
}

/// Why a frame produced no GPU work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The swapchain went stale before an image was acquired.
    OutOfDate,
    /// The surface has no area.
    Minimized,
}

/// Result of [`FrameScheduler::run_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented {
        /// Logical frame number.
        frame: u64,
        image_index: u32,
        slot: usize,
    },
    Skipped(SkipReason),
}

/// Drives frames through a queue graph with N frames in flight.
pub struct FrameScheduler<B: GpuBackend> {
    backend: Arc<B>,
    graph: QueueGraph,
    pool: FrameSlotPool,
    swapchain: Swapchain,
    resize: ResizeHandler,
    state: FrameState,
    config: SchedulerConfig,
    stats: FrameStats,
    last_present: Option<Instant>,
    shut_down: bool,
}

impl<B: GpuBackend> FrameScheduler<B> {
    /// Build the swapchain and the frame slots for `graph`.
    pub fn new(
        backend: Arc<B>,
        graph: QueueGraph,
        extent: vk::Extent2D,
        config: SchedulerConfig,
    ) -> Result<Self, GpuError> {
        let mut swapchain = Swapchain::build(
            &*backend,
            config.desired_image_count,
            extent,
            config.vsync,
        )?;

        let pool = match FrameSlotPool::new(&*backend, config.frames_in_flight, &graph) {
            Ok(pool) => pool,
            Err(e) => {
                swapchain.destroy(&*backend);
                return Err(e);
            }
        };

        info!(
            "Frame scheduler ready: {} frames in flight, {} stages, {} swapchain images",
            config.frames_in_flight,
            graph.stage_count(),
            swapchain.image_count()
        );

        Ok(Self {
            backend,
            graph,
            pool,
            swapchain,
            resize: ResizeHandler::new(config.max_minimized_polls),
            state: FrameState::Idle,
            config,
            stats: FrameStats::default(),
            last_present: None,
            shut_down: false,
        })
    }

    /// Run one frame.
    ///
    /// Stale swapchains are reported as [`FrameOutcome::Skipped`] and rebuilt
    /// on the next call. Any error is fatal: the scheduler enters
    /// [`FrameState::Failed`] and every later call returns
    /// [`FrameError::Halted`].
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn run_frame<S: SurfaceSource + ?Sized>(
        &mut self,
        window: &mut S,
        payload: &mut dyn FramePayload,
    ) -> Result<FrameOutcome, FrameError> {
        if self.state == FrameState::Failed || self.shut_down {
            return Err(FrameError::Halted);
        }

        match self.frame(window, payload) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!("Frame {} failed: {e}", self.pool.frame_counter());
                self.pool.release();
                self.state = FrameState::Failed;
                Err(e)
            }
        }
    }

    fn frame<S: SurfaceSource + ?Sized>(
        &mut self,
        window: &mut S,
        payload: &mut dyn FramePayload,
    ) -> Result<FrameOutcome, FrameError> {
        let backend = &*self.backend;
        let timeout = self.config.fence_timeout_ns;
        self.state = FrameState::Idle;

        self.resize.drain_events(window);
        if self.resize.is_pending() {
            match self.resize.handle(
                backend,
                window,
                &self.pool,
                &mut self.swapchain,
                payload,
                timeout,
            )? {
                ResizeOutcome::StillMinimized => {
                    self.stats.record_skip();
                    return Ok(FrameOutcome::Skipped(SkipReason::Minimized));
                }
                ResizeOutcome::Rebuilt(_) => self.stats.record_rebuild(),
                ResizeOutcome::Unchanged => {}
            }
        }

        let slot = self.pool.acquire_slot(backend, timeout)?;
        self.state = FrameState::SlotAcquired;

        let image_acquired = self.pool.slot(slot).image_acquired;
        let image_index = match self.swapchain.acquire_next(backend, image_acquired, timeout)? {
            AcquireOutcome::Acquired(index) => index,
            AcquireOutcome::Suboptimal(index) => {
                self.resize.mark_stale(StaleReason::AcquireSuboptimal);
                index
            }
            AcquireOutcome::OutOfDate => {
                // The fence was never reset, so the slot stays reusable
                self.pool.release();
                self.resize.mark_stale(StaleReason::AcquireOutOfDate);
                self.stats.record_skip();
                self.state = FrameState::Idle;
                debug!(
                    "Skipping frame {}: swapchain out of date",
                    self.pool.frame_counter()
                );
                return Ok(FrameOutcome::Skipped(SkipReason::OutOfDate));
            }
        };
        self.state = FrameState::ImageAcquired;

        let image = *self.swapchain.image(image_index).ok_or_else(|| {
            GpuError::InvalidState(format!("acquired image {image_index} does not exist"))
        })?;

        let in_flight = self.pool.slot(slot).in_flight;
        if let Some(owner_fence) =
            self.swapchain
                .images_in_flight_mut()
                .claim(image_index, slot, in_flight)
        {
            debug!("Image {image_index} still in use by another slot, waiting");
            backend.wait_for_fences(&[owner_fence], timeout)?;
        }

        self.pool.reset_recording_targets(backend, slot)?;

        let now = Instant::now();
        let dt = self
            .last_present
            .map_or(0.0, |last| now.duration_since(last).as_secs_f32());
        let ctx = FrameContext {
            frame_number: self.pool.frame_counter(),
            slot,
            image_index,
            image: image.image,
            image_view: image.view,
            format: image.format,
            extent: image.extent,
            previous_layout: image.layout,
            dt,
        };

        self.record(slot, &ctx, payload)?;
        self.state = FrameState::Recorded;

        // Reset only now: a frame that fails before submission leaves the
        // fence signaled
        self.pool.arm(backend, slot)?;
        FrameSubmission::new(&self.graph, self.pool.slot(slot)).submit_all(backend)?;
        self.state = FrameState::Submitted;

        let render_complete = self.pool.slot(slot).render_complete;
        match self
            .swapchain
            .present(backend, image_index, render_complete)?
        {
            PresentStatus::Ok => {}
            PresentStatus::Suboptimal => self.resize.mark_stale(StaleReason::PresentSuboptimal),
            PresentStatus::OutOfDate => self.resize.mark_stale(StaleReason::PresentOutOfDate),
        }
        self.state = FrameState::Presented;

        let frame = self.pool.frame_counter();
        self.pool.advance();
        self.last_present = Some(now);
        self.stats.record_present(dt);

        Ok(FrameOutcome::Presented {
            frame,
            image_index,
            slot,
        })
    }

    /// Record every stage of `slot`, appending the UI overlay to the sink.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn record(
        &self,
        slot: usize,
        ctx: &FrameContext,
        payload: &mut dyn FramePayload,
    ) -> Result<(), FrameError> {
        let backend = &*self.backend;
        let frame_slot = self.pool.slot(slot);

        for &stage in self.graph.order() {
            let info = self.graph.stage(stage);
            let cmd = frame_slot.command_buffer(stage);

            backend.begin_command_buffer(cmd)?;
            payload
                .record_stage(info, ctx, cmd)
                .map_err(FrameError::Payload)?;
            if stage == self.graph.sink() {
                if let Some(overlay) = payload.overlay() {
                    record_overlay(overlay, cmd, ctx)?;
                }
            }
            backend.end_command_buffer(cmd)?;
        }
        Ok(())
    }

    /// Request a rebuild at `extent` before the next frame.
    pub fn notify_resized(&mut self, extent: vk::Extent2D) {
        self.resize.notify_resized(extent);
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Whether a fatal error stopped the scheduler.
    pub fn is_halted(&self) -> bool {
        self.state == FrameState::Failed
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn graph(&self) -> &QueueGraph {
        &self.graph
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn slots(&self) -> &FrameSlotPool {
        &self.pool
    }

    pub fn resize_handler(&self) -> &ResizeHandler {
        &self.resize
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    /// Drain the GPU and destroy the slots and the swapchain.
    ///
    /// Idempotent. Called from `Drop` if not called explicitly.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        let backend = &*self.backend;
        if self.state != FrameState::Failed {
            if let Err(e) = self.pool.wait_all(backend, self.config.fence_timeout_ns) {
                error!("Failed to wait for frames in flight: {e}");
            }
        }
        if let Err(e) = backend.wait_idle() {
            error!("Failed to wait idle: {e}");
        }

        self.pool.destroy(backend);
        self.swapchain.destroy(backend);
        self.stats.log_summary();
        info!("Frame scheduler shut down");
    }
}

impl<B: GpuBackend> Drop for FrameScheduler<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn record_overlay(
    overlay: &mut dyn UiOverlay,
    cmd: vk::CommandBuffer,
    ctx: &FrameContext,
) -> Result<(), FrameError> {
    overlay.begin_frame(ctx);
    let draw_data = overlay.build_ui();
    if draw_data.is_empty() {
        return Ok(());
    }
    overlay
        .append_draw_commands(cmd, ctx, &draw_data)
        .map_err(FrameError::Payload)
}
