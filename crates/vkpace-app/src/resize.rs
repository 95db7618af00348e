//! Swapchain invalidation and rebuild.
//!
//! A rebuild is requested by a window resize or by the scheduler observing a
//! stale swapchain. It is carried out at the start of the next frame, after a
//! full barrier over every frame slot, so no queue still references the old
//! images. Frame slots and the queue graph survive a rebuild untouched.

use ash::vk;
use tracing::{debug, info};
use vkpace_gpu::{FrameSlotPool, GpuBackend, Swapchain, SwapchainState};

use crate::error::FrameError;
use crate::payload::FramePayload;
use crate::window::SurfaceSource;

/// Why the swapchain is considered stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// The window reported a new size.
    Resized,
    AcquireSuboptimal,
    AcquireOutOfDate,
    PresentSuboptimal,
    PresentOutOfDate,
}

/// Result of [`ResizeHandler::handle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    /// Nothing to do; the swapchain already matches the surface.
    Unchanged,
    /// The swapchain was rebuilt at this extent.
    Rebuilt(vk::Extent2D),
    /// The surface is still zero-sized; the rebuild stays pending.
    StillMinimized,
}

/// Tracks pending rebuilds and performs them.
#[derive(Debug, Clone, Default)]
pub struct ResizeHandler {
    pending: Option<StaleReason>,
    requested_extent: Option<vk::Extent2D>,
    max_minimized_polls: Option<u32>,
    rebuild_count: u64,
}

impl ResizeHandler {
    /// Create a handler that polls a zero-sized surface at most
    /// `max_minimized_polls` times per call (`None` = until it has a size).
    pub fn new(max_minimized_polls: Option<u32>) -> Self {
        Self {
            max_minimized_polls,
            ..Default::default()
        }
    }

    /// Record a window resize.
    pub fn notify_resized(&mut self, extent: vk::Extent2D) {
        self.requested_extent = Some(extent);
        self.mark_stale(StaleReason::Resized);
    }

    /// Request a rebuild. A stale status overrides a plain resize.
    pub fn mark_stale(&mut self, reason: StaleReason) {
        match self.pending {
            Some(StaleReason::Resized) | None => self.pending = Some(reason),
            Some(_) => {}
        }
    }

    /// Pull every queued resize notification from `window`.
    pub fn drain_events<S: SurfaceSource + ?Sized>(&mut self, window: &S) {
        let Some(events) = window.resize_events() else {
            return;
        };
        for extent in events.try_iter() {
            self.notify_resized(extent);
        }
    }

    /// Whether a rebuild is pending.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_reason(&self) -> Option<StaleReason> {
        self.pending
    }

    /// Last extent reported through [`Self::notify_resized`].
    pub fn requested_extent(&self) -> Option<vk::Extent2D> {
        self.requested_extent
    }

    /// Number of rebuilds performed so far.
    pub fn rebuild_count(&self) -> u64 {
        self.rebuild_count
    }

    /// Rebuild the swapchain if one is pending.
    ///
    /// Waits until both the window and the surface report a non-zero
    /// extent, drains every frame slot, rebuilds the swapchain and lets the
    /// payload recreate its extent-sized attachments. No slot may be held by an unfinished frame.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn handle<B, S>(
        &mut self,
        backend: &B,
        window: &mut S,
        pool: &FrameSlotPool,
        swapchain: &mut Swapchain,
        payload: &mut dyn FramePayload,
        fence_timeout_ns: u64,
    ) -> Result<ResizeOutcome, FrameError>
    where
        B: GpuBackend + ?Sized,
        S: SurfaceSource + ?Sized,
    {
        debug_assert!(pool.acquired().is_none(), "resize while a frame slot is held");

        self.drain_events(window);
        let Some(reason) = self.pending else {
            return Ok(ResizeOutcome::Unchanged);
        };

        let mut extent = drawable_extent(backend, window)?;
        let mut polls = 0;
        while extent.width == 0 || extent.height == 0 {
            if self.max_minimized_polls.is_some_and(|max| polls >= max) {
                debug!(
                    "Surface is {}x{}, rebuild stays pending",
                    extent.width, extent.height
                );
                return Ok(ResizeOutcome::StillMinimized);
            }
            window.wait_for_events();
            self.drain_events(window);
            extent = drawable_extent(backend, window)?;
            polls += 1;
        }

        if reason == StaleReason::Resized
            && swapchain.state() == SwapchainState::Valid
            && swapchain.extent == extent
        {
            debug!(
                "Resize to {}x{} matches the current swapchain, skipping rebuild",
                extent.width, extent.height
            );
            self.pending = None;
            return Ok(ResizeOutcome::Unchanged);
        }

        pool.wait_all(backend, fence_timeout_ns)?;
        swapchain.rebuild(backend, extent)?;
        payload
            .resize_attachments(swapchain.extent)
            .map_err(FrameError::Payload)?;

        self.pending = None;
        self.rebuild_count += 1;
        info!(
            "Resized to {}x{} ({:?})",
            swapchain.extent.width, swapchain.extent.height, reason
        );

        Ok(ResizeOutcome::Rebuilt(swapchain.extent))
    }
}

/// Size a rebuild would use: the window's, unless the surface pins its own.
fn drawable_extent<B, S>(backend: &B, window: &S) -> Result<vk::Extent2D, FrameError>
where
    B: GpuBackend + ?Sized,
    S: SurfaceSource + ?Sized,
{
    let window_extent = window.current_extent();
    if window_extent.width == 0 || window_extent.height == 0 {
        return Ok(window_extent);
    }
    Ok(Swapchain::resolve_extent(backend, window_extent)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::{self, Receiver};

    struct ChannelWindow {
        rx: Receiver<vk::Extent2D>,
    }

    impl SurfaceSource for ChannelWindow {
        fn current_extent(&self) -> vk::Extent2D {
            vk::Extent2D::default()
        }

        fn wait_for_events(&mut self) {}

        fn resize_events(&self) -> Option<&Receiver<vk::Extent2D>> {
            Some(&self.rx)
        }
    }

    #[test]
    fn stale_status_overrides_resize() {
        let mut handler = ResizeHandler::new(None);
        handler.notify_resized(vk::Extent2D {
            width: 10,
            height: 10,
        });
        assert_eq!(handler.pending_reason(), Some(StaleReason::Resized));

        handler.mark_stale(StaleReason::PresentOutOfDate);
        handler.notify_resized(vk::Extent2D {
            width: 20,
            height: 20,
        });
        assert_eq!(handler.pending_reason(), Some(StaleReason::PresentOutOfDate));
        assert_eq!(
            handler.requested_extent(),
            Some(vk::Extent2D {
                width: 20,
                height: 20
            })
        );
    }

    #[test]
    fn drain_takes_the_latest_extent() {
        let (tx, rx) = channel::unbounded();
        let window = ChannelWindow { rx };
        for width in [100, 200, 300] {
            tx.send(vk::Extent2D { width, height: 50 }).unwrap();
        }

        let mut handler = ResizeHandler::new(Some(0));
        assert!(!handler.is_pending());
        handler.drain_events(&window);
        assert!(handler.is_pending());
        assert_eq!(handler.requested_extent().map(|e| e.width), Some(300));
        assert!(window.rx.is_empty());
    }
}
