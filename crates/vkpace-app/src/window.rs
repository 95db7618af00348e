//! Surface size source.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ash::vk;
use crossbeam::channel::{self, Receiver, Sender};
use winit::window::Window;

/// Where the frame loop learns the current drawable size from.
pub trait SurfaceSource {
    /// Current drawable size in pixels. Zero while minimized.
    fn current_extent(&self) -> vk::Extent2D;

    /// Block until something may have changed the drawable size.
    fn wait_for_events(&mut self);

    /// Channel carrying resize notifications, if the source has one.
    fn resize_events(&self) -> Option<&Receiver<vk::Extent2D>> {
        None
    }
}

/// How long [`WinitSurface::wait_for_events`] sleeps.
///
/// The winit event loop cannot be pumped from inside a handler, so the
/// surface only sleeps and lets the runner return to the loop.
pub const MINIMIZED_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// [`SurfaceSource`] over a winit window.
pub struct WinitSurface {
    window: Arc<Window>,
    resize_tx: Sender<vk::Extent2D>,
    resize_rx: Receiver<vk::Extent2D>,
}

impl WinitSurface {
    pub fn new(window: Arc<Window>) -> Self {
        let (resize_tx, resize_rx) = channel::unbounded();
        Self {
            window,
            resize_tx,
            resize_rx,
        }
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    /// Queue a resize notification for the scheduler.
    pub fn notify_resized(&self, width: u32, height: u32) {
        // The receiver lives in self, so the channel is never disconnected
        let _ = self.resize_tx.send(vk::Extent2D { width, height });
    }
}

impl SurfaceSource for WinitSurface {
    fn current_extent(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    fn wait_for_events(&mut self) {
        thread::sleep(MINIMIZED_POLL_INTERVAL);
    }

    fn resize_events(&self) -> Option<&Receiver<vk::Extent2D>> {
        Some(&self.resize_rx)
    }
}
