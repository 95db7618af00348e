//! Scheduler and application configuration.

use vkpace_gpu::NO_TIMEOUT;

/// Frame scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of frame slots (N). Fixed for the lifetime of the scheduler.
    pub frames_in_flight: usize,
    /// Swapchain images to ask for; clamped to what the surface allows.
    pub desired_image_count: u32,
    /// Prefer FIFO presentation.
    pub vsync: bool,
    /// Timeout for fence waits and image acquires, in nanoseconds.
    pub fence_timeout_ns: u64,
    /// Polls of a zero-sized surface before giving control back to the
    /// caller. `None` waits until the surface has a size again.
    pub max_minimized_polls: Option<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            desired_image_count: 3,
            vsync: true,
            fence_timeout_ns: NO_TIMEOUT,
            max_minimized_polls: None,
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of frames in flight.
    ///
    /// # Panics
    /// If `frames` is zero.
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        assert!(frames > 0, "frames in flight must be at least 1");
        self.frames_in_flight = frames;
        self
    }

    pub fn with_desired_image_count(mut self, count: u32) -> Self {
        self.desired_image_count = count;
        self
    }

    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    pub fn with_fence_timeout_ns(mut self, timeout_ns: u64) -> Self {
        self.fence_timeout_ns = timeout_ns;
        self
    }

    pub fn with_max_minimized_polls(mut self, polls: Option<u32>) -> Self {
        self.max_minimized_polls = polls;
        self
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
    /// Enable vsync.
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Frames the CPU may run ahead of the GPU.
    pub frames_in_flight: usize,
    /// Fence and acquire timeout in nanoseconds.
    pub fence_timeout_ns: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "vkpace".to_string(),
            width: 1280,
            height: 720,
            target_fps: None,
            vsync: true,
            validation: cfg!(debug_assertions),
            frames_in_flight: 2,
            fence_timeout_ns: NO_TIMEOUT,
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set the target FPS.
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = (fps > 0).then_some(fps);
        self
    }

    /// Enable or disable vsync.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the number of frames in flight.
    ///
    /// # Panics
    /// If `frames` is zero.
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        assert!(frames > 0, "frames in flight must be at least 1");
        self.frames_in_flight = frames;
        self
    }

    /// Scheduler settings for a windowed run.
    ///
    /// A minimized window is polled once per redraw so the event loop keeps
    /// running.
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::default()
            .with_frames_in_flight(self.frames_in_flight)
            .with_desired_image_count(self.frames_in_flight as u32 + 1)
            .with_vsync(self.vsync)
            .with_fence_timeout_ns(self.fence_timeout_ns)
            .with_max_minimized_polls(Some(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduler_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.fence_timeout_ns, u64::MAX);
        assert_eq!(config.max_minimized_polls, None);
    }

    #[test]
    fn app_config_drives_scheduler() {
        let app = AppConfig::new("test")
            .with_size(640, 480)
            .with_frames_in_flight(3)
            .with_vsync(false);
        let scheduler = app.scheduler_config();
        assert_eq!(scheduler.frames_in_flight, 3);
        assert_eq!(scheduler.desired_image_count, 4);
        assert!(!scheduler.vsync);
        assert_eq!(scheduler.max_minimized_polls, Some(1));
    }

    #[test]
    fn zero_target_fps_means_unlimited() {
        assert_eq!(AppConfig::default().with_target_fps(0).target_fps, None);
        assert_eq!(AppConfig::default().with_target_fps(60).target_fps, Some(60));
    }

    #[test]
    #[should_panic(expected = "at least 1")]
    fn zero_frames_in_flight_is_rejected() {
        let _ = SchedulerConfig::new().with_frames_in_flight(0);
    }
}
