//! Frame timing statistics.

use tracing::info;

/// Counters and FPS extremes over a scheduler's lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameStats {
    pub presented: u64,
    pub skipped: u64,
    pub rebuilds: u64,
    min_fps: f64,
    max_fps: f64,
    fps_sum: f64,
    fps_samples: u64,
}

impl Default for FrameStats {
    fn default() -> Self {
        Self {
            presented: 0,
            skipped: 0,
            rebuilds: 0,
            min_fps: f64::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
            fps_samples: 0,
        }
    }
}

impl FrameStats {
    /// Record a presented frame that took `dt` seconds.
    pub fn record_present(&mut self, dt: f32) {
        self.presented += 1;
        if dt > 0.0 {
            let fps = 1.0 / f64::from(dt);
            self.min_fps = self.min_fps.min(fps);
            self.max_fps = self.max_fps.max(fps);
            self.fps_sum += fps;
            self.fps_samples += 1;
        }
    }

    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    pub fn record_rebuild(&mut self) {
        self.rebuilds += 1;
    }

    pub fn min_fps(&self) -> Option<f64> {
        (self.fps_samples > 0).then_some(self.min_fps)
    }

    pub fn max_fps(&self) -> Option<f64> {
        (self.fps_samples > 0).then_some(self.max_fps)
    }

    pub fn avg_fps(&self) -> Option<f64> {
        (self.fps_samples > 0).then(|| self.fps_sum / self.fps_samples as f64)
    }

    /// Log a summary at info level.
    pub fn log_summary(&self) {
        info!("Frame statistics:");
        info!("  Presented: {}", self.presented);
        info!("  Skipped: {}", self.skipped);
        info!("  Swapchain rebuilds: {}", self.rebuilds);
        if let (Some(min), Some(max), Some(avg)) = (self.min_fps(), self.max_fps(), self.avg_fps())
        {
            info!("  FPS min/max/avg: {:.1} / {:.1} / {:.1}", min, max, avg);
        }
    }
}
