//! Per-frame context handed to payloads.

use ash::vk;

/// Everything a payload needs to record one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    /// Logical frame number, counting presented frames only.
    pub frame_number: u64,
    /// Frame slot recording this frame.
    pub slot: usize,
    /// Index of the acquired swapchain image.
    pub image_index: u32,
    /// The acquired swapchain image.
    pub image: vk::Image,
    pub image_view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    /// Layout the image was left in by the previous frame that used it.
    /// `UNDEFINED` right after a (re)build.
    pub previous_layout: vk::ImageLayout,
    /// Seconds since the previous presented frame.
    pub dt: f32,
}

impl FrameContext {
    /// Full-image viewport.
    pub fn viewport(&self) -> vk::Viewport {
        vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.extent.width as f32,
            height: self.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    /// Full-image scissor.
    pub fn scissor(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }
    }

    pub fn aspect_ratio(&self) -> f32 {
        if self.extent.height == 0 {
            return 1.0;
        }
        self.extent.width as f32 / self.extent.height as f32
    }
}
