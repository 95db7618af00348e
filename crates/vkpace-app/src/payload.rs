//! Collaborator traits for recording frame content.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use vkpace_gpu::StageInfo;

use crate::frame::FrameContext;

/// Records the GPU work of a frame, stage by stage.
///
/// The scheduler begins and ends each command buffer around the call; a
/// payload only records into it. Implementations must not block on GPU
/// state: the scheduler already waited on everything that guards `cmd`.
pub trait FramePayload {
    /// Record the commands of `stage` for the frame described by `frame`.
    fn record_stage(
        &mut self,
        stage: &StageInfo,
        frame: &FrameContext,
        cmd: vk::CommandBuffer,
    ) -> anyhow::Result<()>;

    /// UI overlay appended to the final stage, if any.
    fn overlay(&mut self) -> Option<&mut dyn UiOverlay> {
        None
    }

    /// Recreate attachments sized after the swapchain.
    ///
    /// Called after every swapchain rebuild, with the GPU idle.
    fn resize_attachments(&mut self, extent: vk::Extent2D) -> anyhow::Result<()> {
        let _ = extent;
        Ok(())
    }
}

/// Immediate-mode UI appended on top of the frame.
pub trait UiOverlay {
    /// Start a new UI frame.
    fn begin_frame(&mut self, frame: &FrameContext);

    /// Build the UI and return its draw data.
    fn build_ui(&mut self) -> UiDrawData;

    /// Record the draw data into the final stage's command buffer.
    fn append_draw_commands(
        &mut self,
        cmd: vk::CommandBuffer,
        frame: &FrameContext,
        draw_data: &UiDrawData,
    ) -> anyhow::Result<()>;
}

/// UI vertex as uploaded to the GPU.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct UiVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
    /// Packed RGBA8.
    pub color: u32,
}

/// One clipped batch of UI geometry.
#[derive(Clone, Debug, Default)]
pub struct UiDrawList {
    pub vertices: Vec<UiVertex>,
    pub indices: Vec<u16>,
    /// Clip rectangle as `[min_x, min_y, max_x, max_y]` in pixels.
    pub clip_rect: [f32; 4],
}

/// Draw data of one UI frame.
#[derive(Clone, Debug, Default)]
pub struct UiDrawData {
    pub display_size: [f32; 2],
    pub lists: Vec<UiDrawList>,
}

impl UiDrawData {
    /// Whether there is nothing to draw.
    pub fn is_empty(&self) -> bool {
        self.lists.iter().all(|list| list.indices.is_empty())
    }

    pub fn total_vertex_count(&self) -> usize {
        self.lists.iter().map(|list| list.vertices.len()).sum()
    }

    pub fn total_index_count(&self) -> usize {
        self.lists.iter().map(|list| list.indices.len()).sum()
    }

    /// All vertices, concatenated as raw bytes for a vertex buffer upload.
    pub fn vertex_bytes(&self) -> Vec<u8> {
        let mut bytes =
            Vec::with_capacity(self.total_vertex_count() * std::mem::size_of::<UiVertex>());
        for list in &self.lists {
            bytes.extend_from_slice(bytemuck::cast_slice(&list.vertices));
        }
        bytes
    }

    /// All indices, concatenated as raw bytes for an index buffer upload.
    pub fn index_bytes(&self) -> Vec<u8> {
        let mut bytes =
            Vec::with_capacity(self.total_index_count() * std::mem::size_of::<u16>());
        for list in &self.lists {
            bytes.extend_from_slice(bytemuck::cast_slice(&list.indices));
        }
        bytes
    }
}
