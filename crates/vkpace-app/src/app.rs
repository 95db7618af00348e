//! `PacedApp` trait definition.

use std::sync::Arc;

use ash::vk;
use vkpace_gpu::{QueueGraph, VulkanBackend};
use winit::event::WindowEvent;

use crate::payload::FramePayload;

/// An application driven by [`crate::run_app`].
///
/// The runner owns the window, the device and the frame scheduler; the
/// application supplies the queue graph and records each stage through its
/// [`FramePayload`] implementation.
pub trait PacedApp: FramePayload + Sized {
    /// Initialize the application once the device and window exist.
    ///
    /// `extent` is the initial drawable size.
    fn init(backend: &Arc<VulkanBackend>, extent: vk::Extent2D) -> anyhow::Result<Self>;

    /// Queue graph the frames of this application run through.
    fn queue_graph(&self) -> QueueGraph {
        QueueGraph::graphics_only()
    }

    /// Advance application state by `dt` seconds. Called before every frame.
    #[allow(unused_variables)]
    fn update(&mut self, dt: f32) {}

    /// Handle a window event. Return `true` to stop further processing.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Release GPU resources. The GPU is idle when this is called.
    #[allow(unused_variables)]
    fn cleanup(&mut self, backend: &VulkanBackend) {}
}
