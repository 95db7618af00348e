//! Frame scheduling for vkpace applications.
//!
//! This crate provides:
//! - The frame scheduler state machine (`FrameScheduler`)
//! - Swapchain invalidation and rebuild on resize (`ResizeHandler`)
//! - The payload, UI overlay and surface collaborator traits
//! - A winit runner with frame pacing and FPS statistics
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ash::vk;
//! use vkpace_app::{run_app, AppConfig, FrameContext, FramePayload, PacedApp, StageInfo};
//! use vkpace_app::VulkanBackend;
//!
//! struct Blank;
//!
//! impl FramePayload for Blank {
//!     fn record_stage(
//!         &mut self,
//!         _stage: &StageInfo,
//!         _frame: &FrameContext,
//!         _cmd: vk::CommandBuffer,
//!     ) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! impl PacedApp for Blank {
//!     fn init(_backend: &Arc<VulkanBackend>, _extent: vk::Extent2D) -> anyhow::Result<Self> {
//!         Ok(Blank)
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<Blank>(AppConfig::new("blank"))
//! }
//! ```

mod app;
mod config;
mod error;
mod frame;
mod payload;
mod resize;
mod runner;
mod scheduler;
mod stats;
mod window;

pub use app::PacedApp;
pub use config::{AppConfig, SchedulerConfig};
pub use error::FrameError;
pub use frame::FrameContext;
pub use payload::{FramePayload, UiDrawData, UiDrawList, UiOverlay, UiVertex};
pub use resize::{ResizeHandler, ResizeOutcome, StaleReason};
pub use runner::{init_logging, run_app};
pub use scheduler::{FrameOutcome, FrameScheduler, FrameState, SkipReason};
pub use stats::FrameStats;
pub use window::{SurfaceSource, WinitSurface, MINIMIZED_POLL_INTERVAL};

// Re-export commonly used types for convenience
pub use vkpace_gpu::{
    GpuContext, GpuContextBuilder, QueueGraph, QueueKind, StageInfo, VulkanBackend,
};
pub use winit::event::WindowEvent;
