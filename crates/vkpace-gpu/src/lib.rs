//! Frame synchronization primitives for Vulkan.
//!
//! This crate provides:
//! - The [`GpuBackend`] device seam and its Vulkan implementation
//! - Swapchain ownership with stale-status reporting
//! - The fixed pool of frame slots (semaphores, fence, command buffers)
//! - The queue submission graph and its wait/signal derivation
//! - Device, surface and attachment memory management

pub mod backend;
pub mod capabilities;
pub mod command;
pub mod context;
pub mod error;
pub mod instance;
pub mod memory;
pub mod submit;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod vulkan;

pub use backend::{GpuBackend, QueueKind, QueueSubmit, SemaphoreWait, SwapchainDesc, SwapchainParts};
pub use capabilities::{GpuCapabilities, GpuVendor};
pub use context::{GpuContext, GpuContextBuilder};
pub use error::{ErrorKind, GpuError, Result};
pub use memory::{GpuAllocator, GpuImage};
pub use submit::{
    FrameSubmission, QueueEdge, QueueGraph, QueueGraphBuilder, StageId, StageInfo, StageSync,
};
pub use surface::SurfaceContext;
pub use swapchain::{
    AcquireOutcome, ImageOwner, ImagesInFlight, PresentStatus, SurfaceCapabilities, Swapchain,
    SwapchainImage, SwapchainState,
};
pub use sync::{FrameSlot, FrameSlotPool};
pub use vulkan::VulkanBackend;

/// Wait forever on fences and acquires.
pub const NO_TIMEOUT: u64 = u64::MAX;
