//! Window surface creation and queries.

use crate::backend::QueueKind;
use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::swapchain::SurfaceCapabilities;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// Vulkan surface for a window plus the extension loaders that use it.
pub struct SurfaceContext {
    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::khr::surface::Instance,
    pub swapchain_loader: ash::khr::swapchain::Device,
}

impl SurfaceContext {
    /// Create a surface for `window`.
    ///
    /// # Safety
    /// The GPU context must be valid and the window must outlive the surface.
    pub unsafe fn from_window<W>(gpu: &GpuContext, window: &W) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

        let surface = ash_window::create_surface(
            gpu.entry(),
            gpu.instance(),
            display.as_raw(),
            window_handle.as_raw(),
            None,
        )
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;

        let surface_loader = ash::khr::surface::Instance::new(gpu.entry(), gpu.instance());
        let swapchain_loader = ash::khr::swapchain::Device::new(gpu.instance(), gpu.device());

        Ok(Self {
            surface,
            surface_loader,
            swapchain_loader,
        })
    }

    /// Query what the surface supports for the graphics queue family.
    pub fn capabilities(&self, gpu: &GpuContext) -> Result<SurfaceCapabilities> {
        let physical_device = gpu.physical_device();
        unsafe {
            let present_supported = self.surface_loader.get_physical_device_surface_support(
                physical_device,
                gpu.queue_family(QueueKind::Graphics),
                self.surface,
            )?;

            let capabilities = self
                .surface_loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)?;

            let formats = self
                .surface_loader
                .get_physical_device_surface_formats(physical_device, self.surface)?;

            let present_modes = self
                .surface_loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)?;

            Ok(SurfaceCapabilities {
                capabilities,
                formats,
                present_modes,
                present_supported,
            })
        }
    }

    /// Destroy the surface.
    ///
    /// # Safety
    /// No swapchain created for this surface may still exist.
    pub unsafe fn destroy(&self) {
        self.surface_loader.destroy_surface(self.surface, None);
    }
}
