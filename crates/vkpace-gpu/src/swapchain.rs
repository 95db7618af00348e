//! Swapchain management.

use ash::vk;
use tracing::{debug, info};

use crate::backend::{GpuBackend, SwapchainDesc, SwapchainParts};
use crate::error::{GpuError, Result};

/// Surface capabilities query result.
#[derive(Debug, Clone, Default)]
pub struct SurfaceCapabilities {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
    /// Whether the presenting queue family can present to this surface.
    pub present_supported: bool,
}

impl SurfaceCapabilities {
    /// Fail with [`GpuError::SurfaceUnsupported`] if nothing can be presented.
    pub fn ensure_presentable(&self) -> Result<()> {
        if !self.present_supported {
            return Err(GpuError::SurfaceUnsupported(
                "queue family cannot present to this surface".to_string(),
            ));
        }
        if self.formats.is_empty() {
            return Err(GpuError::SurfaceUnsupported(
                "surface reports no formats".to_string(),
            ));
        }
        if self.present_modes.is_empty() {
            return Err(GpuError::SurfaceUnsupported(
                "surface reports no present modes".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the recommended surface format.
    pub fn recommended_format(&self) -> vk::SurfaceFormatKHR {
        select_surface_format(&self.formats)
    }

    /// Get the recommended present mode.
    pub fn recommended_present_mode(&self, vsync: bool) -> vk::PresentModeKHR {
        select_present_mode(&self.present_modes, vsync)
    }
}

/// Result of asking for the next image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Image is ready to be rendered into.
    Acquired(u32),
    /// Image is usable but the swapchain should be rebuilt soon.
    Suboptimal(u32),
    /// No image was acquired; the swapchain must be rebuilt first.
    OutOfDate,
}

impl AcquireOutcome {
    /// Index of the acquired image, if any.
    pub fn image_index(self) -> Option<u32> {
        match self {
            Self::Acquired(index) | Self::Suboptimal(index) => Some(index),
            Self::OutOfDate => None,
        }
    }
}

/// Result of a present request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Ok,
    /// Image was displayed, rebuild before the next acquire.
    Suboptimal,
    /// Surface changed under us, rebuild before the next acquire.
    OutOfDate,
}

impl PresentStatus {
    /// Whether a rebuild should happen before the next acquire.
    pub fn needs_rebuild(self) -> bool {
        !matches!(self, Self::Ok)
    }
}

/// Swapchain validity as observed through acquire/present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainState {
    Valid,
    Suboptimal,
    OutOfDate,
    Destroyed,
}

/// One presentable image.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainImage {
    pub index: u32,
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    /// Layout the image is in when handed to a frame.
    pub layout: vk::ImageLayout,
}

/// Which slot last rendered into an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageOwner {
    pub slot: usize,
    pub fence: vk::Fence,
}

/// Per-image record of the frame slot whose fence protects it.
///
/// Keeps a slot from rendering into an image that a different slot is still
/// writing to, which can happen whenever the swapchain has fewer images than
/// there are frames in flight or the presentation engine hands images back
/// out of order.
#[derive(Debug, Clone, Default)]
pub struct ImagesInFlight {
    owners: Vec<Option<ImageOwner>>,
}

impl ImagesInFlight {
    /// Create an empty guard table for `image_count` images.
    pub fn new(image_count: usize) -> Self {
        Self {
            owners: vec![None; image_count],
        }
    }

    /// Record `slot` as the new owner of `image_index`.
    ///
    /// Returns the fence of the previous owner if that was a different slot;
    /// the caller has to wait on it before touching the image. Unknown
    /// indices are ignored.
    pub fn claim(&mut self, image_index: u32, slot: usize, fence: vk::Fence) -> Option<vk::Fence> {
        let entry = self.owners.get_mut(image_index as usize)?;
        let previous = entry.replace(ImageOwner { slot, fence });
        previous.filter(|owner| owner.slot != slot).map(|owner| owner.fence)
    }

    /// Current owner of an image.
    pub fn owner(&self, image_index: u32) -> Option<ImageOwner> {
        self.owners.get(image_index as usize).copied().flatten()
    }

    /// Forget every owner and resize for a rebuilt image set.
    pub fn clear(&mut self, image_count: usize) {
        self.owners.clear();
        self.owners.resize(image_count, None);
    }

    /// Number of images tracked.
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Whether no images are tracked.
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

/// Swapchain wrapper.
pub struct Swapchain {
    parts: SwapchainParts,
    images: Vec<SwapchainImage>,
    images_in_flight: ImagesInFlight,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    state: SwapchainState,
    desired_image_count: u32,
    vsync: bool,
}

impl Swapchain {
    /// Create a new swapchain with at least `desired_image_count` images.
    ///
    /// Fails with [`GpuError::SurfaceUnsupported`] if the device cannot
    /// present to the surface at all.
    pub fn build<B: GpuBackend + ?Sized>(
        backend: &B,
        desired_image_count: u32,
        extent: vk::Extent2D,
        vsync: bool,
    ) -> Result<Self> {
        let mut swapchain = Self {
            parts: SwapchainParts::default(),
            images: Vec::new(),
            images_in_flight: ImagesInFlight::default(),
            format: vk::Format::UNDEFINED,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            extent,
            present_mode: vk::PresentModeKHR::FIFO,
            state: SwapchainState::Destroyed,
            desired_image_count,
            vsync,
        };
        swapchain.create(backend, extent)?;

        info!(
            "Swapchain created: {}x{} ({} images, {:?}, {:?})",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.images.len(),
            swapchain.format,
            swapchain.present_mode
        );

        Ok(swapchain)
    }

    fn create<B: GpuBackend + ?Sized>(&mut self, backend: &B, extent: vk::Extent2D) -> Result<()> {
        let caps = backend.surface_capabilities()?;
        caps.ensure_presentable()?;

        let surface_format = caps.recommended_format();
        let present_mode = caps.recommended_present_mode(self.vsync);
        let extent = calculate_extent(&caps.capabilities, extent.width, extent.height);
        if extent.width == 0 || extent.height == 0 {
            return Err(GpuError::InvalidState(format!(
                "refusing to build a {}x{} swapchain",
                extent.width, extent.height
            )));
        }
        let image_count = clamp_image_count(&caps.capabilities, self.desired_image_count);

        let desc = SwapchainDesc {
            image_count,
            surface_format,
            present_mode,
            extent,
            pre_transform: caps.capabilities.current_transform,
        };

        let parts = backend
            .create_swapchain(&desc, vk::SwapchainKHR::null())
            .map_err(|e| match e {
                GpuError::Vulkan(code) => GpuError::SwapchainCreation(code.to_string()),
                other => other,
            })?;

        self.images = parts
            .images
            .iter()
            .zip(&parts.image_views)
            .enumerate()
            .map(|(index, (&image, &view))| SwapchainImage {
                index: index as u32,
                image,
                view,
                format: surface_format.format,
                extent,
                layout: vk::ImageLayout::UNDEFINED,
            })
            .collect();
        self.images_in_flight.clear(self.images.len());
        self.parts = parts;
        self.format = surface_format.format;
        self.color_space = surface_format.color_space;
        self.present_mode = present_mode;
        self.extent = extent;
        self.state = SwapchainState::Valid;

        Ok(())
    }

    /// Extent a swapchain built now would get, given the window's size.
    ///
    /// The surface has the final say when it reports a fixed size, which can
    /// be zero while the window still reports its old size.
    pub fn resolve_extent<B: GpuBackend + ?Sized>(
        backend: &B,
        window_extent: vk::Extent2D,
    ) -> Result<vk::Extent2D> {
        let caps = backend.surface_capabilities()?;
        Ok(calculate_extent(
            &caps.capabilities,
            window_extent.width,
            window_extent.height,
        ))
    }

    /// Acquire the next image.
    ///
    /// `signal_on_ready` is signaled once the image is actually usable.
    /// [`AcquireOutcome::OutOfDate`] never carries an index.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn acquire_next<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &B,
        signal_on_ready: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<AcquireOutcome> {
        if self.state == SwapchainState::Destroyed {
            return Err(GpuError::InvalidState(
                "acquire on a destroyed swapchain".to_string(),
            ));
        }

        let outcome = backend.acquire_next_image(self.parts.swapchain, signal_on_ready, timeout_ns)?;
        match outcome {
            AcquireOutcome::Acquired(_) => {}
            AcquireOutcome::Suboptimal(index) => {
                debug!("Acquired image {index} from a suboptimal swapchain");
                self.state = SwapchainState::Suboptimal;
            }
            AcquireOutcome::OutOfDate => {
                debug!("Swapchain out of date on acquire");
                self.state = SwapchainState::OutOfDate;
            }
        }
        Ok(outcome)
    }

    /// Present an image once `wait_on` is signaled.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn present<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &B,
        image_index: u32,
        wait_on: vk::Semaphore,
    ) -> Result<PresentStatus> {
        let status = backend.queue_present(self.parts.swapchain, image_index, &[wait_on])?;

        // The recorded commands left the image in PRESENT_SRC regardless of
        // what the presentation engine reports.
        if let Some(image) = self.images.get_mut(image_index as usize) {
            image.layout = vk::ImageLayout::PRESENT_SRC_KHR;
        }

        match status {
            PresentStatus::Ok => {}
            PresentStatus::Suboptimal => {
                debug!("Swapchain suboptimal on present");
                self.state = SwapchainState::Suboptimal;
            }
            PresentStatus::OutOfDate => {
                debug!("Swapchain out of date on present");
                self.state = SwapchainState::OutOfDate;
            }
        }
        Ok(status)
    }

    /// Destroy and recreate the image set for a new extent.
    ///
    /// Every queue that referenced the old images must have drained.
    pub fn rebuild<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &B,
        new_extent: vk::Extent2D,
    ) -> Result<()> {
        if new_extent.width == 0 || new_extent.height == 0 {
            return Err(GpuError::InvalidState(format!(
                "refusing to rebuild a {}x{} swapchain",
                new_extent.width, new_extent.height
            )));
        }

        self.destroy(backend);
        self.create(backend, new_extent)?;

        info!(
            "Swapchain recreated: {}x{} ({} images)",
            self.extent.width,
            self.extent.height,
            self.images.len()
        );
        Ok(())
    }

    /// Destroy the swapchain. Safe to call more than once.
    ///
    /// The swapchain images must not be in use.
    pub fn destroy<B: GpuBackend + ?Sized>(&mut self, backend: &B) {
        if self.state == SwapchainState::Destroyed {
            return;
        }
        backend.destroy_swapchain(&self.parts);
        self.parts = SwapchainParts::default();
        self.images.clear();
        self.images_in_flight.clear(0);
        self.state = SwapchainState::Destroyed;
    }

    /// Current state.
    pub fn state(&self) -> SwapchainState {
        self.state
    }

    /// Whether acquire/present reported that a rebuild is due.
    pub fn needs_rebuild(&self) -> bool {
        matches!(
            self.state,
            SwapchainState::Suboptimal | SwapchainState::OutOfDate
        )
    }

    /// Raw swapchain handle.
    pub fn raw(&self) -> vk::SwapchainKHR {
        self.parts.swapchain
    }

    /// All images.
    pub fn images(&self) -> &[SwapchainImage] {
        &self.images
    }

    /// A single image.
    pub fn image(&self, index: u32) -> Option<&SwapchainImage> {
        self.images.get(index as usize)
    }

    /// Number of images.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Image-in-flight guards.
    pub fn images_in_flight_mut(&mut self) -> &mut ImagesInFlight {
        &mut self.images_in_flight
    }

    /// Image-in-flight guards.
    pub fn images_in_flight(&self) -> &ImagesInFlight {
        &self.images_in_flight
    }
}

/// Select the best surface format.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    // Prefer SRGB
    for format in available {
        if format.format == vk::Format::B8G8R8A8_SRGB
            && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        {
            return *format;
        }
    }

    // Fall back to first available
    available.first().copied().unwrap_or(vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_UNORM,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    })
}

/// Select the best present mode.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        // Prefer FIFO (vsync)
        vk::PresentModeKHR::FIFO
    } else {
        // Prefer mailbox (triple buffering without vsync)
        for &mode in available {
            if mode == vk::PresentModeKHR::MAILBOX {
                return mode;
            }
        }
        // Fall back to immediate
        for &mode in available {
            if mode == vk::PresentModeKHR::IMMEDIATE {
                return mode;
            }
        }
        // Fall back to FIFO (always supported)
        vk::PresentModeKHR::FIFO
    }
}

/// Calculate swapchain extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// Clamp a desired image count to what the surface allows.
///
/// A `max_image_count` of zero means there is no upper bound.
pub fn clamp_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, desired: u32) -> u32 {
    let mut count = desired.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count = count.min(capabilities.max_image_count);
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn image_count_is_clamped() {
        assert_eq!(clamp_image_count(&caps(2, 8), 1), 2);
        assert_eq!(clamp_image_count(&caps(2, 8), 3), 3);
        assert_eq!(clamp_image_count(&caps(2, 3), 5), 3);
        // No upper bound
        assert_eq!(clamp_image_count(&caps(2, 0), 16), 16);
    }

    #[test]
    fn extent_uses_current_when_defined() {
        let mut c = caps(2, 3);
        c.current_extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let extent = calculate_extent(&c, 1920, 1080);
        assert_eq!((extent.width, extent.height), (640, 480));
    }

    #[test]
    fn extent_is_clamped_when_undefined() {
        let extent = calculate_extent(&caps(2, 3), 10_000, 0);
        assert_eq!((extent.width, extent.height), (4096, 1));
    }

    #[test]
    fn srgb_format_preferred() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        assert_eq!(select_surface_format(&formats).format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(
            select_surface_format(&formats[..1]).format,
            vk::Format::R8G8B8A8_UNORM
        );
    }

    #[test]
    fn present_mode_fallbacks() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(select_present_mode(&all, true), vk::PresentModeKHR::FIFO);
        assert_eq!(select_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            select_present_mode(&all[..2], false),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            select_present_mode(&all[..1], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn unsupported_surface_is_rejected() {
        let caps = SurfaceCapabilities {
            present_supported: true,
            present_modes: vec![vk::PresentModeKHR::FIFO],
            ..Default::default()
        };
        assert!(matches!(
            caps.ensure_presentable(),
            Err(GpuError::SurfaceUnsupported(_))
        ));
    }

    #[test]
    fn image_guard_reports_foreign_owner() {
        use ash::vk::Handle;

        let fence_a = vk::Fence::from_raw(1);
        let fence_b = vk::Fence::from_raw(2);
        let mut guard = ImagesInFlight::new(2);

        assert_eq!(guard.claim(0, 0, fence_a), None);
        // Same slot again: already waited on by the slot pool.
        assert_eq!(guard.claim(0, 0, fence_a), None);
        // Different slot: must wait on the old owner.
        assert_eq!(guard.claim(0, 1, fence_b), Some(fence_a));
        assert_eq!(guard.owner(0).map(|o| o.slot), Some(1));

        guard.clear(3);
        assert_eq!(guard.len(), 3);
        assert_eq!(guard.owner(0), None);
    }

    #[test]
    fn image_guard_ignores_unknown_images() {
        use ash::vk::Handle;

        let mut guard = ImagesInFlight::new(2);
        assert_eq!(guard.claim(7, 0, vk::Fence::from_raw(1)), None);
        assert_eq!(guard.owner(7), None);
        assert_eq!(guard.len(), 2);
    }
}
