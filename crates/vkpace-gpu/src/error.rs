//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
///
/// Stale swapchain conditions (`OUT_OF_DATE`, `SUBOPTIMAL`) are never errors;
/// they are reported through [`crate::AcquireOutcome`] and
/// [`crate::PresentStatus`]. Everything that ends up here is fatal for the
/// frame loop unless [`GpuError::kind`] says otherwise.
#[derive(Error, Debug)]
pub enum GpuError {
    /// The logical device was lost.
    #[error("Device lost")]
    DeviceLost,

    /// The presentation surface was lost.
    #[error("Surface lost")]
    SurfaceLost,

    /// The device cannot present to the surface at all.
    #[error("Surface unsupported: {0}")]
    SurfaceUnsupported(String),

    /// A wait on a fence or an image acquire timed out.
    #[error("Timed out waiting for the GPU")]
    Timeout,

    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(vk::Result),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// How the frame loop should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// End the session; retrying cannot help.
    Fatal,
    /// The swapchain is stale and a rebuild recovers.
    Recoverable,
}

impl GpuError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR) => {
                ErrorKind::Recoverable
            }
            _ => ErrorKind::Fatal,
        }
    }

    /// Whether this error ends the session.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

impl From<vk::Result> for GpuError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            vk::Result::ERROR_SURFACE_LOST_KHR => Self::SurfaceLost,
            vk::Result::TIMEOUT | vk::Result::NOT_READY => Self::Timeout,
            other => Self::Vulkan(other),
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_loss_maps_to_dedicated_variant() {
        let err = GpuError::from(vk::Result::ERROR_DEVICE_LOST);
        assert!(matches!(err, GpuError::DeviceLost));
        assert!(err.is_fatal());
    }

    #[test]
    fn stale_codes_are_recoverable() {
        assert_eq!(
            GpuError::from(vk::Result::ERROR_OUT_OF_DATE_KHR).kind(),
            ErrorKind::Recoverable
        );
        assert_eq!(
            GpuError::SurfaceUnsupported("no formats".into()).kind(),
            ErrorKind::Fatal
        );
    }

    #[test]
    fn timeout_codes_collapse() {
        assert!(matches!(
            GpuError::from(vk::Result::TIMEOUT),
            GpuError::Timeout
        ));
    }
}
