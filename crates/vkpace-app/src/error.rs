//! Frame loop errors.

use thiserror::Error;
use vkpace_gpu::GpuError;

/// Why a frame could not be produced.
///
/// Every variant is terminal for the scheduler that returned it; stale
/// swapchains are reported through [`crate::FrameOutcome`] instead.
#[derive(Error, Debug)]
pub enum FrameError {
    /// Fatal GPU or presentation error.
    #[error(transparent)]
    Gpu(#[from] GpuError),

    /// A payload or overlay callback failed.
    #[error("Frame payload failed: {0:#}")]
    Payload(anyhow::Error),

    /// The scheduler already failed and refuses further frames.
    #[error("Frame scheduler halted after a fatal error")]
    Halted,
}

impl FrameError {
    /// Whether the device was lost.
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::Gpu(GpuError::DeviceLost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_lost_is_recognised() {
        assert!(FrameError::from(GpuError::DeviceLost).is_device_lost());
        assert!(!FrameError::from(GpuError::Timeout).is_device_lost());
        assert!(!FrameError::Halted.is_device_lost());
    }

    #[test]
    fn payload_error_keeps_context() {
        let err = FrameError::Payload(anyhow::anyhow!("inner").context("recording stage"));
        assert_eq!(err.to_string(), "Frame payload failed: recording stage: inner");
    }
}
