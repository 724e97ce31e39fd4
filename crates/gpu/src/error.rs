//! Device-boundary error types.

use thiserror::Error;

/// Errors reported across the graphics device boundary.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] ash::vk::Result),

    /// Failed to load Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    Loading(#[from] ash::LoadingError),

    /// The device stopped responding or was reset; all in-flight state is gone
    #[error("Graphics device lost")]
    DeviceLost,

    /// A bounded wait elapsed before the GPU reached the requested point
    #[error("Wait for completion timed out after {0:?}")]
    WaitTimeout(std::time::Duration),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Surface creation or query error
    #[error("Surface error: {0}")]
    Surface(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    Swapchain(String),

    /// Invalid handle error
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Every recording context is lent out and the pool ceiling was hit
    #[error("Recorder pool exhausted: all contexts are lent out")]
    PoolExhausted,
}

impl GpuError {
    /// Whether the caller may keep using the device after seeing this error.
    ///
    /// Only a wait timeout leaves the device in a defined state; everything
    /// else invalidates in-flight assumptions and must terminate the render
    /// loop.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, GpuError::WaitTimeout(_))
    }
}

/// Result type alias for device-boundary operations.
pub type GpuResult<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn only_wait_timeout_is_recoverable() {
        assert!(!GpuError::WaitTimeout(Duration::from_secs(1)).is_fatal());
        assert!(GpuError::DeviceLost.is_fatal());
        assert!(GpuError::Vulkan(ash::vk::Result::ERROR_OUT_OF_DATE_KHR).is_fatal());
        assert!(GpuError::PoolExhausted.is_fatal());
    }
}
