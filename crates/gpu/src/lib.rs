//! Graphics device abstraction for the kiln frame engine.
//!
//! This crate defines the capability boundary between the frame engine and
//! the GPU:
//! - The [`GpuDevice`] trait: command recording, submission, completion
//!   tracking, and frame-target presentation
//! - [`FakeGpu`], a scripted in-memory device with an ordered operation log,
//!   used to exercise the engine without a GPU
//! - A Vulkan implementation built on the `ash` crate

mod backend;
mod error;
mod fake;
mod interface;

pub mod device;
pub mod instance;
pub mod swapchain;

pub use backend::VulkanGpu;
pub use error::{GpuError, GpuResult};
pub use fake::{FakeGpu, FakeOp};
pub use interface::{GpuDevice, RecordingId, SlotIndex, TargetTransition};
pub use swapchain::SwapchainConfig;

// Re-export ash types that users might need
pub use ash::vk;
