//! Frame submission and synchronization engine.
//!
//! This crate is the core of kiln: it owns the single ordered channel through
//! which recorded command batches reach the GPU and everything required to
//! reuse resources safely around it:
//!
//! - [`Fence`] mints monotonically increasing [`CompletionMarker`]s and
//!   answers "has the GPU gotten there yet"
//! - [`RecorderPool`] recycles recording contexts, never resetting an
//!   allocator the GPU may still be reading
//! - [`SubmissionQueue`] sequences submissions and ties each one to a marker
//! - [`FrameManager`] runs the per-frame present cycle and the
//!   flush-release-resize-recreate transition over the swapchain's slots
//! - [`Renderer`] wires the above to a [`RenderContent`] provider and an
//!   owned frame clock
//!
//! All of it is written against the [`kiln_gpu::GpuDevice`] trait, so the
//! whole engine runs over the scripted fake device in tests.

mod content;
mod fence;
mod frame;
mod frame_manager;
mod queue;
mod recorder;
mod renderer;

pub use content::{FrameContext, RenderContent, ResizeArgs};
pub use fence::{CompletionMarker, Fence};
pub use frame::FrameSlot;
pub use frame_manager::{FrameConfig, FrameManager, FramePacing};
pub use queue::SubmissionQueue;
pub use recorder::{RecorderPool, RecordingContext};
pub use renderer::Renderer;

/// How long the engine waits on the GPU before declaring it hung.
///
/// A wait that exceeds this is reported as a timeout and treated as fatal by
/// the render loop; a healthy GPU finishes a frame's work orders of magnitude
/// faster.
pub const DEVICE_WAIT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Soft ceiling on pooled recording contexts.
///
/// Past this, acquisition blocks on the oldest in-flight context instead of
/// allocating, bounding memory under GPU backpressure.
pub const RECORDER_POOL_CEILING: usize = 8;
