//! The render-content provider seam.
//!
//! Scene code plugs into the engine through [`RenderContent`]: the engine
//! owns the provider (installed by explicit ownership transfer, see
//! [`Renderer::set_content`](crate::Renderer::set_content)) and calls its
//! five operations at well-defined points of the frame and resource
//! lifecycle. The provider records its drawing through the [`FrameContext`]
//! handed to [`render`](RenderContent::render); it never talks to the
//! submission queue directly.

use kiln_core::UpdateArgs;
use kiln_gpu::{GpuDevice, GpuResult, RecordingId, SlotIndex};

/// New client-area dimensions, delivered after a resize transition completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeArgs {
    pub width: u32,
    pub height: u32,
}

/// Everything a provider may touch while recording one frame.
///
/// Wraps the recording context lent out for this frame, the slot being
/// rendered into (already transitioned to the render-target layout), and the
/// current client size.
pub struct FrameContext<'a, D: GpuDevice> {
    device: &'a D,
    recording: RecordingId,
    slot: SlotIndex,
    width: u32,
    height: u32,
}

impl<'a, D: GpuDevice> FrameContext<'a, D> {
    pub(crate) fn new(
        device: &'a D,
        recording: RecordingId,
        slot: SlotIndex,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            device,
            recording,
            slot,
            width,
            height,
        }
    }

    /// The recording context this frame's commands go into.
    #[inline]
    pub fn recording(&self) -> RecordingId {
        self.recording
    }

    /// The back buffer being rendered into.
    #[inline]
    pub fn slot(&self) -> SlotIndex {
        self.slot
    }

    /// Current client-area size in pixels.
    #[inline]
    pub fn client_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Record a full clear of the frame's target.
    pub fn clear(&self, color: [f32; 4]) -> GpuResult<()> {
        self.device.record_clear(self.recording, self.slot, color)
    }

    /// The device, for backend-specific recording beyond the portable
    /// operations.
    #[inline]
    pub fn device(&self) -> &D {
        self.device
    }
}

/// A polymorphic render-content provider.
///
/// Constructed once, handed to the engine by value, and swapped only through
/// another explicit ownership transfer.
pub trait RenderContent<D: GpuDevice> {
    /// Create GPU resources. Called once, right after installation.
    fn load_resources(&mut self, device: &D) -> GpuResult<()>;

    /// Drop GPU resources. Called after the queue has been drained; nothing
    /// the provider created is still in flight.
    fn unload_resources(&mut self, device: &D);

    /// Advance simulation state. Called once per frame, before rendering.
    fn update(&mut self, args: UpdateArgs);

    /// Record this frame's drawing into the provided context.
    fn render(&mut self, frame: &mut FrameContext<'_, D>) -> GpuResult<()>;

    /// React to a completed resize transition.
    fn resize(&mut self, args: ResizeArgs);
}
