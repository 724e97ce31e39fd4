//! The graphics device capability trait.
//!
//! Everything the frame engine needs from a GPU goes through [`GpuDevice`]:
//! recording-context management, ordered submission, a monotonically
//! increasing completion counter, and the presentable frame targets. The
//! engine's pooling, completion tracking, and swapchain state machine are all
//! written against this trait, so they run identically over the Vulkan
//! backend and over the scripted [`FakeGpu`](crate::FakeGpu).
//!
//! # Completion model
//!
//! The device carries a single 64-bit completion counter on its own timeline.
//! [`signal`](GpuDevice::signal) asks the GPU to advance the counter to a
//! given value once all previously submitted work has drained;
//! [`completed_value`](GpuDevice::completed_value) reads how far the GPU has
//! actually gotten; [`wait_until`](GpuDevice::wait_until) blocks on an
//! OS-level primitive instead of polling. Callers pick the values; the device
//! never invents them.
//!
//! # Frame flow
//!
//! ```text
//! create_recording / reset_recording
//!         |
//!         v
//! record_target_transition(AcquireRenderTarget)
//! record_clear / backend-specific draws
//! record_target_transition(ReleaseToPresent)
//!         |
//!         v
//! submit -> signal(n) -> present -> current_slot
//! ```

use std::time::Duration;

use crate::error::GpuResult;

/// Identifies one allocator + command-list pair owned by the device backend.
///
/// The handle stays valid for the lifetime of the device; recording contexts
/// are recycled, never individually destroyed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RecordingId(pub u64);

/// Index of one back buffer in the swapchain's rotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotIndex(pub u32);

impl SlotIndex {
    /// The index as a usize, for slot-array addressing.
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Layout transition recorded around content rendering for one frame target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetTransition {
    /// Presentable image -> writable render target, at the top of a frame.
    AcquireRenderTarget,
    /// Render target -> presentable image, before the present call.
    ReleaseToPresent,
}

/// Capability surface of a graphics device plus its presentable swapchain.
///
/// The swapchain is part of the same trait because in the underlying APIs the
/// two form one context (the swapchain is created from the device/queue), and
/// a single implementation gives tests one ordered operation log to assert
/// call order against.
///
/// # Contract
///
/// - Submissions execute in exactly the order [`submit`](Self::submit) was
///   called; there is no reordering.
/// - The completion counter only moves forward. A value is reached once all
///   work submitted before the corresponding signal has finished.
/// - A recording context must not be reset while work recorded into it may
///   still be executing; the device does not check this, the caller gates it
///   on the completion counter.
/// - Frame-target images must not be released or resized while referenced by
///   in-flight work; callers drain the device first.
///
/// Methods take `&self`; implementations handle their own interior
/// mutability, mirroring how the underlying device objects are externally
/// synchronized handles.
pub trait GpuDevice: Send + Sync {
    // ------------------------------------------------------------------
    // Command recording
    // ------------------------------------------------------------------

    /// Create a new recording context (allocator + command list).
    fn create_recording(&self) -> GpuResult<RecordingId>;

    /// Reset the context's backing allocator and open it for recording.
    ///
    /// Only valid once all GPU work previously recorded through this context
    /// has completed.
    fn reset_recording(&self, id: RecordingId) -> GpuResult<()>;

    /// Close the recording and hand it to the GPU as one ordered batch.
    fn submit(&self, id: RecordingId) -> GpuResult<()>;

    // ------------------------------------------------------------------
    // Completion tracking
    // ------------------------------------------------------------------

    /// Instruct the GPU to advance its completion counter to `value` once all
    /// prior submissions have drained. Returns immediately.
    fn signal(&self, value: u64) -> GpuResult<()>;

    /// The completion counter value the GPU has reached so far. Non-blocking.
    fn completed_value(&self) -> GpuResult<u64>;

    /// Block until the completion counter reaches `value` or `timeout`
    /// elapses.
    ///
    /// # Errors
    ///
    /// [`GpuError::WaitTimeout`](crate::GpuError::WaitTimeout) when the
    /// timeout elapses first; a fatal device error if the device is lost
    /// while waiting.
    fn wait_until(&self, value: u64, timeout: Duration) -> GpuResult<()>;

    // ------------------------------------------------------------------
    // Frame targets / presentation
    // ------------------------------------------------------------------

    /// Number of back buffers in the swapchain rotation.
    fn slot_count(&self) -> u32;

    /// The slot the next frame should render into, as reported by the
    /// swapchain (present may rotate indices in an order of its own).
    fn current_slot(&self) -> GpuResult<SlotIndex>;

    /// Current dimensions of the frame targets.
    fn target_size(&self) -> (u32, u32);

    /// Release all frame-target images and views.
    ///
    /// Only valid after the device has been drained; any in-flight reference
    /// to a released target is undefined.
    fn release_targets(&self) -> GpuResult<()>;

    /// Resize the underlying swapchain storage. Targets must have been
    /// released first and recreated afterwards.
    fn resize_targets(&self, width: u32, height: u32) -> GpuResult<()>;

    /// Recreate frame-target images and their render-target views after a
    /// resize.
    fn recreate_targets(&self) -> GpuResult<()>;

    /// Queue the current slot's image for presentation.
    ///
    /// `allow_tearing` is only honored when the device supports it and vsync
    /// is off; callers enforce that policy, the device trusts its arguments.
    fn present(&self, vsync: bool, allow_tearing: bool) -> GpuResult<()>;

    /// Whether the display path supports presenting without vertical sync.
    fn tearing_supported(&self) -> bool;

    // ------------------------------------------------------------------
    // Recording operations on frame targets
    // ------------------------------------------------------------------

    /// Record a layout transition for a frame target into `recording`.
    fn record_target_transition(
        &self,
        recording: RecordingId,
        slot: SlotIndex,
        transition: TargetTransition,
    ) -> GpuResult<()>;

    /// Record a full-target clear into `recording`.
    ///
    /// The target must be in the render-target layout.
    fn record_clear(
        &self,
        recording: RecordingId,
        slot: SlotIndex,
        color: [f32; 4],
    ) -> GpuResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_index_round_trips_through_usize() {
        assert_eq!(SlotIndex(2).as_usize(), 2);
    }

    #[test]
    fn gpu_device_is_object_safe() {
        // Compile-time check: the engine stores `&dyn GpuDevice` seams.
        fn assert_dyn(_: &dyn GpuDevice) {}
        let _ = assert_dyn;
    }
}
