//! Frame and swap-chain management.
//!
//! The [`FrameManager`] runs the per-frame present cycle over the swapchain's
//! slots and the resize transition that recreates them. Each slot carries the
//! completion marker of the last submission that referenced it; no slot image
//! is ever written or released while its marker is unreached.
//!
//! # Present cycle
//!
//! ```text
//! wait for the slot's previous use (lazy presented -> idle edge)
//!   -> acquire recording context
//!   -> barrier: presentable -> render target
//!   -> content records
//!   -> barrier: render target -> presentable
//!   -> execute (one marker)
//!   -> present
//!   -> adopt the swapchain-reported next slot
//!   -> pacing wait (policy-dependent)
//! ```
//!
//! # Resize transition
//!
//! Flush the queue, release every slot image, resize the swapchain storage
//! (dimensions clamped to at least 1x1), recreate images and views, then
//! resume. The flush is mandatory: resizing releases resources an in-flight
//! command list could still reference. No frame is recorded during the
//! transition.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use kiln_gpu::{GpuDevice, GpuResult, TargetTransition};

use crate::content::{FrameContext, RenderContent};
use crate::fence::CompletionMarker;
use crate::frame::FrameSlot;
use crate::queue::SubmissionQueue;
use crate::{DEVICE_WAIT_TIMEOUT, RECORDER_POOL_CEILING};

/// How the CPU paces itself against the GPU across frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramePacing {
    /// Wait for each frame's own marker before starting the next frame.
    ///
    /// Caps in-flight frames at one, trading pipelining for simplicity and
    /// bounded memory.
    #[default]
    SingleFrame,
    /// Wait only when about to reuse a slot whose previous marker is
    /// unreached, permitting up to N-1 frames of CPU/GPU overlap.
    SlotPipelined,
}

/// Swapchain and pacing configuration.
#[derive(Debug, Clone, Copy)]
pub struct FrameConfig {
    /// Requested number of back buffers; values below 2 are raised to 2.
    pub buffer_count: u32,
    /// Whether presentation waits for vertical sync. Defaults to on.
    pub vsync: bool,
    /// Tearing override: `None` defers to what the device reports.
    pub allow_tearing: Option<bool>,
    /// CPU/GPU pacing policy.
    pub pacing: FramePacing,
}

impl FrameConfig {
    /// The back-buffer count with the minimum of 2 enforced.
    pub fn buffer_count(&self) -> u32 {
        if self.buffer_count < 2 {
            warn!(
                "Back-buffer count {} below minimum, clamping to 2",
                self.buffer_count
            );
        }
        self.buffer_count.max(2)
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            buffer_count: 3,
            vsync: true,
            allow_tearing: None,
            pacing: FramePacing::default(),
        }
    }
}

/// Owns the frame-slot state machine and all swapchain mutation.
///
/// The sole caller of resize and present on the device; the submission queue
/// is synchronized with before any shared resource is touched.
pub struct FrameManager<D: GpuDevice> {
    device: Arc<D>,
    slots: Vec<FrameSlot>,
    current: kiln_gpu::SlotIndex,
    width: u32,
    height: u32,
    vsync: bool,
    /// Whether tearing may ever be requested (auto-detected or overridden).
    tearing_allowed: bool,
    pacing: FramePacing,
    wait_timeout: Duration,
}

impl<D: GpuDevice> FrameManager<D> {
    /// Builds slot bookkeeping over the device's already-created swapchain.
    pub fn new(device: Arc<D>, config: &FrameConfig) -> GpuResult<Self> {
        let (width, height) = device.target_size();
        let slots = (0..device.slot_count())
            .map(|i| FrameSlot::new(kiln_gpu::SlotIndex(i)))
            .collect::<Vec<_>>();
        let current = device.current_slot()?;
        let tearing_allowed = config
            .allow_tearing
            .unwrap_or_else(|| device.tearing_supported());

        info!(
            "Frame manager ready: {} slots, {}x{}, vsync {}, tearing {}",
            slots.len(),
            width,
            height,
            config.vsync,
            tearing_allowed
        );

        Ok(Self {
            device,
            slots,
            current,
            width,
            height,
            vsync: config.vsync,
            tearing_allowed,
            pacing: config.pacing,
            wait_timeout: DEVICE_WAIT_TIMEOUT,
        })
    }

    /// Current client-area size in pixels.
    #[inline]
    pub fn client_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// The slot the next frame renders into.
    #[inline]
    pub fn current_slot(&self) -> &FrameSlot {
        &self.slots[self.current.as_usize()]
    }

    /// Whether presentation currently waits for vertical sync.
    #[inline]
    pub fn vsync(&self) -> bool {
        self.vsync
    }

    /// Turn vertical sync on or off for subsequent presents.
    pub fn set_vsync(&mut self, vsync: bool) {
        if self.vsync != vsync {
            self.vsync = vsync;
            info!("VSync {}", if vsync { "enabled" } else { "disabled" });
        }
    }

    /// The tearing flag for the next present call.
    ///
    /// Tearing is permitted only when the device reports support for it and
    /// vsync is off; any other combination forces it off.
    pub fn effective_tearing(&self) -> bool {
        self.tearing_allowed && self.device.tearing_supported() && !self.vsync
    }

    /// Runs one full present cycle, delegating drawing to `content`.
    ///
    /// Returns the frame's completion marker.
    pub fn present_cycle(
        &mut self,
        queue: &mut SubmissionQueue<D>,
        content: &mut dyn RenderContent<D>,
    ) -> GpuResult<CompletionMarker> {
        // Lazy presented -> idle edge: never touch a slot whose previous use
        // the GPU may still be reading. Under SingleFrame pacing the marker
        // is already reached and this is a cheap counter check.
        if let Some(marker) = self.current_slot().last_marker() {
            queue.fence().wait_until(marker, self.wait_timeout)?;
        }

        let context = queue.acquire_recording_context()?;
        let slot = self.current;

        self.device.record_target_transition(
            context.id(),
            slot,
            TargetTransition::AcquireRenderTarget,
        )?;

        let mut frame =
            FrameContext::new(self.device.as_ref(), context.id(), slot, self.width, self.height);
        content.render(&mut frame)?;

        self.device.record_target_transition(
            context.id(),
            slot,
            TargetTransition::ReleaseToPresent,
        )?;

        let marker = queue.execute(context)?;
        self.slots[slot.as_usize()].set_last_marker(marker);

        self.device.present(self.vsync, self.effective_tearing())?;
        // The swapchain picks the next index; present may rotate slots in an
        // order of its own.
        self.current = self.device.current_slot()?;

        if self.pacing == FramePacing::SingleFrame {
            queue.fence().wait_until(marker, self.wait_timeout)?;
        }

        Ok(marker)
    }

    /// Runs the resize transition.
    ///
    /// Requesting the dimensions already in effect is a no-op. Zero
    /// dimensions are clamped to 1. Returns whether a transition ran.
    pub fn resize(
        &mut self,
        queue: &mut SubmissionQueue<D>,
        width: u32,
        height: u32,
    ) -> GpuResult<bool> {
        if width == self.width && height == self.height {
            debug!("Resize to current size {}x{} ignored", width, height);
            return Ok(false);
        }

        // Zero-sized back buffers are invalid; clamp instead of failing.
        self.width = width.max(1);
        self.height = height.max(1);

        info!("Resizing frame targets to {}x{}", self.width, self.height);

        // The flush is mandatory: in-flight command lists may still reference
        // the images about to be released.
        queue.flush()?;
        self.device.release_targets()?;
        self.device.resize_targets(self.width, self.height)?;
        self.device.recreate_targets()?;

        // Fresh images: no submission has referenced any slot yet.
        self.slots = (0..self.device.slot_count())
            .map(|i| FrameSlot::new(kiln_gpu::SlotIndex(i)))
            .collect();
        let (width, height) = self.device.target_size();
        self.width = width;
        self.height = height;
        self.current = self.device.current_slot()?;

        Ok(true)
    }

    /// Default recorder-pool ceiling for a manager of this slot count.
    pub fn recommended_pool_ceiling(&self) -> usize {
        RECORDER_POOL_CEILING.max(self.slots.len() + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_gpu::FakeGpu;

    #[test]
    fn pacing_defaults_to_single_frame() {
        assert_eq!(FramePacing::default(), FramePacing::SingleFrame);
        assert_eq!(FrameConfig::default().pacing, FramePacing::SingleFrame);
        assert!(FrameConfig::default().vsync);
    }

    #[test]
    fn buffer_count_clamps_to_two() {
        let config = FrameConfig {
            buffer_count: 0,
            ..FrameConfig::default()
        };
        assert_eq!(config.buffer_count(), 2);
        assert_eq!(FrameConfig::default().buffer_count(), 3);
    }

    #[test]
    fn tearing_is_forced_off_with_vsync() {
        let device = Arc::new(FakeGpu::new(2, 64, 64).with_tearing_support(true));
        let mut manager = FrameManager::new(device, &FrameConfig::default()).unwrap();

        // vsync on: tearing off regardless of support.
        assert!(manager.vsync());
        assert!(!manager.effective_tearing());

        manager.set_vsync(false);
        assert!(manager.effective_tearing());
    }

    #[test]
    fn tearing_requires_device_support() {
        let device = Arc::new(FakeGpu::new(2, 64, 64).with_tearing_support(false));
        let config = FrameConfig {
            vsync: false,
            allow_tearing: Some(true),
            ..FrameConfig::default()
        };
        let manager = FrameManager::new(device, &config).unwrap();

        // Override asks for tearing but the device cannot do it.
        assert!(!manager.effective_tearing());
    }

    #[test]
    fn tearing_override_can_disable_a_capable_device() {
        let device = Arc::new(FakeGpu::new(2, 64, 64).with_tearing_support(true));
        let config = FrameConfig {
            vsync: false,
            allow_tearing: Some(false),
            ..FrameConfig::default()
        };
        let manager = FrameManager::new(device, &config).unwrap();
        assert!(!manager.effective_tearing());
    }

    #[test]
    fn frame_manager_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<FrameManager<FakeGpu>>();
    }
}
