//! Completion tracking over the device's GPU timeline.
//!
//! The [`Fence`] pairs a CPU-side counter with the device's completion
//! counter. Every submission gets a [`CompletionMarker`]; a marker is
//! "reached" once the GPU has finished all work submitted up to and including
//! the submission that produced it.
//!
//! # Usage pattern
//!
//! ```text
//! 1. Submit a command batch
//! 2. marker = fence.signal()        (pure counter bump + queue-side signal)
//! 3. ... later ...
//! 4. fence.is_reached(marker)?      (non-blocking poll)
//!    fence.wait_until(marker, t)?   (OS-level wait, bounded)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::trace;

use kiln_gpu::{GpuDevice, GpuResult};

/// A point on the GPU's execution timeline.
///
/// Markers are strictly increasing per [`Fence`] and compare by ordinary
/// integer ordering. No wraparound handling: a 64-bit space outlives any
/// realistic frame rate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompletionMarker(u64);

impl CompletionMarker {
    /// The raw counter value.
    #[inline]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for CompletionMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Mints completion markers and tracks how far the GPU has gotten.
///
/// The local counter is atomic so marker values stay strictly increasing even
/// if signals ever race; everything else is delegated to the device.
pub struct Fence<D: GpuDevice> {
    device: Arc<D>,
    /// Last marker value issued. The GPU-reported counter trails this.
    last_issued: AtomicU64,
}

impl<D: GpuDevice> Fence<D> {
    /// Creates a fence starting at zero; the first marker is 1.
    pub fn new(device: Arc<D>) -> Self {
        Self {
            device,
            last_issued: AtomicU64::new(0),
        }
    }

    /// Issues the next marker and instructs the GPU to advance its counter to
    /// it once all prior submissions have drained.
    ///
    /// The increment itself is a pure CPU-side counter bump; no waiting
    /// occurs here.
    pub fn signal(&self) -> GpuResult<CompletionMarker> {
        let value = self.last_issued.fetch_add(1, Ordering::Relaxed) + 1;
        self.device.signal(value)?;
        trace!("Signaled completion marker {}", value);
        Ok(CompletionMarker(value))
    }

    /// Whether the GPU has reached `marker`. Non-blocking.
    pub fn is_reached(&self, marker: CompletionMarker) -> GpuResult<bool> {
        Ok(self.device.completed_value()? >= marker.value())
    }

    /// Blocks until the GPU reaches `marker` or `timeout` elapses.
    ///
    /// Skips the OS wait entirely when the marker is already reached. A
    /// device fault surfacing here is non-recoverable and propagates as-is.
    pub fn wait_until(&self, marker: CompletionMarker, timeout: Duration) -> GpuResult<()> {
        if self.is_reached(marker)? {
            return Ok(());
        }
        trace!("Waiting for completion marker {}", marker);
        self.device.wait_until(marker.value(), timeout)
    }

    /// The value of the most recently issued marker.
    pub fn last_issued(&self) -> u64 {
        self.last_issued.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_gpu::{FakeGpu, GpuError};

    #[test]
    fn markers_are_strictly_increasing() {
        let device = Arc::new(FakeGpu::new(2, 64, 64));
        let fence = Fence::new(device);

        let mut previous = None;
        for _ in 0..10 {
            let marker = fence.signal().unwrap();
            if let Some(prev) = previous {
                assert!(marker > prev);
            }
            previous = Some(marker);
        }
        assert_eq!(fence.last_issued(), 10);
    }

    #[test]
    fn completion_is_monotonic() {
        let device = Arc::new(FakeGpu::new(2, 64, 64).with_manual_completion());
        let fence = Fence::new(device.clone());

        let first = fence.signal().unwrap();
        let second = fence.signal().unwrap();
        assert!(!fence.is_reached(first).unwrap());

        device.complete_through(first.value());
        assert!(fence.is_reached(first).unwrap());
        assert!(!fence.is_reached(second).unwrap());

        device.complete_through(second.value());
        assert!(fence.is_reached(second).unwrap());
    }

    #[test]
    fn wait_on_reached_marker_returns_without_device_wait() {
        let device = Arc::new(FakeGpu::new(2, 64, 64));
        let fence = Fence::new(device.clone());

        let marker = fence.signal().unwrap();
        fence
            .wait_until(marker, Duration::from_millis(1))
            .unwrap();

        // Fast path: no WaitUntil op was issued to the device.
        assert!(
            !device
                .ops()
                .iter()
                .any(|op| matches!(op, kiln_gpu::FakeOp::WaitUntil(_)))
        );
    }

    #[test]
    fn unreached_wait_times_out() {
        let device = Arc::new(FakeGpu::new(2, 64, 64).with_manual_completion());
        let fence = Fence::new(device);

        let marker = fence.signal().unwrap();
        assert!(matches!(
            fence.wait_until(marker, Duration::from_millis(1)),
            Err(GpuError::WaitTimeout(_))
        ));
    }

    #[test]
    fn fence_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Fence<FakeGpu>>();
    }
}
