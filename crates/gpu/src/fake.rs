//! Scripted in-memory device for exercising the engine without a GPU.
//!
//! [`FakeGpu`] implements [`GpuDevice`] over plain state plus an ordered
//! operation log. Tests drive the engine exactly as the real backend would be
//! driven, then assert on the log: which operations ran, with which
//! arguments, and in which order.
//!
//! Completion advancement comes in three modes:
//!
//! - **Automatic** (default): every signaled value completes instantly, as if
//!   the GPU were infinitely fast. Frame loops run to completion.
//! - **Manual** ([`FakeGpu::with_manual_completion`]): the counter only moves
//!   when the test calls [`FakeGpu::complete_through`], so tests can hold the
//!   GPU "busy" and observe how the engine behaves under backpressure.
//! - **On wait** ([`FakeGpu::with_completion_on_wait`]): signaled values stay
//!   pending until something blocks on them, so wait calls are actually
//!   issued and appear in the log in their real positions.
//!
//! # Example
//!
//! ```
//! use kiln_gpu::{FakeGpu, FakeOp, GpuDevice};
//!
//! let gpu = FakeGpu::new(3, 1280, 720);
//! let recording = gpu.create_recording().unwrap();
//! gpu.reset_recording(recording).unwrap();
//! gpu.submit(recording).unwrap();
//! gpu.signal(1).unwrap();
//!
//! assert_eq!(gpu.completed_value().unwrap(), 1);
//! assert!(matches!(gpu.ops().last(), Some(FakeOp::Signal(1))));
//! ```

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{GpuError, GpuResult};
use crate::interface::{GpuDevice, RecordingId, SlotIndex, TargetTransition};

/// One logged device operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FakeOp {
    CreateRecording(RecordingId),
    ResetRecording(RecordingId),
    Submit(RecordingId),
    Signal(u64),
    WaitUntil(u64),
    ReleaseTargets,
    ResizeTargets { width: u32, height: u32 },
    RecreateTargets,
    Present { vsync: bool, allow_tearing: bool },
    TargetTransition {
        recording: RecordingId,
        slot: SlotIndex,
        transition: TargetTransition,
    },
    Clear {
        recording: RecordingId,
        slot: SlotIndex,
    },
}

#[derive(Debug, Default)]
struct FakeState {
    ops: Vec<FakeOp>,
    /// Highest value the queue was asked to signal.
    signaled: u64,
    /// Value the pretend GPU has reached.
    completed: u64,
    next_recording: u64,
    open_recordings: HashSet<RecordingId>,
    current_slot: u32,
    width: u32,
    height: u32,
    targets_alive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompletionMode {
    /// Signaled values complete instantly.
    Automatic,
    /// Only `complete_through` moves the counter.
    Manual,
    /// Signaled values complete when waited on.
    OnWait,
}

/// In-memory [`GpuDevice`] with an ordered operation log.
#[derive(Debug)]
pub struct FakeGpu {
    state: Mutex<FakeState>,
    slot_count: u32,
    tearing_supported: bool,
    completion: CompletionMode,
}

impl FakeGpu {
    /// Create a fake device with `slot_count` frame targets of the given
    /// size, automatic completion, and no tearing support.
    pub fn new(slot_count: u32, width: u32, height: u32) -> Self {
        Self {
            state: Mutex::new(FakeState {
                width,
                height,
                targets_alive: true,
                ..FakeState::default()
            }),
            slot_count,
            tearing_supported: false,
            completion: CompletionMode::Automatic,
        }
    }

    /// Report tearing support to callers.
    pub fn with_tearing_support(mut self, supported: bool) -> Self {
        self.tearing_supported = supported;
        self
    }

    /// Switch to manual completion: signaled values stay pending until
    /// [`complete_through`](Self::complete_through) is called.
    pub fn with_manual_completion(mut self) -> Self {
        self.completion = CompletionMode::Manual;
        self
    }

    /// Switch to completion-on-wait: signaled values stay pending until a
    /// wait blocks on them, which then succeeds immediately.
    pub fn with_completion_on_wait(mut self) -> Self {
        self.completion = CompletionMode::OnWait;
        self
    }

    /// Advance the pretend GPU's completion counter.
    pub fn complete_through(&self, value: u64) {
        let mut state = self.lock();
        state.completed = state.completed.max(value);
    }

    /// Snapshot of the operation log so far.
    pub fn ops(&self) -> Vec<FakeOp> {
        self.lock().ops.clone()
    }

    /// Drain the operation log, leaving it empty.
    pub fn take_ops(&self) -> Vec<FakeOp> {
        std::mem::take(&mut self.lock().ops)
    }

    /// The completion value the pretend GPU has reached.
    pub fn completed(&self) -> u64 {
        self.lock().completed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake device state poisoned")
    }
}

impl GpuDevice for FakeGpu {
    fn create_recording(&self) -> GpuResult<RecordingId> {
        let mut state = self.lock();
        let id = RecordingId(state.next_recording);
        state.next_recording += 1;
        state.ops.push(FakeOp::CreateRecording(id));
        Ok(id)
    }

    fn reset_recording(&self, id: RecordingId) -> GpuResult<()> {
        let mut state = self.lock();
        if id.0 >= state.next_recording {
            return Err(GpuError::InvalidHandle(format!("{id:?}")));
        }
        state.open_recordings.insert(id);
        state.ops.push(FakeOp::ResetRecording(id));
        Ok(())
    }

    fn submit(&self, id: RecordingId) -> GpuResult<()> {
        let mut state = self.lock();
        if !state.open_recordings.remove(&id) {
            return Err(GpuError::InvalidHandle(format!("{id:?} is not recording")));
        }
        state.ops.push(FakeOp::Submit(id));
        Ok(())
    }

    fn signal(&self, value: u64) -> GpuResult<()> {
        let mut state = self.lock();
        state.signaled = state.signaled.max(value);
        if self.completion == CompletionMode::Automatic {
            state.completed = state.signaled;
        }
        state.ops.push(FakeOp::Signal(value));
        Ok(())
    }

    fn completed_value(&self) -> GpuResult<u64> {
        Ok(self.lock().completed)
    }

    fn wait_until(&self, value: u64, timeout: Duration) -> GpuResult<()> {
        let mut state = self.lock();
        state.ops.push(FakeOp::WaitUntil(value));
        if state.completed >= value {
            return Ok(());
        }
        // A signaled value "finishes" under a blocking wait in on-wait mode;
        // otherwise the pretend GPU makes no progress on its own and a
        // pending wait is indistinguishable from a hang.
        if self.completion == CompletionMode::OnWait && value <= state.signaled {
            state.completed = value;
            return Ok(());
        }
        Err(GpuError::WaitTimeout(timeout))
    }

    fn slot_count(&self) -> u32 {
        self.slot_count
    }

    fn current_slot(&self) -> GpuResult<SlotIndex> {
        Ok(SlotIndex(self.lock().current_slot))
    }

    fn target_size(&self) -> (u32, u32) {
        let state = self.lock();
        (state.width, state.height)
    }

    fn release_targets(&self) -> GpuResult<()> {
        let mut state = self.lock();
        state.targets_alive = false;
        state.ops.push(FakeOp::ReleaseTargets);
        Ok(())
    }

    fn resize_targets(&self, width: u32, height: u32) -> GpuResult<()> {
        let mut state = self.lock();
        if state.targets_alive {
            return Err(GpuError::Swapchain(
                "resize while targets are still alive".to_string(),
            ));
        }
        state.width = width;
        state.height = height;
        state.ops.push(FakeOp::ResizeTargets { width, height });
        Ok(())
    }

    fn recreate_targets(&self) -> GpuResult<()> {
        let mut state = self.lock();
        state.targets_alive = true;
        state.current_slot = 0;
        state.ops.push(FakeOp::RecreateTargets);
        Ok(())
    }

    fn present(&self, vsync: bool, allow_tearing: bool) -> GpuResult<()> {
        let mut state = self.lock();
        if !state.targets_alive {
            return Err(GpuError::Swapchain("present with no targets".to_string()));
        }
        state.ops.push(FakeOp::Present {
            vsync,
            allow_tearing,
        });
        // Flip-style rotation: the swapchain, not the caller, picks the next
        // back buffer.
        state.current_slot = (state.current_slot + 1) % self.slot_count;
        Ok(())
    }

    fn tearing_supported(&self) -> bool {
        self.tearing_supported
    }

    fn record_target_transition(
        &self,
        recording: RecordingId,
        slot: SlotIndex,
        transition: TargetTransition,
    ) -> GpuResult<()> {
        let mut state = self.lock();
        if !state.open_recordings.contains(&recording) {
            return Err(GpuError::InvalidHandle(format!(
                "{recording:?} is not recording"
            )));
        }
        state.ops.push(FakeOp::TargetTransition {
            recording,
            slot,
            transition,
        });
        Ok(())
    }

    fn record_clear(
        &self,
        recording: RecordingId,
        slot: SlotIndex,
        _color: [f32; 4],
    ) -> GpuResult<()> {
        let mut state = self.lock();
        if !state.open_recordings.contains(&recording) {
            return Err(GpuError::InvalidHandle(format!(
                "{recording:?} is not recording"
            )));
        }
        state.ops.push(FakeOp::Clear { recording, slot });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn present_rotates_through_slots() {
        let gpu = FakeGpu::new(3, 640, 480);
        assert_eq!(gpu.current_slot().unwrap(), SlotIndex(0));

        for expected in [1, 2, 0, 1] {
            let recording = gpu.create_recording().unwrap();
            gpu.reset_recording(recording).unwrap();
            gpu.submit(recording).unwrap();
            gpu.present(true, false).unwrap();
            assert_eq!(gpu.current_slot().unwrap(), SlotIndex(expected));
        }
    }

    #[test]
    fn manual_completion_times_out_until_advanced() {
        let gpu = FakeGpu::new(2, 64, 64).with_manual_completion();
        gpu.signal(1).unwrap();

        assert!(matches!(
            gpu.wait_until(1, Duration::from_millis(10)),
            Err(GpuError::WaitTimeout(_))
        ));

        gpu.complete_through(1);
        gpu.wait_until(1, Duration::from_millis(10)).unwrap();
    }

    #[test]
    fn resize_requires_released_targets() {
        let gpu = FakeGpu::new(2, 64, 64);
        assert!(gpu.resize_targets(128, 128).is_err());

        gpu.release_targets().unwrap();
        gpu.resize_targets(128, 128).unwrap();
        gpu.recreate_targets().unwrap();
        assert_eq!(gpu.target_size(), (128, 128));
    }

    #[test]
    fn submitting_a_closed_recording_is_rejected() {
        let gpu = FakeGpu::new(2, 64, 64);
        let recording = gpu.create_recording().unwrap();
        gpu.reset_recording(recording).unwrap();
        gpu.submit(recording).unwrap();

        assert!(gpu.submit(recording).is_err());
    }

    #[test]
    fn fake_gpu_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FakeGpu>();
    }
}
