//! Recording context pooling.
//!
//! A [`RecordingContext`] pairs a command allocator with a recording list,
//! addressed through the device as one [`RecordingId`]. Contexts are lent out
//! for a frame, submitted, and returned tagged with the completion marker of
//! their submission. The backing allocator is only reset once that marker has
//! been reached; until then the GPU may still be reading it.
//!
//! Released contexts form a FIFO. Because markers are issued in submission
//! order and completion is monotonic, the front of the queue is always the
//! first context to drain, so acquisition never has to scan.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use kiln_gpu::{GpuDevice, GpuError, GpuResult, RecordingId};

use crate::fence::{CompletionMarker, Fence};

/// A command allocator + recording list pair, lent out by the pool.
///
/// While held, the caller records commands through the device using
/// [`id`](Self::id). Hand it back to the submission queue to execute it; the
/// queue returns it to the pool.
#[derive(Debug)]
pub struct RecordingContext {
    id: RecordingId,
    /// Marker of the last submission recorded through this context; `None`
    /// until the first submission.
    last_marker: Option<CompletionMarker>,
}

impl RecordingContext {
    /// The device-side handle to record through.
    #[inline]
    pub fn id(&self) -> RecordingId {
        self.id
    }

    /// Marker that must be reached before the context's allocator may be
    /// reset.
    #[inline]
    pub fn last_marker(&self) -> Option<CompletionMarker> {
        self.last_marker
    }
}

/// Pool of reusable recording contexts.
///
/// Contexts are created lazily up to a soft ceiling and recycled forever.
/// Under sustained GPU backpressure acquisition degrades to a bounded wait on
/// the oldest in-flight context instead of unbounded allocation growth.
pub struct RecorderPool<D: GpuDevice> {
    device: Arc<D>,
    /// Released contexts, oldest submission first.
    released: VecDeque<RecordingContext>,
    created: usize,
    ceiling: usize,
    wait_timeout: Duration,
}

impl<D: GpuDevice> RecorderPool<D> {
    /// Creates an empty pool with the given context ceiling.
    pub fn new(device: Arc<D>, ceiling: usize, wait_timeout: Duration) -> Self {
        Self {
            device,
            released: VecDeque::new(),
            created: 0,
            ceiling: ceiling.max(1),
            wait_timeout,
        }
    }

    /// Acquires an idle context with a freshly reset allocator.
    ///
    /// Preference order:
    /// 1. the oldest released context whose marker has been reached;
    /// 2. a newly created context, while below the ceiling;
    /// 3. block until the oldest released context drains.
    ///
    /// # Errors
    ///
    /// [`GpuError::PoolExhausted`] if the ceiling is hit while every context
    /// is still lent out; [`GpuError::WaitTimeout`] if the oldest in-flight
    /// context does not drain within the pool's wait budget.
    pub fn acquire(&mut self, fence: &Fence<D>) -> GpuResult<RecordingContext> {
        if let Some(front) = self.released.front() {
            let ready = match front.last_marker {
                None => true,
                Some(marker) => fence.is_reached(marker)?,
            };
            if ready {
                return self.reuse_front();
            }
        } else if self.created >= self.ceiling {
            // Ceiling hit with nothing released: every context is lent out.
            return Err(GpuError::PoolExhausted);
        }

        if self.created < self.ceiling {
            let id = self.device.create_recording()?;
            self.created += 1;
            debug!(
                "Created recording context {:?} ({}/{})",
                id, self.created, self.ceiling
            );
            self.device.reset_recording(id)?;
            return Ok(RecordingContext {
                id,
                last_marker: None,
            });
        }

        // At the ceiling: wait for the oldest submission to drain rather than
        // grow. `front` is non-empty here and carries a marker, otherwise the
        // fast path above would have taken it.
        let marker = self
            .released
            .front()
            .and_then(|ctx| ctx.last_marker)
            .ok_or(GpuError::PoolExhausted)?;
        trace!("Recorder pool at ceiling, waiting on {}", marker);
        fence.wait_until(marker, self.wait_timeout)?;
        self.reuse_front()
    }

    /// Returns a submitted context to the pool, tagged with the marker that
    /// makes it safe to reuse. Pure bookkeeping; nothing happens until the
    /// context is next acquired.
    pub fn release(&mut self, mut context: RecordingContext, marker: CompletionMarker) {
        context.last_marker = Some(marker);
        self.released.push_back(context);
    }

    /// Number of contexts created so far.
    #[inline]
    pub fn created(&self) -> usize {
        self.created
    }

    fn reuse_front(&mut self) -> GpuResult<RecordingContext> {
        let context = self
            .released
            .pop_front()
            .ok_or(GpuError::PoolExhausted)?;
        // Safe: the caller verified the context's marker was reached (or it
        // never carried one).
        self.device.reset_recording(context.id)?;
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_gpu::{FakeGpu, FakeOp};

    fn pool_with(
        device: &Arc<FakeGpu>,
        ceiling: usize,
    ) -> (RecorderPool<FakeGpu>, Fence<FakeGpu>) {
        (
            RecorderPool::new(device.clone(), ceiling, Duration::from_millis(10)),
            Fence::new(device.clone()),
        )
    }

    /// Submit the context and release it against a fresh marker.
    fn run_through(
        device: &Arc<FakeGpu>,
        pool: &mut RecorderPool<FakeGpu>,
        fence: &Fence<FakeGpu>,
        context: RecordingContext,
    ) -> CompletionMarker {
        device.submit(context.id()).unwrap();
        let marker = fence.signal().unwrap();
        pool.release(context, marker);
        marker
    }

    #[test]
    fn contexts_are_created_lazily_up_to_the_ceiling() {
        let device = Arc::new(FakeGpu::new(2, 64, 64).with_manual_completion());
        let (mut pool, fence) = pool_with(&device, 3);

        let mut held = Vec::new();
        for expected in 1..=3 {
            held.push(pool.acquire(&fence).unwrap());
            assert_eq!(pool.created(), expected);
        }

        // Every context lent out at the ceiling: nothing left to wait on.
        assert!(matches!(
            pool.acquire(&fence),
            Err(GpuError::PoolExhausted)
        ));
    }

    #[test]
    fn allocator_is_never_reset_before_its_marker_is_reached() {
        let device = Arc::new(FakeGpu::new(2, 64, 64).with_manual_completion());
        let (mut pool, fence) = pool_with(&device, 1);

        let context = pool.acquire(&fence).unwrap();
        let id = context.id();
        let marker = run_through(&device, &mut pool, &fence, context);

        // The single context is pending and its marker is unreached: the
        // acquire must degrade to a wait, which times out on the stalled
        // fake, and no reset may have been recorded.
        assert!(matches!(
            pool.acquire(&fence),
            Err(GpuError::WaitTimeout(_))
        ));
        let resets = device
            .ops()
            .iter()
            .filter(|op| matches!(op, FakeOp::ResetRecording(i) if *i == id))
            .count();
        assert_eq!(resets, 1, "only the initial reset may have run");

        // Once the GPU reaches the marker the same context is handed out
        // again, reset included.
        device.complete_through(marker.value());
        let reused = pool.acquire(&fence).unwrap();
        assert_eq!(reused.id(), id);
        let resets = device
            .ops()
            .iter()
            .filter(|op| matches!(op, FakeOp::ResetRecording(i) if *i == id))
            .count();
        assert_eq!(resets, 2);
    }

    #[test]
    fn oldest_released_context_is_reused_first() {
        let device = Arc::new(FakeGpu::new(2, 64, 64));
        let (mut pool, fence) = pool_with(&device, 4);

        let first = pool.acquire(&fence).unwrap();
        let second = pool.acquire(&fence).unwrap();
        let first_id = first.id();

        run_through(&device, &mut pool, &fence, first);
        run_through(&device, &mut pool, &fence, second);

        // Auto-completing fake: both are ready, FIFO picks the oldest.
        let reused = pool.acquire(&fence).unwrap();
        assert_eq!(reused.id(), first_id);
        assert_eq!(pool.created(), 2);
    }

    #[test]
    fn release_is_pure_bookkeeping() {
        let device = Arc::new(FakeGpu::new(2, 64, 64).with_manual_completion());
        let (mut pool, fence) = pool_with(&device, 2);

        let context = pool.acquire(&fence).unwrap();
        device.submit(context.id()).unwrap();
        let marker = fence.signal().unwrap();

        let ops_before = device.ops().len();
        pool.release(context, marker);
        assert_eq!(device.ops().len(), ops_before, "release touched the device");
    }
}
