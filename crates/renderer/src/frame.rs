//! Per-slot frame bookkeeping.

use kiln_gpu::SlotIndex;

use crate::fence::CompletionMarker;

/// One rotating back buffer and the last submission that referenced it.
///
/// The image itself lives behind the device; the engine only tracks which
/// marker must be reached before the slot's image may be written again.
#[derive(Debug)]
pub struct FrameSlot {
    index: SlotIndex,
    /// Marker of the last submission targeting this slot; `None` when no
    /// submission has referenced it since (re)creation.
    last_marker: Option<CompletionMarker>,
}

impl FrameSlot {
    /// Create bookkeeping for one slot, with no submission on record.
    pub fn new(index: SlotIndex) -> Self {
        Self {
            index,
            last_marker: None,
        }
    }

    /// The slot's position in the swapchain rotation.
    pub fn index(&self) -> SlotIndex {
        self.index
    }

    /// Marker gating reuse of this slot's image.
    pub fn last_marker(&self) -> Option<CompletionMarker> {
        self.last_marker
    }

    /// Record the submission that just targeted this slot.
    pub fn set_last_marker(&mut self, marker: CompletionMarker) {
        self.last_marker = Some(marker);
    }

    /// Forget the slot's history, after its image was recreated.
    pub fn clear_marker(&mut self) {
        self.last_marker = None;
    }
}
