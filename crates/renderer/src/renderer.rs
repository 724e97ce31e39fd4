//! Top-level engine facade.
//!
//! [`Renderer`] wires the submission queue, the frame manager, the installed
//! [`RenderContent`] provider, and the owned frame clock into the loop the
//! application drives: `render_frame` once per redraw, `resize` on client
//! area changes, `shutdown` (or drop) to drain the GPU before teardown.

use std::sync::Arc;

use tracing::{error, info};

use kiln_core::FrameTiming;
use kiln_gpu::{GpuDevice, GpuResult};

use crate::content::{RenderContent, ResizeArgs};
use crate::frame_manager::{FrameConfig, FrameManager};
use crate::queue::SubmissionQueue;
use crate::DEVICE_WAIT_TIMEOUT;

/// The engine: one device, one submission queue, one frame manager, one
/// content provider.
pub struct Renderer<D: GpuDevice> {
    device: Arc<D>,
    queue: SubmissionQueue<D>,
    frames: FrameManager<D>,
    content: Option<Box<dyn RenderContent<D>>>,
    timing: FrameTiming,
}

impl<D: GpuDevice> Renderer<D> {
    /// Builds the engine over a device whose swapchain already exists.
    pub fn new(device: Arc<D>, config: FrameConfig) -> GpuResult<Self> {
        let frames = FrameManager::new(device.clone(), &config)?;
        let queue = SubmissionQueue::new(
            device.clone(),
            frames.recommended_pool_ceiling(),
            DEVICE_WAIT_TIMEOUT,
        );

        Ok(Self {
            device,
            queue,
            frames,
            content: None,
            timing: FrameTiming::new(),
        })
    }

    /// Installs a content provider, taking ownership.
    ///
    /// Any previous provider is unloaded first, after a flush so none of its
    /// resources are still in flight. The new provider's resources are loaded
    /// before it renders anything.
    pub fn set_content(&mut self, mut content: Box<dyn RenderContent<D>>) -> GpuResult<()> {
        if let Some(mut old) = self.content.take() {
            self.queue.flush()?;
            old.unload_resources(self.device.as_ref());
        }

        content.load_resources(self.device.as_ref())?;
        self.content = Some(content);
        self.timing.reset();
        info!("Render content installed");
        Ok(())
    }

    /// Advances the content and runs one present cycle.
    ///
    /// Does nothing when no content is installed. Any device failure here is
    /// fatal to the render loop; the caller should stop driving frames.
    pub fn render_frame(&mut self) -> GpuResult<()> {
        let Some(content) = self.content.as_mut() else {
            return Ok(());
        };

        let args = self.timing.tick();
        content.update(args);
        self.frames.present_cycle(&mut self.queue, content.as_mut())?;
        Ok(())
    }

    /// Runs the resize transition and notifies the content afterwards.
    pub fn resize(&mut self, width: u32, height: u32) -> GpuResult<()> {
        if self.frames.resize(&mut self.queue, width, height)? {
            let (width, height) = self.frames.client_size();
            if let Some(content) = self.content.as_mut() {
                content.resize(ResizeArgs { width, height });
            }
        }
        Ok(())
    }

    /// Current client-area size in pixels.
    #[inline]
    pub fn client_size(&self) -> (u32, u32) {
        self.frames.client_size()
    }

    /// Whether presentation currently waits for vertical sync.
    #[inline]
    pub fn vsync(&self) -> bool {
        self.frames.vsync()
    }

    /// Turn vertical sync on or off.
    pub fn set_vsync(&mut self, vsync: bool) {
        self.frames.set_vsync(vsync);
    }

    /// Flip the vertical sync setting.
    pub fn toggle_vsync(&mut self) {
        let vsync = !self.frames.vsync();
        self.frames.set_vsync(vsync);
    }

    /// Drains the GPU and unloads the content provider.
    ///
    /// Safe to call more than once; drop performs the same teardown if this
    /// was never called.
    pub fn shutdown(&mut self) -> GpuResult<()> {
        self.queue.flush()?;
        if let Some(mut content) = self.content.take() {
            content.unload_resources(self.device.as_ref());
        }
        Ok(())
    }

    /// The device this engine renders with.
    #[inline]
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }
}

impl<D: GpuDevice> Drop for Renderer<D> {
    fn drop(&mut self) {
        if self.content.is_some()
            && let Err(e) = self.shutdown()
        {
            error!("Failed to drain GPU during renderer teardown: {e}");
        }
    }
}
