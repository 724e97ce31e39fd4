//! Demo render content: a slow color pulse over the whole frame.

use kiln_core::UpdateArgs;
use kiln_gpu::{GpuDevice, GpuResult};
use kiln_renderer::{FrameContext, RenderContent, ResizeArgs};

/// Base clear color (cornflower blue).
const BASE_COLOR: [f32; 3] = [0.4, 0.6, 0.9];

/// Clears each frame with a color that drifts over time.
///
/// Owns no GPU resources; it exists to exercise the full frame cycle and to
/// show what a content provider looks like.
pub struct PulseScene {
    total_seconds: f64,
}

impl PulseScene {
    pub fn new() -> Self {
        Self { total_seconds: 0.0 }
    }

    fn current_color(&self) -> [f32; 4] {
        // Gentle brightness swing around the base color.
        let pulse = 0.15 * (self.total_seconds * 0.8).sin() as f32;
        [
            (BASE_COLOR[0] + pulse).clamp(0.0, 1.0),
            (BASE_COLOR[1] + pulse).clamp(0.0, 1.0),
            (BASE_COLOR[2] + pulse).clamp(0.0, 1.0),
            1.0,
        ]
    }
}

impl Default for PulseScene {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: GpuDevice> RenderContent<D> for PulseScene {
    fn load_resources(&mut self, _device: &D) -> GpuResult<()> {
        Ok(())
    }

    fn unload_resources(&mut self, _device: &D) {}

    fn update(&mut self, args: UpdateArgs) {
        self.total_seconds = args.total_seconds;
    }

    fn render(&mut self, frame: &mut FrameContext<'_, D>) -> GpuResult<()> {
        frame.clear(self.current_color())
    }

    fn resize(&mut self, args: ResizeArgs) {
        tracing::debug!("Scene resized to {}x{}", args.width, args.height);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_stays_in_range() {
        let mut scene = PulseScene::new();
        for step in 0..100 {
            scene.total_seconds = f64::from(step) * 0.37;
            for channel in scene.current_color() {
                assert!((0.0..=1.0).contains(&channel));
            }
        }
    }
}
