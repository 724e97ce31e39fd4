//! Whole-engine scenarios driven through the scripted fake device.

use std::sync::{Arc, Mutex};

use kiln_core::UpdateArgs;
use kiln_gpu::{FakeGpu, FakeOp, GpuResult};
use kiln_renderer::{
    FrameConfig, FrameContext, FramePacing, RenderContent, Renderer, ResizeArgs,
};

#[derive(Default)]
struct SceneStats {
    loads: usize,
    unloads: usize,
    updates: usize,
    renders: usize,
    resizes: Vec<(u32, u32)>,
}

/// Minimal content provider: clears the frame and counts its callbacks.
struct ClearScene {
    stats: Arc<Mutex<SceneStats>>,
}

impl ClearScene {
    fn new() -> (Self, Arc<Mutex<SceneStats>>) {
        let stats = Arc::new(Mutex::new(SceneStats::default()));
        (
            Self {
                stats: stats.clone(),
            },
            stats,
        )
    }
}

impl RenderContent<FakeGpu> for ClearScene {
    fn load_resources(&mut self, _device: &FakeGpu) -> GpuResult<()> {
        self.stats.lock().unwrap().loads += 1;
        Ok(())
    }

    fn unload_resources(&mut self, _device: &FakeGpu) {
        self.stats.lock().unwrap().unloads += 1;
    }

    fn update(&mut self, _args: UpdateArgs) {
        self.stats.lock().unwrap().updates += 1;
    }

    fn render(&mut self, frame: &mut FrameContext<'_, FakeGpu>) -> GpuResult<()> {
        self.stats.lock().unwrap().renders += 1;
        frame.clear([0.4, 0.6, 0.9, 1.0])
    }

    fn resize(&mut self, args: ResizeArgs) {
        self.stats
            .lock()
            .unwrap()
            .resizes
            .push((args.width, args.height));
    }
}

fn renderer_over(
    device: &Arc<FakeGpu>,
    config: FrameConfig,
) -> (Renderer<FakeGpu>, Arc<Mutex<SceneStats>>) {
    let mut renderer = Renderer::new(device.clone(), config).unwrap();
    let (scene, stats) = ClearScene::new();
    renderer.set_content(Box::new(scene)).unwrap();
    (renderer, stats)
}

fn position_of(ops: &[FakeOp], wanted: &FakeOp) -> usize {
    ops.iter()
        .position(|op| op == wanted)
        .unwrap_or_else(|| panic!("{wanted:?} not found in {ops:#?}"))
}

#[test]
fn ten_frames_produce_ten_increasing_markers_and_presents() {
    let device = Arc::new(FakeGpu::new(3, 1280, 720).with_completion_on_wait());
    let (mut renderer, stats) = renderer_over(&device, FrameConfig::default());

    for _ in 0..10 {
        renderer.render_frame().unwrap();
    }
    let ops = device.ops();

    // Exactly ten presents.
    let presents = ops
        .iter()
        .filter(|op| matches!(op, FakeOp::Present { .. }))
        .count();
    assert_eq!(presents, 10);

    // Exactly ten markers, strictly increasing.
    let signals: Vec<u64> = ops
        .iter()
        .filter_map(|op| match op {
            FakeOp::Signal(v) => Some(*v),
            _ => None,
        })
        .collect();
    assert_eq!(signals, (1..=10).collect::<Vec<u64>>());

    // Single-frame pacing: frame N retires (its wait completes) before frame
    // N+1's submission is signaled, so at most one frame is ever in flight.
    for marker in 1..10 {
        let waited = position_of(&ops, &FakeOp::WaitUntil(marker));
        let next_signaled = position_of(&ops, &FakeOp::Signal(marker + 1));
        assert!(
            waited < next_signaled,
            "frame {marker} had not retired before frame {} was signaled",
            marker + 1
        );
    }

    assert_eq!(stats.lock().unwrap().renders, 10);
    assert_eq!(stats.lock().unwrap().updates, 10);
}

#[test]
fn each_frame_submits_signals_presents_then_waits() {
    let device = Arc::new(FakeGpu::new(2, 640, 480).with_completion_on_wait());
    let (mut renderer, _stats) = renderer_over(&device, FrameConfig::default());

    renderer.render_frame().unwrap();
    let ops = device.ops();

    let signal = position_of(&ops, &FakeOp::Signal(1));
    let wait = position_of(&ops, &FakeOp::WaitUntil(1));
    let present = ops
        .iter()
        .position(|op| matches!(op, FakeOp::Present { .. }))
        .expect("present logged");
    let submit = ops
        .iter()
        .position(|op| matches!(op, FakeOp::Submit(_)))
        .expect("submit logged");

    assert!(submit < signal);
    assert!(signal < present);
    assert!(present < wait);
}

#[test]
fn slot_pipelined_pacing_waits_only_when_reusing_a_slot() {
    let device = Arc::new(FakeGpu::new(3, 640, 480).with_completion_on_wait());
    let config = FrameConfig {
        pacing: FramePacing::SlotPipelined,
        ..FrameConfig::default()
    };
    let (mut renderer, _stats) = renderer_over(&device, config);

    for _ in 0..5 {
        renderer.render_frame().unwrap();
    }

    // Three slots, five frames: only frames 4 and 5 revisit a slot, waiting
    // on that slot's previous marker. Everything else overlaps freely.
    let waits: Vec<u64> = device
        .ops()
        .iter()
        .filter_map(|op| match op {
            FakeOp::WaitUntil(v) => Some(*v),
            _ => None,
        })
        .collect();
    assert_eq!(waits, vec![1, 2]);
}

#[test]
fn resize_flushes_before_releasing_any_target() {
    let device = Arc::new(FakeGpu::new(3, 1280, 720).with_completion_on_wait());
    let (mut renderer, stats) = renderer_over(&device, FrameConfig::default());

    renderer.render_frame().unwrap();
    device.take_ops();

    renderer.resize(800, 600).unwrap();
    let ops = device.ops();

    let flush_signal = position_of(&ops, &FakeOp::Signal(2));
    let flush_wait = position_of(&ops, &FakeOp::WaitUntil(2));
    let release = position_of(&ops, &FakeOp::ReleaseTargets);
    let resize = position_of(
        &ops,
        &FakeOp::ResizeTargets {
            width: 800,
            height: 600,
        },
    );
    let recreate = position_of(&ops, &FakeOp::RecreateTargets);

    assert!(flush_signal < flush_wait);
    assert!(flush_wait < release, "targets released before the flush");
    assert!(release < resize);
    assert!(resize < recreate);

    // The content is told after the transition completes.
    assert_eq!(stats.lock().unwrap().resizes, vec![(800, 600)]);
}

#[test]
fn resize_to_current_dimensions_is_a_noop() {
    let device = Arc::new(FakeGpu::new(3, 1280, 720));
    let (mut renderer, stats) = renderer_over(&device, FrameConfig::default());
    device.take_ops();

    renderer.resize(1280, 720).unwrap();

    assert!(device.ops().is_empty(), "no-op resize touched the device");
    assert!(stats.lock().unwrap().resizes.is_empty());
    assert_eq!(renderer.client_size(), (1280, 720));
}

#[test]
fn zero_sized_resize_clamps_to_one_by_one() {
    let device = Arc::new(FakeGpu::new(3, 1280, 720).with_completion_on_wait());
    let (mut renderer, stats) = renderer_over(&device, FrameConfig::default());

    renderer.resize(0, 0).unwrap();

    assert!(device.ops().contains(&FakeOp::ResizeTargets {
        width: 1,
        height: 1
    }));
    assert_eq!(renderer.client_size(), (1, 1));
    assert_eq!(stats.lock().unwrap().resizes, vec![(1, 1)]);
}

#[test]
fn tearing_flag_is_never_presented_with_vsync_on() {
    for supported in [false, true] {
        for override_tearing in [None, Some(true), Some(false)] {
            let device = Arc::new(FakeGpu::new(2, 640, 480).with_tearing_support(supported));
            let config = FrameConfig {
                vsync: true,
                allow_tearing: override_tearing,
                ..FrameConfig::default()
            };
            let (mut renderer, _stats) = renderer_over(&device, config);

            renderer.render_frame().unwrap();

            let presented_tearing = device.ops().iter().any(|op| {
                matches!(
                    op,
                    FakeOp::Present {
                        allow_tearing: true,
                        ..
                    }
                )
            });
            assert!(
                !presented_tearing,
                "tearing presented with vsync on (support={supported}, override={override_tearing:?})"
            );
        }
    }
}

#[test]
fn tearing_requires_support_and_vsync_off() {
    let device = Arc::new(FakeGpu::new(2, 640, 480).with_tearing_support(true));
    let config = FrameConfig {
        vsync: false,
        ..FrameConfig::default()
    };
    let (mut renderer, _stats) = renderer_over(&device, config);

    renderer.render_frame().unwrap();
    assert!(device.ops().iter().any(|op| matches!(
        op,
        FakeOp::Present {
            vsync: false,
            allow_tearing: true
        }
    )));

    // Same settings on a device without tearing support: flag forced off.
    let device = Arc::new(FakeGpu::new(2, 640, 480).with_tearing_support(false));
    let (mut renderer, _stats) = renderer_over(&device, config);

    renderer.render_frame().unwrap();
    assert!(device.ops().iter().all(|op| !matches!(
        op,
        FakeOp::Present {
            allow_tearing: true,
            ..
        }
    )));
}

#[test]
fn content_lifecycle_loads_once_and_unloads_on_shutdown() {
    let device = Arc::new(FakeGpu::new(2, 640, 480));
    let (mut renderer, stats) = renderer_over(&device, FrameConfig::default());

    assert_eq!(stats.lock().unwrap().loads, 1);

    renderer.render_frame().unwrap();
    renderer.render_frame().unwrap();
    assert_eq!(stats.lock().unwrap().updates, 2);
    assert_eq!(stats.lock().unwrap().renders, 2);

    renderer.shutdown().unwrap();
    assert_eq!(stats.lock().unwrap().unloads, 1);

    // Shutdown is idempotent and drop does not unload twice.
    renderer.shutdown().unwrap();
    drop(renderer);
    assert_eq!(stats.lock().unwrap().unloads, 1);
}

#[test]
fn replacing_content_unloads_the_previous_provider() {
    let device = Arc::new(FakeGpu::new(2, 640, 480));
    let (mut renderer, first_stats) = renderer_over(&device, FrameConfig::default());

    let (second, second_stats) = ClearScene::new();
    renderer.set_content(Box::new(second)).unwrap();

    assert_eq!(first_stats.lock().unwrap().unloads, 1);
    assert_eq!(second_stats.lock().unwrap().loads, 1);
}

#[test]
fn rendering_without_content_touches_nothing() {
    let device = Arc::new(FakeGpu::new(2, 640, 480));
    let mut renderer = Renderer::new(device.clone(), FrameConfig::default()).unwrap();

    renderer.render_frame().unwrap();
    assert!(device.ops().is_empty());
}
