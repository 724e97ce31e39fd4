//! kiln demo application.
//!
//! Drives the frame engine over a real window: creates the Vulkan backend on
//! resume, renders the demo scene every redraw, and maps a few keys onto the
//! engine's toggles (`V` vsync, `F11` fullscreen, `Escape` quit).

mod demo;

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::WindowId;

use kiln_gpu::{SwapchainConfig, VulkanGpu};
use kiln_platform::Window;
use kiln_renderer::{FrameConfig, Renderer};

use demo::PulseScene;

const INITIAL_WIDTH: u32 = 1280;
const INITIAL_HEIGHT: u32 = 720;

/// Everything that depends on the GPU.
///
/// Field order is teardown order: the renderer drains the queue and releases
/// its device references, then the last backend reference tears down the
/// swapchain, surface, device, and instance in sequence.
struct RenderState {
    renderer: Renderer<VulkanGpu>,
    _gpu: Arc<VulkanGpu>,
}

struct App {
    // GPU state before the window: the surface must die before the window
    // it was created from.
    state: Option<RenderState>,
    window: Option<Window>,
}

impl App {
    fn new() -> Self {
        Self {
            state: None,
            window: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = Window::new(event_loop, INITIAL_WIDTH, INITIAL_HEIGHT, "kiln")?;

        let config = FrameConfig::default();
        let instance = kiln_gpu::instance::Instance::new(cfg!(debug_assertions))?;
        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let (width, height) = window.client_size();
        let gpu = VulkanGpu::new(
            instance,
            surface.into_raw(),
            width,
            height,
            SwapchainConfig {
                buffer_count: config.buffer_count(),
                vsync: config.vsync,
                allow_tearing: config.allow_tearing.unwrap_or(true),
            },
        )?;

        let mut renderer = Renderer::new(gpu.clone(), config)?;
        renderer.set_content(Box::new(PulseScene::new()))?;

        info!("Initialization complete, entering main loop");
        self.state = Some(RenderState {
            renderer,
            _gpu: gpu,
        });
        self.window = Some(window);
        Ok(())
    }

    fn on_key(&mut self, event_loop: &ActiveEventLoop, key: KeyCode) {
        match key {
            KeyCode::KeyV => {
                if let Some(state) = self.state.as_mut() {
                    state.renderer.toggle_vsync();
                }
            }
            KeyCode::F11 => {
                if let Some(window) = self.window.as_mut() {
                    window.toggle_fullscreen();
                }
            }
            KeyCode::Escape => {
                info!("Escape pressed, shutting down");
                event_loop.exit();
            }
            _ => {}
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none()
            && let Err(e) = self.init(event_loop)
        {
            error!("Failed to initialize: {e:?}");
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(window) = self.window.as_mut() {
                    window.on_resized(size.width, size.height);
                }
                if let Some(state) = self.state.as_mut()
                    && let Err(e) = state.renderer.resize(size.width, size.height)
                {
                    // Device failures here are unrecoverable; stop the loop.
                    error!("Resize failed: {e}");
                    event_loop.exit();
                }
            }
            WindowEvent::RedrawRequested => {
                if let Some(state) = self.state.as_mut()
                    && let Err(e) = state.renderer.render_frame()
                {
                    error!("Render error: {e}");
                    event_loop.exit();
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed()
                    && !event.repeat
                    && let PhysicalKey::Code(key) = event.physical_key
                {
                    self.on_key(event_loop, key);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    kiln_core::init_logging();
    info!("Starting kiln");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new();
    event_loop.run_app(&mut app)?;

    Ok(())
}
