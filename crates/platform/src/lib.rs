//! Platform layer for the kiln frame engine.
//!
//! This crate provides the windowing side of the engine:
//! - Window management via winit
//! - Fullscreen toggling with windowed-geometry restore
//! - Vulkan surface creation from the window's raw handles

mod window;

pub use window::{SavedGeometry, Surface, Window};

// Re-export winit types that users might need
pub use winit::event::WindowEvent;
pub use winit::event_loop::EventLoop;
