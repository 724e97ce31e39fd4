//! Window management using winit.
//!
//! Provides window creation, the fullscreen toggle, and Vulkan surface
//! creation. Fullscreen uses a borderless window over the nearest display;
//! the windowed position and size are captured on entry and restored exactly
//! on exit.

use std::sync::Arc;

use ash::vk;
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event_loop::ActiveEventLoop;
use winit::window::{Fullscreen, Window as WinitWindow, WindowAttributes};

use kiln_core::{Error, Result};

/// Windowed-mode geometry captured across a fullscreen toggle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SavedGeometry {
    /// Outer position of the window, in physical pixels.
    pub position: PhysicalPosition<i32>,
    /// Inner (client-area) size, in physical pixels.
    pub size: PhysicalSize<u32>,
}

/// Pure fullscreen state machine: tracks whether the window is fullscreen
/// and what geometry to restore on exit.
///
/// Kept separate from the winit calls so the capture/restore contract is
/// testable without a display.
#[derive(Debug, Default)]
struct FullscreenState {
    fullscreen: bool,
    saved: Option<SavedGeometry>,
}

impl FullscreenState {
    /// Enter fullscreen, capturing the geometry to restore later.
    ///
    /// A second enter without an intervening leave keeps the original
    /// capture; the window is no longer in a windowed state worth saving.
    fn enter(&mut self, current: SavedGeometry) {
        if !self.fullscreen {
            self.saved = Some(current);
            self.fullscreen = true;
        }
    }

    /// Leave fullscreen, yielding the geometry captured on entry.
    fn leave(&mut self) -> Option<SavedGeometry> {
        if self.fullscreen {
            self.fullscreen = false;
            self.saved.take()
        } else {
            None
        }
    }

    fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }
}

/// RAII wrapper for a Vulkan surface.
///
/// Owns a `vk::SurfaceKHR` handle and destroys it on drop. The Vulkan
/// instance the surface was created from must outlive this value.
pub struct Surface {
    handle: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
}

impl Surface {
    /// The raw Vulkan surface handle.
    ///
    /// Valid only as long as this `Surface` exists.
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Gives up ownership of the surface handle without destroying it.
    ///
    /// Used to hand the surface to a device backend that sequences its
    /// destruction between the swapchain and the instance.
    pub fn into_raw(self) -> vk::SurfaceKHR {
        let handle = self.handle;
        std::mem::forget(self);
        handle
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: the handle was created by ash_window::create_surface from
        // the same instance the loader wraps, and this is the only place it
        // is destroyed.
        unsafe {
            self.surface_loader.destroy_surface(self.handle, None);
        }
        tracing::debug!("Vulkan surface destroyed");
    }
}

/// A window wrapper providing raw handles for Vulkan surface creation and
/// the fullscreen toggle.
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
    fullscreen: FullscreenState,
}

impl Window {
    /// Create a new resizable window with the given dimensions and title.
    pub fn new(event_loop: &ActiveEventLoop, width: u32, height: u32, title: &str) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        tracing::info!("Window created: {}x{}", width, height);

        Ok(Self {
            window: Arc::new(window),
            width,
            height,
            fullscreen: FullscreenState::default(),
        })
    }

    /// A reference to the underlying winit window.
    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    /// Current client-area size in pixels.
    pub fn client_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Update the stored dimensions (call when handling resize events).
    pub fn on_resized(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        tracing::debug!("Window resized: {}x{}", width, height);
    }

    /// Whether the window is currently fullscreen.
    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen.is_fullscreen()
    }

    /// Switch between borderless fullscreen and windowed mode.
    ///
    /// Entering captures the current outer position and inner size and goes
    /// borderless on the window's current display. Leaving restores the
    /// captured geometry exactly. The resulting client-area resize arrives
    /// through the normal resize event.
    pub fn set_fullscreen(&mut self, fullscreen: bool) {
        if fullscreen == self.fullscreen.is_fullscreen() {
            return;
        }

        if fullscreen {
            let position = self
                .window
                .outer_position()
                .unwrap_or_else(|_| PhysicalPosition::new(0, 0));
            let size = self.window.inner_size();
            self.fullscreen.enter(SavedGeometry { position, size });

            // Borderless over the current display; None picks the display
            // the window is on.
            self.window
                .set_fullscreen(Some(Fullscreen::Borderless(None)));
            tracing::info!("Entered fullscreen");
        } else {
            self.window.set_fullscreen(None);
            if let Some(saved) = self.fullscreen.leave() {
                self.window.set_outer_position(saved.position);
                let _ = self.window.request_inner_size(saved.size);
                tracing::info!(
                    "Left fullscreen, restored {}x{} at ({}, {})",
                    saved.size.width,
                    saved.size.height,
                    saved.position.x,
                    saved.position.y
                );
            }
        }
    }

    /// Flip the fullscreen state.
    pub fn toggle_fullscreen(&mut self) {
        self.set_fullscreen(!self.is_fullscreen());
    }

    /// Request a redraw of the window.
    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Create a Vulkan surface for this window.
    ///
    /// Returns a RAII [`Surface`] that destroys itself on drop; `instance`
    /// must outlive it.
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

        let display_handle = self
            .window
            .display_handle()
            .map_err(|e| Error::Window(format!("Failed to get display handle: {e}")))?;
        let window_handle = self
            .window
            .window_handle()
            .map_err(|e| Error::Window(format!("Failed to get window handle: {e}")))?;

        // SAFETY: the handles come from a live winit window; entry and
        // instance are valid for the duration of the call. The surface is
        // destroyed in Surface::drop.
        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| Error::Graphics(format!("Failed to create Vulkan surface: {e}")))?
        };

        let surface_loader = ash::khr::surface::Instance::new(entry, instance);

        tracing::info!("Vulkan surface created");

        Ok(Surface {
            handle,
            surface_loader,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(x: i32, y: i32, w: u32, h: u32) -> SavedGeometry {
        SavedGeometry {
            position: PhysicalPosition::new(x, y),
            size: PhysicalSize::new(w, h),
        }
    }

    #[test]
    fn fullscreen_round_trip_restores_exact_geometry() {
        let mut state = FullscreenState::default();
        let windowed = geometry(120, 80, 1280, 720);

        state.enter(windowed);
        assert!(state.is_fullscreen());

        let restored = state.leave();
        assert!(!state.is_fullscreen());
        assert_eq!(restored, Some(windowed));
    }

    #[test]
    fn leaving_windowed_mode_restores_nothing() {
        let mut state = FullscreenState::default();
        assert_eq!(state.leave(), None);
    }

    #[test]
    fn double_enter_keeps_the_original_capture() {
        let mut state = FullscreenState::default();
        state.enter(geometry(10, 20, 800, 600));
        // A second capture while fullscreen would save fullscreen geometry.
        state.enter(geometry(0, 0, 2560, 1440));

        assert_eq!(state.leave(), Some(geometry(10, 20, 800, 600)));
    }

    #[test]
    fn capture_is_consumed_by_leave() {
        let mut state = FullscreenState::default();
        state.enter(geometry(1, 2, 3, 4));
        state.leave();
        state.enter(geometry(5, 6, 7, 8));

        assert_eq!(state.leave(), Some(geometry(5, 6, 7, 8)));
    }
}
