//! Swapchain management.
//!
//! Handles VkSwapchainKHR creation, image acquisition, presentation, and the
//! staged release/resize/recreate cycle the frame engine drives when the
//! client area changes:
//!
//! ```text
//! destroy_views -> resize_storage -> create_views
//! ```
//!
//! The stages are separate operations because the engine flushes the GPU
//! between giving up the old images and building the new ones, and tests
//! verify that ordering.

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::GpuError;
use crate::instance::Instance;

/// Presentation settings the swapchain is created with.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainConfig {
    /// Requested number of back buffers (the surface may impose its own
    /// bounds).
    pub buffer_count: u32,
    /// Whether presentation waits for vertical sync.
    pub vsync: bool,
    /// Whether tearing presentation modes may be chosen when vsync is off.
    pub allow_tearing: bool,
}

/// Swapchain surface support details.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    /// Surface capabilities (min/max image count, extents, transforms)
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support for a physical device and surface.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> Result<Self, GpuError> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            capabilities.max_image_count
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// True if at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }

    /// Whether a tearing present mode is available on this surface.
    #[inline]
    pub fn supports_tearing(&self) -> bool {
        self.present_modes.contains(&vk::PresentModeKHR::IMMEDIATE)
    }
}

/// Vulkan swapchain wrapper.
///
/// Owns the swapchain handle and the image views over its images. Not
/// thread-safe; the owning backend serializes access.
pub struct Swapchain {
    /// Logical device functions (cloned handle, cheap to keep).
    device: ash::Device,
    /// Swapchain extension loader
    swapchain_loader: ash::khr::swapchain::Device,
    /// Swapchain handle
    swapchain: vk::SwapchainKHR,
    /// Swapchain images (owned by the swapchain)
    images: Vec<vk::Image>,
    /// Image views for the swapchain images
    image_views: Vec<vk::ImageView>,
    /// Swapchain image format
    format: vk::Format,
    /// Swapchain extent (resolution)
    extent: vk::Extent2D,
    /// Present mode the swapchain was created with
    present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Creates a new swapchain with image views.
    ///
    /// # Errors
    ///
    /// Returns an error if surface queries fail, support is inadequate, or
    /// swapchain/view creation fails.
    pub fn new(
        instance: &Instance,
        device: &Device,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        config: &SwapchainConfig,
    ) -> Result<Self, GpuError> {
        let mut swapchain = Self::create_storage(
            instance,
            device,
            surface,
            width,
            height,
            config,
            vk::SwapchainKHR::null(),
        )?;
        swapchain.create_views()?;
        Ok(swapchain)
    }

    /// Creates the swapchain and queries its images, without image views.
    fn create_storage(
        instance: &Instance,
        device: &Device,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        config: &SwapchainConfig,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<Self, GpuError> {
        let swapchain_loader =
            ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        let support =
            SwapchainSupportDetails::query(device.physical_device(), surface, &surface_loader)?;
        if !support.is_adequate() {
            return Err(GpuError::Swapchain(
                "Inadequate swapchain support (no formats or present modes)".to_string(),
            ));
        }

        let surface_format = choose_surface_format(&support.formats);
        let present_mode = choose_present_mode(
            &support.present_modes,
            config.vsync,
            config.allow_tearing && support.supports_tearing(),
        );
        let extent = choose_extent(&support.capabilities, width, height);
        let image_count = determine_image_count(&support.capabilities, config.buffer_count);

        info!(
            "Creating swapchain: {}x{}, format {:?}, present mode {:?}, {} images",
            extent.width, extent.height, surface_format.format, present_mode, image_count
        );

        let queue_families = device.queue_families();
        let graphics_family = queue_families.graphics_family.ok_or(GpuError::NoSuitableGpu)?;
        let present_family = queue_families.present_family.ok_or(GpuError::NoSuitableGpu)?;
        let family_indices = [graphics_family, present_family];

        let (sharing_mode, family_indices_slice) = if graphics_family != present_family {
            (vk::SharingMode::CONCURRENT, family_indices.as_slice())
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(family_indices_slice)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None)? };
        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain)? };
        info!("Swapchain created with {} images", images.len());

        Ok(Self {
            device: device.handle().clone(),
            swapchain_loader,
            swapchain,
            images,
            image_views: Vec::new(),
            format: surface_format.format,
            extent,
            present_mode,
        })
    }

    /// Recreates the swapchain storage for new dimensions or a new present
    /// mode.
    ///
    /// Image views must have been destroyed first (`destroy_views`) and the
    /// GPU drained of all work referencing the old images.
    pub fn resize_storage(
        &mut self,
        instance: &Instance,
        device: &Device,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        config: &SwapchainConfig,
    ) -> Result<(), GpuError> {
        let old_swapchain = self.swapchain;
        let mut replacement = Self::create_storage(
            instance,
            device,
            surface,
            width,
            height,
            config,
            old_swapchain,
        )?;

        unsafe {
            self.swapchain_loader.destroy_swapchain(old_swapchain, None);
        }

        self.swapchain = replacement.swapchain;
        self.images = std::mem::take(&mut replacement.images);
        self.format = replacement.format;
        self.extent = replacement.extent;
        self.present_mode = replacement.present_mode;

        // Null out the replacement's handle so its Drop does not double-free.
        replacement.swapchain = vk::SwapchainKHR::null();

        Ok(())
    }

    /// Creates image views for all swapchain images.
    pub fn create_views(&mut self) -> Result<(), GpuError> {
        debug_assert!(self.image_views.is_empty());

        let mut image_views = Vec::with_capacity(self.images.len());
        for (i, &image) in self.images.iter().enumerate() {
            let create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                );

            let image_view = unsafe {
                self.device
                    .create_image_view(&create_info, None)
                    .map_err(|e| {
                        GpuError::Swapchain(format!("Failed to create image view {i}: {e:?}"))
                    })?
            };
            image_views.push(image_view);
        }

        debug!("Created {} image views", image_views.len());
        self.image_views = image_views;
        Ok(())
    }

    /// Destroys all image views.
    pub fn destroy_views(&mut self) {
        for &image_view in &self.image_views {
            unsafe {
                self.device.destroy_image_view(image_view, None);
            }
        }
        self.image_views.clear();
    }

    /// Acquires the next swapchain image, signaling `fence` when ready.
    ///
    /// Returns `(image_index, suboptimal)`.
    pub fn acquire_next_image_with_fence(
        &self,
        fence: vk::Fence,
        timeout: u64,
    ) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout,
                vk::Semaphore::null(),
                fence,
            )
        }
    }

    /// Presents `image_index`, waiting on `wait_semaphores` first.
    ///
    /// Returns true if the swapchain is suboptimal and should be recreated.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool, vk::Result> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
    }

    /// Returns the swapchain image format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Returns the swapchain extent (resolution).
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Returns the present mode the swapchain was created with.
    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Returns the number of swapchain images.
    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Returns the swapchain image at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn image(&self, index: usize) -> vk::Image {
        self.images[index]
    }

    /// Returns the image view at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn image_view(&self, index: usize) -> vk::ImageView {
        self.image_views[index]
    }
}

impl Swapchain {
    /// Destroys the swapchain and its views immediately.
    ///
    /// Drop becomes a no-op afterwards. Owners use this to sequence the
    /// swapchain's destruction before the surface it presents to.
    pub fn destroy(&mut self) {
        self.destroy_views();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.swapchain_loader
                    .destroy_swapchain(self.swapchain, None);
            }
            self.swapchain = vk::SwapchainKHR::null();
            info!(
                "Swapchain destroyed (was {}x{}, {} images)",
                self.extent.width,
                self.extent.height,
                self.images.len()
            );
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Chooses the best surface format, preferring B8G8R8A8_SRGB.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    let preferred = formats.iter().find(|f| {
        f.format == vk::Format::B8G8R8A8_SRGB && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    });

    if let Some(&format) = preferred {
        return format;
    }

    warn!(
        "Preferred surface format unavailable, using {:?}",
        formats[0].format
    );
    formats[0]
}

/// Chooses the present mode matching the requested vsync/tearing policy.
///
/// - vsync on: FIFO (every Vulkan surface supports it)
/// - vsync off, tearing allowed: IMMEDIATE, falling back to MAILBOX
/// - vsync off, no tearing: MAILBOX, falling back to FIFO
fn choose_present_mode(
    present_modes: &[vk::PresentModeKHR],
    vsync: bool,
    allow_tearing: bool,
) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }

    if allow_tearing && present_modes.contains(&vk::PresentModeKHR::IMMEDIATE) {
        debug!("Selected IMMEDIATE present mode (tearing)");
        return vk::PresentModeKHR::IMMEDIATE;
    }

    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        debug!("Selected MAILBOX present mode");
        return vk::PresentModeKHR::MAILBOX;
    }

    debug!("Selected FIFO present mode (fallback)");
    vk::PresentModeKHR::FIFO
}

/// Chooses the swapchain extent, honoring the surface's fixed extent when it
/// has one and clamping the request to its limits otherwise.
fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// Clamps the requested back-buffer count to what the surface allows.
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, requested: u32) -> u32 {
    let mut count = requested.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count = count.min(capabilities.max_image_count);
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_format_prefers_srgb() {
        let formats = vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];

        let selected = choose_surface_format(&formats);
        assert_eq!(selected.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn vsync_always_selects_fifo() {
        let modes = vec![
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
        ];

        assert_eq!(
            choose_present_mode(&modes, true, true),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn tearing_selects_immediate_when_available() {
        let modes = vec![vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO];
        assert_eq!(
            choose_present_mode(&modes, false, true),
            vk::PresentModeKHR::IMMEDIATE
        );

        // Without tearing permission, IMMEDIATE must not be chosen.
        assert_eq!(
            choose_present_mode(&modes, false, false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_clamps_to_surface_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 3000, 50);
        assert_eq!(extent.width, 2000);
        assert_eq!(extent.height, 100);
    }

    #[test]
    fn image_count_respects_surface_bounds() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capabilities, 4), 3);
        assert_eq!(determine_image_count(&capabilities, 1), 2);

        let unbounded = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&unbounded, 4), 4);
    }
}
