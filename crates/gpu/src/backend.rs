//! Vulkan implementation of the [`GpuDevice`] capability trait.
//!
//! Maps the engine's completion-counter model onto a Vulkan timeline
//! semaphore: `signal(n)` is an empty queue submission whose timeline signal
//! executes after everything submitted before it, `completed_value` reads the
//! semaphore counter, and `wait_until` blocks in `vkWaitSemaphores`.
//!
//! Recording contexts are one command pool + one primary command buffer each;
//! resetting a context resets its whole pool, which is the allocator-reuse
//! point the engine gates on the completion counter.
//!
//! Presentation follows the swapchain-reports-the-index model: images are
//! acquired with a fence and waited for immediately, so `current_slot` always
//! names an image the presentation engine has handed back. A small ring of
//! binary semaphores gates each present behind the submissions that preceded
//! it in queue order.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::{Device, select_physical_device};
use crate::error::{GpuError, GpuResult};
use crate::instance::Instance;
use crate::interface::{GpuDevice, RecordingId, SlotIndex, TargetTransition};
use crate::swapchain::{Swapchain, SwapchainConfig, SwapchainSupportDetails};

/// One allocator + command list pair.
struct RecordingSlot {
    pool: vk::CommandPool,
    buffer: vk::CommandBuffer,
}

/// Mutable backend state behind one lock.
///
/// The queue requires external synchronization, so every operation that
/// touches it goes through this lock as well.
struct Inner {
    swapchain: Swapchain,
    recordings: Vec<RecordingSlot>,
    /// Fence signaled by image acquisition, waited immediately.
    acquire_fence: vk::Fence,
    /// Binary semaphores gating presents behind prior submissions.
    present_gates: Vec<vk::Semaphore>,
    next_gate: usize,
    /// Image index handed out by the swapchain for the frame in progress.
    acquired: Option<u32>,
    /// Presentation settings the swapchain was created with.
    config: SwapchainConfig,
    /// Set when the requested present mode no longer matches the swapchain;
    /// healed before the next acquire.
    stale: bool,
}

/// Vulkan-backed graphics device.
pub struct VulkanGpu {
    // Teardown order matters: the explicit Drop impl destroys the backend's
    // raw objects, the swapchain, and the surface; the remaining fields then
    // drop in declaration order (device before instance).
    inner: Mutex<Inner>,
    /// Timeline semaphore carrying the completion counter.
    timeline: vk::Semaphore,
    device: Device,
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    instance: Instance,
    tearing_supported: bool,
}

impl VulkanGpu {
    /// Creates the backend over an existing instance and surface.
    ///
    /// Takes ownership of both: the surface is destroyed by this backend on
    /// teardown, and also on a failed construction, so the caller must not
    /// destroy it again.
    ///
    /// # Errors
    ///
    /// Returns an error if no suitable GPU exists or any Vulkan object
    /// creation fails.
    pub fn new(
        instance: Instance,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        config: SwapchainConfig,
    ) -> GpuResult<Arc<Self>> {
        let surface_loader =
            ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        match Self::build(&instance, &surface_loader, surface, width, height, &config) {
            Ok((device, swapchain, timeline, acquire_fence, present_gates, tearing_supported)) => {
                Ok(Arc::new(Self {
                    inner: Mutex::new(Inner {
                        swapchain,
                        recordings: Vec::new(),
                        acquire_fence,
                        present_gates,
                        next_gate: 0,
                        acquired: None,
                        config,
                        stale: false,
                    }),
                    timeline,
                    device,
                    surface_loader,
                    surface,
                    instance,
                    tearing_supported,
                }))
            }
            Err(e) => {
                // The swapchain (if any) was already dropped inside build;
                // the surface goes next, while the instance is still alive.
                unsafe { surface_loader.destroy_surface(surface, None) };
                Err(e)
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn build(
        instance: &Instance,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        config: &SwapchainConfig,
    ) -> GpuResult<(Device, Swapchain, vk::Semaphore, vk::Fence, Vec<vk::Semaphore>, bool)> {
        let physical = select_physical_device(instance.handle(), surface, surface_loader)?;

        let tearing_supported =
            SwapchainSupportDetails::query(physical.device, surface, surface_loader)?
                .supports_tearing();
        if config.allow_tearing && !tearing_supported {
            warn!("Tearing requested but the surface offers no tearing present mode");
        }

        let device = Device::new(instance, &physical)?;
        let swapchain = Swapchain::new(instance, &device, surface, width, height, config)?;

        let timeline = create_timeline_semaphore(device.handle())?;
        let acquire_fence = unsafe {
            device
                .handle()
                .create_fence(&vk::FenceCreateInfo::default(), None)?
        };
        let present_gates = create_present_gates(device.handle(), swapchain.image_count())?;

        info!(
            "Vulkan backend ready: {} back buffers, tearing {}",
            swapchain.image_count(),
            if tearing_supported {
                "supported"
            } else {
                "unsupported"
            }
        );

        Ok((
            device,
            swapchain,
            timeline,
            acquire_fence,
            present_gates,
            tearing_supported,
        ))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("Vulkan backend state poisoned")
    }

    fn recording<'a>(
        &self,
        inner: &'a Inner,
        id: RecordingId,
    ) -> GpuResult<&'a RecordingSlot> {
        inner
            .recordings
            .get(id.0 as usize)
            .ok_or_else(|| GpuError::InvalidHandle(format!("{id:?}")))
    }

    /// Rebuilds the swapchain in place for the current config and size.
    ///
    /// Used when the presentation engine reports the images unusable or the
    /// requested present mode changed. Drains the device first; nothing can
    /// reference the old images afterwards.
    fn heal_swapchain(&self, inner: &mut Inner) -> GpuResult<()> {
        self.device.wait_idle()?;

        let extent = inner.swapchain.extent();
        inner.swapchain.destroy_views();
        inner.swapchain.resize_storage(
            &self.instance,
            &self.device,
            self.surface,
            extent.width,
            extent.height,
            &inner.config,
        )?;
        inner.swapchain.create_views()?;
        self.rebuild_present_gates(inner)?;
        inner.acquired = None;
        inner.stale = false;

        debug!("Swapchain rebuilt in place ({}x{})", extent.width, extent.height);
        Ok(())
    }

    fn rebuild_present_gates(&self, inner: &mut Inner) -> GpuResult<()> {
        for &gate in &inner.present_gates {
            unsafe { self.device.handle().destroy_semaphore(gate, None) };
        }
        inner.present_gates =
            create_present_gates(self.device.handle(), inner.swapchain.image_count())?;
        inner.next_gate = 0;
        Ok(())
    }

    fn acquire_image(&self, inner: &mut Inner) -> GpuResult<u32> {
        if inner.stale {
            self.heal_swapchain(inner)?;
        }

        loop {
            match inner
                .swapchain
                .acquire_next_image_with_fence(inner.acquire_fence, u64::MAX)
            {
                Ok((index, suboptimal)) => {
                    let fences = [inner.acquire_fence];
                    unsafe {
                        self.device
                            .handle()
                            .wait_for_fences(&fences, true, u64::MAX)
                            .map_err(map_device_error)?;
                        self.device
                            .handle()
                            .reset_fences(&fences)
                            .map_err(map_device_error)?;
                    }
                    if suboptimal {
                        inner.stale = true;
                    }
                    return Ok(index);
                }
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    debug!("Swapchain out of date during acquire, rebuilding");
                    self.heal_swapchain(inner)?;
                }
                Err(e) => return Err(map_device_error(e)),
            }
        }
    }
}

impl GpuDevice for VulkanGpu {
    fn create_recording(&self) -> GpuResult<RecordingId> {
        let mut inner = self.lock();

        let graphics_family = self
            .device
            .queue_families()
            .graphics_family
            .ok_or(GpuError::NoSuitableGpu)?;
        let pool_info =
            vk::CommandPoolCreateInfo::default().queue_family_index(graphics_family);
        let pool = unsafe { self.device.handle().create_command_pool(&pool_info, None)? };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffer = unsafe { self.device.handle().allocate_command_buffers(&alloc_info)?[0] };

        let id = RecordingId(inner.recordings.len() as u64);
        inner.recordings.push(RecordingSlot { pool, buffer });
        debug!("Created recording context {:?}", id);
        Ok(id)
    }

    fn reset_recording(&self, id: RecordingId) -> GpuResult<()> {
        let inner = self.lock();
        let slot = self.recording(&inner, id)?;

        unsafe {
            self.device
                .handle()
                .reset_command_pool(slot.pool, vk::CommandPoolResetFlags::empty())
                .map_err(map_device_error)?;

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device
                .handle()
                .begin_command_buffer(slot.buffer, &begin_info)
                .map_err(map_device_error)?;
        }
        Ok(())
    }

    fn submit(&self, id: RecordingId) -> GpuResult<()> {
        let inner = self.lock();
        let slot = self.recording(&inner, id)?;

        unsafe {
            self.device
                .handle()
                .end_command_buffer(slot.buffer)
                .map_err(map_device_error)?;

            let buffers = [slot.buffer];
            let submit_info = vk::SubmitInfo::default().command_buffers(&buffers);
            self.device
                .handle()
                .queue_submit(
                    self.device.graphics_queue(),
                    &[submit_info],
                    vk::Fence::null(),
                )
                .map_err(map_device_error)?;
        }
        Ok(())
    }

    fn signal(&self, value: u64) -> GpuResult<()> {
        // Empty submission: the timeline signal executes once everything
        // earlier in submission order has completed.
        let _inner = self.lock();

        let values = [value];
        let semaphores = [self.timeline];
        let mut timeline_info =
            vk::TimelineSemaphoreSubmitInfo::default().signal_semaphore_values(&values);
        let submit_info = vk::SubmitInfo::default()
            .signal_semaphores(&semaphores)
            .push_next(&mut timeline_info);

        unsafe {
            self.device
                .handle()
                .queue_submit(
                    self.device.graphics_queue(),
                    &[submit_info],
                    vk::Fence::null(),
                )
                .map_err(map_device_error)?;
        }
        Ok(())
    }

    fn completed_value(&self) -> GpuResult<u64> {
        let value = unsafe {
            self.device
                .handle()
                .get_semaphore_counter_value(self.timeline)
                .map_err(map_device_error)?
        };
        Ok(value)
    }

    fn wait_until(&self, value: u64, timeout: Duration) -> GpuResult<()> {
        let semaphores = [self.timeline];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);

        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe { self.device.handle().wait_semaphores(&wait_info, timeout_ns) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(GpuError::WaitTimeout(timeout)),
            Err(e) => Err(map_device_error(e)),
        }
    }

    fn slot_count(&self) -> u32 {
        self.lock().swapchain.image_count()
    }

    fn current_slot(&self) -> GpuResult<SlotIndex> {
        let mut inner = self.lock();
        if let Some(index) = inner.acquired {
            return Ok(SlotIndex(index));
        }

        let index = self.acquire_image(&mut inner)?;
        inner.acquired = Some(index);
        Ok(SlotIndex(index))
    }

    fn target_size(&self) -> (u32, u32) {
        let extent = self.lock().swapchain.extent();
        (extent.width, extent.height)
    }

    fn release_targets(&self) -> GpuResult<()> {
        let mut inner = self.lock();
        inner.swapchain.destroy_views();
        inner.acquired = None;
        Ok(())
    }

    fn resize_targets(&self, width: u32, height: u32) -> GpuResult<()> {
        let mut inner = self.lock();
        let config = inner.config;
        inner.swapchain.resize_storage(
            &self.instance,
            &self.device,
            self.surface,
            width,
            height,
            &config,
        )?;
        inner.stale = false;
        Ok(())
    }

    fn recreate_targets(&self) -> GpuResult<()> {
        let mut inner = self.lock();
        inner.swapchain.create_views()?;
        self.rebuild_present_gates(&mut inner)?;
        inner.acquired = None;
        Ok(())
    }

    fn present(&self, vsync: bool, allow_tearing: bool) -> GpuResult<()> {
        let mut inner = self.lock();

        let image_index = inner
            .acquired
            .take()
            .ok_or_else(|| GpuError::Swapchain("present without an acquired image".to_string()))?;

        // Present mode is baked into the swapchain; note a mismatch and
        // rebuild before the next acquire.
        if vsync != inner.config.vsync || allow_tearing != inner.config.allow_tearing {
            inner.config.vsync = vsync;
            inner.config.allow_tearing = allow_tearing;
            inner.stale = true;
        }

        // Gate the present behind all prior submissions: an empty submission
        // whose binary signal executes after everything earlier in queue
        // order.
        let gate = inner.present_gates[inner.next_gate];
        inner.next_gate = (inner.next_gate + 1) % inner.present_gates.len();

        let gates = [gate];
        let submit_info = vk::SubmitInfo::default().signal_semaphores(&gates);
        unsafe {
            self.device
                .handle()
                .queue_submit(
                    self.device.graphics_queue(),
                    &[submit_info],
                    vk::Fence::null(),
                )
                .map_err(map_device_error)?;
        }

        match inner
            .swapchain
            .present(self.device.present_queue(), image_index, &gates)
        {
            Ok(suboptimal) => {
                if suboptimal {
                    inner.stale = true;
                }
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("Swapchain out of date during present");
                inner.stale = true;
                Ok(())
            }
            Err(e) => Err(map_device_error(e)),
        }
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
        let inner = self.lock();
        let buffer = self.recording(&inner, recording)?.buffer;
        let image = inner.swapchain.image(slot.as_usize());

        let (old_layout, new_layout, src_access, dst_access, src_stage, dst_stage) =
            match transition {
                TargetTransition::AcquireRenderTarget => (
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    vk::AccessFlags::empty(),
                    vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                ),
                TargetTransition::ReleaseToPresent => (
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                    vk::ImageLayout::PRESENT_SRC_KHR,
                    vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
                    vk::AccessFlags::empty(),
                    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                    vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                ),
            };

        let barrier = vk::ImageMemoryBarrier::default()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(color_subresource_range());

        unsafe {
            self.device.handle().cmd_pipeline_barrier(
                buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
        Ok(())
    }

    fn record_clear(
        &self,
        recording: RecordingId,
        slot: SlotIndex,
        color: [f32; 4],
    ) -> GpuResult<()> {
        let inner = self.lock();
        let buffer = self.recording(&inner, recording)?.buffer;
        let view = inner.swapchain.image_view(slot.as_usize());
        let extent = inner.swapchain.extent();

        let clear_value = vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        };
        let color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(clear_value);

        let color_attachments = [color_attachment];
        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .layer_count(1)
            .color_attachments(&color_attachments);

        unsafe {
            self.device
                .handle()
                .cmd_begin_rendering(buffer, &rendering_info);
            self.device.handle().cmd_end_rendering(buffer);
        }
        Ok(())
    }
}

impl Drop for VulkanGpu {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            tracing::error!("Failed to drain device during backend drop: {:?}", e);
        }

        let inner = self.inner.get_mut().expect("Vulkan backend state poisoned");
        unsafe {
            for slot in &inner.recordings {
                self.device.handle().destroy_command_pool(slot.pool, None);
            }
            for &gate in &inner.present_gates {
                self.device.handle().destroy_semaphore(gate, None);
            }
            self.device.handle().destroy_fence(inner.acquire_fence, None);
            self.device.handle().destroy_semaphore(self.timeline, None);
        }

        // Swapchain before surface, surface before the instance (which drops
        // with the remaining fields).
        inner.swapchain.destroy();
        unsafe {
            self.surface_loader.destroy_surface(self.surface, None);
        }
        info!("Vulkan backend destroyed");
    }
}

// Safety: all contained ash objects are externally synchronized handles; the
// mutable state sits behind a Mutex and queue access is serialized through it.
unsafe impl Send for VulkanGpu {}
unsafe impl Sync for VulkanGpu {}

fn create_timeline_semaphore(device: &ash::Device) -> GpuResult<vk::Semaphore> {
    let mut type_info = vk::SemaphoreTypeCreateInfo::default()
        .semaphore_type(vk::SemaphoreType::TIMELINE)
        .initial_value(0);
    let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);

    let semaphore = unsafe { device.create_semaphore(&create_info, None)? };
    debug!("Created timeline semaphore");
    Ok(semaphore)
}

fn create_present_gates(device: &ash::Device, image_count: u32) -> GpuResult<Vec<vk::Semaphore>> {
    // One past the image count: a gate is never reused before the present it
    // ordered has retired.
    (0..image_count + 1)
        .map(|_| {
            let created =
                unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)? };
            Ok(created)
        })
        .collect()
}

fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

fn map_device_error(result: vk::Result) -> GpuError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => GpuError::DeviceLost,
        other => GpuError::Vulkan(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_lost_maps_to_its_own_variant() {
        assert!(matches!(
            map_device_error(vk::Result::ERROR_DEVICE_LOST),
            GpuError::DeviceLost
        ));
        assert!(matches!(
            map_device_error(vk::Result::ERROR_OUT_OF_HOST_MEMORY),
            GpuError::Vulkan(_)
        ));
    }

    #[test]
    fn vulkan_gpu_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<VulkanGpu>();
    }
}
