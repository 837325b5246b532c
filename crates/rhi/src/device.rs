//! Vulkan logical device and queue management.
//!
//! # Overview
//!
//! The [`Device`] struct owns the Vulkan logical device together with:
//! - the graphics and present queues
//! - the gpu-allocator instance (behind a `Mutex`)
//! - a transient command pool for one-shot uploads and layout transitions
//! - the optional `VK_EXT_debug_utils` device loader used for command labels
//!
//! # Example
//!
//! ```no_run
//! use framegraph_rhi::instance::Instance;
//! use framegraph_rhi::physical_device::select_physical_device;
//! use framegraph_rhi::device::Device;
//! use ash::vk;
//!
//! let instance = Instance::new(false, &[]).expect("Failed to create instance");
//! let surface: vk::SurfaceKHR = vk::SurfaceKHR::null(); // placeholder
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//!
//! let physical_device_info = select_physical_device(instance.handle(), surface, &surface_loader)
//!     .expect("No suitable GPU found");
//!
//! let device = Device::new(&instance, &physical_device_info)
//!     .expect("Failed to create logical device");
//!
//! device
//!     .one_shot(|cmd| {
//!         // record transfer commands into `cmd`
//!         let _ = cmd;
//!     })
//!     .expect("one-shot submission failed");
//! ```

use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use crate::error::RhiError;
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};

/// Required device extensions.
const DEVICE_EXTENSIONS: &[&std::ffi::CStr] = &[ash::khr::swapchain::NAME];

/// Vulkan logical device wrapper.
///
/// # Thread Safety
///
/// The [`Device`] is shared across the renderer through `Arc`. The allocator
/// and the transient command pool are each protected by a `Mutex`.
pub struct Device {
    device: ash::Device,
    /// Instance handle kept for format queries after creation.
    instance: ash::Instance,
    info: PhysicalDeviceInfo,
    /// Dropped by hand before the device is destroyed.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    /// Pool for short-lived command buffers submitted through [`Device::one_shot`].
    transient_pool: Mutex<vk::CommandPool>,
    debug_utils: Option<ash::ext::debug_utils::Device>,
}

impl Device {
    /// Creates a new logical device.
    ///
    /// Enables the swapchain extension and the sampler anisotropy feature,
    /// retrieves the graphics and present queues and initializes the
    /// gpu-allocator.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue families are incomplete, device creation
    /// fails or the allocator cannot be initialized.
    pub fn new(
        instance: &Instance,
        physical_device_info: &PhysicalDeviceInfo,
    ) -> Result<Arc<Self>, RhiError> {
        let queue_families = &physical_device_info.queue_families;
        let graphics_family = queue_families
            .graphics_family
            .ok_or(RhiError::NoSuitableGpu)?;
        let present_family = queue_families
            .present_family
            .ok_or(RhiError::NoSuitableGpu)?;

        let unique_families = queue_families.unique_families();
        let queue_priorities = [1.0f32];

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!(
            "Creating {} queue(s) for families: {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(true)
            .fill_mode_non_solid(physical_device_info.features.fill_mode_non_solid == vk::TRUE);

        let extension_names: Vec<*const std::ffi::c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device_info.device, &create_info, None)?
        };

        info!(
            "Logical device created with {} extension(s)",
            DEVICE_EXTENSIONS.len()
        );

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        debug!(
            "Queues retrieved (graphics family {}, present family {})",
            graphics_family, present_family
        );

        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(graphics_family);
        let transient_pool = unsafe { device.create_command_pool(&pool_info, None)? };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical_device_info.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        info!("GPU memory allocator initialized");

        let debug_utils = instance
            .has_debug_utils()
            .then(|| ash::ext::debug_utils::Device::new(instance.handle(), &device));

        Ok(Arc::new(Self {
            device,
            instance: instance.handle().clone(),
            info: physical_device_info.clone(),
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            graphics_queue,
            present_queue,
            transient_pool: Mutex::new(transient_pool),
            debug_utils,
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.info.device
    }

    /// Properties and queue families of the physical device.
    #[inline]
    pub fn info(&self) -> &PhysicalDeviceInfo {
        &self.info
    }

    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.info.queue_families
    }

    /// Returns a reference to the GPU memory allocator.
    #[inline]
    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    /// Locks the allocator, mapping a poisoned lock to an error.
    pub fn lock_allocator(&self) -> Result<MutexGuard<'_, Allocator>, RhiError> {
        self.allocator.lock().map_err(|_| RhiError::AllocatorPoisoned)
    }

    /// Debug utils loader, present only when the instance enabled the extension.
    #[inline]
    pub fn debug_utils(&self) -> Option<&ash::ext::debug_utils::Device> {
        self.debug_utils.as_ref()
    }

    /// Highest MSAA sample count usable for color and depth attachments.
    pub fn max_usable_sample_count(&self) -> vk::SampleCountFlags {
        self.info.max_usable_sample_count()
    }

    pub fn max_sampler_anisotropy(&self) -> f32 {
        self.info.max_sampler_anisotropy()
    }

    /// First supported depth attachment format.
    pub fn find_depth_format(&self) -> Result<vk::Format, RhiError> {
        self.info.find_depth_format(&self.instance)
    }

    /// Waits for the device to become idle.
    pub fn wait_idle(&self) -> Result<(), RhiError> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Submits command buffers to the graphics queue.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    /// - All command buffers are valid and recorded
    /// - Synchronization is properly handled
    /// - The fence (if provided) is not in use
    pub unsafe fn submit_graphics(
        &self,
        submit_infos: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> Result<(), RhiError> {
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, submit_infos, fence)?;
        }
        Ok(())
    }

    /// Records commands into a temporary command buffer, submits it to the
    /// graphics queue and blocks until it has executed.
    ///
    /// Used for staging uploads, buffer copies and image layout transitions
    /// outside of the per-frame command buffers.
    pub fn one_shot<F>(&self, record: F) -> Result<(), RhiError>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let pool = self
            .transient_pool
            .lock()
            .map_err(|_| RhiError::AllocatorPoisoned)?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffers = unsafe { self.device.allocate_command_buffers(&alloc_info)? };
        let cmd = command_buffers[0];

        let result = self.record_and_wait(cmd, record);

        unsafe { self.device.free_command_buffers(*pool, &command_buffers) };
        result
    }

    fn record_and_wait<F>(&self, cmd: vk::CommandBuffer, record: F) -> Result<(), RhiError>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device.begin_command_buffer(cmd, &begin_info)?;
            record(cmd);
            self.device.end_command_buffer(cmd)?;

            let fence = self
                .device
                .create_fence(&vk::FenceCreateInfo::default(), None)?;
            let cmds = [cmd];
            let submit_info = vk::SubmitInfo::default().command_buffers(&cmds);
            let submitted = self
                .device
                .queue_submit(self.graphics_queue, &[submit_info], fence)
                .and_then(|()| self.device.wait_for_fences(&[fence], true, u64::MAX));
            self.device.destroy_fence(fence, None);
            submitted?;
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }

            match self.transient_pool.get_mut() {
                Ok(pool) => self.device.destroy_command_pool(*pool, None),
                Err(_) => error!("Transient command pool lock poisoned, pool leaked"),
            }

            // Returns the allocator's memory blocks while the device is alive.
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: Device is Send+Sync because:
// - ash::Device and ash::Instance are Send+Sync
// - vk::Queue handles are plain Copy handles used only from the host thread
//   that records frames
// - Allocator and the transient pool are protected by Mutex
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_extensions_defined() {
        assert_eq!(DEVICE_EXTENSIONS, &[ash::khr::swapchain::NAME]);
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
