//! Synchronization primitives for Vulkan.
//!
//! - [`Semaphore`] - GPU-to-GPU ordering between acquire, submit and present
//! - [`Fence`] - GPU-to-host completion signal for a frame slot
//! - [`FrameSync`] - the three objects one frame-in-flight slot needs
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use framegraph_rhi::device::Device;
//! use framegraph_rhi::sync::FrameSync;
//!
//! # fn example(device: Arc<Device>) -> Result<(), framegraph_rhi::RhiError> {
//! let slots: Vec<FrameSync> = (0..2)
//!     .map(|_| FrameSync::new(device.clone()))
//!     .collect::<Result<_, _>>()?;
//!
//! // The fence starts signaled so the first wait on each slot returns at once.
//! slots[0].in_flight_fence().wait(u64::MAX)?;
//! slots[0].in_flight_fence().reset()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Vulkan semaphore wrapper, created unsignaled.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();

        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };

        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Vulkan fence wrapper.
///
/// Frame slot fences are created signaled: a slot that has never been
/// submitted counts as complete.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a fence, optionally in the signaled state.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);

        let fence = unsafe { device.handle().create_fence(&create_info, None)? };

        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled or `timeout` nanoseconds elapse.
    pub fn wait(&self, timeout: u64) -> Result<(), RhiError> {
        unsafe {
            self.device
                .handle()
                .wait_for_fences(&[self.fence], true, timeout)?
        };
        Ok(())
    }

    pub fn reset(&self) -> Result<(), RhiError> {
        unsafe { self.device.handle().reset_fences(&[self.fence])? };
        Ok(())
    }

    /// Non-blocking status query.
    pub fn is_signaled(&self) -> bool {
        let result = unsafe { self.device.handle().get_fence_status(self.fence) };
        matches!(result, Ok(true))
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
    }
}

/// Synchronization objects of one frame-in-flight slot.
///
/// - `image_available` is signaled by swapchain acquisition and waited on by
///   the submit at `COLOR_ATTACHMENT_OUTPUT`
/// - `work_finished` is signaled by the submit and waited on by present
/// - `in_flight` is signaled when the slot's command buffer has executed
pub struct FrameSync {
    image_available: Semaphore,
    work_finished: Semaphore,
    in_flight: Fence,
}

impl FrameSync {
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let image_available = Semaphore::new(device.clone())?;
        let work_finished = Semaphore::new(device.clone())?;
        let in_flight = Fence::new(device, true)?;

        debug!("Frame slot synchronization objects created");

        Ok(Self {
            image_available,
            work_finished,
            in_flight,
        })
    }

    #[inline]
    pub fn image_available(&self) -> &Semaphore {
        &self.image_available
    }

    #[inline]
    pub fn work_finished(&self) -> &Semaphore {
        &self.work_finished
    }

    #[inline]
    pub fn in_flight_fence(&self) -> &Fence {
        &self.in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semaphore_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
    }

    #[test]
    fn test_fence_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Fence>();
    }

    #[test]
    fn test_frame_sync_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FrameSync>();
    }
}
