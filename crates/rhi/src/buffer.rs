//! GPU buffer management.
//!
//! Buffers are backed by gpu-allocator. Host-visible buffers (uniform,
//! vertex, index, staging, readback) stay persistently mapped and are written
//! with [`Buffer::write_data`]; device-local storage buffers are filled
//! through a staging buffer and a one-shot copy.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use framegraph_rhi::device::Device;
//! use framegraph_rhi::buffer::{Buffer, BufferUsage};
//!
//! # fn example(device: Arc<Device>) -> Result<(), framegraph_rhi::RhiError> {
//! let vertices: [f32; 6] = [0.0, 0.5, -0.5, -0.5, 0.5, -0.5];
//! let vertex_buffer = Buffer::new_with_data(
//!     device,
//!     BufferUsage::Vertex,
//!     bytemuck::cast_slice(&vertices),
//! )?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// How a buffer is used; decides usage flags and memory location.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
    /// Host-visible, persistently mapped uniform buffer
    Uniform,
    /// Device-local storage buffer, reachable by transfer in both directions
    Storage,
    /// Host-visible upload source
    Staging,
    /// Host-visible download target
    Readback,
}

impl BufferUsage {
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER,
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Storage => {
                vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::TRANSFER_SRC
                    | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
            BufferUsage::Readback => vk::BufferUsageFlags::TRANSFER_DST,
        }
    }

    pub fn memory_location(self) -> MemoryLocation {
        match self {
            BufferUsage::Vertex | BufferUsage::Index => MemoryLocation::CpuToGpu,
            BufferUsage::Uniform | BufferUsage::Staging => MemoryLocation::CpuToGpu,
            BufferUsage::Storage => MemoryLocation::GpuOnly,
            BufferUsage::Readback => MemoryLocation::GpuToCpu,
        }
    }

    /// Whether memory of this usage can be mapped on the host.
    pub fn is_host_visible(self) -> bool {
        self.memory_location() != MemoryLocation::GpuOnly
    }

    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Storage => "storage",
            BufferUsage::Staging => "staging",
            BufferUsage::Readback => "readback",
        }
    }
}

/// Vulkan buffer with its gpu-allocator allocation.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl Buffer {
    /// Creates a buffer of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidArgument`] for a zero size, or the Vulkan /
    /// allocator error on failure.
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidArgument(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };

        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = {
            let mut allocator = device.lock_allocator()?;
            allocator.allocate(&AllocationCreateDesc {
                name: usage.name(),
                requirements,
                location: usage.memory_location(),
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
        };
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e.into());
            }
        };

        unsafe {
            device
                .handle()
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())?;
        }

        debug!("Created {} buffer: {} bytes", usage.name(), size);

        Ok(Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
        })
    }

    /// Creates a host-visible buffer and copies `data` into it.
    pub fn new_with_data(device: Arc<Device>, usage: BufferUsage, data: &[u8]) -> RhiResult<Self> {
        let buffer = Self::new(device, usage, data.len() as vk::DeviceSize)?;
        buffer.write_data(0, data)?;
        Ok(buffer)
    }

    /// Copies `data` into the mapped memory at `offset`.
    pub fn write_data(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.check_range(offset, data.len())?;

        let mapped = self.mapped_ptr()?;
        unsafe {
            let dst = mapped.add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }

        Ok(())
    }

    /// Reads `len` bytes from the mapped memory at `offset`.
    pub fn read_data(&self, offset: vk::DeviceSize, len: usize) -> RhiResult<Vec<u8>> {
        self.check_range(offset, len)?;

        let mapped = self.mapped_ptr()?;
        let mut out = vec![0u8; len];
        unsafe {
            let src = mapped.add(offset as usize);
            std::ptr::copy_nonoverlapping(src as *const u8, out.as_mut_ptr(), len);
        }

        Ok(out)
    }

    /// Uploads `data` into every buffer in `targets` through one staging
    /// buffer and a single one-shot command buffer.
    pub fn upload_via_staging(
        device: &Arc<Device>,
        targets: &[&Buffer],
        data: &[u8],
    ) -> RhiResult<()> {
        let staging = Buffer::new_with_data(device.clone(), BufferUsage::Staging, data)?;
        let size = data.len() as vk::DeviceSize;
        for target in targets {
            target.check_range(0, data.len())?;
        }

        device.one_shot(|cmd| {
            let region = [vk::BufferCopy::default().size(size)];
            for target in targets {
                unsafe {
                    device
                        .handle()
                        .cmd_copy_buffer(cmd, staging.handle(), target.handle(), &region);
                }
            }
        })
    }

    /// Downloads the whole buffer into host memory through a readback buffer.
    pub fn download_via_staging(&self) -> RhiResult<Vec<u8>> {
        let readback = Buffer::new(self.device.clone(), BufferUsage::Readback, self.size)?;
        let size = self.size;
        self.device.one_shot(|cmd| {
            let region = [vk::BufferCopy::default().size(size)];
            unsafe {
                self.device
                    .handle()
                    .cmd_copy_buffer(cmd, self.buffer, readback.handle(), &region);
            }
        })?;
        readback.read_data(0, size as usize)
    }

    fn check_range(&self, offset: vk::DeviceSize, len: usize) -> RhiResult<()> {
        let end = offset + len as vk::DeviceSize;
        if end > self.size {
            return Err(RhiError::InvalidArgument(format!(
                "Access exceeds buffer size: offset {} + length {} > buffer {}",
                offset, len, self.size
            )));
        }
        Ok(())
    }

    fn mapped_ptr(&self) -> RhiResult<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(|allocation| allocation.mapped_ptr())
            .map(|ptr| ptr.as_ptr() as *mut u8)
            .ok_or_else(|| RhiError::NotHostVisible(format!("{} buffer", self.usage.name())))
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.device.lock_allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free buffer allocation: {:?}", e);
                    }
                }
                Err(e) => error!("Failed to free buffer allocation: {}", e),
            }
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }

        debug!("Destroyed {} buffer", self.usage.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_usage_allows_transfer_both_ways() {
        let usage = BufferUsage::Storage.to_vk_usage();
        assert!(usage.contains(vk::BufferUsageFlags::STORAGE_BUFFER));
        assert!(usage.contains(vk::BufferUsageFlags::TRANSFER_SRC));
        assert!(usage.contains(vk::BufferUsageFlags::TRANSFER_DST));
    }

    #[test]
    fn test_buffer_usage_to_vk_usage() {
        assert!(
            BufferUsage::Uniform
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::UNIFORM_BUFFER)
        );
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER)
        );
        assert!(
            BufferUsage::Readback
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::TRANSFER_DST)
        );
    }

    #[test]
    fn test_buffer_usage_memory_location() {
        assert_eq!(
            BufferUsage::Uniform.memory_location(),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            BufferUsage::Storage.memory_location(),
            MemoryLocation::GpuOnly
        );
        assert_eq!(
            BufferUsage::Readback.memory_location(),
            MemoryLocation::GpuToCpu
        );
        assert!(!BufferUsage::Storage.is_host_visible());
        assert!(BufferUsage::Uniform.is_host_visible());
    }

    #[test]
    fn test_buffer_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Buffer>();
    }
}
