//! Descriptor set layouts, pools and update helpers.
//!
//! - [`DescriptorSetLayout`] owns a `VkDescriptorSetLayout`
//! - [`DescriptorPool`] owns a `VkDescriptorPool`; sets allocated from it are
//!   released together with the pool
//! - [`layout_binding`], [`buffer_info`] and [`image_info`] build the plain
//!   Vulkan structs used when filling sets
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use framegraph_rhi::device::Device;
//! use framegraph_rhi::descriptor::{layout_binding, DescriptorSetLayout, DescriptorPool};
//!
//! # fn example(device: Arc<Device>) -> Result<(), framegraph_rhi::RhiError> {
//! let binding = layout_binding(
//!     0,
//!     vk::DescriptorType::UNIFORM_BUFFER,
//!     1,
//!     vk::ShaderStageFlags::ALL,
//! );
//! let layout = DescriptorSetLayout::new(device.clone(), &[binding])?;
//!
//! let pool_size = vk::DescriptorPoolSize::default()
//!     .ty(vk::DescriptorType::UNIFORM_BUFFER)
//!     .descriptor_count(2);
//! let pool = DescriptorPool::new(device.clone(), 2, &[pool_size])?;
//!
//! let sets = pool.allocate(&[layout.handle(), layout.handle()])?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Vulkan descriptor set layout wrapper.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    pub fn new(
        device: Arc<Device>,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);

        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Vulkan descriptor pool wrapper.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl DescriptorPool {
    pub fn new(
        device: Arc<Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };

        debug!(
            "Created descriptor pool: max_sets={}, pool_sizes={}",
            max_sets,
            pool_sizes.len()
        );

        Ok(Self {
            device,
            pool,
            max_sets,
        })
    }

    /// Allocates one set per entry in `layouts`.
    pub fn allocate(
        &self,
        layouts: &[vk::DescriptorSetLayout],
    ) -> RhiResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        let sets = unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? };

        Ok(sets)
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
    }
}

/// Writes descriptor updates; empty input is a no-op.
pub fn update_descriptor_sets(device: &Device, writes: &[vk::WriteDescriptorSet]) {
    if writes.is_empty() {
        return;
    }

    unsafe {
        device.handle().update_descriptor_sets(writes, &[]);
    }
}

#[inline]
pub fn layout_binding(
    binding: u32,
    descriptor_type: vk::DescriptorType,
    count: u32,
    stage_flags: vk::ShaderStageFlags,
) -> vk::DescriptorSetLayoutBinding<'static> {
    vk::DescriptorSetLayoutBinding::default()
        .binding(binding)
        .descriptor_type(descriptor_type)
        .descriptor_count(count)
        .stage_flags(stage_flags)
}

#[inline]
pub fn buffer_info(
    buffer: vk::Buffer,
    offset: vk::DeviceSize,
    range: vk::DeviceSize,
) -> vk::DescriptorBufferInfo {
    vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(offset)
        .range(range)
}

#[inline]
pub fn image_info(
    sampler: vk::Sampler,
    image_view: vk::ImageView,
    image_layout: vk::ImageLayout,
) -> vk::DescriptorImageInfo {
    vk::DescriptorImageInfo::default()
        .sampler(sampler)
        .image_view(image_view)
        .image_layout(image_layout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_binding_helper() {
        let binding = layout_binding(
            3,
            vk::DescriptorType::INPUT_ATTACHMENT,
            1,
            vk::ShaderStageFlags::FRAGMENT,
        );
        assert_eq!(binding.binding, 3);
        assert_eq!(binding.descriptor_type, vk::DescriptorType::INPUT_ATTACHMENT);
        assert_eq!(binding.descriptor_count, 1);
        assert_eq!(binding.stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_buffer_info_helper() {
        let info = buffer_info(vk::Buffer::null(), 64, 128);
        assert_eq!(info.offset, 64);
        assert_eq!(info.range, 128);
    }

    #[test]
    fn test_image_info_helper() {
        let info = image_info(
            vk::Sampler::null(),
            vk::ImageView::null(),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(info.sampler, vk::Sampler::null());
        assert_eq!(info.image_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }
}
