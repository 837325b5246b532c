//! Texture samplers.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Vulkan sampler wrapper.
pub struct Sampler {
    device: Arc<Device>,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Creates the default sampler used for combined image samplers.
    ///
    /// Linear filtering and mipmapping, repeat addressing on all axes,
    /// anisotropy at the device maximum, opaque black border, comparison
    /// disabled and a single mip level (lod 0..0).
    pub fn new_linear_repeat(device: Arc<Device>) -> RhiResult<Self> {
        let info = linear_repeat_info(device.max_sampler_anisotropy());
        Self::new(device, &info)
    }

    pub fn new(device: Arc<Device>, info: &vk::SamplerCreateInfo) -> RhiResult<Self> {
        let sampler = unsafe { device.handle().create_sampler(info, None)? };
        debug!(
            "Created sampler (anisotropy {})",
            if info.anisotropy_enable == vk::TRUE {
                info.max_anisotropy
            } else {
                1.0
            }
        );
        Ok(Self { device, sampler })
    }

    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_sampler(self.sampler, None);
        }
    }
}

fn linear_repeat_info(max_anisotropy: f32) -> vk::SamplerCreateInfo<'static> {
    vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(true)
        .max_anisotropy(max_anisotropy)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .mip_lod_bias(0.0)
        .min_lod(0.0)
        .max_lod(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_repeat_info() {
        let info = linear_repeat_info(16.0);
        assert_eq!(info.mag_filter, vk::Filter::LINEAR);
        assert_eq!(info.address_mode_w, vk::SamplerAddressMode::REPEAT);
        assert_eq!(info.anisotropy_enable, vk::TRUE);
        assert_eq!(info.max_anisotropy, 16.0);
        assert_eq!(info.border_color, vk::BorderColor::INT_OPAQUE_BLACK);
        assert_eq!(info.compare_enable, vk::FALSE);
        assert_eq!(info.max_lod, 0.0);
    }
}
