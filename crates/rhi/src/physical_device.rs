//! Physical device (GPU) selection and capability queries.
//!
//! Selection keeps the GPUs that have a graphics queue, can present to the
//! surface and support sampler anisotropy, then prefers discrete over
//! integrated over everything else. [`PhysicalDeviceInfo`] answers the
//! capability questions the render graph asks: the highest usable MSAA sample
//! count and the first supported depth format.
//!
//! # Example
//!
//! ```no_run
//! use framegraph_rhi::instance::Instance;
//! use framegraph_rhi::physical_device::select_physical_device;
//! use ash::vk;
//!
//! let instance = Instance::new(false, &[]).expect("Failed to create instance");
//! let surface: vk::SurfaceKHR = vk::SurfaceKHR::null(); // placeholder
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//!
//! let device_info = select_physical_device(instance.handle(), surface, &surface_loader)
//!     .expect("Failed to select physical device");
//!
//! println!("Selected GPU: {:?}", device_info.device_name());
//! ```

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::RhiError;

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: &[vk::Format] = &[
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Picks the highest single sample count bit set in `counts`.
pub fn highest_sample_count(counts: vk::SampleCountFlags) -> vk::SampleCountFlags {
    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|&count| counts.contains(count))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

/// Preference of a device type; higher wins.
pub fn device_type_rank(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 3,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
        _ => 0,
    }
}

/// Queue families the renderer records and presents on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Distinct families, graphics first, for queue creation.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families: Vec<u32> = self.graphics_family.into_iter().collect();
        if let Some(present) = self.present_family
            && !families.contains(&present)
        {
            families.push(present);
        }
        families
    }
}

/// Selected GPU with the properties the renderer queries.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    pub fn device_name(&self) -> &str {
        // SAFETY: the driver fills device_name with a NUL-terminated string.
        unsafe {
            CStr::from_ptr(self.properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("Unknown Device")
        }
    }

    /// Highest sample count usable by both color and depth framebuffers.
    pub fn max_usable_sample_count(&self) -> vk::SampleCountFlags {
        let limits = &self.properties.limits;
        highest_sample_count(
            limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts,
        )
    }

    #[inline]
    pub fn max_sampler_anisotropy(&self) -> f32 {
        self.properties.limits.max_sampler_anisotropy
    }

    /// First supported depth format, preferring pure 32-bit float depth.
    pub fn find_depth_format(&self, instance: &ash::Instance) -> Result<vk::Format, RhiError> {
        let format = DEPTH_FORMAT_CANDIDATES
            .iter()
            .copied()
            .find(|&format| {
                // SAFETY: the physical device belongs to `instance`.
                let props =
                    unsafe { instance.get_physical_device_format_properties(self.device, format) };
                props
                    .optimal_tiling_features
                    .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
            })
            .ok_or_else(|| {
                RhiError::UnsupportedFormat(format!("none of {:?}", DEPTH_FORMAT_CANDIDATES))
            })?;
        debug!("Depth format: {:?}", format);
        Ok(format)
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.properties.device_type)
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Selects the GPU to render with.
///
/// # Errors
///
/// [`RhiError::NoSuitableGpu`] if no GPU can render and present to `surface`.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Result<PhysicalDeviceInfo, RhiError> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    info!("Found {} GPU(s)", devices.len());

    let selected = devices
        .into_iter()
        .filter_map(|device| check_device_suitability(instance, device, surface, surface_loader))
        .max_by_key(|info| device_type_rank(info.properties.device_type))
        .ok_or_else(|| {
            warn!("No GPU can render and present to the surface");
            RhiError::NoSuitableGpu
        })?;

    let version = selected.properties.api_version;
    info!(
        "Selected GPU: '{}' ({:?}) - Vulkan {}.{}.{}",
        selected.device_name(),
        selected.properties.device_type,
        vk::api_version_major(version),
        vk::api_version_minor(version),
        vk::api_version_patch(version)
    );

    Ok(selected)
}

fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let features = unsafe { instance.get_physical_device_features(device) };
    let queue_families = find_queue_families(instance, device, surface, surface_loader);

    let info = PhysicalDeviceInfo {
        device,
        properties,
        features,
        queue_families,
    };

    if !queue_families.is_complete() {
        debug!("GPU '{}' skipped: no graphics or present queue", info.device_name());
        return None;
    }
    if features.sampler_anisotropy == vk::FALSE {
        debug!("GPU '{}' skipped: no sampler anisotropy", info.device_name());
        return None;
    }
    Some(info)
}

/// First graphics family, and the first family that can present to `surface`.
fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> QueueFamilyIndices {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let mut indices = QueueFamilyIndices::default();

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;
        if family.queue_count == 0 {
            continue;
        }

        if indices.graphics_family.is_none()
            && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        {
            indices.graphics_family = Some(index);
        }
        if indices.present_family.is_none() {
            let supported = unsafe {
                surface_loader
                    .get_physical_device_surface_support(device, index, surface)
                    .unwrap_or(false)
            };
            if supported {
                indices.present_family = Some(index);
            }
        }
        if indices.is_complete() {
            break;
        }
    }

    indices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_highest_sample_count() {
        let counts = vk::SampleCountFlags::TYPE_1
            | vk::SampleCountFlags::TYPE_2
            | vk::SampleCountFlags::TYPE_4
            | vk::SampleCountFlags::TYPE_8;
        assert_eq!(highest_sample_count(counts), vk::SampleCountFlags::TYPE_8);
    }

    #[test]
    fn test_highest_sample_count_uses_intersection() {
        let color = vk::SampleCountFlags::TYPE_1
            | vk::SampleCountFlags::TYPE_4
            | vk::SampleCountFlags::TYPE_8;
        let depth = vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_4;
        assert_eq!(highest_sample_count(color & depth), vk::SampleCountFlags::TYPE_4);
    }

    #[test]
    fn test_highest_sample_count_falls_back_to_one() {
        assert_eq!(
            highest_sample_count(vk::SampleCountFlags::empty()),
            vk::SampleCountFlags::TYPE_1
        );
    }

    #[test]
    fn test_depth_candidates_order() {
        assert_eq!(
            DEPTH_FORMAT_CANDIDATES,
            &[
                vk::Format::D32_SFLOAT,
                vk::Format::D32_SFLOAT_S8_UINT,
                vk::Format::D24_UNORM_S8_UINT
            ]
        );
    }

    #[test]
    fn test_device_type_rank() {
        let discrete = device_type_rank(vk::PhysicalDeviceType::DISCRETE_GPU);
        let integrated = device_type_rank(vk::PhysicalDeviceType::INTEGRATED_GPU);
        let cpu = device_type_rank(vk::PhysicalDeviceType::CPU);
        assert!(discrete > integrated);
        assert!(integrated > cpu);
        assert_eq!(cpu, device_type_rank(vk::PhysicalDeviceType::OTHER));
    }

    #[test]
    fn test_queue_families_complete() {
        assert!(!QueueFamilyIndices::default().is_complete());
        let graphics_only = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: None,
        };
        assert!(!graphics_only.is_complete());
        assert_eq!(graphics_only.unique_families(), vec![0]);
    }

    #[test]
    fn test_unique_families() {
        let shared = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(0),
        };
        assert_eq!(shared.unique_families(), vec![0]);

        let split = QueueFamilyIndices {
            graphics_family: Some(2),
            present_family: Some(1),
        };
        assert!(split.is_complete());
        assert_eq!(split.unique_families(), vec![2, 1]);
    }
}
