//! Presentation image chain.
//!
//! [`Swapchain`] owns the `VkSwapchainKHR` and one color view per image. The
//! shape of the chain comes from [`SurfaceChoice::choose`], a pure function of
//! what the surface reports, so the selection rules are testable without a
//! GPU.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;

/// Format, present mode, extent and image count picked for a surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceChoice {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
}

impl SurfaceChoice {
    /// Prefers B8G8R8A8_SRGB and MAILBOX, falls back to the first format
    /// and FIFO. The extent follows the surface unless it is left undefined,
    /// in which case `width`x`height` is clamped to the surface limits.
    pub fn choose(
        capabilities: &vk::SurfaceCapabilitiesKHR,
        formats: &[vk::SurfaceFormatKHR],
        present_modes: &[vk::PresentModeKHR],
        width: u32,
        height: u32,
    ) -> RhiResult<Self> {
        let format = formats
            .iter()
            .copied()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_SRGB
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| {
                let first = formats.first().copied();
                if let Some(first) = first {
                    warn!("B8G8R8A8_SRGB unavailable, using {:?}", first.format);
                }
                first
            })
            .ok_or_else(|| RhiError::SwapchainError("Surface reports no formats".to_string()))?;

        if present_modes.is_empty() {
            return Err(RhiError::SwapchainError(
                "Surface reports no present modes".to_string(),
            ));
        }
        let present_mode = if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
            vk::PresentModeKHR::MAILBOX
        } else {
            vk::PresentModeKHR::FIFO
        };

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            let (min, max) = (capabilities.min_image_extent, capabilities.max_image_extent);
            vk::Extent2D {
                width: width.clamp(min.width, max.width),
                height: height.clamp(min.height, max.height),
            }
        };

        // max_image_count 0 means unbounded
        let mut image_count = capabilities.min_image_count + 1;
        if capabilities.max_image_count > 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }

        Ok(Self {
            format,
            present_mode,
            extent,
            image_count,
        })
    }
}

/// Presentation image chain for one surface.
pub struct Swapchain {
    device: Arc<Device>,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl Swapchain {
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> RhiResult<Self> {
        Self::create(instance, device, surface, width, height, vk::SwapchainKHR::null())
    }

    fn create(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        old_swapchain: vk::SwapchainKHR,
    ) -> RhiResult<Self> {
        let loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
        let physical = device.physical_device();

        let (capabilities, formats, present_modes) = unsafe {
            (
                surface_loader.get_physical_device_surface_capabilities(physical, surface)?,
                surface_loader.get_physical_device_surface_formats(physical, surface)?,
                surface_loader.get_physical_device_surface_present_modes(physical, surface)?,
            )
        };
        let choice = SurfaceChoice::choose(&capabilities, &formats, &present_modes, width, height)?;

        let families = device.queue_families();
        let (Some(graphics_family), Some(present_family)) =
            (families.graphics_family, families.present_family)
        else {
            return Err(RhiError::SwapchainError(
                "Device has no graphics or present queue family".to_string(),
            ));
        };
        let family_indices = [graphics_family, present_family];
        let (sharing_mode, family_indices) = if graphics_family != present_family {
            (vk::SharingMode::CONCURRENT, &family_indices[..])
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(choice.image_count)
            .image_format(choice.format.format)
            .image_color_space(choice.format.color_space)
            .image_extent(choice.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(family_indices)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(choice.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { loader.create_swapchain(&create_info, None)? };
        let image_views = unsafe { loader.get_swapchain_images(swapchain) }
            .map_err(RhiError::from)
            .and_then(|images| create_image_views(&device, &images, choice.format.format));
        let image_views = match image_views {
            Ok(views) => views,
            Err(e) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(e);
            }
        };

        info!(
            "Swapchain created: {}x{}, {:?}, {:?}, {} images",
            choice.extent.width,
            choice.extent.height,
            choice.format.format,
            choice.present_mode,
            image_views.len()
        );

        Ok(Self {
            device,
            loader,
            swapchain,
            image_views,
            format: choice.format.format,
            extent: choice.extent,
        })
    }

    /// Rebuilds the chain for a new surface size. No frame may still use the
    /// old images.
    pub fn recreate(
        &mut self,
        instance: &Instance,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> RhiResult<()> {
        let mut replacement = Self::create(
            instance,
            self.device.clone(),
            surface,
            width,
            height,
            self.swapchain,
        )?;
        // old handle and views drop with `replacement`
        std::mem::swap(self, &mut replacement);
        Ok(())
    }

    /// Returns `(image_index, suboptimal)`; `semaphore` is signalled once the
    /// image is free.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        }
    }

    /// Returns `true` when the swapchain is suboptimal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.loader.queue_present(queue, &present_info) }
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.image_views.len()
    }

    #[inline]
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.handle().destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
        debug!("Swapchain destroyed ({} images)", self.image_views.len());
    }
}

fn create_image_views(
    device: &Device,
    images: &[vk::Image],
    format: vk::Format,
) -> RhiResult<Vec<vk::ImageView>> {
    let mut views = Vec::with_capacity(images.len());
    for &image in images {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(1),
            );

        match unsafe { device.handle().create_image_view(&create_info, None) } {
            Ok(view) => views.push(view),
            Err(e) => {
                for view in views {
                    unsafe { device.handle().destroy_image_view(view, None) };
                }
                return Err(RhiError::SwapchainError(format!(
                    "Swapchain image view creation failed: {:?}",
                    e
                )));
            }
        }
    }
    Ok(views)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn fixed_surface(width: u32, height: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D { width, height },
            ..Default::default()
        }
    }

    #[test]
    fn test_prefers_srgb_and_mailbox() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_SRGB),
        ];
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        let choice = SurfaceChoice::choose(&fixed_surface(1280, 720), &formats, &modes, 1, 1).unwrap();

        assert_eq!(choice.format.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(choice.present_mode, vk::PresentModeKHR::MAILBOX);
        assert_eq!(choice.extent, vk::Extent2D { width: 1280, height: 720 });
        assert_eq!(choice.image_count, 3);
    }

    #[test]
    fn test_falls_back_to_first_format_and_fifo() {
        let formats = [surface_format(vk::Format::R8G8B8A8_UNORM)];
        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO];
        let choice = SurfaceChoice::choose(&fixed_surface(800, 600), &formats, &modes, 1, 1).unwrap();

        assert_eq!(choice.format.format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(choice.present_mode, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_undefined_extent_clamps_request() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 100, height: 100 },
            max_image_extent: vk::Extent2D { width: 2000, height: 2000 },
            ..Default::default()
        };
        let formats = [surface_format(vk::Format::B8G8R8A8_SRGB)];
        let modes = [vk::PresentModeKHR::FIFO];

        let large = SurfaceChoice::choose(&capabilities, &formats, &modes, 3000, 50).unwrap();
        assert_eq!(large.extent, vk::Extent2D { width: 2000, height: 100 });
        assert_eq!(large.image_count, 3);

        let fits = SurfaceChoice::choose(&capabilities, &formats, &modes, 800, 600).unwrap();
        assert_eq!(fits.extent, vk::Extent2D { width: 800, height: 600 });
    }

    #[test]
    fn test_image_count_capped_by_surface() {
        let mut capabilities = fixed_surface(64, 64);
        capabilities.min_image_count = 3;
        capabilities.max_image_count = 3;
        let formats = [surface_format(vk::Format::B8G8R8A8_SRGB)];
        let choice =
            SurfaceChoice::choose(&capabilities, &formats, &[vk::PresentModeKHR::FIFO], 1, 1).unwrap();
        assert_eq!(choice.image_count, 3);
    }

    #[test]
    fn test_empty_surface_lists_are_errors() {
        let capabilities = fixed_surface(64, 64);
        let formats = [surface_format(vk::Format::B8G8R8A8_SRGB)];
        assert!(matches!(
            SurfaceChoice::choose(&capabilities, &[], &[vk::PresentModeKHR::FIFO], 1, 1),
            Err(RhiError::SwapchainError(_))
        ));
        assert!(matches!(
            SurfaceChoice::choose(&capabilities, &formats, &[], 1, 1),
            Err(RhiError::SwapchainError(_))
        ));
    }
}
