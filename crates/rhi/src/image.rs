//! GPU images and image views.
//!
//! An [`Image`] is either owned (created here, memory from gpu-allocator,
//! one view) or imported from the swapchain (one view per swapchain image,
//! owning neither the images nor the views). Attachments address both kinds
//! uniformly through [`Image::view`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use framegraph_rhi::device::Device;
//! use framegraph_rhi::image::{Image, ImageDesc};
//! use ash::vk;
//!
//! # fn example(device: Arc<Device>) -> Result<(), framegraph_rhi::RhiError> {
//! let desc = ImageDesc::depth(
//!     vk::Extent2D { width: 1280, height: 720 },
//!     vk::Format::D32_SFLOAT,
//! );
//! let depth = Image::new(device, &desc)?;
//! let view = depth.view(0);
//! # let _ = view;
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

/// Everything needed to create an owned image.
///
/// Usage flags may still grow after the description is first made (an
/// attachment later read as an input attachment gains `INPUT_ATTACHMENT`),
/// so creation is deferred until the description is final.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    pub samples: vk::SampleCountFlags,
    pub layers: u32,
    /// Layout the image is put in right after creation.
    pub initial_layout: vk::ImageLayout,
    /// Layout the image is left in at the end of a render pass.
    pub final_layout: vk::ImageLayout,
}

impl ImageDesc {
    /// Single-sampled color attachment description.
    pub fn color(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            aspect: vk::ImageAspectFlags::COLOR,
            samples: vk::SampleCountFlags::TYPE_1,
            layers: 1,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }
    }

    /// Single-sampled depth attachment description.
    pub fn depth(extent: vk::Extent2D, format: vk::Format) -> Self {
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: vk::ImageAspectFlags::DEPTH,
            samples: vk::SampleCountFlags::TYPE_1,
            layers: 1,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    }

    pub fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    pub fn with_layers(mut self, layers: u32) -> Self {
        self.layers = layers;
        self
    }

    pub fn is_multisampled(&self) -> bool {
        self.samples != vk::SampleCountFlags::TYPE_1
    }

    fn view_type(&self) -> vk::ImageViewType {
        if self.layers > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        }
    }
}

/// A Vulkan image with one or more views.
pub struct Image {
    device: Arc<Device>,
    desc: ImageDesc,
    /// `Some` for owned images; swapchain images are owned by the swapchain.
    image: Option<vk::Image>,
    allocation: Option<Allocation>,
    views: Vec<vk::ImageView>,
    current_layout: vk::ImageLayout,
}

impl Image {
    /// Creates an owned image with GPU-only memory and a single view.
    ///
    /// If `desc.initial_layout` is not `UNDEFINED` the image is transitioned
    /// to it with a one-shot command buffer.
    pub fn new(device: Arc<Device>, desc: &ImageDesc) -> RhiResult<Self> {
        if desc.extent.width == 0 || desc.extent.height == 0 || desc.layers == 0 {
            return Err(RhiError::InvalidArgument(format!(
                "Image dimensions must be greater than 0, got {}x{}x{}",
                desc.extent.width, desc.extent.height, desc.layers
            )));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width,
                height: desc.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(desc.layers)
            .samples(desc.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };

        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = device.lock_allocator().and_then(|mut allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name: "image",
                    requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(RhiError::from)
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e);
            }
        };

        // From here on Drop cleans up whatever has been created.
        let mut owned = Self {
            device,
            desc: *desc,
            image: Some(image),
            allocation: Some(allocation),
            views: Vec::with_capacity(1),
            current_layout: vk::ImageLayout::UNDEFINED,
        };

        if let Some(allocation) = owned.allocation.as_ref() {
            unsafe {
                owned.device.handle().bind_image_memory(
                    image,
                    allocation.memory(),
                    allocation.offset(),
                )?;
            }
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(desc.view_type())
            .format(desc.format)
            .subresource_range(subresource_range(desc.aspect, desc.layers));
        let view = unsafe { owned.device.handle().create_image_view(&view_info, None)? };
        owned.views.push(view);

        if desc.initial_layout != vk::ImageLayout::UNDEFINED {
            owned.transition_layout(desc.initial_layout)?;
        }

        debug!(
            "Created image {}x{} ({:?}, {:?}, {} layer(s))",
            desc.extent.width, desc.extent.height, desc.format, desc.samples, desc.layers
        );

        Ok(owned)
    }

    /// Wraps the swapchain's image views; nothing is destroyed on drop.
    pub fn from_swapchain(
        device: Arc<Device>,
        views: &[vk::ImageView],
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        if views.is_empty() {
            return Err(RhiError::InvalidArgument(
                "Swapchain has no image views".to_string(),
            ));
        }

        let desc = ImageDesc {
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..ImageDesc::color(extent, format)
        };

        Ok(Self {
            device,
            desc,
            image: None,
            allocation: None,
            views: views.to_vec(),
            current_layout: vk::ImageLayout::UNDEFINED,
        })
    }

    /// View used for the given frame or swapchain image index.
    ///
    /// Owned images have a single view shared by every frame; swapchain
    /// images have one view per swapchain image.
    pub fn view(&self, frame: usize) -> vk::ImageView {
        self.views[frame.min(self.views.len() - 1)]
    }

    #[inline]
    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    #[inline]
    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.desc.format
    }

    #[inline]
    pub fn samples(&self) -> vk::SampleCountFlags {
        self.desc.samples
    }

    #[inline]
    pub fn current_layout(&self) -> vk::ImageLayout {
        self.current_layout
    }

    /// True when the image and views belong to the swapchain.
    #[inline]
    pub fn is_swapchain(&self) -> bool {
        self.image.is_none()
    }

    /// Moves an owned image to `new_layout` with a one-shot barrier.
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidTransition`] if the pair is not in the barrier table
    /// or the image belongs to the swapchain.
    pub fn transition_layout(&mut self, new_layout: vk::ImageLayout) -> RhiResult<()> {
        let old_layout = self.current_layout;
        let image = self.image.ok_or(RhiError::InvalidTransition {
            old: old_layout,
            new: new_layout,
        })?;
        let masks = transition_masks(old_layout, new_layout)?;

        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(subresource_range(self.desc.aspect, self.desc.layers))
            .src_access_mask(masks.src_access)
            .dst_access_mask(masks.dst_access);

        let device = self.device.clone();
        device.one_shot(|cmd| unsafe {
            device.handle().cmd_pipeline_barrier(
                cmd,
                masks.src_stage,
                masks.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        })?;

        debug!("Image layout {:?} -> {:?}", old_layout, new_layout);
        self.current_layout = new_layout;
        Ok(())
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        let Some(image) = self.image.take() else {
            return;
        };

        // View, then image, then memory.
        unsafe {
            for view in self.views.drain(..) {
                self.device.handle().destroy_image_view(view, None);
            }
            self.device.handle().destroy_image(image, None);
        }

        if let Some(allocation) = self.allocation.take() {
            match self.device.lock_allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free image allocation: {:?}", e);
                    }
                }
                Err(e) => error!("Failed to free image allocation: {}", e),
            }
        }
    }
}

/// Stage and access masks of a layout transition barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub dst_access: vk::AccessFlags,
}

/// Barrier masks for the supported `(old, new)` layout pairs.
pub fn transition_masks(
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> RhiResult<TransitionMasks> {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;

    let (src_stage, src_access, dst_stage, dst_access) = match (old_layout, new_layout) {
        (L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL) => (
            S::TOP_OF_PIPE,
            A::empty(),
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_WRITE,
        ),
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => (
            S::TOP_OF_PIPE,
            A::empty(),
            S::EARLY_FRAGMENT_TESTS,
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        (L::UNDEFINED, L::SHADER_READ_ONLY_OPTIMAL) => (
            S::TOP_OF_PIPE,
            A::empty(),
            S::FRAGMENT_SHADER,
            A::SHADER_READ,
        ),
        (L::UNDEFINED, L::GENERAL) => (
            S::TOP_OF_PIPE,
            A::empty(),
            S::FRAGMENT_SHADER | S::COMPUTE_SHADER,
            A::SHADER_READ | A::SHADER_WRITE,
        ),
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => (
            S::TOP_OF_PIPE,
            A::empty(),
            S::TRANSFER,
            A::TRANSFER_WRITE,
        ),
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => (
            S::TRANSFER,
            A::TRANSFER_WRITE,
            S::FRAGMENT_SHADER,
            A::SHADER_READ,
        ),
        (L::COLOR_ATTACHMENT_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => (
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_WRITE,
            S::FRAGMENT_SHADER,
            A::SHADER_READ,
        ),
        (L::COLOR_ATTACHMENT_OPTIMAL, L::PRESENT_SRC_KHR) => (
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_WRITE,
            S::BOTTOM_OF_PIPE,
            A::empty(),
        ),
        (old, new) => return Err(RhiError::InvalidTransition { old, new }),
    };

    Ok(TransitionMasks {
        src_stage,
        src_access,
        dst_stage,
        dst_access,
    })
}

fn subresource_range(aspect: vk::ImageAspectFlags, layers: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(layers)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 640,
        height: 480,
    };

    #[test]
    fn test_color_desc_defaults() {
        let desc = ImageDesc::color(EXTENT, vk::Format::R8G8B8A8_UNORM);
        assert_eq!(desc.aspect, vk::ImageAspectFlags::COLOR);
        assert_eq!(desc.layers, 1);
        assert!(!desc.is_multisampled());
        assert_eq!(desc.view_type(), vk::ImageViewType::TYPE_2D);
    }

    #[test]
    fn test_layered_desc_uses_array_view() {
        let desc = ImageDesc::depth(EXTENT, vk::Format::D32_SFLOAT)
            .with_layers(6)
            .with_samples(vk::SampleCountFlags::TYPE_4);
        assert_eq!(desc.view_type(), vk::ImageViewType::TYPE_2D_ARRAY);
        assert!(desc.is_multisampled());
    }

    #[test]
    fn test_transition_to_shader_read() {
        let masks = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(masks.dst_access, vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn test_unknown_transition_is_rejected() {
        let result = transition_masks(
            vk::ImageLayout::PRESENT_SRC_KHR,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        );
        assert!(matches!(
            result,
            Err(RhiError::InvalidTransition {
                old: vk::ImageLayout::PRESENT_SRC_KHR,
                ..
            })
        ));
    }

    #[test]
    fn test_image_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Image>();
    }
}
