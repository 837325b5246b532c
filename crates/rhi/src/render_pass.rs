//! Render pass and framebuffer wrappers.
//!
//! The render pass is assembled by the caller from plain Vulkan attachment,
//! subpass and dependency descriptions; these types only own the handles.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Vulkan render pass wrapper.
pub struct RenderPass {
    device: Arc<Device>,
    render_pass: vk::RenderPass,
    subpass_count: u32,
}

impl RenderPass {
    /// Creates a render pass.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidArgument`] when `subpasses` is empty, or
    /// the Vulkan error on failure.
    pub fn new(
        device: Arc<Device>,
        attachments: &[vk::AttachmentDescription],
        subpasses: &[vk::SubpassDescription],
        dependencies: &[vk::SubpassDependency],
    ) -> RhiResult<Self> {
        if subpasses.is_empty() {
            return Err(RhiError::InvalidArgument(
                "A render pass needs at least one subpass".to_string(),
            ));
        }

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(attachments)
            .subpasses(subpasses)
            .dependencies(dependencies);

        let render_pass = unsafe { device.handle().create_render_pass(&create_info, None)? };

        info!(
            "Render pass created: {} attachment(s), {} subpass(es), {} dependency(ies)",
            attachments.len(),
            subpasses.len(),
            dependencies.len()
        );

        Ok(Self {
            device,
            render_pass,
            subpass_count: subpasses.len() as u32,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    #[inline]
    pub fn subpass_count(&self) -> u32 {
        self.subpass_count
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_render_pass(self.render_pass, None);
        }
        debug!("Render pass destroyed");
    }
}

/// Vulkan framebuffer wrapper.
pub struct Framebuffer {
    device: Arc<Device>,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl Framebuffer {
    /// Creates a framebuffer; `views` must follow the render pass attachment
    /// order.
    pub fn new(
        device: Arc<Device>,
        render_pass: &RenderPass,
        views: &[vk::ImageView],
        extent: vk::Extent2D,
        layers: u32,
    ) -> RhiResult<Self> {
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.handle())
            .attachments(views)
            .width(extent.width)
            .height(extent.height)
            .layers(layers.max(1));

        let framebuffer = unsafe { device.handle().create_framebuffer(&create_info, None)? };

        debug!(
            "Framebuffer created: {}x{}, {} attachment(s)",
            extent.width,
            extent.height,
            views.len()
        );

        Ok(Self {
            device,
            framebuffer,
            extent,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_framebuffer(self.framebuffer, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_pass_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RenderPass>();
        assert_send_sync::<Framebuffer>();
    }
}
