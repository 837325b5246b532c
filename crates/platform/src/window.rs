//! winit window and the Vulkan surface presented into it.

use std::ffi::{CStr, c_char};
use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use framegraph_core::{Error, Result};

/// Owned `VkSurfaceKHR`, destroyed on drop.
///
/// The instance it was created from must outlive it.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Loader for capability, format and present-mode queries.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: the handle was created by ash_window from the loader's
        // instance and is destroyed only here.
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
        debug!("Vulkan surface destroyed");
    }
}

/// Resizable application window tracking its physical size.
pub struct Window {
    window: Arc<WinitWindow>,
    width: u32,
    height: u32,
}

impl Window {
    pub fn new(event_loop: &ActiveEventLoop, width: u32, height: u32, title: &str) -> Result<Self> {
        let attrs = WindowAttributes::default()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attrs)
            .map_err(|e| Error::Window(e.to_string()))?;

        let size = window.inner_size();
        info!("Window '{}' created: {}x{}", title, size.width, size.height);

        Ok(Self {
            window: Arc::new(window),
            width: size.width,
            height: size.height,
        })
    }

    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Records the new size from a `Resized` event.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        debug!("Window resized: {}x{}", width, height);
    }

    /// Zero-sized while minimized.
    pub fn is_minimized(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Instance extensions needed to create a surface for this window.
    ///
    /// The pointers reference static strings owned by ash-window.
    pub fn required_extensions(&self) -> Result<Vec<*const c_char>> {
        let display = self
            .window
            .display_handle()
            .map_err(|e| Error::Surface(format!("No display handle: {}", e)))?;

        let extensions = ash_window::enumerate_required_extensions(display.as_raw())
            .map_err(|e| Error::Surface(format!("Cannot enumerate surface extensions: {}", e)))?;

        debug!(
            "Surface extensions: {:?}",
            extensions
                .iter()
                // SAFETY: ash-window returns NUL-terminated static strings.
                .map(|&ext| unsafe { CStr::from_ptr(ext) })
                .collect::<Vec<_>>()
        );

        Ok(extensions.to_vec())
    }

    /// Creates a surface for this window on `instance`.
    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        let display = self
            .window
            .display_handle()
            .map_err(|e| Error::Surface(format!("No display handle: {}", e)))?;
        let window = self
            .window
            .window_handle()
            .map_err(|e| Error::Surface(format!("No window handle: {}", e)))?;

        // SAFETY: entry and instance are live; the handles come from a winit
        // window that outlives the surface.
        let handle = unsafe {
            ash_window::create_surface(entry, instance, display.as_raw(), window.as_raw(), None)
                .map_err(|e| Error::Surface(format!("vkCreateSurfaceKHR failed: {}", e)))?
        };
        let loader = ash::khr::surface::Instance::new(entry, instance);

        info!("Vulkan surface created");
        Ok(Surface { handle, loader })
    }
}
