//! Vulkan instance management.
//!
//! Creates the `VkInstance`, optionally enables the Khronos validation layer
//! and routes its messages into `tracing`.
//!
//! # Example
//!
//! ```no_run
//! use framegraph_rhi::instance::Instance;
//!
//! // Surface extensions normally come from the windowing layer.
//! let instance = Instance::new(cfg!(debug_assertions), &[]).expect("Failed to create Vulkan instance");
//! let vk_instance = instance.handle();
//! ```

use std::ffi::{CStr, c_char};

use ash::{Entry, vk};
use tracing::{debug, error, info, warn};

use crate::error::RhiError;

/// The Khronos validation layer name.
const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Vulkan instance wrapper with optional validation layer support.
///
/// When validation is enabled the `VK_EXT_debug_utils` extension is loaded as
/// well; [`Instance::has_debug_utils`] tells the device layer whether command
/// buffer labels can be recorded.
pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    /// Debug utils extension loader (only present when validation is enabled)
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl Instance {
    /// Creates a new Vulkan instance.
    ///
    /// # Arguments
    ///
    /// * `enable_validation` - If true, enables validation layers and the debug messenger
    /// * `surface_extensions` - Platform surface extensions required by the window
    ///
    /// # Errors
    ///
    /// Returns an error if the Vulkan library cannot be loaded or instance
    /// creation fails.
    pub fn new(
        enable_validation: bool,
        surface_extensions: &[*const c_char],
    ) -> Result<Self, RhiError> {
        let entry = unsafe { Entry::load()? };

        let validation_available =
            enable_validation && Self::is_validation_layer_available(&entry)?;
        if enable_validation && !validation_available {
            warn!("Validation layer requested but not available, proceeding without it");
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"framegraph")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"framegraph")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        let extensions = Self::required_extensions(surface_extensions, validation_available);

        let layers = if validation_available {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None)? };

        info!(
            "Vulkan instance created (API 1.2, {} extension(s))",
            extensions.len()
        );

        let (debug_utils, debug_messenger) = if validation_available {
            let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = Self::setup_debug_messenger(&debug_utils)?;
            info!("Validation layers enabled, debug messenger installed");
            (Some(debug_utils), Some(messenger))
        } else {
            (None, None)
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
            debug_messenger,
        })
    }

    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// Returns whether validation layers are enabled.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug_messenger.is_some()
    }

    /// Returns whether `VK_EXT_debug_utils` was enabled on this instance.
    #[inline]
    pub fn has_debug_utils(&self) -> bool {
        self.debug_utils.is_some()
    }

    /// Surface extensions plus debug utils when validation is on.
    ///
    /// `surface_extensions` is the list reported by the windowing layer and
    /// already contains `VK_KHR_surface`.
    fn required_extensions(
        surface_extensions: &[*const c_char],
        with_debug_utils: bool,
    ) -> Vec<*const c_char> {
        let mut extensions = surface_extensions.to_vec();
        if with_debug_utils {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }
        extensions
    }

    fn is_validation_layer_available(entry: &Entry) -> Result<bool, RhiError> {
        let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };

        let found = available_layers.iter().any(|layer| {
            layer
                .layer_name_as_c_str()
                .is_ok_and(|name| name == VALIDATION_LAYER_NAME)
        });
        debug!("Validation layer available: {}", found);

        Ok(found)
    }

    fn setup_debug_messenger(
        debug_utils: &ash::ext::debug_utils::Instance,
    ) -> Result<vk::DebugUtilsMessengerEXT, RhiError> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None)? };

        Ok(messenger)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

/// Forwards validation layer messages to `tracing`.
///
/// # Safety
///
/// Called by the Vulkan loader with a valid callback data pointer or null.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let type_str = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "General",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "Validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "Performance",
        _ => "Unknown",
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            error!(target: "vulkan", "[{}] {}", type_str, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            warn!(target: "vulkan", "[{}] {}", type_str, message);
        }
        _ => {
            debug!(target: "vulkan", "[{}] {}", type_str, message);
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_extensions_passthrough() {
        let given = [
            ash::khr::surface::NAME.as_ptr(),
            ash::khr::xlib_surface::NAME.as_ptr(),
        ];
        assert_eq!(Instance::required_extensions(&given, false).len(), 2);
    }

    #[test]
    fn test_required_extensions_with_debug_utils() {
        let given = [ash::khr::surface::NAME.as_ptr()];
        let extensions = Instance::required_extensions(&given, true);
        assert_eq!(extensions.len(), 2);
        assert_eq!(extensions[0], given[0]);
    }

    #[test]
    fn test_instance_creation_without_validation() {
        // Requires a Vulkan loader; skipped otherwise
        match Instance::new(false, &[]) {
            Ok(instance) => {
                assert!(!instance.has_validation());
                assert!(!instance.has_debug_utils());
            }
            Err(RhiError::LoadingError(_)) => {
                eprintln!("Skipping test: Vulkan not available");
            }
            Err(e) => {
                eprintln!("Skipping test: instance creation failed: {:?}", e);
            }
        }
    }
}
