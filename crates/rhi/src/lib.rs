//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! Thin ownership wrappers over `ash`:
//! - Instance, physical device selection and logical device with its
//!   gpu-allocator instance
//! - Command pools/buffers and synchronization primitives
//! - Buffers, images, samplers and descriptor objects
//! - Render passes, framebuffers, shaders and graphics pipelines
//! - Swapchain management

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod render_pass;
pub mod sampler;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vertex;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
