//! RHI-specific error types.

use thiserror::Error;

/// Errors raised by the Vulkan wrapper layer.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load the Vulkan library
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// Shader module creation or SPIR-V loading error
    #[error("Shader error: {0}")]
    ShaderError(String),

    #[error("Surface error: {0}")]
    SurfaceError(String),

    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Pipeline or pipeline layout creation error
    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// Argument outside the range the object supports
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No supported format among the candidates
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Image layout transition missing from the barrier table
    #[error("Unsupported layout transition: {old:?} -> {new:?}")]
    InvalidTransition {
        old: ash::vk::ImageLayout,
        new: ash::vk::ImageLayout,
    },

    /// Host access to memory that is not mapped
    #[error("Memory not host visible: {0}")]
    NotHostVisible(String),

    /// Allocator mutex poisoned by a panicking thread
    #[error("Allocator lock poisoned")]
    AllocatorPoisoned,
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;
