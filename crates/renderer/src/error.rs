//! Renderer error types.

use framegraph_rhi::RhiError;
use thiserror::Error;

/// Errors raised while building or driving a render graph.
#[derive(Error, Debug)]
pub enum RenderError {
    /// A builder argument or graph description is invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An operation was called in the wrong lifecycle state
    #[error("State error: {0}")]
    State(String),

    /// A named resource or stage index does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The swapchain no longer matches the surface
    #[error("Surface out of date")]
    SurfaceOutOfDate,

    /// Recording, submission or presentation failed
    #[error("Submission error: {0}")]
    Submission(String),

    #[error(transparent)]
    Rhi(#[from] RhiError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RenderError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        RenderError::Configuration(msg.into())
    }

    pub(crate) fn state(msg: impl Into<String>) -> Self {
        RenderError::State(msg.into())
    }

    pub(crate) fn not_found(msg: impl Into<String>) -> Self {
        RenderError::NotFound(msg.into())
    }
}

/// Result type alias for renderer operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;
