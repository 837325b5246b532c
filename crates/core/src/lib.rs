//! Shared utilities for the framegraph crates.
//!
//! - Application error type and result alias
//! - Logging initialization
//! - Frame timing
//! - Runtime configuration

mod config;
mod error;
mod logging;
mod timer;

pub use config::RendererConfig;
pub use error::{Error, Result};
pub use logging::{DEFAULT_FILTER, init_logging};
pub use timer::{FrameStats, FrameTimer};
