//! Application-level error type shared by the platform layer and the demo.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Window creation or event loop failure
    #[error("Window error: {0}")]
    Window(String),

    /// Surface creation failure
    #[error("Surface error: {0}")]
    Surface(String),

    /// Malformed or inconsistent runtime configuration
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
