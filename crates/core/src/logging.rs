//! Logging initialization.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Default directives used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info,framegraph=debug,framegraph_renderer=debug,framegraph_rhi=info";

/// Install the global tracing subscriber.
///
/// Filtering follows `RUST_LOG` and falls back to [`DEFAULT_FILTER`]. Calling
/// this more than once is harmless; only the first subscriber is kept.
///
/// # Example
/// ```
/// framegraph_core::init_logging();
/// tracing::info!("frame driver ready");
/// ```
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();

    if installed.is_err() {
        tracing::debug!("Global subscriber already installed, keeping the existing one");
    }
}
