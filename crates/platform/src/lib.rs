//! Window and presentation surface for the framegraph demo.
//!
//! - winit window with size tracking
//! - Surface extensions and `VkSurfaceKHR` creation through ash-window

mod window;

pub use window::{Surface, Window};

// Re-export winit types the event loop needs
pub use winit::event::WindowEvent;
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
