//! Render-graph construction and frame pipelining.
//!
//! - [`ResourceBindingSet`]: named buffers and images replicated per frame in
//!   flight behind one descriptor set layout
//! - [`RenderGraphOutput`]: a render pass whose subpasses (stages) and
//!   dependencies are derived from declared attachments
//! - [`RenderStep`]: a graphics pipeline built against one stage
//! - [`FrameDriver`]: acquire, record, submit and present across N slots
//! - [`SimpleRenderer`] and [`ForwardRenderer`] wire the pieces to a window

mod error;

pub mod binding_set;
pub mod draw;
pub mod frame_driver;
pub mod graph;
pub mod output;
pub mod renderers;
pub mod shader_scan;
pub mod step;
pub mod uniforms;

pub use binding_set::{DescriptorKind, ResourceBindingSet};
pub use draw::{DrawConstants, DrawList, DrawSource, Drawable, GpuMesh, PointLight};
pub use error::{RenderError, RenderResult};
pub use frame_driver::{
    FrameBackend, FrameContext, FrameDriver, FrameOutcome, FrameState, VulkanFrameBackend,
};
pub use graph::{AttachmentRef, ClearValue};
pub use output::RenderGraphOutput;
pub use renderers::{ForwardRenderer, Renderer, SimpleRenderer};
pub use shader_scan::BindingRegistry;
pub use step::{DrawRecorder, RenderMode, RenderStep, SceneCounts, record_draws};
pub use uniforms::{Camera, CameraUniforms};
