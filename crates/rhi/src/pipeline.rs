//! Graphics pipeline management.
//!
//! - [`PipelineLayout`] wraps `VkPipelineLayout` (descriptor set layouts and
//!   push constant ranges)
//! - [`Pipeline`] wraps a graphics `VkPipeline`
//! - [`GraphicsPipelineBuilder`] assembles the fixed-function state for one
//!   subpass of a render pass
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::path::Path;
//! use ash::vk;
//! use framegraph_rhi::device::Device;
//! use framegraph_rhi::shader::{Shader, ShaderStage};
//! use framegraph_rhi::pipeline::{GraphicsPipelineBuilder, PipelineLayout};
//! use framegraph_rhi::vertex::Vertex;
//!
//! # fn example(device: Arc<Device>, render_pass: vk::RenderPass) -> Result<(), framegraph_rhi::RhiError> {
//! let vert = Shader::from_spirv_file(device.clone(), Path::new("simple.vert.spv"), ShaderStage::Vertex, "main")?;
//! let frag = Shader::from_spirv_file(device.clone(), Path::new("simple.frag.spv"), ShaderStage::Fragment, "main")?;
//! let layout = PipelineLayout::new(device.clone(), &[], &[])?;
//!
//! let pipeline = GraphicsPipelineBuilder::new()
//!     .shader(&vert)
//!     .shader(&frag)
//!     .vertex_binding(Vertex::binding_description())
//!     .vertex_attributes(&Vertex::attribute_descriptions())
//!     .color_attachment_count(1)
//!     .render_pass(render_pass, 0)
//!     .build(device, &layout)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::shader::Shader;

/// Vulkan pipeline layout wrapper.
pub struct PipelineLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    pub fn new(
        device: Arc<Device>,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(descriptor_set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };

        debug!(
            "Created pipeline layout with {} descriptor set layout(s) and {} push constant range(s)",
            descriptor_set_layouts.len(),
            push_constant_ranges.len()
        );

        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
        debug!("Pipeline layout destroyed");
    }
}

/// Vulkan graphics pipeline wrapper.
pub struct Pipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
}

impl Pipeline {
    fn create_graphics_internal(
        device: Arc<Device>,
        create_info: &vk::GraphicsPipelineCreateInfo,
    ) -> RhiResult<Self> {
        let pipelines = unsafe {
            device
                .handle()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[*create_info], None)
                .map_err(|(_, result)| result)?
        };

        let pipeline = pipelines.into_iter().next().ok_or_else(|| {
            RhiError::PipelineError("Driver returned no pipeline".to_string())
        })?;

        info!("Graphics pipeline created");

        Ok(Self { device, pipeline })
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        vk::PipelineBindPoint::GRAPHICS
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
        }
        info!("Graphics pipeline destroyed");
    }
}

/// Primitive topology for input assembly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    #[default]
    TriangleList,
    TriangleStrip,
}

impl PrimitiveTopology {
    pub fn to_vk(self) -> vk::PrimitiveTopology {
        match self {
            PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
            PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
            PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        }
    }
}

/// Face culling mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
    FrontAndBack,
}

impl CullMode {
    pub fn to_vk(self) -> vk::CullModeFlags {
        match self {
            CullMode::None => vk::CullModeFlags::NONE,
            CullMode::Front => vk::CullModeFlags::FRONT,
            CullMode::Back => vk::CullModeFlags::BACK,
            CullMode::FrontAndBack => vk::CullModeFlags::FRONT_AND_BACK,
        }
    }
}

/// Winding order that defines a front face.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrontFace {
    #[default]
    CounterClockwise,
    Clockwise,
}

impl FrontFace {
    pub fn to_vk(self) -> vk::FrontFace {
        match self {
            FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
            FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
        }
    }
}

/// Depth comparison operator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompareOp {
    Never,
    #[default]
    Less,
    Equal,
    LessOrEqual,
    Greater,
    Always,
}

impl CompareOp {
    pub fn to_vk(self) -> vk::CompareOp {
        match self {
            CompareOp::Never => vk::CompareOp::NEVER,
            CompareOp::Less => vk::CompareOp::LESS,
            CompareOp::Equal => vk::CompareOp::EQUAL,
            CompareOp::LessOrEqual => vk::CompareOp::LESS_OR_EQUAL,
            CompareOp::Greater => vk::CompareOp::GREATER,
            CompareOp::Always => vk::CompareOp::ALWAYS,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    #[default]
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
}

impl BlendFactor {
    pub fn to_vk(self) -> vk::BlendFactor {
        match self {
            BlendFactor::Zero => vk::BlendFactor::ZERO,
            BlendFactor::One => vk::BlendFactor::ONE,
            BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
            BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    Min,
    Max,
}

impl BlendOp {
    pub fn to_vk(self) -> vk::BlendOp {
        match self {
            BlendOp::Add => vk::BlendOp::ADD,
            BlendOp::Subtract => vk::BlendOp::SUBTRACT,
            BlendOp::Min => vk::BlendOp::MIN,
            BlendOp::Max => vk::BlendOp::MAX,
        }
    }
}

/// Per-attachment color blend state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorBlendAttachment {
    pub blend_enable: bool,
    pub src_color_blend_factor: BlendFactor,
    pub dst_color_blend_factor: BlendFactor,
    pub color_blend_op: BlendOp,
    pub src_alpha_blend_factor: BlendFactor,
    pub dst_alpha_blend_factor: BlendFactor,
    pub alpha_blend_op: BlendOp,
    pub color_write_mask: vk::ColorComponentFlags,
}

impl Default for ColorBlendAttachment {
    /// Blending disabled; source replaces destination (ONE / ZERO).
    fn default() -> Self {
        Self {
            blend_enable: false,
            src_color_blend_factor: BlendFactor::One,
            dst_color_blend_factor: BlendFactor::Zero,
            color_blend_op: BlendOp::Add,
            src_alpha_blend_factor: BlendFactor::One,
            dst_alpha_blend_factor: BlendFactor::Zero,
            alpha_blend_op: BlendOp::Add,
            color_write_mask: vk::ColorComponentFlags::RGBA,
        }
    }
}

impl ColorBlendAttachment {
    /// Additive color blending (ONE / ONE / ADD); alpha keeps the source
    /// value (ONE / ZERO / ADD).
    pub fn additive() -> Self {
        Self {
            blend_enable: true,
            dst_color_blend_factor: BlendFactor::One,
            ..Self::default()
        }
    }

    pub fn to_vk(&self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState {
            blend_enable: self.blend_enable.into(),
            src_color_blend_factor: self.src_color_blend_factor.to_vk(),
            dst_color_blend_factor: self.dst_color_blend_factor.to_vk(),
            color_blend_op: self.color_blend_op.to_vk(),
            src_alpha_blend_factor: self.src_alpha_blend_factor.to_vk(),
            dst_alpha_blend_factor: self.dst_alpha_blend_factor.to_vk(),
            alpha_blend_op: self.alpha_blend_op.to_vk(),
            color_write_mask: self.color_write_mask,
        }
    }
}

/// Depth test configuration for subpasses that have a depth attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthState {
    pub test_enable: bool,
    pub write_enable: bool,
    pub compare_op: CompareOp,
}

impl DepthState {
    /// Test and write enabled (or both disabled), LESS comparison.
    pub fn enabled(enable: bool) -> Self {
        Self {
            test_enable: enable,
            write_enable: enable,
            compare_op: CompareOp::Less,
        }
    }
}

/// Builder for graphics pipelines targeting one subpass of a render pass.
///
/// Defaults:
/// - Triangle list, fill mode, line width 1
/// - No culling, counter-clockwise front face
/// - One sample
/// - No depth state
/// - Dynamic viewport and scissor
pub struct GraphicsPipelineBuilder<'a> {
    shaders: Vec<&'a Shader>,
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    topology: PrimitiveTopology,
    cull_mode: CullMode,
    front_face: FrontFace,
    rasterization_samples: vk::SampleCountFlags,
    depth: Option<DepthState>,
    color_blend_attachments: Vec<ColorBlendAttachment>,
    dynamic_states: Vec<vk::DynamicState>,
    render_pass: vk::RenderPass,
    subpass: u32,
}

impl Default for GraphicsPipelineBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> GraphicsPipelineBuilder<'a> {
    pub fn new() -> Self {
        Self {
            shaders: Vec::new(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: PrimitiveTopology::TriangleList,
            cull_mode: CullMode::None,
            front_face: FrontFace::CounterClockwise,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            depth: None,
            color_blend_attachments: Vec::new(),
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
            render_pass: vk::RenderPass::null(),
            subpass: 0,
        }
    }

    /// Adds a shader stage; stages are passed to the driver in call order.
    pub fn shader(mut self, shader: &'a Shader) -> Self {
        self.shaders.push(shader);
        self
    }

    pub fn shaders(mut self, shaders: impl IntoIterator<Item = &'a Shader>) -> Self {
        self.shaders.extend(shaders);
        self
    }

    pub fn vertex_binding(mut self, binding: vk::VertexInputBindingDescription) -> Self {
        self.vertex_bindings.push(binding);
        self
    }

    pub fn vertex_attributes(mut self, attributes: &[vk::VertexInputAttributeDescription]) -> Self {
        self.vertex_attributes.extend_from_slice(attributes);
        self
    }

    pub fn topology(mut self, topology: PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn cull_mode(mut self, mode: CullMode) -> Self {
        self.cull_mode = mode;
        self
    }

    pub fn front_face(mut self, face: FrontFace) -> Self {
        self.front_face = face;
        self
    }

    pub fn rasterization_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.rasterization_samples = samples;
        self
    }

    /// Enables a depth-stencil state; leave unset for subpasses without depth.
    pub fn depth_state(mut self, depth: DepthState) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn color_blend_attachment(mut self, attachment: ColorBlendAttachment) -> Self {
        self.color_blend_attachments.push(attachment);
        self
    }

    /// Uses the default (non-blending) state for `count` color attachments.
    pub fn color_attachment_count(mut self, count: usize) -> Self {
        self.color_blend_attachments = vec![ColorBlendAttachment::default(); count];
        self
    }

    pub fn dynamic_state(mut self, state: vk::DynamicState) -> Self {
        if !self.dynamic_states.contains(&state) {
            self.dynamic_states.push(state);
        }
        self
    }

    pub fn render_pass(mut self, render_pass: vk::RenderPass, subpass: u32) -> Self {
        self.render_pass = render_pass;
        self.subpass = subpass;
        self
    }

    /// Builds the graphics pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::PipelineError`] if no shader or no render pass was
    /// set, or the Vulkan error if pipeline creation fails.
    pub fn build(self, device: Arc<Device>, layout: &PipelineLayout) -> RhiResult<Pipeline> {
        if self.shaders.is_empty() {
            return Err(RhiError::PipelineError(
                "At least one shader stage is required".to_string(),
            ));
        }
        if self.render_pass == vk::RenderPass::null() {
            return Err(RhiError::PipelineError(
                "A render pass is required".to_string(),
            ));
        }

        let specializations: Vec<Option<vk::SpecializationInfo>> = self
            .shaders
            .iter()
            .map(|shader| shader.specialization_info())
            .collect();
        let shader_stages: Vec<vk::PipelineShaderStageCreateInfo> = self
            .shaders
            .iter()
            .zip(&specializations)
            .map(|(shader, spec)| shader.stage_create_info(spec.as_ref()))
            .collect();

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.topology.to_vk())
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(self.cull_mode.to_vk())
            .front_face(self.front_face.to_vk())
            .depth_bias_enable(false);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(self.rasterization_samples);

        let depth_stencil_state = self.depth.map(|depth| {
            vk::PipelineDepthStencilStateCreateInfo::default()
                .depth_test_enable(depth.test_enable)
                .depth_write_enable(depth.write_enable)
                .depth_compare_op(depth.compare_op.to_vk())
                .depth_bounds_test_enable(false)
                .stencil_test_enable(false)
        });

        let color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = self
            .color_blend_attachments
            .iter()
            .map(|a| a.to_vk())
            .collect();

        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&self.dynamic_states);

        let mut pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .render_pass(self.render_pass)
            .subpass(self.subpass);

        if let Some(depth_stencil_state) = depth_stencil_state.as_ref() {
            pipeline_info = pipeline_info.depth_stencil_state(depth_stencil_state);
        }

        debug!(
            "Building pipeline: {} stage(s), {} color attachment(s), subpass {}, {:?}",
            shader_stages.len(),
            color_blend_attachments.len(),
            self.subpass,
            self.rasterization_samples
        );

        Pipeline::create_graphics_internal(device, &pipeline_info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cull_mode_to_vk() {
        assert_eq!(CullMode::None.to_vk(), vk::CullModeFlags::NONE);
        assert_eq!(CullMode::Front.to_vk(), vk::CullModeFlags::FRONT);
        assert_eq!(CullMode::Back.to_vk(), vk::CullModeFlags::BACK);
        assert_eq!(
            CullMode::FrontAndBack.to_vk(),
            vk::CullModeFlags::FRONT_AND_BACK
        );
    }

    #[test]
    fn test_topology_to_vk() {
        assert_eq!(
            PrimitiveTopology::PointList.to_vk(),
            vk::PrimitiveTopology::POINT_LIST
        );
        assert_eq!(
            PrimitiveTopology::TriangleList.to_vk(),
            vk::PrimitiveTopology::TRIANGLE_LIST
        );
    }

    #[test]
    fn test_default_blend_replaces() {
        let state = ColorBlendAttachment::default().to_vk();
        assert_eq!(state.blend_enable, vk::FALSE);
        assert_eq!(state.src_color_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(state.dst_color_blend_factor, vk::BlendFactor::ZERO);
        assert_eq!(state.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn test_additive_blend() {
        let state = ColorBlendAttachment::additive().to_vk();
        assert_eq!(state.blend_enable, vk::TRUE);
        assert_eq!(state.src_color_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(state.dst_color_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(state.color_blend_op, vk::BlendOp::ADD);
        assert_eq!(state.src_alpha_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(state.dst_alpha_blend_factor, vk::BlendFactor::ZERO);
    }

    #[test]
    fn test_depth_state() {
        let depth = DepthState::enabled(true);
        assert!(depth.test_enable && depth.write_enable);
        assert_eq!(depth.compare_op.to_vk(), vk::CompareOp::LESS);
        assert!(!DepthState::enabled(false).write_enable);
    }

    #[test]
    fn test_builder_defaults() {
        let builder = GraphicsPipelineBuilder::new();
        assert!(builder.shaders.is_empty());
        assert_eq!(builder.topology, PrimitiveTopology::TriangleList);
        assert_eq!(builder.cull_mode, CullMode::None);
        assert_eq!(builder.front_face, FrontFace::CounterClockwise);
        assert_eq!(builder.rasterization_samples, vk::SampleCountFlags::TYPE_1);
        assert!(builder.depth.is_none());
        assert_eq!(builder.dynamic_states.len(), 2);
    }

    #[test]
    fn test_builder_color_attachments_and_subpass() {
        let builder = GraphicsPipelineBuilder::new()
            .color_attachment_count(3)
            .render_pass(vk::RenderPass::null(), 2)
            .dynamic_state(vk::DynamicState::VIEWPORT);
        assert_eq!(builder.color_blend_attachments.len(), 3);
        assert_eq!(builder.subpass, 2);
        assert_eq!(builder.dynamic_states.len(), 2);
    }
}
