//! Render steps: a graphics pipeline bound to one stage of an output.
//!
//! A step is configured in three phases:
//! 1. [`create_pipeline`](RenderStep::create_pipeline) loads the shaders and
//!    works out which binding sets they need from their include markers
//! 2. setters adjust fixed-function state
//! 3. [`build`](RenderStep::build) creates the pipeline against a stage of an
//!    initialized [`RenderGraphOutput`]
//!
//! Per frame, `start` binds the pipeline and the frame's descriptor sets,
//! `render` issues the draws of the render mode and `end` closes the step.

use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::vk;
use framegraph_rhi::command::CommandBuffer;
use framegraph_rhi::device::Device;
use framegraph_rhi::pipeline::{
    ColorBlendAttachment, CullMode, DepthState, GraphicsPipelineBuilder, Pipeline, PipelineLayout,
    PrimitiveTopology,
};
use framegraph_rhi::shader::{Shader, ShaderStage, Specialization};
use framegraph_rhi::vertex::Vertex;
use glam::Mat4;
use tracing::{debug, info, warn};

use crate::binding_set::ResourceBindingSet;
use crate::draw::{DrawConstants, DrawSource, GpuMesh};
use crate::error::{RenderError, RenderResult};
use crate::output::RenderGraphOutput;
use crate::shader_scan::{BindingRegistry, RequiredSets};

/// What a step draws.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RenderMode {
    /// Every drawable of the scene, with the mesh vertex layout.
    #[default]
    Meshes,
    /// Three vertices generated in the vertex shader.
    FullScreenTriangle,
    /// `count` points without vertex input.
    Points(u32),
    /// One proxy per scene light, `count` vertices each, generated in the
    /// vertex shader from the light transform pushed before the draw.
    Lights(u32),
}

impl RenderMode {
    pub fn topology(self) -> PrimitiveTopology {
        match self {
            RenderMode::Meshes | RenderMode::FullScreenTriangle | RenderMode::Lights(_) => {
                PrimitiveTopology::TriangleList
            }
            RenderMode::Points(_) => PrimitiveTopology::PointList,
        }
    }

    pub fn uses_vertex_input(self) -> bool {
        self == RenderMode::Meshes
    }
}

/// Array sizes handed to every shader stage as specialization constants
/// 0 (materials), 1 (lights) and 2 (meshes).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SceneCounts {
    pub materials: u32,
    pub lights: u32,
    pub meshes: u32,
}

impl SceneCounts {
    pub fn constants(&self) -> [u32; 3] {
        [self.materials, self.lights, self.meshes]
    }

    pub fn specialization(&self) -> Specialization {
        Specialization::from_u32_constants(&self.constants())
    }
}

/// Pipeline stage of a shader source file.
pub fn stage_for_file(file: &str) -> RenderResult<ShaderStage> {
    ShaderStage::from_file_name(file).ok_or_else(|| {
        RenderError::config(format!(
            "Cannot tell the shader stage of '{}': expected .vert, .geom, .frag or .comp",
            file
        ))
    })
}

/// Path of the compiled SPIR-V next to a shader source.
pub fn spirv_path(shader_dir: &Path, file: &str) -> PathBuf {
    shader_dir.join(format!("{}.spv", file))
}

pub fn push_constant_range() -> vk::PushConstantRange {
    vk::PushConstantRange::default()
        .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
        .offset(0)
        .size(DrawConstants::SIZE as u32)
}

pub fn blend_attachments(count: usize, blending: bool) -> Vec<ColorBlendAttachment> {
    let attachment = if blending {
        ColorBlendAttachment::additive()
    } else {
        ColorBlendAttachment::default()
    };
    vec![attachment; count]
}

/// Descriptor sets a step binds at set 0 onwards during frame slot `frame`.
///
/// A step that uses no binding sets binds nothing; otherwise the slot must
/// have been resolved by `create_pipeline`.
pub fn frame_sets_for(
    frame_sets: &[Vec<vk::DescriptorSet>],
    set_count: usize,
    frame: usize,
) -> RenderResult<&[vk::DescriptorSet]> {
    if set_count == 0 {
        return Ok(&[]);
    }
    frame_sets.get(frame).map(Vec::as_slice).ok_or_else(|| {
        RenderError::state(format!(
            "Frame slot {} has no descriptor sets ({} resolved)",
            frame,
            frame_sets.len()
        ))
    })
}

/// Receives the push constants and draws of a render mode.
pub trait DrawRecorder {
    fn push_constants(&mut self, constants: &DrawConstants);

    /// Indexed draw of every index of `mesh`.
    fn draw_mesh(&mut self, mesh: &GpuMesh);

    /// Non-indexed draw of `vertex_count` vertices without vertex buffers.
    fn draw(&mut self, vertex_count: u32);
}

/// Records into a command buffer under a pipeline layout.
struct CommandRecorder<'a> {
    cmd: &'a CommandBuffer,
    layout: vk::PipelineLayout,
}

impl DrawRecorder for CommandRecorder<'_> {
    fn push_constants(&mut self, constants: &DrawConstants) {
        let stages = vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT;
        self.cmd.push_constants(self.layout, stages, 0, constants);
    }

    fn draw_mesh(&mut self, mesh: &GpuMesh) {
        mesh.draw(self.cmd);
    }

    fn draw(&mut self, vertex_count: u32) {
        self.cmd.draw(vertex_count, 1, 0, 0);
    }
}

/// Issues the draws of `mode` for `scene`.
pub fn record_draws<S, R>(mode: RenderMode, scene: &S, recorder: &mut R)
where
    S: DrawSource,
    R: DrawRecorder,
{
    match mode {
        RenderMode::Meshes => {
            for drawable in scene.drawables() {
                recorder.push_constants(&drawable.constants());
                recorder.draw_mesh(drawable.mesh);
            }
        }
        RenderMode::FullScreenTriangle => {
            recorder.push_constants(&DrawConstants::new(Mat4::IDENTITY, 0));
            recorder.draw(3);
        }
        RenderMode::Points(count) => {
            recorder.push_constants(&DrawConstants::new(Mat4::IDENTITY, 0));
            recorder.draw(count);
        }
        RenderMode::Lights(count) => {
            // The light index stands in for the material index.
            for (index, light) in scene.lights().enumerate() {
                recorder.push_constants(&DrawConstants::new(light.transform(), index as u32));
                recorder.draw(count);
            }
        }
    }
}

/// Pipeline objects, declared in teardown order.
struct BuiltStep {
    pipeline: Pipeline,
    layout: PipelineLayout,
    stage: usize,
    /// Output input sets, one per framebuffer target.
    input_sets: Vec<vk::DescriptorSet>,
}

/// Graphics pipeline recording into one stage of a render-graph output.
pub struct RenderStep {
    device: Arc<Device>,
    label: CString,
    shader_dir: PathBuf,
    cull_mode: CullMode,
    blending: bool,
    use_depth: bool,
    render_mode: RenderMode,
    shaders: Vec<Shader>,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    /// Binding set handles per frame slot, in pipeline set order.
    frame_sets: Vec<Vec<vk::DescriptorSet>>,
    built: Option<BuiltStep>,
}

impl RenderStep {
    pub fn new(device: Arc<Device>, shader_dir: impl Into<PathBuf>) -> Self {
        Self {
            device,
            label: c"Render Step".to_owned(),
            shader_dir: shader_dir.into(),
            cull_mode: CullMode::None,
            blending: false,
            use_depth: true,
            render_mode: RenderMode::Meshes,
            shaders: Vec::new(),
            set_layouts: Vec::new(),
            frame_sets: Vec::new(),
            built: None,
        }
    }

    fn ensure_unbuilt(&self, what: &str) -> RenderResult<()> {
        if self.built.is_some() {
            return Err(RenderError::state(format!(
                "Cannot {} of '{}' after build",
                what,
                self.name()
            )));
        }
        Ok(())
    }

    /// Sets the name shown in debug labels.
    pub fn set_name(&mut self, name: &str) -> RenderResult<()> {
        self.ensure_unbuilt("rename")?;
        self.label = CString::new(name)
            .map_err(|_| RenderError::config(format!("Step name '{}' contains NUL", name)))?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        self.label.to_str().unwrap_or("<step>")
    }

    /// Loads `shader_files` and resolves the binding sets they include.
    ///
    /// Each file's stage comes from its suffix; its source is scanned for
    /// include markers and its SPIR-V is read from `<file>.spv` in the shader
    /// directory. Pipeline set `k` is the `k`-th binding set named by the
    /// markers, in first-seen order across files.
    pub fn create_pipeline(
        &mut self,
        shader_files: &[&str],
        binding_sets: &[&ResourceBindingSet],
        registry: &BindingRegistry,
        scene_counts: SceneCounts,
    ) -> RenderResult<()> {
        self.ensure_unbuilt("create the pipeline")?;
        if shader_files.is_empty() {
            return Err(RenderError::config("A step needs at least one shader"));
        }

        let mut stages = Vec::with_capacity(shader_files.len());
        let mut required = RequiredSets::new(registry);
        for file in shader_files {
            stages.push(stage_for_file(file)?);
            let source = std::fs::read_to_string(self.shader_dir.join(file))?;
            required.scan(&source)?;
        }
        let required = required.finish(binding_sets.len())?;

        let mut set_layouts = Vec::with_capacity(required.len());
        for &index in &required {
            set_layouts.push(binding_sets[index as usize].layout()?);
        }
        let frames = required
            .iter()
            .map(|&index| binding_sets[index as usize].frames_in_flight())
            .min()
            .unwrap_or(0);
        let mut frame_sets = Vec::with_capacity(frames);
        for frame in 0..frames {
            let sets = required
                .iter()
                .map(|&index| binding_sets[index as usize].set(frame))
                .collect::<RenderResult<Vec<_>>>()?;
            frame_sets.push(sets);
        }

        let mut shaders = Vec::with_capacity(shader_files.len());
        for (file, stage) in shader_files.iter().zip(stages) {
            let shader = Shader::from_spirv_file(
                self.device.clone(),
                &spirv_path(&self.shader_dir, file),
                stage,
                "main",
            )?
            .with_specialization(scene_counts.specialization());
            shaders.push(shader);
        }

        debug!(
            "Step '{}' uses binding sets {:?} with {} shader(s)",
            self.name(),
            required,
            shaders.len()
        );

        self.shaders = shaders;
        self.set_layouts = set_layouts;
        self.frame_sets = frame_sets;
        Ok(())
    }

    pub fn set_cull_mode(&mut self, cull_mode: CullMode) -> RenderResult<()> {
        self.ensure_unbuilt("set the cull mode")?;
        self.cull_mode = cull_mode;
        Ok(())
    }

    /// Switches additive blending on every color attachment.
    pub fn enable_blending(&mut self, enable: bool) -> RenderResult<()> {
        self.ensure_unbuilt("change blending")?;
        self.blending = enable;
        Ok(())
    }

    /// Enables depth test and write on stages that have depth (default on).
    pub fn set_use_depth(&mut self, use_depth: bool) -> RenderResult<()> {
        self.ensure_unbuilt("change depth usage")?;
        self.use_depth = use_depth;
        Ok(())
    }

    pub fn set_render_mode(&mut self, mode: RenderMode) -> RenderResult<()> {
        self.ensure_unbuilt("set the render mode")?;
        self.render_mode = mode;
        Ok(())
    }

    /// Creates the pipeline for `stage` of `output`.
    pub fn build(&mut self, output: &RenderGraphOutput, stage: usize) -> RenderResult<()> {
        self.ensure_unbuilt("build")?;
        if self.shaders.is_empty() {
            return Err(RenderError::state(format!(
                "Step '{}' has no pipeline; call create_pipeline first",
                self.name()
            )));
        }

        let render_pass = output.render_pass()?;
        let color_count = output.color_attachment_count(stage)?;
        let uses_depth = output.stage_uses_depth(stage)?;
        let multisampled = output.stage_multisampled(stage)?;

        let mut set_layouts = self.set_layouts.clone();
        let mut input_sets = Vec::new();
        if output.stage_has_inputs(stage)? {
            set_layouts.push(output.input_set_layout(stage)?);
            for target in 0..output.target_count() {
                input_sets.push(output.input_set(stage, target)?);
            }
        }

        let layout = PipelineLayout::new(self.device.clone(), &set_layouts, &[push_constant_range()])?;

        let samples = if multisampled {
            output.sample_count()
        } else {
            vk::SampleCountFlags::TYPE_1
        };
        let mut builder = GraphicsPipelineBuilder::new()
            .shaders(self.shaders.iter())
            .topology(self.render_mode.topology())
            .cull_mode(self.cull_mode)
            .rasterization_samples(samples)
            .render_pass(render_pass, stage as u32);
        if self.render_mode.uses_vertex_input() {
            builder = builder
                .vertex_binding(Vertex::binding_description())
                .vertex_attributes(&Vertex::attribute_descriptions());
        }
        if uses_depth {
            builder = builder.depth_state(DepthState::enabled(self.use_depth));
        }
        for attachment in blend_attachments(color_count, self.blending) {
            builder = builder.color_blend_attachment(attachment);
        }

        let pipeline = builder.build(self.device.clone(), &layout)?;

        info!(
            "Step '{}' built for stage {} ({} color attachment(s), depth: {}, {:?})",
            self.name(),
            stage,
            color_count,
            uses_depth,
            samples
        );

        self.built = Some(BuiltStep {
            pipeline,
            layout,
            stage,
            input_sets,
        });
        Ok(())
    }

    fn built(&self) -> RenderResult<&BuiltStep> {
        self.built
            .as_ref()
            .ok_or_else(|| RenderError::state(format!("Step '{}' is not built", self.name())))
    }

    /// Opens the debug label, binds the pipeline and the descriptor sets of
    /// frame slot `frame`.
    pub fn start(&self, cmd: &CommandBuffer, frame: usize) -> RenderResult<()> {
        let built = self.built()?;
        let sets = frame_sets_for(&self.frame_sets, self.set_layouts.len(), frame)?;

        cmd.begin_label(&self.label);
        cmd.bind_pipeline(built.pipeline.bind_point(), built.pipeline.handle());

        if !sets.is_empty() {
            cmd.bind_descriptor_sets(built.pipeline.bind_point(), built.layout.handle(), 0, sets);
        }
        if !built.input_sets.is_empty() {
            let input = built.input_sets[frame.min(built.input_sets.len() - 1)];
            cmd.bind_descriptor_sets(
                built.pipeline.bind_point(),
                built.layout.handle(),
                self.set_layouts.len() as u32,
                &[input],
            );
        }
        Ok(())
    }

    /// Issues the draw calls of the render mode.
    pub fn render<S: DrawSource>(&self, cmd: &CommandBuffer, scene: &S) -> RenderResult<()> {
        let built = self.built()?;
        let mut recorder = CommandRecorder {
            cmd,
            layout: built.layout.handle(),
        };
        record_draws(self.render_mode, scene, &mut recorder);
        Ok(())
    }

    pub fn end(&self, cmd: &CommandBuffer) -> RenderResult<()> {
        self.built()?;
        cmd.end_label();
        Ok(())
    }

    pub fn stage(&self) -> Option<usize> {
        self.built.as_ref().map(|built| built.stage)
    }

    pub fn render_mode(&self) -> RenderMode {
        self.render_mode
    }

    pub fn is_built(&self) -> bool {
        self.built.is_some()
    }

    /// Destroys pipeline, pipeline layout and shader modules, in that order.
    pub fn destroy(&mut self) {
        let was_built = self.built.take().is_some();
        self.shaders.clear();
        self.set_layouts.clear();
        self.frame_sets.clear();
        if was_built {
            info!("Step '{}' destroyed", self.name());
        }
    }
}

impl Drop for RenderStep {
    fn drop(&mut self) {
        if self.built.is_some() {
            warn!(
                "Step '{}' dropped without destroy(), tearing down implicitly",
                self.name()
            );
            self.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draw::{DrawList, PointLight};
    use glam::{Vec3, Vec4};

    #[test]
    fn test_stage_for_file() {
        assert_eq!(stage_for_file("forward.vert").unwrap(), ShaderStage::Vertex);
        assert_eq!(stage_for_file("forward.frag").unwrap(), ShaderStage::Fragment);
        assert!(matches!(
            stage_for_file("forward.hlsl"),
            Err(RenderError::Configuration(_))
        ));
    }

    #[test]
    fn test_spirv_path() {
        assert_eq!(
            spirv_path(Path::new("shaders"), "simple.vert"),
            PathBuf::from("shaders/simple.vert.spv")
        );
    }

    #[test]
    fn test_render_mode_topology() {
        assert_eq!(RenderMode::default(), RenderMode::Meshes);
        assert_eq!(
            RenderMode::Meshes.topology(),
            PrimitiveTopology::TriangleList
        );
        assert_eq!(
            RenderMode::FullScreenTriangle.topology(),
            PrimitiveTopology::TriangleList
        );
        assert_eq!(RenderMode::Points(64).topology(), PrimitiveTopology::PointList);
        assert_eq!(
            RenderMode::Lights(36).topology(),
            PrimitiveTopology::TriangleList
        );
        assert!(RenderMode::Meshes.uses_vertex_input());
        assert!(!RenderMode::FullScreenTriangle.uses_vertex_input());
        assert!(!RenderMode::Lights(36).uses_vertex_input());
    }

    #[derive(Debug, PartialEq)]
    enum Recorded {
        Push(DrawConstants),
        Mesh(u32),
        Draw(u32),
    }

    #[derive(Default)]
    struct ScriptedRecorder {
        calls: Vec<Recorded>,
    }

    impl DrawRecorder for ScriptedRecorder {
        fn push_constants(&mut self, constants: &DrawConstants) {
            self.calls.push(Recorded::Push(*constants));
        }

        fn draw_mesh(&mut self, mesh: &GpuMesh) {
            self.calls.push(Recorded::Mesh(mesh.index_count()));
        }

        fn draw(&mut self, vertex_count: u32) {
            self.calls.push(Recorded::Draw(vertex_count));
        }
    }

    fn two_lights() -> DrawList {
        let mut scene = DrawList::new();
        scene.add_light(PointLight {
            position: Vec4::new(1.0, 2.0, 3.0, 0.5),
            color: Vec4::ONE,
        });
        scene.add_light(PointLight {
            position: Vec4::new(-4.0, 0.0, 0.0, 2.0),
            color: Vec4::ONE,
        });
        scene
    }

    #[test]
    fn test_light_mode_draws_one_proxy_per_light() {
        let scene = two_lights();
        let mut recorder = ScriptedRecorder::default();
        record_draws(RenderMode::Lights(36), &scene, &mut recorder);

        let first = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)) * Mat4::from_scale(Vec3::splat(0.5));
        let second = Mat4::from_translation(Vec3::new(-4.0, 0.0, 0.0)) * Mat4::from_scale(Vec3::splat(2.0));
        assert_eq!(
            recorder.calls,
            vec![
                Recorded::Push(DrawConstants::new(first, 0)),
                Recorded::Draw(36),
                Recorded::Push(DrawConstants::new(second, 1)),
                Recorded::Draw(36),
            ]
        );
    }

    #[test]
    fn test_light_mode_without_lights_draws_nothing() {
        let mut recorder = ScriptedRecorder::default();
        record_draws(RenderMode::Lights(36), &DrawList::new(), &mut recorder);
        assert!(recorder.calls.is_empty());
    }

    #[test]
    fn test_screen_modes_ignore_the_scene() {
        let scene = two_lights();
        let mut recorder = ScriptedRecorder::default();
        record_draws(RenderMode::FullScreenTriangle, &scene, &mut recorder);
        record_draws(RenderMode::Points(64), &scene, &mut recorder);
        record_draws(RenderMode::Meshes, &scene, &mut recorder);

        let identity = DrawConstants::new(Mat4::IDENTITY, 0);
        assert_eq!(
            recorder.calls,
            vec![
                Recorded::Push(identity),
                Recorded::Draw(3),
                Recorded::Push(identity),
                Recorded::Draw(64),
            ]
        );
    }

    #[test]
    fn test_frame_sets_out_of_range() {
        let set = vk::DescriptorSet::null();
        let frame_sets = vec![vec![set], vec![set]];
        assert_eq!(frame_sets_for(&frame_sets, 1, 1).unwrap().len(), 1);
        assert!(matches!(
            frame_sets_for(&frame_sets, 1, 2),
            Err(RenderError::State(_))
        ));
        // Nothing to bind without binding sets, whatever the slot.
        assert!(frame_sets_for(&[], 0, 5).unwrap().is_empty());
    }

    #[test]
    fn test_scene_counts_specialization() {
        let counts = SceneCounts {
            materials: 4,
            lights: 2,
            meshes: 9,
        };
        assert_eq!(counts.constants(), [4, 2, 9]);
        let spec = counts.specialization();
        assert_eq!(spec.entries().len(), 3);
        assert_eq!(spec.entries()[1].constant_id, 1);
        assert_eq!(&spec.data()[8..12], &9u32.to_ne_bytes());
    }

    #[test]
    fn test_push_constant_range() {
        let range = push_constant_range();
        assert_eq!(range.offset, 0);
        assert_eq!(range.size, 80);
        assert_eq!(
            range.stage_flags,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn test_blend_attachments() {
        let opaque = blend_attachments(2, false);
        assert_eq!(opaque.len(), 2);
        assert!(!opaque[0].blend_enable);

        let additive = blend_attachments(1, true);
        let state = additive[0].to_vk();
        assert_eq!(state.blend_enable, vk::TRUE);
        assert_eq!(state.dst_color_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(state.dst_alpha_blend_factor, vk::BlendFactor::ZERO);
        assert_eq!(state.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn test_step_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<RenderStep>();
    }
}
