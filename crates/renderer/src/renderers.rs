//! Renderers that own the Vulkan context and drive a set of outputs and
//! steps through the frame driver.
//!
//! A [`Renderer`] is assembled by a setup function that declares outputs and
//! steps against the current swapchain. The same function runs again after
//! every resize, once the old outputs and steps are gone.

use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use framegraph_core::RendererConfig;
use framegraph_platform::{Surface, Window};
use framegraph_rhi::RhiError;
use framegraph_rhi::command::CommandBuffer;
use framegraph_rhi::device::Device;
use framegraph_rhi::instance::Instance;
use framegraph_rhi::physical_device::select_physical_device;
use framegraph_rhi::swapchain::Swapchain;
use tracing::{debug, error, info};

use crate::binding_set::{DescriptorKind, ResourceBindingSet};
use crate::draw::DrawSource;
use crate::error::{RenderError, RenderResult};
use crate::frame_driver::{FrameContext, FrameDriver, FrameOutcome, VulkanFrameBackend};
use crate::graph::ClearValue;
use crate::output::RenderGraphOutput;
use crate::shader_scan::BindingRegistry;
use crate::step::{RenderStep, SceneCounts};
use crate::uniforms::{Camera, CameraUniforms};

/// Name of the camera uniform buffer in binding set 0.
pub const CAMERA_BINDING: &str = "Camera";

/// Declares the outputs and steps of a renderer.
pub type SetupFn = fn(&mut Renderer) -> RenderResult<()>;

struct StepEntry {
    output: usize,
    step: RenderStep,
}

fn surface_error(err: framegraph_core::Error) -> RenderError {
    RenderError::Rhi(RhiError::SurfaceError(err.to_string()))
}

/// Vulkan context plus the outputs and steps recorded every frame.
///
/// Fields drop in declaration order, which is the teardown order: steps,
/// outputs, binding sets, frame driver with the swapchain, device, surface,
/// instance.
pub struct Renderer {
    steps: Vec<StepEntry>,
    outputs: Vec<RenderGraphOutput>,
    binding_sets: Vec<ResourceBindingSet>,
    driver: FrameDriver<VulkanFrameBackend>,
    registry: BindingRegistry,
    setup: SetupFn,
    config: RendererConfig,
    scene_counts: SceneCounts,
    camera: CameraUniforms,
    device: Arc<Device>,
    surface: Surface,
    instance: Instance,
}

impl Renderer {
    /// Creates the Vulkan context for `window`, the camera binding set and
    /// runs `setup`.
    pub fn new(
        window: &Window,
        config: &RendererConfig,
        scene_counts: SceneCounts,
        setup: SetupFn,
    ) -> RenderResult<Self> {
        config
            .validate()
            .map_err(|e| RenderError::config(e.to_string()))?;

        let (width, height) = (window.width(), window.height());
        info!("Initializing renderer ({}x{})", width, height);

        let extensions = window.required_extensions().map_err(surface_error)?;
        let instance = Instance::new(config.validation, &extensions)?;
        let surface = window
            .create_surface(instance.entry(), instance.handle())
            .map_err(surface_error)?;

        let physical_device =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &physical_device)?;

        let swapchain = Swapchain::new(&instance, device.clone(), surface.handle(), width, height)?;
        let backend =
            VulkanFrameBackend::new(device.clone(), swapchain, config.frames_in_flight)?;
        let driver = FrameDriver::new(backend)?;

        let mut scene_set =
            ResourceBindingSet::new(device.clone(), "Scene", config.frames_in_flight)?;
        scene_set.add_buffer(
            CAMERA_BINDING,
            DescriptorKind::UniformBuffer,
            CameraUniforms::SIZE as vk::DeviceSize,
            false,
            None,
        )?;
        scene_set.init()?;

        let mut camera = Camera::default();
        let extent = driver.backend().swapchain().extent();
        camera.set_aspect(extent.width, extent.height);

        let mut renderer = Self {
            steps: Vec::new(),
            outputs: Vec::new(),
            binding_sets: vec![scene_set],
            driver,
            registry: BindingRegistry::default(),
            setup,
            config: config.clone(),
            scene_counts,
            camera: camera.uniforms(),
            device,
            surface,
            instance,
        };
        let setup = renderer.setup;
        setup(&mut renderer)?;

        info!(
            "Renderer ready: {} output(s), {} step(s), {} frames in flight",
            renderer.outputs.len(),
            renderer.steps.len(),
            renderer.config.frames_in_flight
        );
        Ok(renderer)
    }

    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    #[inline]
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn frames_in_flight(&self) -> usize {
        self.driver.frames_in_flight()
    }

    pub fn swapchain(&self) -> &Swapchain {
        self.driver.backend().swapchain()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain().extent()
    }

    pub fn shader_dir(&self) -> &Path {
        &self.config.shader_dir
    }

    pub fn scene_counts(&self) -> SceneCounts {
        self.scene_counts
    }

    /// Takes effect at the next rebuild.
    pub fn set_scene_counts(&mut self, counts: SceneCounts) {
        self.scene_counts = counts;
    }

    pub fn registry(&self) -> &BindingRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut BindingRegistry {
        &mut self.registry
    }

    /// Binding sets in pipeline set order; set 0 holds the camera.
    pub fn binding_sets(&self) -> Vec<&ResourceBindingSet> {
        self.binding_sets.iter().collect()
    }

    pub fn binding_set(&self, index: usize) -> RenderResult<&ResourceBindingSet> {
        self.binding_sets
            .get(index)
            .ok_or_else(|| RenderError::not_found(format!("Binding set {}", index)))
    }

    /// Adds an initialized binding set and returns its set index.
    pub fn add_binding_set(&mut self, set: ResourceBindingSet) -> RenderResult<usize> {
        if !set.is_initialized() {
            return Err(RenderError::state(format!(
                "Binding set '{}' must be initialized before it is added",
                set.name()
            )));
        }
        if set.frames_in_flight() != self.frames_in_flight() {
            return Err(RenderError::config(format!(
                "Binding set '{}' has {} replicas, renderer runs {} frames in flight",
                set.name(),
                set.frames_in_flight(),
                self.frames_in_flight()
            )));
        }
        self.binding_sets.push(set);
        Ok(self.binding_sets.len() - 1)
    }

    /// Adds an initialized output; outputs record in insertion order.
    pub fn add_output(&mut self, output: RenderGraphOutput) -> RenderResult<usize> {
        if !output.is_initialized() {
            return Err(RenderError::state("Outputs must be initialized before they are added"));
        }
        self.outputs.push(output);
        Ok(self.outputs.len() - 1)
    }

    pub fn output(&self, index: usize) -> RenderResult<&RenderGraphOutput> {
        self.outputs
            .get(index)
            .ok_or_else(|| RenderError::not_found(format!("Output {}", index)))
    }

    /// Adds a built step recording into `output`; steps of one stage record
    /// in insertion order.
    pub fn add_step(&mut self, output: usize, step: RenderStep) -> RenderResult<usize> {
        if output >= self.outputs.len() {
            return Err(RenderError::not_found(format!("Output {}", output)));
        }
        if !step.is_built() {
            return Err(RenderError::state(format!(
                "Step '{}' must be built before it is added",
                step.name()
            )));
        }
        self.steps.push(StepEntry { output, step });
        Ok(self.steps.len() - 1)
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Camera used from the next recorded frame on.
    pub fn update(&mut self, camera: &Camera) {
        self.camera = camera.uniforms();
    }

    #[inline]
    pub fn needs_rebuild(&self) -> bool {
        self.driver.needs_rebuild()
    }

    pub fn set_resized(&mut self) {
        self.driver.set_resized();
    }

    pub fn frame_number(&self) -> u64 {
        self.driver.frame_number()
    }

    /// Records and presents one frame of `scene`.
    pub fn render<S: DrawSource>(&mut self, scene: &S) -> RenderResult<FrameOutcome> {
        let binding_sets = &self.binding_sets;
        let camera = &self.camera;
        let device = &self.device;
        let outputs = &mut self.outputs;
        let steps = &self.steps;

        self.driver.run_frame(|ctx| {
            let scene_set = binding_sets
                .first()
                .ok_or_else(|| RenderError::not_found("Binding set 0"))?;
            scene_set.update_buffer(CAMERA_BINDING, ctx.slot, bytemuck::bytes_of(camera))?;

            let cmd = CommandBuffer::from_handle(device.clone(), ctx.command_buffer);
            record_outputs(&cmd, ctx, outputs, steps, scene)
        })
    }

    fn clear_passes(&mut self) {
        for entry in &mut self.steps {
            entry.step.destroy();
        }
        self.steps.clear();
        for output in &mut self.outputs {
            output.destroy();
        }
        self.outputs.clear();
    }

    /// Recreates the swapchain and rebuilds every output and step.
    ///
    /// A zero-sized window (minimized) is ignored; the rebuild flag stays
    /// raised until a real size arrives.
    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if width == 0 || height == 0 {
            debug!("Ignoring resize to {}x{}", width, height);
            return Ok(());
        }

        self.device.wait_idle()?;
        self.driver.wait_idle()?;
        self.clear_passes();

        let surface = self.surface.handle();
        self.driver
            .backend_mut()
            .swapchain_mut()
            .recreate(&self.instance, surface, width, height)?;

        let setup = self.setup;
        setup(self)?;
        self.driver.clear_rebuild_flag();

        let extent = self.extent();
        info!(
            "Renderer rebuilt for {}x{} ({} output(s), {} step(s))",
            extent.width,
            extent.height,
            self.outputs.len(),
            self.steps.len()
        );
        Ok(())
    }
}

fn record_outputs<S: DrawSource>(
    cmd: &CommandBuffer,
    ctx: &FrameContext,
    outputs: &mut [RenderGraphOutput],
    steps: &[StepEntry],
    scene: &S,
) -> RenderResult<()> {
    for (index, output) in outputs.iter_mut().enumerate() {
        output.start(cmd, ctx.slot, ctx.image_index)?;
        for stage in 0..output.stage_count() {
            if stage > 0 {
                output.switch_stage(cmd, stage)?;
            }
            let stage_steps = steps
                .iter()
                .filter(|e| e.output == index && e.step.stage() == Some(stage));
            for entry in stage_steps {
                entry.step.start(cmd, ctx.slot)?;
                entry.step.render(cmd, scene)?;
                entry.step.end(cmd)?;
            }
        }
        output.end(cmd)?;
    }
    Ok(())
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during renderer drop: {:?}", e);
        }

        self.clear_passes();
        for set in &mut self.binding_sets {
            set.destroy();
        }

        info!("Renderer destroyed");
    }
}

/// Clear color of [`SimpleRenderer`]'s presentation attachment.
pub const SIMPLE_CLEAR_COLOR: [f32; 4] = [1.0, 0.3, 0.0, 1.0];
pub const SIMPLE_SHADERS: [&str; 2] = ["simple.vert", "simple.frag"];
pub const FORWARD_SHADERS: [&str; 2] = ["forward.vert", "forward.frag"];

/// One presentation stage drawn by a single step.
pub struct SimpleRenderer(Renderer);

impl SimpleRenderer {
    pub fn new(window: &Window, config: &RendererConfig) -> RenderResult<Self> {
        Renderer::new(window, config, SceneCounts::default(), Self::setup).map(Self)
    }

    fn setup(renderer: &mut Renderer) -> RenderResult<()> {
        let mut output = RenderGraphOutput::new(
            renderer.device().clone(),
            renderer.frames_in_flight(),
            renderer.extent(),
            1,
            false,
        )?;
        output.add_presentation_attachment(
            renderer.swapchain(),
            ClearValue::Color(SIMPLE_CLEAR_COLOR),
        )?;
        output.init()?;

        let mut step = RenderStep::new(renderer.device().clone(), renderer.shader_dir());
        step.set_name("Simple Rendering")?;
        step.create_pipeline(
            &SIMPLE_SHADERS,
            &renderer.binding_sets(),
            renderer.registry(),
            renderer.scene_counts(),
        )?;
        step.build(&output, 0)?;

        let output = renderer.add_output(output)?;
        renderer.add_step(output, step)?;
        Ok(())
    }
}

impl Deref for SimpleRenderer {
    type Target = Renderer;

    fn deref(&self) -> &Renderer {
        &self.0
    }
}

impl DerefMut for SimpleRenderer {
    fn deref_mut(&mut self) -> &mut Renderer {
        &mut self.0
    }
}

/// Multisampled forward pass with depth, resolved into the swapchain.
pub struct ForwardRenderer(Renderer);

impl ForwardRenderer {
    pub fn new(
        window: &Window,
        config: &RendererConfig,
        scene_counts: SceneCounts,
    ) -> RenderResult<Self> {
        Renderer::new(window, config, scene_counts, Self::setup).map(Self)
    }

    fn setup(renderer: &mut Renderer) -> RenderResult<()> {
        let multisample = renderer.config().multisampling;
        let clear_color = renderer.config().clear_color;
        let depth_format = renderer.device().find_depth_format()?;

        let mut output = RenderGraphOutput::new(
            renderer.device().clone(),
            renderer.frames_in_flight(),
            renderer.extent(),
            1,
            multisample,
        )?;
        output.add_presentation_attachment(renderer.swapchain(), ClearValue::Color(clear_color))?;
        output.add_depth_attachment(depth_format, ClearValue::Depth(1.0), false)?;
        output.init()?;

        let mut step = RenderStep::new(renderer.device().clone(), renderer.shader_dir());
        step.set_name("Render Geometry to Screen")?;
        step.create_pipeline(
            &FORWARD_SHADERS,
            &renderer.binding_sets(),
            renderer.registry(),
            renderer.scene_counts(),
        )?;
        step.build(&output, 0)?;

        let output = renderer.add_output(output)?;
        renderer.add_step(output, step)?;
        Ok(())
    }
}

impl Deref for ForwardRenderer {
    type Target = Renderer;

    fn deref(&self) -> &Renderer {
        &self.0
    }
}

impl DerefMut for ForwardRenderer {
    fn deref_mut(&mut self) -> &mut Renderer {
        &mut self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::stage_for_file;

    #[test]
    fn test_standard_shader_stages() {
        for file in SIMPLE_SHADERS.iter().chain(FORWARD_SHADERS.iter()) {
            assert!(stage_for_file(file).is_ok(), "{}", file);
        }
    }

    #[test]
    fn test_default_registry_maps_camera_to_set_zero() {
        assert_eq!(BindingRegistry::default().lookup(CAMERA_BINDING).unwrap(), 0);
    }

    #[test]
    fn test_surface_error_is_rhi() {
        let err = surface_error(framegraph_core::Error::Surface("lost".into()));
        assert!(matches!(err, RenderError::Rhi(RhiError::SurfaceError(_))));
    }
}
