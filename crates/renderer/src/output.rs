//! Render-graph outputs: a render pass, its images and framebuffers.
//!
//! A [`RenderGraphOutput`] is built declaratively. Stage 0 exists from the
//! start; [`add_stage`](RenderGraphOutput::add_stage) opens the next one and
//! every attachment call targets the most recently opened stage. After
//! [`init`](RenderGraphOutput::init) the description is frozen and the
//! output records into command buffers:
//!
//! ```text
//! start(cmd, slot, image) -> stage 0, cleared
//! switch_stage(cmd, 1)    -> next subpass, cleared
//! ...
//! end(cmd)                -> render pass ended, cursor back to 0
//! ```
//!
//! Attachments are never loaded; each stage clears its attachments with
//! `vkCmdClearAttachments` when it is entered.

use std::sync::Arc;

use ash::vk;
use framegraph_rhi::command::CommandBuffer;
use framegraph_rhi::descriptor::{
    DescriptorPool, DescriptorSetLayout, image_info, layout_binding, update_descriptor_sets,
};
use framegraph_rhi::device::Device;
use framegraph_rhi::image::Image;
use framegraph_rhi::render_pass::{Framebuffer, RenderPass};
use framegraph_rhi::sampler::Sampler;
use framegraph_rhi::swapchain::Swapchain;
use tracing::{debug, info, warn};

use crate::error::{RenderError, RenderResult};
use crate::graph::{ClearValue, GraphDesc, ImagePlan, StageDesc};

/// Number of framebuffers an output needs.
///
/// Presenting outputs index framebuffers by swapchain image, others by frame
/// slot.
pub fn target_count(frames_in_flight: usize, swapchain_images: Option<usize>) -> usize {
    frames_in_flight.max(swapchain_images.unwrap_or(0))
}

/// Clear commands issued when a stage is entered.
pub fn stage_clears(stage: &StageDesc) -> Vec<vk::ClearAttachment> {
    let colors = stage
        .colors
        .iter()
        .enumerate()
        .map(|(index, color)| vk::ClearAttachment {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            color_attachment: index as u32,
            clear_value: color.clear.to_vk(),
        });
    let depth = stage.depth.iter().map(|depth| vk::ClearAttachment {
        aspect_mask: vk::ImageAspectFlags::DEPTH,
        color_attachment: 0,
        clear_value: depth.clear.to_vk(),
    });
    colors.chain(depth).collect()
}

/// Tracks which stage of an active render pass is being recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageCursor {
    stage_count: usize,
    current: Option<usize>,
}

impl StageCursor {
    pub fn new(stage_count: usize) -> Self {
        Self {
            stage_count,
            current: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    /// Enters stage 0.
    pub fn begin(&mut self) -> RenderResult<()> {
        if self.current.is_some() {
            return Err(RenderError::state("Render output is already recording"));
        }
        self.current = Some(0);
        Ok(())
    }

    /// Moves to `dst` and returns how many subpasses were skipped over.
    pub fn advance(&mut self, dst: usize) -> RenderResult<usize> {
        let current = self
            .current
            .ok_or_else(|| RenderError::state("Render output is not recording"))?;
        if dst < current {
            return Err(RenderError::state(format!(
                "Stages must be recorded in order: at stage {}, asked for {}",
                current, dst
            )));
        }
        if dst >= self.stage_count {
            return Err(RenderError::config(format!(
                "Stage {} does not exist, output has {} stage(s)",
                dst, self.stage_count
            )));
        }
        self.current = Some(dst);
        Ok(dst - current)
    }

    pub fn end(&mut self) -> RenderResult<()> {
        if self.current.take().is_none() {
            return Err(RenderError::state("Render output is not recording"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct SwapchainTarget {
    views: Vec<vk::ImageView>,
}

/// Input attachment descriptors of one stage.
struct StageInputSets {
    layout: DescriptorSetLayout,
    sets: Vec<vk::DescriptorSet>,
}

/// GPU objects, declared in teardown order.
struct OutputObjects {
    plan: ImagePlan,
    input_sets: Vec<Option<StageInputSets>>,
    input_pool: Option<DescriptorPool>,
    input_sampler: Option<Sampler>,
    framebuffers: Vec<Framebuffer>,
    render_pass: RenderPass,
    images: Vec<Image>,
}

/// A render pass with one subpass per stage and the images it renders into.
pub struct RenderGraphOutput {
    device: Arc<Device>,
    frames_in_flight: usize,
    extent: vk::Extent2D,
    layers: u32,
    max_samples: vk::SampleCountFlags,
    graph: GraphDesc,
    swapchain: Option<SwapchainTarget>,
    dependencies: Vec<vk::SubpassDependency>,
    clears: Vec<Vec<vk::ClearAttachment>>,
    cursor: StageCursor,
    /// Set by `init`; the description can no longer change.
    frozen: bool,
    objects: Option<OutputObjects>,
}

impl RenderGraphOutput {
    /// Creates an output with stage 0 open.
    ///
    /// Multisampled stages use the highest sample count the device supports
    /// for both color and depth; on devices without multisampling they fall
    /// back to one sample.
    pub fn new(
        device: Arc<Device>,
        frames_in_flight: usize,
        extent: vk::Extent2D,
        layers: u32,
        multisample: bool,
    ) -> RenderResult<Self> {
        if frames_in_flight == 0 {
            return Err(RenderError::config(
                "An output needs at least one frame in flight",
            ));
        }
        if extent.width == 0 || extent.height == 0 || layers == 0 {
            return Err(RenderError::config(format!(
                "Output extent must be non-zero, got {}x{}x{}",
                extent.width, extent.height, layers
            )));
        }

        let max_samples = device.max_usable_sample_count();
        if multisample && max_samples == vk::SampleCountFlags::TYPE_1 {
            warn!("Multisampling requested but the device supports one sample only");
        }
        let multisample = multisample && max_samples != vk::SampleCountFlags::TYPE_1;

        Ok(Self {
            device,
            frames_in_flight,
            extent,
            layers,
            max_samples,
            graph: GraphDesc::new(multisample),
            swapchain: None,
            dependencies: Vec::new(),
            clears: Vec::new(),
            cursor: StageCursor::new(1),
            frozen: false,
            objects: None,
        })
    }

    fn ensure_building(&self) -> RenderResult<()> {
        if self.frozen {
            return Err(RenderError::state(
                "Render output is already initialized",
            ));
        }
        Ok(())
    }

    /// Opens the next stage and returns its index.
    pub fn add_stage(&mut self, multisample: bool) -> RenderResult<usize> {
        self.ensure_building()?;
        let multisample = multisample && self.max_samples != vk::SampleCountFlags::TYPE_1;
        Ok(self.graph.add_stage(multisample))
    }

    /// Adds a color attachment to the current stage and returns its index.
    pub fn add_color_attachment(
        &mut self,
        format: vk::Format,
        clear: ClearValue,
        externally_consumed: bool,
    ) -> RenderResult<usize> {
        self.ensure_building()?;
        Ok(self
            .graph
            .add_color_attachment(format, clear, externally_consumed))
    }

    pub fn add_depth_attachment(
        &mut self,
        format: vk::Format,
        clear: ClearValue,
        externally_consumed: bool,
    ) -> RenderResult<()> {
        self.ensure_building()?;
        self.graph
            .add_depth_attachment(format, clear, externally_consumed)
    }

    /// Adds the swapchain as a color attachment of the current stage.
    pub fn add_presentation_attachment(
        &mut self,
        swapchain: &Swapchain,
        clear: ClearValue,
    ) -> RenderResult<usize> {
        self.ensure_building()?;
        if swapchain.extent() != self.extent {
            return Err(RenderError::config(format!(
                "Swapchain extent {}x{} differs from output extent {}x{}",
                swapchain.extent().width,
                swapchain.extent().height,
                self.extent.width,
                self.extent.height
            )));
        }

        let index = self
            .graph
            .add_presentation_attachment(swapchain.format(), clear)?;
        self.swapchain = Some(SwapchainTarget {
            views: swapchain.image_views().to_vec(),
        });
        Ok(index)
    }

    /// Lets the current stage read `attachment` of an earlier stage as an
    /// input attachment; the depth attachment is addressed by the color count.
    pub fn add_stage_input(&mut self, src_stage: usize, src_attachment: usize) -> RenderResult<()> {
        self.ensure_building()?;
        self.graph.add_stage_input(src_stage, src_attachment)
    }

    /// Lets the current stage sample an image produced outside this output.
    pub fn add_external_input(&mut self, view: vk::ImageView, is_depth: bool) -> RenderResult<()> {
        self.ensure_building()?;
        self.graph.add_external_input(view, is_depth);
        Ok(())
    }

    /// Creates images, render pass, framebuffers and input descriptors.
    pub fn init(&mut self) -> RenderResult<()> {
        self.ensure_building()?;
        self.graph.validate(self.layers)?;

        let samples = self.sample_count();
        let plan = self.graph.plan_images(self.extent, self.layers, samples);
        let targets = target_count(
            self.frames_in_flight,
            self.swapchain.as_ref().map(|s| s.views.len()),
        );

        let images = self.create_images(&plan)?;

        let descriptions = plan.attachment_descriptions();
        let references = plan.stage_references(&self.graph);
        let subpasses: Vec<vk::SubpassDescription> =
            references.iter().map(|refs| refs.subpass()).collect();
        let dependencies = self.graph.dependencies();
        let render_pass = RenderPass::new(
            self.device.clone(),
            &descriptions,
            &subpasses,
            &dependencies,
        )?;

        let mut framebuffers = Vec::with_capacity(targets);
        for target in 0..targets {
            let views: Vec<vk::ImageView> = images.iter().map(|image| image.view(target)).collect();
            framebuffers.push(Framebuffer::new(
                self.device.clone(),
                &render_pass,
                &views,
                self.extent,
                self.layers,
            )?);
        }

        let (input_pool, input_sampler, input_sets) =
            self.create_input_sets(&plan, &images, targets)?;

        info!(
            "Render output initialized: {} stage(s), {} image(s), {} framebuffer(s), {:?}",
            self.graph.stage_count(),
            images.len(),
            targets,
            samples
        );

        self.clears = self.graph.stages().iter().map(stage_clears).collect();
        self.cursor = StageCursor::new(self.graph.stage_count());
        self.frozen = true;
        self.dependencies = dependencies;
        self.objects = Some(OutputObjects {
            plan,
            input_sets,
            input_pool,
            input_sampler,
            framebuffers,
            render_pass,
            images,
        });
        Ok(())
    }

    fn create_images(&self, plan: &ImagePlan) -> RenderResult<Vec<Image>> {
        let mut images = Vec::with_capacity(plan.images.len());
        for planned in &plan.images {
            let image = if planned.swapchain {
                let target = self.swapchain.as_ref().ok_or_else(|| {
                    RenderError::state("Presentation attachment without a swapchain")
                })?;
                Image::from_swapchain(
                    self.device.clone(),
                    &target.views,
                    planned.desc.format,
                    self.extent,
                )?
            } else {
                Image::new(self.device.clone(), &planned.desc)?
            };
            images.push(image);
        }
        debug!("Created {} output image(s)", images.len());
        Ok(images)
    }

    #[allow(clippy::type_complexity)]
    fn create_input_sets(
        &self,
        plan: &ImagePlan,
        images: &[Image],
        targets: usize,
    ) -> RenderResult<(
        Option<DescriptorPool>,
        Option<Sampler>,
        Vec<Option<StageInputSets>>,
    )> {
        let stages = self.graph.stages();
        let input_stages = stages.iter().filter(|s| s.has_inputs()).count();
        if input_stages == 0 {
            return Ok((None, None, stages.iter().map(|_| None).collect()));
        }

        let attachment_count: usize = stages.iter().map(|s| s.stage_inputs.len()).sum();
        let external_count: usize = stages.iter().map(|s| s.external_inputs.len()).sum();

        let mut pool_sizes = Vec::new();
        if attachment_count > 0 {
            pool_sizes.push(
                vk::DescriptorPoolSize::default()
                    .ty(vk::DescriptorType::INPUT_ATTACHMENT)
                    .descriptor_count((attachment_count * targets) as u32),
            );
        }
        if external_count > 0 {
            pool_sizes.push(
                vk::DescriptorPoolSize::default()
                    .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .descriptor_count((external_count * targets) as u32),
            );
        }
        let pool = DescriptorPool::new(
            self.device.clone(),
            (input_stages * targets) as u32,
            &pool_sizes,
        )?;
        let sampler = if external_count > 0 {
            Some(Sampler::new_linear_repeat(self.device.clone())?)
        } else {
            None
        };
        let sampler_handle = sampler.as_ref().map_or(vk::Sampler::null(), Sampler::handle);

        let mut all_sets = Vec::with_capacity(stages.len());
        for stage in stages {
            if !stage.has_inputs() {
                all_sets.push(None);
                continue;
            }

            let attachments = stage.stage_inputs.len();
            let bindings: Vec<vk::DescriptorSetLayoutBinding> = (0..attachments)
                .map(|i| {
                    layout_binding(
                        i as u32,
                        vk::DescriptorType::INPUT_ATTACHMENT,
                        1,
                        vk::ShaderStageFlags::FRAGMENT,
                    )
                })
                .chain((0..stage.external_inputs.len()).map(|i| {
                    layout_binding(
                        (attachments + i) as u32,
                        vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                        1,
                        vk::ShaderStageFlags::FRAGMENT,
                    )
                }))
                .collect();
            let layout = DescriptorSetLayout::new(self.device.clone(), &bindings)?;
            let sets = pool.allocate(&vec![layout.handle(); targets])?;

            for (target, &set) in sets.iter().enumerate() {
                let mut infos: Vec<vk::DescriptorImageInfo> = Vec::new();
                for input in &stage.stage_inputs {
                    let slot = plan.slots(input.stage, input.attachment).ok_or_else(|| {
                        RenderError::config(format!(
                            "Stage {} has no attachment {}",
                            input.stage, input.attachment
                        ))
                    })?;
                    infos.push(image_info(
                        vk::Sampler::null(),
                        images[slot.main].view(target),
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    ));
                }
                for external in &stage.external_inputs {
                    infos.push(image_info(
                        sampler_handle,
                        external.view,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    ));
                }

                let writes: Vec<vk::WriteDescriptorSet> = infos
                    .iter()
                    .enumerate()
                    .map(|(binding, info)| {
                        let ty = if binding < attachments {
                            vk::DescriptorType::INPUT_ATTACHMENT
                        } else {
                            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
                        };
                        vk::WriteDescriptorSet::default()
                            .dst_set(set)
                            .dst_binding(binding as u32)
                            .descriptor_type(ty)
                            .image_info(std::slice::from_ref(info))
                    })
                    .collect();
                update_descriptor_sets(&self.device, &writes);
            }

            all_sets.push(Some(StageInputSets { layout, sets }));
        }

        debug!("Input descriptor sets created for {} stage(s)", input_stages);
        Ok((Some(pool), sampler, all_sets))
    }

    fn objects(&self) -> RenderResult<&OutputObjects> {
        self.objects
            .as_ref()
            .ok_or_else(|| RenderError::state("Render output is not initialized"))
    }

    /// Begins the render pass and enters stage 0.
    ///
    /// The framebuffer is chosen by `image_index` when the output presents,
    /// otherwise by `frame`.
    pub fn start(&mut self, cmd: &CommandBuffer, frame: usize, image_index: u32) -> RenderResult<()> {
        let target = if self.swapchain.is_some() {
            image_index as usize
        } else {
            frame
        };
        let objects = self.objects()?;
        let framebuffer = objects.framebuffers.get(target).ok_or_else(|| {
            RenderError::not_found(format!("No framebuffer for target {}", target))
        })?;
        let (render_pass, framebuffer) = (objects.render_pass.handle(), framebuffer.handle());

        self.cursor.begin()?;
        cmd.begin_render_pass(render_pass, framebuffer, self.extent);
        cmd.set_viewport(&vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.extent.width as f32,
            height: self.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        });
        cmd.set_scissor(&vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        });
        self.clear_stage(cmd, 0);
        Ok(())
    }

    /// Advances to stage `dst` and clears its attachments.
    pub fn switch_stage(&mut self, cmd: &CommandBuffer, dst: usize) -> RenderResult<()> {
        let skipped = self.cursor.advance(dst)?;
        for _ in 0..skipped {
            cmd.next_subpass();
        }
        self.clear_stage(cmd, dst);
        Ok(())
    }

    /// Ends the render pass and rewinds the cursor to stage 0.
    pub fn end(&mut self, cmd: &CommandBuffer) -> RenderResult<()> {
        self.cursor.end()?;
        cmd.end_render_pass();
        Ok(())
    }

    fn clear_stage(&self, cmd: &CommandBuffer, stage: usize) {
        let Some(clears) = self.clears.get(stage) else {
            return;
        };
        if clears.is_empty() {
            return;
        }
        let rect = vk::ClearRect {
            rect: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.extent,
            },
            base_array_layer: 0,
            layer_count: self.layers,
        };
        cmd.clear_attachments(clears, &[rect]);
    }

    pub fn stage_count(&self) -> usize {
        self.graph.stage_count()
    }

    pub fn color_attachment_count(&self, stage: usize) -> RenderResult<usize> {
        Ok(self.graph.stage(stage)?.colors.len())
    }

    pub fn stage_uses_depth(&self, stage: usize) -> RenderResult<bool> {
        Ok(self.graph.stage(stage)?.depth.is_some())
    }

    pub fn stage_multisampled(&self, stage: usize) -> RenderResult<bool> {
        Ok(self.graph.stage(stage)?.multisampled)
    }

    pub fn stage_has_inputs(&self, stage: usize) -> RenderResult<bool> {
        Ok(self.graph.stage(stage)?.has_inputs())
    }

    /// Sample count of multisampled stages; one when no stage is.
    pub fn sample_count(&self) -> vk::SampleCountFlags {
        if self.graph.stages().iter().any(|s| s.multisampled) {
            self.max_samples
        } else {
            vk::SampleCountFlags::TYPE_1
        }
    }

    pub fn render_pass(&self) -> RenderResult<vk::RenderPass> {
        Ok(self.objects()?.render_pass.handle())
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn presents(&self) -> bool {
        self.swapchain.is_some()
    }

    /// Subpass dependencies derived at init.
    pub fn dependencies(&self) -> &[vk::SubpassDependency] {
        &self.dependencies
    }

    pub fn target_count(&self) -> usize {
        self.objects.as_ref().map_or(0, |o| o.framebuffers.len())
    }

    fn stage_inputs(&self, stage: usize) -> RenderResult<&StageInputSets> {
        self.graph.stage(stage)?;
        self.objects()?
            .input_sets
            .get(stage)
            .and_then(Option::as_ref)
            .ok_or_else(|| RenderError::not_found(format!("Stage {} has no inputs", stage)))
    }

    pub fn input_set_layout(&self, stage: usize) -> RenderResult<vk::DescriptorSetLayout> {
        Ok(self.stage_inputs(stage)?.layout.handle())
    }

    pub fn input_set(&self, stage: usize, target: usize) -> RenderResult<vk::DescriptorSet> {
        let inputs = self.stage_inputs(stage)?;
        inputs.sets.get(target).copied().ok_or_else(|| {
            RenderError::not_found(format!("No input set for target {}", target))
        })
    }

    /// Image view of `attachment` of `stage` to sample after the pass.
    ///
    /// For multisampled stages this is the resolve image.
    pub fn consumed_view(&self, stage: usize, attachment: usize) -> RenderResult<vk::ImageView> {
        let desc = self.graph.stage(stage)?;
        let consumed = desc
            .attachment(attachment)
            .is_some_and(|a| a.externally_consumed);
        if !consumed {
            return Err(RenderError::config(format!(
                "Attachment {} of stage {} is not externally consumed",
                attachment, stage
            )));
        }

        let objects = self.objects()?;
        let slot = objects
            .plan
            .slots(stage, attachment)
            .ok_or_else(|| RenderError::not_found(format!("Attachment {}", attachment)))?;
        let index = slot.resolve.unwrap_or(slot.main);
        Ok(objects.images[index].view(0))
    }

    pub fn is_initialized(&self) -> bool {
        self.objects.is_some()
    }

    /// Destroys input descriptors, framebuffers, render pass and images, in
    /// that order. The GPU must be done with the output.
    pub fn destroy(&mut self) {
        if let Some(objects) = self.objects.take() {
            drop(objects);
            self.dependencies.clear();
            self.clears.clear();
            info!("Render output destroyed");
        }
    }
}

impl Drop for RenderGraphOutput {
    fn drop(&mut self) {
        if self.objects.is_some() {
            warn!("Render output dropped without destroy(), tearing down implicitly");
            self.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::AttachmentKind;

    #[test]
    fn test_target_count() {
        assert_eq!(target_count(2, None), 2);
        assert_eq!(target_count(2, Some(3)), 3);
        assert_eq!(target_count(3, Some(2)), 3);
    }

    #[test]
    fn test_cursor_in_order() {
        let mut cursor = StageCursor::new(3);
        cursor.begin().unwrap();
        assert_eq!(cursor.advance(0).unwrap(), 0);
        assert_eq!(cursor.advance(2).unwrap(), 2);
        cursor.end().unwrap();
        assert!(!cursor.is_active());
        // Rewound: the next pass starts from stage 0 again.
        cursor.begin().unwrap();
        assert_eq!(cursor.current(), Some(0));
    }

    #[test]
    fn test_cursor_backwards_is_state_error() {
        let mut cursor = StageCursor::new(3);
        cursor.begin().unwrap();
        cursor.advance(2).unwrap();
        assert!(matches!(cursor.advance(1), Err(RenderError::State(_))));
    }

    #[test]
    fn test_cursor_past_end_is_configuration_error() {
        let mut cursor = StageCursor::new(2);
        cursor.begin().unwrap();
        assert!(matches!(
            cursor.advance(2),
            Err(RenderError::Configuration(_))
        ));
    }

    #[test]
    fn test_cursor_lifecycle_errors() {
        let mut cursor = StageCursor::new(1);
        assert!(matches!(cursor.advance(0), Err(RenderError::State(_))));
        assert!(matches!(cursor.end(), Err(RenderError::State(_))));
        cursor.begin().unwrap();
        assert!(matches!(cursor.begin(), Err(RenderError::State(_))));
    }

    #[test]
    fn test_stage_clears() {
        let mut graph = GraphDesc::new(false);
        graph.add_color_attachment(
            vk::Format::R8G8B8A8_UNORM,
            ClearValue::Color([1.0, 0.3, 0.0, 1.0]),
            false,
        );
        graph.add_color_attachment(
            vk::Format::R16G16B16A16_SFLOAT,
            ClearValue::Color([0.0; 4]),
            false,
        );
        graph
            .add_depth_attachment(vk::Format::D32_SFLOAT, ClearValue::Depth(1.0), false)
            .unwrap();

        let stage = &graph.stages()[0];
        assert_eq!(stage.colors[0].kind, AttachmentKind::Color);
        let clears = stage_clears(stage);
        assert_eq!(clears.len(), 3);
        assert_eq!(clears[1].color_attachment, 1);
        assert_eq!(clears[2].aspect_mask, vk::ImageAspectFlags::DEPTH);
        unsafe {
            assert_eq!(clears[0].clear_value.color.float32, [1.0, 0.3, 0.0, 1.0]);
            assert_eq!(clears[2].clear_value.depth_stencil.depth, 1.0);
            assert_eq!(clears[2].clear_value.depth_stencil.stencil, 0);
        }
    }

    #[test]
    fn test_output_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<RenderGraphOutput>();
    }
}
