//! Host-side description of a render-graph output.
//!
//! [`GraphDesc`] records stages and their attachments as the builder calls
//! arrive and enforces the builder rules. From a finished description it
//! derives, without touching the GPU:
//! - the images backing every attachment ([`ImagePlan`]), interleaved as
//!   main image followed by its resolve image
//! - the attachment reference layout of each stage
//!   (`[Color..][Depth?][Resolve per color]`)
//! - the subpass dependencies between stages
//!
//! [`RenderGraphOutput`](crate::output::RenderGraphOutput) turns these into
//! Vulkan objects.

use ash::vk;
use framegraph_rhi::image::ImageDesc;
use tracing::debug;

use crate::error::{RenderError, RenderResult};

/// Value an attachment is cleared to when its stage is entered.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    Depth(f32),
}

impl ClearValue {
    pub fn to_vk(self) -> vk::ClearValue {
        match self {
            ClearValue::Color(float32) => vk::ClearValue {
                color: vk::ClearColorValue { float32 },
            },
            ClearValue::Depth(depth) => vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachmentKind {
    Color,
    Depth,
    /// Color attachment backed by the swapchain.
    Presentation,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AttachmentDesc {
    pub format: vk::Format,
    pub kind: AttachmentKind,
    pub clear: ClearValue,
    /// Sampled by work outside the render pass after it ends.
    pub externally_consumed: bool,
}

/// Attachment of an earlier stage read as an input attachment.
///
/// `attachment` indexes the source stage's colors, or equals its color count
/// for the depth attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageInput {
    pub stage: usize,
    pub attachment: usize,
}

/// Image view produced outside this output and sampled by a stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExternalInput {
    pub view: vk::ImageView,
    pub is_depth: bool,
}

/// Position of an attachment inside a stage's reference list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachmentRef {
    Color(usize),
    Depth,
    /// Resolve target of the color attachment with this index.
    Resolve(usize),
}

/// One subpass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StageDesc {
    pub multisampled: bool,
    pub colors: Vec<AttachmentDesc>,
    pub depth: Option<AttachmentDesc>,
    pub stage_inputs: Vec<StageInput>,
    pub external_inputs: Vec<ExternalInput>,
}

impl StageDesc {
    pub fn new(multisampled: bool) -> Self {
        Self {
            multisampled,
            ..Self::default()
        }
    }

    pub fn has_inputs(&self) -> bool {
        !self.stage_inputs.is_empty() || !self.external_inputs.is_empty()
    }

    /// Color `index`, or the depth attachment when `index == colors.len()`.
    pub fn attachment(&self, index: usize) -> Option<&AttachmentDesc> {
        match index.cmp(&self.colors.len()) {
            std::cmp::Ordering::Less => self.colors.get(index),
            std::cmp::Ordering::Equal => self.depth.as_ref(),
            std::cmp::Ordering::Greater => None,
        }
    }

    /// Whether color attachment `index` gets a single-sampled resolve image.
    pub fn resolves(&self, index: usize) -> bool {
        self.multisampled
            && self.colors.get(index).is_some_and(|color| {
                color.externally_consumed || color.kind == AttachmentKind::Presentation
            })
    }

    /// Reference list in subpass order: colors, depth, one resolve slot per
    /// color.
    pub fn attachment_refs(&self) -> Vec<AttachmentRef> {
        let colors = (0..self.colors.len()).map(AttachmentRef::Color);
        let depth = self.depth.iter().map(|_| AttachmentRef::Depth);
        let resolves = (0..self.colors.len()).map(AttachmentRef::Resolve);
        colors.chain(depth).chain(resolves).collect()
    }
}

/// Builder-side state of a render-graph output.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GraphDesc {
    stages: Vec<StageDesc>,
    has_presentation: bool,
}

impl GraphDesc {
    /// Starts a description with stage 0 already open.
    pub fn new(multisampled: bool) -> Self {
        Self {
            stages: vec![StageDesc::new(multisampled)],
            has_presentation: false,
        }
    }

    pub fn stages(&self) -> &[StageDesc] {
        &self.stages
    }

    pub fn stage(&self, index: usize) -> RenderResult<&StageDesc> {
        self.stages
            .get(index)
            .ok_or_else(|| RenderError::not_found(format!("Stage {} does not exist", index)))
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn has_presentation(&self) -> bool {
        self.has_presentation
    }

    pub fn current_stage_index(&self) -> usize {
        self.stages.len() - 1
    }

    fn current(&mut self) -> &mut StageDesc {
        let last = self.stages.len() - 1;
        &mut self.stages[last]
    }

    /// Opens a new stage; later attachments target it.
    pub fn add_stage(&mut self, multisampled: bool) -> usize {
        self.stages.push(StageDesc::new(multisampled));
        self.current_stage_index()
    }

    pub fn add_color_attachment(
        &mut self,
        format: vk::Format,
        clear: ClearValue,
        externally_consumed: bool,
    ) -> usize {
        let stage = self.current();
        stage.colors.push(AttachmentDesc {
            format,
            kind: AttachmentKind::Color,
            clear,
            externally_consumed,
        });
        stage.colors.len() - 1
    }

    /// Adds the depth attachment of the current stage.
    ///
    /// # Errors
    ///
    /// [`RenderError::Configuration`] if the stage already has depth, if the
    /// clear value is a color, or if an externally consumed depth is
    /// requested on a multisampled stage.
    pub fn add_depth_attachment(
        &mut self,
        format: vk::Format,
        clear: ClearValue,
        externally_consumed: bool,
    ) -> RenderResult<()> {
        let index = self.current_stage_index();
        if let ClearValue::Color(_) = clear {
            return Err(RenderError::config(format!(
                "Depth attachment of stage {} needs a depth clear value",
                index
            )));
        }
        let stage = self.current();
        if stage.depth.is_some() {
            return Err(RenderError::config(format!(
                "Stage {} already has a depth attachment",
                index
            )));
        }
        if externally_consumed && stage.multisampled {
            return Err(RenderError::config(format!(
                "Multisampled depth of stage {} cannot be externally consumed",
                index
            )));
        }

        stage.depth = Some(AttachmentDesc {
            format,
            kind: AttachmentKind::Depth,
            clear,
            externally_consumed,
        });
        Ok(())
    }

    /// Adds the swapchain-backed color attachment of the current stage.
    pub fn add_presentation_attachment(
        &mut self,
        format: vk::Format,
        clear: ClearValue,
    ) -> RenderResult<usize> {
        if self.has_presentation {
            return Err(RenderError::config(
                "An output can present at most one attachment",
            ));
        }
        self.has_presentation = true;

        let stage = self.current();
        stage.colors.push(AttachmentDesc {
            format,
            kind: AttachmentKind::Presentation,
            clear,
            externally_consumed: false,
        });
        Ok(stage.colors.len() - 1)
    }

    /// Lets the current stage read `attachment` of the earlier stage `stage`.
    pub fn add_stage_input(&mut self, stage: usize, attachment: usize) -> RenderResult<()> {
        let current = self.current_stage_index();
        if stage >= current {
            return Err(RenderError::config(format!(
                "Stage {} can only read earlier stages, got stage {}",
                current, stage
            )));
        }
        if self.stages[stage].attachment(attachment).is_none() {
            return Err(RenderError::config(format!(
                "Stage {} has no attachment {}",
                stage, attachment
            )));
        }

        self.current().stage_inputs.push(StageInput { stage, attachment });
        Ok(())
    }

    pub fn add_external_input(&mut self, view: vk::ImageView, is_depth: bool) {
        self.current()
            .external_inputs
            .push(ExternalInput { view, is_depth });
    }

    /// Checks rules that depend on the complete description.
    pub fn validate(&self, layers: u32) -> RenderResult<()> {
        for (index, stage) in self.stages.iter().enumerate() {
            if stage.colors.is_empty() && stage.depth.is_none() {
                return Err(RenderError::config(format!(
                    "Stage {} has no attachments",
                    index
                )));
            }

            if stage.multisampled
                && stage.depth.is_some_and(|depth| depth.externally_consumed)
            {
                return Err(RenderError::config(format!(
                    "Multisampled depth of stage {} cannot be externally consumed",
                    index
                )));
            }

            if layers > 1
                && stage
                    .colors
                    .iter()
                    .any(|color| color.kind == AttachmentKind::Presentation)
            {
                return Err(RenderError::config(
                    "A layered output cannot present to the swapchain",
                ));
            }

            for input in &stage.stage_inputs {
                let source = &self.stages[input.stage];
                let Some(attachment) = source.attachment(input.attachment) else {
                    continue;
                };
                match attachment.kind {
                    AttachmentKind::Depth if source.multisampled => {
                        return Err(RenderError::config(format!(
                            "Stage {} reads the multisampled depth of stage {}",
                            index, input.stage
                        )));
                    }
                    AttachmentKind::Presentation if !source.multisampled => {
                        return Err(RenderError::config(format!(
                            "Stage {} reads the swapchain image of stage {}",
                            index, input.stage
                        )));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Derives the subpass dependencies of the render pass.
    pub fn dependencies(&self) -> Vec<vk::SubpassDependency> {
        use vk::AccessFlags as A;
        use vk::PipelineStageFlags as S;

        let mut dependencies = vec![
            vk::SubpassDependency::default()
                .src_subpass(vk::SUBPASS_EXTERNAL)
                .dst_subpass(0)
                .src_stage_mask(S::COLOR_ATTACHMENT_OUTPUT | S::EARLY_FRAGMENT_TESTS)
                .src_access_mask(A::empty())
                .dst_stage_mask(S::COLOR_ATTACHMENT_OUTPUT | S::EARLY_FRAGMENT_TESTS)
                .dst_access_mask(A::COLOR_ATTACHMENT_WRITE | A::DEPTH_STENCIL_ATTACHMENT_WRITE)
                .dependency_flags(vk::DependencyFlags::BY_REGION),
        ];

        for (index, stage) in self.stages.iter().enumerate() {
            let dst = index as u32;

            if stage.multisampled {
                dependencies.push(
                    vk::SubpassDependency::default()
                        .src_subpass(vk::SUBPASS_EXTERNAL)
                        .dst_subpass(dst)
                        .src_stage_mask(S::COLOR_ATTACHMENT_OUTPUT)
                        .src_access_mask(A::empty())
                        .dst_stage_mask(S::COLOR_ATTACHMENT_OUTPUT)
                        .dst_access_mask(A::COLOR_ATTACHMENT_WRITE | A::COLOR_ATTACHMENT_READ),
                );
            }

            // One edge per source stage, covering every attachment read from it.
            let mut sources: Vec<(usize, S, A)> = Vec::new();
            for input in &stage.stage_inputs {
                let reads_color = input.attachment < self.stages[input.stage].colors.len();
                let (src_stage, src_access) = if reads_color {
                    (S::COLOR_ATTACHMENT_OUTPUT, A::COLOR_ATTACHMENT_WRITE)
                } else {
                    (
                        S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
                        A::DEPTH_STENCIL_ATTACHMENT_WRITE,
                    )
                };

                match sources.iter_mut().find(|(source, _, _)| *source == input.stage) {
                    Some((_, stages, access)) => {
                        *stages |= src_stage;
                        *access |= src_access;
                    }
                    None => sources.push((input.stage, src_stage, src_access)),
                }
            }

            for (source, src_stage, src_access) in sources {
                dependencies.push(
                    vk::SubpassDependency::default()
                        .src_subpass(source as u32)
                        .dst_subpass(dst)
                        .src_stage_mask(src_stage)
                        .src_access_mask(src_access)
                        .dst_stage_mask(S::FRAGMENT_SHADER)
                        .dst_access_mask(A::INPUT_ATTACHMENT_READ)
                        .dependency_flags(vk::DependencyFlags::BY_REGION),
                );
            }

            for _ in &stage.external_inputs {
                dependencies.push(
                    vk::SubpassDependency::default()
                        .src_subpass(vk::SUBPASS_EXTERNAL)
                        .dst_subpass(dst)
                        .src_stage_mask(S::COLOR_ATTACHMENT_OUTPUT)
                        .src_access_mask(A::COLOR_ATTACHMENT_WRITE)
                        .dst_stage_mask(S::FRAGMENT_SHADER)
                        .dst_access_mask(A::SHADER_READ),
                );
            }
        }

        for dependency in &dependencies {
            debug!(
                "Subpass dependency {} -> {}",
                subpass_name(dependency.src_subpass),
                dependency.dst_subpass
            );
        }

        dependencies
    }

    /// Lays out the images backing every attachment.
    pub fn plan_images(
        &self,
        extent: vk::Extent2D,
        layers: u32,
        samples: vk::SampleCountFlags,
    ) -> ImagePlan {
        let mut images: Vec<PlannedImage> = Vec::new();
        let mut slots: Vec<Vec<AttachmentSlots>> = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            let stage_samples = if stage.multisampled {
                samples
            } else {
                vk::SampleCountFlags::TYPE_1
            };
            let mut stage_slots = Vec::with_capacity(stage.colors.len() + 1);

            for (index, color) in stage.colors.iter().enumerate() {
                let resolves = stage.resolves(index);
                let mut main = ImageDesc::color(extent, color.format)
                    .with_samples(stage_samples)
                    .with_layers(layers);
                let main_is_swapchain =
                    color.kind == AttachmentKind::Presentation && !stage.multisampled;

                if main_is_swapchain {
                    main.final_layout = vk::ImageLayout::PRESENT_SRC_KHR;
                } else if color.externally_consumed && !resolves {
                    mark_consumed(&mut main);
                }

                let main_index = images.len();
                images.push(PlannedImage {
                    desc: main,
                    swapchain: main_is_swapchain,
                });

                let resolve_index = resolves.then(|| {
                    let mut resolve = ImageDesc::color(extent, color.format).with_layers(layers);
                    let swapchain = color.kind == AttachmentKind::Presentation;
                    if swapchain {
                        resolve.final_layout = vk::ImageLayout::PRESENT_SRC_KHR;
                    } else {
                        mark_consumed(&mut resolve);
                    }
                    images.push(PlannedImage {
                        desc: resolve,
                        swapchain,
                    });
                    images.len() - 1
                });

                stage_slots.push(AttachmentSlots {
                    main: main_index,
                    resolve: resolve_index,
                });
            }

            if let Some(depth) = &stage.depth {
                let mut main = ImageDesc::depth(extent, depth.format)
                    .with_samples(stage_samples)
                    .with_layers(layers);
                if depth.externally_consumed {
                    mark_consumed(&mut main);
                }
                images.push(PlannedImage {
                    desc: main,
                    swapchain: false,
                });
                stage_slots.push(AttachmentSlots {
                    main: images.len() - 1,
                    resolve: None,
                });
            }

            slots.push(stage_slots);
        }

        for stage in &self.stages {
            for input in &stage.stage_inputs {
                if let Some(slot) = slots[input.stage].get(input.attachment) {
                    images[slot.main].desc.usage |= vk::ImageUsageFlags::INPUT_ATTACHMENT;
                }
            }
        }

        ImagePlan { images, slots }
    }
}

fn mark_consumed(desc: &mut ImageDesc) {
    desc.usage |= vk::ImageUsageFlags::SAMPLED;
    desc.initial_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
    desc.final_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
}

fn subpass_name(subpass: u32) -> String {
    if subpass == vk::SUBPASS_EXTERNAL {
        "external".to_string()
    } else {
        subpass.to_string()
    }
}

/// An image backing one attachment slot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlannedImage {
    pub desc: ImageDesc,
    /// Imported from the swapchain instead of created.
    pub swapchain: bool,
}

/// Image indices of one attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AttachmentSlots {
    pub main: usize,
    pub resolve: Option<usize>,
}

/// Attachment references of one subpass, kept alive while the render pass
/// is created.
#[derive(Clone, Debug, Default)]
pub struct StageReferences {
    pub colors: Vec<vk::AttachmentReference>,
    pub depth: Option<vk::AttachmentReference>,
    pub resolves: Vec<vk::AttachmentReference>,
    pub inputs: Vec<vk::AttachmentReference>,
}

impl StageReferences {
    /// Subpass description borrowing these references.
    pub fn subpass(&self) -> vk::SubpassDescription<'_> {
        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&self.colors)
            .input_attachments(&self.inputs);
        if self.resolves.iter().any(|r| r.attachment != vk::ATTACHMENT_UNUSED) {
            subpass = subpass.resolve_attachments(&self.resolves);
        }
        if let Some(depth) = self.depth.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth);
        }
        subpass
    }
}

/// Images of an output in attachment-description order.
#[derive(Clone, Debug, PartialEq)]
pub struct ImagePlan {
    pub images: Vec<PlannedImage>,
    slots: Vec<Vec<AttachmentSlots>>,
}

impl ImagePlan {
    /// Slots of color `attachment` (or depth, at the color count) of `stage`.
    pub fn slots(&self, stage: usize, attachment: usize) -> Option<AttachmentSlots> {
        self.slots.get(stage)?.get(attachment).copied()
    }

    /// Index of the attachment description `reference` points at, or
    /// `VK_ATTACHMENT_UNUSED` for a color without a resolve image.
    pub fn reference_index(&self, graph: &GraphDesc, stage: usize, reference: AttachmentRef) -> u32 {
        let Ok(desc) = graph.stage(stage) else {
            return vk::ATTACHMENT_UNUSED;
        };
        let slot = match reference {
            AttachmentRef::Color(i) | AttachmentRef::Resolve(i) => self.slots(stage, i),
            AttachmentRef::Depth => self.slots(stage, desc.colors.len()),
        };
        match (reference, slot) {
            (AttachmentRef::Resolve(_), Some(slot)) => slot
                .resolve
                .map_or(vk::ATTACHMENT_UNUSED, |index| index as u32),
            (_, Some(slot)) => slot.main as u32,
            (_, None) => vk::ATTACHMENT_UNUSED,
        }
    }

    pub fn attachment_descriptions(&self) -> Vec<vk::AttachmentDescription> {
        self.images
            .iter()
            .map(|image| {
                let desc = &image.desc;
                let store_op = if desc.is_multisampled() {
                    vk::AttachmentStoreOp::DONT_CARE
                } else {
                    vk::AttachmentStoreOp::STORE
                };
                vk::AttachmentDescription::default()
                    .format(desc.format)
                    .samples(desc.samples)
                    .load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .store_op(store_op)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(desc.initial_layout)
                    .final_layout(desc.final_layout)
            })
            .collect()
    }

    /// Builds the reference lists of every stage.
    pub fn stage_references(&self, graph: &GraphDesc) -> Vec<StageReferences> {
        graph
            .stages()
            .iter()
            .enumerate()
            .map(|(index, stage)| {
                let mut refs = StageReferences::default();
                for reference in stage.attachment_refs() {
                    let attachment = self.reference_index(graph, index, reference);
                    match reference {
                        AttachmentRef::Color(_) => refs.colors.push(
                            vk::AttachmentReference::default()
                                .attachment(attachment)
                                .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
                        ),
                        AttachmentRef::Depth => {
                            refs.depth = Some(
                                vk::AttachmentReference::default()
                                    .attachment(attachment)
                                    .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
                            )
                        }
                        AttachmentRef::Resolve(_) => refs.resolves.push(
                            vk::AttachmentReference::default()
                                .attachment(attachment)
                                .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
                        ),
                    }
                }
                refs.inputs = stage
                    .stage_inputs
                    .iter()
                    .filter_map(|input| self.slots(input.stage, input.attachment))
                    .map(|slot| {
                        vk::AttachmentReference::default()
                            .attachment(slot.main as u32)
                            .layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    })
                    .collect();
                refs
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 600,
    };
    const COLOR: vk::Format = vk::Format::R8G8B8A8_UNORM;
    const DEPTH: vk::Format = vk::Format::D32_SFLOAT;
    const BLACK: ClearValue = ClearValue::Color([0.0, 0.0, 0.0, 1.0]);
    const FAR: ClearValue = ClearValue::Depth(1.0);

    /// Deferred-style graph: a G-buffer stage with three colors and depth,
    /// then a lighting stage reading all four plus presenting.
    fn deferred(multisampled: bool) -> GraphDesc {
        let mut graph = GraphDesc::new(multisampled);
        for _ in 0..3 {
            graph.add_color_attachment(COLOR, BLACK, false);
        }
        graph.add_depth_attachment(DEPTH, FAR, false).unwrap();
        graph.add_stage(false);
        graph
            .add_presentation_attachment(vk::Format::B8G8R8A8_SRGB, BLACK)
            .unwrap();
        for attachment in 0..4 {
            graph.add_stage_input(0, attachment).unwrap();
        }
        graph
    }

    #[test]
    fn test_new_graph_has_one_stage() {
        let graph = GraphDesc::new(true);
        assert_eq!(graph.stage_count(), 1);
        assert!(graph.stages()[0].multisampled);
    }

    #[test]
    fn test_stage_inputs_dedup_by_source() {
        let graph = deferred(false);
        let deps = graph.dependencies();
        // Baseline plus one edge from stage 0, not four.
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[1].src_subpass, 0);
        assert_eq!(deps[1].dst_subpass, 1);
        assert_eq!(deps[1].dst_access_mask, vk::AccessFlags::INPUT_ATTACHMENT_READ);
        assert_eq!(deps[1].dependency_flags, vk::DependencyFlags::BY_REGION);

        // The merged edge also waits for the depth write read as input 3.
        assert_eq!(
            deps[1].src_stage_mask,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        );
        assert_eq!(
            deps[1].src_access_mask,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        );
    }

    #[test]
    fn test_depth_only_input_uses_fragment_tests() {
        let mut graph = GraphDesc::new(false);
        graph.add_color_attachment(COLOR, BLACK, false);
        graph.add_depth_attachment(DEPTH, FAR, false).unwrap();
        graph.add_stage(false);
        graph.add_color_attachment(COLOR, BLACK, false);
        graph.add_stage_input(0, 1).unwrap();

        let deps = graph.dependencies();
        assert_eq!(deps.len(), 2);
        assert_eq!(
            deps[1].src_stage_mask,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
        );
        assert_eq!(
            deps[1].src_access_mask,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        );
    }

    #[test]
    fn test_inputs_from_two_sources_get_separate_edges() {
        let mut graph = GraphDesc::new(false);
        graph.add_color_attachment(COLOR, BLACK, false);
        graph.add_stage(false);
        graph.add_color_attachment(COLOR, BLACK, false);
        graph.add_depth_attachment(DEPTH, FAR, false).unwrap();
        graph.add_stage(false);
        graph.add_color_attachment(COLOR, BLACK, false);
        graph.add_stage_input(1, 1).unwrap();
        graph.add_stage_input(0, 0).unwrap();
        graph.add_stage_input(1, 0).unwrap();

        let deps = graph.dependencies();
        // Baseline, 1 -> 2, 0 -> 2.
        assert_eq!(deps.len(), 3);
        assert_eq!((deps[1].src_subpass, deps[1].dst_subpass), (1, 2));
        assert_eq!(
            deps[1].src_access_mask,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
                | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        );
        assert_eq!((deps[2].src_subpass, deps[2].dst_subpass), (0, 2));
        assert_eq!(
            deps[2].src_stage_mask,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
    }

    #[test]
    fn test_depth_attachment_rejects_color_clear() {
        let mut graph = GraphDesc::new(false);
        graph.add_color_attachment(COLOR, BLACK, false);
        assert!(matches!(
            graph.add_depth_attachment(DEPTH, BLACK, false),
            Err(RenderError::Configuration(_))
        ));
        assert!(graph.stages()[0].depth.is_none());
    }

    #[test]
    fn test_baseline_dependency() {
        let mut graph = GraphDesc::new(false);
        graph.add_color_attachment(COLOR, BLACK, false);
        let deps = graph.dependencies();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(deps[0].dst_subpass, 0);
        assert_eq!(deps[0].src_access_mask, vk::AccessFlags::empty());
        assert_eq!(
            deps[0].dst_access_mask,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        );
    }

    #[test]
    fn test_multisampled_and_external_dependencies() {
        let mut graph = GraphDesc::new(true);
        graph
            .add_presentation_attachment(vk::Format::B8G8R8A8_SRGB, BLACK)
            .unwrap();
        graph.add_external_input(vk::ImageView::null(), false);
        graph.add_external_input(vk::ImageView::null(), true);

        let deps = graph.dependencies();
        assert_eq!(deps.len(), 4);
        assert_eq!(
            deps[1].dst_access_mask,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::COLOR_ATTACHMENT_READ
        );
        assert_eq!(deps[1].dependency_flags, vk::DependencyFlags::empty());
        assert_eq!(deps[2].dst_stage_mask, vk::PipelineStageFlags::FRAGMENT_SHADER);
        assert_eq!(deps[3].dst_access_mask, vk::AccessFlags::SHADER_READ);
    }

    #[test]
    fn test_attachment_ref_layout() {
        let mut stage = StageDesc::new(true);
        let color = AttachmentDesc {
            format: COLOR,
            kind: AttachmentKind::Color,
            clear: BLACK,
            externally_consumed: false,
        };
        stage.colors = vec![color, color];
        stage.depth = Some(AttachmentDesc {
            format: DEPTH,
            kind: AttachmentKind::Depth,
            clear: FAR,
            externally_consumed: false,
        });

        assert_eq!(
            stage.attachment_refs(),
            vec![
                AttachmentRef::Color(0),
                AttachmentRef::Color(1),
                AttachmentRef::Depth,
                AttachmentRef::Resolve(0),
                AttachmentRef::Resolve(1),
            ]
        );
    }

    #[test]
    fn test_unresolved_color_reference_is_unused() {
        let mut graph = GraphDesc::new(true);
        graph.add_color_attachment(COLOR, BLACK, false);
        graph.add_color_attachment(COLOR, BLACK, true);
        let plan = graph.plan_images(EXTENT, 1, vk::SampleCountFlags::TYPE_4);

        // Interleaved: color 0, color 1, resolve of color 1.
        assert_eq!(plan.images.len(), 3);
        let refs = plan.stage_references(&graph);
        assert_eq!(refs[0].resolves[0].attachment, vk::ATTACHMENT_UNUSED);
        assert_eq!(refs[0].resolves[1].attachment, 2);
        assert_eq!(refs[0].colors[1].attachment, 1);
    }

    #[test]
    fn test_multisampled_presentation_resolves_to_swapchain() {
        let mut graph = GraphDesc::new(true);
        graph
            .add_presentation_attachment(vk::Format::B8G8R8A8_SRGB, BLACK)
            .unwrap();
        graph.add_depth_attachment(DEPTH, FAR, false).unwrap();
        let plan = graph.plan_images(EXTENT, 1, vk::SampleCountFlags::TYPE_8);

        assert_eq!(plan.images.len(), 3);
        assert!(!plan.images[0].swapchain);
        assert_eq!(plan.images[0].desc.samples, vk::SampleCountFlags::TYPE_8);
        assert!(plan.images[1].swapchain);
        assert_eq!(
            plan.images[1].desc.final_layout,
            vk::ImageLayout::PRESENT_SRC_KHR
        );
        assert_eq!(plan.images[2].desc.samples, vk::SampleCountFlags::TYPE_8);

        let descriptions = plan.attachment_descriptions();
        assert_eq!(descriptions[0].store_op, vk::AttachmentStoreOp::DONT_CARE);
        assert_eq!(descriptions[1].store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(descriptions[1].load_op, vk::AttachmentLoadOp::DONT_CARE);
    }

    #[test]
    fn test_single_sampled_presentation_is_swapchain_main() {
        let mut graph = GraphDesc::new(false);
        graph
            .add_presentation_attachment(vk::Format::B8G8R8A8_SRGB, BLACK)
            .unwrap();
        let plan = graph.plan_images(EXTENT, 1, vk::SampleCountFlags::TYPE_1);
        assert_eq!(plan.images.len(), 1);
        assert!(plan.images[0].swapchain);
        assert_eq!(plan.slots(0, 0).unwrap().resolve, None);
    }

    #[test]
    fn test_externally_consumed_color_layouts() {
        let mut graph = GraphDesc::new(false);
        graph.add_color_attachment(COLOR, BLACK, true);
        let plan = graph.plan_images(EXTENT, 1, vk::SampleCountFlags::TYPE_1);
        let desc = plan.images[0].desc;
        assert!(desc.usage.contains(vk::ImageUsageFlags::SAMPLED));
        assert_eq!(desc.initial_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(desc.final_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn test_stage_input_adds_usage_and_reference() {
        let graph = deferred(false);
        let plan = graph.plan_images(EXTENT, 1, vk::SampleCountFlags::TYPE_1);
        for attachment in 0..4 {
            let slot = plan.slots(0, attachment).unwrap();
            assert!(
                plan.images[slot.main]
                    .desc
                    .usage
                    .contains(vk::ImageUsageFlags::INPUT_ATTACHMENT)
            );
        }
        let refs = plan.stage_references(&graph);
        assert_eq!(refs[1].inputs.len(), 4);
        assert_eq!(refs[1].inputs[3].attachment, 3);
        assert_eq!(
            refs[1].inputs[0].layout,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
    }

    #[test]
    fn test_multisampled_external_depth_rejected() {
        let mut graph = GraphDesc::new(true);
        graph.add_color_attachment(COLOR, BLACK, false);
        assert!(matches!(
            graph.add_depth_attachment(DEPTH, FAR, true),
            Err(RenderError::Configuration(_))
        ));
        assert!(graph.add_depth_attachment(DEPTH, FAR, false).is_ok());
    }

    #[test]
    fn test_validate_catches_multisampled_external_depth() {
        let mut graph = GraphDesc::new(false);
        graph.add_depth_attachment(DEPTH, FAR, true).unwrap();
        graph.stages[0].multisampled = true;
        assert!(matches!(
            graph.validate(1),
            Err(RenderError::Configuration(_))
        ));
    }

    #[test]
    fn test_second_depth_and_presentation_rejected() {
        let mut graph = GraphDesc::new(false);
        graph.add_depth_attachment(DEPTH, FAR, false).unwrap();
        assert!(graph.add_depth_attachment(DEPTH, FAR, false).is_err());
        graph.add_presentation_attachment(COLOR, BLACK).unwrap();
        graph.add_stage(false);
        assert!(graph.add_presentation_attachment(COLOR, BLACK).is_err());
    }

    #[test]
    fn test_stage_input_bounds() {
        let mut graph = GraphDesc::new(false);
        graph.add_color_attachment(COLOR, BLACK, false);
        assert!(graph.add_stage_input(0, 0).is_err());
        graph.add_stage(false);
        // Stage 0 has one color and no depth.
        assert!(graph.add_stage_input(0, 1).is_err());
        assert!(graph.add_stage_input(1, 0).is_err());
        assert!(graph.add_stage_input(0, 0).is_ok());
    }

    #[test]
    fn test_multisampled_depth_input_rejected() {
        let graph = deferred(true);
        assert!(matches!(
            graph.validate(1),
            Err(RenderError::Configuration(_))
        ));

        let mut colors_only = GraphDesc::new(true);
        colors_only.add_color_attachment(COLOR, BLACK, false);
        colors_only.add_stage(false);
        colors_only.add_color_attachment(COLOR, BLACK, false);
        colors_only.add_stage_input(0, 0).unwrap();
        assert!(colors_only.validate(1).is_ok());
    }

    #[test]
    fn test_empty_stage_rejected() {
        let graph = GraphDesc::new(false);
        assert!(graph.validate(1).is_err());
    }

    #[test]
    fn test_unknown_stage_not_found() {
        let graph = GraphDesc::new(false);
        assert!(matches!(graph.stage(3), Err(RenderError::NotFound(_))));
    }
}
