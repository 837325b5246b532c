//! Per-frame descriptor tables.
//!
//! A [`ResourceBindingSet`] is one descriptor set layout with one descriptor
//! set per frame in flight. Buffers are replicated once per frame slot so
//! that the CPU can write slot `f` while the GPU still reads the others.
//!
//! A double-bound buffer occupies two consecutive bindings: the first one
//! points at the previous frame's replica and the second at the current one,
//! which lets a shader read last frame's results while writing this frame's.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use framegraph_rhi::device::Device;
//! use framegraph_renderer::binding_set::{DescriptorKind, ResourceBindingSet};
//!
//! # fn example(device: Arc<Device>) -> framegraph_renderer::RenderResult<()> {
//! let mut camera = ResourceBindingSet::new(device, "Camera", 2)?;
//! camera.add_buffer("Camera", DescriptorKind::UniformBuffer, 128, false, None)?;
//! camera.init()?;
//! camera.update_buffer("Camera", 0, &[0u8; 128])?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use framegraph_rhi::buffer::{Buffer, BufferUsage};
use framegraph_rhi::command::CommandBuffer;
use framegraph_rhi::descriptor::{
    DescriptorPool, DescriptorSetLayout, buffer_info, image_info, layout_binding,
    update_descriptor_sets,
};
use framegraph_rhi::device::Device;
use framegraph_rhi::sampler::Sampler;
use tracing::{debug, info, warn};

use crate::error::{RenderError, RenderResult};

/// Descriptor type of a binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    UniformBuffer,
    StorageBuffer,
    SampledImage,
    CombinedImageSampler,
    StorageImage,
    InputAttachment,
}

impl DescriptorKind {
    pub fn to_vk(self) -> vk::DescriptorType {
        match self {
            DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            DescriptorKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            DescriptorKind::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
            DescriptorKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            DescriptorKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            DescriptorKind::InputAttachment => vk::DescriptorType::INPUT_ATTACHMENT,
        }
    }

    pub fn is_buffer(self) -> bool {
        matches!(
            self,
            DescriptorKind::UniformBuffer | DescriptorKind::StorageBuffer
        )
    }

    /// Layout images of this kind are expected in when read.
    pub fn image_layout(self) -> vk::ImageLayout {
        match self {
            DescriptorKind::StorageImage => vk::ImageLayout::GENERAL,
            _ => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    pub fn stage_flags(self) -> vk::ShaderStageFlags {
        match self {
            DescriptorKind::InputAttachment => vk::ShaderStageFlags::FRAGMENT,
            _ => vk::ShaderStageFlags::ALL,
        }
    }
}

/// Replica of a buffer that binding `binding` of a `binding_count`-wide
/// descriptor reads during frame slot `frame`.
///
/// The last binding reads the current frame, each earlier binding one frame
/// further back.
pub fn replica_index(
    frame: usize,
    frames_in_flight: usize,
    binding: usize,
    binding_count: usize,
) -> usize {
    let back = binding_count - 1 - binding;
    (frame + frames_in_flight - back % frames_in_flight) % frames_in_flight
}

/// One declared resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindingDecl {
    pub name: String,
    pub kind: DescriptorKind,
    pub first_binding: u32,
    pub double_binding: bool,
    pub descriptor_count: u32,
    /// Byte size of each replica; zero for images.
    pub size: vk::DeviceSize,
}

impl BindingDecl {
    pub fn binding_count(&self) -> u32 {
        if self.double_binding { 2 } else { 1 }
    }
}

/// Declaration order and binding indices of a binding set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BindingTable {
    decls: Vec<BindingDecl>,
    next_binding: u32,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a resource at the next free binding index.
    pub fn push(
        &mut self,
        name: &str,
        kind: DescriptorKind,
        double_binding: bool,
        descriptor_count: u32,
    ) -> RenderResult<u32> {
        if self.decls.iter().any(|decl| decl.name == name) {
            return Err(RenderError::config(format!(
                "Resource '{}' is already declared",
                name
            )));
        }

        let decl = BindingDecl {
            name: name.to_string(),
            kind,
            first_binding: self.next_binding,
            double_binding,
            descriptor_count,
            size: 0,
        };
        self.next_binding += decl.binding_count();
        let binding = decl.first_binding;
        self.decls.push(decl);
        Ok(binding)
    }

    /// Declares a buffer of `size` bytes per replica.
    pub fn push_buffer(
        &mut self,
        name: &str,
        kind: DescriptorKind,
        double_binding: bool,
        size: vk::DeviceSize,
    ) -> RenderResult<u32> {
        let binding = self.push(name, kind, double_binding, 1)?;
        if let Some(decl) = self.decls.last_mut() {
            decl.size = size;
        }
        Ok(binding)
    }

    /// Validates a write of `len` bytes to buffer `name` in frame slot `slot`
    /// and returns the buffer's declaration index.
    ///
    /// # Errors
    ///
    /// [`RenderError::NotFound`] for an unknown name,
    /// [`RenderError::Configuration`] for an image, a slot out of range or a
    /// length that differs from the declared size.
    pub fn check_buffer_write(
        &self,
        name: &str,
        slot: usize,
        frames_in_flight: usize,
        len: usize,
    ) -> RenderResult<usize> {
        let (index, decl) = self.find(name)?;
        if !decl.kind.is_buffer() {
            return Err(RenderError::config(format!(
                "'{}' is an image, not a buffer",
                name
            )));
        }
        if slot >= frames_in_flight {
            return Err(RenderError::config(format!(
                "Frame slot {} out of range for {} frame(s) in flight",
                slot, frames_in_flight
            )));
        }
        if len as vk::DeviceSize != decl.size {
            return Err(RenderError::config(format!(
                "Update of '{}' is {} bytes, expected {}",
                name, len, decl.size
            )));
        }
        Ok(index)
    }

    pub fn find(&self, name: &str) -> RenderResult<(usize, &BindingDecl)> {
        self.decls
            .iter()
            .enumerate()
            .find(|(_, decl)| decl.name == name)
            .ok_or_else(|| RenderError::not_found(format!("No resource named '{}'", name)))
    }

    pub fn decls(&self) -> &[BindingDecl] {
        &self.decls
    }

    /// Total number of bindings, counting double bindings twice.
    pub fn binding_count(&self) -> u32 {
        self.next_binding
    }

    pub fn layout_bindings(&self) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        self.decls
            .iter()
            .flat_map(|decl| {
                (0..decl.binding_count()).map(move |offset| {
                    layout_binding(
                        decl.first_binding + offset,
                        decl.kind.to_vk(),
                        decl.descriptor_count,
                        decl.kind.stage_flags(),
                    )
                })
            })
            .collect()
    }

    pub fn pool_sizes(&self, frames_in_flight: usize) -> Vec<vk::DescriptorPoolSize> {
        self.decls
            .iter()
            .flat_map(|decl| {
                let size = vk::DescriptorPoolSize::default()
                    .ty(decl.kind.to_vk())
                    .descriptor_count(frames_in_flight as u32 * decl.descriptor_count.max(1));
                std::iter::repeat_n(size, decl.binding_count() as usize)
            })
            .collect()
    }
}

enum ResourceData {
    Buffer {
        size: vk::DeviceSize,
        initial_data: Option<Vec<u8>>,
        replicas: Vec<Buffer>,
    },
    Images {
        views: Vec<vk::ImageView>,
    },
}

/// GPU objects, declared in teardown order.
struct BindingSetObjects {
    sets: Vec<vk::DescriptorSet>,
    /// `None` for a set without bindings.
    pool: Option<DescriptorPool>,
    layout: DescriptorSetLayout,
    sampler: Option<Sampler>,
}

/// Descriptor set layout plus one descriptor set per frame in flight.
pub struct ResourceBindingSet {
    device: Arc<Device>,
    name: String,
    frames_in_flight: usize,
    table: BindingTable,
    data: Vec<ResourceData>,
    objects: Option<BindingSetObjects>,
}

impl ResourceBindingSet {
    pub fn new(
        device: Arc<Device>,
        name: impl Into<String>,
        frames_in_flight: usize,
    ) -> RenderResult<Self> {
        if frames_in_flight == 0 {
            return Err(RenderError::config(
                "A binding set needs at least one frame in flight",
            ));
        }

        Ok(Self {
            device,
            name: name.into(),
            frames_in_flight,
            table: BindingTable::new(),
            data: Vec::new(),
            objects: None,
        })
    }

    fn ensure_building(&self) -> RenderResult<()> {
        if self.objects.is_some() {
            return Err(RenderError::state(format!(
                "Binding set '{}' is already initialized",
                self.name
            )));
        }
        Ok(())
    }

    /// Declares a uniform or storage buffer of `size` bytes, replicated once
    /// per frame in flight. `initial_data`, if given, must be `size` bytes and
    /// is copied into every replica at [`init`](Self::init).
    pub fn add_buffer(
        &mut self,
        name: &str,
        kind: DescriptorKind,
        size: vk::DeviceSize,
        double_binding: bool,
        initial_data: Option<&[u8]>,
    ) -> RenderResult<u32> {
        self.ensure_building()?;
        if !kind.is_buffer() {
            return Err(RenderError::config(format!(
                "'{}' declared as a buffer with image kind {:?}",
                name, kind
            )));
        }
        if size == 0 {
            return Err(RenderError::config(format!("Buffer '{}' has zero size", name)));
        }
        if let Some(data) = initial_data
            && data.len() as vk::DeviceSize != size
        {
            return Err(RenderError::config(format!(
                "Initial data of '{}' is {} bytes, expected {}",
                name,
                data.len(),
                size
            )));
        }

        let binding = self.table.push_buffer(name, kind, double_binding, size)?;
        self.data.push(ResourceData::Buffer {
            size,
            initial_data: initial_data.map(<[u8]>::to_vec),
            replicas: Vec::new(),
        });
        Ok(binding)
    }

    pub fn add_image(
        &mut self,
        name: &str,
        kind: DescriptorKind,
        view: vk::ImageView,
    ) -> RenderResult<u32> {
        self.add_images(name, kind, &[view])
    }

    /// Declares an array of images bound at one binding.
    pub fn add_images(
        &mut self,
        name: &str,
        kind: DescriptorKind,
        views: &[vk::ImageView],
    ) -> RenderResult<u32> {
        self.ensure_building()?;
        if kind.is_buffer() {
            return Err(RenderError::config(format!(
                "'{}' declared as an image with buffer kind {:?}",
                name, kind
            )));
        }
        if views.is_empty() {
            return Err(RenderError::config(format!("Image array '{}' is empty", name)));
        }

        let binding = self.table.push(name, kind, false, views.len() as u32)?;
        self.data.push(ResourceData::Images {
            views: views.to_vec(),
        });
        Ok(binding)
    }

    /// Creates buffers, layout, pool and the per-frame descriptor sets.
    pub fn init(&mut self) -> RenderResult<()> {
        self.ensure_building()?;

        for (decl, data) in self.table.decls().iter().zip(self.data.iter_mut()) {
            let ResourceData::Buffer {
                size,
                initial_data,
                replicas,
            } = data
            else {
                continue;
            };

            let usage = match decl.kind {
                DescriptorKind::UniformBuffer => BufferUsage::Uniform,
                _ => BufferUsage::Storage,
            };
            for _ in 0..self.frames_in_flight {
                replicas.push(Buffer::new(self.device.clone(), usage, *size)?);
            }

            if let Some(initial) = initial_data.take() {
                if usage.is_host_visible() {
                    for replica in replicas.iter() {
                        replica.write_data(0, &initial)?;
                    }
                } else {
                    let targets: Vec<&Buffer> = replicas.iter().collect();
                    Buffer::upload_via_staging(&self.device, &targets, &initial)?;
                }
            }
        }

        let layout = DescriptorSetLayout::new(self.device.clone(), &self.table.layout_bindings())?;
        let pool_sizes = self.table.pool_sizes(self.frames_in_flight);
        let (pool, sets) = if pool_sizes.is_empty() {
            warn!("Binding set '{}' has no bindings, no descriptor sets allocated", self.name);
            (None, Vec::new())
        } else {
            let pool = DescriptorPool::new(
                self.device.clone(),
                self.frames_in_flight as u32,
                &pool_sizes,
            )?;
            let layouts = vec![layout.handle(); self.frames_in_flight];
            let sets = pool.allocate(&layouts)?;
            (Some(pool), sets)
        };

        let needs_sampler = self
            .table
            .decls()
            .iter()
            .any(|decl| decl.kind == DescriptorKind::CombinedImageSampler);
        let sampler = if needs_sampler {
            Some(Sampler::new_linear_repeat(self.device.clone())?)
        } else {
            None
        };
        let sampler_handle = sampler.as_ref().map_or(vk::Sampler::null(), Sampler::handle);

        for (frame, &set) in sets.iter().enumerate() {
            self.write_frame(set, frame, sampler_handle);
        }

        info!(
            "Binding set '{}' initialized: {} binding(s), {} frame(s)",
            self.name,
            self.table.binding_count(),
            self.frames_in_flight
        );

        self.objects = Some(BindingSetObjects {
            sets,
            pool,
            layout,
            sampler,
        });
        Ok(())
    }

    fn write_frame(&self, set: vk::DescriptorSet, frame: usize, sampler: vk::Sampler) {
        for (decl, data) in self.table.decls().iter().zip(&self.data) {
            match data {
                ResourceData::Buffer { size, replicas, .. } => {
                    let count = decl.binding_count() as usize;
                    for offset in 0..count {
                        let replica = replica_index(frame, self.frames_in_flight, offset, count);
                        let info = [buffer_info(replicas[replica].handle(), 0, *size)];
                        let write = vk::WriteDescriptorSet::default()
                            .dst_set(set)
                            .dst_binding(decl.first_binding + offset as u32)
                            .descriptor_type(decl.kind.to_vk())
                            .buffer_info(&info);
                        update_descriptor_sets(&self.device, std::slice::from_ref(&write));
                    }
                }
                ResourceData::Images { views } => {
                    let image_sampler = if decl.kind == DescriptorKind::CombinedImageSampler {
                        sampler
                    } else {
                        vk::Sampler::null()
                    };
                    let infos: Vec<vk::DescriptorImageInfo> = views
                        .iter()
                        .map(|&view| image_info(image_sampler, view, decl.kind.image_layout()))
                        .collect();
                    let write = vk::WriteDescriptorSet::default()
                        .dst_set(set)
                        .dst_binding(decl.first_binding)
                        .descriptor_type(decl.kind.to_vk())
                        .image_info(&infos);
                    update_descriptor_sets(&self.device, std::slice::from_ref(&write));
                }
            }
        }
        debug!("Binding set '{}' frame {} written", self.name, frame);
    }

    fn objects(&self) -> RenderResult<&BindingSetObjects> {
        self.objects.as_ref().ok_or_else(|| {
            RenderError::state(format!("Binding set '{}' is not initialized", self.name))
        })
    }

    fn check_slot(&self, slot: usize) -> RenderResult<()> {
        if slot >= self.frames_in_flight {
            return Err(RenderError::config(format!(
                "Frame slot {} out of range for {} frame(s) in flight",
                slot, self.frames_in_flight
            )));
        }
        Ok(())
    }

    /// Replica of buffer `name` written during frame slot `slot`.
    fn replica(&self, name: &str, slot: usize) -> RenderResult<(DescriptorKind, &Buffer)> {
        self.objects()?;
        self.check_slot(slot)?;
        let (index, decl) = self.table.find(name)?;
        match &self.data[index] {
            ResourceData::Buffer { replicas, .. } => replicas
                .get(slot)
                .map(|buffer| (decl.kind, buffer))
                .ok_or_else(|| RenderError::state(format!("Buffer '{}' has no replicas", name))),
            ResourceData::Images { .. } => Err(RenderError::config(format!(
                "'{}' is an image, not a buffer",
                name
            ))),
        }
    }

    /// Replaces the contents of buffer `name` for frame slot `slot`.
    ///
    /// Uniform buffers are written through their mapping; storage buffers go
    /// through a staging copy. `data` must match the declared size exactly;
    /// nothing is written when any check fails.
    pub fn update_buffer(&self, name: &str, slot: usize, data: &[u8]) -> RenderResult<()> {
        self.objects()?;
        self.table
            .check_buffer_write(name, slot, self.frames_in_flight, data.len())?;
        let (_, buffer) = self.replica(name, slot)?;

        if buffer.usage().is_host_visible() {
            buffer.write_data(0, data)?;
        } else {
            Buffer::upload_via_staging(&self.device, &[buffer], data)?;
        }
        Ok(())
    }

    /// Reads back the contents of buffer `name` for frame slot `slot`.
    pub fn read_buffer(&self, name: &str, slot: usize) -> RenderResult<Vec<u8>> {
        let (_, buffer) = self.replica(name, slot)?;
        let bytes = if buffer.usage().is_host_visible() {
            buffer.read_data(0, buffer.size() as usize)?
        } else {
            buffer.download_via_staging()?
        };
        Ok(bytes)
    }

    fn storage_replica(&self, name: &str, slot: usize) -> RenderResult<&Buffer> {
        let (kind, buffer) = self.replica(name, slot)?;
        if kind != DescriptorKind::StorageBuffer {
            return Err(RenderError::config(format!(
                "'{}' is not a storage buffer",
                name
            )));
        }
        Ok(buffer)
    }

    /// Records a zero fill of storage buffer `name` for frame slot `slot`.
    pub fn clear_buffer(&self, name: &str, cmd: &CommandBuffer, slot: usize) -> RenderResult<()> {
        let buffer = self.storage_replica(name, slot)?;
        cmd.fill_buffer(buffer.handle(), vk::WHOLE_SIZE, 0);
        Ok(())
    }

    /// Records a copy of the previous slot's replica into slot `slot`.
    pub fn copy_buffer_from_last_frame(
        &self,
        name: &str,
        cmd: &CommandBuffer,
        slot: usize,
    ) -> RenderResult<()> {
        let previous = (slot + self.frames_in_flight - 1) % self.frames_in_flight;
        let dst = self.storage_replica(name, slot)?;
        let src = self.storage_replica(name, previous)?;
        cmd.copy_buffer(src.handle(), dst.handle(), dst.size());
        Ok(())
    }

    pub fn layout(&self) -> RenderResult<vk::DescriptorSetLayout> {
        Ok(self.objects()?.layout.handle())
    }

    /// Descriptor set of frame slot `slot`.
    ///
    /// A set without bindings has none to bind.
    pub fn set(&self, slot: usize) -> RenderResult<vk::DescriptorSet> {
        self.check_slot(slot)?;
        self.objects()?.sets.get(slot).copied().ok_or_else(|| {
            RenderError::state(format!("Binding set '{}' has no bindings", self.name))
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn binding_of(&self, name: &str) -> RenderResult<u32> {
        Ok(self.table.find(name)?.1.first_binding)
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    pub fn is_initialized(&self) -> bool {
        self.objects.is_some()
    }

    /// Destroys pool, layout and sampler, then the buffers.
    ///
    /// The GPU must no longer use any of the sets.
    pub fn destroy(&mut self) {
        if let Some(objects) = self.objects.take() {
            drop(objects);
            for data in &mut self.data {
                if let ResourceData::Buffer { replicas, .. } = data {
                    replicas.clear();
                }
            }
            info!("Binding set '{}' destroyed", self.name);
        }
    }
}

impl Drop for ResourceBindingSet {
    fn drop(&mut self) {
        if self.objects.is_some() {
            warn!(
                "Binding set '{}' dropped without destroy(), tearing down implicitly",
                self.name
            );
            self.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bindings_are_consecutive() {
        let mut table = BindingTable::new();
        assert_eq!(
            table
                .push("Camera", DescriptorKind::UniformBuffer, false, 1)
                .unwrap(),
            0
        );
        assert_eq!(
            table
                .push("Particles", DescriptorKind::StorageBuffer, true, 1)
                .unwrap(),
            1
        );
        assert_eq!(
            table
                .push("Textures", DescriptorKind::CombinedImageSampler, false, 4)
                .unwrap(),
            3
        );
        assert_eq!(table.binding_count(), 4);

        let bindings = table.layout_bindings();
        let indices: Vec<u32> = bindings.iter().map(|b| b.binding).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(bindings[3].descriptor_count, 4);
        assert_eq!(bindings[0].stage_flags, vk::ShaderStageFlags::ALL);
    }

    #[test]
    fn test_lookup() {
        let mut table = BindingTable::new();
        table
            .push("Camera", DescriptorKind::UniformBuffer, false, 1)
            .unwrap();
        table
            .push("GBuffer", DescriptorKind::InputAttachment, false, 1)
            .unwrap();

        let (index, decl) = table.find("GBuffer").unwrap();
        assert_eq!(index, 1);
        assert_eq!(decl.first_binding, 1);
        assert_eq!(decl.kind.stage_flags(), vk::ShaderStageFlags::FRAGMENT);
        assert!(matches!(table.find("Lights"), Err(RenderError::NotFound(_))));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut table = BindingTable::new();
        table
            .push("Camera", DescriptorKind::UniformBuffer, false, 1)
            .unwrap();
        assert!(
            table
                .push("Camera", DescriptorKind::StorageBuffer, false, 1)
                .is_err()
        );
    }

    #[test]
    fn test_pool_sizes() {
        let mut table = BindingTable::new();
        table
            .push("Camera", DescriptorKind::UniformBuffer, false, 1)
            .unwrap();
        table
            .push("History", DescriptorKind::StorageBuffer, true, 1)
            .unwrap();
        table
            .push("Shadows", DescriptorKind::SampledImage, false, 3)
            .unwrap();

        let sizes = table.pool_sizes(2);
        assert_eq!(sizes.len(), 4);
        assert_eq!(sizes[0].descriptor_count, 2);
        assert_eq!(sizes[1].ty, vk::DescriptorType::STORAGE_BUFFER);
        assert_eq!(sizes[2].ty, vk::DescriptorType::STORAGE_BUFFER);
        assert_eq!(sizes[3].descriptor_count, 6);
    }

    #[test]
    fn test_empty_table_needs_no_pool() {
        let table = BindingTable::new();
        assert_eq!(table.binding_count(), 0);
        assert!(table.layout_bindings().is_empty());
        assert!(table.pool_sizes(3).is_empty());
    }

    fn camera_and_particles() -> BindingTable {
        let mut table = BindingTable::new();
        table
            .push_buffer("Camera", DescriptorKind::UniformBuffer, false, 128)
            .unwrap();
        table
            .push_buffer("Particles", DescriptorKind::StorageBuffer, true, 4096)
            .unwrap();
        table
            .push("Albedo", DescriptorKind::CombinedImageSampler, false, 1)
            .unwrap();
        table
    }

    #[test]
    fn test_buffer_write_to_unknown_name() {
        let table = camera_and_particles();
        let before = table.clone();
        assert!(matches!(
            table.check_buffer_write("Lights", 0, 2, 128),
            Err(RenderError::NotFound(_))
        ));
        assert_eq!(table, before);
    }

    #[test]
    fn test_buffer_write_size_must_match() {
        let table = camera_and_particles();
        assert_eq!(table.check_buffer_write("Camera", 1, 2, 128).unwrap(), 0);
        assert_eq!(table.check_buffer_write("Particles", 0, 2, 4096).unwrap(), 1);
        assert!(matches!(
            table.check_buffer_write("Camera", 0, 2, 64),
            Err(RenderError::Configuration(_))
        ));
        assert!(matches!(
            table.check_buffer_write("Particles", 0, 2, 4097),
            Err(RenderError::Configuration(_))
        ));
    }

    #[test]
    fn test_buffer_write_checks_slot_and_kind() {
        let table = camera_and_particles();
        assert!(matches!(
            table.check_buffer_write("Camera", 2, 2, 128),
            Err(RenderError::Configuration(_))
        ));
        assert!(matches!(
            table.check_buffer_write("Albedo", 0, 2, 0),
            Err(RenderError::Configuration(_))
        ));
    }

    #[test]
    fn test_single_binding_reads_current_frame() {
        for frame in 0..3 {
            assert_eq!(replica_index(frame, 3, 0, 1), frame);
        }
    }

    #[test]
    fn test_double_binding_replicas() {
        // Binding 0 reads the previous frame, binding 1 the current one.
        assert_eq!(replica_index(0, 3, 0, 2), 2);
        assert_eq!(replica_index(0, 3, 1, 2), 0);
        assert_eq!(replica_index(1, 3, 0, 2), 0);
        assert_eq!(replica_index(2, 3, 0, 2), 1);
        assert_eq!(replica_index(2, 3, 1, 2), 2);
    }

    #[test]
    fn test_double_binding_single_frame() {
        assert_eq!(replica_index(0, 1, 0, 2), 0);
        assert_eq!(replica_index(0, 1, 1, 2), 0);
    }

    #[test]
    fn test_kind_properties() {
        assert!(DescriptorKind::UniformBuffer.is_buffer());
        assert!(!DescriptorKind::StorageImage.is_buffer());
        assert_eq!(
            DescriptorKind::StorageImage.image_layout(),
            vk::ImageLayout::GENERAL
        );
        assert_eq!(
            DescriptorKind::CombinedImageSampler.image_layout(),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
    }

    #[test]
    fn test_binding_set_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<ResourceBindingSet>();
    }
}
