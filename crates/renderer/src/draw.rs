//! Draw submission interface between scenes and render steps.
//!
//! A scene implements [`DrawSource`]; a step in mesh mode asks it for
//! [`Drawable`]s, pushes a [`DrawConstants`] block for each and issues an
//! indexed draw of its [`GpuMesh`]. A step in light mode pushes each
//! [`PointLight`]'s proxy transform instead and draws its proxy.

use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use framegraph_rhi::buffer::{Buffer, BufferUsage};
use framegraph_rhi::command::CommandBuffer;
use framegraph_rhi::device::Device;
use framegraph_rhi::vertex::Vertex;
use glam::{Mat4, Vec3, Vec4};
use tracing::debug;

use crate::error::{RenderError, RenderResult};

/// Per-draw push constant block, visible to vertex and fragment stages.
///
/// # Memory Layout
///
/// - Offset 0: model matrix (64 bytes)
/// - Offset 64: material index (4 bytes)
/// - Offset 68: padding (12 bytes)
/// - Total size: 80 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct DrawConstants {
    pub model: Mat4,
    pub material_index: u32,
    pub _padding: [u32; 3],
}

impl DrawConstants {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(model: Mat4, material_index: u32) -> Self {
        Self {
            model,
            material_index,
            _padding: [0; 3],
        }
    }
}

/// Point light as uploaded to a light storage buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PointLight {
    /// World position; `w` holds the radius.
    pub position: Vec4,
    /// Linear color; `w` holds the intensity.
    pub color: Vec4,
}

impl PointLight {
    /// Model matrix of the light's proxy: a unit shape scaled to the radius
    /// and moved to the light position.
    pub fn transform(&self) -> Mat4 {
        Mat4::from_translation(self.position.truncate()) * Mat4::from_scale(Vec3::splat(self.position.w))
    }
}

/// Vertex and index buffers of one mesh.
pub struct GpuMesh {
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    index_count: u32,
}

impl GpuMesh {
    pub fn new(device: Arc<Device>, vertices: &[Vertex], indices: &[u32]) -> RenderResult<Self> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(RenderError::config("A mesh needs vertices and indices"));
        }

        let vertex_buffer = Buffer::new_with_data(
            device.clone(),
            BufferUsage::Vertex,
            bytemuck::cast_slice(vertices),
        )?;
        let index_buffer =
            Buffer::new_with_data(device, BufferUsage::Index, bytemuck::cast_slice(indices))?;

        debug!(
            "Mesh uploaded: {} vertices, {} indices",
            vertices.len(),
            indices.len()
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
        })
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Binds the buffers and draws every index once.
    pub fn draw(&self, cmd: &CommandBuffer) {
        cmd.bind_vertex_buffers(0, &[self.vertex_buffer.handle()], &[0]);
        cmd.bind_index_buffer(self.index_buffer.handle(), 0, vk::IndexType::UINT32);
        cmd.draw_indexed(self.index_count, 1, 0, 0, 0);
    }
}

/// One mesh instance to draw.
#[derive(Clone, Copy)]
pub struct Drawable<'a> {
    pub transform: Mat4,
    pub material_index: u32,
    pub mesh: &'a GpuMesh,
}

impl Drawable<'_> {
    pub fn constants(&self) -> DrawConstants {
        DrawConstants::new(self.transform, self.material_index)
    }
}

/// Something that can be drawn by a mesh-mode render step.
pub trait DrawSource {
    fn drawables(&self) -> impl Iterator<Item = Drawable<'_>>;

    fn lights(&self) -> impl Iterator<Item = PointLight> {
        std::iter::empty()
    }
}

/// Flat list of mesh instances and lights.
#[derive(Default)]
pub struct DrawList {
    meshes: Vec<GpuMesh>,
    instances: Vec<(usize, Mat4, u32)>,
    lights: Vec<PointLight>,
}

impl DrawList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership of a mesh and returns its handle for [`Self::add_instance`].
    pub fn add_mesh(&mut self, mesh: GpuMesh) -> usize {
        self.meshes.push(mesh);
        self.meshes.len() - 1
    }

    pub fn add_instance(&mut self, mesh: usize, transform: Mat4, material_index: u32) -> RenderResult<()> {
        if mesh >= self.meshes.len() {
            return Err(RenderError::not_found(format!("Mesh {} does not exist", mesh)));
        }
        self.instances.push((mesh, transform, material_index));
        Ok(())
    }

    pub fn add_light(&mut self, light: PointLight) {
        self.lights.push(light);
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    /// Updates the transform of instance `index`.
    pub fn set_transform(&mut self, index: usize, transform: Mat4) -> RenderResult<()> {
        let instance = self
            .instances
            .get_mut(index)
            .ok_or_else(|| RenderError::not_found(format!("Instance {} does not exist", index)))?;
        instance.1 = transform;
        Ok(())
    }
}

impl DrawSource for DrawList {
    fn drawables(&self) -> impl Iterator<Item = Drawable<'_>> {
        self.instances
            .iter()
            .filter_map(|&(mesh, transform, material_index)| {
                self.meshes.get(mesh).map(|mesh| Drawable {
                    transform,
                    material_index,
                    mesh,
                })
            })
    }

    fn lights(&self) -> impl Iterator<Item = PointLight> {
        self.lights.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draw_constants_size() {
        assert_eq!(DrawConstants::SIZE, 80);
        let constants = DrawConstants::new(Mat4::IDENTITY, 7);
        let bytes = bytemuck::bytes_of(&constants);
        assert_eq!(&bytes[64..68], &7u32.to_ne_bytes());
        assert!(bytes[68..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_point_light_size() {
        assert_eq!(std::mem::size_of::<PointLight>(), 32);
    }

    #[test]
    fn test_empty_draw_list() {
        let mut list = DrawList::new();
        assert_eq!(list.drawables().count(), 0);
        assert!(matches!(
            list.add_instance(0, Mat4::IDENTITY, 0),
            Err(RenderError::NotFound(_))
        ));
        assert!(list.set_transform(0, Mat4::IDENTITY).is_err());
    }

    #[test]
    fn test_draw_list_lights() {
        let mut list = DrawList::new();
        list.add_light(PointLight {
            position: Vec4::new(1.0, 2.0, 3.0, 10.0),
            color: Vec4::ONE,
        });
        let lights: Vec<PointLight> = list.lights().collect();
        assert_eq!(lights.len(), 1);
        assert_eq!(lights[0].position.w, 10.0);

        let transform = lights[0].transform();
        assert_eq!(transform.transform_point3(Vec3::ZERO), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(transform.transform_vector3(Vec3::X), Vec3::new(10.0, 0.0, 0.0));
    }
}
