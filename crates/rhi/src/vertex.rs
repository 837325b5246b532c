//! Mesh vertex layout and its pipeline input description.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

/// Vertex consumed by every mesh pipeline.
///
/// Memory layout (48 bytes, no padding):
/// - `position`: Vec4 homogeneous local position, location 0
/// - `normal`: Vec3, location 1
/// - `tex_coord`: Vec2, location 2
/// - `tangent`: Vec3, location 3
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec4,
    pub normal: Vec3,
    pub tex_coord: Vec2,
    pub tangent: Vec3,
}

impl Vertex {
    #[inline]
    pub const fn new(position: Vec3, normal: Vec3, tex_coord: Vec2, tangent: Vec3) -> Self {
        Self {
            position: Vec4::new(position.x, position.y, position.z, 1.0),
            normal,
            tex_coord,
            tangent,
        }
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 4] {
        [
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 0,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 1,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, normal) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 2,
                format: vk::Format::R32G32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, tex_coord) as u32,
            },
            vk::VertexInputAttributeDescription {
                binding: 0,
                location: 3,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::offset_of!(Vertex, tangent) as u32,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_size() {
        assert_eq!(std::mem::size_of::<Vertex>(), 48);
    }

    #[test]
    fn test_vertex_binding_description() {
        let binding = Vertex::binding_description();
        assert_eq!(binding.binding, 0);
        assert_eq!(binding.stride, 48);
        assert_eq!(binding.input_rate, vk::VertexInputRate::VERTEX);
    }

    #[test]
    fn test_vertex_attribute_descriptions() {
        let attrs = Vertex::attribute_descriptions();
        let locations: Vec<u32> = attrs.iter().map(|a| a.location).collect();
        assert_eq!(locations, vec![0, 1, 2, 3]);

        assert_eq!(attrs[0].format, vk::Format::R32G32B32A32_SFLOAT);
        assert_eq!(attrs[0].offset, 0);
        assert_eq!(attrs[1].offset, 16);
        assert_eq!(attrs[2].offset, 28);
        assert_eq!(attrs[3].format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(attrs[3].offset, 36);
    }

    #[test]
    fn test_vertex_new_sets_homogeneous_w() {
        let vertex = Vertex::new(Vec3::new(1.0, 2.0, 3.0), Vec3::Y, Vec2::ZERO, Vec3::X);
        assert_eq!(vertex.position, Vec4::new(1.0, 2.0, 3.0, 1.0));
        assert_eq!(vertex.normal, Vec3::Y);
    }

    #[test]
    fn test_vertex_bytes() {
        let vertices = [Vertex::default(); 3];
        let bytes: &[u8] = bytemuck::cast_slice(&vertices);
        assert_eq!(bytes.len(), 144);
    }
}
