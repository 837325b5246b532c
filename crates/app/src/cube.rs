//! Unit cube geometry for the demo scene.

use framegraph_rhi::vertex::Vertex;
use glam::{Vec2, Vec3};

/// Faces as (normal, tangent) pairs; the bitangent is `normal x tangent`.
const FACES: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::NEG_Z),
    (Vec3::NEG_X, Vec3::Z),
    (Vec3::Y, Vec3::X),
    (Vec3::NEG_Y, Vec3::X),
    (Vec3::Z, Vec3::X),
    (Vec3::NEG_Z, Vec3::NEG_X),
];

/// 24 vertices (4 per face, so normals stay flat) and 36 indices of a cube
/// spanning -0.5..0.5, wound counter-clockwise when seen from outside.
pub fn cube() -> (Vec<Vertex>, Vec<u32>) {
    let corners = [
        (Vec2::new(-0.5, -0.5), Vec2::new(0.0, 1.0)),
        (Vec2::new(0.5, -0.5), Vec2::new(1.0, 1.0)),
        (Vec2::new(0.5, 0.5), Vec2::new(1.0, 0.0)),
        (Vec2::new(-0.5, 0.5), Vec2::new(0.0, 0.0)),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (normal, tangent) in FACES {
        let bitangent = normal.cross(tangent);
        let base = vertices.len() as u32;
        for (offset, uv) in corners {
            let position = normal * 0.5 + tangent * offset.x + bitangent * offset.y;
            vertices.push(Vertex::new(position, normal, uv, tangent));
        }
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }

    (vertices, indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_counts() {
        let (vertices, indices) = cube();
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);
        assert!(indices.iter().all(|&i| (i as usize) < vertices.len()));
    }

    #[test]
    fn test_cube_faces_point_outward() {
        let (vertices, indices) = cube();
        for triangle in indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|k| vertices[triangle[k] as usize].position.truncate());
            let face_normal = (b - a).cross(c - a).normalize();
            let normal = vertices[triangle[0] as usize].normal;
            assert!(face_normal.dot(normal) > 0.99);
        }
    }
}
