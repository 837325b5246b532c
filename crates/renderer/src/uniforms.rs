//! Uniform data shared with the shaders.
//!
//! Structures are `#[repr(C)]` and `Pod` so they can be written to mapped
//! uniform buffers as raw bytes.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Camera uniform block bound as the `Camera` resource of binding set 0.
///
/// # Memory Layout
///
/// - Offset 0: view matrix (64 bytes)
/// - Offset 64: projection matrix (64 bytes)
/// - Total size: 128 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CameraUniforms {
    pub view: Mat4,
    pub projection: Mat4,
}

impl CameraUniforms {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(view: Mat4, projection: Mat4) -> Self {
        Self { view, projection }
    }
}

/// Perspective camera looking at a fixed target.
#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: 45.0_f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Projection into Vulkan clip space (depth 0..1, Y pointing down).
    pub fn projection_matrix(&self) -> Mat4 {
        let mut projection = Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far);
        projection.y_axis.y *= -1.0;
        projection
    }

    pub fn uniforms(&self) -> CameraUniforms {
        CameraUniforms::new(self.view_matrix(), self.projection_matrix())
    }

    pub fn set_aspect(&mut self, width: u32, height: u32) {
        if height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn test_camera_uniforms_size() {
        assert_eq!(CameraUniforms::SIZE, 128);
        assert_eq!(std::mem::align_of::<CameraUniforms>(), 16);
    }

    #[test]
    fn test_camera_uniforms_bytes() {
        let uniforms = CameraUniforms::new(Mat4::IDENTITY, Mat4::IDENTITY);
        let bytes: &[u8] = bytemuck::bytes_of(&uniforms);
        assert_eq!(bytes.len(), 128);
        assert_eq!(&bytes[0..4], &1.0f32.to_ne_bytes());
    }

    #[test]
    fn test_projection_flips_y() {
        let camera = Camera::default();
        let clip = camera.projection_matrix() * Vec4::new(0.0, 1.0, -1.0, 1.0);
        assert!(clip.y < 0.0);
    }

    #[test]
    fn test_view_moves_target_in_front() {
        let camera = Camera::default();
        let target = camera.view_matrix().transform_point3(camera.target);
        assert!(target.z < 0.0);
        assert!(target.x.abs() < 1e-5);
    }

    #[test]
    fn test_set_aspect_ignores_zero_height() {
        let mut camera = Camera::default();
        camera.set_aspect(800, 0);
        assert_eq!(camera.aspect, 16.0 / 9.0);
        camera.set_aspect(800, 400);
        assert_eq!(camera.aspect, 2.0);
    }
}
