//! Camera for 3D rendering
//!
//! World space is Z-up; the camera itself looks down its local -Z axis.

use crate::core::types::{Vec3, Mat4, Quat};

/// Near-plane rectangle of a camera in world space.
///
/// `origin` is the top-left corner; `du` spans to the right edge and `dv`
/// spans downwards to the bottom edge, so `origin + u * du + v * dv` is the
/// near-plane point for texture coordinate `(u, v)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NearPlane {
    pub origin: Vec3,
    pub du: Vec3,
    pub dv: Vec3,
}

/// Camera with position, rotation, and projection parameters
#[derive(Clone, Debug)]
pub struct Camera {
    /// World position
    pub position: Vec3,
    /// Rotation as quaternion
    pub rotation: Quat,
    /// Vertical field of view in radians
    pub fov_y: f32,
    /// Aspect ratio (width / height)
    pub aspect: f32,
    /// Near clip plane
    pub near: f32,
    /// Far clip plane
    pub far: f32,
}

impl Camera {
    /// Create a new camera
    pub fn new(position: Vec3, fov_y_degrees: f32, aspect: f32) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near: 0.05,
            far: 500.0,
        }
    }

    /// Create camera looking at a target
    pub fn look_at(position: Vec3, target: Vec3, up: Vec3) -> Self {
        let mut camera = Self::new(position, 60.0, 16.0 / 9.0);
        camera.point_at(target, up);
        camera
    }

    /// Re-orient the camera towards `target`, keeping its position
    pub fn point_at(&mut self, target: Vec3, up: Vec3) {
        let forward = (target - self.position).normalize();
        let right = forward.cross(up).normalize();
        let up = right.cross(forward);
        self.rotation = Quat::from_mat3(&glam::Mat3::from_cols(right, up, -forward));
    }

    /// Get view matrix (world to camera space)
    pub fn view_matrix(&self) -> Mat4 {
        let rotation_matrix = Mat4::from_quat(self.rotation.conjugate());
        let translation_matrix = Mat4::from_translation(-self.position);
        rotation_matrix * translation_matrix
    }

    /// Get projection matrix (camera to clip space, depth 0..1)
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    /// Get combined view-projection matrix
    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Get inverse view-projection matrix (for ray generation)
    pub fn view_projection_inverse(&self) -> Mat4 {
        self.view_projection().inverse()
    }

    /// Get forward direction (negative Z in camera space)
    pub fn forward(&self) -> Vec3 {
        self.rotation * -Vec3::Z
    }

    /// Get right direction (positive X in camera space)
    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    /// Get up direction (positive Y in camera space)
    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    /// Near-plane rectangle used to build per-pixel rays
    pub fn near_plane(&self) -> NearPlane {
        let half_height = (self.fov_y * 0.5).tan() * self.near;
        let half_width = half_height * self.aspect;
        let center = self.position + self.forward() * self.near;
        let right = self.right();
        let up = self.up();

        NearPlane {
            origin: center - right * half_width + up * half_height,
            du: right * (2.0 * half_width),
            dv: -up * (2.0 * half_height),
        }
    }

    /// Angular footprint of one pixel per unit distance along the view axis
    pub fn pixel_aperture(&self, height: u32) -> f32 {
        2.0 * (self.fov_y * 0.5).tan() / height.max(1) as f32
    }

    /// Update aspect ratio (call on window resize)
    pub fn set_aspect(&mut self, width: f32, height: f32) {
        self.aspect = width / height;
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 0.0, 5.0), 60.0, 16.0 / 9.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directions() {
        let camera = Camera::default();

        // Default camera looks down -Z
        let forward = camera.forward();
        assert!((forward.z - (-1.0)).abs() < 0.001);
        assert!((camera.right().x - 1.0).abs() < 0.001);
        assert!((camera.up().y - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_look_at_z_up() {
        let camera = Camera::look_at(Vec3::new(10.0, 0.0, 0.0), Vec3::ZERO, Vec3::Z);
        assert!((camera.forward() - Vec3::NEG_X).length() < 1e-4);
        assert!((camera.up() - Vec3::Z).length() < 1e-4);
    }

    #[test]
    fn test_near_plane_center_ray_matches_forward() {
        let camera = Camera::look_at(Vec3::new(3.0, -4.0, 2.0), Vec3::ZERO, Vec3::Z);
        let plane = camera.near_plane();
        let center = plane.origin + plane.du * 0.5 + plane.dv * 0.5;
        let dir = (center - camera.position).normalize();
        assert!((dir - camera.forward()).length() < 1e-4);

        // Top-left corner projects to NDC (-1, 1)
        let clip = camera.view_projection() * plane.origin.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!((ndc.x + 1.0).abs() < 1e-3);
        assert!((ndc.y - 1.0).abs() < 1e-3);
        assert!(ndc.z.abs() < 1e-3);
    }

    #[test]
    fn test_pixel_aperture() {
        let camera = Camera::new(Vec3::ZERO, 90.0, 1.0);
        assert!((camera.pixel_aperture(100) - 0.02).abs() < 1e-5);
    }
}
