//! SDF scene description

use glam::{Mat4, UVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::math::Aabb;
use crate::sdf::brush::{Brush, BrushCollection};
use crate::sdf::{MAT_VOLUME_SCALE, SCENE_SIZE_GRANULARITY, SDF_SUPREMUM};

/// Brushes plus the volume they are rasterized into
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SdfScene {
    /// Scene volume resolution in mip-0 texels
    pub size: UVec3,
    /// World position of the volume's minimum corner
    #[serde(default)]
    pub origin: Vec3,
    /// World units per mip-0 texel
    pub grid_size: f32,
    #[serde(default)]
    pub brushes: BrushCollection,
}

impl SdfScene {
    pub fn new(size: UVec3, origin: Vec3, grid_size: f32) -> Self {
        Self {
            size,
            origin,
            grid_size,
            brushes: BrushCollection::new(),
        }
    }

    /// Volume of `size` texels centered on `center`
    pub fn centered(size: UVec3, center: Vec3, grid_size: f32) -> Self {
        Self::new(size, center - size.as_vec3() * grid_size * 0.5, grid_size)
    }

    pub fn with_brush(mut self, brush: Brush) -> Self {
        self.brushes.push(brush);
        self
    }

    /// A scene without brushes produces no volumes
    pub fn is_empty(&self) -> bool {
        self.brushes.is_empty()
    }

    /// Material volume resolution at mip 0
    pub fn material_size(&self) -> UVec3 {
        self.size / MAT_VOLUME_SCALE
    }

    /// Distance covered by a normalized value of 1 at mip 0
    pub fn world_space_supremum(&self) -> f32 {
        self.grid_size * SDF_SUPREMUM
    }

    /// Scene space (mip-0 texels) to world space
    pub fn scene_to_world(&self) -> Mat4 {
        Mat4::from_translation(self.origin) * Mat4::from_scale(Vec3::splat(self.grid_size))
    }

    pub fn world_to_scene(&self, world: Vec3) -> Vec3 {
        (world - self.origin) / self.grid_size
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::new(self.origin, self.origin + self.size.as_vec3() * self.grid_size)
    }

    /// World position of the center of mip-0 texel `texel`
    pub fn texel_center(&self, texel: UVec3) -> Vec3 {
        self.origin + (texel.as_vec3() + 0.5) * self.grid_size
    }

    /// World position of the center of material cell `cell`
    pub fn cell_center(&self, cell: UVec3) -> Vec3 {
        self.origin + (cell.as_vec3() + 0.5) * (MAT_VOLUME_SCALE as f32 * self.grid_size)
    }

    /// Check the volume shape before any GPU work
    pub fn validate(&self) -> Result<()> {
        if self.size.cmpeq(UVec3::ZERO).any() || (self.size % SCENE_SIZE_GRANULARITY).cmpne(UVec3::ZERO).any() {
            return Err(Error::Scene(format!(
                "scene size {} must be a non-zero multiple of {}",
                self.size, SCENE_SIZE_GRANULARITY
            )));
        }
        if !(self.grid_size.is_finite() && self.grid_size > 0.0) {
            return Err(Error::Scene(format!("grid size {} must be positive", self.grid_size)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_scene() {
        let scene = SdfScene::new(UVec3::splat(64), Vec3::ZERO, 1.0);
        assert!(scene.is_empty());
        assert!(!scene.with_brush(Brush::sphere(Vec3::ZERO, 1.0, 0)).is_empty());
    }

    #[test]
    fn test_centered_scene_transform() {
        let scene = SdfScene::centered(UVec3::splat(64), Vec3::ZERO, 0.25);
        assert_eq!(scene.origin, Vec3::splat(-8.0));
        assert_eq!(scene.world_to_scene(Vec3::ZERO), Vec3::splat(32.0));
        assert_eq!(scene.scene_to_world().transform_point3(Vec3::splat(32.0)), Vec3::ZERO);
        assert_eq!(scene.world_space_supremum(), 1.0);
        assert_eq!(scene.material_size(), UVec3::splat(16));
        assert_eq!(scene.bounds().max, Vec3::splat(8.0));
    }

    #[test]
    fn test_validate() {
        assert!(SdfScene::new(UVec3::new(64, 128, 64), Vec3::ZERO, 1.0).validate().is_ok());
        assert!(SdfScene::new(UVec3::new(64, 96, 64), Vec3::ZERO, 1.0).validate().is_err());
        assert!(SdfScene::new(UVec3::ZERO, Vec3::ZERO, 1.0).validate().is_err());
        assert!(SdfScene::new(UVec3::splat(64), Vec3::ZERO, 0.0).validate().is_err());
    }
}
