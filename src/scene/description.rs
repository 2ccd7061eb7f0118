//! JSON scene description
//!
//! One file holds everything a scene needs: the SDF brushes and volume, the
//! optional fluid domain with its emitters, rasterized boxes and the
//! initial camera.

use std::path::Path;

use glam::{UVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::core::camera::Camera;
use crate::core::error::Error;
use crate::core::types::Result;
use crate::fluid::emitter::{CubeEmitter, FluidEmitter};
use crate::fluid::params::FluidDomain;
use crate::frame::opaque::OpaqueBox;
use crate::math::Aabb;
use crate::sdf::brush::Brush;
use crate::sdf::scene::SdfScene;

/// Initial camera placement
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraPose {
    pub position: Vec3,
    pub target: Vec3,
    /// Vertical field of view in degrees
    pub fov_y: f32,
}

impl Default for CameraPose {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, -24.0, 8.0),
            target: Vec3::ZERO,
            fov_y: 60.0,
        }
    }
}

impl CameraPose {
    pub fn camera(&self, aspect: f32) -> Camera {
        let mut camera = Camera::new(self.position, self.fov_y, aspect);
        camera.point_at(self.target, Vec3::Z);
        camera
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SceneDescription {
    #[serde(default)]
    pub name: String,
    pub sdf: SdfScene,
    /// Fluid domain; no physics runs without one
    #[serde(default)]
    pub physics: Option<FluidDomain>,
    #[serde(default)]
    pub emitters: Vec<FluidEmitter>,
    #[serde(default)]
    pub opaque: Vec<OpaqueBox>,
    #[serde(default)]
    pub camera: CameraPose,
}

impl SceneDescription {
    pub fn new(name: impl Into<String>, sdf: SdfScene) -> Self {
        Self {
            name: name.into(),
            sdf,
            physics: None,
            emitters: Vec::new(),
            opaque: Vec::new(),
            camera: CameraPose::default(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let scene: Self = serde_json::from_str(json)?;
        scene.validate()?;
        Ok(scene)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let scene = Self::from_json(&json)?;
        log::info!(
            "loaded scene '{}' from {}: {} brushes, {} emitters",
            scene.name,
            path.display(),
            scene.sdf.brushes.len(),
            scene.emitters.len()
        );
        Ok(scene)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reject shapes the GPU pipelines cannot load
    pub fn validate(&self) -> Result<()> {
        self.sdf.validate()?;
        if let Some(domain) = &self.physics {
            if !(domain.grid_spacing.is_finite() && domain.grid_spacing > 0.0) {
                return Err(Error::Scene(format!(
                    "fluid grid spacing {} must be positive",
                    domain.grid_spacing
                )));
            }
        }
        if let Some(domain) = &self.physics {
            let bounds = domain.bounds();
            for emitter in &self.emitters {
                if let FluidEmitter::Cube(cube) = emitter {
                    if !bounds.intersects(&Aabb::new(cube.min.min(cube.max), cube.min.max(cube.max))) {
                        log::warn!("scene '{}': cube emitter at {} lies outside the fluid grid", self.name, cube.min);
                    }
                }
            }
        }
        if self.physics.is_none() && !self.emitters.is_empty() {
            log::warn!("scene '{}' has emitters but no physics domain; they are ignored", self.name);
        }
        Ok(())
    }

    /// Built-in scene: a few brushes over a floor, with a fluid source
    pub fn demo() -> Self {
        let sdf = SdfScene::centered(UVec3::new(128, 128, 64), Vec3::new(0.0, 0.0, 4.0), 0.25)
            .with_brush(Brush::cube(Vec3::new(0.0, 0.0, -3.5), Vec3::new(30.0, 30.0, 1.0), 0))
            .with_brush(Brush::sphere(Vec3::new(-4.0, 2.0, 0.5), 3.0, 1))
            .with_brush(Brush::cube(Vec3::new(5.0, -1.0, 0.0), Vec3::new(3.0, 3.0, 5.0), 3))
            .with_brush(Brush::sphere(Vec3::new(2.0, 6.0, -1.0), 1.5, 4));

        let mut scene = Self::new("demo", sdf);
        let mut domain = FluidDomain::centered(Vec3::new(0.0, 0.0, 4.0), 0.25);
        domain.kill_z = Some(-6.0);
        scene.physics = Some(domain);
        scene.emitters.push(FluidEmitter::Cube(
            CubeEmitter::from_offset_size(Vec3::new(-1.0, -1.0, 9.0), Vec3::new(2.0, 2.0, 1.0))
                .with_velocity(Vec3::new(0.0, 0.0, -1.0), Vec3::ZERO)
                .with_flux(600.0),
        ));
        scene.opaque.push(OpaqueBox::new(Vec3::new(8.0, 6.0, -3.0), Vec3::new(10.0, 8.0, 1.0), 2));
        scene
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_json() {
        let json = r#"{
            "sdf": {
                "size": [64, 64, 64],
                "grid_size": 0.25,
                "brushes": { "brushes": [] }
            }
        }"#;
        let scene = SceneDescription::from_json(json).unwrap();
        assert!(scene.physics.is_none());
        assert!(scene.emitters.is_empty());
        assert_eq!(scene.camera, CameraPose::default());
        assert!(scene.sdf.is_empty());
    }

    #[test]
    fn test_physics_defaults() {
        let json = r#"{
            "sdf": { "size": [64, 64, 64], "grid_size": 1.0 },
            "physics": { "kill_z": -5.0 },
            "emitters": [{ "type": "Cube", "min": [0, 0, 0], "max": [1, 1, 1] }]
        }"#;
        let scene = SceneDescription::from_json(json).unwrap();
        let domain = scene.physics.unwrap();
        assert_eq!(domain.gravity, Vec3::new(0.0, 0.0, -9.8));
        assert_eq!(domain.grid_spacing, 1.0);
        assert_eq!(domain.kill_z, Some(-5.0));
        assert_eq!(scene.emitters.len(), 1);
    }

    #[test]
    fn test_invalid_scene_is_rejected() {
        let json = r#"{ "sdf": { "size": [60, 64, 64], "grid_size": 1.0 } }"#;
        assert!(matches!(SceneDescription::from_json(json), Err(Error::Scene(_))));

        let json = r#"{ "sdf": { "size": [64, 64, 64], "grid_size": 1.0 }, "physics": { "grid_spacing": 0.0 } }"#;
        assert!(matches!(SceneDescription::from_json(json), Err(Error::Scene(_))));

        assert!(matches!(SceneDescription::from_json("{"), Err(Error::Config(_))));
    }

    #[test]
    fn test_demo_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenes").join("demo.json");
        let demo = SceneDescription::demo();
        demo.validate().unwrap();
        demo.save(&path).unwrap();

        let loaded = SceneDescription::load(&path).unwrap();
        assert_eq!(loaded.name, "demo");
        assert_eq!(loaded.sdf.brushes.len(), demo.sdf.brushes.len());
        assert_eq!(loaded.physics, demo.physics);
        assert_eq!(loaded.emitters, demo.emitters);
        assert_eq!(loaded.opaque, demo.opaque);
    }

    #[test]
    fn test_camera_pose_looks_at_target() {
        let pose = CameraPose::default();
        let camera = pose.camera(1.5);
        let expected = (pose.target - pose.position).normalize();
        assert!(camera.forward().dot(expected) > 0.999);
        assert_eq!(camera.aspect, 1.5);
    }
}
