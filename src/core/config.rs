//! Engine configuration

use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::core::types::Result;

/// Number of material palette entries visible to the compose shader
pub const PALETTE_SIZE: usize = 16;

/// Palette slot reserved for fluid debug particles
pub const PARTICLE_MATERIAL: u32 = PALETTE_SIZE as u32 - 1;

/// Renderer and simulation settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Initial window size in pixels
    pub window_size: [u32; 2],
    /// Per-pixel sphere tracing step budget
    pub max_march_steps: u32,
    /// Sky colour at the horizon
    pub sky_horizon: Vec3,
    /// Sky colour at the zenith
    pub sky_zenith: Vec3,
    /// Direction light travels *from* (normalized on use)
    pub light_direction: Vec3,
    /// Ambient light factor for the compose pass
    pub ambient: f32,
    /// Albedo per material id; the last entry colours debug particles
    pub palette: Vec<Vec3>,
    /// Edge length of a debug particle quad in world units
    pub debug_particle_size: f32,
    /// Draw fluid particles into the G-buffer
    pub debug_particles: bool,
    /// Fixed physics step in seconds
    pub physics_time_step: f32,
    pub fluid: FluidConfig,
}

/// Fluid material settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluidConfig {
    /// Pressure response to over-density
    pub stiffness: f32,
    /// Particle mass per grid cell at rest
    pub rest_density: f32,
    /// Mass of a single particle
    pub particle_mass: f32,
}

impl Default for FluidConfig {
    fn default() -> Self {
        Self {
            stiffness: 1.0,
            rest_density: 8.0,
            particle_mass: 1.0,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut palette = vec![
            Vec3::new(0.80, 0.78, 0.74),
            Vec3::new(0.85, 0.35, 0.25),
            Vec3::new(0.30, 0.60, 0.35),
            Vec3::new(0.30, 0.45, 0.85),
            Vec3::new(0.90, 0.75, 0.30),
            Vec3::new(0.60, 0.40, 0.75),
        ];
        palette.resize(PALETTE_SIZE - 1, Vec3::splat(0.7));
        palette.push(Vec3::new(0.20, 0.50, 0.95));

        Self {
            window_size: [1280, 720],
            max_march_steps: 128,
            sky_horizon: Vec3::new(0.75, 0.85, 0.95),
            sky_zenith: Vec3::new(0.25, 0.45, 0.80),
            light_direction: Vec3::new(-0.4, -0.3, -0.85),
            ambient: 0.25,
            palette,
            debug_particle_size: 0.25,
            debug_particles: true,
            physics_time_step: 1.0 / 60.0,
            fluid: FluidConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Save configuration as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Palette padded or truncated to exactly `PALETTE_SIZE` entries
    pub fn palette_rgba(&self) -> [[f32; 4]; PALETTE_SIZE] {
        let mut out = [[0.7, 0.7, 0.7, 1.0]; PALETTE_SIZE];
        for (slot, color) in out.iter_mut().zip(&self.palette) {
            *slot = color.extend(1.0).to_array();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_palette_has_particle_slot() {
        let config = EngineConfig::default();
        assert_eq!(config.palette.len(), PALETTE_SIZE);
        let rgba = config.palette_rgba();
        assert_eq!(rgba[PARTICLE_MATERIAL as usize][2], 0.95);
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("engine.json");

        let mut config = EngineConfig::default();
        config.max_march_steps = 64;
        config.fluid.stiffness = 2.5;
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{ "max_march_steps": 32 }"#).unwrap();
        assert_eq!(config.max_march_steps, 32);
        assert_eq!(config.debug_particle_size, 0.25);
        assert_eq!(config.fluid, FluidConfig::default());
    }

    #[test]
    fn test_load_reports_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(EngineConfig::load(&path), Err(crate::core::Error::Config(_))));
    }
}
