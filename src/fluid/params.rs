//! Fluid solver parameter blocks and the physics domain description

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::core::config::FluidConfig;
use crate::fluid::{BLOCK_SIZE, GRID_SIZE_LEVEL0, MAX_PARTICLE_COUNT};
use crate::math::Aabb;
use crate::sdf::generation::LoadedScene;
use crate::sdf::SDF_SUPREMUM;

/// Placement of the fluid grid in the world
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluidDomain {
    /// World position of grid node (0, 0, 0)
    pub origin: Vec3,
    /// World units between grid nodes
    pub grid_spacing: f32,
    pub gravity: Vec3,
    /// Particles falling below this world height are removed
    pub kill_z: Option<f32>,
}

impl Default for FluidDomain {
    fn default() -> Self {
        Self::centered(Vec3::ZERO, 1.0)
    }
}

impl FluidDomain {
    /// Domain whose grid is centered on `center`
    pub fn centered(center: Vec3, grid_spacing: f32) -> Self {
        let half = GRID_SIZE_LEVEL0 as f32 * grid_spacing * 0.5;
        Self {
            origin: center - Vec3::splat(half),
            grid_spacing,
            gravity: Vec3::new(0.0, 0.0, -9.8),
            kill_z: None,
        }
    }

    /// World-space extent covered by the grid
    pub fn extent(&self) -> f32 {
        (GRID_SIZE_LEVEL0 - 1) as f32 * self.grid_spacing
    }

    pub fn world_to_grid(&self, world: Vec3) -> Vec3 {
        (world - self.origin) / self.grid_spacing
    }

    pub fn grid_to_world(&self, grid: Vec3) -> Vec3 {
        self.origin + grid * self.grid_spacing
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::new(self.origin, self.origin + Vec3::splat(self.extent()))
    }

    /// Whether a world position lies inside the grid
    pub fn contains(&self, world: Vec3) -> bool {
        let g = self.world_to_grid(world);
        let top = (GRID_SIZE_LEVEL0 - 1) as f32;
        g.cmpge(Vec3::ZERO).all() && g.cmple(Vec3::splat(top)).all()
    }
}

/// Layout must match `PhysicsSceneParams` in `fluid_solver.wgsl`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PhysicsSceneParams {
    /// Grid origin, spacing in `w`
    pub grid_origin: [f32; 4],
    /// Grid node to SDF scene texel: offset, scale in `w`
    pub grid_to_scene: [f32; 4],
    /// SDF scene texels per axis, 1 in `w` when a scene volume is bound
    pub scene_size: [u32; 4],
    /// Stiffness, rest density, world distance of a unit SDF sample, kill height
    pub material: [f32; 4],
    /// Grid cells per axis, block size, particle capacity
    pub limits: [u32; 4],
}

const _: () = assert!(std::mem::size_of::<PhysicsSceneParams>() == 80);

impl PhysicsSceneParams {
    pub fn new(domain: &FluidDomain, fluid: &FluidConfig, sdf: Option<&LoadedScene>) -> Self {
        let (grid_to_scene, scene_size, supremum) = match sdf {
            Some(scene) => {
                let offset = (domain.origin - scene.origin) / scene.grid_size;
                let scale = domain.grid_spacing / scene.grid_size;
                (
                    offset.extend(scale).to_array(),
                    [scene.size.x, scene.size.y, scene.size.z, 1],
                    scene.grid_size * SDF_SUPREMUM,
                )
            }
            None => ([0.0, 0.0, 0.0, 1.0], [1, 1, 1, 0], SDF_SUPREMUM),
        };

        Self {
            grid_origin: domain.origin.extend(domain.grid_spacing).to_array(),
            grid_to_scene,
            scene_size,
            material: [
                fluid.stiffness,
                fluid.rest_density,
                supremum,
                domain.kill_z.unwrap_or(f32::MIN),
            ],
            limits: [GRID_SIZE_LEVEL0, BLOCK_SIZE, MAX_PARTICLE_COUNT, 0],
        }
    }
}

/// Layout must match `PhysicsFrameParams` in `fluid_solver.wgsl`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PhysicsFrameParams {
    /// dt, 1/dt (0 when dt is 0), previous dt
    pub time_step: [f32; 4],
    pub gravity: [f32; 4],
}

const _: () = assert!(std::mem::size_of::<PhysicsFrameParams>() == 32);

impl PhysicsFrameParams {
    pub fn new(dt: f32, previous_dt: f32, gravity: Vec3) -> Self {
        let inv = if dt > 0.0 { 1.0 / dt } else { 0.0 };
        Self {
            time_step: [dt, inv, previous_dt, 0.0],
            gravity: gravity.extend(0.0).to_array(),
        }
    }
}

/// Layout must match `AddParticlesParams` in `fluid_solver.wgsl`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct AddParticlesParams {
    pub record_count: u32,
    pub partition_count: u32,
    pub mass: f32,
    pub random_seed: u32,
}

const _: () = assert!(std::mem::size_of::<AddParticlesParams>() == 16);
