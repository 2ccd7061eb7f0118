//! Per-camera ray marching parameters

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::core::camera::Camera;
use crate::raymarch::{tile_counts, INITIAL_PIXEL_MIP, MARCHING_TILE_SIZE};
use crate::sdf::generation::LoadedScene;
use crate::sdf::{SCENE_MIP_COUNT, SDF_SUPREMUM};

/// Layout must match `RayMarchParams` in `ray_marching.wgsl`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct RayMarchParams {
    pub near_origin: [f32; 4],
    pub near_du: [f32; 4],
    pub near_dv: [f32; 4],
    /// Scene-space camera position, pixel aperture in `w`
    pub camera: [f32; 4],
    /// Mip-0 texels per axis, mip count in `w`
    pub scene_size: [u32; 4],
    /// Sweep factor, `1 - sweep`, pause threshold, tile aperture
    pub tile: [f32; 4],
    /// Max steps, initial pixel mip
    pub limits: [u32; 4],
    /// Width, height, tile columns, tile rows
    pub screen: [u32; 4],
    /// Near, far, world units per scene unit
    pub depth: [f32; 4],
    pub view_forward: [f32; 4],
}

const _: () = assert!(std::mem::size_of::<RayMarchParams>() == 160);

/// Cone aperture of a tile ray: the pixel aperture widened to the tile's
/// half diagonal
pub fn tile_aperture(pixel_aperture: f32) -> f32 {
    pixel_aperture * MARCHING_TILE_SIZE as f32 * std::f32::consts::FRAC_1_SQRT_2
}

/// Step scale that keeps a cone of `aperture` inside the clearance sphere
pub fn sweep_factor(aperture: f32) -> f32 {
    1.0 / (1.0 + aperture)
}

impl RayMarchParams {
    pub fn new(camera: &Camera, scene: &LoadedScene, width: u32, height: u32, max_steps: u32) -> Self {
        let to_scene = |p: Vec3| (p - scene.origin) / scene.grid_size;
        let near = camera.near_plane();
        let origin = to_scene(near.origin);
        let du = near.du / scene.grid_size;
        let dv = near.dv / scene.grid_size;
        let eye = to_scene(camera.position);

        let pixel_aperture = camera.pixel_aperture(height);
        let aperture = tile_aperture(pixel_aperture);
        let sweep = sweep_factor(aperture);
        let (tiles_x, tiles_y) = tile_counts(width, height);

        Self {
            near_origin: origin.extend(0.0).to_array(),
            near_du: du.extend(0.0).to_array(),
            near_dv: dv.extend(0.0).to_array(),
            camera: eye.extend(pixel_aperture).to_array(),
            scene_size: [scene.size.x, scene.size.y, scene.size.z, SCENE_MIP_COUNT],
            tile: [sweep, 1.0 - sweep, SDF_SUPREMUM * 0.25, aperture],
            limits: [max_steps, INITIAL_PIXEL_MIP, 0, 0],
            screen: [width, height, tiles_x, tiles_y],
            depth: [camera.near, camera.far, scene.grid_size, 0.0],
            view_forward: camera.forward().extend(0.0).to_array(),
        }
    }
}
