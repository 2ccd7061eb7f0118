//! Parameter block shared by the generation kernels

use bytemuck::{Pod, Zeroable};

use crate::sdf::reference::CullRadii;
use crate::sdf::scene::SdfScene;
use crate::sdf::{MAX_BRUSH_PER_MAT_VOLUME_GRID, SCENE_MIP_COUNT};

/// Layout must match `GenerationParams` in `sdf_generation.wgsl`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SdfGenerationParams {
    /// Mip-0 texels per axis, mip count in `w`
    pub scene_size: [u32; 4],
    /// Material cells per axis at mip 0, brush count in `w`
    pub mat_size: [u32; 4],
    /// Tile radius, cell radius and world supremum, all in world units
    pub cull_radius: [f32; 4],
    /// Volume origin in `xyz`, world units per texel in `w`
    pub scene_to_world: [f32; 4],
    /// Brush-index capacity, brushes kept per cell
    pub limits: [u32; 4],
}

const _: () = assert!(std::mem::size_of::<SdfGenerationParams>() == 80);

impl SdfGenerationParams {
    pub fn new(scene: &SdfScene, brush_count: u32, brush_index_capacity: u32) -> Self {
        let radii = CullRadii::for_grid_size(scene.grid_size);
        let mat = scene.material_size();
        Self {
            scene_size: [scene.size.x, scene.size.y, scene.size.z, SCENE_MIP_COUNT],
            mat_size: [mat.x, mat.y, mat.z, brush_count],
            cull_radius: [radii.tile, radii.grid, scene.world_space_supremum(), 0.0],
            scene_to_world: [scene.origin.x, scene.origin.y, scene.origin.z, scene.grid_size],
            limits: [brush_index_capacity, MAX_BRUSH_PER_MAT_VOLUME_GRID, 0, 0],
        }
    }
}
