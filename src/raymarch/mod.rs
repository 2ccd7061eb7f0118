//! Two-phase SDF ray marching
//!
//! `tiled_marching` cone-marches one ray per pixel tile through the coarsest
//! mip to find a safe starting distance; `ray_marching` refines every pixel
//! from there, moving between mips as the clearance changes.

pub mod params;
pub mod pipeline;

pub use params::RayMarchParams;
pub use pipeline::{RayMarchPipeline, RayMarchTargets};

use crate::sdf::SCENE_MIP_COUNT;

/// Threads per axis of both marching kernels
pub const TILED_MARCHING_GROUP_SIZE: u32 = 8;
/// Pixels per axis covered by one tile ray
pub const MARCHING_TILE_SIZE: u32 = 8;
/// Mip the per-pixel pass starts on
pub const INITIAL_PIXEL_MIP: u32 = SCENE_MIP_COUNT / 2;

/// Format of the per-tile (start distance, step count) texture
pub const TILE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rg32Float;
/// View depth, material id + 1, step count, hit flag
pub const RM0_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
/// World normal, hit flag
pub const RM1_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Tile columns and rows covering a `width` x `height` target
pub fn tile_counts(width: u32, height: u32) -> (u32, u32) {
    (width.div_ceil(MARCHING_TILE_SIZE), height.div_ceil(MARCHING_TILE_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_counts() {
        assert_eq!(tile_counts(64, 64), (8, 8));
        assert_eq!(tile_counts(65, 1), (9, 1));
        assert_eq!(INITIAL_PIXEL_MIP, 2);
    }
}
